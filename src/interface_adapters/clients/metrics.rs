// Analytics event sink: fire-and-forget POSTs to the metrics endpoint.

use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::frameworks::config;

const MAX_ATTEMPTS: u32 = 5;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub time: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
    pub game: String,

    pub category: String,
    pub action: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub peer: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub lobby: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, String>>,
}

/// Thin wrapper around reqwest; events of disconnected peers still get
/// delivered because each send runs detached from the connection.
#[derive(Clone)]
pub struct MetricsClient {
    url: Option<String>,
    version: String,
    http: reqwest::Client,
}

impl MetricsClient {
    pub fn from_env() -> MetricsClient {
        let url = config::metrics_url();
        if url.is_none() {
            debug!("no METRICS_URL set, metrics disabled");
        }
        MetricsClient {
            url,
            version: config::version(),
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Records one event; returns immediately, delivery happens in the
    /// background with retries.
    pub fn record(
        &self,
        category: &str,
        action: &str,
        game: &str,
        peer_id: &str,
        lobby: &str,
        data: Option<HashMap<String, String>>,
    ) {
        let Some(url) = self.url.clone() else {
            return;
        };
        let event = Event {
            time: chrono::Utc::now().timestamp_millis(),
            version: self.version.clone(),
            game: game.to_string(),
            category: category.to_string(),
            action: action.to_string(),
            peer: peer_id.to_string(),
            lobby: lobby.to_string(),
            data,
        };
        let http = self.http.clone();
        tokio::spawn(async move {
            for attempt in 1..=MAX_ATTEMPTS {
                match http.post(&url).json(&event).send().await {
                    Ok(response) if response.status().is_success() => return,
                    Ok(response) => {
                        warn!(status = %response.status(), attempt, "metrics endpoint rejected event");
                    }
                    Err(err) => {
                        warn!(error = %err, attempt, "failed to deliver metrics event");
                    }
                }
                if attempt < MAX_ATTEMPTS {
                    let jitter_ms = rand::thread_rng().gen_range(100..1000) * u64::from(attempt);
                    tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_without_empty_fields() {
        let event = Event {
            time: 1700000000000,
            version: String::new(),
            game: "g".to_string(),
            category: "lobby".to_string(),
            action: "created".to_string(),
            peer: "a".to_string(),
            lobby: String::new(),
            data: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["category"], "lobby");
        assert_eq!(value["peer"], "a");
        assert!(value.get("version").is_none());
        assert!(value.get("lobby").is_none());
        assert!(value.get("data").is_none());
    }
}
