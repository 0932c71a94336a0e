// TURN credential vending: a background refresher keeps one cached
// credential bundle; the signaling core only ever reads the cache.

use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::frameworks::config;

const RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// A vended TURN credential bundle as sent to clients.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub url: String,
    pub username: String,
    pub credential: String,
    pub lifetime: i64,
}

#[derive(Debug)]
pub enum CredentialsError {
    Transport(reqwest::Error),
    Upstream(reqwest::StatusCode),
    Rejected(String),
}

impl fmt::Display for CredentialsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialsError::Transport(err) => write!(f, "credentials transport error: {err}"),
            CredentialsError::Upstream(status) => {
                write!(f, "credentials upstream error: {status}")
            }
            CredentialsError::Rejected(errors) => {
                write!(f, "credentials request rejected: {errors}")
            }
        }
    }
}

impl std::error::Error for CredentialsError {}

#[derive(Debug, Deserialize)]
struct VendorResponse {
    result: VendorResult,
    success: bool,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct VendorResult {
    #[serde(default)]
    protocol: String,
    dns: VendorDns,
    lifetime: i64,
    userid: String,
    credential: String,
}

#[derive(Debug, Deserialize)]
struct VendorDns {
    name: String,
}

impl VendorResponse {
    // Formats like turn:webrtc-turn.example.com:50000?transport=udp
    fn url(&self) -> String {
        let (transport, port) = match self.result.protocol.split_once('/') {
            Some((transport, port)) => (transport, port),
            None => ("udp", "50000"),
        };
        format!("turn:{}:{port}?transport={transport}", self.result.dns.name)
    }
}

/// Fetches and caches TURN credentials from the configured vendor.
pub struct CredentialsClient {
    zone: Option<String>,
    app_id: Option<String>,
    auth_user: Option<String>,
    auth_key: Option<String>,
    lifetime: Duration,

    http: reqwest::Client,
    cached: RwLock<Option<Credentials>>,
    has_fetched: AtomicBool,
}

impl CredentialsClient {
    pub fn from_env() -> CredentialsClient {
        CredentialsClient {
            zone: config::cloudflare_zone(),
            app_id: config::cloudflare_app_id(),
            auth_user: config::cloudflare_auth_user(),
            auth_key: config::cloudflare_auth_key(),
            lifetime: config::CREDENTIALS_LIFETIME,
            http: reqwest::Client::new(),
            cached: RwLock::new(None),
            has_fetched: AtomicBool::new(false),
        }
    }

    fn configured(&self) -> bool {
        self.zone.is_some()
            && self.app_id.is_some()
            && self.auth_user.is_some()
            && self.auth_key.is_some()
    }

    /// The current cached bundle, if any fetch has succeeded yet.
    pub fn get(&self) -> Option<Credentials> {
        self.cached.read().expect("credentials lock poisoned").clone()
    }

    /// True once credentials have been fetched at least once; drives the
    /// readiness endpoint.
    pub fn has_fetched(&self) -> bool {
        self.has_fetched.load(Ordering::Relaxed)
    }

    /// Refresh loop: retries every minute on failure, refreshes at half
    /// the credential lifetime on success.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if !self.configured() {
            warn!("no TURN vendor configured, not fetching credentials");
            // Unconfigured deployments (local, test) are ready as-is.
            self.has_fetched.store(true, Ordering::Relaxed);
            return;
        }

        loop {
            let delay = match self.fetch().await {
                Ok(credentials) => {
                    info!(lifetime = credentials.lifetime, "fetched TURN credentials");
                    *self.cached.write().expect("credentials lock poisoned") =
                        Some(credentials);
                    self.has_fetched.store(true, Ordering::Relaxed);
                    self.lifetime / 2
                }
                Err(err) => {
                    error!(error = %err, "failed to fetch TURN credentials");
                    RETRY_INTERVAL
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    async fn fetch(&self) -> Result<Credentials, CredentialsError> {
        let zone = self.zone.as_deref().unwrap_or_default();
        let app_id = self.app_id.as_deref().unwrap_or_default();
        let url = format!(
            "https://api.cloudflare.com/client/v4/zones/{zone}/webrtc-turn/credential/{app_id}"
        );

        let response = self
            .http
            .post(&url)
            .header("X-Auth-Email", self.auth_user.as_deref().unwrap_or_default())
            .header("X-Auth-Key", self.auth_key.as_deref().unwrap_or_default())
            .json(&serde_json::json!({ "lifetime": self.lifetime.as_secs() }))
            .send()
            .await
            .map_err(CredentialsError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(CredentialsError::Upstream(status));
        }

        let body: VendorResponse = response
            .json()
            .await
            .map_err(CredentialsError::Transport)?;
        if !body.success {
            return Err(CredentialsError::Rejected(format!("{:?}", body.errors)));
        }

        Ok(Credentials {
            url: body.url(),
            username: body.result.userid.clone(),
            credential: body.result.credential.clone(),
            lifetime: body.result.lifetime,
        })
    }
}
