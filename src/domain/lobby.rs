use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Who is allowed to change a lobby's settings after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePolicy {
    Creator,
    Leader,
    Anyone,
    None,
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        UpdatePolicy::Creator
    }
}

impl UpdatePolicy {
    /// Parses the wire representation; `None` input falls back to the default.
    pub fn parse(value: Option<&str>) -> Option<UpdatePolicy> {
        match value {
            None => Some(UpdatePolicy::Creator),
            Some("creator") => Some(UpdatePolicy::Creator),
            Some("leader") => Some(UpdatePolicy::Leader),
            Some("anyone") => Some(UpdatePolicy::Anyone),
            Some("none") => Some(UpdatePolicy::None),
            Some(_) => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdatePolicy::Creator => "creator",
            UpdatePolicy::Leader => "leader",
            UpdatePolicy::Anyone => "anyone",
            UpdatePolicy::None => "none",
        }
    }
}

/// Latency vector keyed by region identifier, values in milliseconds.
pub type Latencies = HashMap<String, f64>;

/// Validated client location extracted from headers or query parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoLocation {
    pub lat: f64,
    pub lon: f64,
    pub country: Option<String>,
    pub region: Option<String>,
}

impl GeoLocation {
    /// Great-circle distance to another location in kilometers.
    pub fn distance_km(&self, other: &GeoLocation) -> f64 {
        const EARTH_RADIUS_KM: f64 = 6371.0;
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// A lobby as served to clients; doubles as the `lobbyInfo` wire shape.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lobby {
    pub code: String,
    pub peers: Vec<String>,
    pub player_count: usize,
    pub creator: String,

    pub public: bool,
    pub max_players: i32,
    pub has_password: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<Value>,
    pub can_update_by: UpdatePolicy,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader: Option<String>,
    pub term: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Estimated round trip in milliseconds based on member locations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_latency_geo: Option<f64>,
    /// Estimated round trip in milliseconds based on member latency vectors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_latency: Option<f64>,
}

/// Settings supplied when creating a lobby.
#[derive(Debug, Clone, Default)]
pub struct CreateLobbyOptions {
    pub public: bool,
    pub custom_data: Option<Value>,
    pub password: Option<String>,
    pub max_players: i32,
    pub can_update_by: UpdatePolicy,
}

/// Partial update applied by `lobbyUpdate`; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct LobbyPatch {
    pub public: Option<bool>,
    pub custom_data: Option<Value>,
    pub password: Option<String>,
    pub max_players: Option<i32>,
    pub can_update_by: Option<UpdatePolicy>,
}

impl LobbyPatch {
    pub fn is_empty(&self) -> bool {
        self.public.is_none()
            && self.custom_data.is_none()
            && self.password.is_none()
            && self.max_players.is_none()
            && self.can_update_by.is_none()
    }
}

/// Parameters of a `list` request, including the requester's own
/// location data used for the latency hints.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub filter: Option<Value>,
    pub sort: Option<Vec<String>>,
    pub limit: Option<i64>,
    pub geo: Option<GeoLocation>,
    pub latencies: Option<Latencies>,
}

/// Stored location data of a single lobby member.
#[derive(Debug, Clone, Default)]
pub struct PeerLocation {
    pub geo: Option<GeoLocation>,
    pub latencies: Option<Latencies>,
}

// Keepalive-grade overhead added on top of pure propagation time.
const GEO_BASE_RTT_MS: f64 = 20.0;
// Light travels roughly 100km per millisecond of round trip in fiber.
const GEO_KM_PER_RTT_MS: f64 = 100.0;

/// Computes the two latency hints for one lobby from its members'
/// stored data: a geographic estimate and a latency-vector estimate.
pub fn estimate_latencies(
    requester_geo: Option<&GeoLocation>,
    requester_latencies: Option<&Latencies>,
    members: &[PeerLocation],
) -> (Option<f64>, Option<f64>) {
    let mut geo_samples = Vec::new();
    let mut vector_samples = Vec::new();

    for member in members {
        if let (Some(own), Some(theirs)) = (requester_geo, member.geo.as_ref()) {
            let rtt = GEO_BASE_RTT_MS + own.distance_km(theirs) / GEO_KM_PER_RTT_MS;
            geo_samples.push(rtt);
        }
        if let (Some(vector), Some(geo)) = (requester_latencies, member.geo.as_ref()) {
            if let Some(region) = geo.region.as_deref() {
                if let Some(ms) = vector.get(region) {
                    vector_samples.push(*ms);
                }
            }
        }
    }

    (average(&geo_samples), average(&vector_samples))
}

fn average(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geo(lat: f64, lon: f64, region: Option<&str>) -> GeoLocation {
        GeoLocation {
            lat,
            lon,
            country: None,
            region: region.map(str::to_string),
        }
    }

    #[test]
    fn update_policy_parses_known_values_only() {
        assert_eq!(UpdatePolicy::parse(None), Some(UpdatePolicy::Creator));
        assert_eq!(UpdatePolicy::parse(Some("leader")), Some(UpdatePolicy::Leader));
        assert_eq!(UpdatePolicy::parse(Some("anyone")), Some(UpdatePolicy::Anyone));
        assert_eq!(UpdatePolicy::parse(Some("none")), Some(UpdatePolicy::None));
        assert_eq!(UpdatePolicy::parse(Some("admins")), None);
    }

    #[test]
    fn distance_between_identical_points_is_zero() {
        let amsterdam = geo(52.37, 4.89, None);
        assert!(amsterdam.distance_km(&amsterdam) < 1e-6);
    }

    #[test]
    fn distance_amsterdam_new_york_is_plausible() {
        let amsterdam = geo(52.37, 4.89, None);
        let new_york = geo(40.71, -74.01, None);
        let d = amsterdam.distance_km(&new_york);
        assert!((5500.0..6500.0).contains(&d), "got {d}");
    }

    #[test]
    fn latency_hints_need_member_data() {
        let requester = geo(52.37, 4.89, Some("eu-west"));
        let mut vector = Latencies::new();
        vector.insert("eu-west".to_string(), 12.0);
        vector.insert("us-east".to_string(), 95.0);

        let members = vec![
            PeerLocation {
                geo: Some(geo(48.85, 2.35, Some("eu-west"))),
                latencies: None,
            },
            PeerLocation {
                geo: Some(geo(40.71, -74.01, Some("us-east"))),
                latencies: None,
            },
            PeerLocation::default(),
        ];

        let (by_geo, by_vector) = estimate_latencies(Some(&requester), Some(&vector), &members);
        let by_geo = by_geo.expect("geo estimate");
        let by_vector = by_vector.expect("vector estimate");
        assert!(by_geo > GEO_BASE_RTT_MS);
        assert!((by_vector - (12.0 + 95.0) / 2.0).abs() < 1e-9);

        let (none_geo, none_vector) = estimate_latencies(None, None, &members);
        assert!(none_geo.is_none());
        assert!(none_vector.is_none());
    }
}
