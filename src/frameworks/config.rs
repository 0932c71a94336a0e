use std::env;
use std::time::Duration;

// Runtime/server constants (not per-deployment tuning).

/// Interval at which the server sends keepalive pings to every socket.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(2);

/// Minimum spacing between `last_seen` writes per connection.
pub const ACTIVITY_WRITE_INTERVAL: Duration = Duration::from_secs(30);

/// Peers unseen for this long are reaped. Must exceed three keepalive
/// intervals so a single missed ping never evicts anyone.
pub const DISCONNECT_THRESHOLD: Duration = Duration::from_secs(90);

/// Empty lobbies untouched for this long are deleted.
pub const LOBBY_CLEAN_THRESHOLD: Duration = Duration::from_secs(24 * 60 * 60);

/// Upper bound on any single socket write.
pub const SOCKET_WRITE_TIMEOUT: Duration = Duration::from_secs(60);

/// Deadline for disconnect side effects after a socket drop.
pub const DISCONNECT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Hard cap on a single WebSocket connection's lifetime.
pub const MAX_CONNECTION_TIME: Duration = Duration::from_secs(60 * 60);

/// How long in-flight sessions get to finish after a shutdown signal.
pub const SHUTDOWN_DRAIN: Duration = Duration::from_secs(30);

/// Lifetime requested for vended TURN credentials.
pub const CREDENTIALS_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Local,
    Test,
    Production,
}

pub fn environment() -> Environment {
    match env::var("ENV").as_deref() {
        Ok("test") => Environment::Test,
        Ok("production") => Environment::Production,
        _ => Environment::Local,
    }
}

/// True when ENV=test; switches identifier generation and leader
/// selection to their deterministic variants.
pub fn is_test_env() -> bool {
    environment() == Environment::Test
}

/// Listen address; a bare `:port` is interpreted as all interfaces.
pub fn addr() -> String {
    let raw = env::var("ADDR").unwrap_or_else(|_| ":8080".to_string());
    if let Some(port) = raw.strip_prefix(':') {
        return format!("0.0.0.0:{port}");
    }
    raw
}

pub fn database_url() -> Option<String> {
    env::var("DATABASE_URL").ok().filter(|v| !v.is_empty())
}

pub fn metrics_url() -> Option<String> {
    env::var("METRICS_URL").ok().filter(|v| !v.is_empty())
}

pub fn version() -> String {
    env::var("VERSION").unwrap_or_default()
}

pub fn cloudflare_zone() -> Option<String> {
    env::var("CLOUDFLARE_ZONE").ok().filter(|v| !v.is_empty())
}

pub fn cloudflare_app_id() -> Option<String> {
    env::var("CLOUDFLARE_APP_ID").ok().filter(|v| !v.is_empty())
}

pub fn cloudflare_auth_user() -> Option<String> {
    env::var("CLOUDFLARE_AUTH_USER").ok().filter(|v| !v.is_empty())
}

pub fn cloudflare_auth_key() -> Option<String> {
    env::var("CLOUDFLARE_AUTH_KEY").ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_expands_bare_port() {
        std::env::remove_var("ADDR");
        assert_eq!(addr(), "0.0.0.0:8080");
        std::env::set_var("ADDR", ":9000");
        assert_eq!(addr(), "0.0.0.0:9000");
        std::env::set_var("ADDR", "127.0.0.1:9001");
        assert_eq!(addr(), "127.0.0.1:9001");
        std::env::remove_var("ADDR");
    }
}
