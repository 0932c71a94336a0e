// Shared primitives for one-time server bootstrapping across integration
// tests, plus a small WebSocket client for driving the protocol.

use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

// Global base URL used by all tests after the server publishes its bound address.
static SERVER_URL: OnceLock<String> = OnceLock::new();
// One-time guard that ensures the server bootstrap path runs only once.
static SERVER_READY: OnceLock<()> = OnceLock::new();

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Ensure the test server is running and return the shared ws base URL.
pub fn ensure_server() -> &'static str {
    SERVER_READY.get_or_init(|| {
        // Deterministic ids/secrets and the in-memory store.
        std::env::set_var("ENV", "test");
        std::env::remove_var("DATABASE_URL");

        let published_url = Arc::new(OnceLock::<String>::new());
        let published_url_thread = Arc::clone(&published_url);
        // Spawn an OS thread so the server outlives individual
        // `#[tokio::test]` runtimes.
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().expect("test runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind ephemeral test port");
                let addr = listener.local_addr().expect("get local addr");
                let _ = published_url_thread.set(format!("ws://{}", addr));
                signaling_server::run(listener).await.expect("server failed");
            });
        });
        wait_for_server_url_and_readiness(published_url);
    });

    SERVER_URL
        .get()
        .expect("server url should be initialized")
        .as_str()
}

fn wait_for_server_url_and_readiness(published_url: Arc<OnceLock<String>>) {
    let base_url = loop {
        if let Some(url) = published_url.get() {
            break url.clone();
        }
        std::thread::sleep(Duration::from_millis(10));
    };

    let _ = SERVER_URL.set(base_url.clone());

    let addr = base_url
        .strip_prefix("ws://")
        .expect("base url should use ws://");

    // Retry for a short period to avoid racing server bind/accept.
    for _ in 0..100 {
        if std::net::TcpStream::connect(addr).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    panic!("server did not become ready in time");
}

/// A game client on the signaling socket.
pub struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Client {
    pub async fn connect() -> Client {
        let base = ensure_server();
        let (ws, _) = connect_async(format!("{base}/v0/signaling"))
            .await
            .expect("websocket connect");
        Client { ws }
    }

    pub async fn send(&mut self, packet: Value) {
        self.ws
            .send(Message::Text(packet.to_string()))
            .await
            .expect("websocket send");
    }

    /// Next protocol frame, skipping server keepalive pings.
    pub async fn recv(&mut self) -> Value {
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("socket closed")
                .expect("socket error");
            let Message::Text(text) = frame else {
                continue;
            };
            let value: Value = serde_json::from_str(&text).expect("frames are json");
            if value["type"] == "ping" {
                continue;
            }
            return value;
        }
    }

    /// Next frame of the given type, skipping everything else.
    pub async fn recv_type(&mut self, expected: &str) -> Value {
        for _ in 0..50 {
            let value = self.recv().await;
            if value["type"] == expected {
                return value;
            }
        }
        panic!("no {expected} frame within 50 frames");
    }

    /// Next protocol frame, or None when the connection stays quiet.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.checked_duration_since(tokio::time::Instant::now())?;
            let frame = tokio::time::timeout(remaining, self.ws.next()).await.ok()??;
            let Message::Text(text) = frame.ok()? else {
                continue;
            };
            let value: Value = serde_json::from_str(&text).ok()?;
            if value["type"] == "ping" {
                continue;
            }
            return Some(value);
        }
    }

    /// Performs the hello handshake and returns (id, secret).
    pub async fn hello(&mut self, game: &str) -> (String, String) {
        self.send(json!({"type": "hello", "game": game})).await;
        let welcome = self.recv_type("welcome").await;
        (
            welcome["id"].as_str().expect("welcome id").to_string(),
            welcome["secret"].as_str().expect("welcome secret").to_string(),
        )
    }

    /// Reconnect handshake with an existing identity.
    pub async fn hello_with_identity(&mut self, game: &str, id: &str, secret: &str) {
        self.send(json!({
            "type": "hello",
            "game": game,
            "id": id,
            "secret": secret,
        }))
        .await;
    }
}

/// Fresh game id per test so lobbies do not leak between tests.
pub fn unique_game() -> String {
    uuid::Uuid::new_v4().to_string()
}
