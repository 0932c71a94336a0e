// Background reaper: evicts peers whose keepalive lapsed, publishes
// their disconnects, and re-elects lobby leaders.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::domain::{lobby_topic, Store, StoreError};
use crate::frameworks::config;
use crate::interface_adapters::protocol::ServerPacket;
use crate::use_cases::election;

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const LOBBY_CLEAN_INTERVAL: Duration = Duration::from_secs(60);

pub struct TimeoutManager {
    store: Arc<dyn Store>,
    disconnect_threshold: Duration,
}

impl TimeoutManager {
    pub fn new(store: Arc<dyn Store>) -> TimeoutManager {
        TimeoutManager {
            store,
            disconnect_threshold: config::DISCONNECT_THRESHOLD,
        }
    }

    #[cfg(test)]
    pub fn with_threshold(store: Arc<dyn Store>, threshold: Duration) -> TimeoutManager {
        TimeoutManager {
            store,
            disconnect_threshold: threshold,
        }
    }

    /// Sweeps once a second until shutdown. The `last_seen` reset runs
    /// exactly once so a restart does not evict peers that are about to
    /// rejoin within the keepalive window.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if let Err(err) = self.store.reset_all_peer_last_seen().await {
            error!(error = %err, "failed to reset peer last_seen");
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(SWEEP_INTERVAL) => self.run_once().await,
                _ = shutdown.changed() => {
                    debug!("timeout manager stopped");
                    return;
                }
            }
        }
    }

    /// Drains every currently overdue peer.
    pub async fn run_once(&self) {
        loop {
            match self
                .store
                .claim_next_timed_out_peer(self.disconnect_threshold)
                .await
            {
                Ok(Some(claimed)) => {
                    debug!(peer = %claimed.peer_id, "peer timed out");
                    let packet = ServerPacket::Disconnect {
                        id: claimed.peer_id.clone(),
                    };
                    let data = match serde_json::to_vec(&packet) {
                        Ok(data) => data,
                        Err(err) => {
                            error!(error = %err, "failed to encode disconnect packet");
                            continue;
                        }
                    };
                    for lobby in &claimed.lobbies {
                        match self
                            .store
                            .publish(&lobby_topic(&claimed.game, lobby), &data)
                            .await
                        {
                            Ok(()) | Err(StoreError::NoSuchTopic) => {}
                            Err(err) => {
                                warn!(error = %err, "failed to publish disconnect packet");
                            }
                        }
                        // A cleanly closed peer already triggered its
                        // elections on the way out.
                        if !claimed.was_disconnected {
                            if let Err(err) =
                                election::elect_and_publish(&self.store, &claimed.game, lobby)
                                    .await
                            {
                                warn!(error = %err, lobby = %lobby, "failed to re-elect after timeout");
                            }
                        }
                    }
                }
                Ok(None) => return,
                Err(err) => {
                    warn!(error = %err, "failed to claim timed out peer");
                    return;
                }
            }
        }
    }
}

/// Deletes lobbies whose member set has been empty for longer than the
/// clean threshold; one ticker per process.
pub async fn run_lobby_cleaner(store: Arc<dyn Store>, mut shutdown: watch::Receiver<bool>) {
    let threshold =
        chrono::Duration::from_std(config::LOBBY_CLEAN_THRESHOLD).unwrap_or_else(|_| {
            chrono::Duration::hours(24)
        });
    loop {
        tokio::select! {
            _ = tokio::time::sleep(LOBBY_CLEAN_INTERVAL) => {
                match store.clean_empty_lobbies(chrono::Utc::now() - threshold).await {
                    Ok(0) => {}
                    Ok(removed) => debug!(removed, "cleaned empty lobbies"),
                    Err(err) => warn!(error = %err, "failed to clean empty lobbies"),
                }
            }
            _ = shutdown.changed() => {
                debug!("lobby cleaner stopped");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CreateLobbyOptions, SubscriptionCallback};
    use crate::frameworks::stores::MemoryStore;
    use std::sync::Mutex;

    const GAME: &str = "10e4dd45-ecff-4210-a43e-9bb1973f4dbc";

    fn recorder() -> (SubscriptionCallback, Arc<Mutex<Vec<serde_json::Value>>>) {
        let seen: Arc<Mutex<Vec<serde_json::Value>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let callback: SubscriptionCallback = Arc::new(move |data: &[u8]| {
            let value = serde_json::from_slice(data).expect("published frames are json");
            sink.lock().unwrap().push(value);
        });
        (callback, seen)
    }

    #[tokio::test]
    async fn reaper_evicts_publishes_and_reelects() {
        std::env::set_var("ENV", "test");
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

        store.create_peer("a", "s", GAME, None).await.unwrap();
        store.create_peer("b", "s", GAME, None).await.unwrap();
        store
            .create_lobby(GAME, "AAAA", "a", &CreateLobbyOptions::default())
            .await
            .unwrap();
        store.join_lobby(GAME, "AAAA", "b", None).await.unwrap();

        // Observe the lobby broadcast topic as the surviving peer.
        let (callback, seen) = recorder();
        let _sub = store.subscribe(callback, GAME, "AAAA", "b");

        // Nothing is overdue under a generous threshold.
        let manager =
            TimeoutManager::with_threshold(Arc::clone(&store), Duration::from_secs(3600));
        manager.run_once().await;
        assert!(seen.lock().unwrap().is_empty());

        // Age both peers past the threshold, then refresh only "b" so
        // exactly one peer is overdue.
        tokio::time::sleep(Duration::from_millis(100)).await;
        store.mark_peer_as_active("b").await.unwrap();
        let manager =
            TimeoutManager::with_threshold(Arc::clone(&store), Duration::from_millis(50));
        manager.run_once().await;

        let events = seen.lock().unwrap().clone();
        let disconnect = events
            .iter()
            .find(|e| e["type"] == "disconnect" && e["id"] == "a")
            .expect("disconnect for a");
        assert_eq!(disconnect["id"], "a");
        let leader = events
            .iter()
            .find(|e| e["type"] == "leader")
            .expect("leader handover");
        assert_eq!(leader["leader"], "b");
        assert_eq!(leader["term"], 2);

        let lobby = store.get_lobby(GAME, "AAAA").await;
        match lobby {
            Ok(lobby) => assert!(!lobby.peers.contains(&"a".to_string())),
            Err(StoreError::LobbyNotFound) => {}
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    #[tokio::test]
    async fn cleanly_closed_peers_do_not_trigger_elections() {
        std::env::set_var("ENV", "test");
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

        store.create_peer("a", "s", GAME, None).await.unwrap();
        store.create_peer("b", "s", GAME, None).await.unwrap();
        store
            .create_lobby(GAME, "AAAA", "a", &CreateLobbyOptions::default())
            .await
            .unwrap();
        store.join_lobby(GAME, "AAAA", "b", None).await.unwrap();

        // "a" departed cleanly: out of the lobby, marked disconnected,
        // election already done (leader "b", term 2).
        store.leave_lobby(GAME, "AAAA", "a").await.unwrap();
        store.mark_peer_as_disconnected("a").await.unwrap();
        store.do_leader_election(GAME, "AAAA").await.unwrap();

        let (callback, seen) = recorder();
        let _sub = store.subscribe(callback, GAME, "AAAA", "b");

        tokio::time::sleep(Duration::from_millis(100)).await;
        store.mark_peer_as_active("b").await.unwrap();
        let manager =
            TimeoutManager::with_threshold(Arc::clone(&store), Duration::from_millis(50));
        manager.run_once().await;

        let events = seen.lock().unwrap().clone();
        // The reaper publishes no disconnect into the lobby "a" already
        // left, and runs no election because "a" was marked cleanly.
        assert!(
            events.iter().all(|e| e["type"] != "leader"),
            "unexpected election: {events:?}"
        );
        let lobby = store.get_lobby(GAME, "AAAA").await.unwrap();
        assert_eq!(lobby.term, 2);
    }
}
