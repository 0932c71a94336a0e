use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::errors::StoreError;
use crate::domain::lobby::{
    CreateLobbyOptions, GeoLocation, Latencies, ListQuery, Lobby, LobbyPatch,
};

/// Broadcast topic for every subscriber of a lobby.
pub fn lobby_topic(game: &str, lobby: &str) -> String {
    format!("{game}{lobby}")
}

/// Unicast topic for a single peer within a lobby.
pub fn peer_topic(game: &str, lobby: &str, peer_id: &str) -> String {
    format!("{game}{lobby}{peer_id}")
}

/// Invoked with the raw payload for every message published to a
/// subscribed topic. Must not block; runs outside any store lock.
pub type SubscriptionCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Detaches the underlying topic registrations when dropped.
pub struct Subscription(Option<Box<dyn FnOnce() + Send + Sync>>);

impl Subscription {
    pub fn new(detach: impl FnOnce() + Send + Sync + 'static) -> Self {
        Subscription(Some(Box::new(detach)))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.0.take() {
            detach();
        }
    }
}

/// Outcome of a leader election that changed the lobby row. `leader` is
/// `None` when every member was disconnected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionResult {
    pub leader: Option<String>,
    pub term: i64,
}

/// A peer row removed by the reaper, with the lobbies it was evicted from.
#[derive(Debug, Clone)]
pub struct TimedOutPeer {
    pub peer_id: String,
    pub game: String,
    pub was_disconnected: bool,
    pub lobbies: Vec<String>,
}

/// Persistent lobby/peer state plus the pub/sub transport. Implemented by
/// the in-memory single-process backend and the shared Postgres backend.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_peer(
        &self,
        peer_id: &str,
        secret: &str,
        game: &str,
        geo: Option<&GeoLocation>,
    ) -> Result<(), StoreError>;

    async fn mark_peer_as_active(&self, peer_id: &str) -> Result<(), StoreError>;

    async fn mark_peer_as_disconnected(&self, peer_id: &str) -> Result<(), StoreError>;

    /// Secret-checked reconnect. Returns the peer's current lobby codes,
    /// or `None` when (id, secret, game) do not match a stored peer.
    async fn mark_peer_as_reconnected(
        &self,
        peer_id: &str,
        secret: &str,
        game: &str,
    ) -> Result<Option<Vec<String>>, StoreError>;

    async fn set_peer_latencies(
        &self,
        peer_id: &str,
        latencies: &Latencies,
    ) -> Result<(), StoreError>;

    /// Called once on process start so a restart does not mass-evict
    /// peers that are about to rejoin.
    async fn reset_all_peer_last_seen(&self) -> Result<(), StoreError>;

    /// Atomically deletes one peer unseen for longer than `threshold`,
    /// removing it from every lobby member array it appears in.
    async fn claim_next_timed_out_peer(
        &self,
        threshold: Duration,
    ) -> Result<Option<TimedOutPeer>, StoreError>;

    async fn create_lobby(
        &self,
        game: &str,
        lobby: &str,
        creator: &str,
        options: &CreateLobbyOptions,
    ) -> Result<(), StoreError>;

    async fn join_lobby(
        &self,
        game: &str,
        lobby: &str,
        peer_id: &str,
        password: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Removes the peer and returns the remaining member list.
    async fn leave_lobby(
        &self,
        game: &str,
        lobby: &str,
        peer_id: &str,
    ) -> Result<Vec<String>, StoreError>;

    async fn get_lobby(&self, game: &str, lobby: &str) -> Result<Lobby, StoreError>;

    async fn is_peer_in_lobby(
        &self,
        game: &str,
        lobby: &str,
        peer_id: &str,
    ) -> Result<bool, StoreError>;

    async fn list_lobbies(
        &self,
        game: &str,
        query: &ListQuery,
    ) -> Result<Vec<Lobby>, StoreError>;

    /// Applies `patch` after checking the caller against the lobby's
    /// update policy; returns the lobby as committed.
    async fn update_lobby(
        &self,
        game: &str,
        lobby: &str,
        peer_id: &str,
        patch: &LobbyPatch,
    ) -> Result<Lobby, StoreError>;

    /// Elects a leader for the lobby unless the current one is still a
    /// connected member. Returns `None` when nothing changed.
    async fn do_leader_election(
        &self,
        game: &str,
        lobby: &str,
    ) -> Result<Option<ElectionResult>, StoreError>;

    async fn clean_empty_lobbies(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Registers `callback` for the lobby broadcast topic and the peer
    /// unicast topic. Dropping the returned subscription detaches both.
    fn subscribe(
        &self,
        callback: SubscriptionCallback,
        game: &str,
        lobby: &str,
        peer_id: &str,
    ) -> Subscription;

    async fn publish(&self, topic: &str, data: &[u8]) -> Result<(), StoreError>;
}
