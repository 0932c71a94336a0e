// Single-process store backend: a mutex-protected map of lobbies and
// peers, with the topic router doubling as the message bus.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::seq::SliceRandom;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::domain::{
    estimate_latencies, lobby_topic, peer_topic, CreateLobbyOptions, ElectionResult, GeoLocation,
    Latencies, ListQuery, Lobby, LobbyPatch, PeerLocation, Store, StoreError, Subscription,
    SubscriptionCallback, TimedOutPeer, UpdatePolicy,
};
use crate::frameworks::config;
use crate::frameworks::stores::filter;
use crate::frameworks::stores::router::TopicRouter;
use crate::frameworks::stores::{hash_password, verify_password};

struct StoredLobby {
    code: String,
    peers: Vec<String>,
    creator: String,
    public: bool,
    custom_data: Option<Value>,
    password_hash: Option<String>,
    max_players: i32,
    can_update_by: UpdatePolicy,
    leader: Option<String>,
    term: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StoredLobby {
    fn to_lobby(&self) -> Lobby {
        Lobby {
            code: self.code.clone(),
            peers: self.peers.clone(),
            player_count: self.peers.len(),
            creator: self.creator.clone(),
            public: self.public,
            max_players: self.max_players,
            has_password: self.password_hash.is_some(),
            custom_data: self.custom_data.clone(),
            can_update_by: self.can_update_by,
            leader: self.leader.clone(),
            term: self.term,
            created_at: self.created_at,
            updated_at: self.updated_at,
            estimated_latency_geo: None,
            estimated_latency: None,
        }
    }
}

struct StoredPeer {
    secret: String,
    game: String,
    last_seen: DateTime<Utc>,
    disconnected: bool,
    geo: Option<GeoLocation>,
    latencies: Option<Latencies>,
}

#[derive(Default)]
struct MemoryState {
    // Keyed by (game, code).
    lobbies: HashMap<(String, String), StoredLobby>,
    peers: HashMap<String, StoredPeer>,
}

/// In-memory backend for single-process deployments and tests.
pub struct MemoryStore {
    router: Arc<TopicRouter>,
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore {
            router: TopicRouter::new(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory store lock poisoned")
    }

    fn lobbies_of(state: &MemoryState, game: &str, peer_id: &str) -> Vec<String> {
        state
            .lobbies
            .iter()
            .filter(|((g, _), lobby)| g == game && lobby.peers.iter().any(|p| p == peer_id))
            .map(|((_, code), _)| code.clone())
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_peer(
        &self,
        peer_id: &str,
        secret: &str,
        game: &str,
        geo: Option<&GeoLocation>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.peers.insert(
            peer_id.to_string(),
            StoredPeer {
                secret: secret.to_string(),
                game: game.to_string(),
                last_seen: Utc::now(),
                disconnected: false,
                geo: geo.cloned(),
                latencies: None,
            },
        );
        Ok(())
    }

    async fn mark_peer_as_active(&self, peer_id: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(peer) = state.peers.get_mut(peer_id) {
            peer.last_seen = Utc::now();
        }
        Ok(())
    }

    async fn mark_peer_as_disconnected(&self, peer_id: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(peer) = state.peers.get_mut(peer_id) {
            peer.disconnected = true;
        }
        Ok(())
    }

    async fn mark_peer_as_reconnected(
        &self,
        peer_id: &str,
        secret: &str,
        game: &str,
    ) -> Result<Option<Vec<String>>, StoreError> {
        let mut state = self.lock();
        match state.peers.get_mut(peer_id) {
            Some(peer) if peer.secret == secret && peer.game == game => {
                peer.disconnected = false;
                peer.last_seen = Utc::now();
            }
            _ => return Ok(None),
        }
        let lobbies = Self::lobbies_of(&state, game, peer_id);
        Ok(Some(lobbies))
    }

    async fn set_peer_latencies(
        &self,
        peer_id: &str,
        latencies: &Latencies,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(peer) = state.peers.get_mut(peer_id) {
            peer.latencies = Some(latencies.clone());
        }
        Ok(())
    }

    async fn reset_all_peer_last_seen(&self) -> Result<(), StoreError> {
        let mut state = self.lock();
        let now = Utc::now();
        for peer in state.peers.values_mut() {
            peer.last_seen = now;
        }
        Ok(())
    }

    async fn claim_next_timed_out_peer(
        &self,
        threshold: Duration,
    ) -> Result<Option<TimedOutPeer>, StoreError> {
        let mut state = self.lock();
        let cutoff = Utc::now()
            - ChronoDuration::from_std(threshold).unwrap_or_else(|_| ChronoDuration::zero());

        let claimed = state
            .peers
            .iter()
            .find(|(_, peer)| peer.last_seen < cutoff)
            .map(|(id, _)| id.clone());
        let Some(peer_id) = claimed else {
            return Ok(None);
        };
        let Some(peer) = state.peers.remove(&peer_id) else {
            return Ok(None);
        };

        let mut lobbies = Vec::new();
        let now = Utc::now();
        for ((game, _), lobby) in state.lobbies.iter_mut() {
            if *game == peer.game && lobby.peers.iter().any(|p| *p == peer_id) {
                lobby.peers.retain(|p| *p != peer_id);
                lobby.updated_at = now;
                lobbies.push(lobby.code.clone());
            }
        }

        Ok(Some(TimedOutPeer {
            peer_id,
            game: peer.game,
            was_disconnected: peer.disconnected,
            lobbies,
        }))
    }

    async fn create_lobby(
        &self,
        game: &str,
        lobby: &str,
        creator: &str,
        options: &CreateLobbyOptions,
    ) -> Result<(), StoreError> {
        let password_hash = options
            .password
            .as_deref()
            .map(hash_password)
            .transpose()?;

        let mut state = self.lock();
        let key = (game.to_string(), lobby.to_string());
        if state.lobbies.contains_key(&key) {
            return Err(StoreError::LobbyExists);
        }
        let now = Utc::now();
        state.lobbies.insert(
            key,
            StoredLobby {
                code: lobby.to_string(),
                peers: vec![creator.to_string()],
                creator: creator.to_string(),
                public: options.public,
                custom_data: options.custom_data.clone(),
                password_hash,
                max_players: options.max_players,
                can_update_by: options.can_update_by,
                leader: Some(creator.to_string()),
                term: 1,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn join_lobby(
        &self,
        game: &str,
        lobby: &str,
        peer_id: &str,
        password: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let key = (game.to_string(), lobby.to_string());
        let stored = state.lobbies.get_mut(&key).ok_or(StoreError::LobbyNotFound)?;

        if let Some(hash) = &stored.password_hash {
            let supplied = password.ok_or(StoreError::InvalidPassword)?;
            if !verify_password(supplied, hash)? {
                return Err(StoreError::InvalidPassword);
            }
        }
        if stored.peers.iter().any(|p| p == peer_id) {
            return Err(StoreError::AlreadyInLobby);
        }
        if stored.max_players > 0 && stored.peers.len() >= stored.max_players as usize {
            return Err(StoreError::LobbyFull);
        }
        stored.peers.push(peer_id.to_string());
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn leave_lobby(
        &self,
        game: &str,
        lobby: &str,
        peer_id: &str,
    ) -> Result<Vec<String>, StoreError> {
        let mut state = self.lock();
        let key = (game.to_string(), lobby.to_string());
        let stored = state.lobbies.get_mut(&key).ok_or(StoreError::LobbyNotFound)?;
        stored.peers.retain(|p| p != peer_id);
        stored.updated_at = Utc::now();
        Ok(stored.peers.clone())
    }

    async fn get_lobby(&self, game: &str, lobby: &str) -> Result<Lobby, StoreError> {
        let state = self.lock();
        let key = (game.to_string(), lobby.to_string());
        state
            .lobbies
            .get(&key)
            .map(StoredLobby::to_lobby)
            .ok_or(StoreError::LobbyNotFound)
    }

    async fn is_peer_in_lobby(
        &self,
        game: &str,
        lobby: &str,
        peer_id: &str,
    ) -> Result<bool, StoreError> {
        let state = self.lock();
        let key = (game.to_string(), lobby.to_string());
        Ok(state
            .lobbies
            .get(&key)
            .map(|stored| stored.peers.iter().any(|p| p == peer_id))
            .unwrap_or(false))
    }

    async fn list_lobbies(
        &self,
        game: &str,
        query: &ListQuery,
    ) -> Result<Vec<Lobby>, StoreError> {
        let parsed = query
            .filter
            .as_ref()
            .map(filter::parse_filter)
            .transpose()?;
        let sort_keys = query
            .sort
            .as_deref()
            .map(filter::parse_sort)
            .transpose()?
            .unwrap_or_default();
        let limit = query
            .limit
            .unwrap_or(filter::DEFAULT_LIMIT)
            .clamp(1, filter::MAX_LIMIT) as usize;

        let state = self.lock();
        let mut lobbies: Vec<Lobby> = state
            .lobbies
            .iter()
            .filter(|((g, _), stored)| g == game && stored.public)
            .map(|(_, stored)| stored.to_lobby())
            .filter(|lobby| parsed.as_ref().map_or(true, |f| filter::matches(f, lobby)))
            .collect();
        lobbies.sort_by(|a, b| filter::compare_lobbies(&sort_keys, a, b));
        lobbies.truncate(limit);

        if query.geo.is_some() || query.latencies.is_some() {
            for lobby in &mut lobbies {
                let members: Vec<PeerLocation> = lobby
                    .peers
                    .iter()
                    .filter_map(|id| state.peers.get(id))
                    .map(|peer| PeerLocation {
                        geo: peer.geo.clone(),
                        latencies: peer.latencies.clone(),
                    })
                    .collect();
                let (by_geo, by_vector) = estimate_latencies(
                    query.geo.as_ref(),
                    query.latencies.as_ref(),
                    &members,
                );
                lobby.estimated_latency_geo = by_geo;
                lobby.estimated_latency = by_vector;
            }
        }

        Ok(lobbies)
    }

    async fn update_lobby(
        &self,
        game: &str,
        lobby: &str,
        peer_id: &str,
        patch: &LobbyPatch,
    ) -> Result<Lobby, StoreError> {
        let password_hash = patch.password.as_deref().map(hash_password).transpose()?;

        let mut state = self.lock();
        let key = (game.to_string(), lobby.to_string());
        let stored = state.lobbies.get_mut(&key).ok_or(StoreError::LobbyNotFound)?;

        let allowed = match stored.can_update_by {
            UpdatePolicy::Creator => stored.creator == peer_id,
            UpdatePolicy::Leader => stored.leader.as_deref() == Some(peer_id),
            UpdatePolicy::Anyone => true,
            UpdatePolicy::None => false,
        };
        if !allowed {
            return Err(StoreError::NotAllowed);
        }

        if let Some(public) = patch.public {
            stored.public = public;
        }
        if let Some(custom_data) = &patch.custom_data {
            stored.custom_data = Some(custom_data.clone());
        }
        if let Some(hash) = password_hash {
            stored.password_hash = Some(hash);
        }
        if let Some(max_players) = patch.max_players {
            stored.max_players = max_players;
        }
        if let Some(policy) = patch.can_update_by {
            stored.can_update_by = policy;
        }
        stored.updated_at = Utc::now();
        Ok(stored.to_lobby())
    }

    async fn do_leader_election(
        &self,
        game: &str,
        lobby: &str,
    ) -> Result<Option<ElectionResult>, StoreError> {
        let mut state = self.lock();

        let disconnected: HashSet<String> = state
            .peers
            .iter()
            .filter(|(_, peer)| peer.disconnected)
            .map(|(id, _)| id.clone())
            .collect();

        let key = (game.to_string(), lobby.to_string());
        let stored = state.lobbies.get_mut(&key).ok_or(StoreError::LobbyNotFound)?;

        if let Some(leader) = &stored.leader {
            if stored.peers.iter().any(|p| p == leader) && !disconnected.contains(leader) {
                return Ok(None);
            }
        }

        let mut candidates = stored.peers.clone();
        if config::is_test_env() {
            candidates.sort();
        } else {
            candidates.shuffle(&mut rand::thread_rng());
        }
        let new_leader = candidates
            .into_iter()
            .find(|candidate| !disconnected.contains(candidate));

        stored.leader = new_leader.clone();
        stored.term += 1;
        stored.updated_at = Utc::now();
        Ok(Some(ElectionResult {
            leader: new_leader,
            term: stored.term,
        }))
    }

    async fn clean_empty_lobbies(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.lock();
        let before = state.lobbies.len();
        state
            .lobbies
            .retain(|_, lobby| !(lobby.peers.is_empty() && lobby.updated_at < older_than));
        Ok((before - state.lobbies.len()) as u64)
    }

    fn subscribe(
        &self,
        callback: SubscriptionCallback,
        game: &str,
        lobby: &str,
        peer_id: &str,
    ) -> Subscription {
        let topics = vec![lobby_topic(game, lobby), peer_topic(game, lobby, peer_id)];
        self.router.subscribe(&topics, callback)
    }

    async fn publish(&self, topic: &str, data: &[u8]) -> Result<(), StoreError> {
        if self.router.dispatch(topic, data) == 0 {
            return Err(StoreError::NoSuchTopic);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const GAME: &str = "10e4dd45-ecff-4210-a43e-9bb1973f4dbc";

    fn test_env() {
        std::env::set_var("ENV", "test");
    }

    async fn store_with_lobby(options: CreateLobbyOptions) -> MemoryStore {
        let store = MemoryStore::new();
        store.create_peer("a", "s", GAME, None).await.unwrap();
        store.create_lobby(GAME, "AAAA", "a", &options).await.unwrap();
        store
    }

    #[tokio::test]
    async fn create_makes_creator_sole_member_and_leader() {
        let store = store_with_lobby(CreateLobbyOptions::default()).await;
        let lobby = store.get_lobby(GAME, "AAAA").await.unwrap();
        assert_eq!(lobby.peers, vec!["a".to_string()]);
        assert_eq!(lobby.leader.as_deref(), Some("a"));
        assert_eq!(lobby.term, 1);
        assert!(!lobby.has_password);

        let err = store
            .create_lobby(GAME, "AAAA", "a", &CreateLobbyOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LobbyExists));
    }

    #[tokio::test]
    async fn join_checks_password_capacity_and_duplicates() {
        let store = store_with_lobby(CreateLobbyOptions {
            password: Some("pw".to_string()),
            max_players: 2,
            ..CreateLobbyOptions::default()
        })
        .await;

        let err = store.join_lobby(GAME, "AAAA", "b", None).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidPassword));
        let err = store
            .join_lobby(GAME, "AAAA", "b", Some("wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPassword));

        store.join_lobby(GAME, "AAAA", "b", Some("pw")).await.unwrap();
        let err = store
            .join_lobby(GAME, "AAAA", "b", Some("pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyInLobby));

        // maxPlayers=2 with two members rejects the third.
        let err = store
            .join_lobby(GAME, "AAAA", "c", Some("pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LobbyFull));

        let err = store
            .join_lobby(GAME, "XXXX", "b", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LobbyNotFound));
    }

    #[tokio::test]
    async fn election_terms_increase_and_skip_disconnected_members() {
        test_env();
        let store = store_with_lobby(CreateLobbyOptions::default()).await;
        store.create_peer("b", "s", GAME, None).await.unwrap();
        store.create_peer("c", "s", GAME, None).await.unwrap();
        store.join_lobby(GAME, "AAAA", "b", None).await.unwrap();
        store.join_lobby(GAME, "AAAA", "c", None).await.unwrap();

        // Leader "a" is still a healthy member: election is a no-op.
        assert!(store.do_leader_election(GAME, "AAAA").await.unwrap().is_none());

        store.mark_peer_as_disconnected("a").await.unwrap();
        let result = store.do_leader_election(GAME, "AAAA").await.unwrap().unwrap();
        assert_eq!(result.leader.as_deref(), Some("b"));
        assert_eq!(result.term, 2);

        store.mark_peer_as_disconnected("b").await.unwrap();
        let result = store.do_leader_election(GAME, "AAAA").await.unwrap().unwrap();
        assert_eq!(result.leader.as_deref(), Some("c"));
        assert_eq!(result.term, 3);

        store.mark_peer_as_disconnected("c").await.unwrap();
        let result = store.do_leader_election(GAME, "AAAA").await.unwrap().unwrap();
        assert_eq!(result.leader, None);
        assert_eq!(result.term, 4);
    }

    #[tokio::test]
    async fn reconnect_requires_matching_secret_and_returns_lobbies() {
        let store = store_with_lobby(CreateLobbyOptions::default()).await;

        assert!(store
            .mark_peer_as_reconnected("a", "nope", GAME)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .mark_peer_as_reconnected("ghost", "s", GAME)
            .await
            .unwrap()
            .is_none());

        let lobbies = store
            .mark_peer_as_reconnected("a", "s", GAME)
            .await
            .unwrap()
            .expect("reconnect succeeds");
        assert_eq!(lobbies, vec!["AAAA".to_string()]);

        assert!(store.is_peer_in_lobby(GAME, "AAAA", "a").await.unwrap());
        assert!(!store.is_peer_in_lobby(GAME, "AAAA", "b").await.unwrap());
        assert!(!store.is_peer_in_lobby(GAME, "XXXX", "a").await.unwrap());
    }

    #[tokio::test]
    async fn reaper_claim_removes_peer_from_lobbies() {
        let store = store_with_lobby(CreateLobbyOptions::default()).await;
        store.mark_peer_as_disconnected("a").await.unwrap();

        // Nothing is overdue with a generous threshold.
        assert!(store
            .claim_next_timed_out_peer(Duration::from_secs(3600))
            .await
            .unwrap()
            .is_none());

        let claimed = store
            .claim_next_timed_out_peer(Duration::ZERO)
            .await
            .unwrap()
            .expect("peer claimed");
        assert_eq!(claimed.peer_id, "a");
        assert_eq!(claimed.game, GAME);
        assert!(claimed.was_disconnected);
        assert_eq!(claimed.lobbies, vec!["AAAA".to_string()]);

        let lobby = store.get_lobby(GAME, "AAAA").await.unwrap();
        assert!(lobby.peers.is_empty());
        assert!(store
            .claim_next_timed_out_peer(Duration::ZERO)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_policy_is_enforced_without_mutation() {
        let store = store_with_lobby(CreateLobbyOptions {
            custom_data: Some(json!({"map": "plains"})),
            ..CreateLobbyOptions::default()
        })
        .await;
        store.join_lobby(GAME, "AAAA", "b", None).await.unwrap();

        let patch = LobbyPatch {
            custom_data: Some(json!({"map": "forest"})),
            ..LobbyPatch::default()
        };
        let err = store.update_lobby(GAME, "AAAA", "b", &patch).await.unwrap_err();
        assert!(matches!(err, StoreError::NotAllowed));
        let lobby = store.get_lobby(GAME, "AAAA").await.unwrap();
        assert_eq!(lobby.custom_data, Some(json!({"map": "plains"})));

        let updated = store.update_lobby(GAME, "AAAA", "a", &patch).await.unwrap();
        assert_eq!(updated.custom_data, Some(json!({"map": "forest"})));

        // Switching the policy to none locks even the creator out.
        let lock = LobbyPatch {
            can_update_by: Some(UpdatePolicy::None),
            ..LobbyPatch::default()
        };
        store.update_lobby(GAME, "AAAA", "a", &lock).await.unwrap();
        let err = store.update_lobby(GAME, "AAAA", "a", &patch).await.unwrap_err();
        assert!(matches!(err, StoreError::NotAllowed));
    }

    #[tokio::test]
    async fn publish_without_subscribers_reports_missing_topic() {
        let store = MemoryStore::new();
        let err = store.publish("g1l1", b"x").await.unwrap_err();
        assert!(matches!(err, StoreError::NoSuchTopic));

        let seen: Arc<Mutex<Vec<Vec<u8>>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let sub = Store::subscribe(
            &store,
            Arc::new(move |data: &[u8]| sink.lock().unwrap().push(data.to_vec())),
            "g1",
            "l1",
            "a",
        );
        store.publish("g1l1", b"broadcast").await.unwrap();
        store.publish("g1l1a", b"unicast").await.unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![b"broadcast".to_vec(), b"unicast".to_vec()]
        );

        drop(sub);
        let err = store.publish("g1l1", b"x").await.unwrap_err();
        assert!(matches!(err, StoreError::NoSuchTopic));
    }

    #[tokio::test]
    async fn clean_empty_lobbies_spares_recent_and_occupied() {
        let store = store_with_lobby(CreateLobbyOptions::default()).await;
        store
            .create_lobby(GAME, "BBBB", "b", &CreateLobbyOptions::default())
            .await
            .unwrap();
        store.leave_lobby(GAME, "BBBB", "b").await.unwrap();

        // Cutoff in the past spares the freshly updated empty lobby.
        let removed = store
            .clean_empty_lobbies(Utc::now() - ChronoDuration::hours(24))
            .await
            .unwrap();
        assert_eq!(removed, 0);

        // Cutoff in the future removes it but keeps the occupied one.
        let removed = store
            .clean_empty_lobbies(Utc::now() + ChronoDuration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_lobby(GAME, "AAAA").await.is_ok());
        assert!(matches!(
            store.get_lobby(GAME, "BBBB").await.unwrap_err(),
            StoreError::LobbyNotFound
        ));
    }

    #[tokio::test]
    async fn list_filters_sorts_and_limits() {
        let store = MemoryStore::new();
        for (code, players, map) in [("AAAA", 1, "forest"), ("BBBB", 3, "desert"), ("CCCC", 2, "forest")] {
            let creator = format!("{code}-p0");
            store.create_peer(&creator, "s", GAME, None).await.unwrap();
            store
                .create_lobby(
                    GAME,
                    code,
                    &creator,
                    &CreateLobbyOptions {
                        public: true,
                        custom_data: Some(json!({ "map": map })),
                        ..CreateLobbyOptions::default()
                    },
                )
                .await
                .unwrap();
            for i in 1..players {
                let peer = format!("{code}-p{i}");
                store.create_peer(&peer, "s", GAME, None).await.unwrap();
                store.join_lobby(GAME, code, &peer, None).await.unwrap();
            }
        }
        // Private lobbies never show up.
        store.create_peer("z", "s", GAME, None).await.unwrap();
        store
            .create_lobby(GAME, "ZZZZ", "z", &CreateLobbyOptions::default())
            .await
            .unwrap();

        let all = store.list_lobbies(GAME, &ListQuery::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let query = ListQuery {
            filter: Some(json!({"customData.map": "forest"})),
            sort: Some(vec!["-playerCount".to_string()]),
            ..ListQuery::default()
        };
        let filtered = store.list_lobbies(GAME, &query).await.unwrap();
        let codes: Vec<&str> = filtered.iter().map(|l| l.code.as_str()).collect();
        assert_eq!(codes, vec!["CCCC", "AAAA"]);

        let limited = store
            .list_lobbies(
                GAME,
                &ListQuery {
                    limit: Some(1),
                    ..ListQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }
}
