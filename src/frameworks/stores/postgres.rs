// Shared store backend: lobby and peer state in Postgres, cross-process
// pub/sub over the database's NOTIFY channel.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde_json::Value;
use sqlx::postgres::{PgListener, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::domain::{
    estimate_latencies, lobby_topic, peer_topic, CreateLobbyOptions, ElectionResult, GeoLocation,
    Latencies, ListQuery, Lobby, LobbyPatch, PeerLocation, Store, StoreError, Subscription,
    SubscriptionCallback, TimedOutPeer, UpdatePolicy,
};
use crate::frameworks::config;
use crate::frameworks::stores::filter;
use crate::frameworks::stores::router::TopicRouter;
use crate::frameworks::stores::{hash_password, verify_password};

const NOTIFY_CHANNEL: &str = "lobbies";
const MAX_TOPIC_LENGTH: usize = 76;
const MAX_NOTIFY_PAYLOAD: usize = 8000;

fn valid_topic(topic: &str) -> bool {
    !topic.is_empty()
        && topic.len() <= MAX_TOPIC_LENGTH
        && topic.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Builds the `<topic>:<base64(data)>` NOTIFY payload.
fn encode_notification(topic: &str, data: &[u8]) -> Result<String, StoreError> {
    if !valid_topic(topic) {
        return Err(StoreError::InvalidTopic(topic.to_string()));
    }
    let encoded = BASE64.encode(data);
    let total = topic.len() + 1 + encoded.len();
    if total > MAX_NOTIFY_PAYLOAD {
        return Err(StoreError::PayloadTooLarge(total));
    }
    Ok(format!("{topic}:{encoded}"))
}

fn decode_notification(payload: &str) -> Option<(&str, Vec<u8>)> {
    let (topic, data) = payload.split_once(':')?;
    let raw = BASE64.decode(data).ok()?;
    Some((topic, raw))
}

fn lobby_from_row(row: &PgRow) -> Result<Lobby, sqlx::Error> {
    let peers: Vec<String> = row.try_get("peers")?;
    let leader: Option<String> = row.try_get("leader")?;
    let can_update_by: String = row.try_get("can_update_by")?;
    Ok(Lobby {
        code: row.try_get("code")?,
        player_count: peers.len(),
        peers,
        creator: row.try_get("creator")?,
        public: row.try_get("public")?,
        max_players: row.try_get("max_players")?,
        has_password: row.try_get("has_password")?,
        custom_data: row.try_get::<Option<Value>, _>("custom_data")?,
        can_update_by: UpdatePolicy::parse(Some(can_update_by.as_str()))
            .unwrap_or(UpdatePolicy::Creator),
        leader: leader.filter(|l| !l.is_empty()),
        term: i64::from(row.try_get::<i32, _>("term")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        estimated_latency_geo: None,
        estimated_latency: None,
    })
}

const LOBBY_COLUMNS: &str = "code, peers, creator, public, custom_data, created_at, \
     updated_at, leader, term, can_update_by, (password IS NOT NULL) AS has_password, \
     max_players";

/// Store backend shared by every signaling process through one database.
pub struct PostgresStore {
    pool: PgPool,
    router: Arc<TopicRouter>,
}

impl PostgresStore {
    /// Wraps the pool and starts the notification listener; the listener
    /// exits when `shutdown` flips.
    pub fn new(pool: PgPool, shutdown: watch::Receiver<bool>) -> Arc<PostgresStore> {
        let store = Arc::new(PostgresStore {
            pool,
            router: TopicRouter::new(),
        });
        store.spawn_listener(shutdown);
        store
    }

    fn spawn_listener(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    result = store.listen_once() => {
                        // listen_once only returns on failure; reconnect
                        // until the process shuts down.
                        if let Err(err) = result {
                            error!(error = %err, "pubsub bus failed, retrying");
                        }
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            debug!("pubsub listener stopped");
        });
    }

    async fn listen_once(&self) -> Result<(), sqlx::Error> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(NOTIFY_CHANNEL).await?;
        loop {
            let notification = listener.recv().await?;
            match decode_notification(notification.payload()) {
                Some((topic, data)) => {
                    self.router.dispatch(topic, &data);
                }
                None => warn!(payload = notification.payload(), "undecodable notification"),
            }
        }
    }

    async fn lobbies_of_peer(
        executor: &mut sqlx::PgConnection,
        game: &str,
        peer_id: &str,
    ) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT code
            FROM lobbies
            WHERE game = $1
            AND $2 = ANY(peers)
            "#,
        )
        .bind(game)
        .bind(peer_id)
        .fetch_all(executor)
        .await?;
        rows.iter().map(|row| row.try_get("code")).collect()
    }

    async fn member_locations(
        &self,
        peer_ids: &[String],
    ) -> Result<HashMap<String, PeerLocation>, sqlx::Error> {
        if peer_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT peer, lat, lon, geo, latencies
            FROM peers
            WHERE peer = ANY($1)
            "#,
        )
        .bind(peer_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut locations = HashMap::with_capacity(rows.len());
        for row in rows {
            let peer: String = row.try_get("peer")?;
            let lat: Option<f64> = row.try_get("lat")?;
            let lon: Option<f64> = row.try_get("lon")?;
            let geo_meta: Option<Value> = row.try_get("geo")?;
            let latencies: Option<Value> = row.try_get("latencies")?;

            let geo = match (lat, lon) {
                (Some(lat), Some(lon)) => Some(GeoLocation {
                    lat,
                    lon,
                    country: geo_meta
                        .as_ref()
                        .and_then(|g| g.get("country"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    region: geo_meta
                        .as_ref()
                        .and_then(|g| g.get("region"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                }),
                _ => None,
            };
            let latencies: Option<Latencies> =
                latencies.and_then(|v| serde_json::from_value(v).ok());
            locations.insert(peer, PeerLocation { geo, latencies });
        }
        Ok(locations)
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn create_peer(
        &self,
        peer_id: &str,
        secret: &str,
        game: &str,
        geo: Option<&GeoLocation>,
    ) -> Result<(), StoreError> {
        let geo_meta = geo.map(|g| {
            serde_json::json!({
                "country": g.country,
                "region": g.region,
            })
        });
        sqlx::query(
            r#"
            INSERT INTO peers (peer, secret, game, lat, lon, geo)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (peer) DO UPDATE
            SET last_seen = NOW(), disconnected = FALSE, updated_at = NOW()
            "#,
        )
        .bind(peer_id)
        .bind(secret)
        .bind(game)
        .bind(geo.map(|g| g.lat))
        .bind(geo.map(|g| g.lon))
        .bind(geo_meta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_peer_as_active(&self, peer_id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE peers SET last_seen = NOW() WHERE peer = $1")
            .bind(peer_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_peer_as_disconnected(&self, peer_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE peers SET disconnected = TRUE, updated_at = NOW() WHERE peer = $1",
        )
        .bind(peer_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_peer_as_reconnected(
        &self,
        peer_id: &str,
        secret: &str,
        game: &str,
    ) -> Result<Option<Vec<String>>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            r#"
            UPDATE peers
            SET disconnected = FALSE, last_seen = NOW(), updated_at = NOW()
            WHERE peer = $1
            AND secret = $2
            AND game = $3
            RETURNING peer
            "#,
        )
        .bind(peer_id)
        .bind(secret)
        .bind(game)
        .fetch_optional(&mut *tx)
        .await?;
        if updated.is_none() {
            return Ok(None);
        }
        let lobbies = Self::lobbies_of_peer(&mut tx, game, peer_id).await?;
        tx.commit().await?;
        Ok(Some(lobbies))
    }

    async fn set_peer_latencies(
        &self,
        peer_id: &str,
        latencies: &Latencies,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(latencies)?;
        sqlx::query("UPDATE peers SET latencies = $2, updated_at = NOW() WHERE peer = $1")
            .bind(peer_id)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reset_all_peer_last_seen(&self) -> Result<(), StoreError> {
        sqlx::query("UPDATE peers SET last_seen = NOW()")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn claim_next_timed_out_peer(
        &self,
        threshold: Duration,
    ) -> Result<Option<TimedOutPeer>, StoreError> {
        let mut tx = self.pool.begin().await?;
        // Same lock order as the election: peers table first, lobby rows
        // second.
        sqlx::query("LOCK TABLE peers IN EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(
            r#"
            SELECT peer, game, disconnected
            FROM peers
            WHERE last_seen < NOW() - make_interval(secs => $1)
            LIMIT 1
            "#,
        )
        .bind(threshold.as_secs_f64())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let peer_id: String = row.try_get("peer").map_err(StoreError::Database)?;
        let game: String = row.try_get("game").map_err(StoreError::Database)?;
        let was_disconnected: bool = row.try_get("disconnected").map_err(StoreError::Database)?;

        sqlx::query("DELETE FROM peers WHERE peer = $1")
            .bind(&peer_id)
            .execute(&mut *tx)
            .await?;

        let rows = sqlx::query(
            r#"
            UPDATE lobbies
            SET peers = array_remove(peers, $1), updated_at = NOW()
            WHERE game = $2
            AND $1 = ANY(peers)
            RETURNING code
            "#,
        )
        .bind(&peer_id)
        .bind(&game)
        .fetch_all(&mut *tx)
        .await?;
        let lobbies = rows
            .iter()
            .map(|row| row.try_get("code"))
            .collect::<Result<Vec<String>, sqlx::Error>>()?;

        tx.commit().await?;
        Ok(Some(TimedOutPeer {
            peer_id,
            game,
            was_disconnected,
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
            .transpose()?
            .map(String::into_bytes);

        let result = sqlx::query(
            r#"
            INSERT INTO lobbies
                (code, game, peers, creator, public, custom_data,
                 leader, term, can_update_by, password, max_players)
            VALUES ($1, $2, ARRAY[$3], $3, $4, $5, $3, 1, $6, $7, $8)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(lobby)
        .bind(game)
        .bind(creator)
        .bind(options.public)
        .bind(options.custom_data.clone())
        .bind(options.can_update_by.as_str())
        .bind(password_hash)
        .bind(options.max_players)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::LobbyExists);
        }
        Ok(())
    }

    async fn join_lobby(
        &self,
        game: &str,
        lobby: &str,
        peer_id: &str,
        password: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"
            SELECT peers, password, max_players
            FROM lobbies
            WHERE code = $1
            AND game = $2
            FOR UPDATE
            "#,
        )
        .bind(lobby)
        .bind(game)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::LobbyNotFound)?;

        let members: Vec<String> = row.try_get("peers").map_err(StoreError::Database)?;
        let stored_hash: Option<Vec<u8>> =
            row.try_get("password").map_err(StoreError::Database)?;
        let max_players: i32 = row.try_get("max_players").map_err(StoreError::Database)?;

        if let Some(hash) = stored_hash {
            let hash = String::from_utf8(hash)
                .map_err(|_| StoreError::InvalidPassword)?;
            let supplied = password.ok_or(StoreError::InvalidPassword)?;
            if !verify_password(supplied, &hash)? {
                return Err(StoreError::InvalidPassword);
            }
        }
        if members.iter().any(|p| p == peer_id) {
            return Err(StoreError::AlreadyInLobby);
        }
        if max_players > 0 && members.len() >= max_players as usize {
            return Err(StoreError::LobbyFull);
        }

        sqlx::query(
            r#"
            UPDATE lobbies
            SET peers = array_append(peers, $1), updated_at = NOW()
            WHERE code = $2
            AND game = $3
            "#,
        )
        .bind(peer_id)
        .bind(lobby)
        .bind(game)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn leave_lobby(
        &self,
        game: &str,
        lobby: &str,
        peer_id: &str,
    ) -> Result<Vec<String>, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE lobbies
            SET peers = array_remove(peers, $1), updated_at = NOW()
            WHERE code = $2
            AND game = $3
            RETURNING peers
            "#,
        )
        .bind(peer_id)
        .bind(lobby)
        .bind(game)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::LobbyNotFound)?;
        row.try_get("peers").map_err(StoreError::Database)
    }

    async fn get_lobby(&self, game: &str, lobby: &str) -> Result<Lobby, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {LOBBY_COLUMNS} FROM lobbies WHERE code = $1 AND game = $2"
        ))
        .bind(lobby)
        .bind(game)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::LobbyNotFound)?;
        lobby_from_row(&row).map_err(StoreError::Database)
    }

    async fn is_peer_in_lobby(
        &self,
        game: &str,
        lobby: &str,
        peer_id: &str,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count
            FROM lobbies
            WHERE code = $1
            AND game = $2
            AND $3 = ANY(peers)
            "#,
        )
        .bind(lobby)
        .bind(game)
        .bind(peer_id)
        .fetch_one(&self.pool)
        .await?;
        let count: i64 = row.try_get("count").map_err(StoreError::Database)?;
        Ok(count > 0)
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
            .clamp(1, filter::MAX_LIMIT);

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {LOBBY_COLUMNS} FROM lobbies WHERE game = "
        ));
        qb.push_bind(game);
        qb.push(" AND public = TRUE");
        if let Some(expr) = &parsed {
            qb.push(" AND ");
            filter::push_filter_sql(expr, &mut qb);
        }
        filter::push_order_by(&sort_keys, &mut qb);
        qb.push(" LIMIT ");
        qb.push_bind(limit);

        let rows = qb.build().fetch_all(&self.pool).await?;
        let mut lobbies = rows
            .iter()
            .map(lobby_from_row)
            .collect::<Result<Vec<Lobby>, sqlx::Error>>()?;

        if query.geo.is_some() || query.latencies.is_some() {
            let mut member_ids: Vec<String> = lobbies
                .iter()
                .flat_map(|lobby| lobby.peers.iter().cloned())
                .collect();
            member_ids.sort();
            member_ids.dedup();
            let locations = self.member_locations(&member_ids).await?;
            for lobby in &mut lobbies {
                let members: Vec<PeerLocation> = lobby
                    .peers
                    .iter()
                    .filter_map(|id| locations.get(id))
                    .cloned()
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
        let password_hash = patch
            .password
            .as_deref()
            .map(hash_password)
            .transpose()?
            .map(String::into_bytes);

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"
            SELECT creator, leader, can_update_by, public, custom_data, max_players
            FROM lobbies
            WHERE code = $1
            AND game = $2
            FOR UPDATE
            "#,
        )
        .bind(lobby)
        .bind(game)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::LobbyNotFound)?;

        let creator: String = row.try_get("creator").map_err(StoreError::Database)?;
        let leader: Option<String> = row.try_get("leader").map_err(StoreError::Database)?;
        let policy: String = row.try_get("can_update_by").map_err(StoreError::Database)?;
        let policy = UpdatePolicy::parse(Some(policy.as_str())).unwrap_or(UpdatePolicy::Creator);

        let allowed = match policy {
            UpdatePolicy::Creator => creator == peer_id,
            UpdatePolicy::Leader => leader.as_deref() == Some(peer_id),
            UpdatePolicy::Anyone => true,
            UpdatePolicy::None => false,
        };
        if !allowed {
            return Err(StoreError::NotAllowed);
        }

        let public: bool = row.try_get("public").map_err(StoreError::Database)?;
        let custom_data: Option<Value> =
            row.try_get("custom_data").map_err(StoreError::Database)?;
        let max_players: i32 = row.try_get("max_players").map_err(StoreError::Database)?;

        let new_public = patch.public.unwrap_or(public);
        let new_custom = patch.custom_data.clone().or(custom_data);
        let new_max_players = patch.max_players.unwrap_or(max_players);
        let new_policy = patch.can_update_by.unwrap_or(policy);

        let updated = if let Some(hash) = password_hash {
            sqlx::query(&format!(
                r#"
                UPDATE lobbies
                SET public = $3, custom_data = $4, max_players = $5,
                    can_update_by = $6, password = $7, updated_at = NOW()
                WHERE code = $1
                AND game = $2
                RETURNING {LOBBY_COLUMNS}
                "#
            ))
            .bind(lobby)
            .bind(game)
            .bind(new_public)
            .bind(new_custom)
            .bind(new_max_players)
            .bind(new_policy.as_str())
            .bind(hash)
            .fetch_one(&mut *tx)
            .await?
        } else {
            sqlx::query(&format!(
                r#"
                UPDATE lobbies
                SET public = $3, custom_data = $4, max_players = $5,
                    can_update_by = $6, updated_at = NOW()
                WHERE code = $1
                AND game = $2
                RETURNING {LOBBY_COLUMNS}
                "#
            ))
            .bind(lobby)
            .bind(game)
            .bind(new_public)
            .bind(new_custom)
            .bind(new_max_players)
            .bind(new_policy.as_str())
            .fetch_one(&mut *tx)
            .await?
        };

        let lobby = lobby_from_row(&updated).map_err(StoreError::Database)?;
        tx.commit().await?;
        Ok(lobby)
    }

    async fn do_leader_election(
        &self,
        game: &str,
        lobby: &str,
    ) -> Result<Option<ElectionResult>, StoreError> {
        let mut tx = self.pool.begin().await?;
        // Nobody may join the disconnected set mid-decision; the table
        // lock is always taken before the lobby row lock.
        sqlx::query("LOCK TABLE peers IN EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await?;

        let rows = sqlx::query("SELECT peer FROM peers WHERE disconnected = TRUE AND game = $1")
            .bind(game)
            .fetch_all(&mut *tx)
            .await?;
        let disconnected = rows
            .iter()
            .map(|row| row.try_get("peer"))
            .collect::<Result<HashSet<String>, sqlx::Error>>()?;

        let row = sqlx::query(
            r#"
            SELECT leader, term, peers
            FROM lobbies
            WHERE game = $1
            AND code = $2
            FOR UPDATE
            "#,
        )
        .bind(game)
        .bind(lobby)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::LobbyNotFound)?;

        let leader: Option<String> = row.try_get("leader").map_err(StoreError::Database)?;
        let members: Vec<String> = row.try_get("peers").map_err(StoreError::Database)?;

        if let Some(current) = leader.filter(|l| !l.is_empty()) {
            if members.iter().any(|p| *p == current) && !disconnected.contains(&current) {
                return Ok(None);
            }
        }

        let mut candidates = members;
        if config::is_test_env() {
            candidates.sort();
        } else {
            candidates.shuffle(&mut rand::thread_rng());
        }
        let new_leader = candidates
            .into_iter()
            .find(|candidate| !disconnected.contains(candidate));

        let row = sqlx::query(
            r#"
            UPDATE lobbies
            SET leader = $3, term = term + 1, updated_at = NOW()
            WHERE game = $1
            AND code = $2
            RETURNING term
            "#,
        )
        .bind(game)
        .bind(lobby)
        .bind(new_leader.as_deref())
        .fetch_one(&mut *tx)
        .await?;
        let term = i64::from(row.try_get::<i32, _>("term").map_err(StoreError::Database)?);

        tx.commit().await?;
        Ok(Some(ElectionResult {
            leader: new_leader,
            term,
        }))
    }

    async fn clean_empty_lobbies(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM lobbies WHERE cardinality(peers) = 0 AND updated_at < $1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
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
        let payload = encode_notification(topic, data)?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(NOTIFY_CHANNEL)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_payload_round_trip() {
        let payload = encode_notification("g1l1peer", b"hello world").unwrap();
        assert!(payload.starts_with("g1l1peer:"));
        let (topic, data) = decode_notification(&payload).unwrap();
        assert_eq!(topic, "g1l1peer");
        assert_eq!(data, b"hello world");
    }

    #[test]
    fn topics_are_validated() {
        assert!(valid_topic("10e4dd45-ecff-4210-a43e-9bb1973f4dbc2B3C"));
        assert!(!valid_topic(""));
        assert!(!valid_topic("has:colon"));
        assert!(!valid_topic("has space"));
        assert!(!valid_topic(&"x".repeat(MAX_TOPIC_LENGTH + 1)));

        assert!(matches!(
            encode_notification("bad topic", b"x"),
            Err(StoreError::InvalidTopic(_))
        ));
    }

    #[test]
    fn oversized_payloads_are_rejected() {
        let data = vec![0u8; MAX_NOTIFY_PAYLOAD];
        assert!(matches!(
            encode_notification("topic", &data),
            Err(StoreError::PayloadTooLarge(_))
        ));
        // Anything that encodes under the cap is fine.
        assert!(encode_notification("topic", &[0u8; 5000]).is_ok());
    }

    #[test]
    fn malformed_notifications_are_skipped() {
        assert!(decode_notification("no-separator").is_none());
        assert!(decode_notification("topic:!!!not-base64!!!").is_none());
        let (topic, data) = decode_notification("topic:").unwrap();
        assert_eq!(topic, "topic");
        assert!(data.is_empty());
    }
}
