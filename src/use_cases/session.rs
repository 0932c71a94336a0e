// Per-connection peer state machine. One session per WebSocket; the
// read loop feeds inbound frames in, replies and forwarded messages go
// out through the outbound queue owned by the socket writer.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{
    lobby_topic, peer_topic, ClientError, CreateLobbyOptions, GeoLocation, ListQuery, LobbyPatch,
    Store, StoreError, Subscription, SubscriptionCallback, UpdatePolicy,
};
use crate::frameworks::config;
use crate::interface_adapters::clients::metrics::MetricsClient;
use crate::interface_adapters::clients::turn::CredentialsClient;
use crate::interface_adapters::protocol::{
    ClosePacket, CreatePacket, EventPacket, ForwardablePacket, HelloPacket, JoinPacket,
    LeavePacket, ListPacket, LobbyUpdatePacket, OutboundFrame, OutboundSender, PacketProbe,
    ServerPacket, PROTOCOL_VERSION,
};
use crate::use_cases::{election, ids};

const CODE_ATTEMPTS: u32 = 20;
// Attempts past this point use five-character short codes.
const SHORT_CODE_ESCALATION: u32 = 16;

#[derive(Debug)]
pub enum SessionError {
    /// Protocol violation; the connection is closed after an error frame.
    Protocol(String),
    /// Store failure that is not the client's fault.
    Store(StoreError),
    /// The outbound queue is gone, i.e. the socket writer stopped.
    ConnectionClosed,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Protocol(reason) => f.write_str(reason),
            SessionError::Store(err) => write!(f, "store error: {err}"),
            SessionError::ConnectionClosed => f.write_str("connection closed"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        SessionError::Store(err)
    }
}

fn protocol_error(reason: impl Into<String>) -> SessionError {
    SessionError::Protocol(reason.into())
}

/// State machine for one connected peer.
pub struct PeerSession {
    store: Arc<dyn Store>,
    metrics: MetricsClient,
    credentials: Arc<CredentialsClient>,
    outbound: OutboundSender,

    pub id: String,
    pub secret: String,
    pub game: String,
    pub lobby: Option<String>,
    geo: Option<GeoLocation>,

    // Set by a `close` packet; packets after it are ignored and the
    // socket teardown skips the disconnect side effects.
    closed: bool,
    // Set after a failed reconnect; the socket stays open but every
    // further packet is dropped so old clients do not reconnect-loop.
    inert: bool,

    subscriptions: Vec<Subscription>,
}

impl PeerSession {
    pub fn new(
        store: Arc<dyn Store>,
        metrics: MetricsClient,
        credentials: Arc<CredentialsClient>,
        outbound: OutboundSender,
        geo: Option<GeoLocation>,
    ) -> PeerSession {
        PeerSession {
            store,
            metrics,
            credentials,
            outbound,
            id: String::new(),
            secret: String::new(),
            game: String::new(),
            lobby: None,
            geo,
            closed: false,
            inert: false,
            subscriptions: Vec::new(),
        }
    }

    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    async fn send(&self, packet: ServerPacket) -> Result<(), SessionError> {
        self.outbound
            .send(OutboundFrame::Packet(packet))
            .await
            .map_err(|_| SessionError::ConnectionClosed)
    }

    async fn reject(
        &self,
        rid: Option<String>,
        error: ClientError,
    ) -> Result<(), SessionError> {
        debug!(code = error.code(), "rejecting request");
        self.send(ServerPacket::rejection(rid, &error)).await
    }

    /// Callback used for both lobby topics: pushes the raw payload onto
    /// this connection's outbound queue.
    fn forward_callback(&self) -> SubscriptionCallback {
        let outbound = self.outbound.clone();
        Arc::new(move |data: &[u8]| {
            use tokio::sync::mpsc::error::TrySendError;
            match outbound.try_send(OutboundFrame::Raw(data.to_vec())) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("outbound queue full, dropping forwarded message");
                }
                // Socket writer is gone; the subscription is about to be
                // dropped with the session.
                Err(TrySendError::Closed(_)) => {}
            }
        })
    }

    fn attach_to_lobby(&mut self, lobby: &str) {
        let callback = self.forward_callback();
        self.subscriptions
            .push(self.store.subscribe(callback, &self.game, lobby, &self.id));
        self.lobby = Some(lobby.to_string());
    }

    /// Dispatches one inbound frame. `Err` means the connection must be
    /// closed; user-correctable failures are replied to internally.
    pub async fn handle_packet(&mut self, raw: &str) -> Result<(), SessionError> {
        let probe: PacketProbe = serde_json::from_str(raw)
            .map_err(|err| protocol_error(format!("unable to decode packet: {err}")))?;

        if self.inert {
            debug!(packet_type = %probe.packet_type, "dropping packet on inert connection");
            return Ok(());
        }
        if self.closed {
            // Only disconnect/disconnected tail traffic is expected here.
            if !matches!(
                probe.packet_type.as_str(),
                "disconnect" | "disconnected" | "ping" | "pong"
            ) {
                info!(packet_type = %probe.packet_type, "ignoring packet after close");
            }
            return Ok(());
        }

        debug!(packet_type = %probe.packet_type, "handling packet");
        match probe.packet_type.as_str() {
            "hello" => {
                let packet: HelloPacket = decode(raw)?;
                self.handle_hello(packet).await
            }
            "create" => {
                let packet: CreatePacket = decode(raw)?;
                self.handle_create(packet).await
            }
            "join" => {
                let packet: JoinPacket = decode(raw)?;
                self.handle_join(packet).await
            }
            "leave" => {
                let packet: LeavePacket = decode(raw)?;
                self.handle_leave(packet.rid).await
            }
            "close" => {
                let packet: ClosePacket = decode(raw)?;
                self.handle_close(packet).await
            }
            "list" => {
                let packet: ListPacket = decode(raw)?;
                self.handle_list(packet).await
            }
            "lobbyUpdate" => {
                let packet: LobbyUpdatePacket = decode(raw)?;
                self.handle_lobby_update(packet).await
            }
            "candidate" | "description" => self.handle_forward(raw, probe.rid).await,
            "connected" => {
                self.metrics
                    .record("rtc", "connected", &self.game, &self.id, self.lobby_code(), None);
                Ok(())
            }
            "disconnected" => {
                self.metrics
                    .record("rtc", "disconnected", &self.game, &self.id, self.lobby_code(), None);
                Ok(())
            }
            "event" => {
                let packet: EventPacket = decode(raw)?;
                self.handle_event(packet);
                Ok(())
            }
            "credentials" => self.handle_credentials(probe.rid).await,
            "ping" | "pong" => Ok(()),
            other => {
                warn!(packet_type = other, "unknown packet type received");
                Ok(())
            }
        }
    }

    fn lobby_code(&self) -> &str {
        self.lobby.as_deref().unwrap_or_default()
    }

    fn require_id(&self) -> Result<(), SessionError> {
        if self.id.is_empty() {
            return Err(protocol_error("peer not introduced, hello required"));
        }
        Ok(())
    }

    fn require_lobby(&self) -> Result<String, SessionError> {
        self.require_id()?;
        self.lobby
            .clone()
            .ok_or_else(|| protocol_error("not in a lobby"))
    }

    fn require_no_lobby(&self) -> Result<(), SessionError> {
        self.require_id()?;
        if let Some(lobby) = &self.lobby {
            return Err(protocol_error(format!(
                "already in lobby {}:{} as {}",
                self.game, lobby, self.id
            )));
        }
        Ok(())
    }

    async fn handle_hello(&mut self, packet: HelloPacket) -> Result<(), SessionError> {
        if !self.game.is_empty() {
            return Err(protocol_error(format!(
                "already introduced {} for game {}",
                self.id, self.game
            )));
        }
        let game = packet
            .game
            .filter(|game| ids::is_uuid(game))
            .ok_or_else(|| protocol_error("no valid game id supplied"))?;
        self.game = game;

        let mut rejoined: Vec<String> = Vec::new();
        match (packet.id, packet.secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                info!(game = %self.game, peer = %id, "peer reconnecting");
                match self
                    .store
                    .mark_peer_as_reconnected(&id, &secret, &self.game)
                    .await?
                {
                    Some(lobbies) => {
                        self.id = id;
                        self.secret = secret;
                        rejoined = lobbies;
                    }
                    None => {
                        self.reject(None, ClientError::ReconnectFailed).await?;
                        self.inert = true;
                        return Ok(());
                    }
                }
            }
            _ => {
                self.id = ids::generate_peer_id();
                self.secret = ids::generate_secret();
                info!(game = %self.game, peer = %self.id, "peer connecting");
                self.store
                    .create_peer(&self.id, &self.secret, &self.game, self.geo.as_ref())
                    .await?;
            }
        }

        self.send(ServerPacket::Welcome {
            id: self.id.clone(),
            secret: self.secret.clone(),
            protocol_version: PROTOCOL_VERSION,
        })
        .await?;

        for lobby in rejoined.clone() {
            info!(game = %self.game, peer = %self.id, lobby = %lobby, "peer rejoining lobby");
            self.attach_to_lobby(&lobby);
            // Elections may have been missed while offline. When the
            // election is a no-op the client still needs the current
            // leader and term to discard stale notifications.
            let elected = election::elect_and_publish(&self.store, &self.game, &lobby).await?;
            if elected.is_none() {
                let info = self.store.get_lobby(&self.game, &lobby).await?;
                if let Some(leader) = info.leader {
                    self.send(ServerPacket::Leader {
                        leader,
                        term: info.term,
                    })
                    .await?;
                }
            }
            self.metrics
                .record("lobby", "reconnected", &self.game, &self.id, &lobby, None);
        }

        // A hello may name a lobby to land in directly.
        if let Some(code) = packet.lobby.filter(|code| !code.is_empty()) {
            if self.lobby.is_none() {
                self.handle_join(JoinPacket {
                    rid: None,
                    lobby: Some(code),
                    password: None,
                })
                .await?;
            }
        }

        Ok(())
    }

    async fn handle_create(&mut self, packet: CreatePacket) -> Result<(), SessionError> {
        self.require_no_lobby()?;

        let can_update_by = UpdatePolicy::parse(packet.can_update_by.as_deref())
            .ok_or_else(|| protocol_error("invalid canUpdateBy value"))?;
        let max_players = packet.max_players.unwrap_or(0);
        if max_players < 0 {
            return Err(protocol_error("invalid maxPlayers value"));
        }
        let options = CreateLobbyOptions {
            public: packet.public,
            custom_data: packet.custom_data,
            password: packet.password,
            max_players,
            can_update_by,
        };

        let mut code = None;
        for attempt in 1..=CODE_ATTEMPTS {
            let candidate = match packet.code_format.as_deref() {
                Some("short") => {
                    let chars = if attempt <= SHORT_CODE_ESCALATION { 4 } else { 5 };
                    ids::generate_short_lobby_code(chars)
                }
                _ => ids::generate_lobby_code(),
            };
            match self
                .store
                .create_lobby(&self.game, &candidate, &self.id, &options)
                .await
            {
                Ok(()) => {
                    code = Some(candidate);
                    break;
                }
                Err(StoreError::LobbyExists) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        let code = code.ok_or_else(|| {
            protocol_error("unable to create lobby, too many attempts to find a unique code")
        })?;

        self.attach_to_lobby(&code);
        let info = self.store.get_lobby(&self.game, &code).await?;

        info!(game = %self.game, lobby = %code, peer = %self.id, "created lobby");
        self.metrics
            .record("lobby", "created", &self.game, &self.id, &code, None);

        self.send(ServerPacket::Joined {
            rid: packet.rid,
            lobby: code,
            lobby_info: info,
        })
        .await
    }

    async fn handle_join(&mut self, packet: JoinPacket) -> Result<(), SessionError> {
        self.require_no_lobby()?;
        let code = packet
            .lobby
            .filter(|code| !code.is_empty())
            .ok_or_else(|| protocol_error("no lobby code supplied"))?;

        if let Err(err) = self
            .store
            .join_lobby(&self.game, &code, &self.id, packet.password.as_deref())
            .await
        {
            return match err.as_client_error() {
                Some(client_error) => self.reject(packet.rid, client_error).await,
                None => Err(err.into()),
            };
        }

        self.attach_to_lobby(&code);
        // No-op unless the lobby lost its leader.
        election::elect_and_publish(&self.store, &self.game, &code).await?;

        let info = self.store.get_lobby(&self.game, &code).await?;
        let others: Vec<String> = info
            .peers
            .iter()
            .filter(|peer| **peer != self.id)
            .cloned()
            .collect();

        self.send(ServerPacket::Joined {
            rid: packet.rid,
            lobby: code.clone(),
            lobby_info: info,
        })
        .await?;

        for other in &others {
            self.request_connection(other).await?;
        }

        info!(
            game = %self.game,
            lobby = %code,
            peer = %self.id,
            others = others.len(),
            "joined lobby"
        );
        self.metrics
            .record("lobby", "joined", &self.game, &self.id, &code, None);
        Ok(())
    }

    /// Sets up the WebRTC pairing between this peer and `other`: the
    /// newcomer takes the polite role of the perfect-negotiation pattern.
    async fn request_connection(&self, other: &str) -> Result<(), SessionError> {
        let lobby = self.lobby_code().to_string();

        self.send(ServerPacket::Connect {
            id: other.to_string(),
            polite: true,
        })
        .await?;

        let to_them = ServerPacket::Connect {
            id: self.id.clone(),
            polite: false,
        };
        let data = serde_json::to_vec(&to_them).map_err(StoreError::from)?;
        match self
            .store
            .publish(&peer_topic(&self.game, &lobby, other), &data)
            .await
        {
            Ok(()) | Err(StoreError::NoSuchTopic) => {}
            Err(err) => return Err(err.into()),
        }

        self.metrics
            .record("rtc", "attempt", &self.game, &self.id, &lobby, None);
        self.metrics
            .record("rtc", "attempt", &self.game, other, &lobby, None);
        Ok(())
    }

    /// Shared by `leave` and `close`: removes the peer from its lobby,
    /// tells the remaining members, and re-elects.
    async fn depart_lobby(&mut self) -> Result<(), SessionError> {
        let Some(lobby) = self.lobby.clone() else {
            return Ok(());
        };

        let remaining = match self.store.leave_lobby(&self.game, &lobby, &self.id).await {
            Ok(remaining) => remaining,
            // The reaper may have removed the lobby already.
            Err(StoreError::LobbyNotFound) => {
                self.subscriptions.clear();
                self.lobby = None;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        self.subscriptions.clear();
        self.lobby = None;

        let packet = ServerPacket::Disconnect {
            id: self.id.clone(),
        };
        let data = serde_json::to_vec(&packet).map_err(StoreError::from)?;
        match self.store.publish(&lobby_topic(&self.game, &lobby), &data).await {
            // The lobby may already be empty.
            Ok(()) | Err(StoreError::NoSuchTopic) => {}
            Err(err) => warn!(error = %err, "failed to publish disconnect packet"),
        }

        election::elect_and_publish(&self.store, &self.game, &lobby).await?;

        info!(
            game = %self.game,
            lobby = %lobby,
            peer = %self.id,
            remaining = remaining.len(),
            "left lobby"
        );
        Ok(())
    }

    async fn handle_leave(&mut self, rid: Option<String>) -> Result<(), SessionError> {
        self.require_lobby()?;
        let lobby = self.lobby_code().to_string();
        self.depart_lobby().await?;
        self.metrics
            .record("lobby", "leave", &self.game, &self.id, &lobby, None);
        self.send(ServerPacket::Left { rid }).await
    }

    async fn handle_close(&mut self, packet: ClosePacket) -> Result<(), SessionError> {
        info!(
            peer = %self.id,
            reason = packet.reason.as_deref().unwrap_or_default(),
            "peer closed"
        );
        self.depart_lobby().await?;
        if self.has_id() {
            self.store.mark_peer_as_disconnected(&self.id).await?;
        }
        self.closed = true;
        Ok(())
    }

    async fn handle_list(&mut self, packet: ListPacket) -> Result<(), SessionError> {
        self.require_id()?;

        if let Some(latencies) = &packet.latencies {
            self.store.set_peer_latencies(&self.id, latencies).await?;
        }

        let query = ListQuery {
            filter: packet.filter,
            sort: packet.sort,
            limit: packet.limit,
            geo: self.geo.clone(),
            latencies: packet.latencies,
        };
        match self.store.list_lobbies(&self.game, &query).await {
            Ok(lobbies) => {
                self.send(ServerPacket::Lobbies {
                    rid: packet.rid,
                    lobbies,
                })
                .await
            }
            Err(err) => match err.as_client_error() {
                Some(client_error) => self.reject(packet.rid, client_error).await,
                None => Err(err.into()),
            },
        }
    }

    async fn handle_lobby_update(&mut self, packet: LobbyUpdatePacket) -> Result<(), SessionError> {
        let lobby = self.require_lobby()?;

        let can_update_by = match packet.can_update_by.as_deref() {
            None => None,
            Some(value) => Some(
                UpdatePolicy::parse(Some(value))
                    .ok_or_else(|| protocol_error("invalid canUpdateBy value"))?,
            ),
        };
        let patch = LobbyPatch {
            public: packet.public,
            custom_data: packet.custom_data,
            password: packet.password,
            max_players: packet.max_players,
            can_update_by,
        };
        if patch.is_empty() {
            return Err(protocol_error("empty lobbyUpdate"));
        }

        let info = match self
            .store
            .update_lobby(&self.game, &lobby, &self.id, &patch)
            .await
        {
            Ok(info) => info,
            Err(err) => {
                return match err.as_client_error() {
                    Some(client_error) => self.reject(packet.rid, client_error).await,
                    None => Err(err.into()),
                };
            }
        };

        // The originator's frame is the only one carrying the request id;
        // everyone else sees a plain notification.
        self.send(ServerPacket::LobbyUpdated {
            rid: packet.rid,
            lobby_info: info.clone(),
        })
        .await?;

        let notification = ServerPacket::LobbyUpdated {
            rid: None,
            lobby_info: info.clone(),
        };
        let data = serde_json::to_vec(&notification).map_err(StoreError::from)?;
        for other in info.peers.iter().filter(|peer| **peer != self.id) {
            match self
                .store
                .publish(&peer_topic(&self.game, &lobby, other), &data)
                .await
            {
                Ok(()) | Err(StoreError::NoSuchTopic) => {}
                Err(err) => warn!(error = %err, "failed to publish lobbyUpdated packet"),
            }
        }

        info!(game = %self.game, lobby = %lobby, peer = %self.id, "updated lobby");
        self.metrics
            .record("lobby", "updated", &self.game, &self.id, &lobby, None);
        Ok(())
    }

    async fn handle_forward(&mut self, raw: &str, rid: Option<String>) -> Result<(), SessionError> {
        let lobby = self.require_lobby()?;

        let routing: ForwardablePacket = decode(raw)?;
        match routing.source.as_deref() {
            Some(source) if source == self.id => {}
            _ => return Err(protocol_error("invalid source set")),
        }
        let recipient = routing
            .recipient
            .filter(|recipient| !recipient.is_empty())
            .ok_or_else(|| protocol_error("no recipient set"))?;

        match self
            .store
            .publish(&peer_topic(&self.game, &lobby, &recipient), raw.as_bytes())
            .await
        {
            Ok(()) => Ok(()),
            Err(StoreError::NoSuchTopic) => {
                self.reject(rid, ClientError::MissingRecipient(recipient)).await
            }
            Err(err) => Err(err.into()),
        }
    }

    fn handle_event(&self, packet: EventPacket) {
        let category = packet.category.as_deref().unwrap_or("client");
        let action = packet.action.as_deref().unwrap_or("event");
        self.metrics
            .record(category, action, &self.game, &self.id, self.lobby_code(), packet.data);
    }

    async fn handle_credentials(&self, rid: Option<String>) -> Result<(), SessionError> {
        match self.credentials.get() {
            Some(credentials) => {
                self.send(ServerPacket::Credentials {
                    rid,
                    url: credentials.url,
                    username: credentials.username,
                    credential: credentials.credential,
                    lifetime: credentials.lifetime,
                })
                .await
            }
            None => self.reject(rid, ClientError::CredentialsUnavailable).await,
        }
    }

    /// Runs the disconnect side effects after the socket is gone. They
    /// get their own deadline so the cancellation that ended the
    /// connection cannot cancel them too.
    pub fn teardown(mut self) {
        self.subscriptions.clear();
        if !self.has_id() || self.closed {
            return;
        }

        let store = Arc::clone(&self.store);
        let id = self.id.clone();
        let game = self.game.clone();
        let lobby = self.lobby.clone();
        tokio::spawn(async move {
            let cleanup = async {
                if let Err(err) = store.mark_peer_as_disconnected(&id).await {
                    warn!(error = %err, peer = %id, "failed to mark peer as disconnected");
                }
                if let Some(lobby) = lobby {
                    if let Err(err) = election::elect_and_publish(&store, &game, &lobby).await {
                        warn!(error = %err, lobby = %lobby, "failed to re-elect after disconnect");
                    }
                }
            };
            if tokio::time::timeout(config::DISCONNECT_CLEANUP_TIMEOUT, cleanup)
                .await
                .is_err()
            {
                warn!(peer = %id, "disconnect cleanup timed out");
            }
        });
    }
}

fn decode<'a, T: serde::Deserialize<'a>>(raw: &'a str) -> Result<T, SessionError> {
    serde_json::from_str(raw)
        .map_err(|err| protocol_error(format!("unable to decode packet: {err}")))
}
