// Wire protocol for the signaling WebSocket: JSON text frames, one
// packet per frame, selected by the `type` field. Requests may carry a
// `rid` that is echoed on the reply.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::domain::{ClientError, Latencies, Lobby};

pub const PROTOCOL_VERSION: &str = "1.0.0";

/// First decode pass: just the packet type and request id.
#[derive(Debug, Clone, Deserialize)]
pub struct PacketProbe {
    #[serde(rename = "type")]
    pub packet_type: String,
    #[serde(default)]
    pub rid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPacket {
    #[serde(default)]
    pub game: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub lobby: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePacket {
    #[serde(default)]
    pub rid: Option<String>,
    #[serde(default)]
    pub code_format: Option<String>,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub custom_data: Option<Value>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub max_players: Option<i32>,
    #[serde(default)]
    pub can_update_by: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPacket {
    #[serde(default)]
    pub rid: Option<String>,
    #[serde(default)]
    pub lobby: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPacket {
    #[serde(default)]
    pub rid: Option<String>,
    #[serde(default)]
    pub filter: Option<Value>,
    #[serde(default)]
    pub sort: Option<Vec<String>>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub latencies: Option<Latencies>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyUpdatePacket {
    #[serde(default)]
    pub rid: Option<String>,
    #[serde(default)]
    pub public: Option<bool>,
    #[serde(default)]
    pub custom_data: Option<Value>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub max_players: Option<i32>,
    #[serde(default)]
    pub can_update_by: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeavePacket {
    #[serde(default)]
    pub rid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosePacket {
    #[serde(default)]
    pub reason: Option<String>,
}

/// `candidate` and `description` frames; forwarded raw after the source
/// check, so only the routing fields are decoded.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardablePacket {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub recipient: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPacket {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub data: Option<HashMap<String, String>>,
}

/// Server-to-client packets.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerPacket {
    #[serde(rename = "welcome")]
    Welcome {
        id: String,
        secret: String,
        #[serde(rename = "protocolVersion")]
        protocol_version: &'static str,
    },
    #[serde(rename = "joined")]
    Joined {
        #[serde(skip_serializing_if = "Option::is_none")]
        rid: Option<String>,
        lobby: String,
        #[serde(rename = "lobbyInfo")]
        lobby_info: Lobby,
    },
    #[serde(rename = "lobbies")]
    Lobbies {
        #[serde(skip_serializing_if = "Option::is_none")]
        rid: Option<String>,
        lobbies: Vec<Lobby>,
    },
    #[serde(rename = "lobbyUpdated")]
    LobbyUpdated {
        #[serde(skip_serializing_if = "Option::is_none")]
        rid: Option<String>,
        #[serde(rename = "lobbyInfo")]
        lobby_info: Lobby,
    },
    #[serde(rename = "leader")]
    Leader { leader: String, term: i64 },
    #[serde(rename = "left")]
    Left {
        #[serde(skip_serializing_if = "Option::is_none")]
        rid: Option<String>,
    },
    #[serde(rename = "disconnect")]
    Disconnect { id: String },
    #[serde(rename = "connect")]
    Connect { id: String, polite: bool },
    #[serde(rename = "credentials")]
    Credentials {
        #[serde(skip_serializing_if = "Option::is_none")]
        rid: Option<String>,
        url: String,
        username: String,
        credential: String,
        lifetime: i64,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        rid: Option<String>,
        code: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename = "ping")]
    Ping,
}

impl ServerPacket {
    /// Error reply for a user-correctable failure.
    pub fn rejection(rid: Option<String>, error: &ClientError) -> ServerPacket {
        ServerPacket::Error {
            rid,
            code: error.code().to_string(),
            message: Some(error.to_string()),
        }
    }

    /// Error frame written right before a protocol-violation close.
    pub fn protocol_error(message: impl Into<String>) -> ServerPacket {
        ServerPacket::Error {
            rid: None,
            code: "protocol-error".to_string(),
            message: Some(message.into()),
        }
    }
}

/// A frame queued for the socket writer: either a packet built by the
/// session or raw bytes forwarded from the bus.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Packet(ServerPacket),
    Raw(Vec<u8>),
}

pub type OutboundSender = tokio::sync::mpsc::Sender<OutboundFrame>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn probe_reads_type_and_rid_only() {
        let probe: PacketProbe =
            serde_json::from_str(r#"{"type":"join","rid":"r1","lobby":"AAAA"}"#).unwrap();
        assert_eq!(probe.packet_type, "join");
        assert_eq!(probe.rid.as_deref(), Some("r1"));

        assert!(serde_json::from_str::<PacketProbe>(r#"{"rid":"r1"}"#).is_err());
    }

    #[test]
    fn welcome_always_carries_protocol_version() {
        let packet = ServerPacket::Welcome {
            id: "a".to_string(),
            secret: "secret".to_string(),
            protocol_version: PROTOCOL_VERSION,
        };
        let value = serde_json::to_value(&packet).unwrap();
        assert_eq!(value["type"], "welcome");
        assert_eq!(value["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(value["id"], "a");
        assert_eq!(value["secret"], "secret");
    }

    #[test]
    fn error_packets_omit_absent_rid() {
        let packet = ServerPacket::rejection(None, &ClientError::InvalidPassword);
        let value = serde_json::to_value(&packet).unwrap();
        assert_eq!(value["code"], "invalid-password");
        assert!(value.get("rid").is_none());

        let packet = ServerPacket::rejection(
            Some("r9".to_string()),
            &ClientError::MissingRecipient("b".to_string()),
        );
        let value = serde_json::to_value(&packet).unwrap();
        assert_eq!(value["rid"], "r9");
        assert_eq!(value["code"], "missing-recipient");
    }

    #[test]
    fn connect_packet_shape_matches_clients() {
        let packet = ServerPacket::Connect {
            id: "b".to_string(),
            polite: false,
        };
        assert_eq!(
            serde_json::to_value(&packet).unwrap(),
            json!({"type": "connect", "id": "b", "polite": false})
        );
    }

    #[test]
    fn create_packet_defaults() {
        let packet: CreatePacket = serde_json::from_str(r#"{"type":"create"}"#).unwrap();
        assert!(!packet.public);
        assert!(packet.code_format.is_none());
        assert!(packet.max_players.is_none());

        let packet: CreatePacket = serde_json::from_str(
            r#"{"type":"create","codeFormat":"short","maxPlayers":4,"canUpdateBy":"leader"}"#,
        )
        .unwrap();
        assert_eq!(packet.code_format.as_deref(), Some("short"));
        assert_eq!(packet.max_players, Some(4));
        assert_eq!(packet.can_update_by.as_deref(), Some("leader"));
    }
}
