use std::fmt;

/// Failures the client can correct; replied as `error{code}` without
/// closing the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    LobbyNotFound,
    InvalidPassword,
    LobbyIsFull,
    AlreadyInLobby,
    ReconnectFailed,
    MissingRecipient(String),
    CredentialsUnavailable,
    InvalidFilter(String),
    NotAllowed,
}

impl ClientError {
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::LobbyNotFound => "lobby-not-found",
            ClientError::InvalidPassword => "invalid-password",
            ClientError::LobbyIsFull => "lobby-is-full",
            ClientError::AlreadyInLobby => "already-in-lobby",
            ClientError::ReconnectFailed => "reconnect-failed",
            ClientError::MissingRecipient(_) => "missing-recipient",
            ClientError::CredentialsUnavailable => "credentials-unavailable",
            ClientError::InvalidFilter(_) => "invalid-filter",
            ClientError::NotAllowed => "not-allowed",
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::MissingRecipient(recipient) => {
                write!(f, "missing recipient: {recipient}")
            }
            ClientError::InvalidFilter(reason) => write!(f, "invalid filter: {reason}"),
            other => f.write_str(other.code()),
        }
    }
}

impl std::error::Error for ClientError {}

/// Errors produced by the store backends.
#[derive(Debug)]
pub enum StoreError {
    LobbyExists,
    LobbyNotFound,
    AlreadyInLobby,
    LobbyFull,
    InvalidPassword,
    NotAllowed,
    PeerNotFound,
    NoSuchTopic,
    InvalidTopic(String),
    PayloadTooLarge(usize),
    InvalidFilter(String),
    Database(sqlx::Error),
    PasswordHash(bcrypt::BcryptError),
    Encoding(serde_json::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::LobbyExists => f.write_str("lobby already exists"),
            StoreError::LobbyNotFound => f.write_str("lobby not found"),
            StoreError::AlreadyInLobby => f.write_str("peer already in lobby"),
            StoreError::LobbyFull => f.write_str("lobby is full"),
            StoreError::InvalidPassword => f.write_str("invalid password"),
            StoreError::NotAllowed => f.write_str("not allowed"),
            StoreError::PeerNotFound => f.write_str("peer not found"),
            StoreError::NoSuchTopic => f.write_str("no such topic"),
            StoreError::InvalidTopic(topic) => write!(f, "invalid topic: {topic}"),
            StoreError::PayloadTooLarge(size) => {
                write!(f, "payload too large for notification channel: {size}")
            }
            StoreError::InvalidFilter(reason) => write!(f, "invalid filter: {reason}"),
            StoreError::Database(err) => write!(f, "database error: {err}"),
            StoreError::PasswordHash(err) => write!(f, "password hash error: {err}"),
            StoreError::Encoding(err) => write!(f, "encoding error: {err}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Database(err) => Some(err),
            StoreError::PasswordHash(err) => Some(err),
            StoreError::Encoding(err) => Some(err),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err)
    }
}

impl From<bcrypt::BcryptError> for StoreError {
    fn from(err: bcrypt::BcryptError) -> Self {
        StoreError::PasswordHash(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Encoding(err)
    }
}

impl StoreError {
    /// Maps the user-correctable subset onto its client error; infra
    /// failures return `None` and are handled by the session loop.
    pub fn as_client_error(&self) -> Option<ClientError> {
        match self {
            StoreError::LobbyNotFound => Some(ClientError::LobbyNotFound),
            StoreError::InvalidPassword => Some(ClientError::InvalidPassword),
            StoreError::LobbyFull => Some(ClientError::LobbyIsFull),
            StoreError::AlreadyInLobby => Some(ClientError::AlreadyInLobby),
            StoreError::NotAllowed => Some(ClientError::NotAllowed),
            StoreError::InvalidFilter(reason) => {
                Some(ClientError::InvalidFilter(reason.clone()))
            }
            _ => None,
        }
    }
}
