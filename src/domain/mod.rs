pub mod errors;
pub mod lobby;
pub mod ports;

pub use errors::{ClientError, StoreError};
pub use lobby::{
    estimate_latencies, CreateLobbyOptions, GeoLocation, Latencies, ListQuery, Lobby, LobbyPatch,
    PeerLocation, UpdatePolicy,
};
pub use ports::{
    lobby_topic, peer_topic, ElectionResult, Store, Subscription, SubscriptionCallback,
    TimedOutPeer,
};
