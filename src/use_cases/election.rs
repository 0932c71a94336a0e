// Leader election entry point shared by join, leave, close, reconnect
// and the reaper.

use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{lobby_topic, ElectionResult, Store, StoreError};
use crate::interface_adapters::protocol::ServerPacket;

/// Runs an election for the lobby and, when a new leader emerged,
/// publishes `leader{leader, term}` to the lobby broadcast topic.
/// Returns `None` when the current leader was still valid.
pub async fn elect_and_publish(
    store: &Arc<dyn Store>,
    game: &str,
    lobby: &str,
) -> Result<Option<ElectionResult>, StoreError> {
    let Some(result) = store.do_leader_election(game, lobby).await? else {
        return Ok(None);
    };

    if let Some(leader) = &result.leader {
        info!(game, lobby, leader = %leader, term = result.term, "elected new leader");
        let packet = ServerPacket::Leader {
            leader: leader.clone(),
            term: result.term,
        };
        let data = serde_json::to_vec(&packet)?;
        match store.publish(&lobby_topic(game, lobby), &data).await {
            Ok(()) => {}
            // Nobody subscribed locally; fine, reconnecting peers are
            // sent the current leader directly.
            Err(StoreError::NoSuchTopic) => {}
            Err(err) => warn!(error = %err, "failed to publish leader packet"),
        }
    } else {
        info!(game, lobby, term = result.term, "lobby has no electable leader");
    }

    Ok(Some(result))
}
