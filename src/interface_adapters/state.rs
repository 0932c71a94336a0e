use std::sync::Arc;

use crate::domain::Store;
use crate::interface_adapters::clients::metrics::MetricsClient;
use crate::interface_adapters::clients::turn::CredentialsClient;

#[derive(Clone)]
pub struct AppState {
    // We use Arc<dyn Trait> to hold either store backend (dependency injection).
    pub store: Arc<dyn Store>,
    // Cached TURN credential bundle, refreshed in the background.
    pub credentials: Arc<CredentialsClient>,
    // Fire-and-forget analytics sink.
    pub metrics: MetricsClient,
}
