use crate::auth::AuthManager;
use crate::config::Config;
use crate::hub::BroadcastHub;
use crate::queue::{QueuePublisher, SubmissionForwarder};
use std::sync::Arc;

/// Application context containing shared dependencies
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub auth_manager: Arc<AuthManager>,
    pub forwarder: Arc<SubmissionForwarder>,
    pub hub: Arc<BroadcastHub>,
}

impl AppContext {
    /// Creates a new application context
    pub fn new(
        config: Arc<Config>,
        auth_manager: Arc<AuthManager>,
        forwarder: Arc<SubmissionForwarder>,
        hub: Arc<BroadcastHub>,
    ) -> Self {
        Self {
            config,
            auth_manager,
            forwarder,
            hub,
        }
    }

    /// Wire every component from the configuration and a connected queue backend
    pub fn from_config(config: Config, publisher: Arc<dyn QueuePublisher>) -> Self {
        let auth_manager = Arc::new(AuthManager::from_config(&config));
        let forwarder = Arc::new(SubmissionForwarder::new(publisher, &config.queue));
        let hub = Arc::new(BroadcastHub::new(config.hub.clone()));

        Self::new(Arc::new(config), auth_manager, forwarder, hub)
    }
}
