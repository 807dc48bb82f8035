use std::sync::Arc;

use intake_core::config::Config;
use intake_notify::{StatusService, SubscriberHub};
use intake_queue::{ConsumerMetrics, QueueHandle};
use intake_storage::Stores;

pub struct AppState {
    pub config: Config,
    pub stores: Stores,
    /// Publishes ingestion messages for accepted uploads.
    pub gateway: QueueHandle,
    pub hub: SubscriberHub,
    pub status: StatusService,
    /// Counters of the notification consumer, when this process runs one.
    pub relay: Option<Arc<ConsumerMetrics>>,
}

impl AppState {
    pub fn new(config: Config, stores: Stores, gateway: QueueHandle, hub: SubscriberHub) -> Self {
        let status = StatusService::new(stores.jobs.clone());
        Self {
            config,
            stores,
            gateway,
            hub,
            status,
            relay: None,
        }
    }

    pub fn with_relay(mut self, metrics: Arc<ConsumerMetrics>) -> Self {
        self.relay = Some(metrics);
        self
    }
}
