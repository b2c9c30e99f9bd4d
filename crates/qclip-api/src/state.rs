//! Application state.

use std::sync::Arc;

use qclip_queue::DeliveryQueue;
use qclip_storage::ArtifactStore;

use crate::config::ApiConfig;
use crate::services::{AdmissionService, StatusResolver};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub admission: AdmissionService,
    pub status: StatusResolver,
}

impl AppState {
    /// Wire the services over a store and a queue.
    pub fn new(
        config: ApiConfig,
        store: Arc<dyn ArtifactStore>,
        queue: Arc<dyn DeliveryQueue>,
    ) -> Self {
        let admission = AdmissionService::new(Arc::clone(&store), queue)
            .with_orphan_compensation(config.compensate_orphans);
        let status = StatusResolver::new(store);

        Self {
            config,
            admission,
            status,
        }
    }
}
