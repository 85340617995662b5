//! Configuration for the sync engine.

use gardensync_core::InstanceUrl;

/// Configuration for bidirectional reconciliation between two instances.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Address of the local instance.
    pub local_url: InstanceUrl,
    /// Address of the target instance.
    pub target_url: InstanceUrl,
    /// How many entities are written per batch within a sweep.
    pub page_size: usize,
}

impl SyncConfig {
    /// Creates a configuration for a pair of instances.
    pub fn new(local_url: impl Into<InstanceUrl>, target_url: impl Into<InstanceUrl>) -> Self {
        Self {
            local_url: local_url.into(),
            target_url: target_url.into(),
            page_size: 100,
        }
    }

    /// Sets the write batch size.
    #[must_use]
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }
}
