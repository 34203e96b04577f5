use crate::aggregator::{AggregationIndex, PartialFailure};
use crate::cluster::{ClusterClient, ContextSource};
use crate::config::Config;
use crate::prober::ContextProbe;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Result of one refresh cycle. Replaced wholesale by the next one.
#[derive(Debug)]
pub struct Snapshot {
    pub generated_at: DateTime<Utc>,
    pub probes: Vec<ContextProbe>,
    /// Reachable, selected contexts that were aggregated, sorted.
    pub contexts: Vec<String>,
    pub index: AggregationIndex,
    pub failures: Vec<PartialFailure>,
}

#[derive(Clone)]
pub struct AppContext {
    pub(crate) config: Arc<Config>,
    pub(crate) source: Arc<dyn ContextSource>,
    pub(crate) cluster: Arc<dyn ClusterClient>,
    snapshot: Arc<RwLock<Option<Arc<Snapshot>>>>,
    refresh_lock: Arc<Mutex<()>>,
}

impl AppContext {
    pub fn new(
        config: Arc<Config>,
        source: Arc<dyn ContextSource>,
        cluster: Arc<dyn ClusterClient>,
    ) -> Self {
        Self {
            config,
            source,
            cluster,
            snapshot: Arc::new(RwLock::new(None)),
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn latest(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.read().await.clone()
    }

    pub async fn publish(&self, snapshot: Arc<Snapshot>) {
        *self.snapshot.write().await = Some(snapshot);
    }

    pub fn refresh_lock(&self) -> &Mutex<()> {
        &self.refresh_lock
    }
}
