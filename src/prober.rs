use crate::cluster::{ClusterClient, ClusterError, ContextSource};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextProbe {
    pub name: String,
    pub reachable: bool,
    pub server_version: Option<String>,
    pub error: Option<ClusterError>,
}

/// Serializable form of a [`ContextProbe`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextProbeView {
    pub name: String,
    pub reachable: bool,
    pub server_version: Option<String>,
    pub error: Option<String>,
}

impl From<&ContextProbe> for ContextProbeView {
    fn from(probe: &ContextProbe) -> Self {
        Self {
            name: probe.name.clone(),
            reachable: probe.reachable,
            server_version: probe.server_version.clone(),
            error: probe.error.as_ref().map(ClusterError::summary),
        }
    }
}

impl ContextProbe {
    fn from_result(name: String, result: Result<String, ClusterError>) -> Self {
        match result {
            Ok(version) => Self {
                name,
                reachable: true,
                server_version: Some(version),
                error: None,
            },
            Err(error) => Self {
                name,
                reachable: false,
                server_version: None,
                error: Some(error),
            },
        }
    }
}

/// Probes every context concurrently and waits for all of them.
///
/// Each probe is bounded by `per_probe_timeout`; a failing probe is reported in
/// its own entry and never affects the others. Output is sorted by context name.
pub async fn probe(
    client: Arc<dyn ClusterClient>,
    contexts: &BTreeSet<String>,
    per_probe_timeout: Duration,
) -> Vec<ContextProbe> {
    info!(
        "Probing {} contexts with a timeout of {:?}",
        contexts.len(),
        per_probe_timeout
    );

    let handles = contexts.iter().map(|context| {
        let client = Arc::clone(&client);
        let context = context.clone();
        tokio::spawn(async move {
            let result = match tokio::time::timeout(
                per_probe_timeout,
                client.server_version(&context, per_probe_timeout),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ClusterError::Timeout(per_probe_timeout)),
            };
            ContextProbe::from_result(context, result)
        })
    });
    let joined = join_all(handles).await;

    let mut probes: Vec<ContextProbe> = contexts
        .iter()
        .zip(joined)
        .map(|(context, joined)| {
            joined.unwrap_or_else(|e| {
                ContextProbe::from_result(
                    context.clone(),
                    Err(ClusterError::Unreachable(format!("probe task failed: {e}"))),
                )
            })
        })
        .collect();
    probes.sort_by(|a, b| a.name.cmp(&b.name));

    for probe in probes.iter().filter(|p| !p.reachable) {
        if let Some(error) = &probe.error {
            warn!("Context {} is unreachable: {}", probe.name, error);
        }
    }
    probes
}

/// Probes every context known to `source`.
pub async fn probe_contexts(
    source: &dyn ContextSource,
    client: Arc<dyn ClusterClient>,
    per_probe_timeout: Duration,
) -> Vec<ContextProbe> {
    probe(client, &source.list_context_names(), per_probe_timeout).await
}
