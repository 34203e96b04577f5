use crate::aggregator::{AggregationIndex, Aggregator, list_namespaces_for_contexts};
use crate::diff::detect_mismatches;
use crate::fetcher::ResourceFetcher;
use crate::prober;
use crate::state::{AppContext, Snapshot};
use anyhow::{Context, bail};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs one full cycle (reload, probe, discover namespaces, aggregate) and
/// publishes the resulting snapshot. Every context is probed, only reachable
/// ones matching the configured patterns are aggregated. Returns `None` when a
/// cycle is already running.
pub async fn run(ctx: &AppContext) -> anyhow::Result<Option<Arc<Snapshot>>> {
    let Ok(_guard) = ctx.refresh_lock().try_lock() else {
        info!("Previous refresh still running, skipping");
        return Ok(None);
    };

    ctx.source
        .reload()
        .await
        .context("Failed to reload kubeconfig")?;

    let available = ctx.source.list_context_names();
    let selected = ctx.config.select_contexts(&available)?;
    if selected.is_empty() {
        bail!(
            "None of the {} kubeconfig contexts match {:?}",
            available.len(),
            ctx.config.contexts
        );
    }

    let probes = prober::probe_contexts(
        ctx.source.as_ref(),
        Arc::clone(&ctx.cluster),
        ctx.config.probe_timeout(),
    )
    .await;
    let reachable: BTreeSet<String> = probes
        .iter()
        .filter(|p| p.reachable && selected.contains(&p.name))
        .map(|p| p.name.clone())
        .collect();

    let (index, failures) = if reachable.is_empty() {
        warn!("No reachable contexts among {}", selected.len());
        (AggregationIndex::default(), Vec::new())
    } else {
        let namespaces = ctx.config.namespace_selection();
        let mut aggregator = Aggregator::new(ResourceFetcher::new(Arc::clone(&ctx.cluster)));
        if !ctx.config.namespaces.is_empty() {
            let discovery =
                list_namespaces_for_contexts(Arc::clone(&ctx.cluster), &reachable).await;
            if discovery.is_complete() {
                aggregator = aggregator.with_known_namespaces(discovery.namespaces);
            } else {
                warn!(
                    "Namespace discovery failed for {:?}, listing each selected namespace separately",
                    discovery.failed_contexts
                );
            }
        }
        aggregator
            .aggregate(&ctx.config.kinds(), &reachable, &namespaces)
            .await?
    };

    let mismatches = detect_mismatches(&index, &ctx.config.projection);
    info!(
        "Refresh complete: {} of {} selected contexts reachable, {} resources with differing images, {} failed fetches",
        reachable.len(),
        selected.len(),
        mismatches.len(),
        failures.len()
    );

    let snapshot = Arc::new(Snapshot {
        generated_at: Utc::now(),
        probes,
        contexts: reachable.into_iter().collect(),
        index,
        failures,
    });
    ctx.publish(Arc::clone(&snapshot)).await;
    Ok(Some(snapshot))
}
