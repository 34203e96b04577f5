use crate::aggregator::{AggregationIndex, ContextMap};
use crate::image_reference::ImageProjection;
use crate::workload::ResourceKind;
use std::collections::{BTreeMap, BTreeSet};

/// `(kind, resource name) → containers whose image differs between contexts`.
pub type MismatchSet = BTreeMap<(ResourceKind, String), BTreeSet<String>>;

/// Flags every container whose projected image is not the same in all
/// contexts that run it. Works on the index alone, so changing `projection`
/// never needs a re-fetch.
pub fn detect_mismatches(index: &AggregationIndex, projection: &ImageProjection) -> MismatchSet {
    let mut mismatches = MismatchSet::new();

    for (kind, resource, container, contexts) in index.leaves() {
        if distinct_images(contexts, container, projection).len() != 1 {
            mismatches
                .entry((kind, resource.to_string()))
                .or_default()
                .insert(container.to_string());
        }
    }
    mismatches
}

pub fn is_mismatch(
    mismatches: &MismatchSet,
    kind: ResourceKind,
    resource: &str,
    container: &str,
) -> bool {
    mismatches
        .get(&(kind, resource.to_string()))
        .is_some_and(|containers| containers.contains(container))
}

fn distinct_images(
    contexts: &ContextMap,
    container: &str,
    projection: &ImageProjection,
) -> BTreeSet<String> {
    contexts
        .values()
        .filter_map(|resource| resource.container(container))
        .map(|c| c.image.render(projection))
        .collect()
}
