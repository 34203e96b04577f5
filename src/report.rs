use crate::aggregator::{AggregationIndex, PartialFailure};
use crate::diff::{MismatchSet, is_mismatch};
use crate::image_reference::{ImageProjection, render_image};
use crate::workload::ResourceKind;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub kind: ResourceKind,
    pub resource: String,
    pub container: String,
    /// Rendered image per selected context, `None` where the context lacks the container.
    pub images: BTreeMap<String, Option<String>>,
    pub mismatch: bool,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailureRow {
    pub kind: ResourceKind,
    pub context: String,
    pub namespace: String,
    pub error: String,
}

impl From<&PartialFailure> for FailureRow {
    fn from(failure: &PartialFailure) -> Self {
        Self {
            kind: failure.kind,
            context: failure.context.clone(),
            namespace: failure.namespace.clone(),
            error: failure.error.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub contexts: Vec<String>,
    pub projection: ImageProjection,
    pub rows: Vec<ReportRow>,
    pub failures: Vec<FailureRow>,
}

/// Flattens an index into sorted rows, one column per context.
///
/// With `differences_only`, a resource is kept with all of its container rows
/// as soon as one of them is flagged.
pub fn build_report(
    index: &AggregationIndex,
    mismatches: &MismatchSet,
    failures: &[PartialFailure],
    contexts: &[String],
    projection: ImageProjection,
    differences_only: bool,
) -> Report {
    let rows = index
        .leaves()
        .map(|(kind, resource, container, by_context)| {
            let images = contexts
                .iter()
                .map(|context| {
                    let image = by_context
                        .get(context)
                        .and_then(|r| r.container(container))
                        .map(|c| render_image(&c.image, &projection));
                    (context.clone(), image)
                })
                .collect();
            ReportRow {
                kind,
                resource: resource.to_string(),
                container: container.to_string(),
                images,
                mismatch: is_mismatch(mismatches, kind, resource, container),
            }
        })
        .filter(|row| {
            !differences_only || mismatches.contains_key(&(row.kind, row.resource.clone()))
        })
        .collect();

    Report {
        contexts: contexts.to_vec(),
        projection,
        rows,
        failures: failures.iter().map(FailureRow::from).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterError;
    use crate::diff::detect_mismatches;
    use crate::fetcher::{Container, FetchError, WorkloadResource};
    use crate::image_reference::ImageReference;
    use std::sync::Arc;

    fn resource(name: &str, containers: &[(&str, &str)]) -> Arc<WorkloadResource> {
        Arc::new(WorkloadResource {
            name: name.to_string(),
            containers: containers
                .iter()
                .map(|(name, image)| Container {
                    name: name.to_string(),
                    image: ImageReference::parse(image).unwrap(),
                })
                .collect(),
        })
    }

    fn index() -> AggregationIndex {
        let mut index = AggregationIndex::default();
        index.insert(
            ResourceKind::Deployment,
            "prod",
            resource("web", &[("app", "ghcr.io/acme/app:v2"), ("proxy", "envoy:1.30")]),
        );
        index.insert(
            ResourceKind::Deployment,
            "stage",
            resource("web", &[("app", "ghcr.io/acme/app:v3"), ("proxy", "envoy:1.30")]),
        );
        index.insert(ResourceKind::DaemonSet, "stage", resource("agent", &[("agent", "agent:1")]));
        index
    }

    fn contexts() -> Vec<String> {
        vec!["prod".to_string(), "stage".to_string()]
    }

    #[test]
    fn test_report_rows_are_sorted_and_flagged() {
        let index = index();
        let projection = ImageProjection::default();
        let mismatches = detect_mismatches(&index, &projection);

        let report = build_report(&index, &mismatches, &[], &contexts(), projection, false);

        let keys: Vec<_> = report
            .rows
            .iter()
            .map(|r| (r.kind, r.resource.as_str(), r.container.as_str(), r.mismatch))
            .collect();
        assert_eq!(
            keys,
            vec![
                (ResourceKind::DaemonSet, "agent", "agent", false),
                (ResourceKind::Deployment, "web", "app", true),
                (ResourceKind::Deployment, "web", "proxy", false),
            ]
        );
        assert_eq!(report.rows[0].images["prod"], None);
        assert_eq!(report.rows[1].images["stage"].as_deref(), Some("ghcr.io/acme/app:v3"));
    }

    #[test]
    fn test_report_differences_only() {
        let index = index();
        let projection = ImageProjection::default();
        let mismatches = detect_mismatches(&index, &projection);
        let failures = vec![PartialFailure {
            kind: ResourceKind::StatefulSet,
            context: "prod".to_string(),
            namespace: String::new(),
            error: FetchError::Cluster(ClusterError::Auth("forbidden".to_string())),
        }];

        let report = build_report(&index, &mismatches, &failures, &contexts(), projection, true);

        let rows: Vec<_> = report
            .rows
            .iter()
            .map(|r| (r.resource.as_str(), r.container.as_str(), r.mismatch))
            .collect();
        assert_eq!(rows, vec![("web", "app", true), ("web", "proxy", false)]);
        assert_eq!(
            report.failures,
            vec![FailureRow {
                kind: ResourceKind::StatefulSet,
                context: "prod".to_string(),
                namespace: String::new(),
                error: "authentication failed: forbidden".to_string(),
            }]
        );
    }
}
