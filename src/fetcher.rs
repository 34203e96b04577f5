use crate::cluster::{ClusterClient, ClusterError};
use crate::image_reference::{ImageReference, ParseError};
use crate::workload::{RawWorkload, ResourceKind};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub name: String,
    pub image: ImageReference,
}

/// One workload as fetched from one (context, namespace).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadResource {
    pub name: String,
    pub containers: Vec<Container>,
}

impl WorkloadResource {
    pub fn container(&self, name: &str) -> Option<&Container> {
        self.containers.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error("container {container} of {resource}: {source}")]
    ImageParse {
        resource: String,
        container: String,
        #[source]
        source: ParseError,
    },
    #[error("fetch task failed: {0}")]
    Task(String),
}

/// Lists workloads through a [`ClusterClient`] and parses every container image.
#[derive(Clone)]
pub struct ResourceFetcher {
    client: Arc<dyn ClusterClient>,
}

impl ResourceFetcher {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    /// Fails as a whole if any single image cannot be parsed.
    pub async fn fetch(
        &self,
        kind: ResourceKind,
        context: &str,
        namespace: &str,
    ) -> Result<Vec<WorkloadResource>, FetchError> {
        let raw = self.client.list_workloads(kind, context, namespace).await?;
        debug!(
            "Fetched {} {} from context {} namespace '{}'",
            raw.len(),
            kind,
            context,
            namespace
        );
        raw.into_iter().map(to_workload_resource).collect()
    }
}

fn to_workload_resource(raw: RawWorkload) -> Result<WorkloadResource, FetchError> {
    let containers = raw
        .containers
        .into_iter()
        .map(|c| match ImageReference::parse(&c.image) {
            Ok(image) => Ok(Container {
                name: c.name,
                image,
            }),
            Err(source) => Err(FetchError::ImageParse {
                resource: raw.name.clone(),
                container: c.name,
                source,
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(WorkloadResource {
        name: raw.name,
        containers,
    })
}
