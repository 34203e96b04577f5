use crate::cluster::ClusterClient;
use crate::fetcher::{FetchError, ResourceFetcher, WorkloadResource};
use crate::workload::ResourceKind;
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Namespace value meaning "every namespace".
pub const ALL_NAMESPACES: &str = "";

/// Context name → the resource that context holds.
pub type ContextMap = BTreeMap<String, Arc<WorkloadResource>>;

pub type ContainerMap = BTreeMap<String, ContextMap>;
type ResourceMap = BTreeMap<String, ContainerMap>;

/// `kind → resource name → container name → context → resource`.
///
/// Keys are kept sorted, so two indexes built from the same data compare equal
/// and iterate identically regardless of fetch completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationIndex {
    kinds: BTreeMap<ResourceKind, ResourceMap>,
}

impl AggregationIndex {
    /// Files `resource` under each of its containers. Returns `true` when this
    /// replaced a different resource of the same kind and name in the same
    /// context. The replaced resource is evicted from all of its containers,
    /// so one context never mixes two resources under one name.
    pub fn insert(
        &mut self,
        kind: ResourceKind,
        context: &str,
        resource: Arc<WorkloadResource>,
    ) -> bool {
        if resource.containers.is_empty() {
            return false;
        }
        let containers = self
            .kinds
            .entry(kind)
            .or_default()
            .entry(resource.name.clone())
            .or_default();

        let previous = containers
            .values()
            .find_map(|contexts| contexts.get(context))
            .cloned();
        let replaced = match previous {
            Some(previous) if !Arc::ptr_eq(&previous, &resource) => {
                for container in &previous.containers {
                    let emptied = match containers.get_mut(&container.name) {
                        Some(contexts) => {
                            contexts.remove(context);
                            contexts.is_empty()
                        }
                        None => false,
                    };
                    if emptied {
                        containers.remove(&container.name);
                    }
                }
                true
            }
            _ => false,
        };

        for container in &resource.containers {
            containers
                .entry(container.name.clone())
                .or_default()
                .insert(context.to_string(), Arc::clone(&resource));
        }
        replaced
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn get(&self, kind: ResourceKind, resource: &str, container: &str) -> Option<&ContextMap> {
        self.kinds.get(&kind)?.get(resource)?.get(container)
    }

    /// Every `(kind, resource, container, contexts)` leaf in key order.
    pub fn leaves(&self) -> impl Iterator<Item = (ResourceKind, &str, &str, &ContextMap)> {
        self.kinds.iter().flat_map(|(kind, resources)| {
            resources.iter().flat_map(move |(resource, containers)| {
                containers.iter().map(move |(container, contexts)| {
                    (*kind, resource.as_str(), container.as_str(), contexts)
                })
            })
        })
    }
}

/// A single (kind, context, namespace) fetch that failed during aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialFailure {
    pub kind: ResourceKind,
    pub context: String,
    pub namespace: String,
    pub error: FetchError,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("at least one resource kind must be selected")]
    NoKinds,
    #[error("at least one context must be selected")]
    NoContexts,
    #[error("at least one namespace must be selected, use \"\" for all namespaces")]
    NoNamespaces,
}

#[derive(Clone)]
pub struct Aggregator {
    fetcher: ResourceFetcher,
    known_namespaces: BTreeSet<String>,
}

impl Aggregator {
    pub fn new(fetcher: ResourceFetcher) -> Self {
        Self {
            fetcher,
            known_namespaces: BTreeSet::new(),
        }
    }

    /// Namespaces known to exist in the active contexts. Selecting all of them
    /// collapses the fan-out to a single all-namespaces call per kind and context.
    pub fn with_known_namespaces(mut self, namespaces: BTreeSet<String>) -> Self {
        self.known_namespaces = namespaces;
        self
    }

    fn effective_namespaces(&self, namespaces: &BTreeSet<String>) -> Vec<String> {
        if !self.known_namespaces.is_empty() && namespaces.is_superset(&self.known_namespaces) {
            vec![ALL_NAMESPACES.to_string()]
        } else {
            namespaces.iter().cloned().collect()
        }
    }

    /// Fetches every kind × context × namespace combination concurrently and
    /// folds the results into one index once all of them have finished.
    ///
    /// If the same kind and name shows up twice for a context (e.g. across two
    /// namespaces), the one dispatched later wins.
    pub async fn aggregate(
        &self,
        kinds: &BTreeSet<ResourceKind>,
        contexts: &BTreeSet<String>,
        namespaces: &BTreeSet<String>,
    ) -> Result<(AggregationIndex, Vec<PartialFailure>), AggregateError> {
        if kinds.is_empty() {
            return Err(AggregateError::NoKinds);
        }
        if contexts.is_empty() {
            return Err(AggregateError::NoContexts);
        }
        if namespaces.is_empty() {
            return Err(AggregateError::NoNamespaces);
        }

        let namespaces = self.effective_namespaces(namespaces);
        let mut targets = Vec::with_capacity(kinds.len() * contexts.len() * namespaces.len());
        for kind in kinds {
            for context in contexts {
                for namespace in &namespaces {
                    targets.push((*kind, context.clone(), namespace.clone()));
                }
            }
        }
        info!(
            "Fetching {} combinations of {} kinds, {} contexts and {} namespaces",
            targets.len(),
            kinds.len(),
            contexts.len(),
            namespaces.len()
        );

        let handles = targets.iter().map(|(kind, context, namespace)| {
            let fetcher = self.fetcher.clone();
            let (kind, context, namespace) = (*kind, context.clone(), namespace.clone());
            tokio::spawn(async move { fetcher.fetch(kind, &context, &namespace).await })
        });
        let results = join_all(handles).await;

        let mut index = AggregationIndex::default();
        let mut failures = Vec::new();
        for ((kind, context, namespace), joined) in targets.into_iter().zip(results) {
            let result = joined.unwrap_or_else(|e| Err(FetchError::Task(e.to_string())));
            match result {
                Ok(resources) => {
                    for resource in resources {
                        let name = resource.name.clone();
                        if index.insert(kind, &context, Arc::new(resource)) {
                            warn!(
                                "{} {} appears more than once in context {}, keeping the one from namespace '{}'",
                                kind, name, context, namespace
                            );
                        }
                    }
                }
                Err(error) => {
                    warn!(
                        "Failed to fetch {} from context {} namespace '{}': {}",
                        kind, context, namespace, error
                    );
                    failures.push(PartialFailure {
                        kind,
                        context,
                        namespace,
                        error,
                    });
                }
            }
        }

        Ok((index, failures))
    }
}

/// Namespaces found across a set of contexts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceDiscovery {
    pub namespaces: BTreeSet<String>,
    /// Contexts whose namespaces could not be listed.
    pub failed_contexts: BTreeSet<String>,
}

impl NamespaceDiscovery {
    /// `true` when every context answered, i.e. `namespaces` is the full known set.
    pub fn is_complete(&self) -> bool {
        self.failed_contexts.is_empty()
    }
}

/// Sorted, de-duplicated union of the namespaces of `contexts`. Contexts that
/// fail to list are logged and recorded in `failed_contexts`.
pub async fn list_namespaces_for_contexts(
    client: Arc<dyn ClusterClient>,
    contexts: &BTreeSet<String>,
) -> NamespaceDiscovery {
    let handles = contexts.iter().map(|context| {
        let client = Arc::clone(&client);
        let context = context.clone();
        tokio::spawn(async move { client.list_namespaces(&context).await })
    });
    let results = join_all(handles).await;

    let mut discovery = NamespaceDiscovery::default();
    for (context, joined) in contexts.iter().zip(results) {
        match joined {
            Ok(Ok(found)) => {
                discovery.namespaces.extend(found);
                continue;
            }
            Ok(Err(e)) => warn!("Failed to list namespaces in context {}: {}", context, e),
            Err(e) => warn!("Namespace listing task for context {} failed: {}", context, e),
        }
        discovery.failed_contexts.insert(context.clone());
    }
    discovery
}
