use crate::cluster::{ClusterClient, ClusterError, ClusterHandle, ContextSource};
use crate::workload::{RawWorkload, ResourceKind, Workload};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config, ResourceExt};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Kubeconfig plus one client per context, built together and replaced together.
pub struct ConnectionSet {
    kubeconfig: Kubeconfig,
    clients: BTreeMap<String, Result<Client, ClusterError>>,
}

impl ConnectionSet {
    fn empty() -> Self {
        Self {
            kubeconfig: Kubeconfig::default(),
            clients: BTreeMap::new(),
        }
    }

    pub fn context_names(&self) -> BTreeSet<String> {
        self.clients.keys().cloned().collect()
    }
}

/// Shared context name → client mapping.
///
/// Readers take an `Arc` snapshot, so a concurrent [`ConnectionRegistry::replace`]
/// never changes the connections an in-flight call is using.
pub struct ConnectionRegistry {
    current: RwLock<Arc<ConnectionSet>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self {
            current: RwLock::new(Arc::new(ConnectionSet::empty())),
        }
    }
}

impl ConnectionRegistry {
    pub fn snapshot(&self) -> Arc<ConnectionSet> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn replace(&self, connections: ConnectionSet) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(connections);
    }

    fn client(&self, context: &str) -> Result<Client, ClusterError> {
        match self.snapshot().clients.get(context) {
            Some(client) => client.clone(),
            None => Err(ClusterError::config(context, "context not found in kubeconfig")),
        }
    }
}

pub struct KubeClusterClient {
    kubeconfig_path: Option<PathBuf>,
    registry: ConnectionRegistry,
}

impl KubeClusterClient {
    /// Creates a client and performs the first kubeconfig load.
    pub async fn new(kubeconfig_path: Option<PathBuf>) -> Result<Self, ClusterError> {
        let client = Self {
            kubeconfig_path,
            registry: ConnectionRegistry::default(),
        };
        client.reload().await?;
        Ok(client)
    }

    fn read_kubeconfig(&self) -> Result<Kubeconfig, ClusterError> {
        let kubeconfig = match &self.kubeconfig_path {
            Some(path) => {
                info!("Reading kubeconfig from {}", path.display());
                Kubeconfig::read_from(path)
            }
            None => Kubeconfig::read(),
        };
        kubeconfig.map_err(|e| ClusterError::config("*", e))
    }

    async fn build_client(
        kubeconfig: &Kubeconfig,
        context: &str,
        timeout: Option<Duration>,
    ) -> Result<Client, ClusterError> {
        let mut config = Config::from_custom_kubeconfig(
            kubeconfig.clone(),
            &KubeConfigOptions {
                context: Some(context.to_string()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| ClusterError::config(context, e))?;

        if timeout.is_some() {
            config.connect_timeout = timeout;
            config.read_timeout = timeout;
        }

        Client::try_from(config).map_err(|e| ClusterError::config(context, e))
    }
}

async fn list_workloads_of<K: Workload>(
    client: Client,
    context: &str,
    namespace: &str,
) -> Result<Vec<RawWorkload>, ClusterError> {
    debug!(
        "Listing {} in context {} namespace '{}'",
        K::KIND,
        context,
        namespace
    );
    let api: Api<K> = if namespace.is_empty() {
        Api::all(client)
    } else {
        Api::namespaced(client, namespace)
    };
    let list = api.list(&ListParams::default()).await?;
    Ok(list.items.iter().map(Workload::to_raw).collect())
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_namespaces(&self, context: &str) -> Result<Vec<String>, ClusterError> {
        let api: Api<Namespace> = Api::all(self.resolve_connection(context).await?);
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items.iter().map(|ns| ns.name_any()).collect())
    }

    async fn list_workloads(
        &self,
        kind: ResourceKind,
        context: &str,
        namespace: &str,
    ) -> Result<Vec<RawWorkload>, ClusterError> {
        let client = self.resolve_connection(context).await?;
        match kind {
            ResourceKind::Deployment => {
                list_workloads_of::<Deployment>(client, context, namespace).await
            }
            ResourceKind::StatefulSet => {
                list_workloads_of::<StatefulSet>(client, context, namespace).await
            }
            ResourceKind::DaemonSet => {
                list_workloads_of::<DaemonSet>(client, context, namespace).await
            }
        }
    }

    async fn server_version(
        &self,
        context: &str,
        timeout: Duration,
    ) -> Result<String, ClusterError> {
        // A long-lived client may have gone stale, probe over a fresh one
        let connections = self.registry.snapshot();
        let client = Self::build_client(&connections.kubeconfig, context, Some(timeout)).await?;
        let info = client.apiserver_version().await?;
        Ok(format!("{}.{}", info.major, info.minor))
    }
}

#[async_trait]
impl ContextSource for KubeClusterClient {
    fn list_context_names(&self) -> BTreeSet<String> {
        self.registry.snapshot().context_names()
    }

    async fn resolve_connection(&self, context: &str) -> Result<ClusterHandle, ClusterError> {
        self.registry.client(context)
    }

    async fn reload(&self) -> Result<(), ClusterError> {
        let kubeconfig = self.read_kubeconfig()?;

        let mut clients = BTreeMap::new();
        for named in &kubeconfig.contexts {
            let client = Self::build_client(&kubeconfig, &named.name, None).await;
            if let Err(e) = &client {
                warn!("Skipping context {}: {}", named.name, e);
            }
            clients.insert(named.name.clone(), client);
        }

        info!("Loaded {} contexts from kubeconfig", clients.len());
        self.registry.replace(ConnectionSet {
            kubeconfig,
            clients,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_with_contexts(names: &[&str]) -> ConnectionSet {
        ConnectionSet {
            kubeconfig: Kubeconfig::default(),
            clients: names
                .iter()
                .map(|n| (n.to_string(), Err(ClusterError::config(n, "not built"))))
                .collect(),
        }
    }

    #[test]
    fn test_registry_replace_swaps_whole_set() {
        let registry = ConnectionRegistry::default();
        registry.replace(set_with_contexts(&["a", "b"]));

        let before = registry.snapshot();
        registry.replace(set_with_contexts(&["c"]));

        assert_eq!(
            before.context_names(),
            BTreeSet::from(["a".to_string(), "b".to_string()])
        );
        assert_eq!(
            registry.snapshot().context_names(),
            BTreeSet::from(["c".to_string()])
        );
    }

    #[test]
    fn test_registry_unknown_context_is_config_error() {
        let registry = ConnectionRegistry::default();
        assert!(matches!(
            registry.client("missing"),
            Err(ClusterError::Config { .. })
        ));
    }

    #[tokio::test]
    async fn test_reload_reads_contexts_from_kubeconfig() {
        let kubeconfig = r#"
apiVersion: v1
kind: Config
clusters:
  - name: east
    cluster:
      server: https://127.0.0.1:6443
  - name: west
    cluster:
      server: https://127.0.0.2:6443
users:
  - name: admin
    user:
      token: abc
contexts:
  - name: prod-west
    context: { cluster: west, user: admin }
  - name: prod-east
    context: { cluster: east, user: admin }
current-context: prod-east
"#;
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), kubeconfig).unwrap();

        let client = KubeClusterClient::new(Some(file.path().to_path_buf()))
            .await
            .unwrap();

        assert_eq!(
            client.list_context_names(),
            BTreeSet::from(["prod-east".to_string(), "prod-west".to_string()])
        );
        assert!(client.resolve_connection("prod-west").await.is_ok());
        assert!(matches!(
            client.resolve_connection("staging").await,
            Err(ClusterError::Config { .. })
        ));
    }
}
