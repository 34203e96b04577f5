use crate::workload::{RawWorkload, ResourceKind};
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

/// Connection handle produced by a [`ContextSource`].
pub type ClusterHandle = kube::Client;

static TRANSPORT_ERROR_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^Get "(.*)": (.*)$"#).expect("static regex is valid"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    #[error("cluster unreachable: {0}")]
    Unreachable(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("cannot resolve connection for context {context}: {message}")]
    Config { context: String, message: String },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl ClusterError {
    pub fn config(context: &str, message: impl ToString) -> Self {
        ClusterError::Config {
            context: context.to_string(),
            message: message.to_string(),
        }
    }

    /// Short message for display, without the `Get "<url>": ` prefix that
    /// transport errors carry.
    pub fn summary(&self) -> String {
        let message = match self {
            ClusterError::Unreachable(m) | ClusterError::Auth(m) | ClusterError::NotFound(m) => {
                m.clone()
            }
            other => return other.to_string(),
        };
        match TRANSPORT_ERROR_PREFIX.captures(&message) {
            Some(caps) => caps[2].to_string(),
            None => message,
        }
    }
}

impl From<kube::Error> for ClusterError {
    fn from(error: kube::Error) -> Self {
        match &error {
            kube::Error::Api(response) => match response.code {
                401 | 403 => ClusterError::Auth(response.message.clone()),
                404 => ClusterError::NotFound(response.message.clone()),
                _ => ClusterError::Unreachable(error.to_string()),
            },
            _ => ClusterError::Unreachable(error.to_string()),
        }
    }
}

/// Read access to the clusters behind each context.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn list_namespaces(&self, context: &str) -> Result<Vec<String>, ClusterError>;

    /// `namespace == ""` lists across all namespaces.
    async fn list_workloads(
        &self,
        kind: ResourceKind,
        context: &str,
        namespace: &str,
    ) -> Result<Vec<RawWorkload>, ClusterError>;

    /// Implementations must not reuse a cached connection here; `timeout`
    /// bounds connecting and reading on the fresh one.
    async fn server_version(&self, context: &str, timeout: Duration)
    -> Result<String, ClusterError>;
}

/// Where context names and their connections come from.
#[async_trait]
pub trait ContextSource: Send + Sync {
    fn list_context_names(&self) -> BTreeSet<String>;

    async fn resolve_connection(&self, context: &str) -> Result<ClusterHandle, ClusterError>;

    /// Re-reads the underlying configuration and replaces every connection at once.
    async fn reload(&self) -> Result<(), ClusterError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_strips_transport_prefix() {
        let error = ClusterError::Unreachable(
            r#"Get "https://10.0.0.1:6443/version": dial tcp 10.0.0.1:6443: i/o timeout"#
                .to_string(),
        );
        assert_eq!(error.summary(), "dial tcp 10.0.0.1:6443: i/o timeout");
    }

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(
            serde_json::from_value(serde_json::json!({
                "status": "Failure",
                "message": format!("{reason} for test"),
                "reason": reason,
                "code": code,
            }))
            .unwrap(),
        )
    }

    #[test]
    fn test_kube_error_classification() {
        assert_eq!(
            ClusterError::from(api_error(401, "Unauthorized")),
            ClusterError::Auth("Unauthorized for test".to_string())
        );
        assert_eq!(
            ClusterError::from(api_error(403, "Forbidden")),
            ClusterError::Auth("Forbidden for test".to_string())
        );
        assert_eq!(
            ClusterError::from(api_error(404, "NotFound")),
            ClusterError::NotFound("NotFound for test".to_string())
        );
        assert!(matches!(
            ClusterError::from(api_error(500, "InternalError")),
            ClusterError::Unreachable(_)
        ));

        let decode = serde_json::from_str::<u32>("not a number").unwrap_err();
        assert!(matches!(
            ClusterError::from(kube::Error::SerdeError(decode)),
            ClusterError::Unreachable(_)
        ));
    }

    #[test]
    fn test_summary_keeps_other_messages() {
        let error = ClusterError::Auth("Unauthorized".to_string());
        assert_eq!(error.summary(), "Unauthorized");

        let error = ClusterError::Timeout(Duration::from_secs(2));
        assert_eq!(error.summary(), "timed out after 2s");
    }
}
