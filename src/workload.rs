use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::PodSpec;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    DaemonSet,
    Deployment,
    StatefulSet,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::DaemonSet,
        ResourceKind::Deployment,
        ResourceKind::StatefulSet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::DaemonSet => "DaemonSet",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::StatefulSet => "StatefulSet",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Container as declared in a workload's pod template, image still unparsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawContainer {
    pub name: String,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawWorkload {
    pub name: String,
    pub containers: Vec<RawContainer>,
}

#[cfg(test)]
impl RawWorkload {
    pub fn new(name: impl Into<String>, containers: &[(&str, &str)]) -> Self {
        Self {
            name: name.into(),
            containers: containers
                .iter()
                .map(|(name, image)| RawContainer {
                    name: name.to_string(),
                    image: image.to_string(),
                })
                .collect(),
        }
    }
}

pub trait Workload
where
    Self: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Send
        + Sync
        + DeserializeOwned
        + 'static,
{
    const KIND: ResourceKind;

    fn pod_spec(&self) -> Option<&PodSpec>;

    /// Name plus the template's containers. Init containers are not compared.
    fn to_raw(&self) -> RawWorkload {
        let containers = self
            .pod_spec()
            .map(|ps| {
                ps.containers
                    .iter()
                    .map(|c| RawContainer {
                        name: c.name.clone(),
                        image: c.image.clone().unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        RawWorkload {
            name: self.name_any(),
            containers,
        }
    }
}

impl Workload for Deployment {
    const KIND: ResourceKind = ResourceKind::Deployment;

    fn pod_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref().and_then(|s| s.template.spec.as_ref())
    }
}

impl Workload for StatefulSet {
    const KIND: ResourceKind = ResourceKind::StatefulSet;

    fn pod_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref().and_then(|s| s.template.spec.as_ref())
    }
}

impl Workload for DaemonSet {
    const KIND: ResourceKind = ResourceKind::DaemonSet;

    fn pod_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref().and_then(|s| s.template.spec.as_ref())
    }
}
