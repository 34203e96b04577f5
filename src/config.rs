use crate::aggregator::ALL_NAMESPACES;
use crate::image_reference::ImageProjection;
use crate::workload::ResourceKind;
use anyhow::{Context, Result, bail};
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use std::{env, fs, path::Path};
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Falls back to `$KUBECONFIG`, then `~/.kube/config`.
    pub kubeconfig: Option<PathBuf>,
    /// Glob patterns over kubeconfig context names.
    pub contexts: Vec<String>,
    /// Empty means all namespaces.
    pub namespaces: Vec<String>,
    pub resource_kinds: Vec<ResourceKind>,
    pub projection: ImageProjection,
    pub differences_only: bool,
    pub probe_timeout_seconds: u64,
    pub refresh_schedule: String,
    pub webserver: Webserver,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Webserver {
    pub port: u16,
}

impl Default for Webserver {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            contexts: vec!["*".to_string()],
            namespaces: Vec::new(),
            resource_kinds: ResourceKind::ALL.to_vec(),
            projection: ImageProjection::default(),
            differences_only: false,
            probe_timeout_seconds: 2,
            refresh_schedule: "*/30 * * * * *".to_string(),
            webserver: Webserver::default(),
        }
    }
}

impl Config {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }

    pub fn kinds(&self) -> BTreeSet<ResourceKind> {
        self.resource_kinds.iter().copied().collect()
    }

    /// Configured namespaces, or the all-namespaces marker when none are set.
    pub fn namespace_selection(&self) -> BTreeSet<String> {
        if self.namespaces.is_empty() {
            BTreeSet::from([ALL_NAMESPACES.to_string()])
        } else {
            self.namespaces.iter().cloned().collect()
        }
    }

    fn context_matcher(&self) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.contexts {
            builder.add(
                Glob::new(pattern)
                    .with_context(|| format!("Invalid context pattern '{}'", pattern))?,
            );
        }
        builder.build().context("Failed to build context matcher")
    }

    /// Context names matching at least one configured pattern.
    pub fn select_contexts(&self, available: &BTreeSet<String>) -> Result<BTreeSet<String>> {
        let matcher = self.context_matcher()?;
        Ok(available
            .iter()
            .filter(|name| matcher.is_match(name.as_str()))
            .cloned()
            .collect())
    }

    pub fn validate(&self) -> Result<()> {
        if self.resource_kinds.is_empty() {
            bail!("resourceKinds must contain at least one of DaemonSet, Deployment, StatefulSet");
        }
        if self.contexts.is_empty() {
            bail!("contexts must contain at least one pattern");
        }
        if self.probe_timeout_seconds == 0 {
            bail!("probeTimeoutSeconds must be greater than zero");
        }
        self.context_matcher()?;
        Ok(())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    info!("Loading config from file {}", path.as_ref().display());
    let yaml_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&yaml_str)?;

    let config: Config = serde_yaml_ng::from_str(&expanded)
        .context("Failed to parse YAML config after environment variable expansion")?;
    config.validate()?;

    Ok(config)
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_config_or_default<P: AsRef<Path>>(path: P) -> Result<Config> {
    if path.as_ref().exists() {
        load_config(path)
    } else {
        info!(
            "Config file {} not found, using defaults",
            path.as_ref().display()
        );
        Ok(Config::default())
    }
}

/// Replaces `${VAR}` placeholders with environment variables values.
/// Returns an error naming every variable that is not set.
fn expand_env_vars(input: &str) -> Result<String> {
    let re =
        Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    let mut missing = Vec::new();
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| {
            missing.push(var_name.to_string());
            String::new()
        })
    });
    if !missing.is_empty() {
        bail!("Missing environment variable: {}", missing.join(", "));
    }

    Ok(result.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn names(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_expand_env_vars_success() {
        unsafe {
            env::set_var("KDIFF_TEST_VAR", "value123");
        }
        let input = "This is a test: ${KDIFF_TEST_VAR}";
        let expanded = expand_env_vars(input).expect("Expansion should succeed");
        assert_eq!(expanded, "This is a test: value123");
        unsafe {
            env::remove_var("KDIFF_TEST_VAR");
        }
    }

    #[test]
    fn test_expand_env_vars_missing_var() {
        let input = "This will fail: ${KDIFF_MISSING_VAR}";
        let error = expand_env_vars(input).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Missing environment variable: KDIFF_MISSING_VAR"
        );
    }

    #[test]
    fn test_expand_env_vars_no_vars() {
        let input = "No variables here";
        let expanded = expand_env_vars(input).expect("Expansion should succeed");
        assert_eq!(expanded, input);
    }

    #[test]
    fn test_load_config_file() {
        unsafe {
            env::set_var("KDIFF_TEST_KUBECONFIG", "/tmp/kubeconfig");
        }
        let yaml_content = r#"
        kubeconfig: ${KDIFF_TEST_KUBECONFIG}
        contexts: ["prod-*", "staging"]
        namespaces: [shop, payments]
        resourceKinds: [Deployment, StatefulSet]
        projection:
          registry: false
          digest: true
        differencesOnly: true
        probeTimeoutSeconds: 5
        refreshSchedule: "0 * * * * *"
        webserver:
          port: 9090
        "#;

        let tmp_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        let path = tmp_file.path();
        fs::write(path, yaml_content).expect("Failed to write to temp file");

        let config = load_config(path).expect("Should load config");

        assert_eq!(config.kubeconfig, Some(PathBuf::from("/tmp/kubeconfig")));
        assert_eq!(config.contexts, vec!["prod-*", "staging"]);
        assert_eq!(config.namespace_selection(), names(&["payments", "shop"]));
        assert_eq!(
            config.kinds(),
            BTreeSet::from([ResourceKind::Deployment, ResourceKind::StatefulSet])
        );
        assert_eq!(
            config.projection,
            ImageProjection {
                registry: false,
                name: true,
                tag: true,
                digest: true,
            }
        );
        assert!(config.differences_only);
        assert_eq!(config.probe_timeout(), Duration::from_secs(5));
        assert_eq!(config.refresh_schedule, "0 * * * * *");
        assert_eq!(config.webserver.port, 9090);
        unsafe {
            env::remove_var("KDIFF_TEST_KUBECONFIG");
        }
    }

    #[test]
    fn test_defaults() {
        let config = load_config_or_default("/nonexistent/kdiff/config.yaml").unwrap();

        assert_eq!(config.kubeconfig, None);
        assert_eq!(config.namespace_selection(), names(&[""]));
        assert_eq!(config.kinds().len(), 3);
        assert_eq!(config.projection, ImageProjection::default());
        assert_eq!(config.probe_timeout(), Duration::from_secs(2));
        assert_eq!(config.webserver.port, 8080);
        config.validate().unwrap();
    }

    #[test]
    fn test_select_contexts_by_pattern() {
        let config = Config {
            contexts: vec!["prod-*".to_string(), "staging".to_string()],
            ..Config::default()
        };

        let selected = config
            .select_contexts(&names(&["dev", "prod-eu", "prod-us", "staging", "staging-2"]))
            .unwrap();

        assert_eq!(selected, names(&["prod-eu", "prod-us", "staging"]));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let no_kinds = Config {
            resource_kinds: vec![],
            ..Config::default()
        };
        assert!(no_kinds.validate().is_err());

        let zero_timeout = Config {
            probe_timeout_seconds: 0,
            ..Config::default()
        };
        assert!(zero_timeout.validate().is_err());

        let bad_pattern = Config {
            contexts: vec!["prod-[".to_string()],
            ..Config::default()
        };
        assert!(bad_pattern.validate().is_err());
    }
}
