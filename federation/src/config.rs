use identity::oauth::OAuthConfig;
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;
use url::Url;

/// Cluster id that resolves to the first configured cluster.
pub const DEFAULT_CLUSTER: &str = ".default";

pub fn default_job_priority() -> i64 {
    100
}

fn default_upstream_timeout_secs() -> u64 {
    30
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    Load(#[from] std::io::Error),

    #[error("could not parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("port cannot be 0")]
    InvalidPort,

    #[error("no clusters configured")]
    NoClusters,

    #[error("invalid cluster id: {0:?}")]
    InvalidClusterId(String),

    #[error("master_secret must not be empty")]
    EmptyMasterSecret,

    #[error("signing_key must not be empty")]
    EmptySigningKey,
}

/// Gateway configuration, loaded once at startup and shared read-only.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub listener: Listener,
    /// Cluster id to per-cluster settings. Order matters: the first entry
    /// is what `.default` resolves to.
    pub clusters: IndexMap<String, ClusterConfig>,
    /// Shared secret for derived tokens.
    pub master_secret: String,
    /// Key for signing cookie credentials.
    pub signing_key: String,
    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,
    #[serde(default = "default_job_priority")]
    pub default_job_priority: i64,
    #[serde(default)]
    pub oauth: Option<OAuthConfig>,
    /// Directory service resolving emails to uid/gid/groups.
    #[serde(default)]
    pub directory_url: Option<Url>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ClusterConfig {
    /// Base URL of the cluster's REST API.
    pub api_url: Url,
    /// Presentation settings passed through to the frontend untouched.
    #[serde(default)]
    pub display: HashMap<String, serde_json::Value>,
}

/// One configured cluster, resolved by id.
#[derive(Clone, Debug)]
pub struct ClusterDescriptor {
    pub id: String,
    pub base_url: Url,
    pub display: HashMap<String, serde_json::Value>,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listener.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.clusters.is_empty() {
            return Err(ConfigError::NoClusters);
        }
        for id in self.clusters.keys() {
            if id.is_empty() || id == DEFAULT_CLUSTER {
                return Err(ConfigError::InvalidClusterId(id.clone()));
            }
        }
        if self.master_secret.is_empty() {
            return Err(ConfigError::EmptyMasterSecret);
        }
        if self.signing_key.is_empty() {
            return Err(ConfigError::EmptySigningKey);
        }
        Ok(())
    }

    /// Resolve a cluster id from a request path. `.default` is the first
    /// configured cluster.
    pub fn cluster(&self, id: &str) -> Option<ClusterDescriptor> {
        let (id, cluster) = if id == DEFAULT_CLUSTER {
            self.clusters.first()?
        } else {
            self.clusters.get_key_value(id)?
        };
        Some(ClusterDescriptor {
            id: id.clone(),
            base_url: cluster.api_url.clone(),
            display: cluster.display.clone(),
        })
    }

    /// All clusters in configuration order.
    pub fn descriptors(&self) -> Vec<ClusterDescriptor> {
        self.clusters
            .iter()
            .map(|(id, cluster)| ClusterDescriptor {
                id: id.clone(),
                base_url: cluster.api_url.clone(),
                display: cluster.display.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).unwrap()
    }

    const VALID_YAML: &str = r#"
listener:
    host: "0.0.0.0"
    port: 3081
clusters:
    universe:
        api_url: "http://universe.example.com/"
        display:
            grafana: "http://grafana.universe.example.com/"
    titan:
        api_url: "http://titan.example.com/"
master_secret: "master"
signing_key: "sign"
"#;

    #[test]
    fn parses_valid_config() {
        let config = parse(VALID_YAML);
        assert!(config.validate().is_ok());
        assert_eq!(config.listener.port, 3081);
        assert_eq!(config.clusters.len(), 2);
        assert_eq!(config.upstream_timeout_secs, 30);
        assert_eq!(config.default_job_priority, 100);
        assert!(config.oauth.is_none());
    }

    #[test]
    fn default_cluster_is_first_configured() {
        let config = parse(VALID_YAML);
        let default = config.cluster(DEFAULT_CLUSTER).unwrap();
        assert_eq!(default.id, "universe");
        assert_eq!(default.base_url.as_str(), "http://universe.example.com/");

        let titan = config.cluster("titan").unwrap();
        assert_eq!(titan.id, "titan");

        assert!(config.cluster("unknown").is_none());
    }

    #[test]
    fn descriptors_preserve_configuration_order() {
        let config = parse(VALID_YAML);
        let ids: Vec<String> = config.descriptors().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["universe".to_string(), "titan".to_string()]);
    }

    #[test]
    fn validation_errors() {
        let mut config = parse(VALID_YAML);
        config.listener.port = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::InvalidPort
        ));

        let mut config = parse(VALID_YAML);
        config.clusters.clear();
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::NoClusters
        ));

        let mut config = parse(VALID_YAML);
        config.master_secret.clear();
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::EmptyMasterSecret
        ));

        let mut config = parse(VALID_YAML);
        config.signing_key.clear();
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::EmptySigningKey
        ));
    }

    #[test]
    fn rejects_reserved_cluster_id() {
        let yaml = r#"
listener: {host: "0.0.0.0", port: 3081}
clusters:
    ".default":
        api_url: "http://universe.example.com/"
master_secret: "master"
signing_key: "sign"
"#;
        let config = parse(yaml);
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::InvalidClusterId(_)
        ));
    }

    #[test]
    fn rejects_invalid_api_url() {
        assert!(
            serde_yaml::from_str::<Config>(
                r#"
listener: {host: "0.0.0.0", port: 3081}
clusters:
    universe: {api_url: "not-a-url"}
master_secret: "master"
signing_key: "sign"
"#
            )
            .is_err()
        );
    }
}
