//! Command-line configuration.
//!
//! Settings are loaded from a TOML file, then overridden by CLI arguments.

use multihost_core::Subnet;
use multihost_orchestrator::ProviderConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for `multihost-ctl`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CtlConfig {
    /// The overlay to build.
    pub network: NetworkSection,

    /// Settings for the provider pipeline.
    pub provider: ProviderConfig,

    /// Connectivity check settings.
    pub smoke: SmokeConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// The overlay to build and the hosts it spans.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    /// Network name. Host networks are named `{name}-{n}`.
    pub name: String,

    /// Docker endpoints, e.g. `tcp://10.0.0.1:2375`.
    pub hosts: Vec<String>,

    /// Overlay range in CIDR notation.
    pub subnet: String,

    /// VXLAN port, also used as the VNI.
    pub port: u16,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            name: "multihost".to_string(),
            hosts: Vec::new(),
            subnet: "10.58.0.0/16".to_string(),
            port: 8472,
        }
    }
}

impl NetworkSection {
    /// Parses the overlay range.
    pub fn subnet(&self) -> anyhow::Result<Subnet> {
        self.subnet
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid subnet {}: {}", self.subnet, e))
    }
}

/// Connectivity check configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmokeConfig {
    /// Image for the peer containers. It must ship `ping`.
    pub image: String,

    /// Echo requests per target.
    pub ping_count: u32,

    /// Bound on a single ping run in seconds.
    pub ping_timeout_secs: u64,
}

impl Default for SmokeConfig {
    fn default() -> Self {
        Self {
            image: "praqma/network-multitool".to_string(),
            ping_count: 4,
            ping_timeout_secs: 30,
        }
    }
}

impl SmokeConfig {
    /// Returns the ping timeout as a Duration.
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Log format (pretty, json, compact).
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl CtlConfig {
    /// Loads configuration from a file.
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merges CLI arguments into the configuration.
    pub fn merge_cli_args(&mut self, args: &super::CliArgs) {
        // Hosts given on the command line replace the configured list
        if !args.hosts.is_empty() {
            self.network.hosts = args.hosts.clone();
        }

        if let Some(ref name) = args.name {
            self.network.name = name.clone();
        }

        if let Some(ref subnet) = args.subnet {
            self.network.subnet = subnet.clone();
        }

        if let Some(port) = args.port {
            self.network.port = port;
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("Invalid log level: {}", self.logging.level);
        }

        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            anyhow::bail!("Invalid log format: {}", self.logging.format);
        }

        if self.network.name.is_empty() {
            anyhow::bail!("Network name must not be empty");
        }

        if self.network.hosts.is_empty() {
            anyhow::bail!("At least one host is required");
        }

        let mut seen = HashSet::new();
        for host in &self.network.hosts {
            if !seen.insert(host.as_str()) {
                anyhow::bail!("Duplicate host: {}", host);
            }
        }

        self.network.subnet()?;

        if self.network.port == 0 {
            anyhow::bail!("Overlay port must not be 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn with_hosts(hosts: &[&str]) -> CtlConfig {
        let mut config = CtlConfig::default();
        config.network.hosts = hosts.iter().map(|h| h.to_string()).collect();
        config
    }

    #[test]
    fn test_default_config() {
        let config = CtlConfig::default();

        assert_eq!(config.network.name, "multihost");
        assert_eq!(config.network.port, 8472);
        assert_eq!(config.network.subnet().unwrap().prefix(), 16);
        assert_eq!(config.smoke.ping_count, 4);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_validation() {
        // No hosts
        assert!(CtlConfig::default().validate().is_err());

        let mut config = with_hosts(&["tcp://10.0.0.1:2375", "tcp://10.0.0.2:2375"]);
        assert!(config.validate().is_ok());

        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
        config.logging.level = "info".to_string();

        config.logging.format = "invalid".to_string();
        assert!(config.validate().is_err());
        config.logging.format = "json".to_string();

        config.network.subnet = "10.58.0.0/33".to_string();
        assert!(config.validate().is_err());
        config.network.subnet = "10.58.0.0/16".to_string();

        config.network.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_hosts_rejected() {
        let config = with_hosts(&["tcp://10.0.0.1:2375", "tcp://10.0.0.1:2375"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[network]
name = "lab"
hosts = ["tcp://10.0.0.1:2375", "tcp://10.0.0.2:2375"]

[provider.etcd]
client_port = 4001

[logging]
format = "compact"
"#
        )
        .unwrap();

        let config = CtlConfig::from_file(&file.path().to_path_buf()).unwrap();
        assert_eq!(config.network.name, "lab");
        assert_eq!(config.network.hosts.len(), 2);
        assert_eq!(config.network.port, 8472);
        assert_eq!(config.provider.etcd.client_port, 4001);
        assert_eq!(config.provider.etcd.peer_port, 2380);
        assert_eq!(config.logging.format, "compact");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = with_hosts(&["tcp://10.0.0.1:2375"]);
        let toml_str = toml::to_string(&config).unwrap();

        let parsed: CtlConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.network.hosts, config.network.hosts);
        assert_eq!(parsed.provider, config.provider);
    }
}
