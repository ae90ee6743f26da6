//! Configuration loading and validation.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Main configuration for a scan run.
///
/// Built once at startup and handed to the sender and listener; nothing
/// mutates it during the run.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Network interface used for both injection and capture. If None, auto-detect.
    pub interface: Option<String>,

    /// Source address written into every replayed packet.
    /// If None, the first non-loopback IPv4 address of the interface is used.
    pub source_ip: Option<IpAddr>,

    /// Target specification: CIDR blocks, `A-B` ranges or single addresses,
    /// joined with `;`.
    pub targets: String,

    /// Path of the pcap archive holding the packet templates.
    pub template_pcap: PathBuf,

    /// Packets per second. 0 disables rate limiting.
    #[serde(default)]
    pub rate_limit_pps: u32,

    /// Response capture settings.
    #[serde(default)]
    pub capture: CaptureSettings,

    /// Route/neighbor resolution settings.
    #[serde(default)]
    pub resolver: ResolverSettings,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Response capture settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureSettings {
    /// Capture responses and store the matching ones in a timestamped archive.
    #[serde(default)]
    pub enabled: bool,

    /// Directory in which the response archive is created.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Capacity of the channel between the capture thread and the listener.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            output_dir: default_output_dir(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Route/neighbor resolution settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolverSettings {
    /// Lifetime of cached resolutions in seconds. 0 re-reads the host tables
    /// for every target.
    #[serde(default)]
    pub cache_ttl_secs: u64,
}

impl ResolverSettings {
    /// Cache lifetime, or None when caching is disabled.
    pub const fn cache_ttl(&self) -> Option<Duration> {
        if self.cache_ttl_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.cache_ttl_secs))
        }
    }
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

const fn default_channel_capacity() -> usize {
    1024
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9090))
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Rate limit, or None when unlimited.
    pub const fn rate_limit(&self) -> Option<u32> {
        if self.rate_limit_pps == 0 {
            None
        } else {
            Some(self.rate_limit_pps)
        }
    }

    fn validate(&self) -> Result<()> {
        if self.targets.trim().is_empty() {
            return Err(ConfigError::Validation("targets cannot be empty".into()).into());
        }

        if self.template_pcap.as_os_str().is_empty() {
            return Err(ConfigError::Validation("template_pcap cannot be empty".into()).into());
        }

        if self.capture.channel_capacity == 0 {
            return Err(
                ConfigError::Validation("capture.channel_capacity must be > 0".into()).into(),
            );
        }

        if self.capture.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation("capture.output_dir cannot be empty".into()).into());
        }

        if let Some(interface) = &self.interface
            && interface.trim().is_empty()
        {
            return Err(ConfigError::Validation("interface cannot be empty".into()).into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            targets = "10.0.0.0/30"
            template_pcap = "templates.pcap"
        "#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.targets, "10.0.0.0/30");
        assert_eq!(config.template_pcap, PathBuf::from("templates.pcap"));
        assert!(config.interface.is_none());
        assert!(config.source_ip.is_none());
        assert_eq!(config.rate_limit(), None);
    }

    #[test]
    fn test_default_values() {
        let toml = r#"
            targets = "10.0.0.1"
            template_pcap = "t.pcap"
        "#;

        let config = Config::parse(toml).unwrap();
        assert!(!config.capture.enabled);
        assert_eq!(config.capture.output_dir, PathBuf::from("."));
        assert_eq!(config.capture.channel_capacity, 1024);
        assert_eq!(config.resolver.cache_ttl(), None);
        assert!(!config.metrics.enabled);
        assert_eq!(config.metrics.listen.port(), 9090);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            interface = "eth0"
            source_ip = "192.168.1.10"
            targets = "10.0.0.0/24;192.168.1.1-192.168.1.5"
            template_pcap = "/tmp/t.pcap"
            rate_limit_pps = 100

            [capture]
            enabled = true
            output_dir = "/var/tmp"

            [resolver]
            cache_ttl_secs = 30
        "#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.interface.as_deref(), Some("eth0"));
        assert_eq!(
            config.source_ip,
            Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)))
        );
        assert_eq!(config.rate_limit(), Some(100));
        assert!(config.capture.enabled);
        assert_eq!(config.capture.output_dir, PathBuf::from("/var/tmp"));
        assert_eq!(config.resolver.cache_ttl(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_missing_targets_rejected() {
        let toml = r#"
            template_pcap = "t.pcap"
        "#;

        assert!(Config::parse(toml).is_err());
    }

    #[test]
    fn test_blank_targets_rejected() {
        let toml = r#"
            targets = "   "
            template_pcap = "t.pcap"
        "#;

        assert!(Config::parse(toml).is_err());
    }

    #[test]
    fn test_invalid_source_ip_rejected() {
        let toml = r#"
            source_ip = "not-an-ip"
            targets = "10.0.0.1"
            template_pcap = "t.pcap"
        "#;

        assert!(Config::parse(toml).is_err());
    }

    #[test]
    fn test_zero_channel_capacity_rejected() {
        let toml = r#"
            targets = "10.0.0.1"
            template_pcap = "t.pcap"

            [capture]
            channel_capacity = 0
        "#;

        assert!(Config::parse(toml).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = r#"
            targets = "10.0.0.1"
            template_pcap = "t.pcap"
            unknown_field = "value"
        "#;

        assert!(Config::parse(toml).is_err());
    }
}
