use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the delaymeter collector.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Config {
    /// Listener configuration.
    #[serde(default)]
    pub listen: ListenConfig,

    /// Flush scheduling configuration.
    #[serde(default)]
    pub flush: FlushConfig,

    /// Persistence sink configuration.
    #[serde(default)]
    pub sinks: SinksConfig,

    /// Prometheus health metrics server configuration.
    #[serde(default)]
    pub health: HealthConfig,
}

/// Listener configuration. The port comes from the command line.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// IP address to bind. Default: "0.0.0.0".
    #[serde(default = "default_listen_address")]
    pub address: String,

    /// Longest accepted record line in bytes. Default: 64KiB.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

/// Flush scheduling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FlushConfig {
    /// Aggregation window duration. Default: 1s.
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub interval: Duration,
}

/// Persistence sink configuration.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct SinksConfig {
    /// Append-only file logs.
    #[serde(default)]
    pub file: FileSinkConfig,
}

/// Append-only log file configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FileSinkConfig {
    /// Per-interval byte totals. Default: "bandwidths.txt".
    #[serde(default = "default_bandwidth_path")]
    pub bandwidth_path: PathBuf,

    /// Per-interval delay samples. Default: "delays.txt".
    #[serde(default = "default_delay_path")]
    pub delay_path: PathBuf,
}

/// Prometheus health metrics server configuration.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct HealthConfig {
    /// Listen address (e.g. ":9090"). Empty disables the server.
    #[serde(default)]
    pub addr: String,
}

// --- Default value functions ---

fn default_listen_address() -> String {
    Ipv4Addr::UNSPECIFIED.to_string()
}

fn default_max_line_bytes() -> usize {
    crate::ingest::DEFAULT_MAX_LINE_BYTES
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_bandwidth_path() -> PathBuf {
    PathBuf::from("bandwidths.txt")
}

fn default_delay_path() -> PathBuf {
    PathBuf::from("delays.txt")
}

// --- Default trait impls ---

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval: default_flush_interval(),
        }
    }
}

impl Default for FileSinkConfig {
    fn default() -> Self {
        Self {
            bandwidth_path: default_bandwidth_path(),
            delay_path: default_delay_path(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg = Self::from_yaml(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        Ok(cfg)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        self.listen
            .ip()
            .with_context(|| format!("invalid listen.address: {}", self.listen.address))?;

        if self.listen.max_line_bytes == 0 {
            bail!("listen.max_line_bytes must be positive");
        }

        if self.flush.interval.is_zero() {
            bail!("flush.interval must be positive");
        }

        let file = &self.sinks.file;
        if file.bandwidth_path.as_os_str().is_empty() {
            bail!("sinks.file.bandwidth_path is required");
        }
        if file.delay_path.as_os_str().is_empty() {
            bail!("sinks.file.delay_path is required");
        }
        if file.bandwidth_path == file.delay_path {
            bail!("sinks.file.bandwidth_path and sinks.file.delay_path must differ");
        }

        Ok(())
    }
}

impl ListenConfig {
    /// Parsed bind IP.
    pub fn ip(&self) -> Result<IpAddr> {
        Ok(self.address.trim().parse::<IpAddr>()?)
    }

    /// Socket address for the given port.
    pub fn socket_addr(&self, port: u16) -> Result<SocketAddr> {
        Ok(SocketAddr::new(self.ip()?, port))
    }
}

impl HealthConfig {
    /// Returns true if the health server should be started.
    pub fn is_enabled(&self) -> bool {
        !self.addr.trim().is_empty()
    }
}
