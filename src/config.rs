//! Firmware configuration using Figment
//!
//! Configuration is layered from:
//! 1. Built-in defaults (every field has one, so an empty file is valid)
//! 2. `config/xep.toml` (or the path given on the command line)
//! 3. Environment variables prefixed with `XEP_`, nested with `__`
//!
//! # Example
//! ```no_run
//! use xep::config::XepConfig;
//!
//! // XEP_RADAR__ZERO_FRAME_THRESHOLD=50 overrides radar.zero_frame_threshold
//! let config = XepConfig::load().unwrap();
//! config.validate().unwrap();
//! println!("Firmware: {}", config.application.firmware_id);
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use xep_dispatch::DispatcherConfig;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/xep.toml";

/// Top-level firmware configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XepConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Memory pools created at boot
    pub pools: Vec<PoolSpec>,
    /// Message bus settings
    pub dispatch: DispatchConfig,
    /// Radar acquisition settings
    pub radar: RadarConfig,
    /// Host link settings
    pub hostcom: HostComConfig,
    /// Flash file store settings
    pub storage: StorageConfig,
    /// Watchdog monitor settings
    pub monitor: MonitorConfig,
    /// Host transport selection
    pub transport: TransportConfig,
}

impl Default for XepConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            pools: default_pools(),
            dispatch: DispatchConfig::default(),
            radar: RadarConfig::default(),
            hostcom: HostComConfig::default(),
            storage: StorageConfig::default(),
            monitor: MonitorConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, coloured
    #[default]
    Pretty,
    /// Single line per event
    Compact,
    /// One JSON object per event
    Json,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
    /// Firmware id reported by system info
    pub firmware_id: String,
    /// Firmware version reported by system info
    pub version: String,
    /// Build string reported by system info
    pub build: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "XEP".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            firmware_id: "XEP".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            build: "host".to_string(),
        }
    }
}

/// One pool of equally sized blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSpec {
    /// Bytes per block
    pub block_size: usize,
    /// Number of blocks
    pub block_count: usize,
}

fn default_pools() -> Vec<PoolSpec> {
    vec![
        PoolSpec {
            block_size: 7000,
            block_count: 2,
        },
        PoolSpec {
            block_size: 100,
            block_count: 10,
        },
    ]
}

/// Message bus configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Envelopes per host link queue
    pub hostcom_queue_capacity: usize,
    /// Envelopes in the application queue
    pub application_queue_capacity: usize,
    /// Subscriber lock wait for send and reply
    pub send_timeout_ms: u64,
    /// Subscriber lock wait for forward
    pub forward_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            hostcom_queue_capacity: 50,
            application_queue_capacity: 200,
            send_timeout_ms: 10,
            forward_timeout_ms: 500,
        }
    }
}

impl DispatchConfig {
    /// Timeouts for [`xep_dispatch::Dispatcher::new`].
    #[must_use]
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            forward_timeout: Duration::from_millis(self.forward_timeout_ms),
        }
    }
}

/// Operating mode sampled at boot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    /// Regular operation
    #[default]
    Normal,
    /// Production test: IO connectivity test at start-up
    Factory,
    /// Regulatory test patterns driven by the certification sub-mode
    Certification,
}

/// Radar acquisition configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarConfig {
    /// Consecutive zero frames before the transmitter is shut off
    pub zero_frame_threshold: u32,
    /// Antenna-specific frame area offset in metres
    pub frame_area_offset: f32,
    /// Default transmit power (0 off, 1 low, 2 medium, 3 high)
    pub tx_power: u8,
    /// Default pulse repetition divider
    pub prf_div: u8,
    /// Default transmit center frequency (3 EU, 4 KCC)
    pub tx_center_frequency: u8,
    /// Longest wait for a notification per loop iteration
    pub loop_wait_ms: u64,
    /// Operating mode at boot
    pub operation_mode: OperationMode,
    /// Certification sub-mode selected at boot
    pub certification_mode: u8,
    /// Seed for the simulated chip, random when absent
    pub mock_seed: Option<u64>,
}

impl OperationMode {
    /// Mode byte recorded in crash dumps.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Factory => 0,
            Self::Normal => 3,
            Self::Certification => 32,
        }
    }
}

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            zero_frame_threshold: 100,
            frame_area_offset: 0.18,
            tx_power: 2,
            prf_div: 16,
            tx_center_frequency: 3,
            loop_wait_ms: 500,
            operation_mode: OperationMode::Normal,
            certification_mode: 0,
            mock_seed: None,
        }
    }
}

/// Host link configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostComConfig {
    /// Free-space floor of the outbound queue is `capacity / divisor`
    pub backpressure_divisor: usize,
    /// Wait for the send slot before flushing
    pub send_timeout_ms: u64,
    /// Queue lock wait while flushing
    pub lock_timeout_ms: u64,
    /// Size of the message-build buffer
    pub messagebuild_size: usize,
}

impl Default for HostComConfig {
    fn default() -> Self {
        Self {
            backpressure_divisor: 4,
            send_timeout_ms: 1000,
            lock_timeout_ms: 10,
            messagebuild_size: 8000,
        }
    }
}

/// Flash store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Memory-mapped backing file, in-memory flash when absent
    pub path: Option<PathBuf>,
    /// Flash region size in bytes
    pub size: usize,
    /// Program page size in bytes
    pub page_size: usize,
    /// Erase block size in bytes
    pub block_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            size: 256 * 1024,
            page_size: 512,
            block_size: 4096,
        }
    }
}

/// Watchdog monitor configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Monitor cycle
    pub cycle_ms: u64,
    /// Uptime after which the crash counter is cleared
    pub crash_count_reset_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cycle_ms: 100,
            crash_count_reset_secs: 300,
        }
    }
}

/// Host transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// stdin/stdout
    #[default]
    Stdio,
    /// One TCP connection
    Tcp,
    /// In-process loopback
    Loopback,
}

/// Host transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Primary link
    pub kind: TransportKind,
    /// Listen address for [`TransportKind::Tcp`]
    pub tcp_address: String,
    /// Listen address of the debug link, disabled when absent
    pub debug_address: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Stdio,
            tcp_address: "127.0.0.1:3000".to_string(),
            debug_address: None,
        }
    }
}

impl XepConfig {
    /// Load configuration from `config/xep.toml` and environment variables
    ///
    /// Environment variables override with prefix `XEP_`, e.g.
    /// `XEP_APPLICATION__LOG_LEVEL=debug`.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(XepConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("XEP_").split("__"))
            .extract()
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.pools.is_empty() {
            return Err("At least one memory pool is required".to_string());
        }
        if let Some(pool) = self
            .pools
            .iter()
            .find(|p| p.block_size == 0 || p.block_count == 0)
        {
            return Err(format!(
                "Invalid pool {}x{}: size and count must be non-zero",
                pool.block_size, pool.block_count
            ));
        }

        if self.hostcom.backpressure_divisor == 0 {
            return Err("hostcom.backpressure_divisor must be at least 1".to_string());
        }
        if self.dispatch.hostcom_queue_capacity == 0 || self.dispatch.application_queue_capacity == 0
        {
            return Err("Queue capacities must be non-zero".to_string());
        }
        if self.radar.zero_frame_threshold == 0 {
            return Err("radar.zero_frame_threshold must be at least 1".to_string());
        }
        if self.storage.page_size < xep_storage::TABLE_IMAGE_SIZE {
            return Err(format!(
                "storage.page_size {} is smaller than the {} byte file table",
                self.storage.page_size,
                xep_storage::TABLE_IMAGE_SIZE
            ));
        }

        Ok(())
    }

    /// Pool list in the form taken by [`xep_pool::MemoryPoolSet::with_pools`].
    #[must_use]
    pub fn pool_specs(&self) -> Vec<(usize, usize)> {
        self.pools
            .iter()
            .map(|p| (p.block_size, p.block_count))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = XepConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.radar.zero_frame_threshold, 100);
        assert_eq!(config.hostcom.backpressure_divisor, 4);
        assert_eq!(config.pool_specs(), vec![(7000, 2), (100, 10)]);
    }

    #[test]
    fn test_empty_file_is_valid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file).unwrap();

        let config = XepConfig::load_from(file.path()).unwrap();
        assert_eq!(config, XepConfig::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[application]
log_level = "debug"
log_format = "json"

[[pools]]
block_size = 512
block_count = 4

[radar]
zero_frame_threshold = 7
operation_mode = "factory"

[transport]
kind = "loopback"
"#
        )
        .unwrap();

        let config = XepConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.log_format, LogFormat::Json);
        assert_eq!(config.pool_specs(), vec![(512, 4)]);
        assert_eq!(config.radar.zero_frame_threshold, 7);
        assert_eq!(config.radar.operation_mode, OperationMode::Factory);
        assert_eq!(config.radar.prf_div, 16);
        assert_eq!(config.transport.kind, TransportKind::Loopback);
    }

    #[test]
    fn test_config_validation() {
        let mut config = XepConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = XepConfig::default();
        config.pools.clear();
        assert!(config.validate().is_err());

        let mut config = XepConfig::default();
        config.pools[1].block_count = 0;
        assert!(config.validate().is_err());

        let mut config = XepConfig::default();
        config.hostcom.backpressure_divisor = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dispatcher_timeouts() {
        let config = DispatchConfig::default().dispatcher_config();
        assert_eq!(config.send_timeout, Duration::from_millis(10));
        assert_eq!(config.forward_timeout, Duration::from_millis(500));
    }
}
