//! Configuration using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. built-in defaults
//! 2. a TOML file (default `config/pitaya.toml`, optional)
//! 3. environment variables prefixed with `PITAYA_`, with `__` separating
//!    nested keys
//!
//! # Example
//! ```no_run
//! use pitaya_daq::config::PitayaConfig;
//!
//! // PITAYA_WORKER__MOCK_MODE=true overrides [worker] mock_mode
//! let config = PitayaConfig::load()?;
//! config.validate()?;
//! println!("Worker host: {}", config.worker.hostname);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use daq_driver_red_pitaya::{DeviceConfig, DEFAULT_PORT};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/pitaya.toml";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PitayaConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Worker and device settings
    pub worker: WorkerConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Pitaya DAQ".to_string(),
            log_level: "info".to_string(),
            log_format: "compact".to_string(),
        }
    }
}

/// Construction parameters of one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Hostname or IP address of the board
    pub hostname: String,
    /// SCPI port
    pub port: u16,
    /// Name of the instrument configuration this worker serves
    pub config_name: String,
    /// Simulate the board instead of connecting
    pub mock_mode: bool,
    /// How long `start_worker` waits for the bootstrap message
    #[serde(with = "humantime_serde")]
    pub startup_timeout: Duration,
    /// How long `shutdown` waits for the worker to stop
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Default per-command timeout
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
    /// TCP connect timeout for the real backend
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Simulated board settings
    pub mock: MockConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            hostname: "rp-f00000.local".to_string(),
            port: DEFAULT_PORT,
            config_name: "pitaya".to_string(),
            mock_mode: false,
            startup_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            mock: MockConfig::default(),
        }
    }
}

/// Simulated board settings
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    /// Noise seed; unset seeds from the OS
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Delay added to every simulated operation
    #[serde(with = "humantime_serde")]
    pub latency: Duration,
}

impl WorkerConfig {
    /// Defaults with mock mode enabled.
    pub fn mock() -> Self {
        Self {
            mock_mode: true,
            ..Self::default()
        }
    }

    /// Device facade settings derived from this worker configuration.
    pub fn device_config(&self) -> DeviceConfig {
        DeviceConfig {
            host: self.hostname.clone(),
            port: self.port,
            mock: self.mock_mode,
            connect_timeout: self.connect_timeout,
            mock_seed: self.mock.seed,
            mock_latency: self.mock.latency,
        }
    }

    /// Check values that parse but cannot work.
    pub fn validate(&self) -> Result<(), String> {
        if !self.mock_mode && self.hostname.trim().is_empty() {
            return Err("worker.hostname must be set unless mock_mode is enabled".to_string());
        }
        if self.port == 0 {
            return Err("worker.port must be non-zero".to_string());
        }
        for (name, value) in [
            ("startup_timeout", self.startup_timeout),
            ("shutdown_timeout", self.shutdown_timeout),
            ("command_timeout", self.command_timeout),
            ("connect_timeout", self.connect_timeout),
        ] {
            if value.is_zero() {
                return Err(format!("worker.{name} must be greater than zero"));
            }
        }
        Ok(())
    }
}

impl PitayaConfig {
    /// Load configuration from `config/pitaya.toml` and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    /// The provider stack used by [`load_from`](Self::load_from).
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(PitayaConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("PITAYA_").split("__"))
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

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            ));
        }

        self.worker.validate()
    }
}
