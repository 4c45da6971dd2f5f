use super::{
    DatabaseConfig, GateConfig, LogConfig, ScheduleConfig, ServerConfig, MAR_PREFIX,
};
use crate::error::{ConfigError, Error};
use crate::Args;
use config::{Config, Environment};
use regex::Regex;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

static FIELD_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`(\w+)`").unwrap());

#[derive(Clone, Debug, Deserialize)]
pub struct WardConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub prometheus: PrometheusConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PrometheusConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "PrometheusConfig::default_port")]
    pub port: u16,
}

///
/// Background sweep that marks overdue slots as missed and completes elapsed orders
///
#[derive(Clone, Debug, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "SweepConfig::default_enabled")]
    pub enabled: bool,

    /// Seconds between sweeps
    #[serde(default = "SweepConfig::default_interval")]
    pub interval: u64,
}

/// Config defaults to a file called `ward-mar.toml` in the current directory.
/// Supports TOML
/// Variable names should match the struct field names.
///
/// ENV vars can be used to override file settings.
///
/// ENV vars must be prefixed with `MAR_`.
///
impl WardConfig {
    pub fn load(args: &Args) -> Result<WardConfig, Error> {
        // Log a warning to user that config file is missing
        if !PathBuf::from(&args.config_file_path).exists() {
            println!(
                "Configuration file was not found: {}",
                args.config_file_path
            );
            println!("Loading config values from environment variables.");
        }
        let mut config = WardConfig::build(&args.config_file_path)?;

        // If log level is default, it has not been set by the user in config
        if config.log.level == LogConfig::default_log_level() {
            config.log.level = args.log_level;
        }

        // If log format is default, it has not been set by the user in config
        if config.log.format == LogConfig::default_log_format() {
            config.log.format = args.log_format;
        }

        // Fail on startup rather than on the first schedule request
        config.schedule.clock()?;
        config.schedule.missed_grace()?;

        Ok(config)
    }

    pub fn build(path: &str) -> Result<Self, Error> {
        // For parsing top-level values such as MAR_HOST, MAR_PORT
        // and for parsing nested env values such as MAR_DATABASE__HOST, MAR_DATABASE__PORT
        let mar_env_source = Environment::with_prefix(MAR_PREFIX)
            .try_parsing(true)
            .separator("__")
            .prefix_separator("_");

        let config: Self = Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(mar_env_source)
            .build()?
            .try_deserialize()
            .map_err(|err| match err {
                config::ConfigError::Message(ref s) => match s {
                    s if s.contains("missing field") => {
                        let mut name = extract_field_name(s).map_or("unknown".to_string(), |s| s);

                        if matches!(name.as_str(), "name" | "username" | "password") {
                            name = format!("database.{name}");
                        }

                        ConfigError::MissingParameter { name }
                    }
                    s if s.contains("does not have variant constructor")
                        || s.contains("unknown variant") =>
                    {
                        let (name, value) = extract_invalid_field(s);
                        ConfigError::InvalidParameter { name, value }
                    }
                    _ => err.into(),
                },
                _ => err.into(),
            })?;

        Ok(config)
    }

    ///
    /// Returns true if Prometheus export is enabled
    ///
    pub fn prometheus_enabled(&self) -> bool {
        self.prometheus.enabled
    }
}

impl PrometheusConfig {
    pub fn default_port() -> u16 {
        9930
    }
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        PrometheusConfig {
            enabled: false,
            port: PrometheusConfig::default_port(),
        }
    }
}

impl SweepConfig {
    pub const fn default_enabled() -> bool {
        true
    }

    pub const fn default_interval() -> u64 {
        60
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval.max(1))
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        SweepConfig {
            enabled: SweepConfig::default_enabled(),
            interval: SweepConfig::default_interval(),
        }
    }
}

///
/// Extracts a field name (if present) from a config::ConfigError::Message
/// This is called in `build` if a ConfigError message contains the string `missing field`
///
fn extract_field_name(input: &str) -> Option<String> {
    FIELD_NAME
        .captures(input)
        .and_then(|caps| caps.get(1).map(|m| m.as_str().to_string()))
}

///
/// Extracts a field name (if present) from a config::ConfigError::Message
/// This is called in `build` if a ConfigError message describes an unknown enum variant
///
/// Error string is `enum {name} does not have variant constructor {value}`
///
fn extract_invalid_field(input: &str) -> (String, String) {
    let words = input.split(' ').collect::<Vec<_>>();

    let default_name = "unknown".to_string();
    let default_val = "".to_string();

    if !input.starts_with("enum") {
        return (default_name, default_val);
    }

    let name = words
        .get(1)
        .map_or(default_name.to_owned(), |w| w.to_string());

    let value = words
        .last()
        .map_or(default_val.to_owned(), |w| w.to_string());

    (name, value)
}
