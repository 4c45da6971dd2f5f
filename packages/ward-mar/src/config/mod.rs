mod database;
mod gate;
mod log;
mod schedule;
mod server;
mod ward;

pub use database::DatabaseConfig;
pub use gate::GateConfig;
pub use log::{LogConfig, LogFormat, LogLevel, LogOutput};
pub use schedule::ScheduleConfig;
pub use server::ServerConfig;
pub use ward::{PrometheusConfig, SweepConfig, WardConfig};

pub const MAR_PREFIX: &str = "MAR";
pub const DEFAULT_CONFIG_FILE_PATH: &str = "ward-mar.toml";

pub const DEFAULT_PORT: u16 = 8480;
pub const DEFAULT_SHUTDOWN_TIMEOUT: u64 = 2000;
pub const DEFAULT_WORKER_THREADS: usize = 4;
