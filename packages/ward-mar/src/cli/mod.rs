mod migrate;

use crate::{
    config::{LogConfig, LogFormat, LogLevel, DEFAULT_CONFIG_FILE_PATH},
    error::Error,
    log::MIGRATE,
    WardConfig,
};
use clap::{Parser, Subcommand};
use tracing::debug;

pub use migrate::Migrate;

#[derive(Clone, Debug, Parser)]
#[command(version, about, verbatim_doc_comment)]
///
/// Ward MAR
///
/// Treatment orders, administration schedules and the daily progress note gate for the ward medication administration record.
///
pub struct Args {
    /// Optional path to a Ward MAR configuration file.
    ///
    /// Default is "ward-mar.toml".
    /// Configuration is loaded from this file, if present.
    /// Environment variables are used instead of the file or to override any values defined in the file.
    #[arg(short = 'p', long, default_value = DEFAULT_CONFIG_FILE_PATH, verbatim_doc_comment, global = true)]
    pub config_file_path: String,

    ///
    /// Optional log level.
    ///
    #[arg(short, long, value_enum, default_value_t = LogConfig::default_log_level(), env = "MAR_LOG__LEVEL", global = true)]
    pub log_level: LogLevel,

    ///
    /// Optional log format. Default level is "pretty" if running in a terminal session, otherwise "structured".
    ///
    #[arg(short='f', long, value_enum, default_value_t = LogConfig::default_log_format(), env = "MAR_LOG__FORMAT", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Commands {
    /// Apply the bundled database schema
    Migrate(Migrate),
}

///
/// Runs command specified in command line
/// Returns Ok(true) if the caller should exit
///
pub async fn run(args: Args, config: &WardConfig) -> Result<bool, Error> {
    match args.command {
        Some(Commands::Migrate(migrate)) => {
            debug!(target: MIGRATE, ?migrate);
            migrate.run(config).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}
