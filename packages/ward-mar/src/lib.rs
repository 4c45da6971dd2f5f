pub mod administration;
pub mod api;
pub mod audit;
pub mod cli;
pub mod config;
pub mod connect;
pub mod consult;
pub mod error;
pub mod gate;
pub mod log;
pub mod order;
pub mod prometheus;
pub mod schedule;
pub mod store;
pub mod sweep;
pub mod tls;
pub mod ward;

pub use crate::cli::Args;
pub use crate::cli::Migrate;
pub use crate::config::{DatabaseConfig, ServerConfig, WardConfig};
pub use crate::log::init;
pub use crate::ward::Ward;

use uuid::Uuid;

pub type PatientId = Uuid;
pub type OrderId = Uuid;
pub type SlotId = Uuid;
pub type UserId = Uuid;
pub type ConsultantOrderId = Uuid;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
pub mod test_helpers;
