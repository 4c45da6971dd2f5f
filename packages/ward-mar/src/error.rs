use crate::administration::SlotStatus;
use crate::order::OrderStatus;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use std::io;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Error creating connection after {retries} retries")]
    DatabaseConnection { retries: u32 },

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("{entity} {id} does not exist")]
    NotFound { entity: &'static str, id: Uuid },

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl Error {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Error::NotFound { entity, id }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Database(#[from] tokio_postgres::Error),

    #[error("Schedule anchor {value} is not a valid HH:MM time of day")]
    InvalidAnchorTime { value: String },

    #[error("Invalid value {value} for {name}")]
    InvalidParameter { name: String, value: String },

    #[error("Server host {name} is not a valid server name")]
    InvalidServerName { name: String },

    #[error("UTC offset of {minutes} minutes is out of range")]
    InvalidUtcOffset { minutes: i32 },

    #[error("Missing field {name} from configuration file or environment")]
    MissingParameter { name: String },

    #[error(transparent)]
    FileOrEnvironment(#[from] config::ConfigError),
}

/// A required order field that was missing or malformed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InvalidField {
    pub name: &'static str,
    pub reason: String,
}

impl fmt::Display for InvalidField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.reason)
    }
}

///
/// Every invalid field found while validating a request.
/// Collected in full so the caller can be re-prompted once.
///
#[derive(Error, Clone, Debug, Default, PartialEq, Eq)]
#[error("Invalid fields: {}", list_fields(.fields))]
pub struct ValidationError {
    pub fields: Vec<InvalidField>,
}

impl ValidationError {
    pub fn field(name: &'static str, reason: impl Into<String>) -> Self {
        let mut err = ValidationError::default();
        err.push(name, reason);
        err
    }

    pub fn push(&mut self, name: &'static str, reason: impl Into<String>) {
        self.fields.push(InvalidField {
            name,
            reason: reason.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

fn list_fields(fields: &[InvalidField]) -> String {
    fields
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Consultant order {order_id} was already acknowledged at {acknowledged_at}")]
    AlreadyAcknowledged {
        order_id: Uuid,
        acknowledged_at: DateTime<Utc>,
    },

    #[error("Order {order_id} is {status} and cannot be {action}")]
    InvalidTransition {
        order_id: Uuid,
        status: OrderStatus,
        action: &'static str,
    },

    #[error("Slot {slot_id} is {status}, expected PENDING")]
    InvalidSlotState { slot_id: Uuid, status: SlotStatus },

    #[error("Slot {slot_id} is not overdue until {overdue_at}")]
    WithinGraceWindow {
        slot_id: Uuid,
        overdue_at: DateTime<Utc>,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("Daily progress note for patient {patient_id} on {date} has not been recorded")]
    BlockedByMissingProgressNote { patient_id: Uuid, date: NaiveDate },

    #[error("Daily progress note status for patient {patient_id} on {date} could not be confirmed: {reason}")]
    Unavailable {
        patient_id: Uuid,
        date: NaiveDate,
        reason: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Unrecognised frequency code {code}")]
    InvalidFrequencyCode { code: String },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] tokio_postgres::Error),

    #[error("Unexpected value {value} in column {column}")]
    UnexpectedValue { column: &'static str, value: String },
}

impl From<tokio_postgres::Error> for Error {
    fn from(e: tokio_postgres::Error) -> Self {
        Error::Store(e.into())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_every_field() {
        let mut err = ValidationError::default();
        err.push("medication_name", "must not be empty");
        err.push("dosage", "must not be empty");

        assert_eq!(
            err.to_string(),
            "Invalid fields: medication_name (must not be empty), dosage (must not be empty)"
        );
        assert!(err.into_result().is_err());
    }

    #[test]
    fn empty_validation_error_is_ok() {
        assert!(ValidationError::default().into_result().is_ok());
    }
}
