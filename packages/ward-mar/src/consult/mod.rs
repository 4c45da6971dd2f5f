mod acknowledgements;

use crate::audit::SignedAction;
use crate::error::{StoreError, ValidationError};
use crate::{ConsultantOrderId, PatientId};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;
use uuid::Uuid;

pub use acknowledgements::Acknowledgements;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    #[default]
    Routine,
    Urgent,
    Stat,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Routine => "ROUTINE",
            Priority::Urgent => "URGENT",
            Priority::Stat => "STAT",
        }
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Priority {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ROUTINE" => Ok(Priority::Routine),
            "URGENT" => Ok(Priority::Urgent),
            "STAT" => Ok(Priority::Stat),
            _ => Err(StoreError::UnexpectedValue {
                column: "priority",
                value: s.to_owned(),
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConsultantOrderStatus {
    Pending,
    Acknowledged,
}

///
/// An instruction from a visiting consultant that the ward must acknowledge.
///
/// The acknowledgement is written once, with its timestamp, user and signature together.
///
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConsultantOrder {
    pub id: ConsultantOrderId,
    pub patient_id: PatientId,
    pub order_type: String,
    pub details: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub status: ConsultantOrderStatus,
    pub acknowledgement: Option<SignedAction>,
}

impl ConsultantOrder {
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledgement.is_some()
    }

    pub fn acknowledged(mut self, acknowledgement: SignedAction) -> Self {
        self.acknowledgement = Some(acknowledgement);
        self.status = ConsultantOrderStatus::Acknowledged;
        self
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewConsultantOrder {
    pub patient_id: PatientId,
    #[serde(default)]
    pub order_type: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub priority: Priority,
}

impl NewConsultantOrder {
    pub fn into_order(self, created_at: DateTime<Utc>) -> Result<ConsultantOrder, ValidationError> {
        let mut errors = ValidationError::default();

        if self.order_type.trim().is_empty() {
            errors.push("order_type", "must not be empty");
        }
        if self.details.trim().is_empty() {
            errors.push("details", "must not be empty");
        }

        errors.into_result()?;

        Ok(ConsultantOrder {
            id: Uuid::new_v4(),
            patient_id: self.patient_id,
            order_type: self.order_type.trim().to_owned(),
            details: self.details.trim().to_owned(),
            priority: self.priority,
            created_at: created_at.trunc_subsecs(0),
            status: ConsultantOrderStatus::Pending,
            acknowledgement: None,
        })
    }
}
