mod tracker;

use crate::audit::SignedAction;
use crate::error::StoreError;
use crate::{OrderId, PatientId, SlotId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;
use uuid::Uuid;

pub use tracker::AdministrationTracker;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotStatus {
    Pending,
    Administered,
    Missed,
    DiscontinuedBeforeDue,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Pending => "PENDING",
            SlotStatus::Administered => "ADMINISTERED",
            SlotStatus::Missed => "MISSED",
            SlotStatus::DiscontinuedBeforeDue => "DISCONTINUED_BEFORE_DUE",
        }
    }
}

impl Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SlotStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(SlotStatus::Pending),
            "ADMINISTERED" => Ok(SlotStatus::Administered),
            "MISSED" => Ok(SlotStatus::Missed),
            "DISCONTINUED_BEFORE_DUE" => Ok(SlotStatus::DiscontinuedBeforeDue),
            _ => Err(StoreError::UnexpectedValue {
                column: "status",
                value: s.to_owned(),
            }),
        }
    }
}

///
/// One scheduled dose of an order.
///
/// The id is derived from `(order_id, scheduled_time)` so the same occurrence always has the same id,
/// however many times it is materialized.
///
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AdministrationSlot {
    pub id: SlotId,
    pub order_id: OrderId,
    pub scheduled_time: DateTime<Utc>,
    pub status: SlotStatus,
}

impl AdministrationSlot {
    pub fn pending(order_id: OrderId, scheduled_time: DateTime<Utc>) -> Self {
        AdministrationSlot {
            id: slot_id(order_id, scheduled_time),
            order_id,
            scheduled_time,
            status: SlotStatus::Pending,
        }
    }
}

pub fn slot_id(order_id: OrderId, scheduled_time: DateTime<Utc>) -> SlotId {
    Uuid::new_v5(&order_id, &scheduled_time.timestamp_micros().to_be_bytes())
}

/// Immutable record of a dose given. `slot_id` is `None` for PRN doses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AdministrationEvent {
    pub id: Uuid,
    pub slot_id: Option<SlotId>,
    pub order_id: OrderId,
    pub patient_id: PatientId,
    pub administered: SignedAction,
    pub remarks: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdministrationTarget {
    Slot(SlotId),
    Prn(OrderId),
}

#[derive(Clone, Debug, Deserialize)]
pub struct AdministerRequest {
    pub signed_by: SignedAction,
    pub remarks: Option<String>,
}
