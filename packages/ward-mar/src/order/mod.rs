mod lifecycle;

use crate::audit::SignedAction;
use crate::error::{Error, ScheduleError, StoreError, ValidationError};
use crate::schedule::{self, Frequency};
use crate::{OrderId, PatientId};
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;
use uuid::Uuid;

pub use lifecycle::OrderLifecycle;

/// Longest course an order may be prescribed for
pub const MAX_DURATION_DAYS: i32 = 3650;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Route {
    Oral,
    Iv,
    Im,
    Sc,
    Topical,
    Inhaled,
    Rectal,
    Other,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Oral => "ORAL",
            Route::Iv => "IV",
            Route::Im => "IM",
            Route::Sc => "SC",
            Route::Topical => "TOPICAL",
            Route::Inhaled => "INHALED",
            Route::Rectal => "RECTAL",
            Route::Other => "OTHER",
        }
    }
}

impl Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Route {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ORAL" => Ok(Route::Oral),
            "IV" => Ok(Route::Iv),
            "IM" => Ok(Route::Im),
            "SC" | "SUBCUT" => Ok(Route::Sc),
            "TOPICAL" => Ok(Route::Topical),
            "INHALED" => Ok(Route::Inhaled),
            "RECTAL" => Ok(Route::Rectal),
            "OTHER" => Ok(Route::Other),
            _ => Err(format!("unrecognised route {s}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Active,
    Discontinued,
    Completed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Active => "ACTIVE",
            OrderStatus::Discontinued => "DISCONTINUED",
            OrderStatus::Completed => "COMPLETED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Active)
    }
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(OrderStatus::Active),
            "DISCONTINUED" => Ok(OrderStatus::Discontinued),
            "COMPLETED" => Ok(OrderStatus::Completed),
            _ => Err(StoreError::UnexpectedValue {
                column: "status",
                value: s.to_owned(),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Discontinuation {
    pub reason: String,
    pub signed: SignedAction,
}

///
/// A clinician's prescription for one medication.
///
/// ACTIVE on creation. DISCONTINUED and COMPLETED are terminal.
///
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TreatmentOrder {
    pub id: OrderId,
    pub patient_id: PatientId,
    pub medication_name: String,
    pub dosage: String,
    pub route: Route,
    pub frequency: Frequency,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub duration_days: Option<i32>,
    pub dilution: Option<String>,
    pub is_prn: bool,
    pub prn_instructions: Option<String>,
    pub status: OrderStatus,
    pub prescribed: SignedAction,
    pub discontinuation: Option<Discontinuation>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TreatmentOrder {
    /// The earlier of `end_date` and `start_date + duration_days`
    pub fn effective_end(&self) -> Option<DateTime<Utc>> {
        let by_duration = self.duration_days.and_then(|days| {
            self.start_date
                .checked_add_signed(TimeDelta::try_days(days as i64)?)
        });

        match (self.end_date, by_duration) {
            (Some(end), Some(duration)) => Some(end.min(duration)),
            (end, duration) => end.or(duration),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == OrderStatus::Active
    }

    pub fn is_due_for_completion(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.effective_end().is_some_and(|end| end <= now)
    }
}

///
/// Fields supplied by the prescriber.
/// Route and frequency arrive as codes and are checked by `into_order`.
///
#[derive(Clone, Debug, Deserialize)]
pub struct NewOrder {
    pub patient_id: PatientId,
    #[serde(default)]
    pub medication_name: String,
    #[serde(default)]
    pub dosage: String,
    #[serde(default)]
    pub route: String,
    #[serde(default)]
    pub frequency: String,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub duration_days: Option<i32>,
    pub dilution: Option<String>,
    #[serde(default)]
    pub is_prn: bool,
    pub prn_instructions: Option<String>,
}

impl NewOrder {
    ///
    /// Checks every field and builds an ACTIVE order.
    ///
    /// All invalid fields are reported together as a `ValidationError`.
    /// An unrecognised frequency is reported on its own as `InvalidFrequencyCode` when it is the only problem.
    ///
    pub fn into_order(self, prescribed: SignedAction) -> Result<TreatmentOrder, Error> {
        let mut errors = ValidationError::default();

        if self.medication_name.trim().is_empty() {
            errors.push("medication_name", "must not be empty");
        }

        if self.dosage.trim().is_empty() {
            errors.push("dosage", "must not be empty");
        }

        let route = if self.route.trim().is_empty() {
            errors.push("route", "must not be empty");
            None
        } else {
            match self.route.parse::<Route>() {
                Ok(route) => Some(route),
                Err(reason) => {
                    errors.push("route", reason);
                    None
                }
            }
        };

        let frequency = if self.frequency.trim().is_empty() {
            errors.push("frequency", "must not be empty");
            None
        } else {
            Some(self.frequency.parse::<Frequency>())
        };

        if let Some(Ok(frequency)) = frequency {
            if frequency.is_prn() && !self.is_prn {
                errors.push("is_prn", "must be set for a PRN frequency");
            }
            if self.is_prn && !frequency.is_prn() {
                errors.push("frequency", "must be PRN for an as-needed order");
            }
        }

        let supported = format!(
            "must be in the years {} to {}",
            schedule::SUPPORTED_YEARS.start(),
            schedule::SUPPORTED_YEARS.end()
        );

        if !schedule::is_supported_date(self.start_date.date_naive()) {
            errors.push("start_date", supported.as_str());
        }

        if let Some(end_date) = self.end_date {
            if end_date <= self.start_date {
                errors.push("end_date", "must be after start_date");
            } else if !schedule::is_supported_date(end_date.date_naive()) {
                errors.push("end_date", supported.as_str());
            }
        }

        if let Some(days) = self.duration_days {
            if days <= 0 {
                errors.push("duration_days", "must be positive");
            } else if days > MAX_DURATION_DAYS {
                errors.push(
                    "duration_days",
                    format!("must not exceed {MAX_DURATION_DAYS}"),
                );
            }
        }

        prescribed.validate(&mut errors);

        let frequency = match frequency {
            Some(Ok(frequency)) => Some(frequency),
            Some(Err(ScheduleError::InvalidFrequencyCode { code })) => {
                if errors.is_empty() {
                    return Err(ScheduleError::InvalidFrequencyCode { code }.into());
                }
                errors.push("frequency", format!("unrecognised frequency {code}"));
                None
            }
            None => None,
        };

        errors.into_result()?;

        match (route, frequency) {
            (Some(route), Some(frequency)) => Ok(TreatmentOrder {
                id: Uuid::new_v4(),
                patient_id: self.patient_id,
                medication_name: self.medication_name.trim().to_owned(),
                dosage: self.dosage.trim().to_owned(),
                route,
                frequency,
                start_date: self.start_date.trunc_subsecs(0),
                end_date: self.end_date.map(|end| end.trunc_subsecs(0)),
                duration_days: self.duration_days,
                dilution: self.dilution.filter(|d| !d.trim().is_empty()),
                is_prn: self.is_prn,
                prn_instructions: self.prn_instructions.filter(|i| !i.trim().is_empty()),
                status: OrderStatus::Active,
                prescribed,
                discontinuation: None,
                completed_at: None,
            }),
            // route and frequency are always present once validation has passed
            _ => Err(ValidationError::field("order", "incomplete").into()),
        }
    }
}
