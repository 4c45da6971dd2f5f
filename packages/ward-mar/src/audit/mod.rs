use crate::error::{StoreError, ValidationError};
use crate::{PatientId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;
use uuid::Uuid;

/// User that signs system-driven transitions such as order completion
pub const SYSTEM_USER: UserId = Uuid::nil();

///
/// Who did something, when, and the reference to their signature.
///
/// Every state-changing action on an order, slot or consultant order carries one.
///
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAction {
    pub user_id: UserId,
    pub at: DateTime<Utc>,
    pub signature: String,
}

impl SignedAction {
    pub fn new(user_id: UserId, at: DateTime<Utc>, signature: impl Into<String>) -> Self {
        SignedAction {
            user_id,
            at,
            signature: signature.into(),
        }
    }

    pub fn system(at: DateTime<Utc>) -> Self {
        SignedAction {
            user_id: SYSTEM_USER,
            at,
            signature: String::new(),
        }
    }

    pub fn is_system(&self) -> bool {
        self.user_id == SYSTEM_USER
    }

    /// Records missing signer or signature on `errors`
    pub fn validate(&self, errors: &mut ValidationError) {
        if self.user_id.is_nil() {
            errors.push("signed_by.user_id", "must identify the signing user");
        }
        if self.signature.trim().is_empty() {
            errors.push("signed_by.signature", "must not be empty");
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    OrderCreated,
    Administered,
    OrderDiscontinued,
    OrderCompleted,
    ConsultantOrderCreated,
    ConsultantOrderAcknowledged,
    SlotMissed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::OrderCreated => "ORDER_CREATED",
            AuditAction::Administered => "ADMINISTERED",
            AuditAction::OrderDiscontinued => "ORDER_DISCONTINUED",
            AuditAction::OrderCompleted => "ORDER_COMPLETED",
            AuditAction::ConsultantOrderCreated => "CONSULTANT_ORDER_CREATED",
            AuditAction::ConsultantOrderAcknowledged => "CONSULTANT_ORDER_ACKNOWLEDGED",
            AuditAction::SlotMissed => "SLOT_MISSED",
        }
    }
}

impl Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ORDER_CREATED" => Ok(AuditAction::OrderCreated),
            "ADMINISTERED" => Ok(AuditAction::Administered),
            "ORDER_DISCONTINUED" => Ok(AuditAction::OrderDiscontinued),
            "ORDER_COMPLETED" => Ok(AuditAction::OrderCompleted),
            "CONSULTANT_ORDER_CREATED" => Ok(AuditAction::ConsultantOrderCreated),
            "CONSULTANT_ORDER_ACKNOWLEDGED" => Ok(AuditAction::ConsultantOrderAcknowledged),
            "SLOT_MISSED" => Ok(AuditAction::SlotMissed),
            _ => Err(StoreError::UnexpectedValue {
                column: "action",
                value: s.to_owned(),
            }),
        }
    }
}

///
/// One row of the append-only audit trail.
/// Written in the same transaction as the state change it records.
///
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub action: AuditAction,
    pub subject_id: Uuid,
    pub patient_id: PatientId,
    pub signed: SignedAction,
    pub detail: Option<String>,
}

impl AuditEntry {
    pub fn new(
        action: AuditAction,
        subject_id: Uuid,
        patient_id: PatientId,
        signed: SignedAction,
    ) -> Self {
        AuditEntry {
            id: Uuid::new_v4(),
            action,
            subject_id,
            patient_id,
            signed,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_action_is_unsigned() {
        let signed = SignedAction::system(Utc::now());
        assert!(signed.is_system());
        assert!(signed.signature.is_empty());
    }

    #[test]
    fn missing_signature_is_invalid() {
        let mut errors = ValidationError::default();
        SignedAction::new(Uuid::new_v4(), Utc::now(), "  ").validate(&mut errors);

        assert_eq!(errors.fields.len(), 1);
        assert_eq!(errors.fields[0].name, "signed_by.signature");
    }

    #[test]
    fn nil_user_cannot_sign() {
        let mut errors = ValidationError::default();
        SignedAction::new(Uuid::nil(), Utc::now(), "sig").validate(&mut errors);

        assert_eq!(errors.fields[0].name, "signed_by.user_id");
    }

    #[test]
    fn actions_parse_from_their_column_value() {
        for action in [
            AuditAction::OrderCreated,
            AuditAction::Administered,
            AuditAction::ConsultantOrderCreated,
            AuditAction::SlotMissed,
        ] {
            assert_eq!(action.as_str().parse::<AuditAction>().unwrap(), action);
        }
        assert!("DELETED".parse::<AuditAction>().is_err());
    }
}
