mod memory;
mod postgres;

use crate::administration::{AdministrationEvent, AdministrationSlot};
use crate::audit::{AuditEntry, SignedAction};
use crate::consult::ConsultantOrder;
use crate::error::Error;
use crate::order::{Discontinuation, TreatmentOrder};
use crate::{ConsultantOrderId, OrderId, PatientId, SlotId};
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::{PostgresStore, SCHEMA};

///
/// Persistence for orders, slots, administration events, consultant orders and the audit trail.
///
/// Every state transition is a compare-and-set: the expected current status is checked and the
/// new status written atomically, together with the audit entry that records it. A transition
/// that loses a race fails with the status that was actually found.
///
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> Result<(), Error>;

    async fn insert_order(&self, order: &TreatmentOrder, audit: &AuditEntry) -> Result<(), Error>;

    async fn order(&self, order_id: OrderId) -> Result<Option<TreatmentOrder>, Error>;

    async fn patient_orders(&self, patient_id: PatientId) -> Result<Vec<TreatmentOrder>, Error>;

    /// ACTIVE to DISCONTINUED, moving every PENDING slot of the order to DISCONTINUED_BEFORE_DUE
    async fn discontinue_order(
        &self,
        order_id: OrderId,
        discontinuation: &Discontinuation,
        audit: &AuditEntry,
    ) -> Result<TreatmentOrder, Error>;

    /// ACTIVE orders whose effective end is at or before `now`
    async fn orders_due_for_completion(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TreatmentOrder>, Error>;

    /// ACTIVE to COMPLETED. `None` if the order is no longer ACTIVE.
    async fn complete_order(
        &self,
        order_id: OrderId,
        audit: &AuditEntry,
    ) -> Result<Option<TreatmentOrder>, Error>;

    ///
    /// Writes slots that do not already exist, keyed by `(order_id, scheduled_time)`.
    /// Nothing is written unless the order is ACTIVE.
    /// Returns the number of slots written.
    ///
    async fn materialize_slots(
        &self,
        order_id: OrderId,
        slots: &[AdministrationSlot],
    ) -> Result<u64, Error>;

    /// Slots of the order scheduled in `[from, until)`, ordered by scheduled time
    async fn slots_between(
        &self,
        order_id: OrderId,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<AdministrationSlot>, Error>;

    async fn slot(&self, slot_id: SlotId) -> Result<Option<AdministrationSlot>, Error>;

    /// PENDING slots scheduled before `before`
    async fn overdue_slots(&self, before: DateTime<Utc>)
        -> Result<Vec<AdministrationSlot>, Error>;

    ///
    /// Appends the event and its audit entry.
    ///
    /// A slot event moves the slot PENDING to ADMINISTERED.
    /// A PRN event requires the order to still be ACTIVE.
    ///
    async fn record_administration(
        &self,
        event: &AdministrationEvent,
        audit: &AuditEntry,
    ) -> Result<(), Error>;

    /// PENDING to MISSED
    async fn mark_slot_missed(
        &self,
        slot_id: SlotId,
        audit: &AuditEntry,
    ) -> Result<AdministrationSlot, Error>;

    async fn order_events(&self, order_id: OrderId) -> Result<Vec<AdministrationEvent>, Error>;

    async fn insert_consultant_order(
        &self,
        order: &ConsultantOrder,
        audit: &AuditEntry,
    ) -> Result<(), Error>;

    async fn consultant_order(
        &self,
        order_id: ConsultantOrderId,
    ) -> Result<Option<ConsultantOrder>, Error>;

    async fn pending_consultant_orders(
        &self,
        patient_id: PatientId,
    ) -> Result<Vec<ConsultantOrder>, Error>;

    /// Sets the acknowledgement once
    async fn acknowledge_consultant_order(
        &self,
        order_id: ConsultantOrderId,
        acknowledgement: &SignedAction,
        audit: &AuditEntry,
    ) -> Result<ConsultantOrder, Error>;

    /// Audit entries for an order, slot or consultant order, oldest first
    async fn audit_trail(&self, subject_id: Uuid) -> Result<Vec<AuditEntry>, Error>;
}
