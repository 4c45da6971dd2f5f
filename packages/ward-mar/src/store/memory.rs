use super::Store;
use crate::administration::{AdministrationEvent, AdministrationSlot, SlotStatus};
use crate::audit::{AuditEntry, SignedAction};
use crate::consult::ConsultantOrder;
use crate::error::{Error, TransitionError};
use crate::log::STORE;
use crate::order::{Discontinuation, OrderStatus, TreatmentOrder};
use crate::{ConsultantOrderId, OrderId, PatientId, SlotId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::trace;
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    orders: HashMap<OrderId, TreatmentOrder>,
    slots: HashMap<SlotId, AdministrationSlot>,
    events: Vec<AdministrationEvent>,
    consultant_orders: HashMap<ConsultantOrderId, ConsultantOrder>,
    audit: Vec<AuditEntry>,
}

///
/// Store held in process memory.
///
/// One lock guards all state and is held across the status check and the write of every
/// transition, so each compare-and-set is atomic.
///
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn insert_order(&self, order: &TreatmentOrder, audit: &AuditEntry) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        state.orders.insert(order.id, order.clone());
        state.audit.push(audit.clone());
        Ok(())
    }

    async fn order(&self, order_id: OrderId) -> Result<Option<TreatmentOrder>, Error> {
        let state = self.state.lock().await;
        Ok(state.orders.get(&order_id).cloned())
    }

    async fn patient_orders(&self, patient_id: PatientId) -> Result<Vec<TreatmentOrder>, Error> {
        let state = self.state.lock().await;
        let mut orders = state
            .orders
            .values()
            .filter(|o| o.patient_id == patient_id)
            .cloned()
            .collect::<Vec<_>>();
        orders.sort_by_key(|o| (o.start_date, o.id));
        Ok(orders)
    }

    async fn discontinue_order(
        &self,
        order_id: OrderId,
        discontinuation: &Discontinuation,
        audit: &AuditEntry,
    ) -> Result<TreatmentOrder, Error> {
        let mut state = self.state.lock().await;

        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| Error::not_found("Order", order_id))?;

        if order.status != OrderStatus::Active {
            return Err(TransitionError::InvalidTransition {
                order_id,
                status: order.status,
                action: "discontinued",
            }
            .into());
        }

        order.status = OrderStatus::Discontinued;
        order.discontinuation = Some(discontinuation.clone());
        let order = order.clone();

        let mut closed = 0;
        for slot in state.slots.values_mut() {
            if slot.order_id == order_id && slot.status == SlotStatus::Pending {
                slot.status = SlotStatus::DiscontinuedBeforeDue;
                closed += 1;
            }
        }

        state.audit.push(audit.clone());
        trace!(target: STORE, msg = "Order discontinued", %order_id, closed);

        Ok(order)
    }

    async fn orders_due_for_completion(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TreatmentOrder>, Error> {
        let state = self.state.lock().await;
        let mut due = state
            .orders
            .values()
            .filter(|o| o.is_due_for_completion(now))
            .cloned()
            .collect::<Vec<_>>();
        due.sort_by_key(|o| (o.start_date, o.id));
        Ok(due)
    }

    async fn complete_order(
        &self,
        order_id: OrderId,
        audit: &AuditEntry,
    ) -> Result<Option<TreatmentOrder>, Error> {
        let mut state = self.state.lock().await;

        let completed = match state.orders.get_mut(&order_id) {
            Some(order) if order.status == OrderStatus::Active => {
                order.status = OrderStatus::Completed;
                order.completed_at = Some(audit.signed.at);
                Some(order.clone())
            }
            _ => None,
        };

        if completed.is_some() {
            state.audit.push(audit.clone());
        }

        Ok(completed)
    }

    async fn materialize_slots(
        &self,
        order_id: OrderId,
        slots: &[AdministrationSlot],
    ) -> Result<u64, Error> {
        let mut state = self.state.lock().await;

        let active = state.orders.get(&order_id).is_some_and(|o| o.is_active());
        if !active {
            return Ok(0);
        }

        let mut written = 0;
        for slot in slots.iter().filter(|s| s.order_id == order_id) {
            if !state.slots.contains_key(&slot.id) {
                state.slots.insert(slot.id, slot.clone());
                written += 1;
            }
        }

        Ok(written)
    }

    async fn slots_between(
        &self,
        order_id: OrderId,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<AdministrationSlot>, Error> {
        let state = self.state.lock().await;
        let mut slots = state
            .slots
            .values()
            .filter(|s| {
                s.order_id == order_id && s.scheduled_time >= from && s.scheduled_time < until
            })
            .cloned()
            .collect::<Vec<_>>();
        slots.sort_by_key(|s| s.scheduled_time);
        Ok(slots)
    }

    async fn slot(&self, slot_id: SlotId) -> Result<Option<AdministrationSlot>, Error> {
        let state = self.state.lock().await;
        Ok(state.slots.get(&slot_id).cloned())
    }

    async fn overdue_slots(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<AdministrationSlot>, Error> {
        let state = self.state.lock().await;
        let mut slots = state
            .slots
            .values()
            .filter(|s| s.status == SlotStatus::Pending && s.scheduled_time < before)
            .cloned()
            .collect::<Vec<_>>();
        slots.sort_by_key(|s| s.scheduled_time);
        Ok(slots)
    }

    async fn record_administration(
        &self,
        event: &AdministrationEvent,
        audit: &AuditEntry,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().await;

        match event.slot_id {
            Some(slot_id) => {
                let slot = state
                    .slots
                    .get_mut(&slot_id)
                    .ok_or_else(|| Error::not_found("Slot", slot_id))?;

                if slot.status != SlotStatus::Pending {
                    return Err(TransitionError::InvalidSlotState {
                        slot_id,
                        status: slot.status,
                    }
                    .into());
                }

                slot.status = SlotStatus::Administered;
            }
            None => {
                let order = state
                    .orders
                    .get(&event.order_id)
                    .ok_or_else(|| Error::not_found("Order", event.order_id))?;

                if !order.is_active() {
                    return Err(TransitionError::InvalidTransition {
                        order_id: order.id,
                        status: order.status,
                        action: "administered",
                    }
                    .into());
                }
            }
        }

        state.events.push(event.clone());
        state.audit.push(audit.clone());

        Ok(())
    }

    async fn mark_slot_missed(
        &self,
        slot_id: SlotId,
        audit: &AuditEntry,
    ) -> Result<AdministrationSlot, Error> {
        let mut state = self.state.lock().await;

        let slot = state
            .slots
            .get_mut(&slot_id)
            .ok_or_else(|| Error::not_found("Slot", slot_id))?;

        if slot.status != SlotStatus::Pending {
            return Err(TransitionError::InvalidSlotState {
                slot_id,
                status: slot.status,
            }
            .into());
        }

        slot.status = SlotStatus::Missed;
        let slot = slot.clone();

        state.audit.push(audit.clone());

        Ok(slot)
    }

    async fn order_events(&self, order_id: OrderId) -> Result<Vec<AdministrationEvent>, Error> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn insert_consultant_order(
        &self,
        order: &ConsultantOrder,
        audit: &AuditEntry,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        state.consultant_orders.insert(order.id, order.clone());
        state.audit.push(audit.clone());
        Ok(())
    }

    async fn consultant_order(
        &self,
        order_id: ConsultantOrderId,
    ) -> Result<Option<ConsultantOrder>, Error> {
        let state = self.state.lock().await;
        Ok(state.consultant_orders.get(&order_id).cloned())
    }

    async fn pending_consultant_orders(
        &self,
        patient_id: PatientId,
    ) -> Result<Vec<ConsultantOrder>, Error> {
        let state = self.state.lock().await;
        let mut pending = state
            .consultant_orders
            .values()
            .filter(|o| o.patient_id == patient_id && !o.is_acknowledged())
            .cloned()
            .collect::<Vec<_>>();
        pending.sort_by_key(|o| (o.created_at, o.id));
        Ok(pending)
    }

    async fn acknowledge_consultant_order(
        &self,
        order_id: ConsultantOrderId,
        acknowledgement: &SignedAction,
        audit: &AuditEntry,
    ) -> Result<ConsultantOrder, Error> {
        let mut state = self.state.lock().await;

        let order = state
            .consultant_orders
            .get_mut(&order_id)
            .ok_or_else(|| Error::not_found("Consultant order", order_id))?;

        if let Some(existing) = &order.acknowledgement {
            return Err(TransitionError::AlreadyAcknowledged {
                order_id,
                acknowledged_at: existing.at,
            }
            .into());
        }

        *order = order.clone().acknowledged(acknowledgement.clone());
        let order = order.clone();

        state.audit.push(audit.clone());

        Ok(order)
    }

    async fn audit_trail(&self, subject_id: Uuid) -> Result<Vec<AuditEntry>, Error> {
        let state = self.state.lock().await;
        Ok(state
            .audit
            .iter()
            .filter(|e| e.subject_id == subject_id)
            .cloned()
            .collect())
    }
}
