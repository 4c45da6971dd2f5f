use super::{
    AdministerRequest, AdministrationEvent, AdministrationSlot, AdministrationTarget, SlotStatus,
};
use crate::audit::{AuditAction, AuditEntry, SignedAction};
use crate::error::{Error, TransitionError, ValidationError};
use crate::gate::DpnGate;
use crate::log::ADMINISTRATION;
use crate::order::TreatmentOrder;
use crate::prometheus::{
    ADMINISTRATIONS_TOTAL, PRN_ADMINISTRATIONS_TOTAL, SLOTS_MATERIALIZED_TOTAL, SLOTS_MISSED_TOTAL,
};
use crate::schedule::{self, WardClock};
use crate::store::Store;
use crate::{OrderId, PatientId, SlotId};
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

///
/// Tracks each scheduled dose from PENDING to its final state.
///
/// Administration is refused unless the patient's daily progress note exists for the day of administration.
///
#[derive(Clone)]
pub struct AdministrationTracker {
    store: Arc<dyn Store>,
    gate: DpnGate,
    clock: WardClock,
    grace: TimeDelta,
}

impl AdministrationTracker {
    pub fn new(store: Arc<dyn Store>, gate: DpnGate, clock: WardClock, grace: TimeDelta) -> Self {
        AdministrationTracker {
            store,
            gate,
            clock,
            grace,
        }
    }

    pub fn clock(&self) -> &WardClock {
        &self.clock
    }

    ///
    /// The order's slots on `date`, ordered by scheduled time.
    ///
    /// Slots for an ACTIVE order are written first if they do not exist yet.
    /// A terminal order only returns the slots it already has. PRN orders have no slots.
    /// A date outside the supported years is a `ValidationError` on `date`.
    ///
    pub async fn get_todays_slots(
        &self,
        order_id: OrderId,
        date: NaiveDate,
    ) -> Result<Vec<AdministrationSlot>, Error> {
        let (from, until) = self
            .clock
            .start_of_day(date)
            .zip(self.clock.end_of_day(date))
            .ok_or_else(|| {
                ValidationError::field(
                    "date",
                    format!(
                        "must be in the years {} to {}",
                        schedule::SUPPORTED_YEARS.start(),
                        schedule::SUPPORTED_YEARS.end()
                    ),
                )
            })?;

        let order = self.order(order_id).await?;

        if order.is_prn {
            return Ok(vec![]);
        }

        if order.is_active() {
            let schedule = schedule::generate(
                order.frequency,
                order.start_date,
                order.effective_end(),
                date,
                &self.clock,
            );

            let slots = schedule
                .iter()
                .map(|instant| AdministrationSlot::pending(order.id, instant))
                .collect::<Vec<_>>();

            if !slots.is_empty() {
                let written = self.store.materialize_slots(order.id, &slots).await?;
                if written > 0 {
                    counter!(SLOTS_MATERIALIZED_TOTAL).increment(written);
                    debug!(target: ADMINISTRATION, msg = "Slots materialized", %order_id, %date, written);
                }
            }
        }

        self.store.slots_between(order.id, from, until).await
    }

    ///
    /// Records a dose against a scheduled slot, or an as-needed dose against a PRN order.
    ///
    /// The daily progress note is checked for the ward day of the administration time. On refusal
    /// nothing is written and the slot stays PENDING.
    ///
    pub async fn administer(
        &self,
        target: AdministrationTarget,
        request: AdministerRequest,
    ) -> Result<AdministrationEvent, Error> {
        let mut errors = ValidationError::default();
        request.signed_by.validate(&mut errors);
        errors.into_result()?;

        let (order, slot) = match target {
            AdministrationTarget::Slot(slot_id) => {
                let slot = self.slot(slot_id).await?;
                let order = self.order(slot.order_id).await?;
                (order, Some(slot))
            }
            AdministrationTarget::Prn(order_id) => (self.order(order_id).await?, None),
        };

        let date = self.clock.date_of(request.signed_by.at);
        self.gate.check(order.patient_id, date).await?;

        match &slot {
            Some(slot) => {
                if slot.status != SlotStatus::Pending {
                    return Err(TransitionError::InvalidSlotState {
                        slot_id: slot.id,
                        status: slot.status,
                    }
                    .into());
                }
            }
            None => {
                if !order.is_prn {
                    return Err(ValidationError::field(
                        "order_id",
                        "as-needed administration requires a PRN order",
                    )
                    .into());
                }
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

        let event = AdministrationEvent {
            id: Uuid::new_v4(),
            slot_id: slot.as_ref().map(|s| s.id),
            order_id: order.id,
            patient_id: order.patient_id,
            administered: request.signed_by,
            remarks: request.remarks.filter(|r| !r.trim().is_empty()),
        };

        let audit = AuditEntry::new(
            AuditAction::Administered,
            event.slot_id.unwrap_or(order.id),
            order.patient_id,
            event.administered.clone(),
        )
        .with_detail(format!("{} {}", order.medication_name, order.dosage));

        self.store.record_administration(&event, &audit).await?;

        if event.slot_id.is_some() {
            counter!(ADMINISTRATIONS_TOTAL).increment(1);
        } else {
            counter!(PRN_ADMINISTRATIONS_TOTAL).increment(1);
        }

        info!(
            target: ADMINISTRATION,
            msg = "Dose administered",
            order_id = %order.id,
            slot_id = ?event.slot_id,
            user_id = %event.administered.user_id,
        );

        Ok(event)
    }

    ///
    /// Marks a PENDING slot MISSED once its grace window has passed.
    ///
    pub async fn mark_missed(
        &self,
        slot_id: SlotId,
        as_of: DateTime<Utc>,
    ) -> Result<AdministrationSlot, Error> {
        let slot = self.slot(slot_id).await?;

        if slot.status != SlotStatus::Pending {
            return Err(TransitionError::InvalidSlotState {
                slot_id,
                status: slot.status,
            }
            .into());
        }

        let overdue_at = slot.scheduled_time + self.grace;
        if as_of <= overdue_at {
            return Err(TransitionError::WithinGraceWindow {
                slot_id,
                overdue_at,
            }
            .into());
        }

        let order = self.order(slot.order_id).await?;
        self.miss(&slot, order.patient_id, as_of).await
    }

    ///
    /// Marks every PENDING slot past its grace window as MISSED.
    /// Returns the number of slots marked.
    ///
    pub async fn sweep_missed(&self, as_of: DateTime<Utc>) -> Result<usize, Error> {
        let overdue = self.store.overdue_slots(as_of - self.grace).await?;

        let mut patients: HashMap<OrderId, PatientId> = HashMap::new();
        let mut missed = 0;

        for slot in overdue {
            let patient_id = match patients.get(&slot.order_id) {
                Some(patient_id) => *patient_id,
                None => {
                    let order = self.order(slot.order_id).await?;
                    patients.insert(order.id, order.patient_id);
                    order.patient_id
                }
            };

            match self.miss(&slot, patient_id, as_of).await {
                Ok(_) => missed += 1,
                // administered or discontinued since the overdue slots were read
                Err(Error::Transition(TransitionError::InvalidSlotState { .. })) => {}
                Err(err) => return Err(err),
            }
        }

        Ok(missed)
    }

    pub async fn list_events(&self, order_id: OrderId) -> Result<Vec<AdministrationEvent>, Error> {
        let order = self.order(order_id).await?;
        self.store.order_events(order.id).await
    }

    async fn miss(
        &self,
        slot: &AdministrationSlot,
        patient_id: PatientId,
        as_of: DateTime<Utc>,
    ) -> Result<AdministrationSlot, Error> {
        let audit = AuditEntry::new(
            AuditAction::SlotMissed,
            slot.id,
            patient_id,
            SignedAction::system(as_of),
        )
        .with_detail(format!("scheduled {}", slot.scheduled_time.to_rfc3339()));

        let slot = self.store.mark_slot_missed(slot.id, &audit).await?;

        counter!(SLOTS_MISSED_TOTAL).increment(1);
        warn!(target: ADMINISTRATION, msg = "Dose missed", slot_id = %slot.id, order_id = %slot.order_id, scheduled_time = %slot.scheduled_time);

        Ok(slot)
    }

    async fn order(&self, order_id: OrderId) -> Result<TreatmentOrder, Error> {
        self.store
            .order(order_id)
            .await?
            .ok_or_else(|| Error::not_found("Order", order_id))
    }

    async fn slot(&self, slot_id: SlotId) -> Result<AdministrationSlot, Error> {
        self.store
            .slot(slot_id)
            .await?
            .ok_or_else(|| Error::not_found("Slot", slot_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GateError;
    use crate::order::OrderStatus;
    use crate::test_helpers::{
        at, new_order, nurse, signed_at, today, ward_with, ward_with_notes, AlwaysAllow,
        AlwaysDeny, TestWard, Unreachable,
    };
    use chrono::Timelike;

    fn request() -> AdministerRequest {
        AdministerRequest {
            signed_by: nurse(),
            remarks: None,
        }
    }

    async fn tds_order(ward: &TestWard) -> TreatmentOrder {
        ward.orders
            .create_order(new_order(Uuid::new_v4(), "TDS"), nurse())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn materialization_is_idempotent() {
        let ward = ward_with(Arc::new(AlwaysAllow));

        for code in ["OD", "BD", "TDS", "QID", "Q2H", "Q4H", "Q6H", "Q8H", "Q12H", "STAT"] {
            let order = ward
                .orders
                .create_order(new_order(Uuid::new_v4(), code), nurse())
                .await
                .unwrap();

            let first = ward.tracker.get_todays_slots(order.id, today()).await.unwrap();
            let second = ward.tracker.get_todays_slots(order.id, today()).await.unwrap();

            assert!(!first.is_empty(), "{code}");
            assert_eq!(first, second, "{code}");
        }
    }

    #[tokio::test]
    async fn concurrent_materialization_writes_each_slot_once() {
        let ward = ward_with(Arc::new(AlwaysAllow));
        let order_id = tds_order(&ward).await.id;

        let handles = (0..8)
            .map(|_| {
                let tracker = ward.tracker.clone();
                tokio::spawn(async move { tracker.get_todays_slots(order_id, today()).await })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().len(), 3);
        }
    }

    #[tokio::test]
    async fn tds_scenario() {
        let (ward, notes) = ward_with_notes();
        let order = tds_order(&ward).await;

        let slots = ward.tracker.get_todays_slots(order.id, today()).await.unwrap();
        assert_eq!(slots.len(), 3);
        assert!(slots.iter().all(|s| s.status == SlotStatus::Pending));
        assert_eq!(
            slots.iter().map(|s| s.scheduled_time.hour()).collect::<Vec<_>>(),
            vec![6, 14, 22]
        );

        for slot in &slots {
            let err = ward
                .tracker
                .administer(AdministrationTarget::Slot(slot.id), request())
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                Error::Gate(GateError::BlockedByMissingProgressNote { .. })
            ));
        }

        notes.record(order.patient_id, today()).await;

        let event = ward
            .tracker
            .administer(AdministrationTarget::Slot(slots[0].id), request())
            .await
            .unwrap();
        assert_eq!(event.slot_id, Some(slots[0].id));

        let slots = ward.tracker.get_todays_slots(order.id, today()).await.unwrap();
        assert_eq!(
            slots.iter().map(|s| s.status).collect::<Vec<_>>(),
            vec![
                SlotStatus::Administered,
                SlotStatus::Pending,
                SlotStatus::Pending
            ]
        );
    }

    #[tokio::test]
    async fn blocked_administration_changes_nothing() {
        let ward = ward_with(Arc::new(AlwaysDeny));
        let order = tds_order(&ward).await;
        let slots = ward.tracker.get_todays_slots(order.id, today()).await.unwrap();

        let err = ward
            .tracker
            .administer(AdministrationTarget::Slot(slots[0].id), request())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Gate(GateError::BlockedByMissingProgressNote { .. })
        ));

        let slot = ward.store.slot(slots[0].id).await.unwrap().unwrap();
        assert_eq!(slot.status, SlotStatus::Pending);
        assert!(ward.tracker.list_events(order.id).await.unwrap().is_empty());
        assert_eq!(ward.store.audit_trail(slot.id).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn unavailable_gate_refuses_administration() {
        let ward = ward_with(Arc::new(Unreachable));
        let order = tds_order(&ward).await;
        let slots = ward.tracker.get_todays_slots(order.id, today()).await.unwrap();

        let err = ward
            .tracker
            .administer(AdministrationTarget::Slot(slots[0].id), request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Gate(GateError::Unavailable { .. })));

        let slot = ward.store.slot(slots[0].id).await.unwrap().unwrap();
        assert_eq!(slot.status, SlotStatus::Pending);
    }

    #[tokio::test]
    async fn gate_uses_the_day_of_administration() {
        let (ward, notes) = ward_with_notes();
        let order = tds_order(&ward).await;
        let slots = ward.tracker.get_todays_slots(order.id, today()).await.unwrap();

        // note recorded for yesterday only
        notes.record(order.patient_id, today().pred_opt().unwrap()).await;

        let err = ward
            .tracker
            .administer(AdministrationTarget::Slot(slots[0].id), request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Gate(_)));
    }

    #[tokio::test]
    async fn administered_slot_is_terminal() {
        let ward = ward_with(Arc::new(AlwaysAllow));
        let order = tds_order(&ward).await;
        let slots = ward.tracker.get_todays_slots(order.id, today()).await.unwrap();
        let slot_id = slots[0].id;

        ward.tracker
            .administer(AdministrationTarget::Slot(slot_id), request())
            .await
            .unwrap();

        let err = ward
            .tracker
            .administer(AdministrationTarget::Slot(slot_id), request())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Slot {slot_id} is ADMINISTERED, expected PENDING")
        );

        let err = ward
            .tracker
            .mark_missed(slot_id, at(today(), 23, 59))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transition(TransitionError::InvalidSlotState {
                status: SlotStatus::Administered,
                ..
            })
        ));

        let events = ward.tracker.list_events(order.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].slot_id, Some(slot_id));
    }

    #[tokio::test]
    async fn concurrent_administration_records_one_event() {
        let ward = ward_with(Arc::new(AlwaysAllow));
        let order = tds_order(&ward).await;
        let slots = ward.tracker.get_todays_slots(order.id, today()).await.unwrap();
        let slot_id = slots[1].id;

        let handles = (0..8)
            .map(|_| {
                let tracker = ward.tracker.clone();
                tokio::spawn(async move {
                    tracker
                        .administer(AdministrationTarget::Slot(slot_id), request())
                        .await
                })
            })
            .collect::<Vec<_>>();

        let mut administered = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => administered += 1,
                Err(Error::Transition(TransitionError::InvalidSlotState { .. })) => {}
                Err(other) => panic!("unexpected {other:?}"),
            }
        }

        assert_eq!(administered, 1);
        assert_eq!(ward.tracker.list_events(order.id).await.unwrap().len(), 1);
        assert_eq!(ward.store.audit_trail(slot_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn discontinue_closes_pending_slots() {
        let ward = ward_with(Arc::new(AlwaysAllow));
        let order = tds_order(&ward).await;
        let slots = ward.tracker.get_todays_slots(order.id, today()).await.unwrap();

        ward.tracker
            .administer(AdministrationTarget::Slot(slots[0].id), request())
            .await
            .unwrap();

        ward.orders
            .discontinue_order(order.id, "Changed to IV".to_string(), nurse())
            .await
            .unwrap();

        let slots = ward.tracker.get_todays_slots(order.id, today()).await.unwrap();
        assert_eq!(
            slots.iter().map(|s| s.status).collect::<Vec<_>>(),
            vec![
                SlotStatus::Administered,
                SlotStatus::DiscontinuedBeforeDue,
                SlotStatus::DiscontinuedBeforeDue
            ]
        );

        // a terminal order gets no new slots
        let tomorrow = today().succ_opt().unwrap();
        assert!(ward
            .tracker
            .get_todays_slots(order.id, tomorrow)
            .await
            .unwrap()
            .is_empty());

        let err = ward
            .tracker
            .administer(AdministrationTarget::Slot(slots[1].id), request())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transition(TransitionError::InvalidSlotState {
                status: SlotStatus::DiscontinuedBeforeDue,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn prn_administration_has_no_slot() {
        let ward = ward_with(Arc::new(AlwaysAllow));
        let order = ward
            .orders
            .create_order(new_order(Uuid::new_v4(), "PRN"), nurse())
            .await
            .unwrap();

        assert!(ward
            .tracker
            .get_todays_slots(order.id, today())
            .await
            .unwrap()
            .is_empty());

        let first = ward
            .tracker
            .administer(AdministrationTarget::Prn(order.id), request())
            .await
            .unwrap();
        let second = ward
            .tracker
            .administer(
                AdministrationTarget::Prn(order.id),
                AdministerRequest {
                    signed_by: signed_at(at(today(), 20, 0)),
                    remarks: Some("Pain 6/10".to_string()),
                },
            )
            .await
            .unwrap();

        assert_eq!(first.slot_id, None);
        assert_eq!(second.remarks.as_deref(), Some("Pain 6/10"));
        assert_eq!(ward.tracker.list_events(order.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn prn_administration_requires_active_prn_order() {
        let ward = ward_with(Arc::new(AlwaysAllow));

        let scheduled = tds_order(&ward).await;
        let err = ward
            .tracker
            .administer(AdministrationTarget::Prn(scheduled.id), request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let prn = ward
            .orders
            .create_order(new_order(Uuid::new_v4(), "PRN"), nurse())
            .await
            .unwrap();
        ward.orders
            .discontinue_order(prn.id, "No longer needed".to_string(), nurse())
            .await
            .unwrap();

        let err = ward
            .tracker
            .administer(AdministrationTarget::Prn(prn.id), request())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transition(TransitionError::InvalidTransition {
                status: OrderStatus::Discontinued,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn missed_only_after_grace() {
        let ward = ward_with(Arc::new(AlwaysAllow));
        let order = tds_order(&ward).await;
        let slots = ward.tracker.get_todays_slots(order.id, today()).await.unwrap();
        let six = slots[0].id;

        // one hour grace after 06:00
        let err = ward
            .tracker
            .mark_missed(six, at(today(), 7, 0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transition(TransitionError::WithinGraceWindow { .. })
        ));

        let slot = ward.tracker.mark_missed(six, at(today(), 7, 1)).await.unwrap();
        assert_eq!(slot.status, SlotStatus::Missed);

        let trail = ward.store.audit_trail(six).await.unwrap();
        assert_eq!(trail[0].action, AuditAction::SlotMissed);

        let err = ward
            .tracker
            .administer(AdministrationTarget::Slot(six), request())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transition(TransitionError::InvalidSlotState {
                status: SlotStatus::Missed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn sweep_marks_overdue_slots() {
        let ward = ward_with(Arc::new(AlwaysAllow));
        let order = tds_order(&ward).await;
        let slots = ward.tracker.get_todays_slots(order.id, today()).await.unwrap();

        ward.tracker
            .administer(AdministrationTarget::Slot(slots[0].id), request())
            .await
            .unwrap();

        // 06:00 administered, 14:00 overdue, 22:00 not yet due
        let missed = ward.tracker.sweep_missed(at(today(), 16, 0)).await.unwrap();
        assert_eq!(missed, 1);

        let slots = ward.tracker.get_todays_slots(order.id, today()).await.unwrap();
        assert_eq!(
            slots.iter().map(|s| s.status).collect::<Vec<_>>(),
            vec![
                SlotStatus::Administered,
                SlotStatus::Missed,
                SlotStatus::Pending
            ]
        );

        assert_eq!(ward.tracker.sweep_missed(at(today(), 16, 0)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_slot_is_not_found() {
        let ward = ward_with(Arc::new(AlwaysAllow));
        let err = ward
            .tracker
            .administer(AdministrationTarget::Slot(Uuid::new_v4()), request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { entity: "Slot", .. }));
    }

    #[tokio::test]
    async fn date_outside_supported_years_is_invalid() {
        let ward = ward_with(Arc::new(AlwaysAllow));
        let order = tds_order(&ward).await;

        for date in [NaiveDate::MAX, NaiveDate::MIN] {
            let err = ward
                .tracker
                .get_todays_slots(order.id, date)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                Error::Validation(ValidationError { ref fields }) if fields[0].name == "date"
            ));
        }
    }

    #[tokio::test]
    async fn overlong_course_is_refused_and_sweep_continues() {
        let ward = ward_with(Arc::new(AlwaysAllow));

        let mut new = new_order(Uuid::new_v4(), "TDS");
        new.duration_days = Some(i32::MAX);
        let err = ward.orders.create_order(new, nurse()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let order = tds_order(&ward).await;
        assert_eq!(
            ward.tracker.get_todays_slots(order.id, today()).await.unwrap().len(),
            3
        );
        assert!(ward
            .orders
            .complete_due_orders(at(today(), 12, 0))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn unsigned_administration_is_invalid() {
        let ward = ward_with(Arc::new(AlwaysAllow));
        let order = tds_order(&ward).await;
        let slots = ward.tracker.get_todays_slots(order.id, today()).await.unwrap();

        let mut request = request();
        request.signed_by.signature = String::new();

        let err = ward
            .tracker
            .administer(AdministrationTarget::Slot(slots[0].id), request)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
