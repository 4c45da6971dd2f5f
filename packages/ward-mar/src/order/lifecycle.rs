use super::{Discontinuation, NewOrder, TreatmentOrder};
use crate::audit::{AuditAction, AuditEntry, SignedAction};
use crate::error::{Error, ValidationError};
use crate::log::ORDERS;
use crate::prometheus::{ORDERS_COMPLETED_TOTAL, ORDERS_CREATED_TOTAL, ORDERS_DISCONTINUED_TOTAL};
use crate::store::Store;
use crate::{OrderId, PatientId};
use chrono::{DateTime, Utc};
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct OrderLifecycle {
    store: Arc<dyn Store>,
}

impl OrderLifecycle {
    pub fn new(store: Arc<dyn Store>) -> Self {
        OrderLifecycle { store }
    }

    pub async fn create_order(
        &self,
        new: NewOrder,
        prescribed: SignedAction,
    ) -> Result<TreatmentOrder, Error> {
        let order = new.into_order(prescribed)?;

        let audit = AuditEntry::new(
            AuditAction::OrderCreated,
            order.id,
            order.patient_id,
            order.prescribed.clone(),
        )
        .with_detail(format!(
            "{} {} {} {}",
            order.medication_name, order.dosage, order.route, order.frequency
        ));

        self.store.insert_order(&order, &audit).await?;

        counter!(ORDERS_CREATED_TOTAL).increment(1);
        info!(target: ORDERS, msg = "Order created", order_id = %order.id, patient_id = %order.patient_id, frequency = %order.frequency);

        Ok(order)
    }

    ///
    /// Stops an ACTIVE order.
    ///
    /// Every PENDING slot of the order becomes DISCONTINUED_BEFORE_DUE in the same write.
    ///
    pub async fn discontinue_order(
        &self,
        order_id: OrderId,
        reason: String,
        signed: SignedAction,
    ) -> Result<TreatmentOrder, Error> {
        let order = self.get_order(order_id).await?;

        let mut errors = ValidationError::default();
        if reason.trim().is_empty() {
            errors.push("reason", "must not be empty");
        }
        signed.validate(&mut errors);
        errors.into_result()?;

        let discontinuation = Discontinuation {
            reason: reason.trim().to_owned(),
            signed,
        };

        let audit = AuditEntry::new(
            AuditAction::OrderDiscontinued,
            order_id,
            order.patient_id,
            discontinuation.signed.clone(),
        )
        .with_detail(discontinuation.reason.clone());

        let order = self
            .store
            .discontinue_order(order_id, &discontinuation, &audit)
            .await?;

        counter!(ORDERS_DISCONTINUED_TOTAL).increment(1);
        info!(target: ORDERS, msg = "Order discontinued", %order_id, user_id = %discontinuation.signed.user_id);

        Ok(order)
    }

    ///
    /// Completes every ACTIVE order whose effective end has passed.
    /// Signed by the system user. Returns the ids of the completed orders.
    ///
    pub async fn complete_due_orders(&self, now: DateTime<Utc>) -> Result<Vec<OrderId>, Error> {
        let due = self.store.orders_due_for_completion(now).await?;

        let mut completed = Vec::with_capacity(due.len());

        for order in due {
            let audit = AuditEntry::new(
                AuditAction::OrderCompleted,
                order.id,
                order.patient_id,
                SignedAction::system(now),
            );

            match self.store.complete_order(order.id, &audit).await? {
                Some(order) => {
                    counter!(ORDERS_COMPLETED_TOTAL).increment(1);
                    info!(target: ORDERS, msg = "Order completed", order_id = %order.id);
                    completed.push(order.id);
                }
                None => {
                    debug!(target: ORDERS, msg = "Order no longer active", order_id = %order.id);
                }
            }
        }

        Ok(completed)
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<TreatmentOrder, Error> {
        self.store
            .order(order_id)
            .await?
            .ok_or_else(|| Error::not_found("Order", order_id))
    }

    pub async fn list_patient_orders(
        &self,
        patient_id: PatientId,
    ) -> Result<Vec<TreatmentOrder>, Error> {
        self.store.patient_orders(patient_id).await
    }
}
