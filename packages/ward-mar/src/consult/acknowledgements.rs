use super::{ConsultantOrder, NewConsultantOrder};
use crate::audit::{AuditAction, AuditEntry, SignedAction};
use crate::error::{Error, TransitionError, ValidationError};
use crate::log::ACKNOWLEDGE;
use crate::prometheus::ACKNOWLEDGEMENTS_TOTAL;
use crate::store::Store;
use crate::{ConsultantOrderId, PatientId};
use chrono::{DateTime, Utc};
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct Acknowledgements {
    store: Arc<dyn Store>,
}

impl Acknowledgements {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Acknowledgements { store }
    }

    pub async fn create_consultant_order(
        &self,
        new: NewConsultantOrder,
        created_at: DateTime<Utc>,
    ) -> Result<ConsultantOrder, Error> {
        let order = new.into_order(created_at)?;

        let audit = AuditEntry::new(
            AuditAction::ConsultantOrderCreated,
            order.id,
            order.patient_id,
            SignedAction::system(created_at),
        )
        .with_detail(format!("{} {}", order.priority, order.order_type));

        self.store.insert_consultant_order(&order, &audit).await?;

        debug!(target: ACKNOWLEDGE, msg = "Consultant order created", order_id = %order.id, priority = %order.priority);
        Ok(order)
    }

    ///
    /// Records the acknowledgement of a consultant order, once.
    ///
    /// A second acknowledgement fails with `AlreadyAcknowledged`, including one that loses a race.
    ///
    pub async fn acknowledge(
        &self,
        order_id: ConsultantOrderId,
        signed: SignedAction,
    ) -> Result<ConsultantOrder, Error> {
        let mut errors = ValidationError::default();
        signed.validate(&mut errors);
        errors.into_result()?;

        let order = self.get_consultant_order(order_id).await?;

        if let Some(acknowledgement) = &order.acknowledgement {
            return Err(TransitionError::AlreadyAcknowledged {
                order_id,
                acknowledged_at: acknowledgement.at,
            }
            .into());
        }

        if signed.at < order.created_at {
            return Err(
                ValidationError::field("signed_by.at", "must not be before the order was created")
                    .into(),
            );
        }

        let audit = AuditEntry::new(
            AuditAction::ConsultantOrderAcknowledged,
            order_id,
            order.patient_id,
            signed.clone(),
        );

        let order = self
            .store
            .acknowledge_consultant_order(order_id, &signed, &audit)
            .await?;

        counter!(ACKNOWLEDGEMENTS_TOTAL).increment(1);
        info!(target: ACKNOWLEDGE, msg = "Consultant order acknowledged", %order_id, user_id = %signed.user_id);

        Ok(order)
    }

    pub async fn get_consultant_order(
        &self,
        order_id: ConsultantOrderId,
    ) -> Result<ConsultantOrder, Error> {
        self.store
            .consultant_order(order_id)
            .await?
            .ok_or_else(|| Error::not_found("Consultant order", order_id))
    }

    pub async fn list_pending(&self, patient_id: PatientId) -> Result<Vec<ConsultantOrder>, Error> {
        self.store.pending_consultant_orders(patient_id).await
    }
}
