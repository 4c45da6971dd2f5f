use super::Store;
use crate::administration::{AdministrationEvent, AdministrationSlot, SlotStatus};
use crate::audit::{AuditAction, AuditEntry, SignedAction};
use crate::connect;
use crate::consult::{ConsultantOrder, ConsultantOrderStatus, Priority};
use crate::error::{Error, StoreError, TransitionError};
use crate::log::STORE;
use crate::order::{Discontinuation, OrderStatus, Route, TreatmentOrder};
use crate::schedule::Frequency;
use crate::{ConsultantOrderId, DatabaseConfig, OrderId, PatientId, SlotId};
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};
use tokio_postgres::{Client, GenericClient, Row};
use tracing::{debug, trace};
use uuid::Uuid;

pub const SCHEMA: &str = include_str!("./sql/schema.sql");

const INSERT_ORDER: &str = "INSERT INTO treatment_orders (
        id, patient_id, medication_name, dosage, route, frequency, start_date, end_date,
        duration_days, dilution, is_prn, prn_instructions, status,
        prescribed_by, prescribed_at, prescribed_signature
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)";

const SELECT_ORDER: &str = "SELECT * FROM treatment_orders WHERE id = $1";

const SELECT_PATIENT_ORDERS: &str =
    "SELECT * FROM treatment_orders WHERE patient_id = $1 ORDER BY start_date, id";

const LOCK_ORDER_STATUS: &str = "SELECT status FROM treatment_orders WHERE id = $1 FOR UPDATE";

const SHARE_ORDER_STATUS: &str = "SELECT status FROM treatment_orders WHERE id = $1 FOR SHARE";

const DISCONTINUE_ORDER: &str = "UPDATE treatment_orders
    SET status = 'DISCONTINUED', discontinued_reason = $2, discontinued_by = $3,
        discontinued_at = $4, discontinued_signature = $5
    WHERE id = $1 AND status = 'ACTIVE'
    RETURNING *";

const DISCONTINUE_PENDING_SLOTS: &str = "UPDATE administration_slots
    SET status = 'DISCONTINUED_BEFORE_DUE'
    WHERE order_id = $1 AND status = 'PENDING'";

const SELECT_ORDERS_DUE: &str = "SELECT * FROM treatment_orders
    WHERE status = 'ACTIVE'
      AND LEAST(end_date, start_date + make_interval(days => duration_days)) <= $1
    ORDER BY start_date, id";

const COMPLETE_ORDER: &str = "UPDATE treatment_orders
    SET status = 'COMPLETED', completed_at = $2
    WHERE id = $1 AND status = 'ACTIVE'
    RETURNING *";

const INSERT_SLOT: &str = "INSERT INTO administration_slots (id, order_id, scheduled_time, status)
    VALUES ($1, $2, $3, 'PENDING')
    ON CONFLICT DO NOTHING";

const SELECT_SLOTS_BETWEEN: &str = "SELECT * FROM administration_slots
    WHERE order_id = $1 AND scheduled_time >= $2 AND scheduled_time < $3
    ORDER BY scheduled_time";

const SELECT_SLOT: &str = "SELECT * FROM administration_slots WHERE id = $1";

const SELECT_OVERDUE_SLOTS: &str = "SELECT * FROM administration_slots
    WHERE status = 'PENDING' AND scheduled_time < $1
    ORDER BY scheduled_time";

const ADMINISTER_SLOT: &str = "UPDATE administration_slots
    SET status = 'ADMINISTERED'
    WHERE id = $1 AND status = 'PENDING'
    RETURNING id";

const MISS_SLOT: &str = "UPDATE administration_slots
    SET status = 'MISSED'
    WHERE id = $1 AND status = 'PENDING'
    RETURNING *";

const SELECT_SLOT_STATUS: &str = "SELECT status FROM administration_slots WHERE id = $1";

const INSERT_EVENT: &str = "INSERT INTO administration_events (
        id, slot_id, order_id, patient_id, administered_by, administered_at, signature, remarks
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)";

const SELECT_ORDER_EVENTS: &str =
    "SELECT * FROM administration_events WHERE order_id = $1 ORDER BY administered_at, id";

const INSERT_CONSULTANT_ORDER: &str = "INSERT INTO consultant_orders (
        id, patient_id, order_type, details, priority, created_at
    ) VALUES ($1, $2, $3, $4, $5, $6)";

const SELECT_CONSULTANT_ORDER: &str = "SELECT * FROM consultant_orders WHERE id = $1";

const SELECT_PENDING_CONSULTANT_ORDERS: &str = "SELECT * FROM consultant_orders
    WHERE patient_id = $1 AND acknowledged_at IS NULL
    ORDER BY created_at, id";

const ACKNOWLEDGE_CONSULTANT_ORDER: &str = "UPDATE consultant_orders
    SET acknowledged_by = $2, acknowledged_at = $3, acknowledgement_signature = $4
    WHERE id = $1 AND acknowledged_at IS NULL
    RETURNING *";

const INSERT_AUDIT: &str = "INSERT INTO audit_entries (
        id, action, subject_id, patient_id, user_id, signed_at, signature, detail
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)";

const SELECT_AUDIT_TRAIL: &str = "SELECT * FROM audit_entries WHERE subject_id = $1 ORDER BY seq";

///
/// Store backed by PostgreSQL.
///
/// Each transition runs in one transaction: the status is changed with
/// `UPDATE ... WHERE status = <expected> RETURNING`, and the event and audit rows are inserted
/// before commit. Any error rolls the whole transaction back.
///
/// A closed connection is replaced on the next call.
///
pub struct PostgresStore {
    config: DatabaseConfig,
    client: Mutex<Client>,
}

impl PostgresStore {
    pub fn new(client: Client, config: DatabaseConfig) -> Self {
        PostgresStore {
            config,
            client: Mutex::new(client),
        }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, Error> {
        let client = connect::database_with_retry(config).await?;
        debug!(target: STORE, msg = "Store connected", database = %config);
        Ok(PostgresStore::new(client, config.clone()))
    }

    async fn client(&self) -> Result<MutexGuard<'_, Client>, Error> {
        let mut client = self.client.lock().await;
        connect::reconnect_if_closed(&mut client, &self.config).await?;
        Ok(client)
    }

    /// Applies the bundled schema
    pub async fn migrate(&self) -> Result<(), Error> {
        let client = self.client().await?;
        client.batch_execute(SCHEMA).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Store for PostgresStore {
    async fn ping(&self) -> Result<(), Error> {
        let client = self.client().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn insert_order(&self, order: &TreatmentOrder, audit: &AuditEntry) -> Result<(), Error> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        tx.execute(
            INSERT_ORDER,
            &[
                &order.id,
                &order.patient_id,
                &order.medication_name,
                &order.dosage,
                &order.route.as_str(),
                &order.frequency.code(),
                &order.start_date,
                &order.end_date,
                &order.duration_days,
                &order.dilution,
                &order.is_prn,
                &order.prn_instructions,
                &order.status.as_str(),
                &order.prescribed.user_id,
                &order.prescribed.at,
                &order.prescribed.signature,
            ],
        )
        .await?;

        insert_audit(&tx, audit).await?;
        tx.commit().await?;

        trace!(target: STORE, msg = "Order inserted", order_id = %order.id);
        Ok(())
    }

    async fn order(&self, order_id: OrderId) -> Result<Option<TreatmentOrder>, Error> {
        let client = self.client().await?;
        client
            .query_opt(SELECT_ORDER, &[&order_id])
            .await?
            .map(|row| order_from_row(&row))
            .transpose()
    }

    async fn patient_orders(&self, patient_id: PatientId) -> Result<Vec<TreatmentOrder>, Error> {
        let client = self.client().await?;
        client
            .query(SELECT_PATIENT_ORDERS, &[&patient_id])
            .await?
            .iter()
            .map(order_from_row)
            .collect()
    }

    async fn discontinue_order(
        &self,
        order_id: OrderId,
        discontinuation: &Discontinuation,
        audit: &AuditEntry,
    ) -> Result<TreatmentOrder, Error> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let status = match tx.query_opt(LOCK_ORDER_STATUS, &[&order_id]).await? {
            Some(row) => status_from_row::<OrderStatus>(&row)?,
            None => return Err(Error::not_found("Order", order_id)),
        };

        let row = tx
            .query_opt(
                DISCONTINUE_ORDER,
                &[
                    &order_id,
                    &discontinuation.reason,
                    &discontinuation.signed.user_id,
                    &discontinuation.signed.at,
                    &discontinuation.signed.signature,
                ],
            )
            .await?;

        let order = match row {
            Some(row) => order_from_row(&row)?,
            None => {
                return Err(TransitionError::InvalidTransition {
                    order_id,
                    status,
                    action: "discontinued",
                }
                .into())
            }
        };

        let closed = tx.execute(DISCONTINUE_PENDING_SLOTS, &[&order_id]).await?;
        insert_audit(&tx, audit).await?;
        tx.commit().await?;

        trace!(target: STORE, msg = "Order discontinued", %order_id, closed);
        Ok(order)
    }

    async fn orders_due_for_completion(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TreatmentOrder>, Error> {
        let client = self.client().await?;
        client
            .query(SELECT_ORDERS_DUE, &[&now])
            .await?
            .iter()
            .map(order_from_row)
            .collect()
    }

    async fn complete_order(
        &self,
        order_id: OrderId,
        audit: &AuditEntry,
    ) -> Result<Option<TreatmentOrder>, Error> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let order = match tx
            .query_opt(COMPLETE_ORDER, &[&order_id, &audit.signed.at])
            .await?
        {
            Some(row) => order_from_row(&row)?,
            None => return Ok(None),
        };

        insert_audit(&tx, audit).await?;
        tx.commit().await?;

        Ok(Some(order))
    }

    async fn materialize_slots(
        &self,
        order_id: OrderId,
        slots: &[AdministrationSlot],
    ) -> Result<u64, Error> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        // Holds off a concurrent discontinue until the slots are written
        let active = match tx.query_opt(SHARE_ORDER_STATUS, &[&order_id]).await? {
            Some(row) => status_from_row::<OrderStatus>(&row)? == OrderStatus::Active,
            None => false,
        };

        if !active {
            return Ok(0);
        }

        let mut written = 0;
        for slot in slots.iter().filter(|s| s.order_id == order_id) {
            written += tx
                .execute(INSERT_SLOT, &[&slot.id, &slot.order_id, &slot.scheduled_time])
                .await?;
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn slots_between(
        &self,
        order_id: OrderId,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<AdministrationSlot>, Error> {
        let client = self.client().await?;
        client
            .query(SELECT_SLOTS_BETWEEN, &[&order_id, &from, &until])
            .await?
            .iter()
            .map(slot_from_row)
            .collect()
    }

    async fn slot(&self, slot_id: SlotId) -> Result<Option<AdministrationSlot>, Error> {
        let client = self.client().await?;
        client
            .query_opt(SELECT_SLOT, &[&slot_id])
            .await?
            .map(|row| slot_from_row(&row))
            .transpose()
    }

    async fn overdue_slots(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<AdministrationSlot>, Error> {
        let client = self.client().await?;
        client
            .query(SELECT_OVERDUE_SLOTS, &[&before])
            .await?
            .iter()
            .map(slot_from_row)
            .collect()
    }

    async fn record_administration(
        &self,
        event: &AdministrationEvent,
        audit: &AuditEntry,
    ) -> Result<(), Error> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        match event.slot_id {
            Some(slot_id) => {
                if tx.query_opt(ADMINISTER_SLOT, &[&slot_id]).await?.is_none() {
                    return Err(slot_not_pending(&tx, slot_id).await);
                }
            }
            None => {
                let status = match tx.query_opt(SHARE_ORDER_STATUS, &[&event.order_id]).await? {
                    Some(row) => status_from_row::<OrderStatus>(&row)?,
                    None => return Err(Error::not_found("Order", event.order_id)),
                };

                if status != OrderStatus::Active {
                    return Err(TransitionError::InvalidTransition {
                        order_id: event.order_id,
                        status,
                        action: "administered",
                    }
                    .into());
                }
            }
        }

        tx.execute(
            INSERT_EVENT,
            &[
                &event.id,
                &event.slot_id,
                &event.order_id,
                &event.patient_id,
                &event.administered.user_id,
                &event.administered.at,
                &event.administered.signature,
                &event.remarks,
            ],
        )
        .await?;

        insert_audit(&tx, audit).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn mark_slot_missed(
        &self,
        slot_id: SlotId,
        audit: &AuditEntry,
    ) -> Result<AdministrationSlot, Error> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let slot = match tx.query_opt(MISS_SLOT, &[&slot_id]).await? {
            Some(row) => slot_from_row(&row)?,
            None => return Err(slot_not_pending(&tx, slot_id).await),
        };

        insert_audit(&tx, audit).await?;
        tx.commit().await?;

        Ok(slot)
    }

    async fn order_events(&self, order_id: OrderId) -> Result<Vec<AdministrationEvent>, Error> {
        let client = self.client().await?;
        let rows = client.query(SELECT_ORDER_EVENTS, &[&order_id]).await?;

        Ok(rows
            .iter()
            .map(|row| AdministrationEvent {
                id: row.get("id"),
                slot_id: row.get("slot_id"),
                order_id: row.get("order_id"),
                patient_id: row.get("patient_id"),
                administered: SignedAction {
                    user_id: row.get("administered_by"),
                    at: row.get("administered_at"),
                    signature: row.get("signature"),
                },
                remarks: row.get("remarks"),
            })
            .collect())
    }

    async fn insert_consultant_order(
        &self,
        order: &ConsultantOrder,
        audit: &AuditEntry,
    ) -> Result<(), Error> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        tx.execute(
            INSERT_CONSULTANT_ORDER,
            &[
                &order.id,
                &order.patient_id,
                &order.order_type,
                &order.details,
                &order.priority.as_str(),
                &order.created_at,
            ],
        )
        .await?;

        insert_audit(&tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn consultant_order(
        &self,
        order_id: ConsultantOrderId,
    ) -> Result<Option<ConsultantOrder>, Error> {
        let client = self.client().await?;
        client
            .query_opt(SELECT_CONSULTANT_ORDER, &[&order_id])
            .await?
            .map(|row| consultant_order_from_row(&row))
            .transpose()
    }

    async fn pending_consultant_orders(
        &self,
        patient_id: PatientId,
    ) -> Result<Vec<ConsultantOrder>, Error> {
        let client = self.client().await?;
        client
            .query(SELECT_PENDING_CONSULTANT_ORDERS, &[&patient_id])
            .await?
            .iter()
            .map(consultant_order_from_row)
            .collect()
    }

    async fn acknowledge_consultant_order(
        &self,
        order_id: ConsultantOrderId,
        acknowledgement: &SignedAction,
        audit: &AuditEntry,
    ) -> Result<ConsultantOrder, Error> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                ACKNOWLEDGE_CONSULTANT_ORDER,
                &[
                    &order_id,
                    &acknowledgement.user_id,
                    &acknowledgement.at,
                    &acknowledgement.signature,
                ],
            )
            .await?;

        let order = match row {
            Some(row) => consultant_order_from_row(&row)?,
            None => {
                return match tx.query_opt(SELECT_CONSULTANT_ORDER, &[&order_id]).await? {
                    Some(row) => {
                        let existing = consultant_order_from_row(&row)?;
                        let acknowledged_at = existing
                            .acknowledgement
                            .map(|a| a.at)
                            .unwrap_or(acknowledgement.at);
                        Err(TransitionError::AlreadyAcknowledged {
                            order_id,
                            acknowledged_at,
                        }
                        .into())
                    }
                    None => Err(Error::not_found("Consultant order", order_id)),
                };
            }
        };

        insert_audit(&tx, audit).await?;
        tx.commit().await?;

        Ok(order)
    }

    async fn audit_trail(&self, subject_id: Uuid) -> Result<Vec<AuditEntry>, Error> {
        let client = self.client().await?;
        client
            .query(SELECT_AUDIT_TRAIL, &[&subject_id])
            .await?
            .iter()
            .map(|row| -> Result<AuditEntry, Error> {
                Ok(AuditEntry {
                    id: row.get("id"),
                    action: row.get::<_, String>("action").parse::<AuditAction>()?,
                    subject_id: row.get("subject_id"),
                    patient_id: row.get("patient_id"),
                    signed: SignedAction {
                        user_id: row.get("user_id"),
                        at: row.get("signed_at"),
                        signature: row.get("signature"),
                    },
                    detail: row.get("detail"),
                })
            })
            .collect()
    }
}

async fn insert_audit<C: GenericClient>(client: &C, audit: &AuditEntry) -> Result<(), Error> {
    client
        .execute(
            INSERT_AUDIT,
            &[
                &audit.id,
                &audit.action.as_str(),
                &audit.subject_id,
                &audit.patient_id,
                &audit.signed.user_id,
                &audit.signed.at,
                &audit.signed.signature,
                &audit.detail,
            ],
        )
        .await?;
    Ok(())
}

///
/// The error for a slot compare-and-set that matched no PENDING row
///
async fn slot_not_pending<C: GenericClient>(client: &C, slot_id: SlotId) -> Error {
    match client.query_opt(SELECT_SLOT_STATUS, &[&slot_id]).await {
        Ok(Some(row)) => match status_from_row::<SlotStatus>(&row) {
            Ok(status) => TransitionError::InvalidSlotState { slot_id, status }.into(),
            Err(err) => err,
        },
        Ok(None) => Error::not_found("Slot", slot_id),
        Err(err) => err.into(),
    }
}

fn status_from_row<T>(row: &Row) -> Result<T, Error>
where
    T: std::str::FromStr<Err = StoreError>,
{
    Ok(row.get::<_, String>("status").parse::<T>()?)
}

fn order_from_row(row: &Row) -> Result<TreatmentOrder, Error> {
    let route = row.get::<_, String>("route");
    let route = route
        .parse::<Route>()
        .map_err(|_| StoreError::UnexpectedValue {
            column: "route",
            value: route,
        })?;

    let frequency = row.get::<_, String>("frequency");
    let frequency = frequency
        .parse::<Frequency>()
        .map_err(|_| StoreError::UnexpectedValue {
            column: "frequency",
            value: frequency,
        })?;

    let discontinued_by: Option<Uuid> = row.get("discontinued_by");
    let discontinued_at: Option<DateTime<Utc>> = row.get("discontinued_at");

    let discontinuation = match (discontinued_by, discontinued_at) {
        (Some(user_id), Some(at)) => Some(Discontinuation {
            reason: row
                .get::<_, Option<String>>("discontinued_reason")
                .unwrap_or_default(),
            signed: SignedAction {
                user_id,
                at,
                signature: row
                    .get::<_, Option<String>>("discontinued_signature")
                    .unwrap_or_default(),
            },
        }),
        _ => None,
    };

    Ok(TreatmentOrder {
        id: row.get("id"),
        patient_id: row.get("patient_id"),
        medication_name: row.get("medication_name"),
        dosage: row.get("dosage"),
        route,
        frequency,
        start_date: row.get("start_date"),
        end_date: row.get("end_date"),
        duration_days: row.get("duration_days"),
        dilution: row.get("dilution"),
        is_prn: row.get("is_prn"),
        prn_instructions: row.get("prn_instructions"),
        status: status_from_row(row)?,
        prescribed: SignedAction {
            user_id: row.get("prescribed_by"),
            at: row.get("prescribed_at"),
            signature: row.get("prescribed_signature"),
        },
        discontinuation,
        completed_at: row.get("completed_at"),
    })
}

fn slot_from_row(row: &Row) -> Result<AdministrationSlot, Error> {
    Ok(AdministrationSlot {
        id: row.get("id"),
        order_id: row.get("order_id"),
        scheduled_time: row.get("scheduled_time"),
        status: status_from_row(row)?,
    })
}

fn consultant_order_from_row(row: &Row) -> Result<ConsultantOrder, Error> {
    let acknowledged_by: Option<Uuid> = row.get("acknowledged_by");
    let acknowledged_at: Option<DateTime<Utc>> = row.get("acknowledged_at");

    let acknowledgement = match (acknowledged_by, acknowledged_at) {
        (Some(user_id), Some(at)) => Some(SignedAction {
            user_id,
            at,
            signature: row
                .get::<_, Option<String>>("acknowledgement_signature")
                .unwrap_or_default(),
        }),
        _ => None,
    };

    let status = if acknowledgement.is_some() {
        ConsultantOrderStatus::Acknowledged
    } else {
        ConsultantOrderStatus::Pending
    };

    Ok(ConsultantOrder {
        id: row.get("id"),
        patient_id: row.get("patient_id"),
        order_type: row.get("order_type"),
        details: row.get("details"),
        priority: row.get::<_, String>("priority").parse::<Priority>()?,
        created_at: row.get("created_at"),
        status,
        acknowledgement,
    })
}
