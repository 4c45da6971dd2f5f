mod memory;
mod postgres;

use crate::error::{Error, GateError};
use crate::log::GATE;
use crate::prometheus::{GATE_DENIED_TOTAL, GATE_LOOKUP_DURATION_SECONDS, GATE_UNAVAILABLE_TOTAL};
use crate::PatientId;
use chrono::NaiveDate;
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

pub use memory::InMemoryProgressNotes;
pub use postgres::PostgresProgressNotes;

/// Read-only view of daily progress note completion, owned by the clinical documentation service
#[async_trait::async_trait]
pub trait ProgressNotes: Send + Sync {
    /// True if the patient's progress note for `date` has been completed
    async fn has_progress_note(&self, patient_id: PatientId, date: NaiveDate)
        -> Result<bool, Error>;
}

///
/// Refuses medication administration on a day without a completed daily progress note.
///
/// A lookup that fails or does not answer within `timeout` refuses administration.
///
#[derive(Clone)]
pub struct DpnGate {
    notes: Arc<dyn ProgressNotes>,
    timeout: Duration,
}

impl DpnGate {
    pub fn new(notes: Arc<dyn ProgressNotes>, timeout: Duration) -> Self {
        DpnGate { notes, timeout }
    }

    pub async fn check(&self, patient_id: PatientId, date: NaiveDate) -> Result<(), GateError> {
        let start = Instant::now();

        let lookup =
            tokio::time::timeout(self.timeout, self.notes.has_progress_note(patient_id, date))
                .await;

        histogram!(GATE_LOOKUP_DURATION_SECONDS).record(start.elapsed());

        match lookup {
            Ok(Ok(true)) => {
                debug!(target: GATE, msg = "Progress note found", %patient_id, %date);
                Ok(())
            }
            Ok(Ok(false)) => {
                counter!(GATE_DENIED_TOTAL).increment(1);
                warn!(target: GATE, msg = "Progress note missing", %patient_id, %date);
                Err(GateError::BlockedByMissingProgressNote { patient_id, date })
            }
            Ok(Err(err)) => {
                counter!(GATE_UNAVAILABLE_TOTAL).increment(1);
                error!(target: GATE, msg = "Progress note lookup failed", %patient_id, %date, error = err.to_string());
                Err(GateError::Unavailable {
                    patient_id,
                    date,
                    reason: err.to_string(),
                })
            }
            Err(_) => {
                counter!(GATE_UNAVAILABLE_TOTAL).increment(1);
                error!(target: GATE, msg = "Progress note lookup timed out", %patient_id, %date, timeout_ms = self.timeout.as_millis() as u64);
                Err(GateError::Unavailable {
                    patient_id,
                    date,
                    reason: format!("lookup timed out after {}ms", self.timeout.as_millis()),
                })
            }
        }
    }

    pub async fn is_administration_permitted(
        &self,
        patient_id: PatientId,
        date: NaiveDate,
    ) -> bool {
        self.check(patient_id, date).await.is_ok()
    }
}
