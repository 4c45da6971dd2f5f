use super::ProgressNotes;
use crate::error::Error;
use crate::PatientId;
use chrono::NaiveDate;
use std::collections::HashSet;
use tokio::sync::RwLock;

///
/// Progress notes held in memory.
/// Used when no progress note service is configured, and in tests.
///
#[derive(Debug, Default)]
pub struct InMemoryProgressNotes {
    completed: RwLock<HashSet<(PatientId, NaiveDate)>>,
}

impl InMemoryProgressNotes {
    pub async fn record(&self, patient_id: PatientId, date: NaiveDate) {
        self.completed.write().await.insert((patient_id, date));
    }

    pub async fn remove(&self, patient_id: PatientId, date: NaiveDate) {
        self.completed.write().await.remove(&(patient_id, date));
    }
}

#[async_trait::async_trait]
impl ProgressNotes for InMemoryProgressNotes {
    async fn has_progress_note(
        &self,
        patient_id: PatientId,
        date: NaiveDate,
    ) -> Result<bool, Error> {
        Ok(self.completed.read().await.contains(&(patient_id, date)))
    }
}
