use super::ProgressNotes;
use crate::connect;
use crate::error::Error;
use crate::log::GATE;
use crate::{DatabaseConfig, PatientId};
use chrono::NaiveDate;
use tokio::sync::Mutex;
use tokio_postgres::Client;
use tracing::trace;

const PROGRESS_NOTE_QUERY: &str = include_str!("./sql/select_progress_note.sql");

///
/// Reads completion from the documentation service's `daily_progress_notes` table.
/// A closed connection is replaced on the next lookup.
///
pub struct PostgresProgressNotes {
    config: DatabaseConfig,
    client: Mutex<Client>,
}

impl PostgresProgressNotes {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, Error> {
        let client = connect::database(config).await?;
        Ok(PostgresProgressNotes {
            config: config.clone(),
            client: Mutex::new(client),
        })
    }
}

#[async_trait::async_trait]
impl ProgressNotes for PostgresProgressNotes {
    async fn has_progress_note(
        &self,
        patient_id: PatientId,
        date: NaiveDate,
    ) -> Result<bool, Error> {
        let mut client = self.client.lock().await;
        connect::reconnect_if_closed(&mut client, &self.config).await?;

        let row = client
            .query_one(PROGRESS_NOTE_QUERY, &[&patient_id, &date])
            .await?;

        let completed: bool = row.get("completed");
        trace!(target: GATE, msg = "Progress note lookup", %patient_id, %date, completed);

        Ok(completed)
    }
}
