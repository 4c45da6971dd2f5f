use crate::error::Error;
use crate::log::MIGRATE;
use crate::store::{PostgresStore, SCHEMA};
use crate::WardConfig;
use tracing::info;

#[derive(clap::Args, Clone, Debug)]
#[command(version, about, long_about)]
///
/// Apply the bundled schema to the configured database.
/// Every statement is idempotent and can be applied to an existing database.
///
pub struct Migrate {
    /// Print the schema without applying it
    #[arg(short, long, default_value_t = false)]
    pub dry_run: bool,
}

impl Migrate {
    pub async fn run(&self, config: &WardConfig) -> Result<(), Error> {
        if self.dry_run {
            println!("{SCHEMA}");
            return Ok(());
        }

        info!(target: MIGRATE, msg = "Applying schema", database = %config.database);

        let store = PostgresStore::connect(&config.database).await?;
        store.migrate().await?;

        info!(target: MIGRATE, msg = "Schema applied");
        Ok(())
    }
}
