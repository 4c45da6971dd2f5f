use crate::administration::AdministrationTracker;
use crate::config::WardConfig;
use crate::consult::Acknowledgements;
use crate::error::Error;
use crate::gate::{DpnGate, PostgresProgressNotes};
use crate::log::STORE;
use crate::order::OrderLifecycle;
use crate::schedule::WardClock;
use crate::store::{PostgresStore, Store};
use chrono::TimeDelta;
use std::sync::Arc;
use tracing::{debug, warn};

///
/// The ward's medication record services, sharing one store.
///
#[derive(Clone)]
pub struct Ward {
    pub orders: OrderLifecycle,
    pub tracker: AdministrationTracker,
    pub acknowledgements: Acknowledgements,
    store: Arc<dyn Store>,
}

impl Ward {
    pub fn new(store: Arc<dyn Store>, gate: DpnGate, clock: WardClock, grace: TimeDelta) -> Self {
        Ward {
            orders: OrderLifecycle::new(store.clone()),
            tracker: AdministrationTracker::new(store.clone(), gate, clock, grace),
            acknowledgements: Acknowledgements::new(store.clone()),
            store,
        }
    }

    ///
    /// Connects the PostgreSQL store and progress note lookup described by `config`.
    /// Fails on start if the database cannot be reached.
    ///
    pub async fn init(config: &WardConfig) -> Result<Ward, Error> {
        let clock = config.schedule.clock()?;
        let grace = config.schedule.missed_grace()?;

        if !config.database.with_tls_verification {
            warn!(msg = "Bypassing Transport Layer Security (TLS) verification for database connections");
        }

        let store = PostgresStore::connect(&config.database).await?;
        store.ping().await?;

        let notes = PostgresProgressNotes::connect(&config.database).await?;
        let gate = DpnGate::new(Arc::new(notes), config.gate.timeout());

        debug!(target: STORE, msg = "Ward initialized", anchor = %clock.anchor(), offset = %clock.offset());

        Ok(Ward::new(Arc::new(store), gate, clock, grace))
    }

    pub fn clock(&self) -> &WardClock {
        self.tracker.clock()
    }

    /// Returns an error if the store cannot be reached
    pub async fn ping(&self) -> Result<(), Error> {
        self.store.ping().await
    }
}
