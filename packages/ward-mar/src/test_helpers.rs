/// This module contains test helpers
use crate::administration::AdministrationTracker;
use crate::audit::SignedAction;
use crate::consult::Acknowledgements;
use crate::error::Error;
use crate::gate::{DpnGate, InMemoryProgressNotes, ProgressNotes};
use crate::order::{NewOrder, OrderLifecycle};
use crate::schedule::WardClock;
use crate::store::{MemoryStore, Store};
use crate::Ward;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;
use uuid::Uuid;

/// Runs a function with all MAR_ environment variables unset
pub(crate) fn with_no_mar_vars<F: FnOnce() -> R, R>(f: F) -> R {
    let mar_vars = std::env::vars()
        .map(|(k, _v)| k)
        .filter(|k| k.starts_with("MAR_"))
        .collect::<Vec<_>>();

    temp_env::with_vars_unset(&mar_vars, f)
}

/// Progress note lookup that always finds a note
pub(crate) struct AlwaysAllow;

/// Progress note lookup that never finds a note
pub(crate) struct AlwaysDeny;

/// Progress note lookup whose backing service is down
pub(crate) struct Unreachable;

/// Progress note lookup that never answers in time
pub(crate) struct Hanging;

#[async_trait::async_trait]
impl ProgressNotes for AlwaysAllow {
    async fn has_progress_note(&self, _patient_id: Uuid, _date: NaiveDate) -> Result<bool, Error> {
        Ok(true)
    }
}

#[async_trait::async_trait]
impl ProgressNotes for AlwaysDeny {
    async fn has_progress_note(&self, _patient_id: Uuid, _date: NaiveDate) -> Result<bool, Error> {
        Ok(false)
    }
}

#[async_trait::async_trait]
impl ProgressNotes for Unreachable {
    async fn has_progress_note(&self, _patient_id: Uuid, _date: NaiveDate) -> Result<bool, Error> {
        Err(io::Error::from(io::ErrorKind::ConnectionRefused).into())
    }
}

#[async_trait::async_trait]
impl ProgressNotes for Hanging {
    async fn has_progress_note(&self, _patient_id: Uuid, _date: NaiveDate) -> Result<bool, Error> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(true)
    }
}

pub(crate) const GATE_TIMEOUT: Duration = Duration::from_millis(50);

/// 06:00 anchor, UTC ward clock
pub(crate) fn clock() -> WardClock {
    WardClock::new(
        NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        chrono::FixedOffset::east_opt(0).unwrap(),
    )
}

pub(crate) fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 14).unwrap()
}

pub(crate) fn at(date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(hour, minute, 0).unwrap())
}

pub(crate) fn nurse() -> SignedAction {
    SignedAction::new(Uuid::new_v4(), at(today(), 8, 0), "sig-nurse")
}

pub(crate) fn signed_at(when: DateTime<Utc>) -> SignedAction {
    SignedAction::new(Uuid::new_v4(), when, "sig")
}

pub(crate) fn new_order(patient_id: Uuid, frequency: &str) -> NewOrder {
    NewOrder {
        patient_id,
        medication_name: "Paracetamol".to_string(),
        dosage: "1 g".to_string(),
        route: "ORAL".to_string(),
        frequency: frequency.to_string(),
        start_date: at(today(), 0, 0),
        end_date: None,
        duration_days: None,
        dilution: None,
        is_prn: frequency.eq_ignore_ascii_case("PRN"),
        prn_instructions: None,
    }
}

/// A ward wired to an in-memory store with the given progress note lookup
pub(crate) struct TestWard {
    pub store: Arc<MemoryStore>,
    pub orders: OrderLifecycle,
    pub tracker: AdministrationTracker,
    pub acknowledgements: Acknowledgements,
}

pub(crate) fn ward_with(notes: Arc<dyn ProgressNotes>) -> TestWard {
    let store = Arc::new(MemoryStore::default());
    let shared: Arc<dyn Store> = store.clone();
    let gate = DpnGate::new(notes, GATE_TIMEOUT);

    TestWard {
        orders: OrderLifecycle::new(shared.clone()),
        tracker: AdministrationTracker::new(shared.clone(), gate, clock(), TimeDelta::hours(1)),
        acknowledgements: Acknowledgements::new(shared),
        store,
    }
}

pub(crate) fn ward_with_notes() -> (TestWard, Arc<InMemoryProgressNotes>) {
    let notes = Arc::new(InMemoryProgressNotes::default());
    (ward_with(notes.clone()), notes)
}

pub(crate) fn full_ward(notes: Arc<dyn ProgressNotes>) -> Ward {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
    Ward::new(
        store,
        DpnGate::new(notes, GATE_TIMEOUT),
        clock(),
        TimeDelta::hours(1),
    )
}

// Mock Writer for flexibly testing the logging behaviour, copy-pasted from
// tracing_subscriber's internal test code (with JSON functionality deleted).
// https://github.com/tokio-rs/tracing/blob/b02a700ba6850ad813f77e65144114f866074a8f/tracing-subscriber/src/fmt/mod.rs#L1247-L1314
pub(crate) struct MockWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MockWriter {
    pub(crate) fn new(buf: Arc<Mutex<Vec<u8>>>) -> Self {
        Self { buf }
    }

    pub(crate) fn map_error<Guard>(err: TryLockError<Guard>) -> io::Error {
        match err {
            TryLockError::WouldBlock => io::Error::from(io::ErrorKind::WouldBlock),
            TryLockError::Poisoned(_) => io::Error::from(io::ErrorKind::Other),
        }
    }

    pub(crate) fn buf(&self) -> io::Result<MutexGuard<'_, Vec<u8>>> {
        self.buf.try_lock().map_err(Self::map_error)
    }
}

impl io::Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.buf()?.flush()
    }
}

#[derive(Clone, Default)]
pub(crate) struct MockMakeWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MockMakeWriter {
    pub(crate) fn get_string(&self) -> String {
        let mut buf = self.buf.lock().expect("lock shouldn't be poisoned");
        let string = std::str::from_utf8(&buf[..])
            .expect("formatter should not have produced invalid utf-8")
            .to_owned();
        buf.clear();
        string
    }
}

impl<'a> MakeWriter<'a> for MockMakeWriter {
    type Writer = MockWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MockWriter::new(self.buf.clone())
    }
}
