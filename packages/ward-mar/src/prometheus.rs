use crate::error::Error;
use crate::log::DEVELOPMENT;
use metrics::{counter, describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{debug, info};

// See https://prometheus.io/docs/practices/naming/
pub const ADMINISTRATIONS_TOTAL: &str = "ward_mar_administrations_total";
pub const PRN_ADMINISTRATIONS_TOTAL: &str = "ward_mar_prn_administrations_total";

pub const GATE_DENIED_TOTAL: &str = "ward_mar_gate_denied_total";
pub const GATE_UNAVAILABLE_TOTAL: &str = "ward_mar_gate_unavailable_total";
pub const GATE_LOOKUP_DURATION_SECONDS: &str = "ward_mar_gate_lookup_duration_seconds";

pub const SLOTS_MATERIALIZED_TOTAL: &str = "ward_mar_slots_materialized_total";
pub const SLOTS_MISSED_TOTAL: &str = "ward_mar_slots_missed_total";

pub const ORDERS_CREATED_TOTAL: &str = "ward_mar_orders_created_total";
pub const ORDERS_DISCONTINUED_TOTAL: &str = "ward_mar_orders_discontinued_total";
pub const ORDERS_COMPLETED_TOTAL: &str = "ward_mar_orders_completed_total";

pub const ACKNOWLEDGEMENTS_TOTAL: &str = "ward_mar_acknowledgements_total";

pub fn start(host: &str, port: u16) -> Result<(), Error> {
    let address = format!("{host}:{port}");
    let socket_address: SocketAddr =
        address
            .parse()
            .map_err(|_| crate::error::ConfigError::InvalidServerName {
                name: host.to_owned(),
            })?;

    debug!(target: DEVELOPMENT, msg = "Starting Prometheus exporter", port);

    PrometheusBuilder::new()
        .with_http_listener(socket_address)
        .install()?;

    describe_counter!(ADMINISTRATIONS_TOTAL, "Number of recorded administrations");
    describe_counter!(
        PRN_ADMINISTRATIONS_TOTAL,
        "Number of recorded as-needed administrations"
    );

    describe_counter!(
        GATE_DENIED_TOTAL,
        "Number of administrations refused for a missing daily progress note"
    );
    describe_counter!(
        GATE_UNAVAILABLE_TOTAL,
        "Number of administrations refused because progress note status could not be confirmed"
    );
    describe_histogram!(
        GATE_LOOKUP_DURATION_SECONDS,
        Unit::Seconds,
        "Duration of daily progress note lookups"
    );

    describe_counter!(
        SLOTS_MATERIALIZED_TOTAL,
        "Number of administration slots written"
    );
    describe_counter!(SLOTS_MISSED_TOTAL, "Number of slots marked missed");

    describe_counter!(ORDERS_CREATED_TOTAL, "Number of treatment orders created");
    describe_counter!(
        ORDERS_DISCONTINUED_TOTAL,
        "Number of treatment orders discontinued"
    );
    describe_counter!(
        ORDERS_COMPLETED_TOTAL,
        "Number of treatment orders completed"
    );

    describe_counter!(
        ACKNOWLEDGEMENTS_TOTAL,
        "Number of consultant orders acknowledged"
    );

    // Prometheus endpoint is empty on startup and looks like an error
    // Explicitly set count to zero
    counter!(ADMINISTRATIONS_TOTAL).absolute(0);

    info!(msg = "Prometheus exporter started", port);
    Ok(())
}
