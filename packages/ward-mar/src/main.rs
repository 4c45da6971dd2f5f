use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use ward_mar::config::WardConfig;
use ward_mar::log::CONFIG;
use ward_mar::{api, cli, log, prometheus, sweep, Args, Ward};

fn main() {
    let args = Args::parse();

    let config = match WardConfig::load(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Configuration Error: {}", err);
            std::process::exit(exitcode::CONFIG);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.worker_threads)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Could not start runtime: {}", err);
            std::process::exit(exitcode::OSERR);
        }
    };

    runtime.block_on(run(args, config));
}

async fn run(args: Args, config: WardConfig) {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    log::init(config.log.clone());

    debug!(
        target: CONFIG,
        msg = "Configuration loaded",
        server = config.server.to_socket_address(),
        database = %config.database,
        anchor = config.schedule.anchor,
        utc_offset_minutes = config.schedule.utc_offset_minutes,
        sweep_enabled = config.sweep.enabled,
    );

    match cli::run(args, &config).await {
        Ok(true) => std::process::exit(exitcode::OK),
        Ok(false) => {}
        Err(err) => {
            error!(msg = "Command failed", error = err.to_string());
            std::process::exit(exitcode::SOFTWARE);
        }
    }

    let addr = match config.server.socket_addr() {
        Ok(addr) => addr,
        Err(err) => {
            error!(msg = "Could not start Ward MAR", error = err.to_string());
            std::process::exit(exitcode::CONFIG);
        }
    };

    let ward = init(&config).await;

    if config.prometheus_enabled() {
        if let Err(err) = prometheus::start(&config.server.host, config.prometheus.port) {
            error!(msg = "Could not start Prometheus exporter", error = err.to_string());
            std::process::exit(exitcode::UNAVAILABLE);
        }
        info!(msg = "Prometheus exporter started", port = config.prometheus.port);
    }

    let tracker = TaskTracker::new();
    let shutdown = CancellationToken::new();

    if config.sweep.enabled {
        sweep::spawn(
            ward.clone(),
            config.sweep.interval(),
            &tracker,
            shutdown.clone(),
        );
    } else {
        warn!(msg = "Sweeper is disabled. Overdue slots will not be marked missed");
    }

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(msg = "Could not bind", %addr, error = err.to_string());
            std::process::exit(exitcode::UNAVAILABLE);
        }
    };

    info!(msg = "Ward MAR listening", %addr, version = ward_mar::VERSION);

    let server = axum::serve(listener, api::router(ward).into_make_service())
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()));

    if let Err(err) = server.await {
        error!(msg = "Server error", error = err.to_string());
    }

    info!(msg = "Shutting down Ward MAR");

    // Stops the sweeper if the server exited on its own
    shutdown.cancel();
    tracker.close();

    if (tokio::time::timeout(config.server.shutdown_timeout(), tracker.wait()).await).is_err() {
        warn!(
            msg = "Terminated {count} background tasks",
            count = tracker.len()
        );
    }
}

///
/// Connects the store and progress note lookup.
/// Exits if the database is unavailable.
///
async fn init(config: &WardConfig) -> Ward {
    match Ward::init(config).await {
        Ok(ward) => {
            info!(
                msg = "Database connected",
                database = config.database.name,
                host = config.database.host,
                port = config.database.port,
            );
            ward
        }
        Err(err) => {
            error!(msg = "Could not start Ward MAR", error = err.to_string());
            std::process::exit(exitcode::UNAVAILABLE);
        }
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        _ = sigint() => {
            info!(msg = "Received SIGINT");
        },
        _ = sigterm() => {
            info!(msg = "Received SIGTERM");
        },
    }
    shutdown.cancel();
}

async fn sigint() -> std::io::Result<()> {
    signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}

async fn sigterm() -> std::io::Result<()> {
    signal(SignalKind::terminate())?.recv().await;
    Ok(())
}
