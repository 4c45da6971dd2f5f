use crate::{error::Error, log::STORE, tls, DatabaseConfig};
use std::time::Duration;
use tokio::time;
use tokio_postgres::Client;
use tracing::{debug, error, warn};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(2);
const MAX_RETRY_COUNT: u32 = 10;

///
/// Connect to PostgreSQL, with TLS.
/// The connection task is spawned and logs if the connection is lost.
///
pub async fn database(config: &DatabaseConfig) -> Result<Client, Error> {
    let connection_string = config.to_connection_string();

    let tls_config = tls::configure_client(config);
    let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

    let connect = tokio_postgres::connect(&connection_string, tls);

    let (client, connection) = match time::timeout(config.connection_timeout(), connect).await {
        Ok(Ok((client, connection))) => (client, connection),
        Ok(Err(e)) => {
            error!(
                msg = "Could not connect to database",
                database = config.name,
                host = config.host,
                port = config.port,
                username = config.username,
            );
            error!(msg = "Confirm that the database configuration is correct");
            return Err(Error::Config(e.into()));
        }
        Err(_) => {
            error!(
                msg = "Timed out connecting to database",
                database = config.name,
                host = config.host,
                port = config.port,
                timeout_ms = config.connection_timeout,
            );
            return Err(Error::DatabaseConnection { retries: 0 });
        }
    };

    tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!(msg = "Connection error", error = err.to_string());
        }
    });
    Ok(client)
}

///
/// Replaces a client whose connection has closed with a new connection.
///
/// A single attempt is made so a request is never held for the full retry backoff. If the database
/// is still down the error is returned and the next call tries again.
///
pub async fn reconnect_if_closed(
    client: &mut Client,
    config: &DatabaseConfig,
) -> Result<(), Error> {
    if client.is_closed() {
        warn!(target: STORE, msg = "Database connection closed, reconnecting", database = %config);
        *client = database(config).await?;
        debug!(target: STORE, msg = "Database reconnected", database = %config);
    }
    Ok(())
}

///
/// Connect to the database and retry on any error
///
/// When the database and the ward service start up at the same time the database might not be ready to accept
/// connections. Retries with exponential backoff before passing on the error.
///
pub async fn database_with_retry(config: &DatabaseConfig) -> Result<Client, Error> {
    let mut retry_count = 0;

    loop {
        debug!(target: STORE, msg = "Connecting to database", database = %config);
        match database(config).await {
            Ok(client) => return Ok(client),
            Err(err) => {
                if retry_count >= MAX_RETRY_COUNT {
                    error!(msg = "Could not connect to database", retries = retry_count, error = err.to_string());
                    return Err(Error::DatabaseConnection {
                        retries: retry_count,
                    });
                }
                warn!(target: STORE, msg = "Retrying database connection", retry = retry_count, error = err.to_string());
            }
        }

        let sleep_duration_ms =
            (100 * 2_u64.pow(retry_count)).min(MAX_RETRY_DELAY.as_millis() as _);
        time::sleep(Duration::from_millis(sleep_duration_ms)).await;

        retry_count += 1;
    }
}
