use async_trait::async_trait;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, info, warn};

use crate::reading::Reading;
use crate::storage::{
    connection::{DatabaseConfig, RetryPolicy},
    error::{Result, StorageError},
    ReadingStore,
};

const INSERT_READING: &str = "INSERT INTO weather_logs \
     (id_station, dates, temperature_celsius, humidity, wind, wind_speed, pressure) \
     VALUES ($1, $2, $3, $4, $5, $6, $7) \
     RETURNING id";

/// Owner of the pipeline's single database connection
///
/// The connection is opened lazily on first use and checked with a liveness
/// probe before every insert. A dead connection is replaced using the retry
/// policy's exponential backoff. Access is through `&mut self`, so at most one
/// statement is ever in flight on the connection.
pub struct StorageGateway {
    config: DatabaseConfig,
    retry: RetryPolicy,
    client: Option<Client>,
}

impl StorageGateway {
    /// Create a gateway; no connection is made until it is needed
    pub fn new(config: DatabaseConfig, retry: RetryPolicy) -> Self {
        Self {
            config,
            retry,
            client: None,
        }
    }

    /// Make sure a live connection is held, connecting if necessary
    pub async fn connect(&mut self) -> Result<()> {
        self.ensure_connected().await.map(|_| ())
    }

    /// Whether a connection is currently cached
    pub fn is_connected(&self) -> bool {
        self.client.as_ref().is_some_and(|client| !client.is_closed())
    }

    /// Drop the cached connection
    pub fn close(&mut self) {
        if self.client.take().is_some() {
            info!(database = %self.config, "Closed database connection");
        }
    }

    /// Insert a reading in its own transaction, returning the new row id
    ///
    /// If the insert fails because the connection went away, the connection
    /// is re-established and the insert retried exactly once.
    pub async fn insert(&mut self, reading: &Reading) -> Result<i32> {
        let client = self.ensure_connected().await?;

        match insert_in_transaction(client, reading).await {
            Ok(id) => Ok(id),
            Err(err) if err.is_transient() => {
                warn!(error = %err, "Insert failed on a broken connection, reconnecting once");
                self.client = None;

                let client = self.ensure_connected().await?;
                let result = insert_in_transaction(client, reading).await;
                if matches!(result, Err(ref e) if e.is_transient()) {
                    self.client = None;
                }
                result
            }
            Err(err) => Err(err),
        }
    }

    async fn ensure_connected(&mut self) -> Result<&Client> {
        let alive = match &self.client {
            Some(client) => probe(client).await,
            None => false,
        };

        if !alive {
            if self.client.take().is_some() {
                warn!(database = %self.config, "Database liveness probe failed, reconnecting");
            }
            let client = self.open().await?;
            self.client = Some(client);
        }

        self.client
            .as_ref()
            .ok_or_else(|| StorageError::Transient("no database connection".to_string()))
    }

    /// Open a new connection with exponential backoff
    async fn open(&self) -> Result<Client> {
        let pg_config = self.config.to_pg_config();
        let max_attempts = self.retry.attempts();
        let mut attempt = 1;

        loop {
            match pg_config.connect(NoTls).await {
                Ok((client, connection)) => {
                    // The connection object drives the socket until the client is dropped
                    tokio::spawn(async move {
                        if let Err(e) = connection.await {
                            warn!(error = %e, "Database connection terminated");
                        }
                    });

                    info!(database = %self.config, attempt, "Connected to database");
                    return Ok(client);
                }
                Err(e) => {
                    warn!(
                        database = %self.config,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Database connection attempt failed"
                    );

                    if attempt >= max_attempts {
                        return Err(StorageError::Transient(format!(
                            "could not connect to {} after {} attempts: {}",
                            self.config, attempt, e
                        )));
                    }

                    let delay = self.retry.delay_after(attempt);
                    debug!(?delay, "Backing off before reconnecting");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl ReadingStore for StorageGateway {
    async fn insert(&mut self, reading: &Reading) -> Result<i32> {
        StorageGateway::insert(self, reading).await
    }
}

async fn probe(client: &Client) -> bool {
    if client.is_closed() {
        return false;
    }
    client.simple_query("SELECT 1").await.is_ok()
}

/// Run the insert between BEGIN and COMMIT, rolling back on any failure
async fn insert_in_transaction(client: &Client, reading: &Reading) -> Result<i32> {
    client.batch_execute("BEGIN").await?;

    let result = async {
        let dates = reading.dates.naive_utc();
        let wind = reading.wind.as_str();
        let row = client
            .query_one(
                INSERT_READING,
                &[
                    &reading.id_station,
                    &dates,
                    &reading.temperature_celsius,
                    &reading.humidity,
                    &wind,
                    &reading.wind_speed,
                    &reading.pressure,
                ],
            )
            .await?;
        let id: i32 = row.try_get(0)?;
        client.batch_execute("COMMIT").await?;
        Ok::<_, StorageError>(id)
    }
    .await;

    if let Err(ref err) = result {
        debug!(error = %err, "Rolling back failed insert");
        if let Err(rollback_err) = client.batch_execute("ROLLBACK").await {
            warn!(error = %rollback_err, "Rollback failed");
        }
    }

    result
}
