#![allow(dead_code)]

use std::time::Duration;

use testcontainers::{core::WaitFor, GenericImage, RunnableImage};
use tokio_postgres::{Client, NoTls};
use weather_ingest::broker::BrokerConfig;
use weather_ingest::storage::{DatabaseConfig, RetryPolicy};

pub const POSTGRES_IMAGE: &str = "postgres";
pub const POSTGRES_TAG: &str = "16-alpine";
pub const POSTGRES_PORT: u16 = 5432;
pub const POSTGRES_PASSWORD: &str = "postgres";

pub const RABBITMQ_IMAGE: &str = "rabbitmq";
pub const RABBITMQ_TAG: &str = "3.13-alpine";
pub const RABBITMQ_PORT: u16 = 5672;

pub const SCHEMA: &str = include_str!("../fixtures/schema.sql");

/// Body of the reference reading for station 1
pub const VALID_READING: &str = r#"{"id_station":1,"dates":"2025-11-06T12:00:00Z","temperature_celsius":25.4,"humidity":70.5,"wind":"N","wind_speed":3.5,"pressure":1013.2}"#;

/// Create a runnable PostgreSQL container
pub fn create_postgres_container() -> RunnableImage<GenericImage> {
    let image = GenericImage::new(POSTGRES_IMAGE, POSTGRES_TAG)
        .with_env_var("POSTGRES_PASSWORD", POSTGRES_PASSWORD)
        .with_wait_for(WaitFor::message_on_stderr("database system is ready to accept connections"));

    RunnableImage::from(image).with_tag(POSTGRES_TAG)
}

/// Create a runnable RabbitMQ container
pub fn create_rabbitmq_container() -> RunnableImage<GenericImage> {
    let image = GenericImage::new(RABBITMQ_IMAGE, RABBITMQ_TAG)
        .with_wait_for(WaitFor::message_on_stdout("Server startup complete"));

    RunnableImage::from(image).with_tag(RABBITMQ_TAG)
}

pub fn database_config(port: u16) -> DatabaseConfig {
    DatabaseConfig {
        host: "127.0.0.1".to_string(),
        port,
        password: POSTGRES_PASSWORD.to_string(),
        ..Default::default()
    }
}

pub fn broker_config(port: u16) -> BrokerConfig {
    BrokerConfig {
        host: "127.0.0.1".to_string(),
        port,
        ..Default::default()
    }
}

/// Short backoff so tests ride out the container's init restart
pub fn test_retry_policy() -> RetryPolicy {
    RetryPolicy::new(10, Duration::from_millis(250))
}

/// Open an admin connection, retrying while the server finishes starting
pub async fn admin_client(config: &DatabaseConfig) -> Client {
    let mut last_error = None;

    for _ in 0..40 {
        match config.to_pg_config().connect(NoTls).await {
            Ok((client, connection)) => {
                tokio::spawn(connection);
                return client;
            }
            Err(e) => {
                last_error = Some(e);
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        }
    }

    panic!("database never became reachable: {:?}", last_error);
}

/// Connect and create the weather tables
pub async fn setup_schema(config: &DatabaseConfig) -> Client {
    let client = admin_client(config).await;
    client.batch_execute(SCHEMA).await.unwrap();
    client
}

/// Login role for the gateway. Unlike the superuser, its connection limit
/// is enforced, so tests can lock it out to simulate an outage.
pub const INGEST_ROLE: &str = "ingest";

pub async fn create_ingest_role(admin: &Client) {
    admin
        .batch_execute(
            "CREATE ROLE ingest LOGIN PASSWORD 'ingest';
             GRANT SELECT, INSERT ON weather_logs TO ingest;
             GRANT SELECT ON weather_stations TO ingest;
             GRANT USAGE ON SEQUENCE weather_logs_id_seq TO ingest;",
        )
        .await
        .unwrap();
}

pub fn ingest_config(port: u16) -> DatabaseConfig {
    DatabaseConfig {
        user: INGEST_ROLE.to_string(),
        password: INGEST_ROLE.to_string(),
        ..database_config(port)
    }
}

/// Refuse new logins for the ingest role and drop its open sessions
pub async fn lock_out_ingest(admin: &Client) {
    admin
        .batch_execute(
            "ALTER ROLE ingest CONNECTION LIMIT 0;
             SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE usename = 'ingest';",
        )
        .await
        .unwrap();
}

pub async fn restore_ingest(admin: &Client) {
    admin
        .batch_execute("ALTER ROLE ingest CONNECTION LIMIT -1")
        .await
        .unwrap();
}

pub async fn count_logs(client: &Client) -> i64 {
    client
        .query_one("SELECT COUNT(*) FROM weather_logs", &[])
        .await
        .unwrap()
        .get(0)
}

/// Poll `check` every 100ms until it holds or `timeout` runs out
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    check().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config() {
        let config = database_config(5433);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 5433);
        assert_eq!(config.database, "postgres");
    }
}
