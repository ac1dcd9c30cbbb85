use lapin::uri::AMQPUri;
use std::fmt;

use super::topology::Topology;

/// RabbitMQ connection settings and routing
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Broker host
    pub host: String,

    /// AMQP port
    pub port: u16,

    /// Username
    pub user: String,

    /// Password
    pub password: String,

    /// Virtual host
    pub vhost: String,

    /// Exchanges, queues and routing keys
    pub topology: Topology,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "rabbitmq".to_string(),
            port: 5672,
            user: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
            topology: Topology::default(),
        }
    }
}

impl BrokerConfig {
    /// Connection URI for the broker
    ///
    /// Built field by field so credentials never need percent-encoding.
    pub fn amqp_uri(&self) -> AMQPUri {
        let mut uri = AMQPUri::default();
        uri.authority.host = self.host.clone();
        uri.authority.port = self.port;
        uri.authority.userinfo.username = self.user.clone();
        uri.authority.userinfo.password = self.password.clone();
        uri.vhost = self.vhost.clone();
        uri
    }

    /// Check for settings the broker would reject on every attempt
    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("broker host is empty".to_string());
        }
        if self.port == 0 {
            return Err("broker port must not be 0".to_string());
        }

        for binding in [&self.topology.main, &self.topology.dead_letter] {
            if binding.exchange.is_empty() || binding.queue.is_empty() {
                return Err(format!(
                    "exchange and queue names must not be empty (exchange '{}', queue '{}')",
                    binding.exchange, binding.queue
                ));
            }
        }

        if self.topology.main.queue == self.topology.dead_letter.queue {
            return Err(format!(
                "dead-letter queue '{}' must differ from the main queue",
                self.topology.dead_letter.queue
            ));
        }

        Ok(())
    }
}

/// Printable form without the password
impl fmt::Display for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "amqp://{}@{}:{}/{}", self.user, self.host, self.port, self.vhost)
    }
}
