//! Per-component configuration.
//!
//! Each component reads its configuration from the environment at
//! startup and validates it before binding anything. Validation errors
//! are collected and reported together; any of them is fatal.
//!
//! # Environment Variables
//!
//! - `BROKER_HOST`: host the components dial to reach the broker
//!   (default `broker`, the compose service name)
//! - `BROKER_PORT`: broker listen/dial port (default 50051)
//! - `NODO_DIRECCION`: address a replica advertises to the broker
//! - `CONSUMIDOR_DIRECCION`: address a consumer advertises to the broker
//! - `FAULT_PROBABILITY`: per-call crash probability for replicas and
//!   consumers (default 0.1)
//! - `DELIVER_ONLY_ON_QUORUM`: gate consumer fan-out on write-quorum
//!   success (default false: consumers match against what the broker
//!   observed, not against replica durability)
//! - `DEALCAST_OUTPUT_DIR`: where consumer records and the final report
//!   are written (default `/output`)

use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    BROKER_PORT, CONSUMER_BASE_PORT, CONSUMER_COUNT, DEFAULT_FAULT_PROBABILITY, READ_QUORUM,
    RECOVERY_DELAY, REPLICATION_FACTOR, SHUTDOWN_GRACE, VALID_REPLICAS, WRITE_QUORUM,
    is_valid_name, replica_port,
};
use crate::error::{Error, Result};

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("invalid {}: {:?}", name, raw))),
    }
}

/// Address the components use to reach the broker.
pub fn broker_addr() -> String {
    let host = env_or("BROKER_HOST", "broker");
    let port = env_or("BROKER_PORT", &BROKER_PORT.to_string());
    format!("{}:{}", host, port)
}

/// Broker process configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Host to bind the RPC listener to.
    pub host: String,
    /// Port to bind the RPC listener to. 0 picks an ephemeral port.
    pub port: u16,
    /// Replication factor N. The fan-out is parameterized by N and W;
    /// only these defaults pin it to three replicas.
    pub replication_factor: usize,
    /// Write quorum W.
    pub write_quorum: usize,
    /// Read quorum R.
    pub read_quorum: usize,
    /// Producers expected to register before the run starts.
    pub expected_producers: usize,
    /// Consumers expected to register before the run starts.
    pub expected_consumers: usize,
    /// When true, consumer fan-out only happens for offers that reached
    /// the write quorum. Off by default: delivery liveness stays
    /// independent of replica durability.
    pub deliver_only_on_quorum: bool,
    /// Directory for the final report.
    pub output_dir: PathBuf,
    /// Grace window between the operator command and the final report.
    pub shutdown_grace: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: BROKER_PORT,
            replication_factor: REPLICATION_FACTOR,
            write_quorum: WRITE_QUORUM,
            read_quorum: READ_QUORUM,
            expected_producers: 3,
            expected_consumers: CONSUMER_COUNT,
            deliver_only_on_quorum: false,
            output_dir: PathBuf::from("/output"),
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }
}

impl BrokerConfig {
    /// Total registrations that flip the readiness flag.
    pub fn expected_registrations(&self) -> usize {
        self.expected_producers + self.replication_factor + self.expected_consumers
    }

    /// Read configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            host: env_or("HOST", &defaults.host),
            port: env_parse("BROKER_PORT", defaults.port)?,
            deliver_only_on_quorum: env_or("DELIVER_ONLY_ON_QUORUM", "false") == "true",
            output_dir: PathBuf::from(env_or("DEALCAST_OUTPUT_DIR", "/output")),
            ..defaults
        };
        config.validate().map_err(|errors| {
            Error::Config(format!("broker config invalid: {}", errors.join("; ")))
        })?;
        Ok(config)
    }

    /// Validate the configuration, collecting every problem found.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.replication_factor == 0 {
            errors.push("replication_factor must be at least 1".to_string());
        }
        if self.write_quorum == 0 || self.write_quorum > self.replication_factor {
            errors.push(format!(
                "write_quorum ({}) must be in 1..={}",
                self.write_quorum, self.replication_factor
            ));
        }
        if self.read_quorum == 0 || self.read_quorum > self.replication_factor {
            errors.push(format!(
                "read_quorum ({}) must be in 1..={}",
                self.read_quorum, self.replication_factor
            ));
        }
        if self.write_quorum + self.read_quorum <= self.replication_factor {
            errors.push(format!(
                "W ({}) + R ({}) must exceed N ({}) for reads to see quorum writes",
                self.write_quorum, self.read_quorum, self.replication_factor
            ));
        }
        if self.expected_producers == 0 {
            errors.push("expected_producers must be at least 1".to_string());
        }
        if self.expected_consumers == 0 {
            errors.push("expected_consumers must be at least 1".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Storage replica process configuration.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Replica identity, one of `DB1`/`DB2`/`DB3`.
    pub node_id: String,
    /// Address to bind the RPC listener to.
    pub listen_addr: String,
    /// Address advertised to the broker (what the broker dials back).
    pub advertised_addr: String,
    /// Broker address to dial.
    pub broker_addr: String,
    /// Probability that an eligible insert triggers a simulated crash.
    pub fault_probability: f64,
    /// Delay before resync after a crash, and between retries.
    pub recovery_delay: Duration,
}

impl ReplicaConfig {
    /// Build the configuration for one replica identity.
    pub fn from_env(node_id: &str) -> Result<Self> {
        if !is_valid_name(node_id, VALID_REPLICAS) {
            return Err(Error::Config(format!(
                "invalid replica id {:?}, expected one of {:?}",
                node_id, VALID_REPLICAS
            )));
        }
        // Checked valid above.
        let port = replica_port(node_id)
            .ok_or_else(|| Error::Config(format!("no port mapping for {:?}", node_id)))?;

        let config = Self {
            node_id: node_id.to_string(),
            listen_addr: format!("0.0.0.0:{}", port),
            advertised_addr: env_or("NODO_DIRECCION", &format!("localhost:{}", port)),
            broker_addr: broker_addr(),
            fault_probability: env_parse("FAULT_PROBABILITY", DEFAULT_FAULT_PROBABILITY)?,
            recovery_delay: RECOVERY_DELAY,
        };
        validate_probability(config.fault_probability)?;
        Ok(config)
    }
}

/// Consumer process configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Client number, 1..=12. Selects the subscription row and port.
    pub client_number: usize,
    /// Address to bind the RPC listener to.
    pub listen_addr: String,
    /// Address advertised to the broker.
    pub advertised_addr: String,
    /// Broker address to dial.
    pub broker_addr: String,
    /// Path of the subscription table.
    pub subscriptions_path: PathBuf,
    /// Directory the per-consumer output record is written to.
    pub output_dir: PathBuf,
    /// Probability that a delivery triggers a simulated crash.
    pub fault_probability: f64,
    /// Delay before resync after a crash, and between retries.
    pub recovery_delay: Duration,
}

impl ConsumerConfig {
    /// Build the configuration for one consumer slot.
    pub fn from_env(client_number: usize) -> Result<Self> {
        if client_number < 1 || client_number > CONSUMER_COUNT {
            return Err(Error::Config(format!(
                "invalid client number {}, expected 1..={}",
                client_number, CONSUMER_COUNT
            )));
        }
        let port = CONSUMER_BASE_PORT + client_number as u16;

        let config = Self {
            client_number,
            listen_addr: format!("0.0.0.0:{}", port),
            advertised_addr: env_or("CONSUMIDOR_DIRECCION", &format!("localhost:{}", port)),
            broker_addr: broker_addr(),
            subscriptions_path: PathBuf::from("consumers/consumers.csv"),
            output_dir: PathBuf::from(env_or("DEALCAST_OUTPUT_DIR", "/output")),
            fault_probability: env_parse("FAULT_PROBABILITY", DEFAULT_FAULT_PROBABILITY)?,
            recovery_delay: RECOVERY_DELAY,
        };
        validate_probability(config.fault_probability)?;
        Ok(config)
    }
}

/// Producer process configuration.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Store name. The broker refuses registration for unknown stores.
    pub store: String,
    /// Broker address to dial.
    pub broker_addr: String,
    /// Directory holding `<store>_catalog.csv`.
    pub catalog_dir: PathBuf,
}

impl ProducerConfig {
    /// Build the configuration for one store.
    pub fn from_env(store: &str) -> Result<Self> {
        Ok(Self {
            store: store.to_string(),
            broker_addr: broker_addr(),
            catalog_dir: PathBuf::from("catalogs"),
        })
    }

    /// Path of this store's catalog file.
    pub fn catalog_path(&self) -> PathBuf {
        self.catalog_dir.join(format!("{}_catalog.csv", self.store))
    }
}

fn validate_probability(p: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&p) {
        return Err(Error::Config(format!(
            "fault probability {} out of range [0, 1]",
            p
        )));
    }
    Ok(())
}
