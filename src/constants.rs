//! Centralized protocol and workload constants.
//!
//! This module consolidates the closed enumerations and magic numbers
//! used throughout the dealcast simulation. Having them in one place
//! makes it easier to:
//!
//! - Understand the workload contract (who may register, what is valid)
//! - Update timeouts consistently
//! - Document the rationale for each constant
//!
//! # Categories
//!
//! - **Membership Constants**: the closed sets of valid entity names
//! - **Quorum Constants**: replication factor and quorum sizes
//! - **Network Constants**: well-known ports and frame limits
//! - **Timing Constants**: RPC timeouts and recovery cadence

use std::time::Duration;

// =============================================================================
// Membership Constants
// =============================================================================

/// The closed set of stores allowed to register as producers.
///
/// Registration with any other name is refused. One producer process is
/// expected per store.
pub const VALID_STORES: &[&str] = &["Riploy", "Falabellox", "Parisio"];

/// The closed set of storage replica identities.
///
/// Each identity also determines the replica's default listen port and
/// its eligible fault window (see [`crate::replica`]).
pub const VALID_REPLICAS: &[&str] = &["DB1", "DB2", "DB3"];

/// The closed set of offer categories.
///
/// Offers carrying any other category are rejected at submit time, and
/// catalog rows carrying one are dropped at load time.
pub const VALID_CATEGORIES: &[&str] = &[
    "Electrónica",
    "Moda",
    "Hogar",
    "Deportes",
    "Belleza",
    "Infantil",
    "Computación",
    "Electrodomésticos",
    "Herramientas",
    "Juguetes",
    "Automotriz",
    "Mascotas",
];

/// Number of consumer processes expected to register.
pub const CONSUMER_COUNT: usize = 12;

/// Membership check against a closed name set.
pub fn is_valid_name(name: &str, valid: &[&str]) -> bool {
    valid.iter().any(|v| *v == name)
}

// =============================================================================
// Quorum Constants
// =============================================================================

/// Replication factor N: number of storage replicas an offer is written to.
pub const REPLICATION_FACTOR: usize = 3;

/// Write quorum W: minimum acks for a write to be reported durable.
pub const WRITE_QUORUM: usize = 2;

/// Read quorum R: minimum replica responses for a read to be considered.
///
/// On top of R responses, the read policy additionally requires two
/// responders whose offer sets agree exactly (see
/// [`crate::broker::quorum`]).
pub const READ_QUORUM: usize = 2;

// =============================================================================
// Network Constants
// =============================================================================

/// Well-known broker port.
pub const BROKER_PORT: u16 = 50051;

/// Well-known replica ports, positionally matching [`VALID_REPLICAS`].
pub const REPLICA_PORTS: &[u16] = &[50052, 50053, 50054];

/// Base port for consumers; consumer k listens on `CONSUMER_BASE_PORT + k`.
pub const CONSUMER_BASE_PORT: u16 = 50060;

/// Maximum accepted RPC frame size.
///
/// An offer history frame grows with the run length; 16 MB bounds memory
/// per connection while leaving room for hundreds of thousands of offers.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Timeout for establishing a TCP connection to a peer.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default listen port for a replica identity, if it is a valid one.
pub fn replica_port(id: &str) -> Option<u16> {
    VALID_REPLICAS
        .iter()
        .position(|r| *r == id)
        .map(|i| REPLICA_PORTS[i])
}

// =============================================================================
// Timing Constants
// =============================================================================

/// Timeout for a `ReplicaInsert` RPC issued during write fan-out.
pub const INSERT_TIMEOUT: Duration = Duration::from_secs(3);

/// Timeout for a `ReplicaRead` RPC issued during read-quorum reconstruction.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for a `ConsumerDeliver` RPC issued during fan-out.
pub const DELIVER_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for a `Resync` RPC issued by a recovering entity.
///
/// Deliberately generous: the broker serves it by reading all replicas
/// (up to [`READ_TIMEOUT`] each) before diffing.
pub const RESYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for a producer's `QueryActive` poll.
pub const ACTIVE_POLL_TIMEOUT: Duration = Duration::from_secs(3);

/// Timeout for a registration call. Covers the broker probing the
/// registrant's own listener before answering.
pub const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for a producer's `Submit`. Covers the broker's full replica
/// fan-out (up to [`INSERT_TIMEOUT`] per replica).
pub const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between a producer's `QueryReady` polls before the run starts.
pub const READY_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Delay before a crashed replica or consumer attempts resync, and
/// between resync retries.
pub const RECOVERY_DELAY: Duration = Duration::from_secs(5);

/// Grace window between the operator ending the run and the final
/// report, allowing in-flight recoveries to land.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Default probability that an eligible insert/delivery triggers a
/// simulated crash.
pub const DEFAULT_FAULT_PROBABILITY: f64 = 0.1;

// =============================================================================
// Tests
// =============================================================================
