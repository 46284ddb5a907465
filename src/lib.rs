//! # Dealcast
//! Simulated distributed pub/sub broker for a flash-sale event.
//!
//! Three store producers emit product offers, a broker persists each
//! offer to a replicated three-node log under a quorum policy (N=3,
//! W=2, R=2) and fans it out to twelve consumers with subscription
//! filters. Replicas and consumers inject random crashes; on recovery
//! they pull a quorum-consistent diff of the offers they missed.
//!
//! # Components
//!
//! Four binaries share this library, all speaking the one RPC surface
//! defined in [`rpc`]:
//!
//! - `broker`: registration, write/read quorum coordination,
//!   subscription fan-out, liveness bookkeeping, end-of-run report.
//! - `replica`: append-only offer log with idempotent insert and
//!   staggered fault injection ([`replica`]).
//! - `consumer`: filtered deliveries persisted to a CSV record
//!   ([`consumer`]).
//! - `producer`: catalog-driven offer generation ([`producer`]).
//!
//! # Running locally
//!
//! ```bash
//! broker &
//! replica --node=DB1 & replica --node=DB2 & replica --node=DB3 &
//! for k in $(seq 1 12); do consumer --client=$k & done
//! producer --store=Riploy & producer --store=Falabellox & producer --store=Parisio &
//! ```
//!
//! The run ends when the operator types `report` (or `fin`) at the
//! broker prompt: producers observe the inactive flag and exit, and the
//! broker writes `Report.txt` after a grace window.

#![forbid(unsafe_code)]

pub mod broker;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod consumer;
pub mod error;
pub mod producer;
pub mod replica;
pub mod rpc;
pub mod telemetry;
pub mod types;

pub use error::{Error, Result};
