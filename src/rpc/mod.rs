//! Unified RPC surface.
//!
//! One service definition is shared by all four components: the broker,
//! the storage replicas, the consumers and the producers all speak the
//! same [`protocol`], serve it with an [`RpcServer`] and dial peers with
//! an [`RpcClient`]. Each component implements the [`Handler`]
//! operations it serves and rejects the rest.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::RpcClient;
pub use protocol::{RegisterConsumerRequest, Request, Response, ResyncRequest};
pub use server::{Handler, RpcServer};
