//! Wire protocol for the unified RPC surface.
//!
//! Every component speaks the same protocol: a length-prefixed bincode
//! frame carrying a [`Request`], answered by a frame carrying a
//! [`Response`]. The length prefix is a big-endian `u32`, bounded by
//! [`MAX_FRAME_SIZE`] to keep per-connection memory in check.
//!
//! Components only implement the subset of operations they serve; an
//! operation a component does not handle is answered with
//! [`Response::Unhandled`].

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::MAX_FRAME_SIZE;
use crate::types::{EntityKind, Offer};

/// Consumer registration payload.
///
/// `categories` and `stores` use the `"null"` sentinel in the first
/// position for an unconstrained axis; a non-positive `price_max` means
/// unbounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterConsumerRequest {
    pub consumer_id: String,
    pub categories: Vec<String>,
    pub stores: Vec<String>,
    pub price_max: i32,
    pub address: String,
}

/// Resync request from a recovering entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResyncRequest {
    pub entity_id: String,
    pub kind: EntityKind,
    /// The caller's snapshot of its own log at recovery time.
    pub current_offers: Vec<Offer>,
}

/// All operations of the unified RPC surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    RegisterProducer { name: String },
    RegisterReplica { name: String, address: String },
    RegisterConsumer(RegisterConsumerRequest),
    QueryReady,
    QueryActive,
    /// Producer submits an offer to the broker.
    Submit(Offer),
    /// Broker replicates an offer onto a storage replica.
    ReplicaInsert(Offer),
    /// Broker reads a replica's full log.
    ReplicaRead,
    /// Broker delivers a matching offer to a consumer.
    ConsumerDeliver(Offer),
    /// Recovering entity asks the broker for its missing offers.
    Resync(ResyncRequest),
}

impl Request {
    /// Operation name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Request::RegisterProducer { .. } => "RegisterProducer",
            Request::RegisterReplica { .. } => "RegisterReplica",
            Request::RegisterConsumer(_) => "RegisterConsumer",
            Request::QueryReady => "QueryReady",
            Request::QueryActive => "QueryActive",
            Request::Submit(_) => "Submit",
            Request::ReplicaInsert(_) => "ReplicaInsert",
            Request::ReplicaRead => "ReplicaRead",
            Request::ConsumerDeliver(_) => "ConsumerDeliver",
            Request::Resync(_) => "Resync",
        }
    }
}

/// Replies for every operation of the surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Register { ok: bool },
    Ready { ready: bool },
    Active { active: bool },
    Offer { ok: bool },
    Read { offers: Vec<Offer>, ok: bool },
    Resync { missing_offers: Vec<Offer>, ok: bool },
    /// The receiving component does not serve this operation.
    Unhandled,
}

impl Response {
    /// Interpret any single-flag reply as an ack. `Unhandled` and typed
    /// mismatches count as rejection.
    pub fn is_ack(&self) -> bool {
        match self {
            Response::Register { ok } | Response::Offer { ok } => *ok,
            Response::Ready { ready } => *ready,
            Response::Active { active } => *active,
            Response::Read { ok, .. } | Response::Resync { ok, .. } => *ok,
            Response::Unhandled => false,
        }
    }
}

/// Write one length-prefixed bincode frame.
pub async fn write_frame<S, T>(stream: &mut S, message: &T) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
    T: Serialize,
{
    let data = bincode::serialize(message)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    if data.len() > MAX_FRAME_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", data.len()),
        ));
    }
    let len = data.len() as u32;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&data).await?;
    stream.flush().await
}

/// Read one length-prefixed bincode frame.
pub async fn read_frame<S, T>(stream: &mut S) -> std::io::Result<T>
where
    S: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", len),
        ));
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    bincode::deserialize(&buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
