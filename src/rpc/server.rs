//! RPC server shared by every component.
//!
//! [`RpcServer`] accepts TCP connections and serves length-prefixed
//! request/response frames on each, one spawned task per connection.
//! Components implement [`Handler`] for the operations they serve; the
//! default method bodies answer [`Response::Unhandled`], so e.g. a
//! replica rejects `Submit` without any extra code.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::types::Offer;

use super::protocol::{
    read_frame, write_frame, RegisterConsumerRequest, Request, Response, ResyncRequest,
};

/// Operations of the unified RPC surface.
///
/// Each component overrides the subset it serves.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn register_producer(&self, _name: String) -> Response {
        Response::Unhandled
    }

    async fn register_replica(&self, _name: String, _address: String) -> Response {
        Response::Unhandled
    }

    async fn register_consumer(&self, _request: RegisterConsumerRequest) -> Response {
        Response::Unhandled
    }

    async fn query_ready(&self) -> Response {
        Response::Unhandled
    }

    async fn query_active(&self) -> Response {
        Response::Unhandled
    }

    async fn submit(&self, _offer: Offer) -> Response {
        Response::Unhandled
    }

    async fn replica_insert(&self, _offer: Offer) -> Response {
        Response::Unhandled
    }

    async fn replica_read(&self) -> Response {
        Response::Unhandled
    }

    async fn consumer_deliver(&self, _offer: Offer) -> Response {
        Response::Unhandled
    }

    async fn resync(&self, _request: ResyncRequest) -> Response {
        Response::Unhandled
    }
}

async fn dispatch<H: Handler>(handler: &H, request: Request) -> Response {
    match request {
        Request::RegisterProducer { name } => handler.register_producer(name).await,
        Request::RegisterReplica { name, address } => {
            handler.register_replica(name, address).await
        }
        Request::RegisterConsumer(req) => handler.register_consumer(req).await,
        Request::QueryReady => handler.query_ready().await,
        Request::QueryActive => handler.query_active().await,
        Request::Submit(offer) => handler.submit(offer).await,
        Request::ReplicaInsert(offer) => handler.replica_insert(offer).await,
        Request::ReplicaRead => handler.replica_read().await,
        Request::ConsumerDeliver(offer) => handler.consumer_deliver(offer).await,
        Request::Resync(req) => handler.resync(req).await,
    }
}

/// A TCP server for the dealcast RPC surface, with graceful shutdown.
pub struct RpcServer<H: Handler> {
    listener: TcpListener,
    handler: Arc<H>,
    shutdown_tx: broadcast::Sender<()>,
}

impl<H: Handler> RpcServer<H> {
    /// Bind to `addr` and prepare to serve `handler`.
    pub async fn bind(addr: &str, handler: Arc<H>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let (shutdown_tx, _) = broadcast::channel(1);

        tracing::info!(addr = %addr, "RPC server listening");

        Ok(Self {
            listener,
            handler,
            shutdown_tx,
        })
    }

    /// The address the server is bound to. Useful with port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Signal the accept loop to stop. Existing connections drain on
    /// their own.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Accept connections until a shutdown signal arrives.
    pub async fn run(&self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("RPC server shutting down, no longer accepting connections");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = accepted?;
                    let handler = self.handler.clone();

                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(handler, stream).await {
                            tracing::debug!(peer = %peer_addr, error = %e, "connection closed with error");
                        }
                    });
                }
            }
        }
    }
}

async fn serve_connection<H: Handler>(handler: Arc<H>, mut stream: TcpStream) -> Result<()> {
    stream.set_nodelay(true)?;
    loop {
        let request: Request = match read_frame(&mut stream).await {
            Ok(request) => request,
            // Peer hung up between requests.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        tracing::trace!(op = request.name(), "handling request");
        let response = dispatch(handler.as_ref(), request).await;
        write_frame(&mut stream, &response).await?;
    }
}
