//! RPC client with a cached connection.
//!
//! One [`RpcClient`] is owned per peer by whichever process initiates
//! calls to it (the broker holds one per replica and per consumer; every
//! other component holds one for the broker). The underlying TCP
//! connection is cached and reused across calls; a call that fails on
//! the cached connection reconnects once before giving up. There are no
//! retries beyond that: write results stand, and resync retry policy
//! lives in the recovery loops.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::constants::CONNECT_TIMEOUT;
use crate::error::{Error, Result};

use super::protocol::{Request, Response, read_frame, write_frame};

/// A client channel to one remote component.
pub struct RpcClient {
    target_addr: String,
    cached_conn: tokio::sync::Mutex<Option<TcpStream>>,
}

impl RpcClient {
    /// Create a client for the given address. No connection is opened
    /// until the first call.
    pub fn new(target_addr: impl Into<String>) -> Self {
        Self {
            target_addr: target_addr.into(),
            cached_conn: tokio::sync::Mutex::new(None),
        }
    }

    /// The address this client dials.
    pub fn target_addr(&self) -> &str {
        &self.target_addr
    }

    /// Probe whether a TCP connection to `addr` can be opened.
    ///
    /// Used by the broker when registering a peer, before recording its
    /// client channel.
    pub async fn probe(addr: &str) -> Result<()> {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Transport(std::io::ErrorKind::TimedOut))??;
        drop(stream);
        Ok(())
    }

    /// Issue one request and await its response, bounded by `deadline`.
    ///
    /// The deadline covers connecting (if needed), the write, and the
    /// response read. On timeout or I/O failure the cached connection is
    /// dropped so the next call starts fresh.
    pub async fn call(&self, request: &Request, deadline: Duration) -> Result<Response> {
        match timeout(deadline, self.try_call(request)).await {
            Ok(result) => result,
            Err(_) => {
                // The in-flight connection is in an unknown state.
                *self.cached_conn.lock().await = None;
                Err(Error::Transport(std::io::ErrorKind::TimedOut))
            }
        }
    }

    async fn try_call(&self, request: &Request) -> Result<Response> {
        let mut guard = self.cached_conn.lock().await;

        if let Some(ref mut stream) = *guard {
            match Self::do_rpc(stream, request).await {
                Ok(response) => return Ok(response),
                Err(_) => {
                    // Stale connection; reconnect below.
                    *guard = None;
                }
            }
        }

        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.target_addr))
            .await
            .map_err(|_| Error::Transport(std::io::ErrorKind::TimedOut))??;
        stream.set_nodelay(true)?;

        let mut stream = stream;
        let response = Self::do_rpc(&mut stream, request).await?;
        *guard = Some(stream);
        Ok(response)
    }

    async fn do_rpc(stream: &mut TcpStream, request: &Request) -> Result<Response> {
        write_frame(stream, request).await?;
        let response = read_frame(stream).await?;
        Ok(response)
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("target_addr", &self.target_addr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_call_refused_when_nothing_listens() {
        // Bind then drop to obtain a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = RpcClient::new(addr.to_string());
        let err = client
            .call(&Request::QueryReady, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_probe_refused_when_nothing_listens() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(RpcClient::probe(&addr.to_string()).await.is_err());
    }

    #[tokio::test]
    async fn test_probe_succeeds_against_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        assert!(RpcClient::probe(&addr.to_string()).await.is_ok());
        accept.abort();
    }

    #[tokio::test]
    async fn test_call_times_out_against_silent_peer() {
        // A listener that accepts but never replies.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hold = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(stream);
        });

        let client = RpcClient::new(addr.to_string());
        let err = client
            .call(&Request::QueryReady, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert_eq!(err, Error::Transport(std::io::ErrorKind::TimedOut));
        hold.abort();
    }
}
