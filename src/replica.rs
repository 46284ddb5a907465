//! Storage replica: an append-only offer log with injected crashes.
//!
//! A replica serves two operations: `ReplicaInsert` (idempotent append)
//! and `ReplicaRead` (full log). While crashed it rejects both. Crashes
//! are drawn randomly on insert, but only inside the replica's eligible
//! fault window; the windows are staggered per identity so that no two
//! replicas can be failing at the same time, which keeps the W=2 write
//! quorum satisfiable throughout the run:
//!
//! - `DB1` may fail during the first 30s
//! - `DB2` between 40s and 70s
//! - `DB3` from 80s on
//!
//! all measured from the first insert the replica ever observed. After
//! a crash the replica waits out a recovery delay, asks the broker for
//! a quorum-consistent diff of what it missed, merges it, and comes
//! back. Failed resyncs are retried indefinitely.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::ReplicaConfig;
use crate::constants::{REGISTER_TIMEOUT, RESYNC_TIMEOUT};
use crate::error::{Error, Result};
use crate::rpc::{Handler, Request, Response, ResyncRequest, RpcClient};
use crate::types::{EntityKind, Offer};

/// Fault window bounds, from first insert. Workload-shaping values;
/// changing them can put two replicas in fault simultaneously and break
/// the write-quorum liveness of the whole run.
const DB1_WINDOW_END: Duration = Duration::from_secs(30);
const DB2_WINDOW_START: Duration = Duration::from_secs(40);
const DB2_WINDOW_END: Duration = Duration::from_secs(70);
const DB3_WINDOW_START: Duration = Duration::from_secs(80);

/// Whether `node_id` may draw a fault at `elapsed` since its first insert.
pub fn fault_window_open(node_id: &str, elapsed: Duration) -> bool {
    match node_id {
        "DB1" => elapsed <= DB1_WINDOW_END,
        "DB2" => elapsed >= DB2_WINDOW_START && elapsed <= DB2_WINDOW_END,
        "DB3" => elapsed >= DB3_WINDOW_START,
        _ => false,
    }
}

struct LogState {
    offers: Vec<Offer>,
    in_fault: bool,
    crash_count: u32,
    /// Stamped at the first insert attempt ever observed, including one
    /// rejected while in fault.
    start_time: Option<Instant>,
}

struct ReplicaInner {
    cfg: ReplicaConfig,
    broker: RpcClient,
    state: tokio::sync::Mutex<LogState>,
}

/// One storage replica. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct ReplicaNode {
    inner: Arc<ReplicaInner>,
}

impl ReplicaNode {
    pub fn new(cfg: ReplicaConfig) -> Self {
        let broker = RpcClient::new(cfg.broker_addr.clone());
        Self {
            inner: Arc::new(ReplicaInner {
                cfg,
                broker,
                state: tokio::sync::Mutex::new(LogState {
                    offers: Vec::new(),
                    in_fault: false,
                    crash_count: 0,
                    start_time: None,
                }),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.cfg.node_id
    }

    /// Register this replica with the broker.
    ///
    /// Returns whether the broker accepted; a transport failure is an
    /// error so the caller can decide to abort startup.
    pub async fn register(&self) -> Result<bool> {
        let request = Request::RegisterReplica {
            name: self.inner.cfg.node_id.clone(),
            address: self.inner.cfg.advertised_addr.clone(),
        };
        let response = self.inner.broker.call(&request, REGISTER_TIMEOUT).await?;
        let accepted = matches!(response, Response::Register { ok: true });
        if accepted {
            info!(replica = %self.id(), "registered with broker");
        } else {
            warn!(replica = %self.id(), "broker refused registration");
        }
        Ok(accepted)
    }

    /// Current log contents.
    pub async fn log_snapshot(&self) -> Vec<Offer> {
        self.inner.state.lock().await.offers.clone()
    }

    /// Crashes injected so far.
    pub async fn crash_count(&self) -> u32 {
        self.inner.state.lock().await.crash_count
    }

    /// Whether the replica is currently down.
    pub async fn in_fault(&self) -> bool {
        self.inner.state.lock().await.in_fault
    }

    /// Inject a crash now, regardless of window or probability. The
    /// recovery loop starts as it would for a random crash.
    pub async fn simulate_crash(&self) {
        let mut st = self.inner.state.lock().await;
        self.trigger_fault(&mut st);
    }

    async fn handle_insert(&self, offer: Offer) -> bool {
        let mut st = self.inner.state.lock().await;

        let started = match st.start_time {
            Some(t) => t,
            None => {
                let now = Instant::now();
                st.start_time = Some(now);
                info!(replica = %self.id(), "fault clock started with first insert");
                now
            }
        };

        if st.in_fault {
            debug!(replica = %self.id(), "in fault, rejecting insert");
            return false;
        }

        let p = self.inner.cfg.fault_probability;
        if p > 0.0 && fault_window_open(self.id(), started.elapsed()) && fastrand::f64() < p {
            self.trigger_fault(&mut st);
            return false;
        }

        if st.offers.iter().any(|o| o.offer_id == offer.offer_id) {
            debug!(replica = %self.id(), offer = %offer.offer_id, "duplicate insert ignored");
            return true;
        }

        info!(
            replica = %self.id(),
            offer = %offer.offer_id,
            total = st.offers.len() + 1,
            "offer stored"
        );
        st.offers.push(offer);
        true
    }

    fn trigger_fault(&self, st: &mut LogState) {
        st.in_fault = true;
        st.crash_count += 1;
        warn!(
            replica = %self.id(),
            crash = st.crash_count,
            recovery_secs = self.inner.cfg.recovery_delay.as_secs(),
            "simulated crash"
        );

        let node = self.clone();
        tokio::spawn(async move {
            node.recovery_loop().await;
        });
    }

    /// Sleep out the recovery delay, then resync until it succeeds.
    async fn recovery_loop(self) {
        loop {
            tokio::time::sleep(self.inner.cfg.recovery_delay).await;
            match self.request_resync().await {
                Ok(added) => {
                    let mut st = self.inner.state.lock().await;
                    st.in_fault = false;
                    info!(replica = %self.id(), added, "recovered and resynchronized");
                    return;
                }
                Err(e) => {
                    warn!(replica = %self.id(), error = %e, "resync failed, retrying");
                }
            }
        }
    }

    async fn request_resync(&self) -> Result<usize> {
        let current_offers = self.inner.state.lock().await.offers.clone();
        let request = Request::Resync(ResyncRequest {
            entity_id: self.inner.cfg.node_id.clone(),
            kind: EntityKind::Replica,
            current_offers,
        });

        match self.inner.broker.call(&request, RESYNC_TIMEOUT).await? {
            Response::Resync {
                missing_offers,
                ok: true,
            } => {
                let mut st = self.inner.state.lock().await;
                let mut added = 0;
                for offer in missing_offers {
                    if !st.offers.iter().any(|o| o.offer_id == offer.offer_id) {
                        st.offers.push(offer);
                        added += 1;
                    }
                }
                Ok(added)
            }
            _ => Err(Error::Quorum("resync rejected by broker".to_string())),
        }
    }
}

#[async_trait]
impl Handler for ReplicaNode {
    async fn replica_insert(&self, offer: Offer) -> Response {
        Response::Offer {
            ok: self.handle_insert(offer).await,
        }
    }

    async fn replica_read(&self) -> Response {
        let st = self.inner.state.lock().await;
        if st.in_fault {
            return Response::Read {
                offers: Vec::new(),
                ok: false,
            };
        }
        debug!(replica = %self.id(), offers = st.offers.len(), "serving read");
        Response::Read {
            offers: st.offers.clone(),
            ok: true,
        }
    }
}
