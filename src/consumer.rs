//! Consumer: receives matching offers and persists each one.
//!
//! The consumer trusts the broker's matching entirely: whatever offer
//! arrives is appended to its in-memory list and to its output record,
//! deduplicated by `offer_id`. Crashes are drawn randomly on delivery
//! with no eligibility window; recovery mirrors the replica's loop
//! (delay, resync against the broker, merge, retry on failure).

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::catalog::{ConsumerSpec, OUTPUT_HEADER, output_row};
use crate::config::ConsumerConfig;
use crate::constants::{REGISTER_TIMEOUT, RESYNC_TIMEOUT};
use crate::error::{Error, Result};
use crate::rpc::{
    Handler, RegisterConsumerRequest, Request, Response, ResyncRequest, RpcClient,
};
use crate::types::{EntityKind, Offer};

/// Append-only CSV record of everything this consumer accepted.
struct OutputRecord {
    path: PathBuf,
}

impl OutputRecord {
    /// Create (or truncate) the record and write its header.
    fn create(dir: &std::path::Path, consumer_id: &str) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| {
            Error::Config(format!("cannot create output dir {}: {}", dir.display(), e))
        })?;
        let path = dir.join(format!("consumer_{}.csv", consumer_id));
        fs::write(&path, format!("{}\n", OUTPUT_HEADER)).map_err(|e| {
            Error::Config(format!("cannot create record {}: {}", path.display(), e))
        })?;
        info!(path = %path.display(), "output record created");
        Ok(Self { path })
    }

    fn append(&self, offer: &Offer) -> std::io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "{}", output_row(offer))
    }
}

struct ConsumerState {
    offers: Vec<Offer>,
    in_fault: bool,
    crash_count: u32,
}

struct ConsumerInner {
    cfg: ConsumerConfig,
    spec: ConsumerSpec,
    broker: RpcClient,
    record: OutputRecord,
    state: tokio::sync::Mutex<ConsumerState>,
}

/// One consumer process. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct ConsumerNode {
    inner: Arc<ConsumerInner>,
}

impl ConsumerNode {
    /// Build a consumer from its subscription row, creating its output
    /// record up front.
    pub fn new(cfg: ConsumerConfig, spec: ConsumerSpec) -> Result<Self> {
        let record = OutputRecord::create(&cfg.output_dir, &spec.consumer_id)?;
        let broker = RpcClient::new(cfg.broker_addr.clone());
        Ok(Self {
            inner: Arc::new(ConsumerInner {
                cfg,
                spec,
                broker,
                record,
                state: tokio::sync::Mutex::new(ConsumerState {
                    offers: Vec::new(),
                    in_fault: false,
                    crash_count: 0,
                }),
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.inner.spec.consumer_id
    }

    /// Register this consumer with the broker, sending the wire-encoded
    /// subscription filter.
    pub async fn register(&self) -> Result<bool> {
        let request = Request::RegisterConsumer(RegisterConsumerRequest {
            consumer_id: self.inner.spec.consumer_id.clone(),
            categories: self.inner.spec.categories.clone(),
            stores: self.inner.spec.stores.clone(),
            price_max: self.inner.spec.price_max,
            address: self.inner.cfg.advertised_addr.clone(),
        });
        let response = self.inner.broker.call(&request, REGISTER_TIMEOUT).await?;
        let accepted = matches!(response, Response::Register { ok: true });
        if accepted {
            info!(consumer = %self.id(), "registered with broker");
        } else {
            warn!(consumer = %self.id(), "broker refused registration");
        }
        Ok(accepted)
    }

    /// Offers accepted so far, in arrival order.
    pub async fn received_snapshot(&self) -> Vec<Offer> {
        self.inner.state.lock().await.offers.clone()
    }

    pub async fn crash_count(&self) -> u32 {
        self.inner.state.lock().await.crash_count
    }

    pub async fn in_fault(&self) -> bool {
        self.inner.state.lock().await.in_fault
    }

    /// Inject a crash now, regardless of probability.
    pub async fn simulate_crash(&self) {
        let mut st = self.inner.state.lock().await;
        self.trigger_fault(&mut st);
    }

    async fn handle_deliver(&self, offer: Offer) -> bool {
        let mut st = self.inner.state.lock().await;

        if st.in_fault {
            debug!(consumer = %self.id(), "in fault, rejecting delivery");
            return false;
        }

        let p = self.inner.cfg.fault_probability;
        if p > 0.0 && fastrand::f64() < p {
            self.trigger_fault(&mut st);
            return false;
        }

        if st.offers.iter().any(|o| o.offer_id == offer.offer_id) {
            debug!(consumer = %self.id(), offer = %offer.offer_id, "duplicate delivery ignored");
            return true;
        }

        if let Err(e) = self.inner.record.append(&offer) {
            warn!(consumer = %self.id(), error = %e, "cannot persist delivery");
            return false;
        }

        info!(
            consumer = %self.id(),
            offer = %offer,
            total = st.offers.len() + 1,
            "offer received"
        );
        st.offers.push(offer);
        true
    }

    fn trigger_fault(&self, st: &mut ConsumerState) {
        st.in_fault = true;
        st.crash_count += 1;
        warn!(
            consumer = %self.id(),
            crash = st.crash_count,
            recovery_secs = self.inner.cfg.recovery_delay.as_secs(),
            "simulated crash"
        );

        let node = self.clone();
        tokio::spawn(async move {
            node.recovery_loop().await;
        });
    }

    async fn recovery_loop(self) {
        loop {
            tokio::time::sleep(self.inner.cfg.recovery_delay).await;
            match self.request_resync().await {
                Ok(added) => {
                    let mut st = self.inner.state.lock().await;
                    st.in_fault = false;
                    info!(consumer = %self.id(), added, "recovered and resynchronized");
                    return;
                }
                Err(e) => {
                    warn!(consumer = %self.id(), error = %e, "resync failed, retrying");
                }
            }
        }
    }

    async fn request_resync(&self) -> Result<usize> {
        let current_offers = self.inner.state.lock().await.offers.clone();
        let request = Request::Resync(ResyncRequest {
            entity_id: self.inner.spec.consumer_id.clone(),
            kind: EntityKind::Consumer,
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
                        if let Err(e) = self.inner.record.append(&offer) {
                            warn!(consumer = %self.id(), error = %e, "cannot persist merged offer");
                        }
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
impl Handler for ConsumerNode {
    async fn consumer_deliver(&self, offer: Offer) -> Response {
        Response::Offer {
            ok: self.handle_deliver(offer).await,
        }
    }
}
