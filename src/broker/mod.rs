//! The broker: registration, quorum-replicated writes, quorum reads,
//! subscription fan-out, liveness bookkeeping and the end-of-run report.
//!
//! All mutable state lives behind a single mutex, per the shared-state
//! discipline of the system. The lock is released around outbound RPC
//! fan-outs and reacquired before mutating, so liveness flips and the
//! write counters are applied atomically once a fan-out completes.

pub mod matcher;
pub mod quorum;
pub mod report;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::BrokerConfig;
use crate::constants::{
    DELIVER_TIMEOUT, INSERT_TIMEOUT, READ_TIMEOUT, VALID_CATEGORIES, VALID_REPLICAS, VALID_STORES,
    is_valid_name,
};
use crate::error::Result;
use crate::rpc::{Handler, RegisterConsumerRequest, Request, Response, ResyncRequest, RpcClient};
use crate::types::{EntityKind, Offer, SubscriptionFilter};

/// Per-producer bookkeeping. Created at registration, never destroyed.
#[derive(Debug, Clone)]
pub struct ProducerState {
    pub name: String,
    pub offers_submitted: u64,
    pub offers_accepted: u64,
}

/// The broker's view of one storage replica.
pub struct ReplicaPeer {
    pub id: String,
    pub address: String,
    pub alive: bool,
    pub crash_count: u32,
    client: Arc<RpcClient>,
}

/// The broker's view of one consumer.
pub struct ConsumerPeer {
    pub id: String,
    pub filter: SubscriptionFilter,
    pub address: String,
    pub alive: bool,
    pub crash_count: u32,
    pub offers_received: u64,
    client: Arc<RpcClient>,
}

/// Everything mutable, guarded by the broker's one mutex.
///
/// `BTreeMap`s keep peers in id order, which makes the read-quorum scan
/// order deterministic.
pub(crate) struct BrokerState {
    pub producers: BTreeMap<String, ProducerState>,
    pub replicas: BTreeMap<String, ReplicaPeer>,
    pub consumers: BTreeMap<String, ConsumerPeer>,
    pub offers_received: u64,
    pub writes_ok: u64,
    pub writes_fail: u64,
    pub ready: bool,
    pub system_active: bool,
}

impl BrokerState {
    fn new() -> Self {
        Self {
            producers: BTreeMap::new(),
            replicas: BTreeMap::new(),
            consumers: BTreeMap::new(),
            offers_received: 0,
            writes_ok: 0,
            writes_fail: 0,
            ready: false,
            system_active: true,
        }
    }

    fn registered(&self) -> usize {
        self.producers.len() + self.replicas.len() + self.consumers.len()
    }

    /// Flip the readiness flag exactly once, when the expected number
    /// of entities have registered.
    fn check_ready(&mut self, expected: usize) {
        let registered = self.registered();
        if registered == expected && !self.ready {
            self.ready = true;
            info!(registered, expected, "system ready");
        } else {
            info!(
                producers = self.producers.len(),
                replicas = self.replicas.len(),
                consumers = self.consumers.len(),
                registered,
                expected,
                "registration progress"
            );
        }
    }

    /// Apply one fan-out result to a replica's liveness.
    fn apply_replica_result(&mut self, id: &str, acked: bool) {
        let Some(replica) = self.replicas.get_mut(id) else {
            return;
        };
        if acked {
            if !replica.alive {
                info!(replica = %id, "replica reconnected");
                replica.alive = true;
            }
        } else if replica.alive {
            replica.alive = false;
            replica.crash_count += 1;
            warn!(replica = %id, crashes = replica.crash_count, "replica marked down");
        }
    }

    /// Apply one delivery result to a consumer's liveness.
    fn apply_consumer_result(&mut self, id: &str, acked: bool) {
        let Some(consumer) = self.consumers.get_mut(id) else {
            return;
        };
        if acked {
            if !consumer.alive {
                info!(consumer = %id, "consumer reconnected");
                consumer.alive = true;
            }
        } else if consumer.alive {
            consumer.alive = false;
            consumer.crash_count += 1;
            warn!(consumer = %id, crashes = consumer.crash_count, "consumer marked down");
        }
    }

    fn replica_clients(&self) -> Vec<(String, Arc<RpcClient>)> {
        self.replicas
            .iter()
            .map(|(id, r)| (id.clone(), r.client.clone()))
            .collect()
    }
}

/// Counter snapshot, for tests and the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMetrics {
    pub offers_received: u64,
    pub writes_ok: u64,
    pub writes_fail: u64,
    pub ready: bool,
    pub active: bool,
}

struct Inner {
    cfg: BrokerConfig,
    state: tokio::sync::Mutex<BrokerState>,
}

/// The broker component. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<Inner>,
}

impl Broker {
    pub fn new(cfg: BrokerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                cfg,
                state: tokio::sync::Mutex::new(BrokerState::new()),
            }),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.cfg
    }

    /// Counter snapshot.
    pub async fn metrics(&self) -> BrokerMetrics {
        let st = self.inner.state.lock().await;
        BrokerMetrics {
            offers_received: st.offers_received,
            writes_ok: st.writes_ok,
            writes_fail: st.writes_fail,
            ready: st.ready,
            active: st.system_active,
        }
    }

    /// A consumer's delivered-offer count, if it is registered.
    pub async fn consumer_received(&self, id: &str) -> Option<u64> {
        let st = self.inner.state.lock().await;
        st.consumers.get(id).map(|c| c.offers_received)
    }

    /// A replica's liveness, if it is registered.
    pub async fn replica_alive(&self, id: &str) -> Option<bool> {
        let st = self.inner.state.lock().await;
        st.replicas.get(id).map(|r| r.alive)
    }

    /// Flip the run flag off. Producers observe this on their next
    /// `QueryActive` poll and exit.
    pub async fn end_run(&self) {
        let mut st = self.inner.state.lock().await;
        st.system_active = false;
        info!("run ended by operator");
    }

    /// End the run, wait out the grace window for in-flight recoveries,
    /// then write the final report.
    pub async fn shutdown_sequence(&self) -> Result<PathBuf> {
        self.end_run().await;
        info!(
            grace_secs = self.inner.cfg.shutdown_grace.as_secs(),
            "waiting for last recoveries before the final report"
        );
        tokio::time::sleep(self.inner.cfg.shutdown_grace).await;
        self.write_report().await
    }

    /// Render and write the final report.
    pub async fn write_report(&self) -> Result<PathBuf> {
        let contents = {
            let st = self.inner.state.lock().await;
            report::render(&st)
        };
        report::write(&self.inner.cfg.output_dir, &contents)
    }

    async fn handle_register_producer(&self, name: String) -> bool {
        if !is_valid_name(&name, VALID_STORES) {
            warn!(producer = %name, "rejected producer: unknown store");
            return false;
        }
        let mut st = self.inner.state.lock().await;
        if st.producers.contains_key(&name) {
            warn!(producer = %name, "rejected producer: already registered");
            return false;
        }
        st.producers.insert(
            name.clone(),
            ProducerState {
                name: name.clone(),
                offers_submitted: 0,
                offers_accepted: 0,
            },
        );
        info!(producer = %name, "producer registered");
        st.check_ready(self.inner.cfg.expected_registrations());
        true
    }

    async fn handle_register_replica(&self, name: String, address: String) -> bool {
        if !is_valid_name(&name, VALID_REPLICAS) {
            warn!(replica = %name, "rejected replica: unknown id");
            return false;
        }
        let mut st = self.inner.state.lock().await;
        if st.replicas.contains_key(&name) {
            warn!(replica = %name, "rejected replica: already registered");
            return false;
        }
        if let Err(e) = RpcClient::probe(&address).await {
            warn!(replica = %name, address = %address, error = %e, "rejected replica: unreachable");
            return false;
        }
        st.replicas.insert(
            name.clone(),
            ReplicaPeer {
                id: name.clone(),
                address: address.clone(),
                alive: true,
                crash_count: 0,
                client: Arc::new(RpcClient::new(address.clone())),
            },
        );
        info!(replica = %name, address = %address, "replica registered");
        st.check_ready(self.inner.cfg.expected_registrations());
        true
    }

    async fn handle_register_consumer(&self, req: RegisterConsumerRequest) -> bool {
        let mut st = self.inner.state.lock().await;
        if st.consumers.contains_key(&req.consumer_id) {
            warn!(consumer = %req.consumer_id, "rejected consumer: already registered");
            return false;
        }
        if let Err(e) = RpcClient::probe(&req.address).await {
            warn!(
                consumer = %req.consumer_id,
                address = %req.address,
                error = %e,
                "rejected consumer: unreachable"
            );
            return false;
        }
        let filter = SubscriptionFilter::from_wire(&req.categories, &req.stores, req.price_max);
        info!(
            consumer = %req.consumer_id,
            address = %req.address,
            filter = %filter,
            "consumer registered"
        );
        st.consumers.insert(
            req.consumer_id.clone(),
            ConsumerPeer {
                id: req.consumer_id.clone(),
                filter,
                address: req.address.clone(),
                alive: true,
                crash_count: 0,
                offers_received: 0,
                client: Arc::new(RpcClient::new(req.address)),
            },
        );
        st.check_ready(self.inner.cfg.expected_registrations());
        true
    }

    async fn handle_submit(&self, offer: Offer) -> bool {
        {
            let mut st = self.inner.state.lock().await;
            let Some(producer) = st.producers.get_mut(&offer.store) else {
                warn!(store = %offer.store, "rejected offer: unknown store");
                return false;
            };
            producer.offers_submitted += 1;

            if !is_valid_name(&offer.category, VALID_CATEGORIES) {
                warn!(
                    offer = %offer.offer_id,
                    category = %offer.category,
                    "rejected offer: invalid category"
                );
                return false;
            }
            producer.offers_accepted += 1;
            st.offers_received += 1;
            info!(count = st.offers_received, offer = %offer, "offer received");
        }

        // Replicate to every replica, alive or not, outside the lock.
        let peers = self.inner.state.lock().await.replica_clients();
        let results = quorum::replicate(&peers, &offer, INSERT_TIMEOUT).await;

        let write_ok = {
            let mut st = self.inner.state.lock().await;
            let mut acks = 0;
            for (id, acked) in &results {
                st.apply_replica_result(id, *acked);
                if *acked {
                    acks += 1;
                }
            }
            let write_ok = acks >= self.inner.cfg.write_quorum;
            if write_ok {
                st.writes_ok += 1;
            } else {
                st.writes_fail += 1;
            }
            info!(
                offer = %offer.offer_id,
                acks,
                replicas = results.len(),
                quorum = self.inner.cfg.write_quorum,
                write_ok,
                "write quorum evaluated"
            );
            write_ok
        };

        // Consumers match against what the broker observed, not against
        // replica durability; the flag gates the stricter variant.
        if write_ok || !self.inner.cfg.deliver_only_on_quorum {
            let broker = self.clone();
            tokio::spawn(async move {
                broker.fan_out(offer).await;
            });
        }

        write_ok
    }

    /// Deliver one offer to every consumer whose filter matches.
    async fn fan_out(&self, offer: Offer) {
        let targets: Vec<(String, Arc<RpcClient>)> = {
            let st = self.inner.state.lock().await;
            st.consumers
                .values()
                .filter(|c| c.filter.matches(&offer))
                .map(|c| (c.id.clone(), c.client.clone()))
                .collect()
        };

        let mut notified = 0;
        for (id, client) in targets {
            let acked = matches!(
                client
                    .call(&Request::ConsumerDeliver(offer.clone()), DELIVER_TIMEOUT)
                    .await,
                Ok(Response::Offer { ok: true })
            );
            let mut st = self.inner.state.lock().await;
            st.apply_consumer_result(&id, acked);
            if acked {
                if let Some(consumer) = st.consumers.get_mut(&id) {
                    consumer.offers_received += 1;
                }
                notified += 1;
            }
        }
        info!(offer = %offer.offer_id, notified, "offer distributed");
    }

    async fn handle_resync(&self, req: ResyncRequest) -> (Vec<Offer>, bool) {
        info!(kind = %req.kind, entity = %req.entity_id, "resync requested");

        let peers = self.inner.state.lock().await.replica_clients();
        let reads = quorum::read_all(&peers, READ_TIMEOUT).await;

        let mut st = self.inner.state.lock().await;
        let mut responders: Vec<(String, Vec<Offer>)> = Vec::new();
        for (id, read) in reads {
            match read {
                Some(offers) => {
                    st.apply_replica_result(&id, true);
                    responders.push((id, offers));
                }
                None => st.apply_replica_result(&id, false),
            }
        }

        if responders.len() < self.inner.cfg.read_quorum {
            warn!(
                entity = %req.entity_id,
                responders = responders.len(),
                quorum = self.inner.cfg.read_quorum,
                "resync failed: read quorum not reached"
            );
            return (Vec::new(), false);
        }

        let Some(authoritative) = quorum::find_agreement(&responders) else {
            warn!(entity = %req.entity_id, "resync failed: no two replicas agree");
            return (Vec::new(), false);
        };

        let missing = match req.kind {
            EntityKind::Replica => {
                let missing = quorum::missing_from(authoritative, &req.current_offers);
                if let Some(replica) = st.replicas.get_mut(&req.entity_id) {
                    replica.alive = true;
                }
                missing
            }
            EntityKind::Consumer => match st.consumers.get_mut(&req.entity_id) {
                None => {
                    warn!(consumer = %req.entity_id, "resync failed: unknown consumer");
                    return (Vec::new(), false);
                }
                Some(consumer) => {
                    let matching: Vec<Offer> = authoritative
                        .iter()
                        .filter(|o| consumer.filter.matches(o))
                        .cloned()
                        .collect();
                    let missing = quorum::missing_from(&matching, &req.current_offers);
                    consumer.alive = true;
                    consumer.offers_received += missing.len() as u64;
                    missing
                }
            },
        };

        info!(
            entity = %req.entity_id,
            missing = missing.len(),
            "resync served"
        );
        (missing, true)
    }
}

#[async_trait]
impl Handler for Broker {
    async fn register_producer(&self, name: String) -> Response {
        Response::Register {
            ok: self.handle_register_producer(name).await,
        }
    }

    async fn register_replica(&self, name: String, address: String) -> Response {
        Response::Register {
            ok: self.handle_register_replica(name, address).await,
        }
    }

    async fn register_consumer(&self, request: RegisterConsumerRequest) -> Response {
        Response::Register {
            ok: self.handle_register_consumer(request).await,
        }
    }

    async fn query_ready(&self) -> Response {
        let st = self.inner.state.lock().await;
        Response::Ready { ready: st.ready }
    }

    async fn query_active(&self) -> Response {
        let st = self.inner.state.lock().await;
        Response::Active {
            active: st.system_active,
        }
    }

    async fn submit(&self, offer: Offer) -> Response {
        Response::Offer {
            ok: self.handle_submit(offer).await,
        }
    }

    async fn resync(&self, request: ResyncRequest) -> Response {
        let (missing_offers, ok) = self.handle_resync(request).await;
        Response::Resync { missing_offers, ok }
    }
}
