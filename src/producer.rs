//! Producer: a store emitting offers at a random cadence.
//!
//! A producer registers, loads its catalog, waits for the broker to
//! report the system ready, then loops: check the run is still active,
//! pick a random catalog row, synthesize a discounted offer and submit
//! it. Offer ids are `"<store>-<seq>"` where `seq` counts accepted
//! submissions starting at 1, so a producer's ids are strictly
//! increasing.

use std::time::Duration;

use tracing::{info, warn};

use crate::catalog::{CatalogRow, load_catalog};
use crate::config::ProducerConfig;
use crate::constants::{
    ACTIVE_POLL_TIMEOUT, READY_POLL_INTERVAL, REGISTER_TIMEOUT, SUBMIT_TIMEOUT,
};
use crate::error::{Error, Result};
use crate::rpc::{Request, Response, RpcClient};
use crate::types::Offer;

#[derive(Debug)]
pub struct Producer {
    cfg: ProducerConfig,
    broker: RpcClient,
    catalog: Vec<CatalogRow>,
    accepted: u64,
}

impl Producer {
    /// Build a producer, loading its catalog up front. An empty catalog
    /// (or a missing file) is fatal.
    pub fn new(cfg: ProducerConfig) -> Result<Self> {
        let catalog = load_catalog(&cfg.catalog_path())?;
        if catalog.is_empty() {
            return Err(Error::Config(format!(
                "catalog {} has no valid rows",
                cfg.catalog_path().display()
            )));
        }
        info!(store = %cfg.store, products = catalog.len(), "catalog loaded");
        let broker = RpcClient::new(cfg.broker_addr.clone());
        Ok(Self {
            cfg,
            broker,
            catalog,
            accepted: 0,
        })
    }

    /// Register this store with the broker. A refused registration is
    /// logged but not fatal; the broker will also refuse our offers.
    pub async fn register(&self) -> Result<bool> {
        let request = Request::RegisterProducer {
            name: self.cfg.store.clone(),
        };
        let response = self.broker.call(&request, REGISTER_TIMEOUT).await?;
        let accepted = matches!(response, Response::Register { ok: true });
        if accepted {
            info!(store = %self.cfg.store, "registered with broker");
        } else {
            warn!(store = %self.cfg.store, "broker refused registration");
        }
        Ok(accepted)
    }

    /// Poll the readiness flag until the whole system has registered.
    pub async fn await_ready(&self) {
        info!(store = %self.cfg.store, "waiting for the system to be ready");
        loop {
            match self.broker.call(&Request::QueryReady, ACTIVE_POLL_TIMEOUT).await {
                Ok(Response::Ready { ready: true }) => {
                    info!(store = %self.cfg.store, "system ready, starting offer generation");
                    return;
                }
                Ok(_) => {}
                Err(e) => warn!(store = %self.cfg.store, error = %e, "readiness poll failed"),
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    /// Emit offers until the operator ends the run.
    pub async fn run(&mut self) {
        loop {
            match self.broker.call(&Request::QueryActive, ACTIVE_POLL_TIMEOUT).await {
                Ok(Response::Active { active: false }) => {
                    info!(store = %self.cfg.store, "system inactive, stopping");
                    return;
                }
                Ok(_) => {}
                Err(e) => warn!(store = %self.cfg.store, error = %e, "active poll failed"),
            }

            let row = &self.catalog[fastrand::usize(..self.catalog.len())];
            let offer = self.make_offer(row);
            match self.broker.call(&Request::Submit(offer.clone()), SUBMIT_TIMEOUT).await {
                Ok(Response::Offer { ok: true }) => {
                    self.accepted += 1;
                    info!(
                        store = %self.cfg.store,
                        seq = self.accepted,
                        offer = %offer,
                        "offer accepted"
                    );
                }
                Ok(_) => warn!(store = %self.cfg.store, offer = %offer.offer_id, "offer not accepted"),
                Err(e) => warn!(store = %self.cfg.store, error = %e, "submit failed"),
            }

            let pause = Duration::from_secs(1 + fastrand::u64(..3));
            tokio::time::sleep(pause).await;
        }
    }

    /// Synthesize an offer from a catalog row: a 10–50% discount on the
    /// base price and up to 50% off the base stock (at least 1).
    fn make_offer(&self, row: &CatalogRow) -> Offer {
        let discount = 10 + fastrand::i32(0..41);
        let price = row.base_price * (100 - discount) / 100;

        let stock_cut = fastrand::i32(0..51);
        let stock = (row.base_stock * (100 - stock_cut) / 100).max(1);

        Offer {
            offer_id: format!("{}-{}", self.cfg.store, self.accepted + 1),
            store: self.cfg.store.clone(),
            category: row.category.clone(),
            product: row.product.clone(),
            price,
            stock,
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}
