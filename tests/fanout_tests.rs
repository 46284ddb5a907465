//! Consumer fan-out and consumer recovery over the real surface.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dealcast::broker::Broker;
use dealcast::catalog::ConsumerSpec;
use dealcast::config::{BrokerConfig, ConsumerConfig};
use dealcast::consumer::ConsumerNode;
use dealcast::rpc::{
    Handler, RegisterConsumerRequest, Request, Response, RpcClient, RpcServer,
};
use dealcast::types::Offer;

const CALL_TIMEOUT: Duration = Duration::from_secs(10);

fn test_config() -> BrokerConfig {
    BrokerConfig {
        output_dir: std::env::temp_dir(),
        ..BrokerConfig::default()
    }
}

fn offer(id: &str, category: &str, price: i32) -> Offer {
    Offer {
        offer_id: id.to_string(),
        store: "Riploy".to_string(),
        category: category.to_string(),
        product: "Producto".to_string(),
        price,
        stock: 5,
        timestamp: "2025-11-28 10:00:00".to_string(),
    }
}

async fn start_broker(cfg: BrokerConfig) -> (Broker, String) {
    let broker = Broker::new(cfg);
    let server = RpcServer::bind("127.0.0.1:0", Arc::new(broker.clone()))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap().to_string();
    tokio::spawn(async move { server.run().await });
    (broker, addr)
}

/// A consumer that records whatever it is delivered.
#[derive(Clone, Default)]
struct RecordingConsumer {
    delivered: Arc<tokio::sync::Mutex<Vec<Offer>>>,
}

#[async_trait]
impl Handler for RecordingConsumer {
    async fn consumer_deliver(&self, offer: Offer) -> Response {
        self.delivered.lock().await.push(offer);
        Response::Offer { ok: true }
    }
}

async fn start_recording_consumer() -> (RecordingConsumer, String) {
    let consumer = RecordingConsumer::default();
    let server = RpcServer::bind("127.0.0.1:0", Arc::new(consumer.clone()))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap().to_string();
    tokio::spawn(async move { server.run().await });
    (consumer, addr)
}

/// A replica whose read reply is fixed at construction.
struct StaticReplica {
    offers: Vec<Offer>,
}

#[async_trait]
impl Handler for StaticReplica {
    async fn replica_insert(&self, _offer: Offer) -> Response {
        Response::Offer { ok: true }
    }

    async fn replica_read(&self) -> Response {
        Response::Read {
            offers: self.offers.clone(),
            ok: true,
        }
    }
}

async fn start_static_replica(log: Vec<Offer>) -> String {
    let server = RpcServer::bind("127.0.0.1:0", Arc::new(StaticReplica { offers: log }))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap().to_string();
    tokio::spawn(async move { server.run().await });
    addr
}

async fn register_consumer(
    client: &RpcClient,
    id: &str,
    categories: &[&str],
    stores: &[&str],
    price_max: i32,
    address: &str,
) {
    let ok = client
        .call(
            &Request::RegisterConsumer(RegisterConsumerRequest {
                consumer_id: id.to_string(),
                categories: categories.iter().map(|s| s.to_string()).collect(),
                stores: stores.iter().map(|s| s.to_string()).collect(),
                price_max,
                address: address.to_string(),
            }),
            CALL_TIMEOUT,
        )
        .await
        .unwrap()
        .is_ack();
    assert!(ok, "consumer {} registration failed", id);
}

async fn register_producer(client: &RpcClient, store: &str) {
    let ok = client
        .call(
            &Request::RegisterProducer {
                name: store.to_string(),
            },
            CALL_TIMEOUT,
        )
        .await
        .unwrap()
        .is_ack();
    assert!(ok);
}

async fn submit(client: &RpcClient, offer: &Offer) -> bool {
    client
        .call(&Request::Submit(offer.clone()), CALL_TIMEOUT)
        .await
        .unwrap()
        .is_ack()
}

async fn await_deliveries(consumer: &RecordingConsumer, expected: usize) -> Vec<Offer> {
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let delivered = consumer.delivered.lock().await;
        if delivered.len() >= expected {
            return delivered.clone();
        }
    }
    consumer.delivered.lock().await.clone()
}

#[tokio::test]
async fn test_fan_out_respects_all_three_axes() {
    let (_broker, addr) = start_broker(test_config()).await;
    let client = RpcClient::new(addr);

    register_producer(&client, "Riploy").await;
    let (consumer, consumer_addr) = start_recording_consumer().await;
    register_consumer(&client, "C1", &["Moda"], &["null"], 50, &consumer_addr).await;

    // Only the first offer matches category and price.
    submit(&client, &offer("Riploy-1", "Moda", 40)).await;
    submit(&client, &offer("Riploy-2", "Moda", 60)).await;
    submit(&client, &offer("Riploy-3", "Hogar", 40)).await;

    let delivered = await_deliveries(&consumer, 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let delivered_after = consumer.delivered.lock().await.clone();

    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].offer_id, "Riploy-1");
    assert_eq!(delivered_after.len(), 1, "non-matching offers were delivered");
}

#[tokio::test]
async fn test_fan_out_happens_even_without_write_quorum() {
    // No replicas registered: every write fails its quorum, yet the
    // default policy still delivers to consumers.
    let (broker, addr) = start_broker(test_config()).await;
    let client = RpcClient::new(addr);

    register_producer(&client, "Riploy").await;
    let (consumer, consumer_addr) = start_recording_consumer().await;
    register_consumer(&client, "C1", &["null"], &["null"], -1, &consumer_addr).await;

    assert!(!submit(&client, &offer("Riploy-1", "Moda", 40)).await);

    let delivered = await_deliveries(&consumer, 1).await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(broker.metrics().await.writes_fail, 1);
    assert_eq!(broker.consumer_received("C1").await, Some(1));
}

#[tokio::test]
async fn test_quorum_gated_delivery_suppresses_failed_writes() {
    let cfg = BrokerConfig {
        deliver_only_on_quorum: true,
        ..test_config()
    };
    let (_broker, addr) = start_broker(cfg).await;
    let client = RpcClient::new(addr);

    register_producer(&client, "Riploy").await;
    let (consumer, consumer_addr) = start_recording_consumer().await;
    register_consumer(&client, "C1", &["null"], &["null"], -1, &consumer_addr).await;

    assert!(!submit(&client, &offer("Riploy-1", "Moda", 40)).await);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(consumer.delivered.lock().await.is_empty());
}

#[tokio::test]
async fn test_consumer_crash_recovery_catches_up_matching_offers() {
    let (broker, broker_addr) = start_broker(test_config()).await;
    let client = RpcClient::new(broker_addr.clone());

    // Authoritative history held by two agreeing replicas.
    let history = vec![
        offer("Riploy-1", "Moda", 40),
        offer("Riploy-2", "Moda", 45),
        offer("Riploy-3", "Hogar", 10),
    ];
    for id in ["DB1", "DB2"] {
        let replica_addr = start_static_replica(history.clone()).await;
        let ok = client
            .call(
                &Request::RegisterReplica {
                    name: id.to_string(),
                    address: replica_addr,
                },
                CALL_TIMEOUT,
            )
            .await
            .unwrap()
            .is_ack();
        assert!(ok);
    }

    // A real consumer subscribed to Moda, with fault injection off so
    // only the forced crash fires.
    let output_dir =
        std::env::temp_dir().join(format!("dealcast-fanout-{}", std::process::id()));
    let node = ConsumerNode::new(
        ConsumerConfig {
            client_number: 1,
            listen_addr: "127.0.0.1:0".to_string(),
            advertised_addr: String::new(),
            broker_addr: broker_addr.clone(),
            subscriptions_path: PathBuf::from("unused.csv"),
            output_dir: output_dir.clone(),
            fault_probability: 0.0,
            recovery_delay: Duration::from_millis(100),
        },
        ConsumerSpec {
            consumer_id: "C1".to_string(),
            categories: vec!["Moda".to_string()],
            stores: vec!["null".to_string()],
            price_max: -1,
        },
    )
    .unwrap();
    let server = RpcServer::bind("127.0.0.1:0", Arc::new(node.clone()))
        .await
        .unwrap();
    let node_addr = server.local_addr().unwrap().to_string();
    tokio::spawn(async move { server.run().await });

    register_consumer(&client, "C1", &["Moda"], &["null"], -1, &node_addr).await;

    // Crash while holding nothing; recovery must pull both Moda offers.
    node.simulate_crash().await;

    let mut recovered = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if !node.in_fault().await {
            recovered = true;
            break;
        }
    }
    assert!(recovered, "consumer never recovered");

    let mut ids: Vec<String> = node
        .received_snapshot()
        .await
        .into_iter()
        .map(|o| o.offer_id)
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["Riploy-1", "Riploy-2"]);
    assert_eq!(broker.consumer_received("C1").await, Some(2));

    // Merged offers were persisted to the output record too.
    let record =
        std::fs::read_to_string(output_dir.join("consumer_C1.csv")).unwrap();
    assert_eq!(record.lines().count(), 3);
    std::fs::remove_dir_all(output_dir).ok();
}

#[tokio::test]
async fn test_crashed_consumer_is_marked_down_then_revives() {
    let (broker, broker_addr) = start_broker(test_config()).await;
    let client = RpcClient::new(broker_addr.clone());

    register_producer(&client, "Riploy").await;
    let history = vec![offer("Riploy-1", "Moda", 40)];
    for id in ["DB1", "DB2"] {
        let replica_addr = start_static_replica(history.clone()).await;
        client
            .call(
                &Request::RegisterReplica {
                    name: id.to_string(),
                    address: replica_addr,
                },
                CALL_TIMEOUT,
            )
            .await
            .unwrap();
    }

    let output_dir =
        std::env::temp_dir().join(format!("dealcast-revive-{}", std::process::id()));
    let node = ConsumerNode::new(
        ConsumerConfig {
            client_number: 2,
            listen_addr: "127.0.0.1:0".to_string(),
            advertised_addr: String::new(),
            broker_addr: broker_addr.clone(),
            subscriptions_path: PathBuf::from("unused.csv"),
            output_dir: output_dir.clone(),
            fault_probability: 0.0,
            recovery_delay: Duration::from_millis(100),
        },
        ConsumerSpec {
            consumer_id: "C2".to_string(),
            categories: vec!["null".to_string()],
            stores: vec!["null".to_string()],
            price_max: -1,
        },
    )
    .unwrap();
    let server = RpcServer::bind("127.0.0.1:0", Arc::new(node.clone()))
        .await
        .unwrap();
    let node_addr = server.local_addr().unwrap().to_string();
    tokio::spawn(async move { server.run().await });
    register_consumer(&client, "C2", &["null"], &["null"], -1, &node_addr).await;

    // Crash, then a delivery attempt marks the consumer down. The
    // write itself still meets its quorum.
    node.simulate_crash().await;
    assert!(submit(&client, &offer("Riploy-1", "Moda", 40)).await);

    // Recovery resyncs against the agreeing replicas and credits the
    // missed offer.
    let mut resynced = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if broker.consumer_received("C2").await.unwrap_or(0) >= 1 && !node.in_fault().await {
            resynced = true;
            break;
        }
    }
    assert!(resynced, "consumer never resynchronized");
    assert_eq!(node.crash_count().await, 1);
    // Delivered at most once by identity, whether via fan-out or resync.
    assert_eq!(node.received_snapshot().await.len(), 1);
    std::fs::remove_dir_all(output_dir).ok();
}
