//! Consumer entry point.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use dealcast::catalog::load_consumer_spec;
use dealcast::config::ConsumerConfig;
use dealcast::consumer::ConsumerNode;
use dealcast::rpc::RpcServer;
use dealcast::telemetry::{LogFormat, init_logging};

#[derive(Parser, Debug)]
#[command(name = "consumer")]
#[command(about = "Run one dealcast consumer")]
struct Args {
    /// Client number, 1..=12. Selects the subscription row and port.
    #[arg(long)]
    client: usize,
}

#[tokio::main]
async fn main() {
    init_logging(LogFormat::from_env()).ok();
    let args = Args::parse();

    let cfg = match ConsumerConfig::from_env(args.client) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let spec = match load_consumer_spec(&cfg.subscriptions_path, args.client) {
        Ok(spec) => spec,
        Err(e) => {
            error!(error = %e, "cannot load subscription row");
            std::process::exit(1);
        }
    };

    info!(
        consumer = %spec.consumer_id,
        client = args.client,
        listen = %cfg.listen_addr,
        filter = %spec.filter(),
        fault_probability = cfg.fault_probability,
        "starting consumer"
    );

    let node = match ConsumerNode::new(cfg.clone(), spec) {
        Ok(node) => node,
        Err(e) => {
            error!(error = %e, "cannot create output record");
            std::process::exit(1);
        }
    };

    let server = match RpcServer::bind(&cfg.listen_addr, Arc::new(node.clone())).await {
        Ok(server) => server,
        Err(e) => {
            error!(addr = %cfg.listen_addr, error = %e, "cannot bind consumer listener");
            std::process::exit(1);
        }
    };

    // Register once the listener is up; the broker dials back to verify.
    let registrant = node.clone();
    tokio::spawn(async move {
        match registrant.register().await {
            Ok(true) => {}
            Ok(false) => warn!("registration refused"),
            Err(e) => error!(error = %e, "cannot reach broker to register"),
        }
    });

    info!("listening for offers");
    if let Err(e) = server.run().await {
        error!(error = %e, "consumer server failed");
        std::process::exit(1);
    }
}
