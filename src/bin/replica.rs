//! Storage replica entry point.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use dealcast::config::ReplicaConfig;
use dealcast::replica::ReplicaNode;
use dealcast::rpc::RpcServer;
use dealcast::telemetry::{LogFormat, init_logging};

#[derive(Parser, Debug)]
#[command(name = "replica")]
#[command(about = "Run one dealcast storage replica")]
struct Args {
    /// Replica identity: DB1, DB2 or DB3.
    #[arg(long)]
    node: String,
}

#[tokio::main]
async fn main() {
    init_logging(LogFormat::from_env()).ok();
    let args = Args::parse();

    let cfg = match ReplicaConfig::from_env(&args.node) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    info!(
        replica = %cfg.node_id,
        listen = %cfg.listen_addr,
        advertised = %cfg.advertised_addr,
        fault_probability = cfg.fault_probability,
        "starting replica"
    );

    let node = ReplicaNode::new(cfg.clone());
    let server = match RpcServer::bind(&cfg.listen_addr, Arc::new(node.clone())).await {
        Ok(server) => server,
        Err(e) => {
            error!(addr = %cfg.listen_addr, error = %e, "cannot bind replica listener");
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

    if let Err(e) = server.run().await {
        error!(error = %e, "replica server failed");
        std::process::exit(1);
    }
}
