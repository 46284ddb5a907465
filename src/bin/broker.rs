//! Broker entry point.
//!
//! Binds the RPC listener, serves the full broker surface and reads
//! operator commands from stdin. `report`, `fin`, `exit` or `quit` end
//! the run: producers observe the inactive flag and stop, and after a
//! grace window the final report is written and the process exits.

use std::io::BufRead;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use dealcast::broker::Broker;
use dealcast::config::BrokerConfig;
use dealcast::rpc::RpcServer;
use dealcast::telemetry::{LogFormat, init_logging};

#[derive(Parser, Debug)]
#[command(name = "broker")]
#[command(about = "Run the dealcast broker")]
struct Args {}

#[tokio::main]
async fn main() {
    init_logging(LogFormat::from_env()).ok();
    let Args {} = Args::parse();

    let cfg = match BrokerConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let broker = Broker::new(cfg.clone());
    let addr = format!("{}:{}", cfg.host, cfg.port);
    let server = match RpcServer::bind(&addr, Arc::new(broker.clone())).await {
        Ok(server) => server,
        Err(e) => {
            error!(addr = %addr, error = %e, "cannot bind broker listener");
            std::process::exit(1);
        }
    };

    info!("waiting for registrations");
    info!("type 'report' or 'fin' to end the run and write the final report");

    // Completes only when the operator types a finish command. With no
    // stdin (detached runs) the broker serves until killed.
    let operator = tokio::task::spawn_blocking(move || {
        let stdin = std::io::stdin();
        loop {
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => loop {
                    std::thread::park();
                },
                Ok(_) => match line.trim().to_lowercase().as_str() {
                    "report" | "fin" | "exit" | "quit" => return,
                    "" => {}
                    other => {
                        warn!(command = %other, "unknown command; type 'report' or 'fin' to finish");
                    }
                },
            }
        }
    });

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(error = %e, "broker server failed");
                std::process::exit(1);
            }
        }
        _ = operator => {
            info!("operator ended the run");
            match broker.shutdown_sequence().await {
                Ok(path) => info!(path = %path.display(), "run finished"),
                Err(e) => {
                    error!(error = %e, "cannot write final report");
                    std::process::exit(1);
                }
            }
            server.shutdown();
        }
    }
}
