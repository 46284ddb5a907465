//! Producer entry point.

use clap::Parser;
use tracing::{error, info};

use dealcast::config::ProducerConfig;
use dealcast::producer::Producer;
use dealcast::telemetry::{LogFormat, init_logging};

#[derive(Parser, Debug)]
#[command(name = "producer")]
#[command(about = "Run one dealcast producer")]
struct Args {
    /// Store name: Riploy, Falabellox or Parisio.
    #[arg(long)]
    store: String,
}

#[tokio::main]
async fn main() {
    init_logging(LogFormat::from_env()).ok();
    let args = Args::parse();

    let cfg = match ProducerConfig::from_env(&args.store) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    info!(store = %cfg.store, broker = %cfg.broker_addr, "starting producer");

    let mut producer = match Producer::new(cfg) {
        Ok(producer) => producer,
        Err(e) => {
            error!(error = %e, "cannot load catalog");
            std::process::exit(1);
        }
    };

    if let Err(e) = producer.register().await {
        error!(error = %e, "cannot reach broker to register");
        std::process::exit(1);
    }

    producer.await_ready().await;
    producer.run().await;
    info!("producer stopped cleanly");
}
