//! End-of-run report.
//!
//! Written once, after the operator ends the run and the grace window
//! has elapsed. Sections, in order: producer summary, replica status,
//! write metrics, consumer notifications, failures and recoveries, and
//! a conclusion narrating how the run went.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use super::BrokerState;
use crate::error::{Error, Result};

/// File name of the report inside the output directory.
pub const REPORT_FILE: &str = "Report.txt";

/// Render the full report from a state snapshot.
pub(crate) fn render(state: &BrokerState) -> String {
    let mut out = String::new();

    out.push_str("PRODUCER SUMMARY:\n");
    for producer in state.producers.values() {
        out.push_str(&format!("*{}:\n", producer.name));
        out.push_str(&format!(
            "  - Offers submitted: {}\n",
            producer.offers_submitted
        ));
        out.push_str(&format!(
            "  - Offers accepted: {}\n",
            producer.offers_accepted
        ));
    }
    out.push('\n');

    out.push_str("STORAGE REPLICA STATUS:\n");
    for replica in state.replicas.values() {
        let status = if replica.alive { "ALIVE" } else { "DOWN" };
        out.push_str(&format!("*{}: {}\n", replica.id, status));
        out.push_str(&format!(
            "  * Simulated crashes: {}\n",
            replica.crash_count
        ));
    }
    out.push('\n');

    out.push_str("WRITE METRICS:\n");
    out.push_str(&format!("*Successful writes: {}\n", state.writes_ok));
    out.push_str(&format!("*Failed writes: {}\n", state.writes_fail));
    out.push('\n');

    out.push_str("CONSUMER NOTIFICATIONS:\n");
    for consumer in state.consumers.values() {
        out.push_str(&format!("* {}:\n", consumer.id));
        out.push_str(&format!("  - Preferences: {}\n", consumer.filter));
        out.push_str(&format!(
            "  - Offers received: {}\n",
            consumer.offers_received
        ));
        out.push_str(&format!(
            "  - Record consumer_{}.csv written.\n",
            consumer.id
        ));
        out.push_str(&format!(
            "  - Simulated crashes: {}\n",
            consumer.crash_count
        ));
    }
    out.push('\n');

    out.push_str("FAILURES AND RECOVERIES:\n");
    out.push_str("*Replica failures:\n");
    for replica in state.replicas.values() {
        let outcome = if replica.alive {
            "recovered from every simulated crash"
        } else {
            "still down after its last crash"
        };
        out.push_str(&format!("\n- {}: {}\n", replica.id, outcome));
        out.push_str(&format!("- Simulated crashes: {}\n", replica.crash_count));
        out.push_str(&format!(
            "- Resyncs completed: {}\n",
            recoveries(replica.crash_count, replica.alive)
        ));
    }
    out.push_str("\n*Consumer failures:\n");
    for consumer in state.consumers.values() {
        let outcome = if consumer.alive {
            "recovered from every simulated crash"
        } else {
            "still down after its last crash"
        };
        out.push_str(&format!("\n- {}: {}\n", consumer.id, outcome));
        out.push_str(&format!("- Simulated crashes: {}\n", consumer.crash_count));
        out.push_str(&format!(
            "- Resyncs completed: {}\n",
            recoveries(consumer.crash_count, consumer.alive)
        ));
    }

    out.push_str(
        "\nReplicas and consumers stay down for a few seconds after a simulated crash, \
         then reconnect on their own and request resynchronization. An entity that was \
         down when the run ended may not have recovered in time for this report.\n",
    );

    out.push_str(&conclusion(state));
    out
}

/// Crashes an entity came back from. If it is still down, the last
/// crash never completed its resync.
fn recoveries(crash_count: u32, alive: bool) -> u32 {
    if alive {
        crash_count
    } else {
        crash_count.saturating_sub(1)
    }
}

fn conclusion(state: &BrokerState) -> String {
    let mut out = String::from("\n=== CONCLUSION ===\n\n");

    let replicas_alive = state.replicas.values().filter(|r| r.alive).count();
    let replica_crashes: u32 = state.replicas.values().map(|r| r.crash_count).sum();
    let consumers_alive = state.consumers.values().filter(|c| c.alive).count();
    let consumer_crashes: u32 = state.consumers.values().map(|c| c.crash_count).sum();
    let write_consistency = state.writes_ok == state.offers_received;

    if replica_crashes == 0 && consumer_crashes == 0 {
        out.push_str(
            "The system stayed fully stable for the whole run, honoring the \
             replication rules throughout. Every offer was processed and \
             distributed without incident.\n\n",
        );
    } else if replicas_alive == state.replicas.len() && consumers_alive == state.consumers.len() {
        out.push_str(
            "The system showed high fault tolerance during the run. Despite \
             temporary crashes, write availability was preserved and every \
             replica and consumer recovered and resynchronized successfully.\n\n\
             Disconnections and reconnections were handled without losing any \
             relevant offer, thanks to history recovery over quorum-consistent \
             distributed reads.\n\n",
        );
    } else {
        out.push_str(&format!(
            "The system operated in degraded conditions during the run. \
             {} replica(s) and {} consumer(s) were still down at the end, \
             not having recovered from their last crash.\n\n\
             Despite these standing failures, the system kept processing and \
             distributing offers to the entities that remained up, sustaining \
             the required write quorum.\n\n",
            state.replicas.len() - replicas_alive,
            state.consumers.len() - consumers_alive,
        ));
    }

    if write_consistency {
        out.push_str(
            "On consistency: every accepted offer was stored durably in the \
             replicated log. ",
        );
    } else {
        out.push_str(
            "On consistency: some accepted offers did not reach the write \
             quorum and were recorded as failed writes. ",
        );
    }
    out.push_str(&format!(
        "{} offers were processed in total, with {} successful writes",
        state.offers_received, state.writes_ok
    ));
    if state.writes_fail > 0 {
        out.push_str(&format!(" and {} failed writes.\n", state.writes_fail));
    } else {
        out.push_str(" and no failed writes.\n");
    }

    out.push_str("\nKey metrics:\n");
    out.push_str(&format!(
        "- Replicas alive: {}/{}\n",
        replicas_alive,
        state.replicas.len()
    ));
    out.push_str(&format!(
        "- Consumers alive: {}/{}\n",
        consumers_alive,
        state.consumers.len()
    ));
    out.push_str(&format!(
        "- Offers processed: {}\n",
        state.offers_received
    ));
    out.push_str(&format!("- Successful writes: {}\n", state.writes_ok));
    out.push_str(&format!("- Failed writes: {}\n", state.writes_fail));
    out.push_str(&format!(
        "- Write consistency held: {}\n",
        write_consistency
    ));
    if replica_crashes > 0 {
        out.push_str(&format!("- Replica crashes handled: {}\n", replica_crashes));
    }
    if consumer_crashes > 0 {
        out.push_str(&format!(
            "- Consumer crashes handled: {}\n",
            consumer_crashes
        ));
    }

    out
}

/// Write the rendered report into the output directory.
pub fn write(output_dir: &Path, contents: &str) -> Result<PathBuf> {
    fs::create_dir_all(output_dir).map_err(|e| {
        Error::Config(format!(
            "cannot create output dir {}: {}",
            output_dir.display(),
            e
        ))
    })?;
    let path = output_dir.join(REPORT_FILE);
    fs::write(&path, contents)
        .map_err(|e| Error::Config(format!("cannot write report {}: {}", path.display(), e)))?;
    info!(path = %path.display(), "final report written");
    Ok(path)
}
