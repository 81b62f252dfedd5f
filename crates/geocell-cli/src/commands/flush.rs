use geocell_core::{OfflineQueue, ServiceParts};

use super::{AgentOpts, or_exit};

pub fn run(agent_id: &str, opts: &AgentOpts) {
    let agent_id = agent_id.trim();
    if agent_id.is_empty() {
        eprintln!("--agent-id must not be empty");
        std::process::exit(1);
    }
    let config = or_exit(super::load_config(opts), "Invalid configuration");
    let parts = or_exit(ServiceParts::from_config(&config), "Error opening agent state");
    let queue = or_exit(
        OfflineQueue::open(parts.store.clone(), config.queue_capacity),
        "Error reading offline queue",
    );

    let report = super::runtime().block_on(async {
        let before = queue.len().await;
        println!("Flushing {before} queued samples to {}", config.sink_url);
        queue
            .drain(agent_id, parts.deliverer.as_ref(), config.delivery_timeout())
            .await
    });
    let report = or_exit(report, "Flush aborted");

    println!("  Delivered: {}", report.delivered);
    println!("  Remaining: {}", report.remaining);
    if let Some(e) = &report.halted_on {
        println!("  Halted:    {e}");
        std::process::exit(2);
    }
}
