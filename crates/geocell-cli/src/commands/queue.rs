use std::sync::Arc;

use geocell_core::{FileStore, OfflineQueue, Sample};

use super::{AgentOpts, or_exit};

pub fn run(opts: &AgentOpts, json: bool) {
    let config = or_exit(super::load_config(opts), "Invalid configuration");
    let store = or_exit(FileStore::open(&config.state_dir), "Error opening state directory");
    let queue = or_exit(
        OfflineQueue::open(Arc::new(store), config.queue_capacity),
        "Error reading offline queue",
    );
    let pending = super::runtime().block_on(queue.snapshot());

    if json {
        println!("{}", or_exit(serde_json::to_string_pretty(&pending), "Error encoding queue"));
        return;
    }

    println!(
        "Offline queue: {} samples in {}",
        pending.len(),
        config.state_dir.display()
    );
    if pending.is_empty() {
        return;
    }
    println!();
    println!("{:>5}  {:>15}  {:<24}  {:>8}  {:>6}", "#", "timestamp", "location", "hardware", "sim");
    println!("{}", "-".repeat(66));
    for (i, sample) in pending.iter().enumerate() {
        println!(
            "{:>5}  {:>15}  {:<24}  {:>8}  {:>6}",
            i + 1,
            sample.timestamp,
            describe_location(sample),
            sample.hardware.len(),
            sample.sim.len()
        );
    }
}

fn describe_location(sample: &Sample) -> String {
    match &sample.location {
        Some(loc) => format!("{:.5},{:.5}", loc.lat, loc.lon),
        None => "-".to_string(),
    }
}
