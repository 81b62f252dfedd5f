use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use geocell_core::{ActivityEvent, AgentConfig, ChannelFeed, ServiceParts, TrackerService};

use super::{AgentOpts, or_exit};

pub fn run(agent_id: &str, opts: &AgentOpts) {
    let config = or_exit(super::load_config(opts), "Invalid configuration");
    super::runtime().block_on(track(config, Some(agent_id)));
}

/// Run the service until Ctrl+C. `None` resumes the persisted agent id.
pub(super) async fn track(config: AgentConfig, agent_id: Option<&str>) {
    let feed = ChannelFeed::new();
    let parts = or_exit(ServiceParts::from_config(&config), "Error opening agent state")
        .with_feed(Arc::new(feed.clone()));
    let sink = format!("{}/{}", config.sink_url.trim_end_matches('/'), config.sink_root);
    let state_dir = config.state_dir.display().to_string();
    let service = or_exit(TrackerService::new(config, parts), "Error creating service");

    let pending = service.queue().len().await;
    let started = match agent_id {
        Some(id) => service.start(id),
        None => service.resume(),
    };
    or_exit(started, "Error starting tracker");

    println!("GeoCellTrack agent v{}", geocell_core::VERSION);
    println!("  Agent:     {}", service.agent_id().unwrap_or_default());
    println!("  Sink:      {sink}");
    println!("  State:     {state_dir}");
    println!("  Queued:    {pending} samples from earlier runs");
    println!("  Interval:  {:?} ({})", service.controller().current_interval(), service.controller().mode());
    println!();
    println!("  Type classifier events on stdin, e.g. `STILL 90` or `IN_VEHICLE 80`.");
    println!("  Press Ctrl+C to stop.");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    or_exit(
        ctrlc::set_handler(move || {
            r.store(false, Ordering::SeqCst);
        }),
        "Error setting Ctrl+C handler",
    );

    spawn_stdin_reader(feed);

    let mut payloads = service.last_payload().subscribe();
    let mut lost = service.lost_samples().subscribe();
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    while running.load(Ordering::SeqCst) {
        tokio::select! {
            changed = payloads.changed() => {
                if changed.is_err() {
                    break;
                }
                let elapsed = service.elapsed_time().get();
                if let Some(json) = payloads.borrow_and_update().clone() {
                    println!("[{elapsed}] delivered {json}");
                }
            }
            changed = lost.changed() => {
                if changed.is_err() {
                    break;
                }
                let count = *lost.borrow_and_update();
                eprintln!("[{}] {count} samples lost (local storage failure)", service.elapsed_time().get());
            }
            _ = ticker.tick() => {}
        }
    }

    service.shutdown().await;
    let remaining = service.queue().len().await;
    println!();
    println!("Stopped after {}. {remaining} samples queued for the next run.", service.elapsed_time().get());
}

/// Forward `KIND CONFIDENCE` lines from stdin to the classifier feed.
fn spawn_stdin_reader(feed: ChannelFeed) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match ActivityEvent::parse_line(line) {
                Ok(event) => {
                    feed.publish(event);
                }
                Err(e) => eprintln!("ignored '{line}': {e}"),
            }
        }
    });
}
