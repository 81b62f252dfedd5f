//! CLI for geocell: field-agent telemetry with offline store-and-forward.

mod commands;

use clap::{Parser, Subcommand};

use commands::AgentOpts;

#[derive(Parser)]
#[command(name = "geocell")]
#[command(about = "geocell: adaptive field-agent telemetry with offline store-and-forward")]
#[command(version = geocell_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start tracking as an agent. Reads classifier events from stdin,
    /// one `KIND CONFIDENCE` per line (e.g. `IN_VEHICLE 85`).
    Run {
        /// Agent identifier the samples are filed under
        #[arg(long)]
        agent_id: String,

        #[command(flatten)]
        opts: AgentOpts,
    },

    /// Start tracking with the agent id persisted by the last `run` (boot hook)
    Resume {
        #[command(flatten)]
        opts: AgentOpts,
    },

    /// List samples waiting in the offline queue, oldest first
    Queue {
        #[command(flatten)]
        opts: AgentOpts,

        /// Print the raw JSON array instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Run one drain pass of the offline queue against the sink
    Flush {
        /// Agent identifier the queued samples are delivered under
        #[arg(long)]
        agent_id: String,

        #[command(flatten)]
        opts: AgentOpts,
    },

    /// Build one sample from the host readers and print it
    Sample {
        #[command(flatten)]
        opts: AgentOpts,
    },

    /// Run the development sink
    Sink {
        /// Bind address
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port
        #[arg(long, default_value = "8043")]
        port: u16,

        /// Answer every push with 503 (fault drills)
        #[arg(long)]
        reject: bool,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { agent_id, opts } => commands::run::run(&agent_id, &opts),
        Commands::Resume { opts } => commands::resume::run(&opts),
        Commands::Queue { opts, json } => commands::queue::run(&opts, json),
        Commands::Flush { agent_id, opts } => commands::flush::run(&agent_id, &opts),
        Commands::Sample { opts } => commands::sample::run(&opts),
        Commands::Sink { host, port, reject } => commands::sink::run(&host, port, reject),
    }
}
