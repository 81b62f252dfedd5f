use super::{AgentOpts, or_exit};

pub fn run(opts: &AgentOpts) {
    let config = or_exit(super::load_config(opts), "Invalid configuration");
    println!("Resuming with the agent id stored in {}", config.state_dir.display());
    super::runtime().block_on(super::run::track(config, None));
}
