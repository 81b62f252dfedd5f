use std::sync::Arc;

use geocell_core::{FixedLocationProvider, SampleBuilder, validate_payload};

use super::{AgentOpts, or_exit};

pub fn run(opts: &AgentOpts) {
    let config = or_exit(super::load_config(opts), "Invalid configuration");
    let mut builder = SampleBuilder::host();
    if let Some(loc) = config.fixed_location {
        builder = builder.with_location(Arc::new(FixedLocationProvider::new(loc)));
    }
    let sample = super::runtime().block_on(builder.build(config.location_timeout()));

    let value = or_exit(serde_json::to_value(&sample), "Error encoding sample");
    println!("{}", or_exit(serde_json::to_string_pretty(&value), "Error encoding sample"));
    if let Err(violations) = validate_payload(&value) {
        eprintln!();
        for v in violations {
            eprintln!("  schema: {v}");
        }
        std::process::exit(1);
    }
}
