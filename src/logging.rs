// Logger setup
//
// env_logger driven by the [debug] config section. RUST_LOG still wins when set.

use crate::config::DebugConfig;
use anyhow::{Context, Result};
use env_logger::{Builder, Target};
use std::fs::OpenOptions;
use std::io::Write;

/// Initialize the global logger. Call once, before creating the Backend.
pub fn init(config: &DebugConfig) -> Result<()> {
    let mut builder = Builder::new();
    builder.parse_filters(&config.log_level);

    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    if config.log_to_file {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.log_file)
            .with_context(|| format!("Failed to open log file: {}", config.log_file))?;

        writeln!(file, "=== Inferno Log ===")?;
        writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;
        writeln!(file)?;

        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.try_init().context("Logger already initialized")?;
    Ok(())
}
