// src/logger.rs
//
// Logs go to stderr so worker processes share the coordinator's terminal.

use std::io::{self, IsTerminal};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const FILTER_ENV: &str = "PATCHBENCH_LOG";
const DEFAULT_FILTER: &str = "patchbench=info";

pub fn init() {
    let filter =
        EnvFilter::try_from_env(FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let ansi = env_truthy("PATCHBENCH_LOG_COLOR", io::stderr().is_terminal());

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(ansi)
                .with_writer(io::stderr),
        )
        .init();
}

fn env_truthy(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => truthy(&val),
        Err(_) => default,
    }
}

fn truthy(val: &str) -> bool {
    matches!(
        val.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
