//! Tracing subscriber setup. `RUST_LOG` takes priority when set (the usual
//! operator escape hatch for turning up verbosity without a redeploy);
//! otherwise the configured `log_level` picks the default filter.

use tracing_subscriber::{prelude::*, EnvFilter, Registry};

use crate::config::LogLevel;

pub fn init(log_level: LogLevel) {
    let logger = tracing_subscriber::fmt::layer().json();
    let default_directive = log_level.as_tracing_level().to_string();
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&default_directive))
        .unwrap();

    let collector = Registry::default().with(logger).with(env_filter);
    tracing::subscriber::set_global_default(collector).expect("tracing subscriber already set");
}
