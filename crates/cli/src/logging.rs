//! Log output for the command-line front end.
//!
//! The level is controlled by the `IMAGEBANK_LOG` environment variable using
//! `EnvFilter` syntax, e.g. `IMAGEBANK_LOG=imagebank_core=debug`. Without it
//! only warnings are shown so command output stays readable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init() {
    let env_filter =
        EnvFilter::try_from_env("IMAGEBANK_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}
