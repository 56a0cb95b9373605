//! Tracing setup.
//!
//! Logs go to stderr so stdout stays reserved for host responses. The filter
//! comes from `RUST_LOG` and defaults to [`DEFAULT_FILTER`].

use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info,clipvoice_core=info,clipvoice_piper=info,clip_tts=info";

/// Install the global fmt subscriber; fails if one is already installed
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .try_init()?;

    info!(
        target: "telemetry",
        version = env!("CARGO_PKG_VERSION"),
        "Tracing initialized"
    );
    Ok(())
}
