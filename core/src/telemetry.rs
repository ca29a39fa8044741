// Structured logging setup
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Installs a global fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// The core only emits `tracing` events and works without any subscriber;
/// applications that want console output call this once at startup. Returns
/// an error if a global subscriber is already installed.
///
/// Component targets: `pipeline`, `command_handler`, `command_invoker`,
/// `command_bus`, `broker`, `transport`, `config`.
///
/// # Examples
///
/// ```no_run
/// conduit_core::telemetry::init_logging().ok();
/// ```
pub fn init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_logging_with(DEFAULT_FILTER)
}

/// Like [`init_logging`], with an explicit fallback filter directive.
pub fn init_logging_with(
    default_filter: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_filter))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()?;

    info!(target: "telemetry", filter = %default_filter, "Logging initialized");
    Ok(())
}
