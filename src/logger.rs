use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Installs the global `tracing` subscriber.
///
/// The filter comes from `FLEETLOAD_LOG`, then `RUST_LOG`, then the verbosity
/// flag. A second call leaves the first subscriber in place.
pub fn init_logging(verbose: bool, no_color: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = std::env::var("FLEETLOAD_LOG")
        .or_else(|_err| std::env::var("RUST_LOG"))
        .map_or_else(
            |_err| EnvFilter::new(fallback),
            |value| EnvFilter::try_new(value).unwrap_or_else(|_err| EnvFilter::new(fallback)),
        );

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_ansi(!no_color)
        .with_target(verbose)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("Global tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_twice_keeps_first_subscriber() {
        init_logging(false, true);
        init_logging(true, false);
        tracing::info!("logger installed");
    }
}
