//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::Stage;

/// Installs the global `tracing` subscriber.
///
/// The filter comes from `RUST_LOG`, falling back to `info`. Output is
/// human-readable on the local stage and JSON everywhere else. Returns
/// `false` when a global subscriber was already installed, which leaves the
/// existing one in place.
pub fn init_tracing(stage: Stage) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = if stage.is_local() {
        builder.try_init()
    } else {
        builder.json().try_init()
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::init_tracing;
    use crate::config::Stage;

    #[test]
    fn test_second_initialisation_keeps_existing_subscriber() {
        init_tracing(Stage::Testing);

        assert!(!init_tracing(Stage::Local));
    }
}
