//! Structured logging setup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_level` applies to this crate
/// and `warn` to everything else.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(default_level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}

fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(format!("warn,least_conn_proxy={level},tower_http={level}"))
        .unwrap_or_else(|_| EnvFilter::new("warn,least_conn_proxy=info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init("debug");
        init("info");
        tracing::info!("logging initialized");
    }

    #[test]
    fn test_bad_level_falls_back() {
        let filter = default_filter("not a level!");
        assert!(filter.to_string().contains("least_conn_proxy"));
    }
}
