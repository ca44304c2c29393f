use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

const WORKSPACE_CRATES: &[&str] = &["server", "services", "db", "utils"];

/// Install the global fmt subscriber. `RUST_LOG` overrides the default directives.
pub fn init(default_level: &str) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        WORKSPACE_CRATES
            .iter()
            .map(|krate| format!("{krate}={default_level}"))
            .chain(std::iter::once("tower_http=info".to_string()))
            .collect::<Vec<_>>()
            .join(",")
    });

    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .try_init();
}
