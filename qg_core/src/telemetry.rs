use std::sync::Once;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Initialize tracing - safe to call multiple times
pub fn init_tracing(env: &str, service: &str) {
    INIT.call_once(|| {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        // try_init so an embedding application that already installed a
        // subscriber keeps it
        let result = if env == "production" {
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().json())
                .with(env_filter)
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().pretty())
                .with(env_filter)
                .try_init()
        };

        if result.is_ok() {
            tracing::info!(service = %service, "Tracing initialized");
        }
    });
}
