use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static TELEMETRY: OnceLock<()> = OnceLock::new();

/// Upstream HTTP and pool chatter stays at `warn` unless `RUST_LOG` says otherwise.
const DEFAULT_DIRECTIVES: &str = "info,hyper=warn,reqwest=warn,sqlx=warn,httpmock=warn";

pub fn init() {
    TELEMETRY.get_or_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter());
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_target(true),
            )
            .init();
    });
}

fn default_filter() -> EnvFilter {
    EnvFilter::try_new(DEFAULT_DIRECTIVES).unwrap_or_else(|_| EnvFilter::new("info"))
}
