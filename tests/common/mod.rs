use tracing_subscriber::{fmt, layer::SubscriberExt, registry, util::SubscriberInitExt, EnvFilter};

/// Prints logs selected by `RUST_LOG` through the test harness' captured output
pub fn init_logging() {
    let _ = registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_test_writer())
        .try_init();
}
