use tracing_subscriber::{prelude::*, util::SubscriberInitExt, EnvFilter};

/// Default directives when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info";

/// Installs a global subscriber printing to stdout, filtered by `RUST_LOG`.
///
/// Trie internals log through the `log` facade under the `felt_trie` target,
/// e.g. `RUST_LOG=info,felt_trie=debug`.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_filter(filter),
        )
        .init();
}
