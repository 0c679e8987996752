//! Dogpile demo
//!
//! Wraps a slow echo function, calls it repeatedly and then concurrently, and
//! reports how much work the cache saved.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dogpile::{spawn_purge_task, Config, LruStorage, MemoryStorage, Memoize};

/// Main entry point for the demo.
///
/// # Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the memory backend, optionally under the LRU overlay
/// 4. Start the background purge task
/// 5. Call the memoized echo sequentially, then concurrently
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dogpile=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        "Configuration loaded: ttl={:?}s, max_entries={:?}, echo_delay={}ms, calls={}",
        config.ttl, config.max_entries, config.echo_delay_ms, config.calls
    );

    let storage = Arc::new(MemoryStorage::<String>::new());
    let purge_handle = spawn_purge_task(Arc::clone(&storage), config.purge_interval);

    let memoize = Memoize::<String>::from_config(&config).name("dogpile::slow_echo");
    let memoize = match config.max_entries {
        Some(maxsize) => memoize.storage(LruStorage::new(Arc::clone(&storage), maxsize)?),
        None => memoize.storage(Arc::clone(&storage)),
    };

    let delay = Duration::from_millis(config.echo_delay_ms);
    let echo = memoize.wrap_async(move |text: String| async move {
        tokio::time::sleep(delay).await;
        Ok::<_, Infallible>(text)
    })?;

    // Sequential calls: the first one pays, the rest are hits
    let started = Instant::now();
    for _ in 0..config.calls {
        echo.call("hello".to_string()).await?;
    }
    info!(
        "{} sequential calls took {:?} (uncached would take {:?})",
        config.calls,
        started.elapsed(),
        delay * config.calls as u32
    );

    // Concurrent calls for an uncached key share one computation
    let started = Instant::now();
    let results = join_all((0..config.calls).map(|_| echo.call("world".to_string()))).await;
    for result in results {
        result?;
    }
    info!(
        "{} concurrent calls took {:?}",
        config.calls,
        started.elapsed()
    );

    let stats = echo.stats();
    info!(
        hits = stats.hits,
        misses = stats.misses,
        computations = stats.computations,
        coalesced = stats.coalesced,
        "hit rate {:.2}",
        stats.hit_rate()
    );

    purge_handle.abort();
    Ok(())
}
