use std::sync::Arc;

use notify_relay::broker::{EventBroker, LineStreamBroker};
use notify_relay::cache::CacheBackend;
use notify_relay::config::{CacheSettings, RelayConfig};
use notify_relay::consumer::EventConsumer;
use notify_relay::logging::init_logging;
use notify_relay::notification::{NotificationService, NotificationStore};
use tokio::io::BufReader;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env()?;
    config.validate()?;

    let logging = init_logging(&config.logging)?;
    info!(
        topic = %config.broker.topic,
        group = %config.broker.group_id,
        filter = %logging.get_filter(),
        "notify-relay starting"
    );

    let cache = connect_cache(&config.cache).await?;
    let store = Arc::new(NotificationStore::new(cache, config.cache.clone()));
    let service = NotificationService::new(Arc::clone(&store), config.broker.clone());

    // Events arrive as newline-delimited JSON envelopes on stdin.
    let broker: Arc<dyn EventBroker> =
        Arc::new(LineStreamBroker::new(BufReader::new(tokio::io::stdin())));
    let consumer = Arc::new(EventConsumer::new(
        broker,
        Arc::clone(&store),
        config.broker.clone(),
        config.reconnect.clone(),
    ));
    let mut handle = consumer.spawn();

    let result = tokio::select! {
        joined = &mut handle => joined,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            consumer.stop();
            handle.await
        }
    };

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Event consumer failed"),
        Err(e) => error!(error = %e, "Event consumer task panicked"),
    }

    let stats = service.summarize();
    info!(
        consumer = ?consumer.stats(),
        total = stats.total,
        unread = stats.unread_count,
        "notify-relay stopped"
    );
    Ok(())
}

#[cfg(feature = "redis")]
async fn connect_cache(settings: &CacheSettings) -> anyhow::Result<Arc<dyn CacheBackend>> {
    let cache = notify_relay::cache::RedisCache::connect(&settings.url).await?;
    info!(url = %settings.url, "Connected to Redis");
    Ok(Arc::new(cache))
}

#[cfg(not(feature = "redis"))]
async fn connect_cache(_settings: &CacheSettings) -> anyhow::Result<Arc<dyn CacheBackend>> {
    info!("Using in-memory cache");
    Ok(Arc::new(notify_relay::cache::InMemoryCache::new()))
}
