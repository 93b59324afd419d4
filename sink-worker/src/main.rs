use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use common_kafka::{create_kafka_producer, ConsumerConfigBuilder};
use common_redis::RedisClient;
use envconfig::Envconfig;
use sink_worker::config::{Config, DedupeBackend};
use sink_worker::consumer::{RunnerSettings, SinkConsumer, SinkRunner};
use sink_worker::context::SinkConsumerContext;
use sink_worker::dead_letter::KafkaDeadLetterProducer;
use sink_worker::dedupe::{Deduplicator, MemoryDeduplicator, RedisDeduplicator};
use sink_worker::health::HealthRegistry;
use sink_worker::namespace::NamespaceStore;
use sink_worker::offset_tracker::OffsetTracker;
use sink_worker::server::{router, serve, setup_metrics_recorder};
use sink_worker::sink::Sink;
use sink_worker::storage::{ClickHouseEvents, PgMeterRepository, SinkStorage};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(tracing::Level::INFO.into())
            .from_env_lossy(),
    );
    tracing_subscriber::registry().with(log_layer).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = ?e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = ?e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn dedupe_from_config(config: &Config) -> Result<Arc<dyn Deduplicator>> {
    let dedupe: Arc<dyn Deduplicator> = match config.dedupe_backend()? {
        DedupeBackend::Redis => {
            let client = RedisClient::with_config(
                config.redis_url.clone(),
                Some(config.redis_response_timeout()),
                Some(config.redis_connection_timeout()),
            )
            .await
            .context("failed to connect to redis")?;
            Arc::new(RedisDeduplicator::new(Arc::new(client), config.dedupe_ttl()))
        }
        DedupeBackend::Memory => {
            warn!("Using in-memory dedupe, duplicates are only caught within this process");
            Arc::new(MemoryDeduplicator::new(
                config.dedupe_memory_capacity,
                config.dedupe_ttl(),
            ))
        }
    };
    Ok(dedupe)
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env().context("failed to load configuration from env")?;
    config.validate().context("invalid configuration")?;
    let topics = config.topics()?;

    let liveness = HealthRegistry::new();
    // A flush can hold the loop for as long as a dead-letter publish may take
    let sink_health = liveness.register(
        "sink",
        Duration::from_secs(30) + config.dead_letter_timeout(),
    );

    let recorder = setup_metrics_recorder().context("failed to install metrics recorder")?;
    let bind = format!("{}:{}", config.host, config.port);
    let app = router(liveness.clone(), Some(recorder));
    tokio::spawn(async move {
        if let Err(e) = serve(app, &bind).await {
            error!(error = ?e, bind = %bind, "Health and metrics server stopped");
        }
    });

    let offsets = Arc::new(OffsetTracker::new());
    let consumer: SinkConsumer = ConsumerConfigBuilder::from_kafka_config(&config.kafka)
        .build()
        .create_with_context(SinkConsumerContext::new(offsets.clone()))
        .context("failed to create kafka consumer")?;

    let producer = create_kafka_producer(&config.kafka)
        .await
        .context("failed to create dead-letter producer")?;
    let dead_letters = Arc::new(KafkaDeadLetterProducer::new(
        producer,
        topics.clone(),
        config.dead_letter_timeout(),
    ));

    let dedupe = dedupe_from_config(&config).await?;

    let meters = PgMeterRepository::connect(&config.database_url, config.max_pg_connections)
        .await
        .context("failed to connect to the meter store")?;
    let storage = Arc::new(SinkStorage::new(
        ClickHouseEvents::new(&config.clickhouse),
        meters,
    ));

    let namespaces = Arc::new(NamespaceStore::new(config.no_match_policy()?));
    let sink = Sink::new(
        namespaces,
        topics,
        dedupe,
        storage,
        dead_letters,
        offsets,
        config.min_commit_count,
    );

    let runner = SinkRunner::new(
        consumer,
        sink,
        sink_health,
        RunnerSettings {
            max_commit_wait: config.max_commit_wait(),
            namespace_refresh_interval: config.namespace_refresh_interval(),
            poll_timeout: config.poll_timeout(),
            reconnect_attempts: config.kafka_reconnect_attempts,
        },
    );

    let shutdown = CancellationToken::new();
    let mut task = tokio::spawn(runner.run(shutdown.clone()));

    let result = tokio::select! {
        joined = &mut task => joined,
        _ = shutdown_signal() => {
            info!("Received shutdown signal");
            shutdown.cancel();
            match tokio::time::timeout(config.shutdown_timeout(), &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(
                        timeout_secs = config.shutdown_timeout_secs,
                        "Sink did not drain in time, exiting with uncommitted offsets"
                    );
                    task.abort();
                    return Ok(());
                }
            }
        }
    };

    match result.context("sink task panicked")? {
        Ok(()) => {
            info!("Sink stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = ?e, "Sink stopped with a fatal error");
            Err(e.into())
        }
    }
}
