// Main entry point for the indexing agent

use std::sync::Arc;

use anyhow::{Context, Result};
use indexing_agent::{
    Config, DocumentPipeline, HttpBackendFactory, HttpStatusClient, IdleReaper, IngestionLoop,
    JetStreamSource, NoopStatusReporter, ServiceHost, StatusReporter, TenantPool,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,indexing_agent=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting indexing agent");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        max_workers = config.max_workers,
        max_rag_instances = config.max_rag_instances,
        rag_instance_ttl = config.rag_instance_ttl_secs,
        "Configuration loaded"
    );

    // Backend pool
    let factory =
        HttpBackendFactory::new(config.backend()).context("Failed to build backend client")?;
    let pool = Arc::new(TenantPool::new(Arc::new(factory), config.pool()));

    // Status reporting
    let reporter: Arc<dyn StatusReporter> = if config.status_reporting_enabled {
        let client =
            HttpStatusClient::new(config.status()).context("Failed to build status client")?;
        if !client.health_check().await {
            tracing::warn!(url = %config.go_backend_url, "Status API not reachable, continuing");
        }
        Arc::new(client)
    } else {
        tracing::info!("Status reporting disabled");
        Arc::new(NoopStatusReporter)
    };

    let pipeline = Arc::new(DocumentPipeline::new(
        pool.clone(),
        reporter,
        config.pipeline(),
    ));

    // Connect to the message stream
    let source = JetStreamSource::connect(&config.jetstream())
        .await
        .context("Failed to connect to JetStream")?;

    let ingestion = IngestionLoop::new(source, pipeline.clone(), config.consumer());
    let reaper = IdleReaper::new(pool.clone(), config.reaper())
        .with_pipeline(pipeline)
        .with_loop_stats(ingestion.stats());

    // Spawn signal handler
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("Received shutdown signal");
            shutdown.cancel();
        });
    }

    let result = ServiceHost::new()
        .with_service(ingestion)
        .with_service(reaper)
        .run(shutdown)
        .await;

    pool.close_all().await;
    tracing::info!("Indexing agent stopped");

    result
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
