//! Long-running services sharing one shutdown token.
//!
//! ```ignore
//! let shutdown = CancellationToken::new();
//!
//! ServiceHost::new()
//!     .with_service(ingestion_loop)
//!     .with_service(reaper)
//!     .run(shutdown)
//!     .await?;
//! ```

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A background service that runs until `shutdown` is cancelled.
#[async_trait]
pub trait Service: Send + 'static {
    fn name(&self) -> &'static str;

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()>;
}

/// Runs a set of services to completion.
///
/// The first service to stop, successfully or not, cancels the shared token
/// so the others wind down. The first error is returned once every service
/// has stopped.
#[derive(Default)]
pub struct ServiceHost {
    services: Vec<Box<dyn Service>>,
}

impl ServiceHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, service: impl Service) -> Self {
        self.services.push(Box::new(service));
        self
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let mut tasks = JoinSet::new();

        for service in self.services {
            let name = service.name();
            let token = shutdown.clone();
            info!(service = name, "starting service");
            tasks.spawn(async move { (name, service.run(token).await) });
        }

        let mut first_error: Option<anyhow::Error> = None;

        while let Some(joined) = tasks.join_next().await {
            let (name, result) = match joined {
                Ok(output) => output,
                Err(e) => ("unknown", Err(anyhow!("service task panicked: {}", e))),
            };

            match result {
                Ok(()) => info!(service = name, "service stopped"),
                Err(e) => {
                    error!(service = name, error = %e, "service failed");
                    first_error.get_or_insert(e.context(format!("service {} failed", name)));
                }
            }

            if !shutdown.is_cancelled() {
                info!(service = name, "stopping remaining services");
                shutdown.cancel();
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
