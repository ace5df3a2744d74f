use anyhow::Result;
use futures::future::join_all;
use std::{sync::Arc, time::Duration};

/// A component that requires periodic background work to stay consistent, for example sweeping
/// expired orders out of the books or releasing stale fund locks.
#[async_trait::async_trait]
pub trait Maintaining: Send + Sync {
    async fn run_maintenance(&self) -> Result<()>;
}

/// Collects all service components requiring maintenance and drives them on a fixed interval.
pub struct ServiceMaintenance {
    pub maintainers: Vec<Arc<dyn Maintaining>>,
}

impl ServiceMaintenance {
    pub fn new(maintainers: Vec<Arc<dyn Maintaining>>) -> Self {
        Self { maintainers }
    }

    pub async fn run_maintenance_on_interval(self, interval: Duration) -> ! {
        loop {
            for result in join_all(
                self.maintainers
                    .iter()
                    .map(|maintainer| maintainer.run_maintenance()),
            )
            .await
            {
                if let Err(err) = result {
                    tracing::error!(?err, "maintenance failed");
                }
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[async_trait::async_trait]
impl Maintaining for ServiceMaintenance {
    async fn run_maintenance(&self) -> Result<()> {
        for result in join_all(
            self.maintainers
                .iter()
                .map(|maintainer| maintainer.run_maintenance()),
        )
        .await
        {
            if let Err(err) = result {
                tracing::error!(?err, "maintenance failed");
            }
        }
        Ok(())
    }
}
