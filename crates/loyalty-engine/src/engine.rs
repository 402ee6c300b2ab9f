use std::sync::Arc;

use anyhow::{Context, Result};
use loyalty_config::Settings;
use loyalty_partner::PartnerClient;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::aggregator::ResultAggregator;
use crate::processor::OrderProcessor;
use crate::scheduler::FetchScheduler;
use crate::stats::EngineStats;
use crate::store::OrderStore;

/// Running reconciliation engine: the fetch scheduler and the result
/// aggregator, both stopped by the same token.
pub struct Engine {
    stats: Arc<EngineStats>,
    scheduler: JoinHandle<()>,
    aggregator: JoinHandle<()>,
}

impl Engine {
    pub fn spawn(
        settings: &Settings,
        orders: Arc<dyn OrderStore>,
        partner: Arc<dyn PartnerClient>,
        shutdown: CancellationToken,
    ) -> Self {
        let stats = Arc::new(EngineStats::default());

        let (aggregator, intake) = ResultAggregator::new(
            Arc::clone(&orders),
            settings.aggregator.queue_capacity,
            Arc::clone(&stats),
        );
        let processor = Arc::new(OrderProcessor::new(partner, Arc::clone(&orders), intake));
        let scheduler = FetchScheduler::new(
            orders,
            processor,
            settings.fetch.interval,
            settings.fetch.workers,
            Arc::clone(&stats),
        );

        let aggregator = tokio::spawn(aggregator.run(settings.aggregator.interval, shutdown.clone()));
        let scheduler = tokio::spawn(scheduler.run(shutdown));

        Self {
            stats,
            scheduler,
            aggregator,
        }
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    /// Wait for both loops to exit after shutdown was requested.
    pub async fn join(self) -> Result<()> {
        self.scheduler.await.context("fetch scheduler task failed")?;
        self.aggregator
            .await
            .context("result aggregator task failed")?;
        Ok(())
    }
}
