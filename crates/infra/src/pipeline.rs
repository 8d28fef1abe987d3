//! Wiring for the whole consistency pipeline.
//!
//! ```text
//! aggregate -> OutboxPublisher -> outbox table -> OutboxProcessor -> bus
//!           -> inventory handlers -> InventoryService -> outbox table ...
//! LockSweeper -> InventoryService (ExpireLock)
//! ```

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use tradeflow_events::{BusError, EventBus, InMemoryEventBus};

use crate::config::PipelineConfig;
use crate::handlers::{StockThresholdHandler, register_inventory_handlers};
use crate::inventory_service::InventoryService;
use crate::lock_sweeper::LockSweeper;
use crate::outbox::{
    EventRegistry, OutboxAdmin, OutboxProcessor, OutboxPublisher, OutboxRepository, TradeEvent,
};
use crate::persistence::{AggregateReader, UnitOfWork};
use crate::workers::{TaskHandle, TaskRunner};

pub type TradeBus = Arc<InMemoryEventBus<TradeEvent>>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("failed to spawn background task: {0}")]
    Spawn(#[from] std::io::Error),
}

/// All pipeline components over one database.
pub struct Pipeline<D>
where
    D: UnitOfWork + AggregateReader + OutboxRepository + Clone + 'static,
{
    database: D,
    bus: TradeBus,
    publisher: OutboxPublisher,
    inventory: Arc<InventoryService<D>>,
    processor: Arc<OutboxProcessor<D, TradeBus, TradeEvent>>,
    sweeper: Arc<LockSweeper<D>>,
    admin: OutboxAdmin<D>,
    thresholds: Arc<StockThresholdHandler>,
}

impl<D> Pipeline<D>
where
    D: UnitOfWork + AggregateReader + OutboxRepository + Clone + 'static,
{
    /// Build and subscribe everything. Nothing runs until [`Pipeline::start`]
    /// (background tasks) or a manual `process_batch` / `sweep`.
    pub fn build(database: D, config: &PipelineConfig) -> Result<Self, PipelineError> {
        let publisher = OutboxPublisher::new(config.outbox.max_retries);
        let bus: TradeBus = Arc::new(InMemoryEventBus::new());
        let registry = Arc::new(EventRegistry::<TradeEvent>::trade());

        let inventory = Arc::new(InventoryService::new(database.clone(), publisher));
        let lock_ttl = chrono::Duration::from_std(config.lock_ttl)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let thresholds = register_inventory_handlers(&bus, Arc::clone(&inventory), lock_ttl)?;

        let processor = Arc::new(OutboxProcessor::new(
            database.clone(),
            Arc::clone(&bus),
            registry,
            config.outbox.clone(),
        ));
        let sweeper = Arc::new(LockSweeper::new(
            Arc::clone(&inventory),
            config.sweeper.clone(),
        ));
        let admin = OutboxAdmin::new(database.clone());

        Ok(Self {
            database,
            bus,
            publisher,
            inventory,
            processor,
            sweeper,
            admin,
            thresholds,
        })
    }

    pub fn database(&self) -> &D {
        &self.database
    }

    pub fn bus(&self) -> &TradeBus {
        &self.bus
    }

    /// Publisher for application services saving their own aggregates.
    pub fn publisher(&self) -> OutboxPublisher {
        self.publisher
    }

    pub fn inventory(&self) -> &Arc<InventoryService<D>> {
        &self.inventory
    }

    pub fn processor(&self) -> &Arc<OutboxProcessor<D, TradeBus, TradeEvent>> {
        &self.processor
    }

    pub fn sweeper(&self) -> &Arc<LockSweeper<D>> {
        &self.sweeper
    }

    pub fn admin(&self) -> &OutboxAdmin<D> {
        &self.admin
    }

    pub fn thresholds(&self) -> &Arc<StockThresholdHandler> {
        &self.thresholds
    }

    /// Start the bus and spawn the processor and sweeper threads.
    pub fn start(&self) -> Result<RunningPipeline, PipelineError> {
        self.bus.start()?;

        let processor = TaskRunner::spawn(Arc::clone(&self.processor))?;
        let sweeper = match TaskRunner::spawn(Arc::clone(&self.sweeper)) {
            Ok(handle) => handle,
            Err(err) => {
                processor.shutdown();
                return Err(err.into());
            }
        };

        info!("pipeline started");
        Ok(RunningPipeline {
            bus: Arc::clone(&self.bus),
            tasks: vec![processor, sweeper],
        })
    }
}

/// Background tasks of a started pipeline.
#[must_use = "dropping a running pipeline detaches its tasks; call shutdown"]
pub struct RunningPipeline {
    bus: TradeBus,
    tasks: Vec<TaskHandle>,
}

impl RunningPipeline {
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(TaskHandle::name).collect()
    }

    /// Stop every task (waiting for in-flight iterations), then the bus.
    pub fn shutdown(self) {
        for task in self.tasks {
            task.shutdown();
        }
        if let Err(err) = self.bus.stop() {
            warn!(error = %err, "failed to stop event bus");
        }
        info!("pipeline stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::OutboxStatus;
    use crate::persistence::InMemoryDatabase;
    use std::time::Duration;
    use tradeflow_purchasing::PurchaseOrderEvent;
    use tradeflow_sales::SalesOrderEvent;

    #[test]
    fn build_subscribes_inventory_handlers() {
        let pipeline = Pipeline::build(InMemoryDatabase::new(), &PipelineConfig::default()).unwrap();

        assert_eq!(pipeline.bus().handler_count(SalesOrderEvent::CONFIRMED), 1);
        assert_eq!(pipeline.bus().handler_count(PurchaseOrderEvent::GOODS_RECEIVED), 1);
        assert!(!pipeline.bus().is_running());
        assert_eq!(pipeline.publisher().max_retries(), 5);
    }

    #[test]
    fn start_and_shutdown() {
        let config = PipelineConfig::default().with_outbox(
            crate::outbox::OutboxProcessorConfig::default()
                .with_poll_interval(Duration::from_millis(10)),
        );
        let pipeline = Pipeline::build(InMemoryDatabase::new(), &config).unwrap();

        let running = pipeline.start().unwrap();
        assert!(pipeline.bus().is_running());
        assert_eq!(running.task_names(), vec!["outbox-processor", "lock-sweeper"]);

        running.shutdown();
        assert!(!pipeline.bus().is_running());
        assert!(pipeline.processor().stats().runs >= 1);
        assert_eq!(
            pipeline.admin().stats().unwrap().count(OutboxStatus::Pending),
            0
        );
    }
}
