//! Background worker: outbox processor + lock sweeper until Ctrl-C.

use tokio::runtime::Runtime;
use tracing::{info, warn};

use tradeflow_infra::outbox::OutboxRepository;
use tradeflow_infra::persistence::{AggregateReader, InMemoryDatabase, PostgresDatabase, UnitOfWork};
use tradeflow_infra::{Pipeline, PipelineConfig};

fn main() -> anyhow::Result<()> {
    tradeflow_observability::init();

    let config = PipelineConfig::from_env()?;
    // Postgres calls are bridged onto this runtime from the task threads.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("tradeflow-rt")
        .build()?;

    match config.database_url.as_deref() {
        Some(url) => {
            let db = PostgresDatabase::connect(url, config.postgres, runtime.handle().clone())?;
            db.migrate()?;
            info!("connected to postgres");
            run(Pipeline::build(db, &config)?, &runtime)
        }
        None => {
            warn!("DATABASE_URL not set; outbox and inventory live in memory only");
            run(Pipeline::build(InMemoryDatabase::new(), &config)?, &runtime)
        }
    }
}

fn run<D>(pipeline: Pipeline<D>, runtime: &Runtime) -> anyhow::Result<()>
where
    D: UnitOfWork + AggregateReader + OutboxRepository + Clone + 'static,
{
    let running = pipeline.start()?;
    info!(tasks = ?running.task_names(), "worker running");

    let signal = runtime.block_on(tokio::signal::ctrl_c());
    info!("shutting down");
    running.shutdown();

    let stats = pipeline.processor().stats();
    let swept = pipeline.sweeper().totals();
    info!(
        sent = stats.sent,
        dead_lettered = stats.dead_lettered,
        locks_expired = swept.released,
        "worker stopped"
    );
    signal?;
    Ok(())
}
