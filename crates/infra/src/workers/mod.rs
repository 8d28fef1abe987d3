//! Background task runtime.
//!
//! Each [`PeriodicTask`] runs on its own named std thread. The shutdown
//! channel's `recv_timeout` doubles as the interval sleep, so a task stops
//! between iterations and never in the middle of `run_once`.

use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

/// A unit of background work repeated on a fixed interval.
pub trait PeriodicTask: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn interval(&self) -> Duration;

    /// One iteration. Errors are logged by the runner; the next tick retries.
    fn run_once(&self) -> anyhow::Result<()>;
}

/// Handle to control and join a running task.
#[derive(Debug)]
pub struct TaskHandle {
    name: String,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request graceful shutdown and wait for the task thread to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            if j.join().is_err() {
                warn!(task = %self.name, "task thread panicked");
            }
        }
    }
}

/// Spawns periodic tasks.
#[derive(Debug)]
pub struct TaskRunner;

impl TaskRunner {
    /// Run `task` until the returned handle is shut down (or dropped).
    ///
    /// The first iteration runs immediately.
    pub fn spawn<T: PeriodicTask>(task: Arc<T>) -> io::Result<TaskHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let name = task.name().to_string();

        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || task_loop(task.as_ref(), &shutdown_rx))?;

        Ok(TaskHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn task_loop<T: PeriodicTask>(task: &T, shutdown_rx: &mpsc::Receiver<()>) {
    info!(task = task.name(), interval_ms = task.interval().as_millis() as u64, "task started");

    loop {
        if let Err(err) = task.run_once() {
            warn!(task = task.name(), error = %err, "task iteration failed");
        } else {
            debug!(task = task.name(), "task iteration finished");
        }

        match shutdown_rx.recv_timeout(task.interval()) {
            Err(RecvTimeoutError::Timeout) => continue,
            // Explicit shutdown, or the handle was dropped.
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(task = task.name(), "task stopped");
}
