use std::collections::HashMap;
use std::future::Future;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::{Error, Result};

/// Tracks the long-running background tasks of the binary (operator API,
/// cache purge) and reports the ones that stopped on their own.
///
/// Pollers are not registered here; each `PollerHandle` owns its task.
pub struct TaskSupervisor {
    tasks: HashMap<String, JoinHandle<()>>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        TaskSupervisor {
            tasks: HashMap::new(),
        }
    }

    /// Spawn a background task and register it under `name`
    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F) -> &mut Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let handle = tokio::spawn(future);

        info!("Spawned background task: {}", name);
        if let Some(previous) = self.tasks.insert(name.clone(), handle) {
            previous.abort();
            info!("Replaced background task: {}", name);
        }
        self
    }

    /// Error if any registered task has terminated. Finished tasks are
    /// dropped from tracking so they are only reported once.
    pub fn check_health(&mut self) -> Result<()> {
        let finished: Vec<String> = self
            .tasks
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();

        if finished.is_empty() {
            return Ok(());
        }

        for name in &finished {
            self.tasks.remove(name);
        }

        let message = format!("Tasks terminated unexpectedly: {:?}", finished);
        error!("{}", message);
        Err(Error::TaskFailed(message))
    }

    pub fn active_task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Abort every registered task
    pub fn shutdown_all(&mut self) {
        info!("Shutting down {} background tasks", self.tasks.len());

        for (name, handle) in self.tasks.drain() {
            handle.abort();
            info!("Aborted task: {}", name);
        }
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
