use crate::prelude::*;

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Task {
    id: u64,
    name: String,
    handle: AbortHandle,
    submitted_at: Instant,
    deadline: Duration,
}

impl Task {
    fn is_hogged(&self) -> bool {
        self.submitted_at.elapsed() >= self.deadline
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.id, self.name)
    }
}

/// Runs slow calls (sink writes, pruning) off the sampling loop.
///
/// Tasks run on the multi-threaded runtime, so a task may submit or run further tasks
/// without deadlocking. Every task is tracked until it finishes or is aborted; call
/// [`cleanup`](Self::cleanup) periodically to cancel the ones that overstayed their deadline.
#[derive(Clone, Default)]
pub struct BackgroundTaskExecutor {
    tasks: Arc<Mutex<Vec<Task>>>,
    next_id: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl BackgroundTaskExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<Task>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, name: &str, handle: AbortHandle, deadline: Duration) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let task = Task {
            id,
            name: name.to_string(),
            handle,
            submitted_at: Instant::now(),
            deadline,
        };
        trace!("tracking task {}", task);
        self.tasks().push(task);
        id
    }

    /// Fire and forget. A failing body is logged; it is aborted by [`cleanup`](Self::cleanup)
    /// once older than `deadline`.
    pub fn submit<F>(&self, name: &str, deadline: Duration, body: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            warn!("executor closed, dropping task '{}'", name);
            return;
        }

        let task_name = name.to_string();
        let handle = tokio::spawn(async move {
            if let Err(err) = body.await {
                error!("task '{}' failed: {:?}", task_name, err);
            }
        });
        self.track(name, handle.abort_handle(), deadline);
    }

    /// Runs `body` and waits for it. After `deadline` the task is aborted and
    /// [`TaskError::Timeout`] is returned; otherwise the body's own result.
    pub async fn run<F, T>(&self, name: &str, deadline: Duration, body: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            bail!("executor closed, refusing to run task '{}'", name);
        }

        let mut handle = tokio::spawn(body);
        self.track(name, handle.abort_handle(), deadline);

        match tokio::time::timeout(deadline, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) if err.is_cancelled() => Err(TaskError::Cancelled {
                name: name.to_string(),
            }
            .into()),
            Ok(Err(_)) => Err(TaskError::Panicked {
                name: name.to_string(),
            }
            .into()),
            Err(_) => {
                handle.abort();
                warn!("task '{}' timed out after {:?}, cancelled", name, deadline);
                Err(TaskError::Timeout {
                    name: name.to_string(),
                    deadline,
                }
                .into())
            }
        }
    }

    /// Forgets finished tasks and aborts those running past their deadline. Never blocks.
    pub fn cleanup(&self) {
        let mut tasks = self.tasks();

        tasks.retain(|task| !task.handle.is_finished());
        if !tasks.is_empty() {
            warn!(
                "{} hogged tasks: [{}]",
                tasks.len(),
                tasks
                    .iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        for task in tasks.iter().filter(|t| t.is_hogged()) {
            warn!("aborting task {} (deadline {:?})", task, task.deadline);
            task.handle.abort();
        }
    }

    /// Number of tracked tasks that haven't finished yet.
    pub fn pending(&self) -> usize {
        self.tasks()
            .iter()
            .filter(|t| !t.handle.is_finished())
            .count()
    }

    /// Stops accepting tasks, gives running ones a short grace period, then aborts the rest.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);

        let started = Instant::now();
        while self.pending() > 0 && started.elapsed() < CLOSE_GRACE {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        self.kill();
    }

    /// Aborts everything immediately.
    pub fn kill(&self) {
        self.closed.store(true, Ordering::Release);

        for task in self.tasks().drain(..) {
            if !task.handle.is_finished() {
                debug!("aborting task {}", task);
                task.handle.abort();
            }
        }
    }
}

impl std::fmt::Debug for BackgroundTaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BackgroundTaskExecutor(pending={})", self.pending())
    }
}
