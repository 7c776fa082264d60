//! Build Tasks
//!
//! A build task wraps one long-running external operation. Tasks are handed
//! to the [`TaskFactory`], which runs them on the runtime's blocking pool and
//! lets the orchestrator thread block until the work completes, fails, is
//! cancelled or times out.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{BuildError, Result};
use crate::events::{BuildEvent, EventBus};

/// A unit of work scheduled through the [`TaskFactory`]
pub trait BuildTask: Send + 'static {
    type Output: Send + 'static;

    /// Name used in logs and events
    fn name(&self) -> &str;

    /// Run the task to completion on a worker thread
    fn run(self) -> Result<Self::Output>;
}

/// Build task backed by a closure
pub struct StandardBuildTask<F> {
    name: String,
    job: F,
}

impl<F, T> StandardBuildTask<F>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    pub fn new(name: impl Into<String>, job: F) -> Self {
        Self {
            name: name.into(),
            job,
        }
    }
}

impl<F, T> BuildTask for StandardBuildTask<F>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    fn run(self) -> Result<T> {
        (self.job)()
    }
}

thread_local! {
    static CURRENT_TASK: RefCell<Option<TaskContext>> = const { RefCell::new(None) };
}

/// Runtime and cancellation of the build task running on this thread.
///
/// The token is cancelled when the task's wait times out, when the build is
/// cancelled and when the factory stops. Work that outlives its waiter, such
/// as an external tool process, watches it to stop early.
#[derive(Clone)]
pub struct TaskContext {
    handle: Handle,
    token: CancellationToken,
}

impl TaskContext {
    /// Context of the task the calling thread is working for, if any
    pub fn current() -> Option<TaskContext> {
        CURRENT_TASK.with(|current| current.borrow().clone())
    }

    /// Make this the current context of the calling thread until the guard
    /// is dropped. Used to carry a task's context onto helper threads.
    pub fn enter(&self) -> EnteredTask {
        let previous = CURRENT_TASK.with(|current| current.replace(Some(self.clone())));
        EnteredTask { previous }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the task is cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// Restores the previous [`TaskContext`] of the thread when dropped
pub struct EnteredTask {
    previous: Option<TaskContext>,
}

impl Drop for EnteredTask {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_TASK.with(|current| *current.borrow_mut() = previous);
    }
}

type Registry = Arc<Mutex<HashMap<Uuid, String>>>;

struct FactoryState {
    running: bool,
    token: CancellationToken,
}

/// Tracks in-flight build tasks and bridges their completion back to the
/// (blocking) orchestrator thread.
pub struct TaskFactory {
    handle: Handle,
    timeout: Option<Duration>,
    events: Option<Arc<EventBus>>,
    outstanding: Registry,
    state: Mutex<FactoryState>,
}

impl TaskFactory {
    /// Create a factory scheduling onto `handle`
    pub fn new(handle: Handle, timeout: Option<Duration>) -> Self {
        Self {
            handle,
            timeout,
            events: None,
            outstanding: Arc::new(Mutex::new(HashMap::new())),
            state: Mutex::new(FactoryState {
                running: false,
                token: CancellationToken::new(),
            }),
        }
    }

    /// Report task progress on `events`
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Reset bookkeeping for a new build. The returned scope stops the
    /// factory when dropped, on success and failure paths alike.
    pub fn start(&self) -> TaskScope<'_> {
        let mut state = self.state.lock();
        let stale = self.outstanding.lock().drain().count();
        if stale > 0 {
            warn!("Discarding {} stale tasks from a previous build", stale);
        }
        state.running = true;
        state.token = CancellationToken::new();
        debug!("Task factory started");
        TaskScope { factory: self }
    }

    /// Release the current build: pending waits are woken up as cancelled
    /// and the registry is cleared.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if !state.running {
            return;
        }
        state.running = false;
        state.token.cancel();
        let abandoned = self.outstanding.lock().drain().count();
        if abandoned > 0 {
            debug!("Task factory stopped with {} tasks still running", abandoned);
        } else {
            debug!("Task factory stopped");
        }
    }

    /// Deliberately cancel the current build
    pub fn cancel(&self) {
        self.state.lock().token.cancel();
    }

    /// Token cancelled when the current build is cancelled or stopped
    pub fn cancellation_token(&self) -> CancellationToken {
        self.state.lock().token.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Number of tasks scheduled and not yet finished
    pub fn outstanding(&self) -> usize {
        self.outstanding.lock().len()
    }

    /// Schedule `task` on the blocking pool
    pub fn schedule<T: BuildTask>(&self, task: T) -> Result<TaskHandle<T::Output>> {
        let token = {
            let state = self.state.lock();
            if !state.running {
                return Err(BuildError::InvalidState(format!(
                    "task '{}' scheduled while the task factory is stopped",
                    task.name()
                )));
            }
            state.token.child_token()
        };

        let id = Uuid::new_v4();
        let name = task.name().to_string();
        self.outstanding.lock().insert(id, name.clone());
        debug!("Scheduled task {} ({})", name, id);
        if let Some(events) = &self.events {
            events.emit(BuildEvent::TaskScheduled { task: name.clone() });
        }

        let (sender, receiver) = oneshot::channel();
        let registry = Arc::clone(&self.outstanding);
        let events = self.events.clone();
        let task_name = name.clone();
        let context = TaskContext {
            handle: self.handle.clone(),
            token: token.clone(),
        };
        self.handle.spawn_blocking(move || {
            let result = if context.is_cancelled() {
                debug!("Task {} cancelled before it started", task_name);
                Err(BuildError::Cancelled)
            } else {
                let _entered = context.enter();
                task.run()
            };
            registry.lock().remove(&id);
            if let Some(events) = events {
                events.emit(BuildEvent::TaskCompleted {
                    task: task_name,
                    success: result.is_ok(),
                });
            }
            // The waiter may be gone after a cancellation.
            let _ = sender.send(result);
        });

        Ok(TaskHandle {
            name,
            handle: self.handle.clone(),
            timeout: self.timeout,
            token,
            receiver,
        })
    }

    /// Schedule `task` and block until it completes
    pub fn run<T: BuildTask>(&self, task: T) -> Result<T::Output> {
        self.schedule(task)?.wait()
    }

    /// Schedule every task, then wait for all of them. The first failure is
    /// returned once every task has settled.
    pub fn run_all<T: BuildTask>(&self, tasks: Vec<T>) -> Result<Vec<T::Output>> {
        let handles = tasks
            .into_iter()
            .map(|task| self.schedule(task))
            .collect::<Result<Vec<_>>>()?;

        let mut outputs = Vec::with_capacity(handles.len());
        let mut first_error = None;
        for handle in handles {
            match handle.wait() {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(outputs),
        }
    }
}

/// RAII bracket around one build's use of the [`TaskFactory`]
pub struct TaskScope<'a> {
    factory: &'a TaskFactory,
}

impl TaskScope<'_> {
    pub fn factory(&self) -> &TaskFactory {
        self.factory
    }
}

impl Drop for TaskScope<'_> {
    fn drop(&mut self) {
        self.factory.stop();
    }
}

/// Completion handle of a scheduled task
pub struct TaskHandle<T> {
    name: String,
    handle: Handle,
    timeout: Option<Duration>,
    token: CancellationToken,
    receiver: oneshot::Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block the calling thread until the task signals completion.
    ///
    /// A timeout cancels the task's context so the work behind it stops.
    /// Must not be called from inside an async context.
    pub fn wait(self) -> Result<T> {
        let TaskHandle {
            name,
            handle,
            timeout,
            token,
            receiver,
        } = self;

        let result = handle.block_on(async {
            let completion = async {
                let received = match timeout {
                    Some(limit) => tokio::time::timeout(limit, receiver).await.map_err(|_| {
                        BuildError::Timeout(format!(
                            "task '{}' did not finish within {:?}",
                            name, limit
                        ))
                    })?,
                    None => receiver.await,
                };
                received.map_err(|_| {
                    BuildError::Internal(format!("task '{}' ended without a result", name))
                })?
            };

            tokio::select! {
                biased;
                _ = token.cancelled() => Err(BuildError::Cancelled),
                result = completion => result,
            }
        });

        if matches!(result, Err(BuildError::Timeout(_))) {
            warn!("Task {} timed out, cancelling it", name);
            token.cancel();
        }
        result
    }
}
