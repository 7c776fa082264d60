//! Event System
//!
//! Build progress is published on an [`EventBus`]; observers such as the
//! command line subscribe and receive every event emitted after that point.

use parking_lot::RwLock;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::trace;

/// Events emitted while a project is being built
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    /// A project build started
    BuildStarted { project: String },
    /// A stage started executing
    StageStarted { project: String, stage: String },
    /// A stage executed successfully
    StageCompleted { project: String, stage: String },
    /// A stage failed or aborted the chain
    StageFailed { project: String, stage: String, reason: String },
    /// A stage executed but its commit failed
    CommitFailed { project: String, stage: String, error: String },
    /// A background task was scheduled
    TaskScheduled { task: String },
    /// A background task finished
    TaskCompleted { task: String, success: bool },
    /// A problem to surface to the user
    Problem { project: String, message: String },
    /// A project build finished
    BuildFinished { project: String, success: bool },
}

/// Subscriber handle for receiving events
#[derive(Clone)]
pub struct EventSubscription {
    receiver: Receiver<BuildEvent>,
}

impl EventSubscription {
    /// Receive the next event (blocking)
    pub fn recv(&self) -> Result<BuildEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv(&self) -> Result<BuildEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Drain every event received so far
    pub fn drain(&self) -> Vec<BuildEvent> {
        self.receiver.try_iter().collect()
    }
}

/// Fan-out of build events to every live subscriber
pub struct EventBus {
    subscribers: RwLock<Vec<Sender<BuildEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> EventSubscription {
        let (sender, receiver) = unbounded();
        self.subscribers.write().push(sender);
        EventSubscription { receiver }
    }

    /// Send `event` to every subscriber, forgetting the ones that went away.
    /// Returns how many received it.
    pub fn emit(&self, event: BuildEvent) -> usize {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
        trace!(?event, delivered = subscribers.len(), "event");
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
