//! Queue processor.
//!
//! Decouples message arrival from routing: producers [`enqueue`] into an
//! unbounded FIFO, and a single background worker drains it, handing each
//! message to a [`QueueConsumer`].
//!
//! ```text
//! enqueue() ──► [ FIFO ] ──► worker task ──► QueueConsumer::consume()
//!                  ▲              │
//!                  └── Notify ────┘
//! ```
//!
//! [`enqueue`]: QueueProcessor::enqueue

use crate::core::{Error, Result};
use crate::mcp::message::Message;
use crate::monitoring::logging::{LogEntry, LogLevel, Logger};
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Whatever drains the queue.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Process one dequeued message and return the reply.
    async fn consume(&self, message: Message) -> Message;
}

enum Pop {
    Message(Message),
    Empty,
    Cancelled,
}

#[derive(Default)]
struct QueueState {
    messages: VecDeque<Message>,
    /// Bumped by every stop; a worker only pops while its generation is current
    generation: u64,
}

/// State shared between producers and the worker.
#[derive(Default)]
struct QueueShared {
    state: Mutex<QueueState>,
    notify: Notify,
    processed: AtomicU64,
}

impl QueueShared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, message: Message) {
        self.lock().messages.push_back(message);
        self.notify.notify_one();
    }

    fn generation(&self) -> u64 {
        self.lock().generation
    }

    fn pop(&self, generation: u64) -> Pop {
        let mut state = self.lock();
        if state.generation != generation {
            return Pop::Cancelled;
        }
        match state.messages.pop_front() {
            Some(message) => Pop::Message(message),
            None => Pop::Empty,
        }
    }

    /// Next message for the worker of `generation`, or `None` once cancelled.
    async fn next(&self, generation: u64) -> Option<Message> {
        loop {
            match self.pop(generation) {
                Pop::Message(message) => return Some(message),
                Pop::Empty => self.notify.notified().await,
                Pop::Cancelled => return None,
            }
        }
    }

    fn len(&self) -> usize {
        self.lock().messages.len()
    }

    /// Cancel the current generation and drop undrained messages.
    fn cancel(&self) -> usize {
        let mut state = self.lock();
        state.generation += 1;
        let dropped = state.messages.len();
        state.messages.clear();
        dropped
    }
}

/// Unbounded FIFO with exactly one consumer task.
pub struct QueueProcessor {
    shared: Arc<QueueShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    logger: Arc<Logger>,
}

impl QueueProcessor {
    /// Create a stopped processor.
    pub fn new(logger: Arc<Logger>) -> Self {
        Self {
            shared: Arc::new(QueueShared::default()),
            worker: Mutex::new(None),
            logger,
        }
    }

    /// Add a message to the back of the queue. Never blocks.
    pub fn enqueue(&self, message: Message) {
        self.logger.log(
            LogEntry::new(LogLevel::Trace, "Message enqueued").with_message(&message.message_id),
        );
        self.shared.push(message);
    }

    /// Number of messages waiting.
    pub fn depth(&self) -> usize {
        self.shared.len()
    }

    /// Number of messages the worker has finished.
    pub fn processed_count(&self) -> u64 {
        self.shared.processed.load(Ordering::Relaxed)
    }

    /// Whether a worker is active.
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Spawn the worker on the current tokio runtime.
    ///
    /// Returns `Ok(false)` when a worker is already running. The worker holds
    /// only a weak reference to the consumer and exits once it is dropped.
    pub fn start(&self, consumer: Weak<dyn QueueConsumer>) -> Result<bool> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(false);
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let shared = Arc::clone(&self.shared);
        let logger = Arc::clone(&self.logger);
        let generation = shared.generation();

        *worker = Some(runtime.spawn(async move {
            while let Some(message) = shared.next(generation).await {
                let Some(consumer) = consumer.upgrade() else {
                    break;
                };
                let message_id = message.message_id.clone();

                match AssertUnwindSafe(consumer.consume(message))
                    .catch_unwind()
                    .await
                {
                    Ok(reply) if reply.is_error() => logger.log(
                        LogEntry::new(LogLevel::Warn, "Queued message failed")
                            .with_message(&message_id)
                            .with_field("error", &reply.payload),
                    ),
                    Ok(_) => logger.log(
                        LogEntry::new(LogLevel::Debug, "Queued message processed")
                            .with_message(&message_id),
                    ),
                    Err(_) => logger.log(
                        LogEntry::new(LogLevel::Error, "Consumer panicked on queued message")
                            .with_message(&message_id),
                    ),
                }
                shared.processed.fetch_add(1, Ordering::Relaxed);
            }
        }));

        self.logger.info("Queue processor started");
        Ok(true)
    }

    /// Cancel the worker and abandon undrained messages.
    ///
    /// Returns `false` when already stopped. A delivery already handed to a
    /// component runs to completion, but the cancelled worker never dequeues
    /// again.
    pub fn stop(&self) -> bool {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match handle {
            Some(handle) if !handle.is_finished() => {
                let dropped = self.shared.cancel();
                handle.abort();
                self.logger.log(
                    LogEntry::new(LogLevel::Info, "Queue processor stopped")
                        .with_field("abandoned", dropped),
                );
                true
            }
            _ => false,
        }
    }
}

impl Drop for QueueProcessor {
    fn drop(&mut self) {
        if let Some(handle) = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
