//! Continuous change streaming.
//!
//! A [`StreamReader`] drives the store's change feed on a background
//! worker and fans decoded versions out to subscribers. Consumers see
//! each change exactly once, in feed order, tagged with the checkpoint
//! to resume from. Deletions advance the checkpoint without producing
//! an event.

mod events;

pub use events::StreamEvent;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use converge_engine::{ChangeRecord, Checkpoint, TypeRegistry, Version};
use futures::StreamExt;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::store::DocumentStore;
use events::Subscribers;

const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

/// Lifecycle of the worker driving the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Running,
    Stopping,
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPING: u8 = 2;

fn state_from(raw: u8) -> StreamState {
    match raw {
        RUNNING => StreamState::Running,
        STOPPING => StreamState::Stopping,
        _ => StreamState::Idle,
    }
}

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Consumes the change feed on a background task and emits
/// [`StreamEvent`]s to every subscriber.
pub struct StreamReader {
    store: Arc<dyn DocumentStore>,
    registry: Arc<TypeRegistry>,
    heartbeat: Duration,
    subscribers: Arc<Subscribers>,
    state: Arc<AtomicU8>,
    worker: Mutex<Option<Worker>>,
}

impl StreamReader {
    /// Build a reader over `store`, decoding payloads through `registry`.
    ///
    /// The registry is fixed for the reader's lifetime; register every
    /// kind before construction.
    pub fn new(store: Arc<dyn DocumentStore>, registry: TypeRegistry) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            heartbeat: DEFAULT_HEARTBEAT,
            subscribers: Arc::new(Subscribers::default()),
            state: Arc::new(AtomicU8::new(IDLE)),
            worker: Mutex::new(None),
        }
    }

    /// Override the heartbeat interval requested from the store.
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Register a subscriber. Events arrive in feed order, starting
    /// with whatever the worker emits after this call.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StreamEvent> {
        self.subscribers.register()
    }

    pub fn state(&self) -> StreamState {
        state_from(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state() == StreamState::Running
    }

    /// Start the worker from `since`, or from the beginning of the feed.
    ///
    /// A no-op while a worker is already running.
    pub async fn start(&self, since: Option<Checkpoint>) {
        let mut worker = self.worker.lock().await;
        if let Some(active) = worker.as_ref() {
            if !active.handle.is_finished() {
                tracing::debug!("stream reader already running");
                return;
            }
        }

        let task = WorkerTask {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            subscribers: Arc::clone(&self.subscribers),
            state: Arc::clone(&self.state),
            heartbeat: self.heartbeat,
        };
        let (shutdown, shutdown_rx) = watch::channel(false);

        self.state.store(RUNNING, Ordering::SeqCst);
        tracing::info!(since = ?since, "stream reader started");
        let handle = tokio::spawn(task.run(since, shutdown_rx));
        *worker = Some(Worker { shutdown, handle });
    }

    /// Stop the worker and wait for it to quiesce.
    ///
    /// Returns once the final [`StreamEvent::Stopped`] has been emitted;
    /// no events follow. Harmless when nothing is running.
    pub async fn stop(&self) {
        // The lock is held across the join so a concurrent `stop`
        // cannot return while the worker is still draining.
        let mut slot = self.worker.lock().await;
        let Some(worker) = slot.take() else {
            return;
        };

        self.state.store(STOPPING, Ordering::SeqCst);
        let _ = worker.shutdown.send(true);
        let _ = worker.handle.await;
        self.state.store(IDLE, Ordering::SeqCst);
        tracing::info!("stream reader stopped");
    }
}

/// State moved onto the spawned worker.
struct WorkerTask {
    store: Arc<dyn DocumentStore>,
    registry: Arc<TypeRegistry>,
    subscribers: Arc<Subscribers>,
    state: Arc<AtomicU8>,
    heartbeat: Duration,
}

impl WorkerTask {
    async fn run(self, since: Option<Checkpoint>, mut shutdown: watch::Receiver<bool>) {
        self.subscribers.emit(StreamEvent::Started);

        let mut feed = match self.store.changes(since, self.heartbeat).await {
            Ok(feed) => feed,
            Err(error) => {
                tracing::warn!(error = %error, "change feed could not be opened");
                self.subscribers.emit(StreamEvent::Error {
                    message: error.to_string(),
                });
                self.finish();
                return;
            }
        };

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                next = feed.next() => match next {
                    Some(Ok(change)) => {
                        if let Err(error) = self.process(change).await {
                            tracing::warn!(error = %error, "stream reader halted");
                            self.subscribers.emit(StreamEvent::Error {
                                message: error.to_string(),
                            });
                            break;
                        }
                    }
                    Some(Err(error)) => {
                        tracing::warn!(error = %error, "change feed failed");
                        self.subscribers.emit(StreamEvent::Error {
                            message: error.to_string(),
                        });
                        break;
                    }
                    None => break,
                },
            }
        }

        self.finish();
    }

    fn finish(&self) {
        // State flips back before the event goes out, so a subscriber
        // that sees `Stopped` never observes a stale `Running`.
        self.state.store(IDLE, Ordering::SeqCst);
        self.subscribers.emit(StreamEvent::Stopped);
    }

    /// Turn one feed entry into an event, or into nothing: deletions
    /// and documents that vanished before the read advance the
    /// checkpoint silently.
    async fn process(&self, change: ChangeRecord) -> Result<()> {
        if change.deleted {
            return Ok(());
        }

        let Some(fetched) = self.store.get_with_conflicts(&change.id).await? else {
            return Ok(());
        };

        let mut document = fetched.document;
        document.entity = self.registry.decode(&document.kind, &document.entity)?;
        let version = Version::stored(document, fetched.revision);

        let event = if fetched.conflicts.is_empty() {
            StreamEvent::Read {
                checkpoint: change.sequence,
                version,
            }
        } else {
            StreamEvent::Conflict {
                checkpoint: change.sequence,
                version,
            }
        };
        self.subscribers.emit(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use tokio::time::timeout;

    fn reader() -> StreamReader {
        StreamReader::new(Arc::new(MemoryStore::new()), TypeRegistry::new())
            .with_heartbeat(Duration::from_millis(100))
    }

    async fn next_event(receiver: &mut mpsc::UnboundedReceiver<StreamEvent>) -> StreamEvent {
        timeout(Duration::from_secs(2), receiver.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn stop_before_start_is_harmless() {
        let reader = reader();
        reader.stop().await;
        reader.stop().await;
        assert_eq!(reader.state(), StreamState::Idle);
    }

    #[tokio::test]
    async fn second_start_is_a_no_op() {
        let reader = reader();
        let mut events = reader.subscribe();

        reader.start(None).await;
        reader.start(None).await;
        assert!(matches!(next_event(&mut events).await, StreamEvent::Started));
        assert!(reader.is_running());

        reader.stop().await;
        assert!(matches!(next_event(&mut events).await, StreamEvent::Stopped));
        assert_eq!(reader.state(), StreamState::Idle);

        // The redundant start spawned nothing, so no second Started.
        assert!(events.try_recv().is_err());
    }
}
