//! Events emitted by the stream reader and the subscriber registry.

use std::sync::{Mutex, PoisonError};

use converge_engine::{Checkpoint, Version};
use tokio::sync::mpsc;

/// One event on the change stream, in feed order.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The worker is up and about to consume the feed.
    Started,
    /// A document changed and has exactly one live leaf.
    Read {
        /// Feed position to resume from after this event.
        checkpoint: Checkpoint,
        version: Version,
    },
    /// A document changed and carries conflicting siblings.
    Conflict {
        /// Feed position to resume from after this event.
        checkpoint: Checkpoint,
        version: Version,
    },
    /// The worker hit an unrecoverable error and is shutting down.
    Error { message: String },
    /// The worker has quiesced. Always the final event of a run.
    Stopped,
}

/// Fan-out registry for stream events.
///
/// Subscribers receive events in registration order. A subscriber whose
/// receiver was dropped is pruned on the next emit.
#[derive(Debug, Default)]
pub(crate) struct Subscribers {
    senders: Mutex<Vec<mpsc::UnboundedSender<StreamEvent>>>,
}

impl Subscribers {
    pub(crate) fn register(&self) -> mpsc::UnboundedReceiver<StreamEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        receiver
    }

    pub(crate) fn emit(&self, event: StreamEvent) {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|sender| sender.send(event.clone()).is_ok());
    }
}
