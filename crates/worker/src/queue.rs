//! Per-worker dedicated queues
//!
//! Each worker owns exactly one unbounded FIFO. The sending half may be cloned
//! (any client pinned to the worker feeds it); the receiving half is owned by
//! the worker alone. Dropping every sender closes the queue, which is how the
//! worker learns that no more work will ever arrive.

use crossbeam::channel::{self, select, Receiver, Sender};
use pinpool_common::{Message, PinpoolError, Result, ShutdownSignal, WorkerIndex, METRICS};

/// Create the dedicated queue for worker `index`
pub fn dedicated_queue(index: WorkerIndex) -> (DedicatedSender, DedicatedReceiver) {
    let (tx, rx) = channel::unbounded();
    let label = index.to_string();
    (
        DedicatedSender {
            index,
            tx,
            label: label.clone(),
        },
        DedicatedReceiver { index, rx, label },
    )
}

/// Producer half of a dedicated queue
#[derive(Debug, Clone)]
pub struct DedicatedSender {
    index: WorkerIndex,
    tx: Sender<Message>,
    label: String,
}

impl DedicatedSender {
    /// Append a message to the tail of the queue
    pub fn push(&self, message: Message) -> Result<()> {
        self.tx.send(message).map_err(|_| {
            PinpoolError::channel_closed(format!("dedicated queue {} has no worker", self.index))
        })?;
        METRICS
            .worker
            .queue_depth
            .with_label_values(&[self.label.as_str()])
            .set(self.tx.len() as i64);
        Ok(())
    }

    pub fn index(&self) -> WorkerIndex {
        self.index
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

/// Outcome of a blocking take from a dedicated queue
#[derive(Debug)]
pub enum Take {
    /// The next message in enqueue order
    Message(Message),

    /// Every sender is gone and the queue is drained
    Closed,

    /// The cancellation signal fired
    Cancelled,
}

/// Consumer half of a dedicated queue
#[derive(Debug)]
pub struct DedicatedReceiver {
    index: WorkerIndex,
    rx: Receiver<Message>,
    label: String,
}

impl DedicatedReceiver {
    /// Block until a message arrives, the queue closes, or `cancel` fires
    ///
    /// Cancellation is checked before anything else, so once it has fired no
    /// further message is handed out even if the queue is non-empty.
    pub fn take(&self, cancel: &ShutdownSignal) -> Take {
        if cancel.is_triggered() {
            return Take::Cancelled;
        }

        let taken = select! {
            recv(self.rx) -> message => match message {
                Ok(message) => Take::Message(message),
                Err(_) => Take::Closed,
            },
            recv(cancel.receiver()) -> _ => Take::Cancelled,
        };

        if matches!(taken, Take::Message(_)) {
            self.record_depth();
        }
        taken
    }

    /// Drop whatever is still queued, returning how many messages were lost
    pub fn discard_remaining(&self) -> usize {
        let discarded = self.rx.try_iter().count();
        self.record_depth();
        discarded
    }

    pub fn index(&self) -> WorkerIndex {
        self.index
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    fn record_depth(&self) {
        METRICS
            .worker
            .queue_depth
            .with_label_values(&[self.label.as_str()])
            .set(self.rx.len() as i64);
    }
}
