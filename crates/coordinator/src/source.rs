//! Incoming message sources
//!
//! The dispatcher reads from a plain [`Receiver`]. A source is finite when
//! every sender has been dropped; once the dispatcher has consumed what was
//! sent, the stream counts as exhausted and shutdown begins.

use crossbeam::channel::{self, Receiver, Sender};
use pinpool_common::{ClientId, Message, PinpoolError, Result};

/// Replay a fixed list of messages once
pub fn replay<I>(messages: I) -> Receiver<Message>
where
    I: IntoIterator<Item = Message>,
{
    let (tx, rx) = channel::unbounded();
    for message in messages {
        // The receiver is alive in this scope, so the send cannot fail.
        let _ = tx.send(message);
    }
    rx
}

/// Replay one message per client id, tagging each with its position
///
/// The payload is `{"seq": n}` where `n` is the message's index in `client_ids`.
pub fn replay_client_ids(client_ids: &[ClientId]) -> Receiver<Message> {
    replay(
        client_ids
            .iter()
            .enumerate()
            .map(|(seq, &client_id)| Message::new(client_id, serde_json::json!({ "seq": seq }))),
    )
}

/// Producer handle for an open-ended stream
///
/// Clone it to submit from several threads. The stream ends when the last
/// handle is dropped.
#[derive(Debug, Clone)]
pub struct MessageSource {
    tx: Sender<Message>,
}

impl MessageSource {
    /// Unbounded source
    pub fn unbounded() -> (Self, Receiver<Message>) {
        let (tx, rx) = channel::unbounded();
        (Self { tx }, rx)
    }

    /// Source whose `submit` blocks once `capacity` messages are waiting
    pub fn bounded(capacity: usize) -> (Self, Receiver<Message>) {
        let (tx, rx) = channel::bounded(capacity);
        (Self { tx }, rx)
    }

    /// Append a message to the stream
    pub fn submit(&self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| PinpoolError::channel_closed("dispatcher stopped reading"))
    }
}
