//! Connection record
//!
//! The in-memory side of one client socket: who is connected, a one-shot
//! history handoff, and the three outbound channels (message / seen / delete)
//! its write pump drains. The room owns the `Connection` and therefore the
//! only senders; dropping it closes the channels and tells the write pump to
//! drain and exit.
//!
//! Every live event carries the room's sequence number so the write pump can
//! merge the three channels back into the order the room accepted them.

use tokio::sync::mpsc::{
    self,
    error::{TryRecvError, TrySendError},
};
use tokio::sync::oneshot;

use crate::error::SendError;
use crate::message::{self, DeleteMessage, Message, SeenMessage};
use crate::types::{ConnectionId, UserId};

/// Position of an event in its room's accepted order
pub type Seq = u64;

/// One frame ready for the socket
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Message(Message),
    Seen(SeenMessage),
    Delete(DeleteMessage),
}

impl Outgoing {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        match self {
            Outgoing::Message(msg) => message::encode(msg),
            Outgoing::Seen(receipt) => message::encode(receipt),
            Outgoing::Delete(notice) => message::encode(notice),
        }
    }
}

/// One outbound channel plus the item already taken off it
#[derive(Debug)]
struct Lane<T> {
    rx: mpsc::Receiver<(Seq, T)>,
    head: Option<(Seq, T)>,
    open: bool,
}

impl<T> Lane<T> {
    fn new(rx: mpsc::Receiver<(Seq, T)>) -> Self {
        Self {
            rx,
            head: None,
            open: true,
        }
    }

    /// Pull the next item into `head` if there is room; true if one arrived
    fn fill(&mut self) -> bool {
        if self.head.is_some() || !self.open {
            return false;
        }
        match self.rx.try_recv() {
            Ok(item) => {
                self.head = Some(item);
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                self.open = false;
                false
            }
        }
    }

    fn accept(&mut self, item: Option<(Seq, T)>) {
        match item {
            Some(item) => self.head = Some(item),
            None => self.open = false,
        }
    }

    fn seq(&self) -> Option<Seq> {
        self.head.as_ref().map(|(seq, _)| *seq)
    }

    fn take(&mut self) -> Option<T> {
        self.head.take().map(|(_, item)| item)
    }
}

/// Receiving ends of a connection's outbound channels
///
/// Owned by the write pump.
#[derive(Debug)]
pub struct Inbox {
    history: Option<oneshot::Receiver<Vec<Message>>>,
    messages: Lane<Message>,
    seen: Lane<SeenMessage>,
    deleted: Lane<DeleteMessage>,
}

impl Inbox {
    /// Messages persisted before the connection joined
    ///
    /// Resolves once the room registers the connection; empty if it never
    /// does or if called again.
    pub async fn history(&mut self) -> Vec<Message> {
        match self.history.take() {
            Some(rx) => rx.await.unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Next live event in room order, or `None` once every channel is
    /// closed and drained
    pub async fn next(&mut self) -> Option<Outgoing> {
        loop {
            // Keep pulling until nothing new shows up: any event older than a
            // head we hold was queued before it and is visible by now
            while self.messages.fill() | self.seen.fill() | self.deleted.fill() {}

            let (m, s, d) = (self.messages.seq(), self.seen.seq(), self.deleted.seq());
            if m.is_some() || s.is_some() || d.is_some() {
                let key = |seq: Option<Seq>| seq.unwrap_or(Seq::MAX);
                return if key(m) <= key(s) && key(m) <= key(d) {
                    self.messages.take().map(Outgoing::Message)
                } else if key(s) <= key(d) {
                    self.seen.take().map(Outgoing::Seen)
                } else {
                    self.deleted.take().map(Outgoing::Delete)
                };
            }

            if !self.messages.open && !self.seen.open && !self.deleted.open {
                return None;
            }

            tokio::select! {
                item = self.messages.rx.recv(), if self.messages.open => self.messages.accept(item),
                item = self.seen.rx.recv(), if self.seen.open => self.seen.accept(item),
                item = self.deleted.rx.recv(), if self.deleted.open => self.deleted.accept(item),
            }
        }
    }
}

/// A live connection as seen by its room
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this socket
    pub id: ConnectionId,
    /// Authenticated user behind the socket
    pub user: UserId,
    history: Option<oneshot::Sender<Vec<Message>>>,
    messages: mpsc::Sender<(Seq, Message)>,
    seen: mpsc::Sender<(Seq, SeenMessage)>,
    deleted: mpsc::Sender<(Seq, DeleteMessage)>,
}

impl Connection {
    /// Create a connection with bounded outbound channels of `capacity` each
    pub fn new(user: UserId, capacity: usize) -> (Self, Inbox) {
        let (history_tx, history_rx) = oneshot::channel();
        let (messages_tx, messages_rx) = mpsc::channel(capacity);
        let (seen_tx, seen_rx) = mpsc::channel(capacity);
        let (deleted_tx, deleted_rx) = mpsc::channel(capacity);

        let connection = Self {
            id: ConnectionId::new(),
            user,
            history: Some(history_tx),
            messages: messages_tx,
            seen: seen_tx,
            deleted: deleted_tx,
        };
        let inbox = Inbox {
            history: Some(history_rx),
            messages: Lane::new(messages_rx),
            seen: Lane::new(seen_rx),
            deleted: Lane::new(deleted_rx),
        };
        (connection, inbox)
    }

    /// Hand over the room's history in one piece; never waits
    ///
    /// Only the first call delivers anything.
    pub fn replay(&mut self, history: Vec<Message>) -> Result<(), SendError> {
        match self.history.take() {
            Some(tx) => tx.send(history).map_err(|_| SendError::ChannelClosed),
            None => Ok(()),
        }
    }

    /// Non-blocking delivery of a text message
    pub fn try_send_message(&self, seq: Seq, msg: Message) -> Result<(), SendError> {
        try_send(&self.messages, (seq, msg))
    }

    /// Non-blocking delivery of a seen receipt
    pub fn try_send_seen(&self, seq: Seq, receipt: SeenMessage) -> Result<(), SendError> {
        try_send(&self.seen, (seq, receipt))
    }

    /// Non-blocking delivery of a deletion notice
    pub fn try_send_delete(&self, seq: Seq, notice: DeleteMessage) -> Result<(), SendError> {
        try_send(&self.deleted, (seq, notice))
    }
}

fn try_send<T>(sender: &mpsc::Sender<T>, value: T) -> Result<(), SendError> {
    sender.try_send(value).map_err(|e| match e {
        TrySendError::Full(_) => SendError::BufferFull,
        TrySendError::Closed(_) => SendError::ChannelClosed,
    })
}
