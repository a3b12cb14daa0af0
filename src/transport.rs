use crate::error::Error;
use crate::packet::{Packet, SequenceId};
use crate::StreamPath;
use hyper::Body;
use tokio::sync::{mpsc, oneshot};

/// Identifies one session for the lifetime of the process.
pub type SessionId = u64;

pub type Responder<P> = oneshot::Sender<P>;

/// Resolves once the publisher's ingest body has ended, with the reason it
/// was cut short if it did not end cleanly.
pub type Ack = oneshot::Receiver<Result<(), Error>>;

pub enum ChannelMessage {
    Publish {
        path: StreamPath,
        body: Body,
        responder: Responder<Result<Ack, Error>>,
    },
    Play {
        path: StreamPath,
        query: Option<String>,
        responder: Responder<Result<Body, Error>>,
    },
    UpstreamReady {
        path: StreamPath,
        session: SessionId,
    },
    UpstreamFailed {
        path: StreamPath,
        session: SessionId,
        reason: String,
    },
    Release {
        path: StreamPath,
        session: SessionId,
    },
}

pub type ManagerHandle = mpsc::UnboundedSender<ChannelMessage>;
pub(crate) type ChannelReceiver = mpsc::UnboundedReceiver<ChannelMessage>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    IngestClosed,
    NoMoreSubscribers,
}

/// A run of packets handed to one subscriber.
///
/// `cursor` is the id of the last packet the subscriber has been given; the
/// next pull resumes after it even when `packets` is empty.
#[derive(Debug)]
pub struct Batch {
    pub packets: Vec<Packet>,
    pub cursor: SequenceId,
    /// Set on a resync: the subscriber restarts its FLV stream.
    pub fresh: bool,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Drops the batch's references and returns its cursor.
    pub fn release(self) -> SequenceId {
        for packet in self.packets {
            packet.release();
        }
        self.cursor
    }
}

pub enum Message {
    Register(SessionId, Watcher),
    Resync(SessionId),
    Continue(Batch, SessionId),
    Reclaim(Batch),
    Down(SessionId),
    DelayShut(u64, ShutdownReason),
}

pub type Handle = mpsc::UnboundedSender<Message>;
pub(crate) type IncomingBroadcast = mpsc::UnboundedReceiver<Message>;

#[derive(Debug)]
pub enum Reply {
    Batch(Batch),
    NotReady,
    Exhausted,
    PublisherDown,
}

pub type Watcher = mpsc::UnboundedSender<Reply>;
pub(crate) type ReplyReceiver = mpsc::UnboundedReceiver<Reply>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::RefBuffer;

    #[test]
    fn test_batch_release_returns_cursor() {
        let payload = RefBuffer::copy_from_slice(&[0x17, 0x01]);
        let weak = payload.downgrade();
        let mut packet = Packet::new_video(0u32, true, payload);
        packet.id = 7;

        let batch = Batch {
            packets: vec![packet],
            cursor: 7,
            fresh: false,
        };
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.release(), 7);
        assert!(weak.is_freed());
    }

    #[test]
    fn test_empty_batch_keeps_cursor() {
        let batch = Batch {
            packets: vec![],
            cursor: 41,
            fresh: true,
        };
        assert!(batch.is_empty());
        assert_eq!(batch.release(), 41);
    }
}
