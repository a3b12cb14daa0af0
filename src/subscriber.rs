//! Subscriber sessions.
//!
//! A subscriber pulls batches from its publisher, frames them as FLV tags
//! into the HTTP response body and then waits one poll interval before it
//! asks for more. It holds on to the last batch until the next pull so the
//! publisher learns the resume point from the batch itself.

use crate::codec::flv::TagWriter;
use crate::metrics;
use crate::transport::{Batch, Handle, Message, Reply, ReplyReceiver, SessionId, Watcher};
use crate::StreamPath;
use futures::future::{poll_fn, FutureExt};
use hyper::body::Sender;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

enum Pending {
    Resync,
    Continue(Batch),
}

pub struct Subscriber {
    id: SessionId,
    name: StreamPath,
    publisher: Handle,
    watcher: Option<Watcher>,
    replies: ReplyReceiver,
    sender: Sender,
    writer: TagWriter,
    interval: Duration,
    pending: Option<(Instant, Pending)>,
    closing: bool,
}

impl Subscriber {
    pub fn new(
        id: SessionId,
        name: StreamPath,
        publisher: Handle,
        sender: Sender,
        interval: Duration,
    ) -> Self {
        let (watcher, replies) = mpsc::unbounded_channel();
        metrics!(increment_subscribers);

        Self {
            id,
            name,
            publisher,
            watcher: Some(watcher),
            replies,
            sender,
            writer: TagWriter::new(),
            interval,
            pending: None,
            closing: false,
        }
    }

    pub async fn run(mut self) {
        log::info!("subscriber {} joined {}", self.id, self.name);
        if let Some(watcher) = self.watcher.take() {
            self.send(Message::Register(self.id, watcher));
        }
        self.send(Message::Resync(self.id));

        while !self.closing {
            let deadline = self.pending.as_ref().map(|(at, _)| *at);
            tokio::select! {
                reply = self.replies.recv() => match reply {
                    Some(reply) => self.handle_reply(reply).await,
                    None => self.closing = true,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.fire_pending();
                }
            }
        }
    }

    async fn handle_reply(&mut self, reply: Reply) {
        match reply {
            Reply::Batch(batch) => {
                let written = self.write_batch(&batch).await;
                self.schedule(Pending::Continue(batch));
                if !written {
                    self.closing = true;
                }
            }
            Reply::NotReady => {
                log::trace!("{} not ready for subscriber {}", self.name, self.id);
                self.schedule(Pending::Resync);
            }
            Reply::Exhausted => {
                log::warn!("subscriber {} of {} cannot catch up", self.id, self.name);
                metrics!(increment_exhausted);
                self.closing = true;
            }
            Reply::PublisherDown => {
                log::info!("publisher of {} went away", self.name);
                self.closing = true;
            }
        }
    }

    /// Writes every packet of the batch, one tag per chunk.
    async fn write_batch(&mut self, batch: &Batch) -> bool {
        if batch.fresh {
            self.writer = TagWriter::new();
            if let Err(e) = self.sender.send_data(TagWriter::file_header()).await {
                log::debug!("subscriber {} write failed: {}", self.id, e);
                return false;
            }
        }

        for packet in &batch.packets {
            let tag = self.writer.write(packet);
            let len = tag.len() as u64;
            if let Err(e) = self.sender.send_data(tag).await {
                log::debug!("subscriber {} write failed: {}", self.id, e);
                return false;
            }
            metrics!(add_bytes_sent, len);
        }
        true
    }

    fn schedule(&mut self, pending: Pending) {
        self.pending = Some((Instant::now() + self.interval, pending));
    }

    fn fire_pending(&mut self) {
        if self.client_closed() {
            log::debug!("client of subscriber {} closed", self.id);
            self.closing = true;
            return;
        }
        match self.pending.take() {
            Some((_, Pending::Resync)) => self.send(Message::Resync(self.id)),
            Some((_, Pending::Continue(batch))) => self.send(Message::Continue(batch, self.id)),
            None => {}
        }
    }

    /// A body sender reports an error once its receiving end is dropped.
    fn client_closed(&mut self) -> bool {
        let sender = &mut self.sender;
        matches!(
            poll_fn(|cx| sender.poll_ready(cx)).now_or_never(),
            Some(Err(_))
        )
    }

    fn send(&mut self, message: Message) {
        if self.publisher.send(message).is_err() {
            log::debug!("publisher of {} gone", self.name);
            self.closing = true;
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        if let Some((_, Pending::Continue(batch))) = self.pending.take() {
            let _ = self.publisher.send(Message::Reclaim(batch));
        }
        let _ = self.publisher.send(Message::Down(self.id));
        log::info!("subscriber {} left {}", self.id, self.name);
        metrics!(decrement_subscribers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::RefBuffer;
    use crate::packet::Packet;
    use crate::transport::IncomingBroadcast;
    use crate::FLV_HEADER;
    use hyper::Body;
    use tokio_stream::StreamExt;

    fn packet(id: i64, timestamp: u32, key: bool) -> Packet {
        let mut packet = Packet::new_video(
            timestamp,
            key,
            RefBuffer::copy_from_slice(&[if key { 0x17 } else { 0x27 }, 0x01, 0, 0, 0]),
        );
        packet.id = id;
        packet
    }

    struct Fixture {
        publisher: IncomingBroadcast,
        body: Body,
        task: tokio::task::JoinHandle<()>,
    }

    fn spawn_subscriber() -> Fixture {
        let (handle, publisher) = mpsc::unbounded_channel();
        let (sender, body) = Body::channel();
        let subscriber = Subscriber::new(4, "/live/a".into(), handle, sender, Duration::from_millis(20));
        let task = tokio::spawn(subscriber.run());
        Fixture {
            publisher,
            body,
            task,
        }
    }

    async fn registered(publisher: &mut IncomingBroadcast) -> Watcher {
        let watcher = match publisher.recv().await {
            Some(Message::Register(4, watcher)) => watcher,
            _ => panic!("expected register"),
        };
        assert!(matches!(publisher.recv().await, Some(Message::Resync(4))));
        watcher
    }

    #[tokio::test]
    async fn test_fresh_batch_writes_header_and_tags() {
        let mut fixture = spawn_subscriber();
        let watcher = registered(&mut fixture.publisher).await;

        watcher
            .send(Reply::Batch(Batch {
                packets: vec![packet(0, 1000, true), packet(1, 1040, false)],
                cursor: 1,
                fresh: true,
            }))
            .unwrap();

        let header = fixture.body.next().await.unwrap().unwrap();
        assert_eq!(header.as_ref(), &FLV_HEADER[..]);

        let first = fixture.body.next().await.unwrap().unwrap();
        assert_eq!(first[0], 0x09);
        assert_eq!(&first[4..8], &[0, 0, 0, 0]);
        let second = fixture.body.next().await.unwrap().unwrap();
        assert_eq!(&second[4..8], &[0, 0, 40, 0]);

        // after the poll interval the batch comes back as a continue
        match fixture.publisher.recv().await {
            Some(Message::Continue(batch, 4)) => {
                assert_eq!(batch.cursor, 1);
                assert_eq!(batch.len(), 2);
            }
            _ => panic!("expected continue"),
        }
    }

    #[tokio::test]
    async fn test_not_ready_retries_resync() {
        let mut fixture = spawn_subscriber();
        let watcher = registered(&mut fixture.publisher).await;

        watcher.send(Reply::NotReady).unwrap();
        assert!(matches!(
            fixture.publisher.recv().await,
            Some(Message::Resync(4))
        ));
    }

    #[tokio::test]
    async fn test_publisher_down_ends_session() {
        let mut fixture = spawn_subscriber();
        let watcher = registered(&mut fixture.publisher).await;

        watcher.send(Reply::PublisherDown).unwrap();
        fixture.task.await.unwrap();
        assert!(matches!(fixture.publisher.recv().await, Some(Message::Down(4))));
        assert!(fixture.body.next().await.is_none());
    }

    #[tokio::test]
    async fn test_exhausted_ends_session() {
        let mut fixture = spawn_subscriber();
        let watcher = registered(&mut fixture.publisher).await;

        watcher.send(Reply::Exhausted).unwrap();
        fixture.task.await.unwrap();
        assert!(matches!(fixture.publisher.recv().await, Some(Message::Down(4))));
    }

    #[tokio::test]
    async fn test_closed_client_reclaims_batch() {
        let mut fixture = spawn_subscriber();
        let watcher = registered(&mut fixture.publisher).await;
        drop(fixture.body);

        let payload = packet(0, 0, true);
        let weak = payload.payload.downgrade();
        watcher
            .send(Reply::Batch(Batch {
                packets: vec![payload],
                cursor: 0,
                fresh: true,
            }))
            .unwrap();

        fixture.task.await.unwrap();
        match fixture.publisher.recv().await {
            Some(Message::Reclaim(batch)) => {
                assert_eq!(batch.cursor, 0);
                batch.release();
            }
            _ => panic!("expected reclaim"),
        }
        assert!(matches!(fixture.publisher.recv().await, Some(Message::Down(4))));
        assert!(weak.is_freed());
    }

    #[tokio::test]
    async fn test_idle_client_disconnect_ends_session() {
        let mut fixture = spawn_subscriber();
        let watcher = registered(&mut fixture.publisher).await;
        drop(fixture.body);

        // nothing is ever written, the next poll still notices the close
        watcher.send(Reply::NotReady).unwrap();
        tokio::time::timeout(Duration::from_secs(1), fixture.task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(fixture.publisher.recv().await, Some(Message::Down(4))));
    }

    #[tokio::test]
    async fn test_idle_client_disconnect_reclaims_held_batch() {
        let mut fixture = spawn_subscriber();
        let watcher = registered(&mut fixture.publisher).await;

        watcher
            .send(Reply::Batch(Batch {
                packets: vec![],
                cursor: -1,
                fresh: false,
            }))
            .unwrap();
        drop(fixture.body);

        tokio::time::timeout(Duration::from_secs(1), fixture.task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            fixture.publisher.recv().await,
            Some(Message::Reclaim(_))
        ));
        assert!(matches!(fixture.publisher.recv().await, Some(Message::Down(4))));
    }
}
