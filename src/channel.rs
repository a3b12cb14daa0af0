//! Publisher and relay sessions.
//!
//! A [`Channel`] owns one stream: it feeds its ingest (a local POST body or
//! an upstream response) through the FLV demuxer into a packet cache and
//! answers the pull requests of the subscribers registered with it. Every
//! subscriber walks the cache with its own cursor; the channel never pushes.

use crate::cache::{Lookup, Mode, PacketCache};
use crate::codec::flv::Demuxer;
use crate::config::Settings;
use crate::error::Error;
use crate::metrics;
use crate::packet::{Packet, SequenceId};
use crate::relay::UpstreamResponse;
use crate::transport::{
    Batch, ChannelMessage, Handle, IncomingBroadcast, ManagerHandle, Message, Reply, Responder,
    SessionId, ShutdownReason, Watcher,
};
use crate::StreamPath;
use bytes::Bytes;
use hyper::{Body, Response, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Fed by a local POST.
    Publisher,
    /// Fed by an upstream GET.
    Relay,
}

#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub cache_size: usize,
    pub linger: Duration,
    pub idle: Duration,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for ChannelSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            cache_size: settings.cache.size,
            linger: settings.publisher.linger(),
            idle: settings.relay.idle(),
        }
    }
}

/// Coalesces delayed shutdowns: only the most recently armed one counts.
#[derive(Debug, Default)]
pub struct ShutdownTimer {
    generation: u64,
}

impl ShutdownTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidates every earlier arm and returns the new generation.
    pub fn arm(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

pub enum Ingest {
    Connecting(UpstreamResponse),
    Streaming(Body),
    Closed,
}

enum IngestEvent {
    Connected(Result<Response<Body>, hyper::Error>),
    Data(Bytes),
    Failed(hyper::Error),
    Finished,
}

impl Ingest {
    async fn next(&mut self) -> IngestEvent {
        match self {
            Ingest::Connecting(response) => IngestEvent::Connected(response.await),
            Ingest::Streaming(body) => match body.next().await {
                Some(Ok(data)) => IngestEvent::Data(data),
                Some(Err(e)) => IngestEvent::Failed(e),
                None => IngestEvent::Finished,
            },
            Ingest::Closed => std::future::pending().await,
        }
    }

    fn is_connecting(&self) -> bool {
        matches!(self, Ingest::Connecting(_))
    }
}

pub struct Channel {
    id: SessionId,
    name: StreamPath,
    kind: ChannelKind,
    handle: Handle,
    incoming: IncomingBroadcast,
    manager: ManagerHandle,
    settings: ChannelSettings,
    ingest: Ingest,
    ack: Option<Responder<Result<(), Error>>>,
    demuxer: Demuxer,
    cache: PacketCache,
    subscribers: HashMap<SessionId, Watcher>,
    timer: ShutdownTimer,
    ingest_closed: bool,
    closing: bool,
}

impl Channel {
    pub fn new(
        id: SessionId,
        name: StreamPath,
        kind: ChannelKind,
        ingest: Ingest,
        manager: ManagerHandle,
        settings: ChannelSettings,
    ) -> Self {
        let (handle, incoming) = mpsc::unbounded_channel();
        match kind {
            ChannelKind::Publisher => metrics!(increment_publishers),
            ChannelKind::Relay => metrics!(increment_relays),
        }

        Self {
            id,
            name,
            kind,
            handle,
            incoming,
            manager,
            cache: PacketCache::new(settings.cache_size),
            settings,
            ingest,
            ack: None,
            demuxer: Demuxer::new(),
            subscribers: HashMap::new(),
            timer: ShutdownTimer::new(),
            ingest_closed: false,
            closing: false,
        }
    }

    pub fn publisher(
        id: SessionId,
        name: StreamPath,
        body: Body,
        manager: ManagerHandle,
        settings: ChannelSettings,
    ) -> Self {
        Self::new(
            id,
            name,
            ChannelKind::Publisher,
            Ingest::Streaming(body),
            manager,
            settings,
        )
    }

    pub fn relay(
        id: SessionId,
        name: StreamPath,
        response: UpstreamResponse,
        manager: ManagerHandle,
        settings: ChannelSettings,
    ) -> Self {
        Self::new(
            id,
            name,
            ChannelKind::Relay,
            Ingest::Connecting(response),
            manager,
            settings,
        )
    }

    /// Answered once the ingest body ends or breaks.
    pub fn with_ack(mut self, ack: Responder<Result<(), Error>>) -> Self {
        self.ack = Some(ack);
        self
    }

    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub async fn run(mut self) {
        log::info!("{:?} channel {} started", self.kind, self.name);
        while !self.closing {
            tokio::select! {
                message = self.incoming.recv() => match message {
                    Some(message) => self.handle_message(message),
                    None => self.closing = true,
                },
                event = self.ingest.next() => self.handle_ingest(event),
            }
        }
    }

    fn handle_ingest(&mut self, event: IngestEvent) {
        match event {
            IngestEvent::Connected(Ok(response)) if response.status() == StatusCode::OK => {
                log::info!("upstream of {} connected", self.name);
                self.ingest = Ingest::Streaming(response.into_body());
                self.notify_manager(ChannelMessage::UpstreamReady {
                    path: self.name.clone(),
                    session: self.id,
                });
            }
            IngestEvent::Connected(Ok(response)) => {
                self.upstream_failed(format!("upstream answered {}", response.status()));
            }
            IngestEvent::Connected(Err(e)) => self.upstream_failed(e.to_string()),
            IngestEvent::Data(data) => {
                metrics!(add_bytes_received, data.len() as u64);
                match self.demuxer.parse(&data, &mut self.cache) {
                    Ok(0) => {}
                    Ok(packets) => metrics!(add_packets_demuxed, packets as u64),
                    Err(e) => {
                        log::error!("{} demux failed: {}", self.name, e);
                        metrics!(increment_errors);
                        self.answer_ack(Err(e.into()));
                        self.ingest = Ingest::Closed;
                        self.closing = true;
                    }
                }
            }
            IngestEvent::Failed(e) => {
                log::warn!("ingest of {} broke: {}", self.name, e);
                self.answer_ack(Err(e.into()));
                self.close_ingest();
            }
            IngestEvent::Finished => {
                log::info!("ingest of {} finished", self.name);
                self.answer_ack(Ok(()));
                self.close_ingest();
            }
        }
    }

    fn answer_ack(&mut self, result: Result<(), Error>) {
        if let Some(ack) = self.ack.take() {
            let _ = ack.send(result);
        }
    }

    fn upstream_failed(&mut self, reason: String) {
        log::warn!("upstream of {} failed: {}", self.name, reason);
        metrics!(increment_errors);
        self.notify_manager(ChannelMessage::UpstreamFailed {
            path: self.name.clone(),
            session: self.id,
            reason,
        });
        self.ingest = Ingest::Closed;
        self.closing = true;
    }

    fn close_ingest(&mut self) {
        self.ingest = Ingest::Closed;
        self.ingest_closed = true;
        self.schedule_shutdown(ShutdownReason::IngestClosed, self.settings.linger);
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Register(id, watcher) => {
                log::debug!("subscriber {} joined {}", id, self.name);
                self.subscribers.insert(id, watcher);
            }
            Message::Resync(id) => self.resync(id),
            Message::Continue(batch, id) => {
                let cursor = batch.release();
                self.resume(id, cursor);
            }
            Message::Reclaim(batch) => {
                log::trace!("reclaimed {} packets of {}", batch.len(), self.name);
                batch.release();
            }
            Message::Down(id) => {
                if self.subscribers.remove(&id).is_none() {
                    return;
                }
                log::debug!(
                    "subscriber {} left {}, {} remaining",
                    id,
                    self.name,
                    self.subscribers.len()
                );
                if self.kind == ChannelKind::Relay && self.subscribers.is_empty() {
                    self.schedule_shutdown(ShutdownReason::NoMoreSubscribers, self.settings.idle);
                }
            }
            Message::DelayShut(generation, reason) => {
                if !self.timer.is_current(generation) {
                    log::trace!("stale shutdown {} of {} ignored", generation, self.name);
                    return;
                }
                if self.should_terminate() {
                    log::info!("{} shutting down: {:?}", self.name, reason);
                    self.closing = true;
                }
            }
        }
    }

    /// Config packets plus the whole window, from the oldest packet on.
    fn resync(&mut self, id: SessionId) {
        let watcher = match self.subscribers.get(&id) {
            Some(watcher) => watcher,
            None => {
                log::warn!("resync from unknown subscriber {} of {}", id, self.name);
                return;
            }
        };
        if !self.is_ready() {
            let _ = watcher.send(Reply::NotReady);
            return;
        }

        let mut packets = self.cache.get_dcr();
        let cursor = self.fill(self.cache.bottom() - 1, &mut packets);
        let _ = watcher.send(Reply::Batch(Batch {
            packets,
            cursor,
            fresh: true,
        }));
    }

    fn resume(&mut self, id: SessionId, cursor: SequenceId) {
        let watcher = match self.subscribers.get(&id) {
            Some(watcher) => watcher,
            None => return,
        };

        if let Lookup::Error = self.cache.get_next(cursor, Mode::Normal) {
            log::warn!("subscriber {} of {} fell out of the window", id, self.name);
            let _ = watcher.send(Reply::Exhausted);
            return;
        }

        let mut packets = Vec::new();
        let cursor = self.fill(cursor, &mut packets);
        let _ = watcher.send(Reply::Batch(Batch {
            packets,
            cursor,
            fresh: false,
        }));
    }

    /// Appends every packet after `after` and returns the new cursor.
    fn fill(&self, after: SequenceId, packets: &mut Vec<Packet>) -> SequenceId {
        let mut cursor = after;
        loop {
            match self.cache.get_next(cursor, Mode::Normal) {
                Lookup::Ok(packet) => {
                    cursor = packet.id;
                    packets.push(packet);
                }
                Lookup::Skip(packet) => {
                    log::debug!("{} skipped from {} to {}", self.name, cursor, packet.id);
                    metrics!(increment_skips);
                    cursor = packet.id;
                    packets.push(packet);
                }
                Lookup::Again | Lookup::Error => return cursor,
            }
        }
    }

    fn is_ready(&self) -> bool {
        !self.ingest.is_connecting() && (self.cache.has_config() || !self.cache.is_empty())
    }

    fn should_terminate(&self) -> bool {
        self.ingest_closed || (self.kind == ChannelKind::Relay && self.subscribers.is_empty())
    }

    fn schedule_shutdown(&mut self, reason: ShutdownReason, delay: Duration) {
        let generation = self.timer.arm();
        let handle = self.handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = handle.send(Message::DelayShut(generation, reason));
        });
    }

    fn notify_manager(&self, message: ChannelMessage) {
        if self.manager.send(message).is_err() {
            log::error!("manager gone, {} cannot report", self.name);
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        log::info!("channel {} closed", self.name);
        for (_, watcher) in self.subscribers.drain() {
            let _ = watcher.send(Reply::PublisherDown);
        }
        self.cache.clear();
        self.notify_manager(ChannelMessage::Release {
            path: self.name.clone(),
            session: self.id,
        });
        match self.kind {
            ChannelKind::Publisher => metrics!(decrement_publishers),
            ChannelKind::Relay => metrics!(decrement_relays),
        }
    }
}
