use crate::channel::{Channel, ChannelKind, ChannelSettings};
use crate::config::Settings;
use crate::error::Error;
use crate::registry::{Registry, Route};
use crate::relay::{self, UpstreamClient};
use crate::subscriber::Subscriber;
use crate::transport::{
    Ack, ChannelMessage, ChannelReceiver, Handle, ManagerHandle, Responder, SessionId,
};
use crate::StreamPath;
use anyhow::{bail, Result};
use hyper::{Body, Client};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// A relay still waiting for its upstream to answer, and the players
/// queued on it.
struct PendingRelay {
    session: SessionId,
    handle: Handle,
    waiters: Vec<Responder<Result<Body, Error>>>,
}

pub struct Manager {
    handle: ManagerHandle,
    incoming: ChannelReceiver,
    registry: Registry,
    pendings: HashMap<StreamPath, PendingRelay>,
    upstream: Option<String>,
    client: UpstreamClient,
    channel_settings: ChannelSettings,
    interval: Duration,
    next_session: SessionId,
}

impl Manager {
    pub fn new(settings: &Settings) -> Self {
        let (handle, incoming) = mpsc::unbounded_channel();

        Self {
            handle,
            incoming,
            registry: Registry::new(),
            pendings: HashMap::new(),
            upstream: settings.upstream.clone(),
            client: Client::new(),
            channel_settings: ChannelSettings::from(settings),
            interval: settings.subscriber.interval(),
            next_session: 0,
        }
    }

    pub fn handle(&self) -> ManagerHandle {
        self.handle.clone()
    }

    fn next_id(&mut self) -> SessionId {
        self.next_session += 1;
        self.next_session
    }

    fn process_message(&mut self, message: ChannelMessage) -> Result<()> {
        match message {
            ChannelMessage::Publish {
                path,
                body,
                responder,
            } => {
                let response = self.publish(path, body);
                if responder.send(response).is_err() {
                    bail!("Failed to send publish response");
                }
            }
            ChannelMessage::Play {
                path,
                query,
                responder,
            } => self.play(path, query, responder)?,
            ChannelMessage::UpstreamReady { path, session } => {
                let pending = match self.take_pending(&path, session) {
                    Some(pending) => pending,
                    None => {
                        log::warn!("upstream ready for unknown relay {} of {}", session, path);
                        return Ok(());
                    }
                };
                let route = Route {
                    session,
                    kind: ChannelKind::Relay,
                    handle: pending.handle.clone(),
                };
                self.registry.insert(path.clone(), route)?;
                log::info!(
                    "relay {} of {} ready, {} players waiting",
                    session,
                    path,
                    pending.waiters.len()
                );
                for waiter in pending.waiters {
                    let body = self.spawn_subscriber(&path, pending.handle.clone());
                    if waiter.send(Ok(body)).is_err() {
                        log::debug!("player of {} left while waiting", path);
                    }
                }
            }
            ChannelMessage::UpstreamFailed {
                path,
                session,
                reason,
            } => {
                if let Some(pending) = self.take_pending(&path, session) {
                    Self::fail_waiters(&path, pending, reason);
                }
            }
            ChannelMessage::Release { path, session } => {
                if let Some((path, route)) = self.registry.remove(session) {
                    log::info!(
                        "{:?} {} of {} released, {} streams left",
                        route.kind,
                        session,
                        path,
                        self.registry.len()
                    );
                } else if let Some(pending) = self.take_pending(&path, session) {
                    Self::fail_waiters(&path, pending, "relay terminated".into());
                }
            }
        }

        Ok(())
    }

    fn publish(&mut self, path: StreamPath, body: Body) -> Result<Ack, Error> {
        if self.registry.contains(&path) || self.pendings.contains_key(&path) {
            log::warn!("{} is already being served", path);
            return Err(Error::AlreadyPublishing(path));
        }

        let id = self.next_id();
        let (ack, acked) = oneshot::channel();
        let channel = Channel::publisher(
            id,
            path.clone(),
            body,
            self.handle.clone(),
            self.channel_settings.clone(),
        )
        .with_ack(ack);
        let route = Route {
            session: id,
            kind: ChannelKind::Publisher,
            handle: channel.handle(),
        };
        self.registry.insert(path, route)?;
        tokio::spawn(channel.run());
        Ok(acked)
    }

    fn play(
        &mut self,
        path: StreamPath,
        query: Option<String>,
        responder: Responder<Result<Body, Error>>,
    ) -> Result<()> {
        if let Some(route) = self.registry.get(&path) {
            log::debug!("{} served by {:?} {}", path, route.kind, route.session);
            let handle = route.handle.clone();
            let body = self.spawn_subscriber(&path, handle);
            if responder.send(Ok(body)).is_err() {
                bail!("Failed to send play response");
            }
            return Ok(());
        }

        if let Some(pending) = self.pendings.get_mut(&path) {
            log::debug!("{} queued on pending relay {}", path, pending.session);
            pending.waiters.push(responder);
            return Ok(());
        }

        let upstream = self.upstream.clone();
        let response = match upstream.as_deref() {
            Some(upstream) => match self.start_relay(upstream, &path, query.as_deref()) {
                Ok(mut pending) => {
                    pending.waiters.push(responder);
                    self.pendings.insert(path, pending);
                    return Ok(());
                }
                Err(e) => Err(e),
            },
            None => {
                log::warn!("Channel not found: {}", path);
                Err(Error::NoSuchStream(path))
            }
        };
        if responder.send(response).is_err() {
            bail!("Failed to send play response");
        }
        Ok(())
    }

    fn start_relay(
        &mut self,
        upstream: &str,
        path: &str,
        query: Option<&str>,
    ) -> Result<PendingRelay, Error> {
        let uri = relay::upstream_uri(upstream, path, query)?;
        let request = relay::upstream_request(uri.clone())?;
        let id = self.next_id();
        log::info!("relay {} pulls {} from {}", id, path, uri);

        let channel = Channel::relay(
            id,
            path.to_owned(),
            relay::fetch(&self.client, request),
            self.handle.clone(),
            self.channel_settings.clone(),
        );
        let handle = channel.handle();
        tokio::spawn(channel.run());
        Ok(PendingRelay {
            session: id,
            handle,
            waiters: Vec::new(),
        })
    }

    fn take_pending(&mut self, path: &str, session: SessionId) -> Option<PendingRelay> {
        match self.pendings.get(path) {
            Some(pending) if pending.session == session => self.pendings.remove(path),
            _ => None,
        }
    }

    fn fail_waiters(path: &str, pending: PendingRelay, reason: String) {
        log::warn!(
            "relay {} of {} failed: {}, {} players rejected",
            pending.session,
            path,
            reason,
            pending.waiters.len()
        );
        for waiter in pending.waiters {
            let _ = waiter.send(Err(Error::UpstreamFailed(path.to_owned(), reason.clone())));
        }
    }

    fn spawn_subscriber(&mut self, path: &str, publisher: Handle) -> Body {
        let (sender, body) = Body::channel();
        let subscriber = Subscriber::new(
            self.next_id(),
            path.to_owned(),
            publisher,
            sender,
            self.interval,
        );
        tokio::spawn(subscriber.run());
        body
    }

    pub async fn run(mut self) {
        while let Some(message) = self.incoming.recv().await {
            if let Err(err) = self.process_message(message) {
                log::error!("{}", err);
            };
        }
    }
}
