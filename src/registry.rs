//! Stream path registry.
//!
//! Maps a stream path to the session serving it and back. The two maps are
//! always updated together so that a session id appears in `by_session`
//! exactly when its path maps to it in `by_path`.

use crate::channel::ChannelKind;
use crate::error::Error;
use crate::transport::{Handle, SessionId};
use crate::StreamPath;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Route {
    pub session: SessionId,
    pub kind: ChannelKind,
    pub handle: Handle,
}

#[derive(Debug, Default)]
pub struct Registry {
    by_path: HashMap<StreamPath, Route>,
    by_session: HashMap<SessionId, StreamPath>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails if the path is already served.
    pub fn insert(&mut self, path: StreamPath, route: Route) -> Result<(), Error> {
        if self.by_path.contains_key(&path) {
            return Err(Error::AlreadyPublishing(path));
        }
        self.by_session.insert(route.session, path.clone());
        self.by_path.insert(path, route);
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&Route> {
        self.by_path.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.by_path.contains_key(path)
    }

    /// Removes whatever path `session` serves. A session that was never
    /// registered, or already replaced, leaves the registry untouched.
    pub fn remove(&mut self, session: SessionId) -> Option<(StreamPath, Route)> {
        let path = self.by_session.remove(&session)?;
        match self.by_path.remove(&path) {
            Some(route) => Some((path, route)),
            None => {
                log::warn!("registry out of sync for session {}", session);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}
