//! Sliding window of demuxed packets.
//!
//! The cache keeps the last `max_size + 1` media packets of a stream, an index
//! of the keyframes still inside the window, and the most recent video and
//! audio decoder configuration records. Readers address packets by
//! [`SequenceId`] and each one walks the window at its own pace.
//!
//! ```text
//!            bottom                         next_id
//!              v                               v
//!   evicted  | p(b) | p(b+1) | ... | p(n-1) |  (not yet produced)
//!                      ^ key_index entries are ids in [bottom, next_id)
//! ```

use crate::packet::{Packet, PacketType, SequenceId};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Ok,
    /// The requested id was evicted; the reader was moved to the newest keyframe.
    Skip,
    /// Nothing new yet, poll again later.
    Again,
    /// The reader cannot be served any more.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    /// Only hand out keyframes.
    KeyOnly,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Normal
    }
}

/// Result of [`PacketCache::get_next`]. The packet of `Ok`/`Skip` is an
/// acquired copy owned by the caller.
#[derive(Debug)]
pub enum Lookup {
    Ok(Packet),
    Skip(Packet),
    Again,
    Error,
}

impl Lookup {
    pub fn status(&self) -> CacheStatus {
        match self {
            Lookup::Ok(_) => CacheStatus::Ok,
            Lookup::Skip(_) => CacheStatus::Skip,
            Lookup::Again => CacheStatus::Again,
            Lookup::Error => CacheStatus::Error,
        }
    }

    pub fn into_packet(self) -> Option<Packet> {
        match self {
            Lookup::Ok(packet) | Lookup::Skip(packet) => Some(packet),
            Lookup::Again | Lookup::Error => None,
        }
    }
}

pub struct PacketCache {
    window: VecDeque<Packet>,
    key_index: VecDeque<SequenceId>,
    max_size: usize,
    next_id: SequenceId,
    bottom: SequenceId,
    video_config: Option<Packet>,
    audio_config: Option<Packet>,
}

impl PacketCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(max_size + 1),
            key_index: VecDeque::new(),
            max_size,
            next_id: 0,
            bottom: 0,
            video_config: None,
            audio_config: None,
        }
    }

    /// Stores a packet and returns the id it was given.
    ///
    /// Config packets replace the previous record of the same kind and do
    /// not advance the id counter.
    pub fn append(&mut self, mut packet: Packet) -> SequenceId {
        let id = self.next_id;
        packet.id = id;

        let slot = match packet.kind {
            PacketType::VideoConfig => Some(&mut self.video_config),
            PacketType::AudioConfig => Some(&mut self.audio_config),
            PacketType::Video | PacketType::Audio => None,
        };
        if let Some(slot) = slot {
            log::debug!("{:?} replaced, {} bytes", packet.kind, packet.size());
            if let Some(old) = slot.replace(packet) {
                old.release();
            }
            return id;
        }

        let key = packet.is_keyframe();
        self.window.push_back(packet);
        self.next_id += 1;

        if id - self.bottom > self.max_size as SequenceId {
            if let Some(evicted) = self.window.pop_front() {
                evicted.release();
            }
            self.bottom += 1;
            while matches!(self.key_index.front(), Some(&k) if k < self.bottom) {
                self.key_index.pop_front();
            }
        }

        if key {
            self.key_index.push_back(id);
        }
        id
    }

    /// The stored decoder configuration records, video first.
    pub fn get_dcr(&self) -> Vec<Packet> {
        self.video_config
            .iter()
            .chain(self.audio_config.iter())
            .map(Packet::acquire)
            .collect()
    }

    /// Looks up the packet following `after`.
    pub fn get_next(&self, after: SequenceId, mode: Mode) -> Lookup {
        match mode {
            Mode::Normal => {
                let next = after + 1;
                if next >= self.next_id {
                    Lookup::Again
                } else if next < self.bottom {
                    match self.key_index.back() {
                        Some(&key) => Lookup::Skip(self.at(key).acquire()),
                        None => Lookup::Error,
                    }
                } else {
                    Lookup::Ok(self.at(next).acquire())
                }
            }
            Mode::KeyOnly => match self.key_index.iter().find(|&&k| k > after) {
                Some(&key) => Lookup::Ok(self.at(key).acquire()),
                None => Lookup::Again,
            },
        }
    }

    fn at(&self, id: SequenceId) -> &Packet {
        &self.window[(id - self.bottom) as usize]
    }

    pub fn bottom(&self) -> SequenceId {
        self.bottom
    }

    pub fn next_id(&self) -> SequenceId {
        self.next_id
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn has_config(&self) -> bool {
        self.video_config.is_some() || self.audio_config.is_some()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Ids of the keyframes still in the window, oldest first.
    pub fn keyframes(&self) -> impl Iterator<Item = SequenceId> + '_ {
        self.key_index.iter().copied()
    }

    /// Releases every held buffer. Ids keep counting from where they were.
    pub fn clear(&mut self) {
        for packet in self.window.drain(..) {
            packet.release();
        }
        self.key_index.clear();
        self.bottom = self.next_id;
        if let Some(packet) = self.video_config.take() {
            packet.release();
        }
        if let Some(packet) = self.audio_config.take() {
            packet.release();
        }
    }
}

impl crate::codec::flv::PacketSink for PacketCache {
    fn push(&mut self, packet: Packet) {
        self.append(packet);
    }
}
