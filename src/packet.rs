use crate::buffer::RefBuffer;
use std::fmt;

/// Position of a packet in a publisher's stream. Assigned by the cache,
/// strictly increasing from 0; -1 means "before the first packet".
pub type SequenceId = i64;

pub const BEFORE_FIRST: SequenceId = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp {
    value: u32,
}

impl From<u32> for Timestamp {
    fn from(val: u32) -> Self {
        Self { value: val }
    }
}

impl From<Timestamp> for u32 {
    fn from(val: Timestamp) -> Self {
        val.value
    }
}

impl From<Timestamp> for i64 {
    fn from(val: Timestamp) -> Self {
        val.value.into()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Video,
    Audio,
    VideoConfig,
    AudioConfig,
}

impl PacketType {
    /// Decoder configuration records are kept as singletons, outside the window.
    pub fn is_config(self) -> bool {
        matches!(self, PacketType::VideoConfig | PacketType::AudioConfig)
    }

    /// FLV tag type byte used when the packet is framed again.
    pub fn tag_type(self) -> u8 {
        match self {
            PacketType::Audio | PacketType::AudioConfig => 0x08,
            PacketType::Video | PacketType::VideoConfig => 0x09,
        }
    }
}

#[derive(Debug)]
pub struct Packet {
    pub id: SequenceId,
    pub kind: PacketType,
    pub timestamp: Timestamp,
    pub key: bool,
    pub payload: RefBuffer,
}

impl Packet {
    pub fn new<T>(kind: PacketType, timestamp: T, key: bool, payload: RefBuffer) -> Self
    where
        T: Into<Timestamp>,
    {
        Self {
            id: BEFORE_FIRST,
            kind,
            timestamp: timestamp.into(),
            key,
            payload,
        }
    }

    pub fn new_video<T: Into<Timestamp>>(timestamp: T, key: bool, payload: RefBuffer) -> Self {
        Self::new(PacketType::Video, timestamp, key, payload)
    }

    pub fn new_audio<T: Into<Timestamp>>(timestamp: T, payload: RefBuffer) -> Self {
        Self::new(PacketType::Audio, timestamp, false, payload)
    }

    /// A co-owned copy of this packet; the payload is shared, not copied.
    pub fn acquire(&self) -> Packet {
        Packet {
            id: self.id,
            kind: self.kind,
            timestamp: self.timestamp,
            key: self.key,
            payload: self.payload.acquire(),
        }
    }

    pub fn release(self) {
        self.payload.release()
    }

    pub fn is_keyframe(&self) -> bool {
        self.kind == PacketType::Video && self.key
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        self.payload.as_ref()
    }
}
