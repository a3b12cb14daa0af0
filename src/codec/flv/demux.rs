//! Resumable FLV demuxer.
//!
//! The byte stream is consumed in chunks of any size. Fixed size fields
//! (file header, previous tag size, tag header) are collected in a small
//! scratch buffer until complete; tag bodies are copied straight into the
//! payload buffer allocated when the tag header was read.
//!
//! ```text
//! HEADER(9) -> PREV_TAG_SIZE(4) -> TAG_HEADER(11) -> TAG_DATA(size)
//!                    ^                                    |
//!                    +------------------------------------+
//! ```

use super::{
    AudioData, FlvError, VideoData, FLV_HEADER_SIZE, PREV_TAG_SIZE, TAG_AUDIO, TAG_HEADER_SIZE,
    TAG_VIDEO,
};
use crate::buffer::{PendingBuffer, RefBuffer};
use crate::packet::{Packet, PacketType};
use std::convert::TryFrom;

/// Receives the packets classified by the [`Demuxer`].
pub trait PacketSink {
    fn push(&mut self, packet: Packet);
}

impl PacketSink for Vec<Packet> {
    fn push(&mut self, packet: Packet) {
        Vec::push(self, packet)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Header,
    PrevTagSize,
    TagHeader,
    TagData,
}

struct PendingTag {
    tag_type: u8,
    timestamp: u32,
    payload: PendingBuffer,
}

pub struct Demuxer {
    state: State,
    remain: Vec<u8>,
    tag: Option<PendingTag>,
    packets: u64,
}

impl Default for Demuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Demuxer {
    pub fn new() -> Self {
        Self {
            state: State::Header,
            remain: Vec::with_capacity(TAG_HEADER_SIZE),
            tag: None,
            packets: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Total packets handed to a sink so far.
    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Feeds the next chunk of the stream. Returns the number of packets
    /// pushed to `sink` while consuming it.
    pub fn parse<S>(&mut self, mut data: &[u8], sink: &mut S) -> Result<usize, FlvError>
    where
        S: PacketSink + ?Sized,
    {
        let before = self.packets;
        while !data.is_empty() {
            match self.state {
                State::Header => {
                    if !self.take_field(&mut data, FLV_HEADER_SIZE) {
                        break;
                    }
                    self.read_header()?;
                    self.state = State::PrevTagSize;
                }
                State::PrevTagSize => {
                    if !self.take_field(&mut data, PREV_TAG_SIZE) {
                        break;
                    }
                    self.remain.clear();
                    self.state = State::TagHeader;
                }
                State::TagHeader => {
                    if !self.take_field(&mut data, TAG_HEADER_SIZE) {
                        break;
                    }
                    self.begin_tag();
                    if self.tag_complete() {
                        self.finish_tag(sink);
                    }
                }
                State::TagData => {
                    if let Some(tag) = self.tag.as_mut() {
                        let n = tag.payload.fill(data);
                        data = &data[n..];
                    }
                    if self.tag_complete() {
                        self.finish_tag(sink);
                    }
                }
            }
        }
        Ok((self.packets - before) as usize)
    }

    /// Appends bytes of the current fixed size field, returns true once it is complete.
    fn take_field(&mut self, data: &mut &[u8], size: usize) -> bool {
        let more = size - self.remain.len();
        let n = more.min(data.len());
        self.remain.extend_from_slice(&data[..n]);
        *data = &data[n..];
        self.remain.len() == size
    }

    fn read_header(&mut self) -> Result<(), FlvError> {
        let h = &self.remain;
        if &h[0..3] != b"FLV" {
            return Err(FlvError::InvalidSignature([h[0], h[1], h[2]]));
        }
        if h[3] != 1 {
            return Err(FlvError::UnsupportedVersion(h[3]));
        }
        let offset = u32::from_be_bytes([h[5], h[6], h[7], h[8]]);
        log::debug!(
            "flv header audio={} video={} offset={}",
            h[4] & 0x04 != 0,
            h[4] & 0x01 != 0,
            offset
        );
        self.remain.clear();
        Ok(())
    }

    fn begin_tag(&mut self) {
        let h = &self.remain;
        let tag_type = h[0] & 0x1F;
        let size = u32::from_be_bytes([0, h[1], h[2], h[3]]);
        let timestamp = u32::from_be_bytes([h[7], h[4], h[5], h[6]]);
        self.remain.clear();

        self.tag = Some(PendingTag {
            tag_type,
            timestamp,
            payload: RefBuffer::allocate(size as usize),
        });
        self.state = State::TagData;
    }

    fn tag_complete(&self) -> bool {
        self.tag
            .as_ref()
            .map(|tag| tag.payload.is_full())
            .unwrap_or(true)
    }

    fn finish_tag<S>(&mut self, sink: &mut S)
    where
        S: PacketSink + ?Sized,
    {
        self.state = State::PrevTagSize;
        let tag = match self.tag.take() {
            Some(tag) => tag,
            None => return,
        };

        let payload = tag.payload.seal();
        let packet = match tag.tag_type {
            TAG_AUDIO => {
                let kind = match AudioData::try_from(payload.as_ref()) {
                    Ok(audio) if audio.is_sequence_header() => PacketType::AudioConfig,
                    Ok(_) => PacketType::Audio,
                    Err(e) => {
                        log::debug!("unclassified audio tag: {}", e);
                        PacketType::Audio
                    }
                };
                Packet::new(kind, tag.timestamp, false, payload)
            }
            TAG_VIDEO => match VideoData::try_from(payload.as_ref()) {
                Ok(video) => {
                    let kind = if video.is_sequence_header() {
                        PacketType::VideoConfig
                    } else {
                        PacketType::Video
                    };
                    Packet::new(kind, tag.timestamp, video.is_keyframe(), payload)
                }
                Err(e) => {
                    log::debug!("unclassified video tag: {}", e);
                    Packet::new_video(tag.timestamp, false, payload)
                }
            },
            other => {
                log::trace!("dropping tag type {:#04x}, {} bytes", other, payload.len());
                payload.release();
                return;
            }
        };

        self.packets += 1;
        sink.push(packet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Lookup, Mode, PacketCache};
    use crate::codec::flv::TAG_SCRIPT;
    use crate::FLV_HEADER;

    fn tag(tag_type: u8, timestamp: u32, body: &[u8]) -> Vec<u8> {
        let size = body.len() as u32;
        let mut out = vec![
            tag_type,
            (size >> 16) as u8,
            (size >> 8) as u8,
            size as u8,
            (timestamp >> 16) as u8,
            (timestamp >> 8) as u8,
            timestamp as u8,
            (timestamp >> 24) as u8,
            0,
            0,
            0,
        ];
        out.extend_from_slice(body);
        out.extend_from_slice(&(size + 11).to_be_bytes());
        out
    }

    fn sample_stream() -> Vec<u8> {
        let mut stream = FLV_HEADER.to_vec();
        stream.extend(tag(TAG_SCRIPT, 0, b"\x02\x00\x0aonMetaData"));
        stream.extend(tag(TAG_VIDEO, 0, &[0x17, 0x00, 0x00, 0x00, 0x00, 0x01, 0x64]));
        stream.extend(tag(TAG_AUDIO, 0, &[0xAF, 0x00, 0x12, 0x10]));
        stream.extend(tag(TAG_VIDEO, 0, &[0x17, 0x01, 0x00, 0x00, 0x00, 0x65, 0x88]));
        stream.extend(tag(TAG_AUDIO, 21, &[0xAF, 0x01, 0x21, 0x10, 0x04]));
        stream.extend(tag(TAG_VIDEO, 33, &[0x27, 0x01, 0x00, 0x00, 0x21, 0x41]));
        stream.extend(tag(TAG_VIDEO, 0x0100_0042, &[0x27, 0x01, 0x00, 0x00, 0x00]));
        stream.extend(tag(TAG_VIDEO, 0x0100_0043, &[]));
        stream
    }

    type Summary = (PacketType, u32, bool, Vec<u8>);

    fn summarize(packets: &[Packet]) -> Vec<Summary> {
        packets
            .iter()
            .map(|p| (p.kind, u32::from(p.timestamp), p.key, p.as_ref().to_vec()))
            .collect()
    }

    fn parse_in_chunks(stream: &[u8], sizes: &[usize]) -> Vec<Packet> {
        let mut demuxer = Demuxer::new();
        let mut packets = Vec::new();
        let mut rest = stream;
        let mut i = 0;
        while !rest.is_empty() {
            let n = sizes[i % sizes.len()].min(rest.len());
            demuxer.parse(&rest[..n], &mut packets).unwrap();
            rest = &rest[n..];
            i += 1;
        }
        packets
    }

    #[test]
    fn test_classifies_packets() {
        let mut demuxer = Demuxer::new();
        let mut packets = Vec::new();
        let n = demuxer.parse(&sample_stream(), &mut packets).unwrap();
        assert_eq!(n, 7);
        assert_eq!(demuxer.packets(), 7);
        // the last trailer has been consumed, the next tag header is due
        assert_eq!(demuxer.state(), State::TagHeader);

        let kinds: Vec<PacketType> = packets.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![
                PacketType::VideoConfig,
                PacketType::AudioConfig,
                PacketType::Video,
                PacketType::Audio,
                PacketType::Video,
                PacketType::Video,
                PacketType::Video,
            ]
        );
        assert!(packets[2].key);
        assert!(!packets[4].key);
        assert_eq!(u32::from(packets[5].timestamp), 0x0100_0042);
        assert!(packets[6].payload.is_empty());
    }

    #[test]
    fn test_chunk_boundary_independence() {
        let stream = sample_stream();
        let whole = summarize(&parse_in_chunks(&stream, &[stream.len()]));
        assert_eq!(summarize(&parse_in_chunks(&stream, &[1])), whole);
        assert_eq!(summarize(&parse_in_chunks(&stream, &[2, 3, 5, 7, 11, 13])), whole);
        assert_eq!(summarize(&parse_in_chunks(&stream, &[9, 4, 11])), whole);
    }

    #[test]
    fn test_tag_header_fields() {
        let mut demuxer = Demuxer::new();
        let mut packets = Vec::new();
        demuxer.parse(&FLV_HEADER, &mut packets).unwrap();
        demuxer
            .parse(&[0x09, 0x00, 0x00, 0x02, 0xAB, 0xCD, 0xEF, 0x89, 0x00, 0x00, 0x00], &mut packets)
            .unwrap();
        assert_eq!(demuxer.state(), State::TagData);
        demuxer.parse(&[0x27, 0x01], &mut packets).unwrap();
        assert_eq!(demuxer.state(), State::PrevTagSize);
        assert_eq!(packets.len(), 1);
        assert_eq!(u32::from(packets[0].timestamp), 0x89AB_CDEF);
        assert_eq!(packets[0].size(), 2);
    }

    #[test]
    fn test_script_tags_are_released() {
        let mut stream = FLV_HEADER.to_vec();
        stream.extend(tag(TAG_SCRIPT, 0, b"meta"));
        let mut packets = Vec::new();
        let n = Demuxer::new().parse(&stream, &mut packets).unwrap();
        assert_eq!(n, 0);
        assert!(packets.is_empty());
    }

    #[test]
    fn test_rejects_bad_signature() {
        let mut packets = Vec::new();
        let err = Demuxer::new()
            .parse(b"GET / HTTP/1.1\r\n", &mut packets)
            .unwrap_err();
        assert_eq!(err, FlvError::InvalidSignature(*b"GET"));

        let err = Demuxer::new()
            .parse(&[0x46, 0x4c, 0x56, 0x02, 0x05, 0, 0, 0, 9], &mut packets)
            .unwrap_err();
        assert_eq!(err, FlvError::UnsupportedVersion(2));
    }

    #[test]
    fn test_round_trip_into_small_cache() {
        let mut stream = FLV_HEADER.to_vec();
        for i in 0..5u32 {
            let frame = if i % 2 == 0 { 0x17 } else { 0x27 };
            stream.extend(tag(TAG_VIDEO, i * 33, &[frame, 0x01, 0x00, 0x00, 0x00, i as u8]));
        }

        let mut cache = PacketCache::new(2);
        let mut demuxer = Demuxer::new();
        for byte in stream.chunks(3) {
            demuxer.parse(byte, &mut cache).unwrap();
        }
        assert_eq!(cache.next_id(), 5);
        assert_eq!(cache.bottom(), 2);

        // the start of the stream is gone, the reader jumps to the newest keyframe
        let first = match cache.get_next(-1, Mode::Normal) {
            Lookup::Skip(packet) => packet,
            other => panic!("expected skip, got {:?}", other.status()),
        };
        assert_eq!(first.id, 4);
        assert_eq!(u32::from(first.timestamp), 132);
        assert!(matches!(cache.get_next(first.id, Mode::Normal), Lookup::Again));

        // a reader still inside the window walks it in order
        let mut ids = Vec::new();
        let mut after = 1;
        while let Some(packet) = cache.get_next(after, Mode::Normal).into_packet() {
            after = packet.id;
            ids.push(packet.id);
        }
        assert_eq!(ids, vec![2, 3, 4]);
    }
}
