use super::TAG_HEADER_SIZE;
use crate::packet::{Packet, Timestamp};
use crate::{put_i24_be, put_i32_be, FLV_HEADER};
use bytes::{BufMut, Bytes, BytesMut};

/// Builds the 11 byte FLV tag header; the stream id is always zero.
pub fn tag_header(type_id: u8, data_len: usize, timestamp: u32) -> [u8; TAG_HEADER_SIZE] {
    let timestamp_base = timestamp & 0xffffff;
    let timestamp_ext = timestamp >> 24 & 0xff;
    let mut h = [0u8; TAG_HEADER_SIZE];

    h[0] = type_id;
    put_i24_be(&mut h[1..4], data_len as i32);
    put_i24_be(&mut h[4..7], timestamp_base as i32);
    h[7] = timestamp_ext as u8;
    h
}

/// Frames cached packets back into FLV tags for one subscriber.
///
/// Media timestamps are rebased on the first media packet written so that
/// playback starts at zero; config packets keep their original timestamp.
#[derive(Debug, Default)]
pub struct TagWriter {
    origin: Option<Timestamp>,
}

impl TagWriter {
    pub fn new() -> Self {
        Self { origin: None }
    }

    /// File header plus the zero previous-tag-size that precedes the first tag.
    pub fn file_header() -> Bytes {
        Bytes::from_static(&FLV_HEADER)
    }

    pub fn origin(&self) -> Option<Timestamp> {
        self.origin
    }

    pub fn timestamp_for(&mut self, packet: &Packet) -> u32 {
        let timestamp = u32::from(packet.timestamp);
        if packet.kind.is_config() {
            return timestamp;
        }
        let origin = *self.origin.get_or_insert(packet.timestamp);
        timestamp.saturating_sub(origin.into())
    }

    /// Tag header, payload and the trailing previous-tag-size field.
    pub fn write(&mut self, packet: &Packet) -> Bytes {
        let data_len = packet.size();
        let timestamp = self.timestamp_for(packet);
        let h = tag_header(packet.kind.tag_type(), data_len, timestamp);

        let mut b = BytesMut::with_capacity(TAG_HEADER_SIZE + data_len + 4);
        b.extend_from_slice(&h);
        b.extend_from_slice(packet.as_ref());

        let mut trailer = [0u8; 4];
        put_i32_be(&mut trailer, (data_len + TAG_HEADER_SIZE) as i32);
        b.put_slice(&trailer);
        b.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::RefBuffer;
    use crate::packet::PacketType;

    fn video(ts: u32) -> Packet {
        Packet::new_video(ts, false, RefBuffer::copy_from_slice(&[0x27, 0x01, 0x00, 0x00, 0x00]))
    }

    fn timestamp_of(tag: &[u8]) -> u32 {
        u32::from_be_bytes([tag[7], tag[4], tag[5], tag[6]])
    }

    #[test]
    fn test_tag_header_layout() {
        let h = tag_header(0x09, 0x12_3456, 0x89AB_CDEF);
        assert_eq!(
            h,
            [0x09, 0x12, 0x34, 0x56, 0xAB, 0xCD, 0xEF, 0x89, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_file_header() {
        assert_eq!(
            TagWriter::file_header().as_ref(),
            &[0x46, 0x4c, 0x56, 0x01, 0x05, 0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_write_frames_tag() {
        let mut writer = TagWriter::new();
        let tag = writer.write(&video(0));
        assert_eq!(tag.len(), 11 + 5 + 4);
        assert_eq!(&tag[..4], &[0x09, 0x00, 0x00, 0x05]);
        assert_eq!(&tag[11..16], &[0x27, 0x01, 0x00, 0x00, 0x00]);
        assert_eq!(&tag[16..], &16u32.to_be_bytes());
    }

    #[test]
    fn test_timestamp_normalization() {
        let mut writer = TagWriter::new();
        let stamps: Vec<u32> = [1000u32, 1033, 1066]
            .iter()
            .map(|&ts| timestamp_of(&writer.write(&video(ts))))
            .collect();
        assert_eq!(stamps, vec![0, 33, 66]);
        assert_eq!(writer.origin(), Some(Timestamp::from(1000)));
    }

    #[test]
    fn test_config_keeps_timestamp_and_origin() {
        let mut writer = TagWriter::new();
        let config = Packet::new(
            PacketType::AudioConfig,
            500u32,
            false,
            RefBuffer::copy_from_slice(&[0xAF, 0x00, 0x12, 0x10]),
        );
        let tag = writer.write(&config);
        assert_eq!(tag[0], 0x08);
        assert_eq!(timestamp_of(&tag), 500);
        assert_eq!(writer.origin(), None);

        assert_eq!(timestamp_of(&writer.write(&video(2000))), 0);
        // older than the origin clamps to zero
        assert_eq!(timestamp_of(&writer.write(&video(1990))), 0);
    }

    #[test]
    fn test_extended_timestamp() {
        let mut writer = TagWriter::new();
        writer.write(&video(10));
        let tag = writer.write(&video(0x0200_000A));
        assert_eq!(tag[7], 0x02);
        assert_eq!(timestamp_of(&tag), 0x0200_0000);
    }
}
