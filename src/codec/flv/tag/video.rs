use {
    crate::codec::flv::error::FlvError,
    std::{
        convert::TryFrom,
        fmt::{self, Debug},
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum FrameType {
    KeyFrame,
    InterFrame,
    DisposableInterFrame,
    GeneratedKeyframe,
    VideoInfoFrame,
}

impl TryFrom<u8> for FrameType {
    type Error = FlvError;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        Ok(match val {
            1 => Self::KeyFrame,
            2 => Self::InterFrame,
            3 => Self::DisposableInterFrame,
            4 => Self::GeneratedKeyframe,
            5 => Self::VideoInfoFrame,
            x => return Err(FlvError::UnknownFrameType(x)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum Codec {
    H264,
    H265,
    Av1,
    Other(u8),
}

impl From<u8> for Codec {
    fn from(val: u8) -> Self {
        match val {
            7 => Self::H264,
            12 => Self::H265,
            13 => Self::Av1,
            x => Self::Other(x),
        }
    }
}

impl Codec {
    /// Codecs whose tag body carries a packet type and composition time.
    pub fn has_packet_type(self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum AvcPacketType {
    SequenceHeader,
    NalUnit,
    EndOfSequence,
    None,
}

impl TryFrom<u8> for AvcPacketType {
    type Error = FlvError;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        Ok(match val {
            0 => Self::SequenceHeader,
            1 => Self::NalUnit,
            2 => Self::EndOfSequence,
            x => return Err(FlvError::UnknownPackageType(x)),
        })
    }
}

// Field                | Type
// -------------------- | ---
// Frame Type           | u4
// Codec ID             | u4
// AVC Packet Type      | u8
// Composition Time     | i24
// Body                 | [u8]
#[derive(Clone, Copy)]
pub struct VideoData {
    pub frame_type: FrameType,
    pub codec: Codec,
    pub packet_type: AvcPacketType,
    pub composition_time: i32,
}

impl VideoData {
    pub fn is_sequence_header(&self) -> bool {
        self.packet_type == AvcPacketType::SequenceHeader
    }

    pub fn is_keyframe(&self) -> bool {
        self.frame_type == FrameType::KeyFrame
    }
}

impl Debug for VideoData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Video")
            .field("frame_type", &self.frame_type)
            .field("codec", &self.codec)
            .field("packet_type", &self.packet_type)
            .field("composition_time", &self.composition_time)
            .finish()
    }
}

/// Reads the video tag header from the first (up to) five payload bytes.
impl TryFrom<&[u8]> for VideoData {
    type Error = FlvError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let header_a = *bytes
            .first()
            .ok_or(FlvError::NotEnoughData("FLV Video Tag header"))?;
        let frame_type = FrameType::try_from(header_a >> 4)?;
        let codec = Codec::from(header_a & 0x0F);

        if !codec.has_packet_type() {
            return Ok(Self {
                frame_type,
                codec,
                packet_type: AvcPacketType::None,
                composition_time: 0,
            });
        }

        if bytes.len() < 2 {
            return Err(FlvError::NotEnoughData("FLV Video packet type"));
        }
        let packet_type = AvcPacketType::try_from(bytes[1])?;

        let composition_time = if bytes.len() >= 5 {
            let raw = u32::from(bytes[2]) << 16 | u32::from(bytes[3]) << 8 | u32::from(bytes[4]);
            // sign extend the 24 bit field
            ((raw << 8) as i32) >> 8
        } else {
            0
        };

        Ok(Self {
            frame_type,
            codec,
            packet_type,
            composition_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avc_sequence_header() {
        let data = VideoData::try_from(&[0x17, 0x00, 0x00, 0x00, 0x00, 0x01][..]).unwrap();
        assert!(data.is_keyframe());
        assert!(data.is_sequence_header());
        assert_eq!(data.codec, Codec::H264);
    }

    #[test]
    fn test_inter_frame_with_composition_time() {
        let data = VideoData::try_from(&[0x27, 0x01, 0x00, 0x00, 0x50, 0xAA][..]).unwrap();
        assert!(!data.is_keyframe());
        assert!(!data.is_sequence_header());
        assert_eq!(data.packet_type, AvcPacketType::NalUnit);
        assert_eq!(data.composition_time, 0x50);
    }

    #[test]
    fn test_negative_composition_time() {
        let data = VideoData::try_from(&[0x27, 0x01, 0xFF, 0xFF, 0xDF][..]).unwrap();
        assert_eq!(data.composition_time, -33);
    }

    #[test]
    fn test_codec_without_packet_type() {
        // Sorenson H.263 key frame; the second byte is picture data.
        let data = VideoData::try_from(&[0x12, 0x00, 0x84][..]).unwrap();
        assert!(data.is_keyframe());
        assert!(!data.is_sequence_header());
        assert_eq!(data.codec, Codec::Other(2));
    }

    #[test]
    fn test_malformed_headers() {
        assert_eq!(
            VideoData::try_from(&[][..]).unwrap_err(),
            FlvError::NotEnoughData("FLV Video Tag header")
        );
        assert_eq!(
            VideoData::try_from(&[0x07, 0x01][..]).unwrap_err(),
            FlvError::UnknownFrameType(0)
        );
        assert_eq!(
            VideoData::try_from(&[0x17, 0x09][..]).unwrap_err(),
            FlvError::UnknownPackageType(9)
        );
    }
}
