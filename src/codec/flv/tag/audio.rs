use {crate::codec::flv::error::FlvError, std::convert::TryFrom};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    LinearPcmPlatform,
    Adpcm,
    Mp3,
    LinearPcmLe,
    Nellymoser16kMono,
    Nellymoser8kMono,
    Nellymoser,
    G711ALaw,
    G711MuLaw,
    Aac,
    Speex,
    Mp38k,
    DeviceSpecific,
}

impl TryFrom<u8> for AudioFormat {
    type Error = FlvError;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        Ok(match val {
            0 => Self::LinearPcmPlatform,
            1 => Self::Adpcm,
            2 => Self::Mp3,
            3 => Self::LinearPcmLe,
            4 => Self::Nellymoser16kMono,
            5 => Self::Nellymoser8kMono,
            6 => Self::Nellymoser,
            7 => Self::G711ALaw,
            8 => Self::G711MuLaw,
            10 => Self::Aac,
            11 => Self::Speex,
            14 => Self::Mp38k,
            15 => Self::DeviceSpecific,
            x => return Err(FlvError::UnknownAudioFormat(x)),
        })
    }
}

// Field                | Type
// -------------------- | ---
// Sound Format         | u4
// Sound Rate           | u2
// Sound Size           | u1
// Sound Type           | u1
// AAC Packet Type      | u8 (AAC only)
// Body                 | [u8]
#[derive(Debug, Clone, Copy)]
pub struct AudioData {
    pub format: AudioFormat,
    pub sound_rate: u8,
    pub stereo: bool,
    aac_packet_type: Option<u8>,
}

impl AudioData {
    /// AAC AudioSpecificConfig, the decoder configuration of the stream.
    pub fn is_sequence_header(&self) -> bool {
        self.format == AudioFormat::Aac && self.aac_packet_type == Some(0)
    }
}

impl TryFrom<&[u8]> for AudioData {
    type Error = FlvError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let header = *bytes
            .first()
            .ok_or(FlvError::NotEnoughData("FLV Audio Tag header"))?;
        let format = AudioFormat::try_from(header >> 4)?;
        let aac_packet_type = match format {
            AudioFormat::Aac => Some(
                *bytes
                    .get(1)
                    .ok_or(FlvError::NotEnoughData("AAC packet type"))?,
            ),
            _ => None,
        };

        Ok(Self {
            format,
            sound_rate: (header >> 2) & 0x03,
            stereo: header & 0x01 == 1,
            aac_packet_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aac_sequence_header() {
        let header = AudioData::try_from(&[0xAF, 0x00, 0x12, 0x10][..]).unwrap();
        assert!(header.is_sequence_header());
        assert_eq!(header.sound_rate, 3);
        assert!(header.stereo);

        let frame = AudioData::try_from(&[0xAF, 0x01, 0x21, 0x00][..]).unwrap();
        assert!(!frame.is_sequence_header());
    }

    #[test]
    fn test_mp3_is_never_config() {
        let frame = AudioData::try_from(&[0x2F, 0x00, 0xFF][..]).unwrap();
        assert_eq!(frame.format, AudioFormat::Mp3);
        assert!(!frame.is_sequence_header());
    }

    #[test]
    fn test_truncated_aac() {
        assert_eq!(
            AudioData::try_from(&[0xAF][..]).unwrap_err(),
            FlvError::NotEnoughData("AAC packet type")
        );
        assert_eq!(
            AudioData::try_from(&[0x9F, 0x00][..]).unwrap_err(),
            FlvError::UnknownAudioFormat(9)
        );
    }
}
