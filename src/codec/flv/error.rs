use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FlvError {
    #[error("Not an FLV stream, signature {0:02x?}")]
    InvalidSignature([u8; 3]),

    #[error("Unsupported FLV version {0}")]
    UnsupportedVersion(u8),

    #[error("Not enough data: {0}")]
    NotEnoughData(&'static str),

    #[error("Unknown video frame type {0}")]
    UnknownFrameType(u8),

    #[error("Unknown video packet type {0}")]
    UnknownPackageType(u8),

    #[error("Unknown audio format {0}")]
    UnknownAudioFormat(u8),
}
