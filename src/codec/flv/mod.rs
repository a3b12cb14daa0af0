pub mod demux;
pub mod error;
pub mod tag;
pub mod writer;

pub use {
    demux::{Demuxer, PacketSink},
    error::FlvError,
    tag::audio,
    tag::audio::AudioData,
    tag::video::AvcPacketType,
    tag::video::Codec,
    tag::video::VideoData,
    writer::TagWriter,
};

pub const TAG_AUDIO: u8 = 0x08;
pub const TAG_VIDEO: u8 = 0x09;
pub const TAG_SCRIPT: u8 = 0x12;

pub const FLV_HEADER_SIZE: usize = 9;
pub const PREV_TAG_SIZE: usize = 4;
pub const TAG_HEADER_SIZE: usize = 11;
