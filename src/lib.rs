pub mod metrics;

pub mod buffer;
pub mod cache;
pub mod channel;
pub mod codec;
pub mod config;
mod error;
pub mod http_flv;
mod manager;
pub mod packet;
pub mod registry;
pub mod relay;
pub mod subscriber;
pub mod transport;

type StreamPath = String;

pub use self::{
    error::Error,
    manager::Manager,
    transport::{ChannelMessage, Handle, ManagerHandle, Message, Reply, SessionId, Watcher},
};

pub const FLV_HEADER: [u8; 13] = [
    0x46, 0x4c, 0x56, 0x01, 0x05, 0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00, 0x00,
];

fn put_i24_be(b: &mut [u8], v: i32) {
    b[0] = (v >> 16) as u8;
    b[1] = (v >> 8) as u8;
    b[2] = v as u8;
}

fn put_i32_be(b: &mut [u8], v: i32) {
    b[0] = (v >> 24) as u8;
    b[1] = (v >> 16) as u8;
    b[2] = (v >> 8) as u8;
    b[3] = v as u8;
}
