pub mod flv;

pub use flv::error::FlvError;
