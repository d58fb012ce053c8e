//! The SuperChat wire protocol: framing, primitive encodings, and the
//! full message taxonomy (spec §4.1, §6).

pub mod common;
pub mod frame;
pub mod message;
pub mod primitives;

pub use frame::{Frame, FrameError, FrameResult, PROTOCOL_VERSION};
pub use message::Message;
