//! SSDP message model and wire codec shared by the daemon and its tests.

pub mod codec;
pub mod protocol;
pub mod types;

pub use codec::{decode, encode};
pub use types::{Message, MessageKind, SubType};
