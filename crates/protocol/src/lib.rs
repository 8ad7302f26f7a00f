//! Wire protocol for termshare.
//!
//! Every frame exchanged with a browser client is a JSON envelope of the
//! form `{"type": ..., "data": ...}`. This crate defines the envelope
//! types and the encode/decode helpers; it performs no I/O.

pub mod error;
pub mod messages;

pub use error::ProtocolError;
pub use messages::{
    decode_client, encode_server, ClientCount, ClientMessage, Role, RoleAssignment,
    ServerMessage, WindowSize,
};
