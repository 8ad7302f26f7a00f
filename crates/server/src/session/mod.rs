//! Shared-PTY session management.
//!
//! One process hosts one [`Session`]: a child command on a PTY whose
//! output is fanned out to every connected client. The first client is
//! the controller; everyone else watches unless shared input is on.

pub mod client;
pub mod multiplexer;
pub mod pty;

pub use client::{Client, ClientId, WireError, WireReceiver, WireSender};
pub use multiplexer::{CloseHook, Session, SessionConfig};
pub use pty::{PtyHandle, SessionError};
