//! # termshare server
//!
//! Shares one local PTY — a child shell on a master terminal device —
//! with browser clients over WebSocket. One client is the controller
//! and may type; the rest watch, unless shared input is enabled.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     HTTP server                      │
//! │   login / logout · token URLs · rate limiting · /ws  │
//! └───────────────────────────┬──────────────────────────┘
//!                             │ upgraded sockets
//! ┌───────────────────────────▼──────────────────────────┐
//! │                       Session                        │
//! │  PTY reader ─ broadcast ─ client readers ─ teardown  │
//! └───────────────────────────┬──────────────────────────┘
//!                             │
//!                     child shell on a PTY
//! ```
//!
//! The [`session`] module is transport-agnostic: it exchanges
//! [`protocol`] envelopes through a pair of wire traits that the
//! [`http`] module implements on top of axum WebSockets.

pub mod auth;
pub mod http;
pub mod ratelimit;
pub mod session;
pub mod tokens;
