#![deny(missing_docs)]
//! Message types for the WAMP peer library.
//!
//! This crate groups together the wire-level values exchanged between a WAMP
//! client and a router. It provides:
//!
//! * The [`Message`] enum covering every message a client peer sends or
//!   receives, together with the JSON list codec (see [`message`] module).
//! * Well-known WAMP URIs for close reasons, error reasons, and the
//!   `wamp.registration.*` meta API (see [`uris`] module).
//! * The [`roles::RoleSet`] advertised during session establishment.
//!
//! The canonical on-wire form of a message is a JSON array
//! `[code, ...fields]` carried in a single WebSocket text frame.

pub mod message;
pub mod roles;
pub mod uris;

pub use message::{Args, DecodeError, Dict, Kwargs, Message, WampError, codes};
