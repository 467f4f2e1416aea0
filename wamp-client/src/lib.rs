#![deny(missing_docs, clippy::unwrap_used)]
//! A WAMP client peer over WebSocket.
//!
//! This crate implements the client side of the WAMP basic profile: a peer
//! that joins a routed realm over a WebSocket transport and participates as
//! Caller, Callee, Publisher, and Subscriber. The transport is built from
//! first principles on tokio: RFC 6455 framing, the HTTP upgrade handshake
//! and TLS, the session lifecycle (see [`session`]), and a background
//! dispatcher that correlates inbound replies with suspended requesters.
//!
//! Most applications only need the [`Client`] façade:
//!
//! ```no_run
//! use wamp_client::{Client, PeerConfig};
//!
//! # async fn run() -> Result<(), wamp_client::Error> {
//! let client = Client::connect(PeerConfig::new("localhost", 8080, "realm1")).await?;
//! let outcome = client.call("com.example.get_date", vec![], Default::default()).await?;
//! println!("{:?}", outcome.value());
//! client.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! Serialization is JSON only, one message per WebSocket text frame. The
//! router side of the protocol (dealer/broker) is out of scope.

use wamp_types::WampError;

pub mod client;
pub mod config;
mod dispatcher;
mod frame;
pub mod roles;
pub mod session;
mod ws;

pub use client::Client;
pub use config::{ChallengeHandler, PeerConfig};
pub use roles::{CallOutcome, CallResult, EventHandler, InvocationHandler};
pub use session::{Phase, Session};
pub use wamp_types::{Args, Dict, Kwargs, Message, roles::RoleSet, uris};

/// Errors surfaced by the peer.
///
/// An ERROR reply to a CALL is *not* an [`Error`]: it is delivered as a value
/// (see [`CallOutcome::Error`]) so callers can inspect the error URI.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport-level failure: socket, TLS handshake, abrupt close.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),
    /// Malformed frame, unknown message code, wrong schema, unexpected
    /// message in a given state, or timeout awaiting a reply.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The challenge exchange could not be completed, or the router aborted
    /// session establishment.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// The session ended while the operation was still pending.
    #[error("session closed")]
    SessionClosed,
    /// The router answered a non-call request with an ERROR message.
    #[error("router refused the request: {0}")]
    Router(#[from] WampError),
}

impl From<wamp_types::DecodeError> for Error {
    fn from(err: wamp_types::DecodeError) -> Self {
        Error::Protocol(err.to_string())
    }
}
