//! JSON-RPC 2.0 transport to the client
//!
//! This module handles:
//! - Frame classification and encoding
//! - The outbound writer, notifications and server-initiated requests
//! - Method dispatch and forwarding

pub mod message;
mod outbound;
mod router;

pub use message::{Incoming, RpcError};
pub use outbound::{Outbound, write_frames};
pub use router::{FORWARDED_METHODS, Handler, HandlerFuture, ProtocolRouter, RouterBuilder};
