//! # Vaktpost Streaming Transport
//!
//! Bidirectional channel between the capture client and the verdict service.
//! Each side writes newline-delimited JSON: the client sends one
//! [`FlowRecord`](vaktpost_core::events::FlowRecord) per line and the server
//! answers every line with exactly one [`Reply`], in request order, on the
//! same connection.

pub mod client;
pub mod error;
pub mod server;
pub mod wire;

pub use client::{TransportClient, DEFAULT_REPLY_TIMEOUT};
pub use error::TransportError;
pub use server::{Classifier, TransportServer};
pub use wire::{Frame, Reply, DEFAULT_MAX_LINE_BYTES};
