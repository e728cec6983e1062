//! vaktpost‑capture
//!
//! Client side of the classification pipeline: live capture through libpcap,
//! flow derivation from raw frames, and a bounded forwarding pool that
//! streams flow records to the verdict service.

pub mod capture;
pub mod error;
pub mod filter;
pub mod forwarder;
pub mod local;
pub mod packet;

pub use capture::{run, CaptureOptions};
pub use error::CaptureError;
pub use filter::CaptureFilter;
pub use forwarder::{Forwarder, ForwarderOptions};
pub use local::LocalAddrs;
pub use packet::{derive_flow, LinkKind};
