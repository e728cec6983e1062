//! # vaktpost-core
//!
//! Shared domain model for the policy enforcement and flow classification
//! paths.
//!
//! ### Key Submodules:
//! - `policy`: declared access policies and their normalization rules
//! - `events`: flow records and verdicts exchanged between capture and server
//! - `store`: the Policy Store boundary (file, memory and cached readers)
//! - `sink`: the Log Sink boundary (day-partitioned JSON lines, memory)
//! - `time`: wire timestamp formatting and normalization

pub mod error;
pub mod events;
pub mod policy;
pub mod sink;
pub mod store;
pub mod time;

pub mod prelude {
    pub use crate::error::*;
    pub use crate::events::*;
    pub use crate::policy::*;
    pub use crate::sink::*;
    pub use crate::store::*;
    pub use crate::time::*;
}

pub use error::CoreError;
