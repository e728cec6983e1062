//! ## vaktpost-core::events
//! **Flow records and verdicts**
//!
//! Records are produced by the capture side, enriched exactly once by the
//! verdict service and never mutated afterwards.

pub mod flow;

pub use flow::{Direction, FlowRecord, Protocol, Severity, Verdict};
