//! # vaktpost-engine
//!
//! Control plane of the system: the reconciliation loop that converges the
//! host firewall on the declared policies, standalone policy enforcement,
//! and the verdict service behind the flow stream.
//!
//! ### Key Submodules:
//! - `plan`: policy snapshot to desired rule set, per enforcement mode
//! - `reconciler`: generation-tagged apply and sweep cycles
//! - `enforcer`: immediate single-policy enforcement
//! - `verdict`: flow classification for the transport server
//! - `runtime`: assembly of the above from a loaded configuration

pub mod enforcer;
pub mod error;
pub mod locks;
pub mod mode;
pub mod plan;
pub mod reconciler;
pub mod runtime;
pub mod verdict;

pub use enforcer::{EnforceReport, Enforcer};
pub use error::EngineError;
pub use locks::ChainLocks;
pub use mode::{EnforcementMode, RuleAction};
pub use plan::{plan, DesiredRule, Plan, PlanOptions};
pub use reconciler::{CycleReport, Reconciler, ReconcilerSettings};
pub use verdict::VerdictService;
