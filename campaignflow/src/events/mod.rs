//! Message fabric the engine runs on.
//!
//! The bus is an explicit object owned by whoever composes the process;
//! subscriptions are registered once at startup.

mod bus;
mod handler;
mod metrics;

pub use bus::{InMemoryBus, MessageBus};
pub use handler::{handler_fn, EventHandler, FnHandler};
pub use metrics::BusMetrics;

/// Topic names. These are the wire contract with the engine's collaborators.
pub mod topics {
    /// A new or resumed activation (in).
    pub const ACTIVATION: &str = "activation";
    /// A concrete stage to execute (in + out, self-loop).
    pub const TRIGGER: &str = "trigger";
    /// A stage outcome from an external executor (in).
    pub const JOB_REPORT: &str = "job-report";
    /// A stage delegated by another site (in).
    pub const REMOTE_JOB: &str = "remote-job";
    /// An outcome to forward upstream (out).
    pub const REPORT: &str = "report";
}
