//! # Campaignflow
//!
//! The stage execution engine of a campaign control plane.
//!
//! A campaign is a named graph of stages; an activation is one run of it.
//! The engine moves activations from stage to stage over a message bus:
//!
//! - **Event-driven execution**: `activation`, `trigger`, `job-report` and
//!   `remote-job` handlers on a non-blocking, at-most-once bus
//! - **Correlation protocol**: identity threaded through untyped maps under
//!   reserved `__` keys, decoded into a typed record at each handler
//! - **Pluggable providers**: stage executors built by identifier, plus an
//!   operation dispatch table for jobs delegated by other sites
//! - **Self-driving campaigns**: stage selectors written as `${{ }}`
//!   expressions pick the next stage until one yields nothing
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use campaignflow::prelude::*;
//!
//! let bus = InMemoryBus::new();
//! let campaigns = Arc::new(InMemoryCampaignRepository::new());
//! let activations = Arc::new(InMemoryActivationRepository::new());
//! let factory = Arc::new(ProviderFactory::with_defaults(catalog));
//!
//! let engine = Arc::new(StageEngine::new(
//!     bus.clone(), campaigns, activations, factory, EngineConfig::from_env(),
//! ));
//! engine.register();
//!
//! bus.publish(topics::ACTIVATION, Event::from_body(&ActivationEnvelope::new("act1", "c"))?);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod context;
pub mod core;
pub mod engine;
pub mod errors;
pub mod events;
pub mod expressions;
pub mod model;
pub mod observability;
pub mod providers;
pub mod repository;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::context::{strip_reserved, Correlation};
    pub use crate::core::{
        ActivationEnvelope, Event, InputOutputData, JobEnvelope, StageOutcome, State, ValueMap,
    };
    pub use crate::engine::{StageEngine, StageManager};
    pub use crate::errors::{EngineError, ExpressionError, Result};
    pub use crate::events::{handler_fn, topics, EventHandler, InMemoryBus, MessageBus};
    pub use crate::model::{ActivationState, CampaignSpec, StageSpec};
    pub use crate::providers::{
        InMemoryObjectCatalog, ObjectCatalog, OperationDispatch, ProviderFactory,
        ProviderOutput, StageProvider,
    };
    pub use crate::repository::{
        ActivationRepository, CampaignRepository, InMemoryActivationRepository,
        InMemoryCampaignRepository,
    };
    pub use std::sync::Arc;
}
