//! Campaign and activation persistence contract.
//!
//! The engine only reads campaigns and activations, and writes stage
//! outcomes. Storage layout is up to the implementation; an in-memory one
//! is provided.

mod memory;

pub use memory::{InMemoryActivationRepository, InMemoryCampaignRepository};

use crate::core::StageOutcome;
use crate::errors::Result;
use crate::model::{ActivationState, CampaignSpec};
use async_trait::async_trait;

/// Read access to campaign definitions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    /// Looks up a campaign by `name` or `name:version`.
    async fn get_campaign(&self, name: &str, namespace: &str) -> Result<CampaignSpec>;
}

/// Activation lookup plus the outcome write path.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActivationRepository: Send + Sync {
    /// Looks up an activation by id.
    async fn get_activation(&self, id: &str, namespace: &str) -> Result<ActivationState>;

    /// Merges a stage outcome into the activation's status. Other fields of
    /// the record are left as they are.
    async fn report_stage_outcome(
        &self,
        id: &str,
        namespace: &str,
        outcome: StageOutcome,
    ) -> Result<()>;
}
