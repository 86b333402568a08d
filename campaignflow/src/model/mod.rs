//! Persisted records the engine reads: campaigns and activations.

mod activation;
mod campaign;

pub use activation::{ActivationSpec, ActivationState};
pub use campaign::{CampaignSpec, StageSpec};
