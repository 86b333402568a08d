//! Test fixtures for engine testing.

use std::sync::Arc;
use std::time::Duration;

use super::TopicRecorder;
use crate::config::EngineConfig;
use crate::core::{ActivationEnvelope, Event, DEFAULT_NAMESPACE};
use crate::engine::StageEngine;
use crate::errors::Result;
use crate::events::{topics, InMemoryBus, MessageBus};
use crate::model::{ActivationState, CampaignSpec, StageSpec};
use crate::providers::{InMemoryObjectCatalog, ProviderFactory, MOCK_PROVIDER};
use crate::repository::{
    ActivationRepository, InMemoryActivationRepository, InMemoryCampaignRepository,
};

/// How long [`EngineHarness::settle`] waits for the bus to go idle.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds a campaign whose stages run the mock provider one after another.
///
/// Every stage but the last selects its successor.
#[must_use]
pub fn chain_campaign(name: &str, stages: &[&str], self_driving: bool) -> CampaignSpec {
    let mut campaign = CampaignSpec::new(name).self_driving(self_driving);
    for (i, stage) in stages.iter().enumerate() {
        let mut spec = StageSpec::new(*stage, MOCK_PROVIDER);
        if let Some(next) = stages.get(i + 1) {
            spec = spec.with_selector(*next);
        }
        campaign = campaign.with_stage(spec);
    }
    campaign
}

/// A fully wired engine on an in-memory bus.
pub struct EngineHarness {
    /// The bus.
    pub bus: Arc<InMemoryBus>,
    /// Campaign store.
    pub campaigns: Arc<InMemoryCampaignRepository>,
    /// Activation store.
    pub activations: Arc<InMemoryActivationRepository>,
    /// Catalog behind the wait and materialize providers.
    pub catalog: Arc<InMemoryObjectCatalog>,
    /// Provider factory; register test providers here.
    pub factory: Arc<ProviderFactory>,
    /// The registered engine.
    pub engine: Arc<StageEngine>,
    /// Records `trigger` and `report` traffic.
    pub recorder: Arc<TopicRecorder>,
}

impl std::fmt::Debug for EngineHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHarness")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl EngineHarness {
    /// Creates a harness with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Creates a harness with a custom configuration.
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        let bus = InMemoryBus::new();
        let campaigns = Arc::new(InMemoryCampaignRepository::new());
        let activations = Arc::new(InMemoryActivationRepository::new());
        let catalog = Arc::new(InMemoryObjectCatalog::new());
        let factory = Arc::new(ProviderFactory::with_defaults(catalog.clone()));
        let recorder = TopicRecorder::attach(bus.as_ref(), &[topics::TRIGGER, topics::REPORT]);

        let engine = Arc::new(StageEngine::new(
            bus.clone(),
            campaigns.clone(),
            activations.clone(),
            factory.clone(),
            config,
        ));
        engine.register();

        Self {
            bus,
            campaigns,
            activations,
            catalog,
            factory,
            engine,
            recorder,
        }
    }

    /// Stores a campaign in the default namespace.
    pub fn add_campaign(&self, campaign: CampaignSpec) {
        self.campaigns.upsert(DEFAULT_NAMESPACE, campaign);
    }

    /// Stores an activation.
    pub fn add_activation(&self, activation: ActivationState) {
        self.activations.upsert(activation);
    }

    /// Publishes an `activation` request for a stored activation.
    pub fn activate(&self, activation: &str, campaign: &str) -> Result<()> {
        let request = ActivationEnvelope::new(activation, campaign);
        self.publish(topics::ACTIVATION, Event::from_body(&request)?);
        Ok(())
    }

    /// Publishes a raw event.
    pub fn publish(&self, topic: &str, event: Event) {
        self.bus.publish(topic, event);
    }

    /// Waits for every delivery, cascades included. Returns false on
    /// timeout.
    pub async fn settle(&self) -> bool {
        self.bus.wait_idle_timeout(SETTLE_TIMEOUT).await
    }

    /// Returns an activation from the default namespace.
    pub async fn activation(&self, id: &str) -> Option<ActivationState> {
        self.activations
            .get_activation(id, DEFAULT_NAMESPACE)
            .await
            .ok()
    }
}

impl Default for EngineHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_campaign() {
        let campaign = chain_campaign("c", &["a", "b", "c"], true);
        assert_eq!(campaign.first_stage, "a");
        assert_eq!(campaign.stage("a").unwrap().stage_selector, "b");
        assert_eq!(campaign.stage("b").unwrap().stage_selector, "c");
        assert!(campaign.stage("c").unwrap().stage_selector.is_empty());
        assert!(campaign.self_driving);
    }

    #[tokio::test]
    async fn test_harness_registers_engine() {
        let harness = EngineHarness::new();
        assert_eq!(harness.bus.subscriber_count(topics::ACTIVATION), 1);
        assert_eq!(harness.bus.subscriber_count(topics::TRIGGER), 2);
        assert!(harness.settle().await);
    }
}
