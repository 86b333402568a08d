//! `campaignflow` binary entrypoint.
//!
//! Wires an engine on an in-memory bus, runs a two-stage demo campaign to
//! completion and prints the final stage outcome.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;

use campaignflow::config::EngineConfig;
use campaignflow::core::{ActivationEnvelope, Event};
use campaignflow::engine::StageEngine;
use campaignflow::events::{topics, InMemoryBus, MessageBus};
use campaignflow::model::{ActivationState, CampaignSpec, StageSpec};
use campaignflow::observability::init_tracing;
use campaignflow::providers::{InMemoryObjectCatalog, ProviderFactory, MOCK_PROVIDER};
use campaignflow::repository::{
    ActivationRepository, InMemoryActivationRepository, InMemoryCampaignRepository,
};

const DEMO_CAMPAIGN: &str = "demo";
const DEMO_ACTIVATION: &str = "demo-1";

fn demo_campaign() -> CampaignSpec {
    CampaignSpec::new(DEMO_CAMPAIGN)
        .self_driving(true)
        .with_stage(
            StageSpec::new("prepare", MOCK_PROVIDER)
                .with_input("foo", json!("${{ $input(start) }}"))
                .with_selector("${{ $if($lt($output(prepare, foo), 10), deploy, '') }}"),
        )
        .with_stage(StageSpec::new("deploy", MOCK_PROVIDER))
}

#[tokio::main]
async fn main() -> Result<()> {
    let json_logs = std::env::var("CAMPAIGNFLOW_LOG_JSON").is_ok_and(|v| v == "1" || v == "true");
    init_tracing(json_logs);

    let config = EngineConfig::from_env();
    let namespace = config.default_namespace.clone();
    tracing::info!(site = %config.site_id, namespace = %namespace, "starting campaignflow");

    let bus = InMemoryBus::new();
    let campaigns = Arc::new(InMemoryCampaignRepository::new());
    let activations = Arc::new(InMemoryActivationRepository::new());
    let catalog = Arc::new(InMemoryObjectCatalog::new());
    let factory = Arc::new(ProviderFactory::with_defaults(catalog));

    let engine = Arc::new(StageEngine::new(
        bus.clone(),
        campaigns.clone(),
        activations.clone(),
        factory,
        config,
    ));
    engine.register();

    campaigns.upsert(&namespace, demo_campaign());
    activations.upsert(
        ActivationState::new(DEMO_ACTIVATION, DEMO_CAMPAIGN)
            .with_namespace(&namespace)
            .with_input("start", json!(1)),
    );

    let request =
        ActivationEnvelope::new(DEMO_ACTIVATION, DEMO_CAMPAIGN).with_namespace(&namespace);
    bus.publish(topics::ACTIVATION, Event::from_body(&request)?);

    if !bus.wait_idle_timeout(Duration::from_secs(30)).await {
        anyhow::bail!("activation {DEMO_ACTIVATION} did not settle within 30s");
    }

    let activation = activations
        .get_activation(DEMO_ACTIVATION, &namespace)
        .await
        .with_context(|| format!("activation {DEMO_ACTIVATION} disappeared"))?;
    let status = activation
        .status
        .context("activation finished without a stage outcome")?;

    tracing::info!(
        stage = %status.stage,
        status = %status.status,
        metrics = %bus.metrics().to_dict(),
        "activation settled"
    );
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
