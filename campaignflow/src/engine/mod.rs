//! The stage execution engine.
//!
//! [`StageEngine`] subscribes to four topics and drives activations through
//! their campaigns:
//! - `activation`: resolve the first stage and publish a `trigger`
//! - `trigger`: run one stage, report it, publish the next `trigger`
//! - `job-report`: record an externally produced outcome and resume
//! - `remote-job`: run one stage for another site and publish a `report`
//!
//! Once an activation can be resolved, failures are written into its stage
//! outcome and the handler returns `Ok`. Errors are only returned when
//! there is no durable record to write them into.

mod locks;
mod manager;


pub use locks::ActivationLocks;
pub use manager::StageManager;

use crate::config::EngineConfig;
use crate::context::{Correlation, KEY_OPERATION, KEY_ORIGIN};
use crate::core::{
    ActivationEnvelope, Event, InputOutputData, JobEnvelope, StageOutcome, StageOutputs, State,
    ORIGIN_METADATA,
};
use crate::errors::{EngineError, Result};
use crate::events::{topics, EventHandler, MessageBus};
use crate::observability::{SpanTimer, StageSpanAttributes};
use crate::providers::{OperationDispatch, ProviderFactory};
use crate::repository::{ActivationRepository, CampaignRepository};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn, Instrument};

/// Topics the engine subscribes to.
pub const SUBSCRIBED_TOPICS: [&str; 4] = [
    topics::ACTIVATION,
    topics::TRIGGER,
    topics::JOB_REPORT,
    topics::REMOTE_JOB,
];

/// The event-driven state machine that advances activations.
pub struct StageEngine {
    bus: Arc<dyn MessageBus>,
    campaigns: Arc<dyn CampaignRepository>,
    activations: Arc<dyn ActivationRepository>,
    manager: StageManager,
    operations: OperationDispatch,
    config: EngineConfig,
    locks: Option<ActivationLocks>,
}

impl std::fmt::Debug for StageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageEngine")
            .field("site_id", &self.config.site_id)
            .field("serialize_activations", &self.locks.is_some())
            .finish_non_exhaustive()
    }
}

/// Bus subscription that forwards to the engine without keeping it alive.
struct EngineHandler(Weak<StageEngine>);

#[async_trait]
impl EventHandler for EngineHandler {
    async fn handle(&self, topic: &str, event: Event) -> Result<()> {
        match self.0.upgrade() {
            Some(engine) => engine.handle_event(topic, event).await,
            None => Ok(()),
        }
    }
}

impl StageEngine {
    /// Creates an engine. Call [`register`](Self::register) to start
    /// receiving events.
    #[must_use]
    pub fn new(
        bus: Arc<dyn MessageBus>,
        campaigns: Arc<dyn CampaignRepository>,
        activations: Arc<dyn ActivationRepository>,
        factory: Arc<ProviderFactory>,
        config: EngineConfig,
    ) -> Self {
        let locks = config.serialize_activations.then(ActivationLocks::new);
        Self {
            bus,
            campaigns,
            activations,
            manager: StageManager::new(factory, config.site_id.clone()),
            operations: OperationDispatch::new(config.properties.clone()),
            config,
            locks,
        }
    }

    /// Subscribes the engine to its topics. Call once.
    pub fn register(self: &Arc<Self>) {
        let handler: Arc<dyn EventHandler> = Arc::new(EngineHandler(Arc::downgrade(self)));
        for topic in SUBSCRIBED_TOPICS {
            self.bus.subscribe(topic, handler.clone());
        }
        info!(site = %self.config.site_id, "stage engine registered");
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the stage manager.
    #[must_use]
    pub fn manager(&self) -> &StageManager {
        &self.manager
    }

    /// Routes an event to the handler for its topic.
    pub async fn handle_event(&self, topic: &str, event: Event) -> Result<()> {
        match topic {
            topics::ACTIVATION => self.on_activation(&event).await,
            topics::TRIGGER => self.on_trigger(&event).await,
            topics::JOB_REPORT => self.on_job_report(&event).await,
            topics::REMOTE_JOB => self.on_remote_job(&event).await,
            other => Err(EngineError::bad_request(format!(
                "topic {other} is not handled"
            ))),
        }
    }

    async fn on_activation(&self, event: &Event) -> Result<()> {
        let request: ActivationEnvelope = event
            .decode()
            .map_err(|_| EngineError::bad_request("event body is not an activation job"))?;
        let span = self.attributes(&request).span("activation");
        self.activate(request).instrument(span).await
    }

    async fn activate(&self, request: ActivationEnvelope) -> Result<()> {
        let correlation = Correlation::from_envelope(&request);
        let activation_id = correlation.require_activation()?;
        let campaign_ref = correlation.require_campaign()?;
        let namespace = self.namespace_of(&request.namespace);

        let campaign = match self.campaigns.get_campaign(campaign_ref, namespace).await {
            Ok(campaign) => campaign,
            Err(err) => {
                warn!(error = %err, "failed to get campaign");
                let outcome = StageOutcome::untouched(&request.stage)
                    .with_generation(&request.activation_generation)
                    .failed(State::BadRequest, err.to_string());
                if let Err(report_err) = self
                    .activations
                    .report_stage_outcome(activation_id, namespace, outcome)
                    .await
                {
                    debug!(error = %report_err, "campaign failure not recorded");
                }
                return Ok(());
            }
        };

        let activation = match self.activations.get_activation(activation_id, namespace).await {
            Ok(activation) => activation,
            Err(err) => {
                debug!(error = %err, "activation not found, dropping request");
                return Ok(());
            }
        };

        match self
            .manager
            .handle_activation_event(&request, &campaign, &activation)
        {
            Ok(trigger) => {
                debug!(stage = %trigger.stage, "activation resolved");
                self.publish(topics::TRIGGER, &trigger);
            }
            Err(err) => {
                warn!(error = %err, "failed to resolve activation");
                let stage = StageManager::select_stage(&request, &campaign, &activation);
                let outcome = StageOutcome::untouched(stage)
                    .with_generation(&request.activation_generation)
                    .failed(err.state(), err.to_string());
                if let Err(report_err) = self
                    .activations
                    .report_stage_outcome(activation_id, namespace, outcome)
                    .await
                {
                    error!(error = %report_err, "failed to record activation failure");
                }
            }
        }
        Ok(())
    }

    async fn on_trigger(&self, event: &Event) -> Result<()> {
        let trigger: ActivationEnvelope = event
            .decode()
            .map_err(|_| EngineError::bad_request("event body is not an activation job"))?;
        let span = self.attributes(&trigger).span("trigger");
        self.trigger(trigger).instrument(span).await
    }

    async fn trigger(&self, trigger: ActivationEnvelope) -> Result<()> {
        let correlation = Correlation::from_envelope(&trigger);
        let activation_id = correlation.require_activation()?;
        let campaign_ref = correlation.require_campaign()?;
        let namespace = self.namespace_of(&trigger.namespace);

        // Remote executions have no local activation record.
        if !trigger.needs_report {
            if let Err(err) = self.activations.get_activation(activation_id, namespace).await {
                debug!(error = %err, "activation not found, dropping trigger");
                return Ok(());
            }
        }

        let campaign = match self.campaigns.get_campaign(campaign_ref, namespace).await {
            Ok(campaign) => campaign,
            Err(err) => {
                warn!(error = %err, "failed to get campaign");
                let outcome = StageOutcome::untouched(&trigger.stage)
                    .with_generation(&trigger.activation_generation)
                    .failed(State::BadRequest, err.to_string());
                self.report(&trigger, outcome).await?;
                return Ok(());
            }
        };

        let guard = self.lock(activation_id).await;
        self.report(
            &trigger,
            StageOutcome::running(&trigger.stage, &trigger.activation_generation),
        )
        .await?;

        let timer = SpanTimer::start(&trigger.stage);
        let (outcome, next) = self.manager.handle_trigger_event(&campaign, &trigger).await;
        info!(
            status = %outcome.status,
            next_stage = %outcome.next_stage,
            duration_ms = timer.finish(),
            "stage finished"
        );

        let continues = outcome.continues();
        self.report(&trigger, outcome).await?;
        self.release(guard);

        if let Some(next) = next.filter(|_| continues) {
            self.publish(topics::TRIGGER, &next);
        }
        Ok(())
    }

    async fn on_job_report(&self, event: &Event) -> Result<()> {
        let outcome: StageOutcome = event
            .decode()
            .map_err(|_| EngineError::bad_request("event body is not a stage outcome"))?;
        let correlation = Correlation::decode(&outcome.outputs);
        let span = StageSpanAttributes::from_correlation(&correlation)
            .with_site(self.manager.site_id())
            .span("job-report");
        self.job_report(outcome, correlation).instrument(span).await
    }

    async fn job_report(&self, mut outcome: StageOutcome, correlation: Correlation) -> Result<()> {
        let campaign_ref = correlation.require_campaign()?;
        let activation_id = correlation.require_activation()?;
        let namespace = correlation.namespace.as_str();
        if outcome.stage.is_empty() {
            outcome.stage = correlation.stage.clone().unwrap_or_default();
        }

        let guard = self.lock(activation_id).await;
        let mut next = None;
        if outcome.status.is_terminal_success() {
            match self.campaigns.get_campaign(campaign_ref, namespace).await {
                Ok(campaign) if campaign.self_driving => {
                    match self.manager.resume_stage(&outcome, &campaign) {
                        Ok(Some(envelope)) => {
                            outcome.next_stage.clone_from(&envelope.stage);
                            outcome.is_active = true;
                            next = Some(envelope);
                        }
                        Ok(None) => {}
                        Err(err) => {
                            error!(error = %err, "failed to resume stage");
                            outcome = outcome.failed(
                                State::InternalError,
                                format!("failed to resume stage: {err}"),
                            );
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "failed to get campaign, recording outcome only"),
            }
        }

        self.activations
            .report_stage_outcome(activation_id, namespace, outcome)
            .await?;
        self.release(guard);

        if let Some(next) = next {
            self.publish(topics::TRIGGER, &next);
        }
        Ok(())
    }

    async fn on_remote_job(&self, event: &Event) -> Result<()> {
        let job: JobEnvelope = event
            .decode()
            .map_err(|_| EngineError::bad_request("event body is not a job"))?;
        let packet: InputOutputData = serde_json::from_value(job.body)
            .map_err(|_| EngineError::bad_request("job body is not an input/output packet"))?;

        let trigger = reconstruct_remote_trigger(packet, event.origin())?;
        let span = self.attributes(&trigger).span("remote-job");
        self.remote_job(trigger).instrument(span).await
    }

    async fn remote_job(&self, mut trigger: ActivationEnvelope) -> Result<()> {
        let operation = trigger
            .inputs
            .get(KEY_OPERATION)
            .and_then(Value::as_str)
            .filter(|op| !op.is_empty())
            .ok_or_else(|| EngineError::bad_request(format!("{KEY_OPERATION} is missing")))?;
        let resolved = self.operations.resolve(operation)?;
        trigger.provider = resolved.provider;
        trigger.config = resolved.config;

        let outcome = self.manager.handle_direct_trigger_event(&trigger).await;
        info!(status = %outcome.status, "remote job finished");
        self.publish(topics::REPORT, &outcome);
        Ok(())
    }

    /// Writes an outcome to the repository, or publishes it on `report`
    /// when the stage runs on behalf of another site.
    async fn report(&self, trigger: &ActivationEnvelope, mut outcome: StageOutcome) -> Result<()> {
        if trigger.needs_report {
            Correlation::from_envelope(trigger).encode_into(&mut outcome.outputs);
            self.publish(topics::REPORT, &outcome);
            return Ok(());
        }
        self.activations
            .report_stage_outcome(
                &trigger.activation,
                self.namespace_of(&trigger.namespace),
                outcome,
            )
            .await
    }

    fn publish<T: Serialize>(&self, topic: &str, body: &T) {
        match Event::from_body(body) {
            Ok(event) if topic == topics::REPORT => self
                .bus
                .publish(topic, event.with_metadata(ORIGIN_METADATA, &self.config.site_id)),
            Ok(event) => self.bus.publish(topic, event),
            Err(err) => error!(topic, error = %err, "failed to encode event"),
        }
    }

    async fn lock(&self, activation_id: &str) -> Option<OwnedMutexGuard<()>> {
        match &self.locks {
            Some(locks) => Some(locks.acquire(activation_id).await),
            None => None,
        }
    }

    fn release(&self, guard: Option<OwnedMutexGuard<()>>) {
        drop(guard);
        if let Some(locks) = &self.locks {
            locks.prune();
        }
    }

    fn namespace_of<'a>(&'a self, namespace: &'a str) -> &'a str {
        if namespace.is_empty() {
            &self.config.default_namespace
        } else {
            namespace
        }
    }

    fn attributes(&self, envelope: &ActivationEnvelope) -> StageSpanAttributes {
        StageSpanAttributes::from_envelope(envelope).with_site(self.manager.site_id())
    }
}

/// Rebuilds a trigger envelope from a cross-site packet.
///
/// Identity comes from the reserved input keys; the sender's site, taken
/// from the event metadata, is stored under `__origin`. Output entries
/// that are maps become per-stage outputs.
pub(crate) fn reconstruct_remote_trigger(
    packet: InputOutputData,
    origin: Option<&str>,
) -> Result<ActivationEnvelope> {
    let mut inputs = packet.inputs;
    if let Some(origin) = origin.filter(|o| !o.is_empty()) {
        inputs.insert(KEY_ORIGIN.to_string(), Value::String(origin.to_string()));
    }

    let correlation = Correlation::decode(&inputs);
    let activation = correlation.require_activation()?.to_string();
    let campaign = correlation.require_campaign()?.to_string();

    let outputs: StageOutputs = packet
        .outputs
        .into_iter()
        .filter_map(|(stage, value)| match value {
            Value::Object(map) => Some((stage, map.into_iter().collect())),
            _ => None,
        })
        .collect();

    Ok(ActivationEnvelope {
        campaign,
        activation,
        activation_generation: correlation.activation_generation.unwrap_or_default(),
        stage: correlation.stage.unwrap_or_default(),
        inputs,
        outputs,
        namespace: correlation.namespace,
        schedule: correlation.schedule,
        needs_report: true,
        provider: String::new(),
        config: Value::Null,
    })
}
