//! Stage resolution and execution.
//!
//! [`StageManager`] holds the pure-ish part of the engine: turning an
//! activation request into a trigger envelope, running one stage across its
//! sites, and working out what comes next. It never touches the bus or the
//! repositories; [`StageEngine`](super::StageEngine) does that.

use crate::context::{strip_reserved, Correlation, KEY_SITE};
use crate::core::{ActivationEnvelope, StageOutcome, StageOutputs, State, ValueMap};
use crate::errors::{EngineError, Result};
use crate::expressions::{
    as_text, evaluate_expression, evaluate_map, evaluate_template, EvaluationContext,
};
use crate::model::{ActivationState, CampaignSpec, StageSpec};
use crate::providers::{ProviderFactory, ProviderOutput, StageProvider};
use futures::future::join_all;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Runs a provider, turning a panic into an internal error so the stage
/// still ends with an outcome.
async fn process_guarded(
    provider: &dyn StageProvider,
    inputs: ValueMap,
) -> Result<ProviderOutput> {
    match AssertUnwindSafe(provider.process(inputs)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let reason = panic_reason(panic.as_ref());
            error!(reason = %reason, "provider panicked");
            Err(EngineError::internal(format!("provider panicked: {reason}")))
        }
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown cause".to_string()
    }
}

/// Resolves and executes stages for one site.
#[derive(Debug, Clone)]
pub struct StageManager {
    factory: Arc<ProviderFactory>,
    site_id: String,
}

/// Everything a stage run produced before the selector is consulted.
struct StageRun {
    inputs: ValueMap,
    outputs: ValueMap,
    paused: bool,
}

impl StageManager {
    /// Creates a manager for the given local site.
    #[must_use]
    pub fn new(factory: Arc<ProviderFactory>, site_id: impl Into<String>) -> Self {
        Self {
            factory,
            site_id: site_id.into(),
        }
    }

    /// Returns the local site id.
    #[must_use]
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    /// Returns the provider factory.
    #[must_use]
    pub fn factory(&self) -> &Arc<ProviderFactory> {
        &self.factory
    }

    /// Picks the stage an activation request starts at.
    ///
    /// The requested stage wins over the activation's stage. A name the
    /// campaign does not define falls back to the campaign's first stage,
    /// which may be empty.
    pub fn select_stage<'a>(
        request: &'a ActivationEnvelope,
        campaign: &'a CampaignSpec,
        activation: &'a ActivationState,
    ) -> &'a str {
        let requested = if request.stage.is_empty() {
            activation.spec.stage.as_str()
        } else {
            request.stage.as_str()
        };
        if campaign.stage(requested).is_some() {
            requested
        } else {
            campaign.first_stage.as_str()
        }
    }

    /// Turns an activation request into the first trigger envelope.
    ///
    /// The stage comes from [`select_stage`](Self::select_stage). While an
    /// activation is in flight only its recorded next stage may be
    /// requested.
    pub fn handle_activation_event(
        &self,
        request: &ActivationEnvelope,
        campaign: &CampaignSpec,
        activation: &ActivationState,
    ) -> Result<ActivationEnvelope> {
        let stage = Self::select_stage(request, campaign, activation);
        if stage.is_empty() {
            return Err(EngineError::bad_request("no stage found"));
        }

        let spec = campaign
            .stage(stage)
            .ok_or_else(|| EngineError::bad_request(format!("stage {stage} is not found")))?;

        if let Some(status) = &activation.status {
            if status.is_active && !status.stage.is_empty() && status.next_stage != stage {
                return Err(EngineError::bad_request(format!(
                    "stage {stage} is not the next stage"
                )));
            }
        }

        let mut inputs = activation.spec.inputs.clone();
        inputs.extend(request.inputs.clone());

        let generation = if request.activation_generation.is_empty() {
            activation.spec.generation.clone()
        } else {
            request.activation_generation.clone()
        };

        Ok(ActivationEnvelope {
            campaign: request.campaign.clone(),
            activation: activation.id.clone(),
            activation_generation: generation,
            stage: stage.to_string(),
            inputs,
            outputs: StageOutputs::new(),
            namespace: activation.namespace.clone(),
            schedule: request.schedule.clone(),
            needs_report: request.needs_report,
            provider: spec.provider.clone(),
            config: spec.config.clone(),
        })
    }

    /// Runs one stage of a campaign and decides what comes next.
    ///
    /// Never fails: every error ends up in the returned outcome. The
    /// envelope is present only when the outcome names a next stage.
    pub async fn handle_trigger_event(
        &self,
        campaign: &CampaignSpec,
        trigger: &ActivationEnvelope,
    ) -> (StageOutcome, Option<ActivationEnvelope>) {
        let base = StageOutcome::untouched(&trigger.stage)
            .with_generation(&trigger.activation_generation);

        let Some(stage) = campaign.stage(&trigger.stage) else {
            let message = format!("stage {} is not found", trigger.stage);
            return (base.failed(State::InternalError, message), None);
        };

        let run = match self.run_stage(stage, trigger).await {
            Ok(run) => run,
            Err(err) => return (base.failed(err.state(), err.to_string()), None),
        };

        let mut outcome = base;
        outcome.inputs = strip_reserved(&run.inputs);
        outcome.outputs = run.outputs;

        if run.paused {
            info!(stage = %trigger.stage, "stage paused");
            return (outcome.with_status(State::Paused), None);
        }
        if !campaign.self_driving || stage.stage_selector.is_empty() {
            return (outcome.finished(), None);
        }

        let mut trigger_outputs = trigger.outputs.clone();
        trigger_outputs.insert(trigger.stage.clone(), outcome.outputs.clone());

        let ctx = EvaluationContext::new(&trigger.inputs, &trigger_outputs);
        let next = match evaluate_expression(&stage.stage_selector, &ctx) {
            Ok(value) => as_text(&value),
            Err(err) => {
                let message = format!("failed to evaluate stage selector: {err}");
                return (outcome.failed(State::InternalError, message), None);
            }
        };

        if next.is_empty() {
            return (outcome.finished(), None);
        }
        let Some(next_spec) = campaign.stage(&next) else {
            let message = format!("stage {next} is not found");
            return (outcome.failed(State::BadRequest, message), None);
        };

        debug!(stage = %trigger.stage, next_stage = %next, "stage selected");
        let envelope = ActivationEnvelope {
            stage: next.clone(),
            inputs: outcome.outputs.clone(),
            outputs: trigger_outputs,
            provider: next_spec.provider.clone(),
            config: next_spec.config.clone(),
            ..trigger.clone()
        };
        (outcome.advanced(next), Some(envelope))
    }

    /// Runs a single stage with no campaign around it.
    ///
    /// Used for remote jobs: the provider comes from the envelope itself and
    /// the outputs carry the correlation back to the originating site.
    pub async fn handle_direct_trigger_event(&self, trigger: &ActivationEnvelope) -> StageOutcome {
        let base = StageOutcome::untouched(&trigger.stage)
            .with_generation(&trigger.activation_generation);

        let result = match self.factory.create(&trigger.provider, &trigger.config) {
            Ok(provider) => process_guarded(provider.as_ref(), trigger.inputs.clone()).await,
            Err(err) => Err(err),
        };

        let mut outcome = match result {
            Ok(ProviderOutput {
                outputs,
                paused: true,
            }) => base.with_outputs(outputs).with_status(State::Paused),
            Ok(ProviderOutput { outputs, .. }) => base.with_outputs(outputs).finished(),
            Err(err) => base.failed(State::InternalError, err.to_string()),
        };
        outcome.inputs = strip_reserved(&trigger.inputs);
        Correlation::from_envelope(trigger).encode_into(&mut outcome.outputs);
        outcome
    }

    /// Works out the envelope that follows an externally reported outcome.
    ///
    /// Returns `None` when the campaign has nowhere left to go.
    pub fn resume_stage(
        &self,
        outcome: &StageOutcome,
        campaign: &CampaignSpec,
    ) -> Result<Option<ActivationEnvelope>> {
        let correlation = Correlation::decode(&outcome.outputs);
        let stage_name = correlation
            .stage
            .clone()
            .unwrap_or_else(|| outcome.stage.clone());
        let stage = campaign
            .stage(&stage_name)
            .ok_or_else(|| EngineError::bad_request(format!("stage {stage_name} is not found")))?;

        let outputs = strip_reserved(&outcome.outputs);
        let next = if outcome.next_stage.is_empty() {
            if stage.stage_selector.is_empty() {
                return Ok(None);
            }
            let mut stage_outputs = StageOutputs::new();
            stage_outputs.insert(stage_name.clone(), outputs.clone());
            let ctx = EvaluationContext::new(&outcome.inputs, &stage_outputs);
            as_text(&evaluate_expression(&stage.stage_selector, &ctx)?)
        } else {
            outcome.next_stage.clone()
        };

        if next.is_empty() {
            return Ok(None);
        }
        let next_spec = campaign
            .stage(&next)
            .ok_or_else(|| EngineError::bad_request(format!("stage {next} is not found")))?;

        let mut stage_outputs = StageOutputs::new();
        stage_outputs.insert(stage_name, outputs.clone());

        Ok(Some(ActivationEnvelope {
            campaign: correlation.campaign.unwrap_or_default(),
            activation: correlation.activation.unwrap_or_default(),
            activation_generation: correlation
                .activation_generation
                .unwrap_or_else(|| outcome.activation_generation.clone()),
            stage: next,
            inputs: outputs,
            outputs: stage_outputs,
            namespace: correlation.namespace,
            schedule: correlation.schedule,
            needs_report: false,
            provider: next_spec.provider.clone(),
            config: next_spec.config.clone(),
        }))
    }

    /// Evaluates inputs and sites, then runs the provider once per site.
    async fn run_stage(&self, stage: &StageSpec, trigger: &ActivationEnvelope) -> Result<StageRun> {
        let ctx = EvaluationContext::new(&trigger.inputs, &trigger.outputs);

        let mut inputs = trigger.inputs.clone();
        let evaluated = evaluate_map(&stage.inputs, &ctx)
            .map_err(|err| EngineError::internal(format!("failed to evaluate inputs: {err}")))?;
        inputs.extend(evaluated);

        let sites = self.resolve_sites(&stage.contexts, &ctx)?;
        Correlation::from_envelope(trigger).encode_into(&mut inputs);

        let provider = self.provider_for(stage, trigger)?;
        let runs = sites.iter().map(|site| {
            let provider = provider.clone();
            let mut site_inputs = inputs.clone();
            site_inputs.insert(KEY_SITE.to_string(), Value::String(site.clone()));
            async move { (site, process_guarded(provider.as_ref(), site_inputs).await) }
        });

        let mut outputs = ValueMap::new();
        let mut paused = false;
        for (site, result) in join_all(runs).await {
            let output =
                result.map_err(|err| EngineError::internal(format!("{site}: {err}")))?;
            paused |= output.paused;
            for (key, value) in output.outputs {
                let key = if *site == self.site_id {
                    key
                } else {
                    format!("{site}.{key}")
                };
                outputs.insert(key, value);
            }
        }

        Ok(StageRun {
            inputs,
            outputs,
            paused,
        })
    }

    /// Prefers the envelope's provider override over the stage definition.
    fn provider_for(
        &self,
        stage: &StageSpec,
        trigger: &ActivationEnvelope,
    ) -> Result<Arc<dyn StageProvider>> {
        let (id, config) = if trigger.provider.is_empty() {
            (&stage.provider, &stage.config)
        } else {
            (&trigger.provider, &trigger.config)
        };
        let config = if config.is_null() { &stage.config } else { config };
        self.factory
            .create(id, config)
            .map_err(|err| EngineError::internal(err.to_string()))
    }

    /// Evaluates a stage's `contexts` into a list of site ids. An empty
    /// result means the local site.
    fn resolve_sites(&self, contexts: &Value, ctx: &EvaluationContext<'_>) -> Result<Vec<String>> {
        let value = match contexts {
            Value::Null => Value::Null,
            Value::String(text) if text.trim().is_empty() => Value::Null,
            Value::String(text) => evaluate_expression(text, ctx)
                .map_err(|err| EngineError::internal(format!("invalid context {text}: {err}")))?,
            Value::Array(_) => evaluate_template(contexts, ctx)
                .map_err(|err| EngineError::internal(format!("invalid context: {err}")))?,
            other => {
                return Err(EngineError::internal(format!("invalid context {other}")));
            }
        };

        let sites: Vec<String> = match value {
            Value::Null => Vec::new(),
            Value::String(site) => vec![site],
            Value::Array(items) => items.iter().map(as_text).collect(),
            other => {
                return Err(EngineError::internal(format!("invalid context {other}")));
            }
        };
        let sites: Vec<String> = sites.into_iter().filter(|s| !s.is_empty()).collect();

        if sites.is_empty() {
            Ok(vec![self.site_id.clone()])
        } else {
            Ok(sites)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{InMemoryObjectCatalog, MOCK_PROVIDER};
    use crate::testing::{FailingProvider, PanickingProvider, PausingProvider};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn manager() -> StageManager {
        let catalog = Arc::new(InMemoryObjectCatalog::new());
        StageManager::new(Arc::new(ProviderFactory::with_defaults(catalog)), "hq")
    }

    fn chain(self_driving: bool) -> CampaignSpec {
        CampaignSpec::new("c")
            .self_driving(self_driving)
            .with_stage(
                StageSpec::new("a", MOCK_PROVIDER)
                    .with_input("foo", json!("${{ $input(start) }}"))
                    .with_selector("b"),
            )
            .with_stage(StageSpec::new("b", MOCK_PROVIDER))
    }

    fn trigger(stage: &str) -> ActivationEnvelope {
        ActivationEnvelope::new("act1", "c")
            .with_stage(stage)
            .with_input("start", json!(1))
    }

    #[test]
    fn test_activation_uses_first_stage() {
        let campaign = chain(true);
        let activation = ActivationState::new("act1", "c").with_input("start", json!(5));
        let request = ActivationEnvelope::new("act1", "c");

        let envelope = manager()
            .handle_activation_event(&request, &campaign, &activation)
            .unwrap();
        assert_eq!(envelope.stage, "a");
        assert_eq!(envelope.provider, MOCK_PROVIDER);
        assert_eq!(envelope.inputs["start"], json!(5));
    }

    #[test]
    fn test_activation_unknown_stage_falls_back_to_first_stage() {
        let campaign = chain(true);
        let activation = ActivationState::new("act1", "c").with_stage("b");
        let request = ActivationEnvelope::new("act1", "c").with_stage("zzz");

        let envelope = manager()
            .handle_activation_event(&request, &campaign, &activation)
            .unwrap();
        assert_eq!(envelope.stage, "a");
        assert_eq!(
            StageManager::select_stage(&request, &campaign, &activation),
            "a"
        );
    }

    #[test]
    fn test_select_stage_precedence() {
        let campaign = chain(true);
        let activation = ActivationState::new("act1", "c").with_stage("b");

        let bare = ActivationEnvelope::new("act1", "c");
        assert_eq!(StageManager::select_stage(&bare, &campaign, &activation), "b");

        let requested = ActivationEnvelope::new("act1", "c").with_stage("a");
        assert_eq!(
            StageManager::select_stage(&requested, &campaign, &activation),
            "a"
        );

        let fresh = ActivationState::new("act1", "c");
        assert_eq!(StageManager::select_stage(&bare, &campaign, &fresh), "a");
    }

    #[test]
    fn test_activation_with_undefined_first_stage_is_not_found() {
        let campaign = chain(true).with_first_stage("ghost");
        let activation = ActivationState::new("act1", "c");
        let request = ActivationEnvelope::new("act1", "c").with_stage("zzz");

        let err = manager()
            .handle_activation_event(&request, &campaign, &activation)
            .unwrap_err();
        assert_eq!(err.state(), State::BadRequest);
        assert!(err.to_string().contains("stage ghost is not found"));
    }

    #[test]
    fn test_activation_requires_some_stage() {
        let campaign = CampaignSpec::new("empty");
        let activation = ActivationState::new("act1", "empty");
        let request = ActivationEnvelope::new("act1", "empty");

        let err = manager()
            .handle_activation_event(&request, &campaign, &activation)
            .unwrap_err();
        assert_eq!(err.to_string(), "no stage found");
    }

    #[test]
    fn test_activation_in_flight_only_accepts_next_stage() {
        let campaign = chain(true);
        let mut activation = ActivationState::new("act1", "c");
        activation.status = Some(StageOutcome::untouched("a").advanced("b"));

        let request = ActivationEnvelope::new("act1", "c").with_stage("a");
        let err = manager()
            .handle_activation_event(&request, &campaign, &activation)
            .unwrap_err();
        assert!(err.to_string().contains("not the next stage"));

        let request = ActivationEnvelope::new("act1", "c").with_stage("b");
        assert!(manager()
            .handle_activation_event(&request, &campaign, &activation)
            .is_ok());
    }

    #[tokio::test]
    async fn test_trigger_advances_self_driving_campaign() {
        let (outcome, next) = manager().handle_trigger_event(&chain(true), &trigger("a")).await;

        assert_eq!(outcome.status, State::Done);
        assert_eq!(outcome.next_stage, "b");
        assert!(outcome.is_active);
        assert_eq!(outcome.outputs["foo"], json!(2));
        assert!(!outcome.inputs.contains_key("__activation"));

        let next = next.unwrap();
        assert_eq!(next.stage, "b");
        assert_eq!(next.inputs["foo"], json!(2));
        assert_eq!(next.outputs["a"]["foo"], json!(2));
        assert_eq!(next.activation, "act1");
    }

    #[tokio::test]
    async fn test_trigger_without_self_driving_finishes() {
        let (outcome, next) = manager()
            .handle_trigger_event(&chain(false), &trigger("a"))
            .await;

        assert_eq!(outcome.status, State::Done);
        assert!(outcome.next_stage.is_empty());
        assert!(!outcome.is_active);
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_selector_to_unknown_stage_is_bad_request() {
        let campaign = CampaignSpec::new("c")
            .self_driving(true)
            .with_stage(StageSpec::new("a", MOCK_PROVIDER).with_selector("ghost"));

        let (outcome, next) = manager().handle_trigger_event(&campaign, &trigger("a")).await;
        assert_eq!(outcome.status, State::BadRequest);
        assert!(!outcome.is_active);
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_conditional_selector() {
        let campaign = CampaignSpec::new("c")
            .self_driving(true)
            .with_stage(
                StageSpec::new("a", MOCK_PROVIDER)
                    .with_selector("${{ $if($gt($output(a, foo), 5), b, '') }}"),
            )
            .with_stage(StageSpec::new("b", MOCK_PROVIDER));

        let low = trigger("a").with_input("foo", json!(1));
        let (outcome, next) = manager().handle_trigger_event(&campaign, &low).await;
        assert_eq!(outcome.status, State::Done);
        assert!(!outcome.is_active);
        assert!(next.is_none());

        let high = trigger("a").with_input("foo", json!(9));
        let (outcome, next) = manager().handle_trigger_event(&campaign, &high).await;
        assert_eq!(outcome.next_stage, "b");
        assert!(next.is_some());
    }

    #[tokio::test]
    async fn test_provider_error_is_internal_error() {
        let manager = manager();
        manager
            .factory()
            .register_instance("test.failing", Arc::new(FailingProvider::new("boom")));
        let campaign =
            CampaignSpec::new("c").with_stage(StageSpec::new("a", "test.failing"));

        let (outcome, next) = manager.handle_trigger_event(&campaign, &trigger("a")).await;
        assert_eq!(outcome.status, State::InternalError);
        assert!(outcome.error_message.contains("boom"));
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_provider_panic_is_internal_error() {
        let manager = manager();
        manager
            .factory()
            .register_instance("test.panicking", Arc::new(PanickingProvider::new("boom")));
        let campaign = CampaignSpec::new("c")
            .self_driving(true)
            .with_stage(StageSpec::new("a", "test.panicking").with_selector("a"));

        let (outcome, next) = manager.handle_trigger_event(&campaign, &trigger("a")).await;
        assert_eq!(outcome.status, State::InternalError);
        assert!(outcome.error_message.contains("provider panicked: boom"));
        assert!(!outcome.is_active);
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_trigger_for_undefined_stage_is_internal_error() {
        let (outcome, next) = manager()
            .handle_trigger_event(&chain(true), &trigger("ghost"))
            .await;
        assert_eq!(outcome.status, State::InternalError);
        assert_eq!(outcome.error_message, "stage ghost is not found");
        assert!(!outcome.is_active);
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_unknown_provider_is_internal_error() {
        let campaign = CampaignSpec::new("c").with_stage(StageSpec::new("a", "nope"));
        let (outcome, _) = manager().handle_trigger_event(&campaign, &trigger("a")).await;
        assert_eq!(outcome.status, State::InternalError);
        assert!(outcome.error_message.contains("not supported"));
    }

    #[tokio::test]
    async fn test_paused_stage_stays_active() {
        let manager = manager();
        manager
            .factory()
            .register_instance("test.pause", Arc::new(PausingProvider::new()));
        let campaign = CampaignSpec::new("c")
            .self_driving(true)
            .with_stage(StageSpec::new("a", "test.pause").with_selector("a"));

        let (outcome, next) = manager.handle_trigger_event(&campaign, &trigger("a")).await;
        assert_eq!(outcome.status, State::Paused);
        assert!(outcome.is_active);
        assert!(!outcome.continues());
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_remote_site_outputs_are_prefixed() {
        let campaign = CampaignSpec::new("c").with_stage(
            StageSpec::new("a", MOCK_PROVIDER).with_contexts(json!(["hq", "edge-1"])),
        );

        let (outcome, _) = manager().handle_trigger_event(&campaign, &trigger("a")).await;
        assert_eq!(outcome.status, State::Done);
        assert_eq!(outcome.outputs["start"], json!(1));
        assert_eq!(outcome.outputs["edge-1.start"], json!(1));
    }

    #[tokio::test]
    async fn test_contexts_expression() {
        let campaign = CampaignSpec::new("c").with_stage(
            StageSpec::new("a", MOCK_PROVIDER).with_contexts(json!("${{ $input(site) }}")),
        );
        let envelope = trigger("a").with_input("site", json!("edge-2"));

        let (outcome, _) = manager().handle_trigger_event(&campaign, &envelope).await;
        assert_eq!(outcome.outputs["edge-2.site"], json!("edge-2"));
        assert!(!outcome.outputs.contains_key("site"));
    }

    #[tokio::test]
    async fn test_invalid_contexts() {
        let campaign = CampaignSpec::new("c")
            .with_stage(StageSpec::new("a", MOCK_PROVIDER).with_contexts(json!(42)));
        let (outcome, _) = manager().handle_trigger_event(&campaign, &trigger("a")).await;
        assert_eq!(outcome.status, State::InternalError);
        assert!(outcome.error_message.contains("invalid context"));
    }

    #[tokio::test]
    async fn test_direct_trigger_encodes_correlation() {
        let mut envelope = trigger("remote").with_input("foo", json!(3));
        envelope.provider = MOCK_PROVIDER.to_string();

        let outcome = manager().handle_direct_trigger_event(&envelope).await;
        assert_eq!(outcome.status, State::Done);
        assert_eq!(outcome.outputs["foo"], json!(4));
        assert_eq!(outcome.outputs["__activation"], json!("act1"));
        assert_eq!(outcome.outputs["__campaign"], json!("c"));
        assert_eq!(outcome.outputs["__stage"], json!("remote"));
    }

    #[tokio::test]
    async fn test_direct_trigger_unknown_provider() {
        let mut envelope = trigger("remote");
        envelope.provider = "nope".to_string();

        let outcome = manager().handle_direct_trigger_event(&envelope).await;
        assert_eq!(outcome.status, State::InternalError);
        assert_eq!(outcome.outputs["__activation"], json!("act1"));
    }

    #[tokio::test]
    async fn test_direct_trigger_provider_panic() {
        let manager = manager();
        manager
            .factory()
            .register_instance("test.panicking", Arc::new(PanickingProvider::new("boom")));
        let mut envelope = trigger("remote");
        envelope.provider = "test.panicking".to_string();

        let outcome = manager.handle_direct_trigger_event(&envelope).await;
        assert_eq!(outcome.status, State::InternalError);
        assert!(outcome.error_message.contains("boom"));
        assert_eq!(outcome.outputs["__activation"], json!("act1"));
    }

    #[test]
    fn test_resume_from_reported_outcome() {
        let outcome: StageOutcome = serde_json::from_value(json!({
            "stage": "a",
            "status": 8997,
            "activationGeneration": "4",
            "outputs": {
                "__activation": "act1",
                "__campaign": "c",
                "__stage": "a",
                "__namespace": "ops",
                "foo": 7
            }
        }))
        .unwrap();

        let next = manager().resume_stage(&outcome, &chain(true)).unwrap().unwrap();
        assert_eq!(next.stage, "b");
        assert_eq!(next.activation, "act1");
        assert_eq!(next.namespace, "ops");
        assert_eq!(next.activation_generation, "4");
        assert_eq!(next.inputs.get("foo"), Some(&json!(7)));
        assert!(!next.inputs.contains_key("__campaign"));
    }

    #[test]
    fn test_resume_last_stage_returns_none() {
        let outcome = StageOutcome::untouched("b").finished();
        assert!(manager().resume_stage(&outcome, &chain(true)).unwrap().is_none());
    }

    #[test]
    fn test_resume_unknown_stage_fails() {
        let outcome = StageOutcome::untouched("ghost").finished();
        let err = manager().resume_stage(&outcome, &chain(true)).unwrap_err();
        assert_eq!(err.state(), State::BadRequest);
    }
}
