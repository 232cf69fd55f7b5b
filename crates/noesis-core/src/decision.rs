//! Decision Engine: multi-provider reasoning with mode selection, fallback
//! cascade, and consensus voting.
//!
//! The engine depends only on the abstract `LLMProvider` capability — never a
//! vendor SDK. Callers of `make_decision`/`get_consensus_decision` always get
//! a `DecisionResult` back, even under total provider outage: every provider
//! call is timeout-bounded, failures cascade to the next untried provider,
//! and a deterministic rule-based fallback closes the chain.

use crate::error::ProviderError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Accuracy a provider must exceed to be kept as the default for a mode.
const DEFAULT_MAPPING_MIN_ACCURACY: f32 = 0.7;

/// Accuracy floor for best-of-registry selection.
const SELECTION_MIN_ACCURACY: f32 = 0.6;

/// Providers polled by a consensus decision.
const CONSENSUS_PROVIDER_CAP: usize = 3;

/// Confidence reported by the rule-based fallback.
const FALLBACK_CONFIDENCE: f32 = 0.5;

// -----------------------------------------------------------------------------
// Provider capability (consumed, never implemented here)
// -----------------------------------------------------------------------------

/// Generation parameters passed to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model hint; providers may ignore it.
    #[serde(default)]
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 1024,
            temperature: 0.3,
        }
    }
}

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A provider's answer to one generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub content: String,
    #[serde(default)]
    pub usage: TokenUsage,
    /// Why generation stopped (e.g. "stop", "length").
    #[serde(default)]
    pub finish_reason: String,
}

/// Abstract LLM capability. Concrete vendor adapters live outside this crate
/// and are injected at registration time.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Unique provider name used for registry lookup and performance tracking.
    fn name(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResponse, ProviderError>;
}

// -----------------------------------------------------------------------------
// Reasoning modes
// -----------------------------------------------------------------------------

/// How the engine should approach a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningMode {
    FastDecision,
    DeepAnalysis,
    Multimodal,
    Research,
    Consensus,
}

impl ReasoningMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningMode::FastDecision => "fast_decision",
            ReasoningMode::DeepAnalysis => "deep_analysis",
            ReasoningMode::Multimodal => "multimodal",
            ReasoningMode::Research => "research",
            ReasoningMode::Consensus => "consensus",
        }
    }
}

/// Data-key fragments that suggest visual material and route to Multimodal.
const VISUAL_KEY_HINTS: [&str; 4] = ["image", "chart", "diagram", "visual"];

// -----------------------------------------------------------------------------
// Decision context and result
// -----------------------------------------------------------------------------

/// Everything the engine knows about the situation being decided.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionContext {
    pub situation: String,
    /// 0–10; 8+ demands a fast decision.
    pub urgency: u8,
    /// 0–10; 8+ demands deep analysis.
    pub complexity: u8,
    /// Structured data available for the decision (keys drive Multimodal).
    #[serde(default)]
    pub available_data: serde_json::Value,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
}

impl DecisionContext {
    pub fn new(situation: impl Into<String>) -> Self {
        Self {
            situation: situation.into(),
            available_data: serde_json::json!({}),
            ..Self::default()
        }
    }

    pub fn with_urgency(mut self, urgency: u8) -> Self {
        self.urgency = urgency.min(10);
        self
    }

    pub fn with_complexity(mut self, complexity: u8) -> Self {
        self.complexity = complexity.min(10);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.available_data = data;
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    pub fn with_success_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.success_criteria.push(criterion.into());
        self
    }
}

/// The structured decision returned to callers. Never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionResult {
    pub decision: String,
    pub confidence: f32,
    #[serde(default)]
    pub reasoning_chain: Vec<String>,
    #[serde(default)]
    pub alternatives: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub execution_plan: Vec<String>,
    pub mode: ReasoningMode,
    /// Provider that produced the decision; None for the rule-based fallback.
    #[serde(default)]
    pub provider: Option<String>,
}

// -----------------------------------------------------------------------------
// Provider performance (shared mutable state, mutex-protected)
// -----------------------------------------------------------------------------

/// Running performance record per provider, updated after every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderPerformance {
    /// successful_calls / total_calls once there is history.
    pub accuracy: f32,
    /// Mean call latency in seconds.
    pub speed: f32,
    /// Fraction of responses that parsed as structured output.
    pub consistency: f32,
    pub total_calls: u64,
    pub successful_calls: u64,
}

impl Default for ProviderPerformance {
    fn default() -> Self {
        // Neutral optimism: a fresh provider is eligible for default-mapping
        // selection until real calls say otherwise.
        Self {
            accuracy: 0.75,
            speed: 0.5,
            consistency: 0.8,
            total_calls: 0,
            successful_calls: 0,
        }
    }
}

impl ProviderPerformance {
    fn record(&mut self, success: bool, latency: Duration, structured: bool) {
        self.total_calls += 1;
        if success {
            self.successful_calls += 1;
        }
        self.accuracy = self.successful_calls as f32 / self.total_calls as f32;
        let latency_secs = latency.as_secs_f32();
        let n = self.total_calls as f32;
        self.speed = (self.speed * (n - 1.0) + latency_secs) / n;
        let structured_score = if structured { 1.0 } else { 0.0 };
        self.consistency = (self.consistency * (n - 1.0) + structured_score) / n;
    }
}

struct ProviderEntry {
    provider: Arc<dyn LLMProvider>,
    timeout: Duration,
}

// -----------------------------------------------------------------------------
// The engine
// -----------------------------------------------------------------------------

/// Multi-provider reasoning abstraction. Independent of storage.
///
/// Providers and mode defaults are set during construction (`&mut self`);
/// only the performance map mutates afterwards, so the engine shares behind
/// an `Arc` without any outer lock.
pub struct DecisionEngine {
    /// Registration order matters: the fallback cascade walks it.
    providers: Vec<(String, ProviderEntry)>,
    /// Preferred provider per mode (depth vs. speed defaults).
    mode_defaults: HashMap<ReasoningMode, String>,
    /// Mutated after every call; shared across concurrent sessions.
    performance: DashMap<String, ProviderPerformance>,
    default_timeout: Duration,
}

impl DecisionEngine {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            providers: Vec::new(),
            mode_defaults: HashMap::new(),
            performance: DashMap::new(),
            default_timeout,
        }
    }

    /// Registers a provider with the default timeout. Registration order
    /// defines the fallback cascade.
    pub fn register_provider(&mut self, provider: Arc<dyn LLMProvider>) {
        self.register_provider_with_timeout(provider, None);
    }

    pub fn register_provider_with_timeout(
        &mut self,
        provider: Arc<dyn LLMProvider>,
        timeout: Option<Duration>,
    ) {
        let name = provider.name().to_string();
        tracing::info!(target: "noesis::decision", provider = %name, "provider registered");
        self.performance.entry(name.clone()).or_default();
        self.providers.push((
            name,
            ProviderEntry {
                provider,
                timeout: timeout.unwrap_or(self.default_timeout),
            },
        ));
    }

    /// Pins a provider as the default for a mode (e.g. the deep model for
    /// DeepAnalysis, the fast one for FastDecision).
    pub fn set_mode_default(&mut self, mode: ReasoningMode, provider_name: impl Into<String>) {
        self.mode_defaults.insert(mode, provider_name.into());
    }

    pub fn provider_performance(&self, name: &str) -> Option<ProviderPerformance> {
        self.performance.get(name).map(|p| p.clone())
    }

    /// Mode auto-selection precedence: urgency ≥ 8 → FastDecision; else
    /// complexity ≥ 8 → DeepAnalysis; else a "research" situation → Research;
    /// else visual data keys → Multimodal; else FastDecision.
    pub fn select_mode(&self, context: &DecisionContext) -> ReasoningMode {
        if context.urgency >= 8 {
            return ReasoningMode::FastDecision;
        }
        if context.complexity >= 8 {
            return ReasoningMode::DeepAnalysis;
        }
        if context.situation.to_lowercase().contains("research") {
            return ReasoningMode::Research;
        }
        if let Some(map) = context.available_data.as_object() {
            let visual = map.keys().any(|k| {
                let k = k.to_lowercase();
                VISUAL_KEY_HINTS.iter().any(|hint| k.contains(hint))
            });
            if visual {
                return ReasoningMode::Multimodal;
            }
        }
        ReasoningMode::FastDecision
    }

    /// Provider selection: the mode default if its accuracy clears 0.7, else
    /// the most accurate provider above 0.6, else any registered provider.
    fn select_provider_name(&self, mode: ReasoningMode) -> Option<String> {
        if self.providers.is_empty() {
            return None;
        }

        if let Some(default_name) = self.mode_defaults.get(&mode) {
            let registered = self.providers.iter().any(|(n, _)| n == default_name);
            let accurate = self
                .performance
                .get(default_name)
                .map(|p| p.accuracy > DEFAULT_MAPPING_MIN_ACCURACY)
                .unwrap_or(false);
            if registered && accurate {
                return Some(default_name.clone());
            }
        }

        // Ties go to the earlier-registered provider.
        let mut best: Option<(String, f32)> = None;
        for (name, _) in &self.providers {
            let Some(p) = self.performance.get(name) else {
                continue;
            };
            if p.accuracy <= SELECTION_MIN_ACCURACY {
                continue;
            }
            if best.as_ref().map(|(_, acc)| p.accuracy > *acc).unwrap_or(true) {
                best = Some((name.clone(), p.accuracy));
            }
        }
        if let Some((name, _)) = best {
            return Some(name);
        }

        self.providers.first().map(|(name, _)| name.clone())
    }

    /// Makes a decision. Cascades through providers on failure and falls back
    /// to deterministic rules if every provider fails — never an error.
    pub async fn make_decision(
        &self,
        context: &DecisionContext,
        mode: Option<ReasoningMode>,
    ) -> DecisionResult {
        let mode = mode.unwrap_or_else(|| self.select_mode(context));
        let prompt = build_prompt(mode, context);

        // Cascade order: the selected provider first, then every untried
        // provider in registration order.
        let mut order: Vec<String> = Vec::new();
        if let Some(selected) = self.select_provider_name(mode) {
            order.push(selected);
        }
        for (name, _) in &self.providers {
            if !order.contains(name) {
                order.push(name.clone());
            }
        }

        for name in order {
            match self.query_provider(&name, &prompt).await {
                Ok(mut result) => {
                    result.mode = mode;
                    result.provider = Some(name);
                    return result;
                }
                Err(e) => {
                    tracing::warn!(
                        target: "noesis::decision",
                        provider = %name,
                        error = %e,
                        "provider failed, cascading"
                    );
                }
            }
        }

        tracing::warn!(
            target: "noesis::decision",
            mode = mode.as_str(),
            "all providers failed, using rule-based fallback"
        );
        rule_based_fallback(context, mode)
    }

    /// Consensus: up to three providers independently at FastDecision, tally
    /// identical decision strings, majority wins. Confidence is the mean of
    /// the concurring providers; alternatives are the non-majority decisions.
    pub async fn get_consensus_decision(&self, context: &DecisionContext) -> DecisionResult {
        let names: Vec<String> = self
            .providers
            .iter()
            .take(CONSENSUS_PROVIDER_CAP)
            .map(|(name, _)| name.clone())
            .collect();
        if names.is_empty() {
            return rule_based_fallback(context, ReasoningMode::Consensus);
        }

        let prompt = build_prompt(ReasoningMode::FastDecision, context);
        let mut votes: Vec<(String, f32)> = Vec::new();
        for name in names {
            match self.query_provider(&name, &prompt).await {
                Ok(result) => votes.push((result.decision, result.confidence)),
                Err(e) => {
                    tracing::warn!(
                        target: "noesis::decision",
                        provider = %name,
                        error = %e,
                        "consensus vote lost to provider failure"
                    );
                }
            }
        }
        if votes.is_empty() {
            return rule_based_fallback(context, ReasoningMode::Consensus);
        }

        // Tally identical decision strings, preserving first-seen order.
        let mut tally: Vec<(String, Vec<f32>)> = Vec::new();
        for (decision, confidence) in votes {
            match tally.iter_mut().find(|(d, _)| *d == decision) {
                Some((_, confs)) => confs.push(confidence),
                None => tally.push((decision, vec![confidence])),
            }
        }
        tally.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

        let (majority, confidences) = tally.remove(0);
        let confidence = confidences.iter().sum::<f32>() / confidences.len() as f32;
        let alternatives: Vec<String> = tally.into_iter().map(|(d, _)| d).collect();
        let concurring = confidences.len();

        DecisionResult {
            decision: majority,
            confidence,
            reasoning_chain: vec![format!(
                "consensus of {concurring} concurring provider(s) at fast_decision mode"
            )],
            alternatives,
            resources: Vec::new(),
            execution_plan: Vec::new(),
            mode: ReasoningMode::Consensus,
            provider: None,
        }
    }

    /// One timeout-bounded provider call with performance bookkeeping.
    async fn query_provider(
        &self,
        name: &str,
        prompt: &str,
    ) -> Result<DecisionResult, ProviderError> {
        let (provider, timeout) = self
            .providers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| (e.provider.clone(), e.timeout))
            .ok_or_else(|| ProviderError::Other(format!("provider {name} not registered")))?;

        let options = GenerationOptions::default();
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, provider.generate(prompt, &options)).await;
        let latency = started.elapsed();

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                self.record_call(name, false, latency, false);
                return Err(e);
            }
            Err(_) => {
                self.record_call(name, false, latency, false);
                return Err(ProviderError::Timeout(timeout));
            }
        };

        let (result, structured) = parse_decision(&response.content);
        self.record_call(name, true, latency, structured);
        Ok(result)
    }

    fn record_call(&self, name: &str, success: bool, latency: Duration, structured: bool) {
        self.performance
            .entry(name.to_string())
            .or_default()
            .record(success, latency, structured);
    }
}

// -----------------------------------------------------------------------------
// Prompt templates
// -----------------------------------------------------------------------------

/// Mode-specific prompt embedding situation, urgency, complexity, data,
/// constraints, and success criteria.
fn build_prompt(mode: ReasoningMode, context: &DecisionContext) -> String {
    let framing = match mode {
        ReasoningMode::FastDecision => {
            "Decide quickly. Prefer the option that is safe to execute now."
        }
        ReasoningMode::DeepAnalysis => {
            "Analyze thoroughly. Weigh trade-offs, risks, and second-order effects before deciding."
        }
        ReasoningMode::Multimodal => {
            "The available data includes visual material. Ground the decision in what the data shows."
        }
        ReasoningMode::Research => {
            "This is a research question. Identify what must be learned and the best way to learn it."
        }
        ReasoningMode::Consensus => {
            "Give your independent judgment; it will be tallied against other reasoners."
        }
    };

    let mut prompt = format!(
        "{framing}\n\nSituation: {}\nUrgency: {}/10\nComplexity: {}/10\n",
        context.situation, context.urgency, context.complexity
    );
    if context
        .available_data
        .as_object()
        .map(|m| !m.is_empty())
        .unwrap_or(false)
    {
        prompt.push_str(&format!("Available data: {}\n", context.available_data));
    }
    if !context.constraints.is_empty() {
        prompt.push_str(&format!("Constraints: {}\n", context.constraints.join("; ")));
    }
    if !context.success_criteria.is_empty() {
        prompt.push_str(&format!(
            "Success criteria: {}\n",
            context.success_criteria.join("; ")
        ));
    }
    prompt.push_str(
        "\nRespond as JSON: {\"decision\": str, \"confidence\": 0..1, \
         \"reasoning_chain\": [str], \"alternatives\": [str], \
         \"resources\": [str], \"execution_plan\": [str]}",
    );
    prompt
}

// -----------------------------------------------------------------------------
// Response parsing: JSON first, line-based fallback
// -----------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawDecision {
    decision: String,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    reasoning_chain: Vec<String>,
    #[serde(default)]
    alternatives: Vec<String>,
    #[serde(default)]
    resources: Vec<String>,
    #[serde(default)]
    execution_plan: Vec<String>,
}

/// Parses a provider response. Returns the result plus whether the response
/// was structured (drives the consistency metric).
fn parse_decision(content: &str) -> (DecisionResult, bool) {
    let trimmed = content.trim();

    // JSON-preferred: accept either the bare object or one embedded in prose.
    let json_slice = trimmed
        .find('{')
        .and_then(|start| trimmed.rfind('}').map(|end| &trimmed[start..=end]));
    if let Some(slice) = json_slice {
        if let Ok(raw) = serde_json::from_str::<RawDecision>(slice) {
            let result = DecisionResult {
                decision: raw.decision,
                confidence: raw.confidence.unwrap_or(0.7).clamp(0.0, 1.0),
                reasoning_chain: raw.reasoning_chain,
                alternatives: raw.alternatives,
                resources: raw.resources,
                execution_plan: raw.execution_plan,
                mode: ReasoningMode::FastDecision,
                provider: None,
            };
            return (result, true);
        }
    }

    // Line-based fallback: "decision: ..." / "confidence: ..." prefixes.
    let mut decision = None;
    let mut confidence = None;
    let mut reasoning_chain = Vec::new();
    for line in trimmed.lines() {
        let line = line.trim();
        if let Some(rest) = strip_prefix_ci(line, "decision:") {
            decision = Some(rest.trim().to_string());
        } else if let Some(rest) = strip_prefix_ci(line, "confidence:") {
            confidence = rest.trim().parse::<f32>().ok();
        } else if let Some(rest) = strip_prefix_ci(line, "reasoning:") {
            reasoning_chain.push(rest.trim().to_string());
        }
    }
    let structured = decision.is_some();
    let decision = decision
        .or_else(|| trimmed.lines().find(|l| !l.trim().is_empty()).map(|l| l.trim().to_string()))
        .unwrap_or_else(|| "no_decision".to_string());

    let result = DecisionResult {
        decision,
        confidence: confidence.unwrap_or(0.6).clamp(0.0, 1.0),
        reasoning_chain,
        alternatives: Vec::new(),
        resources: Vec::new(),
        execution_plan: Vec::new(),
        mode: ReasoningMode::FastDecision,
        provider: None,
    };
    (result, structured)
}

/// ASCII case-insensitive prefix strip that stays on char boundaries.
fn strip_prefix_ci<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}

/// Deterministic last resort when every provider has failed. Never raises.
fn rule_based_fallback(context: &DecisionContext, mode: ReasoningMode) -> DecisionResult {
    let (decision, reasoning) = if context.urgency >= 8 {
        (
            "act_immediately",
            "urgency is critical; acting on the best available information",
        )
    } else if context.complexity <= 3 {
        (
            "standard_approach",
            "low complexity; the standard approach applies",
        )
    } else {
        (
            "gather_more_information",
            "moderate complexity without provider support; gathering more information first",
        )
    };
    DecisionResult {
        decision: decision.to_string(),
        confidence: FALLBACK_CONFIDENCE,
        reasoning_chain: vec![reasoning.to_string()],
        alternatives: Vec::new(),
        resources: Vec::new(),
        execution_plan: Vec::new(),
        mode,
        provider: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted provider: returns a fixed decision or fails.
    struct ScriptedProvider {
        name: String,
        decision: Option<(String, f32)>,
    }

    impl ScriptedProvider {
        fn deciding(name: &str, decision: &str, confidence: f32) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                decision: Some((decision.to_string(), confidence)),
            })
        }

        fn failing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                decision: None,
            })
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn generate(
            &self,
            _prompt: &str,
            _options: &GenerationOptions,
        ) -> Result<GenerationResponse, ProviderError> {
            match &self.decision {
                Some((decision, confidence)) => Ok(GenerationResponse {
                    content: format!(
                        "{{\"decision\": \"{decision}\", \"confidence\": {confidence}}}"
                    ),
                    usage: TokenUsage::default(),
                    finish_reason: "stop".to_string(),
                }),
                None => Err(ProviderError::Other("scripted failure".to_string())),
            }
        }
    }

    fn engine() -> DecisionEngine {
        DecisionEngine::new(Duration::from_secs(5))
    }

    #[test]
    fn mode_selection_precedence() {
        let e = engine();
        let urgent = DecisionContext::new("research the urgent research topic")
            .with_urgency(9)
            .with_complexity(9);
        assert_eq!(e.select_mode(&urgent), ReasoningMode::FastDecision);

        let complex = DecisionContext::new("plain situation").with_complexity(8);
        assert_eq!(e.select_mode(&complex), ReasoningMode::DeepAnalysis);

        let research = DecisionContext::new("research the best database");
        assert_eq!(e.select_mode(&research), ReasoningMode::Research);

        let visual = DecisionContext::new("plain situation")
            .with_data(serde_json::json!({"latency_chart": [1, 2, 3]}));
        assert_eq!(e.select_mode(&visual), ReasoningMode::Multimodal);

        let plain = DecisionContext::new("plain situation");
        assert_eq!(e.select_mode(&plain), ReasoningMode::FastDecision);
    }

    #[tokio::test]
    async fn consensus_majority_wins_with_mean_confidence() {
        let mut e = engine();
        e.register_provider(ScriptedProvider::deciding("p1", "X", 0.8));
        e.register_provider(ScriptedProvider::deciding("p2", "Y", 0.9));
        e.register_provider(ScriptedProvider::deciding("p3", "X", 0.6));

        let result = e
            .get_consensus_decision(&DecisionContext::new("pick one"))
            .await;
        assert_eq!(result.decision, "X");
        assert!((result.confidence - 0.7).abs() < 1e-5);
        assert_eq!(result.alternatives, vec!["Y".to_string()]);
        assert_eq!(result.mode, ReasoningMode::Consensus);
    }

    #[tokio::test]
    async fn cascade_survives_failing_providers() {
        let mut e = engine();
        e.register_provider(ScriptedProvider::failing("dead1"));
        e.register_provider(ScriptedProvider::failing("dead2"));
        e.register_provider(ScriptedProvider::deciding("alive", "ship_it", 0.85));

        let result = e
            .make_decision(&DecisionContext::new("simple call"), None)
            .await;
        assert_eq!(result.decision, "ship_it");
        assert_eq!(result.provider.as_deref(), Some("alive"));

        // Failures were booked against the dead providers.
        let dead = e.provider_performance("dead1").unwrap();
        assert_eq!(dead.total_calls, 1);
        assert_eq!(dead.successful_calls, 0);
    }

    #[tokio::test]
    async fn total_outage_yields_rule_based_fallback() {
        let mut e = engine();
        e.register_provider(ScriptedProvider::failing("dead"));

        let urgent = e
            .make_decision(&DecisionContext::new("fire").with_urgency(9), None)
            .await;
        assert_eq!(urgent.decision, "act_immediately");
        assert!((urgent.confidence - 0.5).abs() < 1e-6);
        assert!(urgent.provider.is_none());

        let simple = e
            .make_decision(&DecisionContext::new("easy").with_complexity(2), None)
            .await;
        assert_eq!(simple.decision, "standard_approach");

        let murky = e
            .make_decision(&DecisionContext::new("murky").with_complexity(5), None)
            .await;
        assert_eq!(murky.decision, "gather_more_information");
    }

    #[tokio::test]
    async fn no_providers_still_returns_a_decision() {
        let e = engine();
        let result = e
            .make_decision(&DecisionContext::new("void").with_complexity(5), None)
            .await;
        assert_eq!(result.decision, "gather_more_information");
        let consensus = e.get_consensus_decision(&DecisionContext::new("void")).await;
        assert_eq!(consensus.confidence, 0.5);
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        struct SlowProvider;

        #[async_trait]
        impl LLMProvider for SlowProvider {
            fn name(&self) -> &str {
                "slow"
            }
            async fn generate(
                &self,
                _prompt: &str,
                _options: &GenerationOptions,
            ) -> Result<GenerationResponse, ProviderError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                unreachable!("the engine times out first")
            }
        }

        let mut e = engine();
        e.register_provider_with_timeout(Arc::new(SlowProvider), Some(Duration::from_millis(20)));
        e.register_provider(ScriptedProvider::deciding("fast", "answer", 0.9));

        let result = e.make_decision(&DecisionContext::new("hurry"), None).await;
        assert_eq!(result.decision, "answer");
        let slow = e.provider_performance("slow").unwrap();
        assert_eq!(slow.successful_calls, 0);
        assert_eq!(slow.total_calls, 1);
    }

    #[test]
    fn accuracy_tracks_success_ratio() {
        let mut perf = ProviderPerformance::default();
        perf.record(true, Duration::from_millis(100), true);
        perf.record(false, Duration::from_millis(100), false);
        perf.record(true, Duration::from_millis(100), true);
        assert!((perf.accuracy - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(perf.total_calls, 3);
    }

    #[test]
    fn parse_prefers_json_then_lines_then_first_line() {
        let (json, structured) =
            parse_decision("Sure! {\"decision\": \"deploy\", \"confidence\": 0.9}");
        assert!(structured);
        assert_eq!(json.decision, "deploy");
        assert!((json.confidence - 0.9).abs() < 1e-6);

        let (lines, structured) =
            parse_decision("Decision: rollback\nConfidence: 0.4\nReasoning: the canary failed");
        assert!(structured);
        assert_eq!(lines.decision, "rollback");
        assert!((lines.confidence - 0.4).abs() < 1e-6);
        assert_eq!(lines.reasoning_chain.len(), 1);

        let (prose, structured) = parse_decision("just do the thing\nmore prose");
        assert!(!structured);
        assert_eq!(prose.decision, "just do the thing");
    }
}
