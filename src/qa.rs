//! QA engine: rule-based checks, then a model-assisted semantic check.
//!
//! [`QaEngine::evaluate`] runs a deterministic rule set specific to the
//! chunk's type first — placeholder detection, minimum content, structural
//! and numeric sanity, brand and topic contamination. Rule failures are
//! authoritative and skip the model check entirely. Only when the rules are
//! inconclusive does the engine consult the [`ModelChecker`], a swappable
//! capability so the state machine is independent of which evaluator is
//! wired in.
//!
//! The engine never throws on malformed chunk data: a missing payload, a
//! wrong JSON shape, or an out-of-range number is a `fail` verdict, not an
//! error.

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use crate::config::QaConfig;
use crate::models::{Chunk, ChunkType};
use crate::vehicle::make_of;

/// Outcome of one QA evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QaOutcome {
    Pass,
    Fail,
}

/// The QA engine's answer for one chunk.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub outcome: QaOutcome,
    /// Always human-readable; a failing verdict explains itself.
    pub notes: String,
    /// Optional guidance handed back to the generator for a bounded retry.
    pub repair_hint: Option<String>,
}

impl Verdict {
    pub fn pass(notes: impl Into<String>) -> Self {
        Self {
            outcome: QaOutcome::Pass,
            notes: notes.into(),
            repair_hint: None,
        }
    }

    pub fn fail(notes: impl Into<String>, repair_hint: Option<String>) -> Self {
        Self {
            outcome: QaOutcome::Fail,
            notes: notes.into(),
            repair_hint,
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome == QaOutcome::Pass
    }
}

/// Model-assisted semantic checker, consulted only when rules pass.
#[async_trait]
pub trait ModelChecker: Send + Sync {
    /// Checker name, for audit notes.
    fn name(&self) -> &str;

    /// Judge semantic plausibility of a chunk. Transport failures are the
    /// engine's problem; implementations just return them.
    async fn check(&self, chunk: &Chunk) -> anyhow::Result<Verdict>;
}

/// Instantiate the checker named by the configuration.
pub fn create_checker(config: &QaConfig) -> anyhow::Result<std::sync::Arc<dyn ModelChecker>> {
    match config.checker.as_str() {
        "disabled" => Ok(std::sync::Arc::new(DisabledChecker)),
        "openrouter" => Ok(std::sync::Arc::new(OpenRouterChecker::new(config)?)),
        other => anyhow::bail!("Unknown QA checker: '{}'", other),
    }
}

/// Placeholder phrases that mark generated filler instead of facts.
const PLACEHOLDER_TERMS: [&str; 6] = [
    "see manual",
    "refer to manual",
    "consult dealer",
    "data not available",
    "coming soon",
    "lorem ipsum",
];

/// Brand-specific terms that should not appear in another make's chunk.
const BRAND_TERMS: [(&str, &[&str]); 6] = [
    ("ford", &["motorcraft", "f-150", "f150", "mustang", "expedition"]),
    ("chevrolet", &["acdelco", "silverado", "camaro", "corvette", "equinox"]),
    ("chevy", &["acdelco", "silverado", "camaro", "corvette", "equinox"]),
    ("toyota", &["camry", "corolla", "rav4", "tacoma", "tundra"]),
    ("honda", &["civic", "accord", "cr-v", "pilot", "odyssey"]),
    ("bmw", &["bimmer", "beemer", "x3", "x5", "3-series"]),
];

/// Expected vocabulary per topic, keyed on the content id.
const TOPIC_KEYWORDS: [(&str, &[&str]); 5] = [
    ("oil", &["oil", "drain", "filter", "viscosity", "quart", "liter"]),
    ("brake", &["brake", "pad", "rotor", "caliper", "fluid", "bleed"]),
    ("coolant", &["coolant", "radiator", "antifreeze", "thermostat", "pump"]),
    ("transmission", &["transmission", "fluid", "gear", "shift", "clutch"]),
    ("spark", &["spark", "plug", "gap", "coil", "ignition"]),
];

/// Shortest serialized payload that could plausibly carry a fact.
const MIN_CONTENT_LEN: usize = 20;

/// QA engine with a pluggable model-assisted checker.
pub struct QaEngine {
    checker: std::sync::Arc<dyn ModelChecker>,
}

impl QaEngine {
    pub fn new(checker: std::sync::Arc<dyn ModelChecker>) -> Self {
        Self { checker }
    }

    /// Evaluate one chunk. Infallible by design: every malformed input maps
    /// to a failing verdict.
    pub async fn evaluate(&self, chunk: &Chunk) -> Verdict {
        if let Some(fail) = check_rules(chunk) {
            return fail;
        }

        match self.checker.check(chunk).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(
                    chunk_id = %chunk.id,
                    checker = self.checker.name(),
                    error = %e,
                    "model check unavailable"
                );
                if chunk.chunk_type.is_safety_critical() {
                    // Safety-critical content fails closed: a transport
                    // error must not be the thing that promotes a torque spec.
                    Verdict::fail(
                        format!(
                            "model check unavailable for safety-critical chunk ({})",
                            e
                        ),
                        None,
                    )
                } else {
                    Verdict::pass(format!("rules passed; model check skipped ({})", e))
                }
            }
        }
    }
}

/// Run the deterministic rule set. `Some` is an authoritative failure;
/// `None` means inconclusive — hand over to the model check.
fn check_rules(chunk: &Chunk) -> Option<Verdict> {
    if chunk.data.is_null() || chunk.content_text.trim().is_empty() {
        return Some(Verdict::fail(
            "Rule violation: content missing or never generated",
            Some("regenerate with complete content and sources".to_string()),
        ));
    }

    if !chunk.data.is_object() {
        return Some(Verdict::fail(
            "Rule violation: structured payload is not an object",
            Some("emit 'data' as a JSON object matching the chunk type".to_string()),
        ));
    }

    let serialized = chunk.data.to_string().to_lowercase();

    for term in PLACEHOLDER_TERMS {
        if serialized.contains(term) {
            return Some(Verdict::fail(
                format!("Rule violation: placeholder term '{}' detected", term),
                Some("replace placeholder text with sourced facts".to_string()),
            ));
        }
    }

    if serialized.len() < MIN_CONTENT_LEN {
        return Some(Verdict::fail(
            "Rule violation: content too short or empty",
            Some("regenerate with complete content".to_string()),
        ));
    }

    if let Some(fail) = check_structure(chunk) {
        return Some(fail);
    }

    if let Some(fail) = check_brand_contamination(chunk, &serialized) {
        return Some(fail);
    }

    if let Some(fail) = check_topic_contamination(chunk, &serialized) {
        return Some(fail);
    }

    None
}

/// Per-type structural and numeric sanity.
fn check_structure(chunk: &Chunk) -> Option<Verdict> {
    match chunk.chunk_type {
        ChunkType::TorqueSpec => {
            let items = chunk.data.get("spec_items").and_then(|v| v.as_array());
            let items = match items {
                Some(items) if !items.is_empty() => items,
                _ => {
                    return Some(Verdict::fail(
                        "Rule violation: torque spec missing 'spec_items'",
                        Some("emit data.spec_items as a non-empty array".to_string()),
                    ))
                }
            };
            for item in items {
                let value = item
                    .get("ft_lb")
                    .or_else(|| item.get("nm"))
                    .and_then(|v| v.as_f64());
                match value {
                    Some(v) if v > 0.0 && v <= 1000.0 => {}
                    Some(v) => {
                        return Some(Verdict::fail(
                            format!("Rule violation: torque value {} out of sane range", v),
                            Some("re-check the fastener torque against the service manual".to_string()),
                        ))
                    }
                    None => {
                        return Some(Verdict::fail(
                            "Rule violation: torque item missing numeric ft_lb/nm",
                            Some("every spec item needs a numeric ft_lb or nm".to_string()),
                        ))
                    }
                }
            }
            None
        }
        ChunkType::FluidCapacity => {
            let capacity = ["capacity_quarts", "capacity_liters", "capacity"]
                .iter()
                .find_map(|k| chunk.data.get(*k))
                .and_then(|v| v.as_f64());
            match capacity {
                Some(v) if v > 0.0 && v <= 60.0 => None,
                Some(v) => Some(Verdict::fail(
                    format!("Rule violation: fluid capacity {} out of sane range", v),
                    Some("re-check the capacity against the service manual".to_string()),
                )),
                None => Some(Verdict::fail(
                    "Rule violation: fluid capacity missing numeric capacity field",
                    Some("emit data.capacity_quarts or data.capacity_liters".to_string()),
                )),
            }
        }
        ChunkType::LaborTime => {
            match chunk.data.get("hours").and_then(|v| v.as_f64()) {
                Some(v) if v > 0.0 && v <= 120.0 => None,
                Some(v) => Some(Verdict::fail(
                    format!("Rule violation: labor time {}h out of sane range", v),
                    None,
                )),
                None => Some(Verdict::fail(
                    "Rule violation: labor time missing numeric 'hours'",
                    Some("emit data.hours as book time in hours".to_string()),
                )),
            }
        }
        _ => None,
    }
}

/// Flag terms belonging to a different make than the vehicle key's.
fn check_brand_contamination(chunk: &Chunk, serialized: &str) -> Option<Verdict> {
    let make = make_of(&chunk.vehicle_key)?;
    for (brand, terms) in BRAND_TERMS {
        if brand == make {
            continue;
        }
        for term in terms {
            if contains_word(serialized, term) {
                return Some(Verdict::fail(
                    format!(
                        "Rule violation: mismatched brand term '{}' found in {} chunk",
                        term, make
                    ),
                    Some(format!("remove {}-specific content", brand)),
                ));
            }
        }
    }
    None
}

/// An "oil" chunk that talks about brakes and never about oil is about the
/// wrong thing: two or more foreign-topic keywords with zero expected ones
/// is an authoritative failure.
fn check_topic_contamination(chunk: &Chunk, serialized: &str) -> Option<Verdict> {
    let content_id = chunk.content_id.to_lowercase();
    for (topic, keywords) in TOPIC_KEYWORDS {
        if !content_id.contains(topic) {
            continue;
        }
        let current_matches = keywords.iter().filter(|k| serialized.contains(*k)).count();
        for (other_topic, other_keywords) in TOPIC_KEYWORDS {
            if other_topic == topic {
                continue;
            }
            let other_matches = other_keywords
                .iter()
                .filter(|k| serialized.contains(*k))
                .count();
            if other_matches >= 2 && current_matches == 0 {
                return Some(Verdict::fail(
                    format!(
                        "Rule violation: topic mismatch, chunk '{}' appears to be about '{}'",
                        chunk.content_id, other_topic
                    ),
                    Some(format!("regenerate content about '{}'", topic)),
                ));
            }
        }
    }
    None
}

/// Substring match at word boundaries, so "camry" doesn't fire inside an
/// unrelated token.
fn contains_word(haystack: &str, needle: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let abs = start + pos;
        let before_ok = abs == 0
            || !haystack.as_bytes()[abs - 1].is_ascii_alphanumeric();
        let end = abs + needle.len();
        let after_ok =
            end >= haystack.len() || !haystack.as_bytes()[end].is_ascii_alphanumeric();
        if before_ok && after_ok {
            return true;
        }
        start = abs + 1;
    }
    false
}

// ============ Disabled Checker ============

/// A checker that is never available. Non-critical chunks then pass on rules
/// alone; safety-critical ones fail closed.
pub struct DisabledChecker;

#[async_trait]
impl ModelChecker for DisabledChecker {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn check(&self, _chunk: &Chunk) -> anyhow::Result<Verdict> {
        anyhow::bail!("QA checker is disabled")
    }
}

// ============ OpenRouter Checker ============

/// Model-assisted checker backed by an OpenRouter-compatible chat API.
pub struct OpenRouterChecker {
    model: String,
    base_url: String,
    request_timeout: std::time::Duration,
}

impl OpenRouterChecker {
    pub fn new(config: &QaConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("qa.model required for OpenRouter checker"))?;

        if std::env::var("OPENROUTER_API_KEY").is_err() {
            anyhow::bail!("OPENROUTER_API_KEY environment variable not set");
        }

        Ok(Self {
            model,
            base_url: config.base_url.clone(),
            request_timeout: std::time::Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl ModelChecker for OpenRouterChecker {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn check(&self, chunk: &Chunk) -> anyhow::Result<Verdict> {
        let api_key = std::env::var("OPENROUTER_API_KEY")?;
        let client = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()?;

        let prompt = json!({
            "task": "QA_VERIFICATION",
            "vehicle": chunk.vehicle_key,
            "chunk_type": chunk.chunk_type.as_str(),
            "content": chunk.data,
            "instructions": [
                "Verify that the content matches the vehicle and chunk type.",
                "Check for hallucinations (wrong engine, wrong specs).",
                "Check for formatting issues.",
                "Return JSON only with 'status' (pass/fail), 'notes', and optional 'repair_hint'."
            ]
        });

        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are a strict automotive QA agent. Output JSON only."},
                {"role": "user", "content": prompt.to_string()}
            ],
            "response_format": {"type": "json_object"}
        });

        let resp = client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let payload: serde_json::Value = resp.json().await?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("empty checker completion"))?;
        let parsed: serde_json::Value = serde_json::from_str(content)?;

        let status = parsed["status"].as_str().unwrap_or("fail");
        let notes = parsed["notes"]
            .as_str()
            .unwrap_or("model verification gave no notes")
            .to_string();

        if status.eq_ignore_ascii_case("pass") {
            Ok(Verdict::pass(notes))
        } else {
            let hint = parsed["repair_hint"].as_str().map(|s| s.to_string());
            Ok(Verdict::fail(notes, hint))
        }
    }
}
