// Healing classification: decides whether a spell is a self-heal or an attack.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::{extract_json_object, JudgeService};
use crate::metrics;

/// Word stems for healing verbs. A word matches when it is a stem followed by
/// one of `VERB_ENDINGS`, so "healing" and "recovery" count but "health",
/// "secure" and "tremendous" do not.
const HEALING_STEMS: &[&str] = &[
    "heal",
    "cur",
    "restor",
    "regenerat",
    "mend",
    "recover",
    "vitalit",
    "rejuvenat",
];
const VERB_ENDINGS: &[&str] = &[
    "", "e", "s", "es", "ed", "ing", "er", "ers", "y", "ies", "ion", "ation", "ative", "ive",
];

const SELF_WORDS: &[&str] = &["me", "myself"];
const SELF_PHRASES: &[&str] = &["my health", "my wounds", "my body"];
const TARGET_NOUNS: &[&str] = &[
    "creature", "enemy", "foe", "monster", "beast", "target", "opponent", "dragon", "golem",
    "serpent", "eagle", "wraith", "lion", "hound", "phantom", "guardian", "keeper", "oracle",
];

const CLASSIFIER_PROMPT: &str = r#"You classify spells in a fantasy battle game.
Decide whether the spell is meant to heal or restore the caster (a self-heal)
rather than attack or affect the creature.
Respond with ONLY a valid JSON object (no additional text) of the form:
{"isHealing": boolean}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealingClassification {
    pub is_healing: bool,
}

/// Which classifier the service wires up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealingStrategy {
    /// Ask the judge service, falling back to keywords when it fails.
    #[default]
    Auto,
    /// Keywords only, never leaves the process.
    Keyword,
}

impl HealingStrategy {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "llm" => Some(Self::Auto),
            "keyword" | "keywords" => Some(Self::Keyword),
            _ => None,
        }
    }
}

#[async_trait]
pub trait HealingClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> HealingClassification;
}

/// Permissive keyword heuristic: a healing verb plus either a self
/// reference or no mention of the opponent.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordHealingClassifier;

impl KeywordHealingClassifier {
    pub fn is_healing(text: &str) -> bool {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        let has_verb = words.iter().any(|w| is_healing_verb(w));
        if !has_verb {
            return false;
        }

        let mentions_self = words.iter().any(|w| SELF_WORDS.contains(w))
            || SELF_PHRASES.iter().any(|p| lower.contains(p));
        let mentions_target = words.iter().any(|w| {
            TARGET_NOUNS
                .iter()
                .any(|n| *w == *n || w.strip_suffix('s') == Some(*n))
        });

        mentions_self || !mentions_target
    }
}

fn is_healing_verb(word: &str) -> bool {
    HEALING_STEMS.iter().any(|stem| {
        word.strip_prefix(stem)
            .is_some_and(|ending| VERB_ENDINGS.contains(&ending))
    })
}

#[async_trait]
impl HealingClassifier for KeywordHealingClassifier {
    async fn classify(&self, text: &str) -> HealingClassification {
        HealingClassification {
            is_healing: Self::is_healing(text),
        }
    }
}

/// Asks the judge service a constrained yes/no question.
pub struct LlmHealingClassifier {
    service: Arc<dyn JudgeService>,
}

impl LlmHealingClassifier {
    pub fn new(service: Arc<dyn JudgeService>) -> Self {
        Self { service }
    }

    fn parse(reply: &str) -> Option<HealingClassification> {
        let value: serde_json::Value = serde_json::from_str(extract_json_object(reply)).ok()?;
        let is_healing = value.get("isHealing")?.as_bool()?;
        Some(HealingClassification { is_healing })
    }
}

#[async_trait]
impl HealingClassifier for LlmHealingClassifier {
    async fn classify(&self, text: &str) -> HealingClassification {
        let user = format!("Spell: \"{text}\"");
        match self.service.chat_json(CLASSIFIER_PROMPT, &user).await {
            Ok(reply) => {
                if let Some(c) = Self::parse(&reply) {
                    return c;
                }
                tracing::warn!(reply = %reply, "Malformed healing classification, using keywords");
            }
            Err(e) => {
                tracing::warn!("Healing classifier unavailable, using keywords: {e}");
            }
        }
        metrics::HEALING_FALLBACKS_TOTAL.inc();
        KeywordHealingClassifier.classify(text).await
    }
}

/// Build the classifier for a strategy. `Auto` without a service degrades to
/// keywords.
pub fn build_classifier(
    strategy: HealingStrategy,
    service: Option<Arc<dyn JudgeService>>,
) -> Arc<dyn HealingClassifier> {
    match (strategy, service) {
        (HealingStrategy::Auto, Some(service)) => Arc::new(LlmHealingClassifier::new(service)),
        _ => Arc::new(KeywordHealingClassifier),
    }
}
