// Moderation gate: screens spell text before it may reach the judge.
//
// Only a fixed subset of categories block play. Plain violence and the
// illicit family are tolerated because the game is about fantasy combat.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::llm::{ModerationResult, ModerationService};
use crate::metrics;

/// Category name paired with whether it blocks a spell.
pub const RELEVANT_CATEGORIES: &[(&str, bool)] = &[
    ("harassment", true),
    ("harassment/threatening", true),
    ("sexual", true),
    ("hate", true),
    ("hate/threatening", true),
    ("illicit", false),
    ("illicit/violent", false),
    ("self-harm/intent", true),
    ("self-harm/instructions", true),
    ("self-harm", true),
    ("sexual/minors", true),
    ("violence", false),
    ("violence/graphic", true),
];

const MESSAGE_PREFIX: &str = "Your spell contains content that isn't appropriate for this game. ";
const MESSAGE_SUFFIX: &str =
    "Remember: effective spells are clear, creative, and target the creature's weakness!";

/// Guidance per category group, checked in order; the first group with a
/// flagged member supplies the message.
const GUIDANCE: &[(&[&str], &str)] = &[
    (
        &["harassment", "harassment/threatening"],
        "Try focusing on magical attacks against the creature rather than harmful language. ",
    ),
    (
        &["sexual", "sexual/minors"],
        "Keep your spells focused on fantasy combat and magical abilities. ",
    ),
    (
        &["hate", "hate/threatening"],
        "Use respectful language when describing your magical abilities. ",
    ),
    (
        &["self-harm/intent", "self-harm/instructions", "self-harm"],
        "Focus on casting spells against the creature, not harmful actions. ",
    ),
    (
        &["violence/graphic"],
        "Try describing magical effects rather than graphic violence. ",
    ),
];

const UNAVAILABLE_MESSAGE: &str =
    "Spell screening is unavailable right now, so spells cannot be cast. Please try again shortly.";

/// What to do when the moderation service cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationPolicy {
    #[default]
    FailOpen,
    FailClosed,
}

impl ModerationPolicy {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_open" | "open" => Some(Self::FailOpen),
            "fail_closed" | "closed" => Some(Self::FailClosed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationVerdict {
    Clear,
    Blocked {
        message: String,
        /// The blocking categories that were flagged, in relevance-map order.
        categories: Vec<String>,
    },
}

impl ModerationVerdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, ModerationVerdict::Blocked { .. })
    }
}

pub struct ModerationGate {
    service: Option<Arc<dyn ModerationService>>,
    policy: ModerationPolicy,
}

impl ModerationGate {
    pub fn new(service: Option<Arc<dyn ModerationService>>, policy: ModerationPolicy) -> Self {
        Self { service, policy }
    }

    pub fn policy(&self) -> ModerationPolicy {
        self.policy
    }

    /// Raw classification. An unavailable or unconfigured service yields an
    /// unflagged result.
    pub async fn check(&self, text: &str) -> ModerationResult {
        self.fetch(text).await.unwrap_or_default()
    }

    /// Classify and apply the relevance map and the unavailability policy.
    pub async fn screen(&self, text: &str) -> ModerationVerdict {
        match self.fetch(text).await {
            Some(result) => verdict(&result),
            None => match self.policy {
                ModerationPolicy::FailOpen => ModerationVerdict::Clear,
                ModerationPolicy::FailClosed => {
                    metrics::MODERATION_BLOCKS_TOTAL
                        .with_label_values(&["unavailable"])
                        .inc();
                    ModerationVerdict::Blocked {
                        message: UNAVAILABLE_MESSAGE.to_string(),
                        categories: Vec::new(),
                    }
                }
            },
        }
    }

    async fn fetch(&self, text: &str) -> Option<ModerationResult> {
        let service = match &self.service {
            Some(s) => s,
            None => {
                tracing::debug!("Moderation service not configured");
                return None;
            }
        };
        match service.moderate(text).await {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::warn!(policy = ?self.policy, "Content moderation error: {e}");
                None
            }
        }
    }
}

/// Blocking categories flagged in `result`, in relevance-map order.
pub fn blocking_categories(result: &ModerationResult) -> Vec<String> {
    RELEVANT_CATEGORIES
        .iter()
        .filter(|(name, blocks)| *blocks && result.categories.get(*name).copied().unwrap_or(false))
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Player-facing explanation for a set of blocking categories.
pub fn guidance_message(categories: &[String]) -> String {
    let mut message = String::from(MESSAGE_PREFIX);
    if let Some((_, hint)) = GUIDANCE
        .iter()
        .find(|(group, _)| categories.iter().any(|c| group.contains(&c.as_str())))
    {
        message.push_str(hint);
    }
    message.push_str(MESSAGE_SUFFIX);
    message
}

pub fn verdict(result: &ModerationResult) -> ModerationVerdict {
    if !result.flagged {
        return ModerationVerdict::Clear;
    }
    let categories = blocking_categories(result);
    if categories.is_empty() {
        tracing::debug!("Spell flagged only in tolerated categories");
        return ModerationVerdict::Clear;
    }
    tracing::info!(?categories, "Spell blocked by moderation");
    metrics::MODERATION_BLOCKS_TOTAL
        .with_label_values(&[categories[0].as_str()])
        .inc();
    ModerationVerdict::Blocked {
        message: guidance_message(&categories),
        categories,
    }
}
