// Spell judge: turns spell text into a structured judgment via the external
// judge service, validating its output and falling back to a random
// judgment when anything goes wrong. `evaluate` never fails.

use std::sync::Arc;
use std::time::Instant;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GameError;
use crate::healing::HealingClassifier;
use crate::llm::{extract_json_object, JudgeService, LlmError};
use crate::metrics;

pub const MAX_SPELL_CHARS: usize = 500;
pub const MAX_BOSS_PHASE: u8 = 3;

pub const MIN_HEALING: i32 = 10;
pub const MAX_HEALING: i32 = 50;

pub const FALLBACK_FEEDBACK: &str =
    "Unable to connect to AI evaluation service. This is a demo result.";

const SYSTEM_PROMPT: &str = r#"You are a helpful game master evaluating student prompts in an educational RPG about AI literacy. You are evaluating a magical spell cast by a student learning prompt engineering. Evaluate the spell's effectiveness based on:
1. Clarity and specificity of the instruction
2. How well it targets the creature's weakness
3. Appropriate tone and structure

Damage must follow effectiveness:
- effectiveness 1-3: damage 0-20
- effectiveness 4-6: damage 20-50
- effectiveness 7-8: damage 50-80
- effectiveness 9-10: damage 80-100

Respond with ONLY a valid JSON object (no additional text) containing:
{
  "effectiveness": number (1-10),
  "damage": number (0-100),
  "feedback": "Brief explanation of why it worked/didn't work",
  "success": boolean,
  "healing": number (0-50, only for self-healing spells)
}

Be encouraging but honest in your evaluation. Return only the JSON, nothing else."#;

/// A single spell submission against a creature's weakness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpellRequest {
    pub text: String,
    pub target_creature: String,
    pub target_weakness: String,
    #[serde(default)]
    pub is_boss_battle: bool,
    #[serde(default)]
    pub boss_phase: Option<u8>,
}

impl SpellRequest {
    /// Rejects requests that must never reach moderation or the judge.
    pub fn validate(&self) -> Result<(), GameError> {
        validate_spell_text(&self.text)?;
        if let Some(phase) = self.boss_phase {
            if !(1..=MAX_BOSS_PHASE).contains(&phase) {
                return Err(GameError::InvalidInput(format!(
                    "Boss phase must be between 1 and {MAX_BOSS_PHASE}"
                )));
            }
        }
        Ok(())
    }
}

pub fn validate_spell_text(text: &str) -> Result<(), GameError> {
    if text.trim().is_empty() {
        return Err(GameError::InvalidInput("Spell text is required".into()));
    }
    if text.chars().count() > MAX_SPELL_CHARS {
        return Err(GameError::InvalidInput(format!(
            "Spell must be {MAX_SPELL_CHARS} characters or less"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpellJudgment {
    pub effectiveness: i32,
    pub damage: i32,
    pub feedback: String,
    pub success: bool,
    #[serde(default)]
    pub healing: i32,
    #[serde(default)]
    pub moderated: bool,
}

impl SpellJudgment {
    /// Judgment standing in for a spell that moderation blocked.
    pub fn moderated(message: &str) -> Self {
        Self {
            effectiveness: 1,
            damage: 0,
            feedback: message.to_string(),
            success: false,
            healing: 0,
            moderated: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JudgeFailure {
    #[error(transparent)]
    Service(#[from] LlmError),
    #[error("Empty response from AI")]
    Empty,
    #[error("Invalid JSON response from AI: {0}")]
    Parse(String),
    #[error("Invalid response format - missing or mistyped field `{0}`")]
    Validation(&'static str),
}

impl JudgeFailure {
    fn reason(&self) -> &'static str {
        match self {
            JudgeFailure::Service(LlmError::NotConfigured) => "unconfigured",
            JudgeFailure::Service(_) => "service",
            JudgeFailure::Empty => "empty",
            JudgeFailure::Parse(_) => "parse",
            JudgeFailure::Validation(_) => "validation",
        }
    }
}

pub struct SpellJudge {
    service: Option<Arc<dyn JudgeService>>,
    healing: Arc<dyn HealingClassifier>,
}

impl SpellJudge {
    pub fn new(service: Option<Arc<dyn JudgeService>>, healing: Arc<dyn HealingClassifier>) -> Self {
        Self { service, healing }
    }

    pub async fn evaluate(&self, request: &SpellRequest) -> SpellJudgment {
        let is_healing = self.healing.classify(&request.text).await.is_healing;
        let user_prompt = build_user_prompt(request, is_healing);

        let judgment = match self.ask(&user_prompt).await {
            Ok(j) => j,
            Err(failure) => {
                tracing::warn!(
                    creature = %request.target_creature,
                    reason = failure.reason(),
                    "Spell judgment failed, using fallback: {failure}"
                );
                metrics::JUDGE_FALLBACKS_TOTAL
                    .with_label_values(&[failure.reason()])
                    .inc();
                fallback_judgment()
            }
        };

        let judgment = if is_healing {
            apply_healing(judgment)
        } else {
            judgment
        };

        let label = if judgment.healing > 0 && judgment.damage == 0 {
            "heal"
        } else if judgment.damage > 0 {
            "hit"
        } else {
            "fizzle"
        };
        metrics::SPELLS_CAST_TOTAL.with_label_values(&[label]).inc();
        judgment
    }

    async fn ask(&self, user_prompt: &str) -> Result<SpellJudgment, JudgeFailure> {
        let service = self.service.as_ref().ok_or(LlmError::NotConfigured)?;
        let started = Instant::now();
        let reply = service.chat(SYSTEM_PROMPT, user_prompt).await;
        metrics::JUDGE_REQUEST_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());
        parse_judgment(&reply?)
    }
}

pub fn build_user_prompt(request: &SpellRequest, is_healing: bool) -> String {
    let mut prompt = format!(
        "Creature: {}\nCreature's Weakness: {}\nStudent's Spell: \"{}\".",
        request.target_creature, request.target_weakness, request.text
    );
    if request.is_boss_battle {
        match request.boss_phase {
            Some(phase) => prompt.push_str(&format!(
                "\nThis is a boss battle, phase {phase} of {MAX_BOSS_PHASE}."
            )),
            None => prompt.push_str("\nThis is a boss battle."),
        }
        prompt.push_str(
            " Boss phases are resilient: only spells with effectiveness 7 or higher may deal high damage.",
        );
    }
    if is_healing {
        prompt.push_str(
            "\nThis spell is a self-healing spell. Damage must be 0; scale only the healing amount \
             (10-50) with the spell's creativity and clarity.",
        );
    }
    prompt
}

/// Parse and validate a judge reply. Numeric fields are rounded and clamped
/// to their declared ranges.
pub fn parse_judgment(reply: &str) -> Result<SpellJudgment, JudgeFailure> {
    if reply.trim().is_empty() {
        return Err(JudgeFailure::Empty);
    }
    let value: Value = serde_json::from_str(extract_json_object(reply))
        .map_err(|e| JudgeFailure::Parse(e.to_string()))?;

    let effectiveness = value
        .get("effectiveness")
        .and_then(Value::as_f64)
        .ok_or(JudgeFailure::Validation("effectiveness"))?;
    let damage = value
        .get("damage")
        .and_then(Value::as_f64)
        .ok_or(JudgeFailure::Validation("damage"))?;
    let feedback = value
        .get("feedback")
        .and_then(Value::as_str)
        .ok_or(JudgeFailure::Validation("feedback"))?;
    let success = value
        .get("success")
        .and_then(Value::as_bool)
        .ok_or(JudgeFailure::Validation("success"))?;
    let healing = value.get("healing").and_then(Value::as_f64).unwrap_or(0.0);

    Ok(SpellJudgment {
        effectiveness: clamp_round(effectiveness, 1, 10),
        damage: clamp_round(damage, 0, 100),
        feedback: feedback.to_string(),
        success,
        healing: clamp_round(healing, 0, MAX_HEALING),
        moderated: false,
    })
}

fn clamp_round(v: f64, min: i32, max: i32) -> i32 {
    if v.is_nan() {
        return min;
    }
    (v.round().clamp(min as f64, max as f64)) as i32
}

/// Force a judgment into healing shape: no damage, healing within bounds.
pub fn apply_healing(mut judgment: SpellJudgment) -> SpellJudgment {
    judgment.damage = 0;
    judgment.healing = if judgment.healing <= 0 {
        (judgment.effectiveness * 5).clamp(MIN_HEALING, MAX_HEALING)
    } else {
        judgment.healing.clamp(MIN_HEALING, MAX_HEALING)
    };
    judgment
        .feedback
        .push_str(&format!(" You restored {} health!", judgment.healing));
    judgment
}

pub fn fallback_judgment() -> SpellJudgment {
    fallback_judgment_with(&mut rand::thread_rng())
}

pub fn fallback_judgment_with<R: Rng>(rng: &mut R) -> SpellJudgment {
    SpellJudgment {
        effectiveness: rng.gen_range(1..=10),
        damage: rng.gen_range(0..=100),
        feedback: FALLBACK_FEEDBACK.to_string(),
        success: rng.gen_bool(0.5),
        healing: 0,
        moderated: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::healing::{HealingClassification, KeywordHealingClassifier};
    use async_trait::async_trait;
    use rand::SeedableRng;
    use std::sync::Mutex;

    struct Scripted {
        reply: Result<String, ()>,
        seen: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn ok(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err(()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl JudgeService for Scripted {
        async fn chat(&self, _system: &str, user: &str) -> Result<String, LlmError> {
            self.seen.lock().unwrap().push(user.to_string());
            self.reply
                .clone()
                .map_err(|_| LlmError::RequestFailed("timed out".into()))
        }
    }

    struct AlwaysHealing;

    #[async_trait]
    impl HealingClassifier for AlwaysHealing {
        async fn classify(&self, _text: &str) -> HealingClassification {
            HealingClassification { is_healing: true }
        }
    }

    fn dragon_request(text: &str) -> SpellRequest {
        SpellRequest {
            text: text.to_string(),
            target_creature: "Fire Dragon".into(),
            target_weakness: "ice and water magic".into(),
            is_boss_battle: false,
            boss_phase: None,
        }
    }

    fn assert_fallback_shape(j: &SpellJudgment) {
        assert!((1..=10).contains(&j.effectiveness));
        assert!((0..=100).contains(&j.damage));
        assert_eq!(j.feedback, FALLBACK_FEEDBACK);
        assert!(!j.moderated);
    }

    #[test]
    fn test_validate_spell_text() {
        assert!(validate_spell_text("Ice!").is_ok());
        assert!(validate_spell_text("   \n").is_err());
        assert!(validate_spell_text("").is_err());
        assert!(validate_spell_text(&"a".repeat(500)).is_ok());
        let err = validate_spell_text(&"a".repeat(501)).unwrap_err();
        assert_eq!(err.to_string(), "Spell must be 500 characters or less");
        // Counted in characters, not bytes.
        assert!(validate_spell_text(&"❄".repeat(500)).is_ok());
    }

    #[test]
    fn test_validate_boss_phase() {
        let mut req = dragon_request("ice");
        req.boss_phase = Some(4);
        assert!(req.validate().is_err());
        req.boss_phase = Some(3);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_parse_judgment_with_surrounding_prose() {
        let reply = "Here you go:\n{\"effectiveness\": 9, \"damage\": 85, \"feedback\": \"Great\", \"success\": true}\nThanks";
        let j = parse_judgment(reply).unwrap();
        assert_eq!(j.effectiveness, 9);
        assert_eq!(j.damage, 85);
        assert_eq!(j.feedback, "Great");
        assert!(j.success);
        assert_eq!(j.healing, 0);
        assert!(!j.moderated);
    }

    #[test]
    fn test_parse_judgment_rejects_mistyped_fields() {
        let bad_success = r#"{"effectiveness":5,"damage":30,"feedback":"ok","success":"yes"}"#;
        assert!(matches!(
            parse_judgment(bad_success),
            Err(JudgeFailure::Validation("success"))
        ));
        let missing_damage = r#"{"effectiveness":5,"feedback":"ok","success":true}"#;
        assert!(matches!(
            parse_judgment(missing_damage),
            Err(JudgeFailure::Validation("damage"))
        ));
        assert!(matches!(parse_judgment("not json"), Err(JudgeFailure::Parse(_))));
        assert!(matches!(parse_judgment("   "), Err(JudgeFailure::Empty)));
    }

    #[test]
    fn test_parse_judgment_clamps_ranges() {
        let reply = r#"{"effectiveness":14,"damage":-5,"feedback":"x","success":true,"healing":90}"#;
        let j = parse_judgment(reply).unwrap();
        assert_eq!(j.effectiveness, 10);
        assert_eq!(j.damage, 0);
        assert_eq!(j.healing, 50);
    }

    #[test]
    fn test_non_numeric_healing_defaults_to_zero() {
        let reply = r#"{"effectiveness":4,"damage":25,"feedback":"x","success":false,"healing":"lots"}"#;
        assert_eq!(parse_judgment(reply).unwrap().healing, 0);
    }

    #[test]
    fn test_apply_healing_derives_and_clamps() {
        let base = SpellJudgment {
            effectiveness: 8,
            damage: 70,
            feedback: "Nice".into(),
            success: true,
            healing: 0,
            moderated: false,
        };
        let healed = apply_healing(base.clone());
        assert_eq!(healed.damage, 0);
        assert_eq!(healed.healing, 40);
        assert_eq!(healed.feedback, "Nice You restored 40 health!");

        let weak = apply_healing(SpellJudgment {
            effectiveness: 1,
            ..base.clone()
        });
        assert_eq!(weak.healing, 10);

        let explicit = apply_healing(SpellJudgment {
            healing: 3,
            ..base
        });
        assert_eq!(explicit.healing, 10);
    }

    #[test]
    fn test_fallback_judgment_ranges() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..200 {
            assert_fallback_shape(&fallback_judgment_with(&mut rng));
        }
    }

    #[test]
    fn test_user_prompt_directives() {
        let mut req = dragon_request("I summon a blizzard of ice shards");
        let plain = build_user_prompt(&req, false);
        assert!(plain.contains("Creature: Fire Dragon"));
        assert!(plain.contains("ice and water magic"));
        assert!(plain.contains("\"I summon a blizzard of ice shards\""));
        assert!(!plain.contains("boss battle"));
        assert!(!plain.contains("self-healing"));

        req.is_boss_battle = true;
        req.boss_phase = Some(2);
        let boss = build_user_prompt(&req, true);
        assert!(boss.contains("phase 2 of 3"));
        assert!(boss.contains("effectiveness 7 or higher"));
        assert!(boss.contains("Damage must be 0"));
    }

    #[tokio::test]
    async fn test_evaluate_happy_path() {
        let service = Scripted::ok(
            r#"{"effectiveness":9,"damage":85,"feedback":"Ice beats fire","success":true}"#,
        );
        let judge = SpellJudge::new(Some(service.clone()), Arc::new(KeywordHealingClassifier));
        let j = judge
            .evaluate(&dragon_request("I summon a blizzard of ice shards"))
            .await;
        assert_eq!(j.effectiveness, 9);
        assert_eq!(j.damage, 85);
        assert_eq!(j.healing, 0);
        assert_eq!(service.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_evaluate_service_failure_falls_back() {
        let service = Scripted::failing();
        let judge = SpellJudge::new(Some(service.clone()), Arc::new(KeywordHealingClassifier));
        let j = judge.evaluate(&dragon_request("Frost nova")).await;
        assert_fallback_shape(&j);
        // No retry.
        assert_eq!(service.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_evaluate_unconfigured_falls_back() {
        let judge = SpellJudge::new(None, Arc::new(KeywordHealingClassifier));
        assert_fallback_shape(&judge.evaluate(&dragon_request("Frost nova")).await);
    }

    #[tokio::test]
    async fn test_evaluate_healing_forces_zero_damage() {
        let service =
            Scripted::ok(r#"{"effectiveness":6,"damage":55,"feedback":"Soothing","success":true}"#);
        let judge = SpellJudge::new(Some(service.clone()), Arc::new(AlwaysHealing));
        let j = judge.evaluate(&dragon_request("Warm light")).await;
        assert_eq!(j.damage, 0);
        assert_eq!(j.healing, 30);
        assert!(service.seen.lock().unwrap()[0].contains("self-healing"));
    }

    #[tokio::test]
    async fn test_evaluate_healing_fallback_keeps_invariant() {
        let judge = SpellJudge::new(None, Arc::new(AlwaysHealing));
        for _ in 0..20 {
            let j = judge.evaluate(&dragon_request("Warm light")).await;
            assert_eq!(j.damage, 0);
            assert!((MIN_HEALING..=MAX_HEALING).contains(&j.healing));
        }
    }
}
