// Per-player sessions: the active battle, persisted progression, and the
// turn pipeline (validate → moderate → judge → apply → record → save).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

use serde::Serialize;

use crate::battle::{victory_score, BattleState, GameState, TurnOutcome};
use crate::catalog::Catalog;
use crate::db::Database;
use crate::error::GameError;
use crate::judge::{validate_spell_text, SpellJudge, SpellJudgment};
use crate::metrics;
use crate::moderation::{ModerationGate, ModerationVerdict};
use crate::progression::{
    Achievement, ProgressStats, ProgressionState, ProgressionTracker, SpellRecord, StageCompletion,
    WorldView,
};

const IMPROVEMENT_TIPS: &[&str] = &[
    "Being more specific about your magical technique",
    "Directly targeting the creature's weakness",
    "Adding more detail to your spell description",
];

/// Current battle as seen by a client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleView {
    pub state: GameState,
    pub battle: Option<BattleState>,
    pub current_weakness: Option<String>,
    pub boss_phase: Option<u8>,
    pub turn_in_flight: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressView {
    pub progression: ProgressionState,
    pub stats: ProgressStats,
    pub achievements: Vec<Achievement>,
    pub available_stages: Vec<String>,
}

/// Everything one cast did, for the result panel.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnReport {
    pub spell: String,
    pub evaluation: SpellJudgment,
    pub headline: &'static str,
    pub tips: Vec<&'static str>,
    pub outcome: TurnOutcome,
    pub state: GameState,
    pub battle: BattleState,
    pub score_awarded: i32,
    pub score: i32,
    pub stage_completions: Vec<StageCompletion>,
}

pub fn headline(judgment: &SpellJudgment, state: GameState) -> &'static str {
    if state == GameState::Victory {
        "Victory!"
    } else if judgment.healing > 0 && judgment.damage == 0 {
        "Healing Spell"
    } else if judgment.success && judgment.damage > 70 {
        "Critical Hit!"
    } else if judgment.success && judgment.damage > 30 {
        "Direct Hit!"
    } else if judgment.damage > 0 {
        "Glancing Blow"
    } else {
        "Spell Fizzled"
    }
}

pub fn improvement_tips(judgment: &SpellJudgment) -> Vec<&'static str> {
    if judgment.effectiveness <= 3 {
        IMPROVEMENT_TIPS.to_vec()
    } else {
        Vec::new()
    }
}

struct PlayerSession {
    progression: ProgressionState,
    /// Held while progression is being persisted or the battle replaced,
    /// so snapshots reach the database in the order they were taken.
    writes: Arc<tokio::sync::Mutex<()>>,
    battle: Option<BattleState>,
    /// Bumped whenever the battle is replaced or reset.
    epoch: u64,
    /// Epoch of the cast currently awaiting services.
    casting: Option<u64>,
}

impl PlayerSession {
    fn new(progression: ProgressionState) -> Self {
        Self {
            progression,
            writes: Arc::new(tokio::sync::Mutex::new(())),
            battle: None,
            epoch: 0,
            casting: None,
        }
    }

    fn view(&self) -> BattleView {
        BattleView {
            state: self
                .battle
                .as_ref()
                .map(|b| b.status)
                .unwrap_or(GameState::Selection),
            current_weakness: self.battle.as_ref().map(|b| b.current_weakness().to_string()),
            boss_phase: self.battle.as_ref().and_then(|b| b.boss_phase()),
            battle: self.battle.clone(),
            turn_in_flight: self.casting.is_some(),
        }
    }

    /// Drop the current encounter so any in-flight turn is discarded.
    fn invalidate(&mut self) {
        self.epoch += 1;
        self.casting = None;
    }

    fn set_battle(&mut self, battle: Option<BattleState>) {
        match (self.battle.is_some(), battle.is_some()) {
            (false, true) => metrics::ACTIVE_BATTLES.inc(),
            (true, false) => metrics::ACTIVE_BATTLES.dec(),
            _ => {}
        }
        self.battle = battle;
    }
}

/// Services a turn needs besides the session store.
pub struct TurnServices {
    pub judge: SpellJudge,
    pub moderation: ModerationGate,
}

/// Thread-safe session store backed by the progression table.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Mutex<HashMap<String, PlayerSession>>>,
    db: Arc<Database>,
    services: Arc<TurnServices>,
    catalog: &'static Catalog,
    max_player_health: i32,
    debug_tools: bool,
}

/// Clears the in-flight marker if the cast ends without applying.
struct CastGuard<'a> {
    inner: &'a Mutex<HashMap<String, PlayerSession>>,
    player_id: &'a str,
    epoch: u64,
}

impl Drop for CastGuard<'_> {
    fn drop(&mut self) {
        let mut sessions = self.inner.lock().unwrap();
        if let Some(session) = sessions.get_mut(self.player_id) {
            if session.casting == Some(self.epoch) {
                session.casting = None;
                if let Some(battle) = session.battle.as_mut() {
                    battle.abort_cast();
                }
            }
        }
    }
}

impl SessionManager {
    pub fn new(
        db: Arc<Database>,
        services: Arc<TurnServices>,
        catalog: &'static Catalog,
        max_player_health: i32,
        debug_tools: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            db,
            services,
            catalog,
            max_player_health,
            debug_tools,
        }
    }

    pub fn services(&self) -> &TurnServices {
        &self.services
    }

    pub fn debug_tools_enabled(&self) -> bool {
        self.debug_tools
    }

    pub async fn create_player(&self) -> Result<String, GameError> {
        let player_id = uuid::Uuid::new_v4().to_string();
        self.db.create_player(&player_id).await?;
        self.inner.lock().unwrap().insert(
            player_id.clone(),
            PlayerSession::new(ProgressionState::default()),
        );
        tracing::info!(player_id = %player_id, "Player created");
        Ok(player_id)
    }

    /// Make sure the player's session is in memory, loading it on first use.
    async fn ensure_loaded(&self, player_id: &str) -> Result<(), GameError> {
        if self.inner.lock().unwrap().contains_key(player_id) {
            return Ok(());
        }
        if !self.db.player_exists(player_id).await? {
            return Err(GameError::NotFound(format!("Player {player_id} not found")));
        }
        let progression = self.db.load_progression(player_id).await?;
        self.inner
            .lock()
            .unwrap()
            .entry(player_id.to_string())
            .or_insert_with(|| PlayerSession::new(progression));
        Ok(())
    }

    async fn write_lock(&self, player_id: &str) -> Result<OwnedMutexGuard<()>, GameError> {
        let writes = self.with_session(player_id, |s| Ok(s.writes.clone()))?;
        Ok(writes.lock_owned().await)
    }

    fn with_session<T>(
        &self,
        player_id: &str,
        f: impl FnOnce(&mut PlayerSession) -> Result<T, GameError>,
    ) -> Result<T, GameError> {
        let mut sessions = self.inner.lock().unwrap();
        let session = sessions
            .get_mut(player_id)
            .ok_or_else(|| GameError::NotFound(format!("Player {player_id} not found")))?;
        f(session)
    }

    // ── Progression views ─────────────────────────────────────────────

    pub async fn progress(&self, player_id: &str) -> Result<ProgressView, GameError> {
        self.ensure_loaded(player_id).await?;
        let catalog = self.catalog;
        self.with_session(player_id, |s| {
            let tracker = ProgressionTracker::new(catalog, s.progression.clone());
            Ok(ProgressView {
                stats: tracker.stats(),
                achievements: tracker.achievements(),
                available_stages: tracker.available_stage_ids(),
                progression: tracker.into_state(),
            })
        })
    }

    pub async fn world_map(&self, player_id: &str) -> Result<Vec<WorldView>, GameError> {
        self.ensure_loaded(player_id).await?;
        let catalog = self.catalog;
        self.with_session(player_id, |s| {
            Ok(ProgressionTracker::new(catalog, s.progression.clone()).world_map())
        })
    }

    // ── Battle lifecycle ──────────────────────────────────────────────

    pub async fn battle(&self, player_id: &str) -> Result<BattleView, GameError> {
        self.ensure_loaded(player_id).await?;
        self.with_session(player_id, |s| Ok(s.view()))
    }

    /// Selection → Ready against `creature_id`. Replaces any current battle.
    pub async fn select_creature(
        &self,
        player_id: &str,
        creature_id: &str,
    ) -> Result<BattleView, GameError> {
        self.ensure_loaded(player_id).await?;
        let catalog = self.catalog;
        let creature = catalog
            .creature(creature_id)
            .ok_or_else(|| GameError::NotFound(format!("Creature {creature_id} not found")))?;
        let stage = catalog
            .stage_of_creature(creature_id)
            .ok_or_else(|| GameError::Internal(format!("Creature {creature_id} has no stage")))?;
        let max_player_health = self.max_player_health;
        let _write = self.write_lock(player_id).await?;

        self.with_session(player_id, |s| {
            let tracker = ProgressionTracker::new(catalog, s.progression.clone());
            if !tracker.is_stage_unlocked(&stage.id) && !tracker.is_stage_completed(&stage.id) {
                return Err(GameError::Forbidden(format!("{} is still locked", stage.name)));
            }
            s.invalidate();
            s.set_battle(Some(BattleState::new(creature.clone(), max_player_health)));
            metrics::BATTLES_STARTED_TOTAL.inc();
            tracing::info!(player_id, creature = %creature.id, "Battle started");
            Ok(s.view())
        })
    }

    /// Restart the current encounter at full health.
    pub async fn reset_battle(&self, player_id: &str) -> Result<BattleView, GameError> {
        self.ensure_loaded(player_id).await?;
        let _write = self.write_lock(player_id).await?;
        self.with_session(player_id, |s| {
            let Some(battle) = s.battle.as_mut() else {
                return Err(GameError::Conflict("No creature selected".into()));
            };
            battle.reset();
            s.invalidate();
            metrics::BATTLES_STARTED_TOTAL.inc();
            Ok(s.view())
        })
    }

    /// Return to creature selection.
    pub async fn leave_battle(&self, player_id: &str) -> Result<BattleView, GameError> {
        self.ensure_loaded(player_id).await?;
        let _write = self.write_lock(player_id).await?;
        self.with_session(player_id, |s| {
            s.invalidate();
            s.set_battle(None);
            Ok(s.view())
        })
    }

    // ── Casting ───────────────────────────────────────────────────────

    /// Play one turn. Invalid text is rejected before any service call;
    /// a blocked spell never reaches the judge; a result that arrives
    /// after the battle was reset or left is discarded.
    pub async fn cast(&self, player_id: &str, spell: &str) -> Result<TurnReport, GameError> {
        validate_spell_text(spell)?;
        self.ensure_loaded(player_id).await?;

        let (request, epoch) = self.with_session(player_id, |s| {
            if s.casting.is_some() {
                return Err(GameError::Conflict("A spell is already being cast".into()));
            }
            let epoch = s.epoch;
            let battle = s
                .battle
                .as_mut()
                .ok_or_else(|| GameError::Conflict("No creature selected".into()))?;
            battle.begin_cast()?;
            s.casting = Some(epoch);
            Ok((battle.spell_request(spell), epoch))
        })?;
        let _guard = CastGuard {
            inner: &*self.inner,
            player_id,
            epoch,
        };

        if let ModerationVerdict::Blocked {
            message,
            categories,
        } = self.services.moderation.screen(spell).await
        {
            return Err(GameError::ModerationBlocked {
                message,
                categories,
            });
        }

        let judgment = self.services.judge.evaluate(&request).await;

        // The turn is worked out on copies and only committed once the
        // progression snapshot is stored.
        let _write = self.write_lock(player_id).await?;
        let catalog = self.catalog;
        let (report, battle, progression) = self.with_session(player_id, |s| {
            if s.epoch != epoch {
                tracing::info!(player_id, "Battle changed mid-cast, discarding judgment");
                return Err(GameError::Conflict(
                    "The battle changed while the spell was being cast; result discarded".into(),
                ));
            }
            let mut battle = s
                .battle
                .clone()
                .ok_or_else(|| GameError::Conflict("No creature selected".into()))?;
            let outcome = battle.apply_judgment(&judgment)?;

            let mut tracker = ProgressionTracker::new(catalog, s.progression.clone());
            tracker.record_spell(SpellRecord::new(
                spell,
                &battle.creature.name,
                judgment.damage,
                judgment.healing,
                judgment.effectiveness,
            ));

            let mut score_awarded = 0;
            let mut stage_completions = Vec::new();
            match outcome.status {
                GameState::Victory => {
                    score_awarded = tracker.record_victory(
                        &battle.creature.id,
                        victory_score(&battle.creature, judgment.effectiveness),
                    );
                    stage_completions = tracker.check_stage_completion();
                    metrics::BATTLES_FINISHED_TOTAL
                        .with_label_values(&["victory"])
                        .inc();
                    metrics::STAGES_COMPLETED_TOTAL.inc_by(stage_completions.len() as u64);
                    tracing::info!(
                        player_id,
                        creature = %battle.creature.id,
                        score_awarded,
                        "Creature defeated"
                    );
                }
                GameState::Defeat => {
                    metrics::BATTLES_FINISHED_TOTAL
                        .with_label_values(&["defeat"])
                        .inc();
                    tracing::info!(player_id, creature = %battle.creature.id, "Player defeated");
                }
                _ => {}
            }
            let progression = tracker.into_state();

            let report = TurnReport {
                spell: spell.to_string(),
                headline: headline(&judgment, outcome.status),
                tips: improvement_tips(&judgment),
                state: outcome.status,
                outcome,
                battle: battle.clone(),
                score_awarded,
                score: progression.score,
                stage_completions,
                evaluation: judgment,
            };
            Ok((report, battle, progression))
        })?;

        // On failure the guard puts the battle back to Ready untouched.
        self.db.save_progression(player_id, &progression).await?;

        // Reset and leave wait on the write lock, so the epoch still holds.
        self.with_session(player_id, |s| {
            s.casting = None;
            s.progression = progression;
            s.battle = Some(battle);
            Ok(())
        })?;
        Ok(report)
    }

    // ── Administration ────────────────────────────────────────────────

    /// Complete every gating stage. Only available with debug tools on.
    pub async fn unlock_all(&self, player_id: &str) -> Result<Vec<String>, GameError> {
        if !self.debug_tools {
            return Err(GameError::Forbidden("Debug tools are disabled".into()));
        }
        self.ensure_loaded(player_id).await?;
        let _write = self.write_lock(player_id).await?;
        let catalog = self.catalog;
        let (marked, progression) = self.with_session(player_id, |s| {
            let mut tracker = ProgressionTracker::new(catalog, s.progression.clone());
            let marked = tracker.force_unlock_all();
            Ok((marked, tracker.into_state()))
        })?;
        self.db.save_progression(player_id, &progression).await?;
        self.with_session(player_id, |s| {
            s.progression = progression;
            Ok(())
        })?;
        tracing::warn!(player_id, stages = marked.len(), "Debug unlock-all used");
        Ok(marked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CATALOG;
    use crate::healing::KeywordHealingClassifier;
    use crate::llm::{JudgeService, LlmError};
    use crate::moderation::ModerationPolicy;
    use async_trait::async_trait;

    struct FixedJudge(&'static str);

    #[async_trait]
    impl JudgeService for FixedJudge {
        async fn chat(&self, _s: &str, _u: &str) -> Result<String, LlmError> {
            Ok(self.0.to_string())
        }
    }

    async fn manager(reply: &'static str, debug_tools: bool) -> SessionManager {
        let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
        let judge: Arc<dyn JudgeService> = Arc::new(FixedJudge(reply));
        let services = Arc::new(TurnServices {
            judge: SpellJudge::new(Some(judge), Arc::new(KeywordHealingClassifier)),
            moderation: ModerationGate::new(None, ModerationPolicy::FailOpen),
        });
        SessionManager::new(db, services, &CATALOG, 100, debug_tools)
    }

    const STRONG: &str = r#"{"effectiveness":9,"damage":85,"feedback":"Great","success":true}"#;

    #[test]
    fn test_headlines() {
        let j = |effectiveness, damage, healing, success| SpellJudgment {
            effectiveness,
            damage,
            feedback: String::new(),
            success,
            healing,
            moderated: false,
        };
        assert_eq!(headline(&j(9, 85, 0, true), GameState::Victory), "Victory!");
        assert_eq!(headline(&j(9, 85, 0, true), GameState::Ready), "Critical Hit!");
        assert_eq!(headline(&j(6, 40, 0, true), GameState::Ready), "Direct Hit!");
        assert_eq!(headline(&j(3, 10, 0, false), GameState::Ready), "Glancing Blow");
        assert_eq!(headline(&j(1, 0, 0, false), GameState::Ready), "Spell Fizzled");
        assert_eq!(headline(&j(5, 0, 25, true), GameState::Ready), "Healing Spell");
        assert_eq!(improvement_tips(&j(3, 10, 0, false)).len(), 3);
        assert!(improvement_tips(&j(4, 10, 0, false)).is_empty());
    }

    #[tokio::test]
    async fn test_cast_turn_and_persist() {
        let m = manager(STRONG, false).await;
        let id = m.create_player().await.unwrap();
        m.select_creature(&id, "fireDragon").await.unwrap();

        let report = m.cast(&id, "I summon a blizzard of ice shards").await.unwrap();
        assert_eq!(report.battle.current_health, 15);
        assert_eq!(report.outcome.player_damage, 34);
        assert_eq!(report.state, GameState::Ready);
        assert_eq!(report.headline, "Critical Hit!");

        let report = m.cast(&id, "Another blizzard").await.unwrap();
        assert_eq!(report.state, GameState::Victory);
        assert_eq!(report.score_awarded, 100 + 90);

        let stored = m.db.load_progression(&id).await.unwrap();
        assert_eq!(stored.score, 190);
        assert!(stored.defeated_creature_ids.contains("fireDragon"));
        assert_eq!(stored.spell_history.len(), 2);

        let err = m.cast(&id, "One more").await.unwrap_err();
        assert!(matches!(err, GameError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_replay_awards_nothing() {
        let m = manager(r#"{"effectiveness":8,"damage":100,"feedback":"ok","success":true}"#, false).await;
        let id = m.create_player().await.unwrap();
        m.select_creature(&id, "fireDragon").await.unwrap();
        assert_eq!(m.cast(&id, "ice lance").await.unwrap().score_awarded, 180);
        m.reset_battle(&id).await.unwrap();
        assert_eq!(m.cast(&id, "ice lance").await.unwrap().score_awarded, 0);
        assert_eq!(m.progress(&id).await.unwrap().progression.score, 180);
    }

    #[tokio::test]
    async fn test_locked_stage_forbidden() {
        let m = manager(STRONG, false).await;
        let id = m.create_player().await.unwrap();
        let err = m.select_creature(&id, "ancientOracle").await.unwrap_err();
        assert!(matches!(err, GameError::Forbidden(_)));
        let err = m.select_creature(&id, "nobody").await.unwrap_err();
        assert!(matches!(err, GameError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cast_without_battle_conflicts() {
        let m = manager(STRONG, false).await;
        let id = m.create_player().await.unwrap();
        assert!(matches!(
            m.cast(&id, "fire").await.unwrap_err(),
            GameError::Conflict(_)
        ));
        assert!(matches!(
            m.cast(&id, "   ").await.unwrap_err(),
            GameError::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn test_unknown_player_not_found() {
        let m = manager(STRONG, false).await;
        assert!(matches!(
            m.battle("missing").await.unwrap_err(),
            GameError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_unlock_all_gated() {
        let m = manager(STRONG, false).await;
        let id = m.create_player().await.unwrap();
        assert!(matches!(
            m.unlock_all(&id).await.unwrap_err(),
            GameError::Forbidden(_)
        ));

        let m = manager(STRONG, true).await;
        let id = m.create_player().await.unwrap();
        assert_eq!(m.unlock_all(&id).await.unwrap().len(), 5);
        let view = m.select_creature(&id, "ancientOracle").await.unwrap();
        assert_eq!(view.boss_phase, Some(1));
        assert_eq!(view.state, GameState::Ready);
    }

    #[tokio::test]
    async fn test_leave_returns_to_selection() {
        let m = manager(STRONG, false).await;
        let id = m.create_player().await.unwrap();
        m.select_creature(&id, "earthGolem").await.unwrap();
        let view = m.leave_battle(&id).await.unwrap();
        assert_eq!(view.state, GameState::Selection);
        assert!(view.battle.is_none());
        assert!(matches!(
            m.reset_battle(&id).await.unwrap_err(),
            GameError::Conflict(_)
        ));
    }

    #[tokio::test]
    async fn test_failed_save_leaves_turn_unapplied() {
        let m = manager(STRONG, false).await;
        let id = m.create_player().await.unwrap();
        m.select_creature(&id, "fireDragon").await.unwrap();
        sqlx::query("DROP TABLE progression")
            .execute(&m.db.pool)
            .await
            .unwrap();

        let err = m.cast(&id, "I summon a blizzard of ice shards").await.unwrap_err();
        assert!(matches!(err, GameError::Database(_)));

        let view = m.battle(&id).await.unwrap();
        assert!(!view.turn_in_flight);
        assert_eq!(view.state, GameState::Ready);
        let battle = view.battle.unwrap();
        assert_eq!(battle.current_health, 100);
        assert_eq!(battle.player_health, 100);
        assert!(m.progress(&id).await.unwrap().progression.spell_history.is_empty());
    }
}
