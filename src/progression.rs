// Cross-battle progression: score, defeated creatures, completed stages,
// recent spell history, and the unlock/completion rules of the world map.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, World};

pub const SPELL_HISTORY_LIMIT: usize = 10;

/// One cast spell as remembered in the history panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpellRecord {
    pub spell_text: String,
    pub creature_name: String,
    pub damage: i32,
    #[serde(default)]
    pub healing: i32,
    pub effectiveness: i32,
    pub timestamp: String,
}

impl SpellRecord {
    pub fn new(
        spell_text: &str,
        creature_name: &str,
        damage: i32,
        healing: i32,
        effectiveness: i32,
    ) -> Self {
        Self {
            spell_text: spell_text.to_string(),
            creature_name: creature_name.to_string(),
            damage,
            healing,
            effectiveness,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// The persisted document. Every field defaults so older or partial
/// records still load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressionState {
    pub score: i32,
    pub defeated_creature_ids: BTreeSet<String>,
    pub completed_stage_ids: BTreeSet<String>,
    /// Newest first, at most `SPELL_HISTORY_LIMIT` entries.
    pub spell_history: Vec<SpellRecord>,
    /// Lifetime count; the history itself is truncated.
    pub spells_cast: u32,
}

/// Emitted once when a stage's last creature falls.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageCompletion {
    pub stage_id: String,
    pub stage_name: String,
    pub world_id: String,
    pub world_name: String,
    pub title: String,
    pub story: String,
    pub world_mastered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_story: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressStats {
    pub score: i32,
    pub spells_cast: u32,
    pub average_effectiveness: i32,
    pub total_damage: i32,
    pub highest_damage: i32,
    pub creatures_defeated: usize,
    pub total_creatures: usize,
    pub campaign_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Achievement {
    pub name: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatureView {
    pub id: String,
    pub name: String,
    pub image: String,
    pub is_boss: bool,
    pub defeated: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub unlocked: bool,
    pub completed: bool,
    pub defeated: usize,
    pub total: usize,
    pub creatures: Vec<CreatureView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub image: String,
    pub story_intro: String,
    pub unlocked: bool,
    pub mastered: bool,
    pub stages: Vec<StageView>,
}

pub fn stage_story(stage_name: &str) -> String {
    format!(
        "Congratulations! You have mastered all challenges in {stage_name}. \
         Your understanding of prompt magic grows stronger."
    )
}

pub fn world_story(world_name: &str) -> String {
    format!(
        "Incredible! You have conquered all stages in {world_name}. You have proven your \
         mastery over these magical realms and unlocked new challenges ahead."
    )
}

/// Applies progression rules against a catalog.
#[derive(Debug, Clone)]
pub struct ProgressionTracker<'c> {
    catalog: &'c Catalog,
    state: ProgressionState,
}

impl<'c> ProgressionTracker<'c> {
    pub fn new(catalog: &'c Catalog, state: ProgressionState) -> Self {
        Self { catalog, state }
    }

    pub fn state(&self) -> &ProgressionState {
        &self.state
    }

    pub fn into_state(self) -> ProgressionState {
        self.state
    }

    pub fn is_defeated(&self, creature_id: &str) -> bool {
        self.state.defeated_creature_ids.contains(creature_id)
    }

    /// Record a defeat. Returns the score actually awarded: `score_delta`
    /// on a first clear, 0 on a replay.
    pub fn record_victory(&mut self, creature_id: &str, score_delta: i32) -> i32 {
        if !self.state.defeated_creature_ids.insert(creature_id.to_string()) {
            return 0;
        }
        let awarded = score_delta.max(0);
        self.state.score += awarded;
        awarded
    }

    pub fn record_spell(&mut self, entry: SpellRecord) {
        self.state.spell_history.insert(0, entry);
        self.state.spell_history.truncate(SPELL_HISTORY_LIMIT);
        self.state.spells_cast += 1;
    }

    /// Unknown stages are never unlocked.
    pub fn is_stage_unlocked(&self, stage_id: &str) -> bool {
        self.catalog
            .stage(stage_id)
            .map(|s| s.is_unlocked_by(&self.state.completed_stage_ids))
            .unwrap_or(false)
    }

    pub fn is_stage_completed(&self, stage_id: &str) -> bool {
        self.state.completed_stage_ids.contains(stage_id)
    }

    pub fn available_stage_ids(&self) -> Vec<String> {
        self.catalog
            .available_stages(&self.state.completed_stage_ids)
            .into_iter()
            .map(|s| s.id.clone())
            .collect()
    }

    /// Mark every stage whose whole roster is defeated. Stages already
    /// completed are skipped, so a second call with no new defeats
    /// returns nothing.
    pub fn check_stage_completion(&mut self) -> Vec<StageCompletion> {
        let catalog = self.catalog;
        let mut completions = Vec::new();

        for stage in catalog.stages() {
            if self.state.completed_stage_ids.contains(&stage.id) || stage.creatures.is_empty() {
                continue;
            }
            let cleared = stage
                .creatures
                .iter()
                .all(|c| self.state.defeated_creature_ids.contains(c));
            if !cleared {
                continue;
            }
            self.state.completed_stage_ids.insert(stage.id.clone());

            let world = catalog.world_of_stage(&stage.id);
            let world_mastered = world.map(|w| self.is_world_mastered(w)).unwrap_or(false);
            let world_name = world.map(|w| w.name.clone()).unwrap_or_default();
            tracing::info!(stage = %stage.id, world_mastered, "Stage completed");

            completions.push(StageCompletion {
                stage_id: stage.id.clone(),
                stage_name: stage.name.clone(),
                world_id: world.map(|w| w.id.clone()).unwrap_or_default(),
                title: format!("{} Complete!", stage.name),
                story: stage_story(&stage.name),
                world_mastered,
                world_story: world_mastered.then(|| world_story(&world_name)),
                world_name,
            });
        }
        completions
    }

    /// Administrative shortcut: complete every stage that gates another
    /// stage so the final encounter becomes reachable. Returns the stage
    /// ids newly marked.
    pub fn force_unlock_all(&mut self) -> Vec<String> {
        let prerequisites: BTreeSet<String> = self
            .catalog
            .stages()
            .flat_map(|s| s.required_to_unlock.iter().cloned())
            .collect();
        prerequisites
            .into_iter()
            .filter(|id| self.state.completed_stage_ids.insert(id.clone()))
            .collect()
    }

    fn is_world_mastered(&self, world: &World) -> bool {
        world
            .stages
            .iter()
            .all(|s| self.state.completed_stage_ids.contains(&s.id))
    }

    pub fn stats(&self) -> ProgressStats {
        let history = &self.state.spell_history;
        let average_effectiveness = if history.is_empty() {
            0
        } else {
            let sum: i32 = history.iter().map(|s| s.effectiveness).sum();
            (sum as f64 / history.len() as f64).round() as i32
        };
        let total_creatures = self.catalog.total_creatures();
        let defeated = self.state.defeated_creature_ids.len();
        ProgressStats {
            score: self.state.score,
            spells_cast: self.state.spells_cast,
            average_effectiveness,
            total_damage: history.iter().map(|s| s.damage).sum(),
            highest_damage: history.iter().map(|s| s.damage).max().unwrap_or(0),
            creatures_defeated: defeated,
            total_creatures,
            campaign_percent: if total_creatures == 0 {
                0.0
            } else {
                defeated as f64 * 100.0 / total_creatures as f64
            },
        }
    }

    pub fn achievements(&self) -> Vec<Achievement> {
        let stats = self.stats();
        let defeated = stats.creatures_defeated;
        let total = stats.total_creatures;
        let mut earned = Vec::new();

        if defeated >= 1 {
            earned.push(Achievement {
                name: "First Victory",
                description: "Defeated your first creature",
            });
        }
        if total > 0 && defeated * 2 >= total {
            earned.push(Achievement {
                name: "Half Way",
                description: "Defeated half of all creatures",
            });
        }
        if total > 0 && defeated >= total {
            earned.push(Achievement {
                name: "Master Wizard",
                description: "Defeated all creatures",
            });
        }
        if stats.spells_cast >= 10 {
            earned.push(Achievement {
                name: "Spell Caster",
                description: "Cast 10+ spells",
            });
        }
        if stats.average_effectiveness >= 7 {
            earned.push(Achievement {
                name: "Effective Wizard",
                description: "High average effectiveness",
            });
        }
        if stats.highest_damage >= 30 {
            earned.push(Achievement {
                name: "Heavy Hitter",
                description: "Dealt massive damage in one spell",
            });
        }
        earned
    }

    pub fn world_map(&self) -> Vec<WorldView> {
        self.catalog
            .worlds()
            .iter()
            .map(|world| {
                let stages: Vec<StageView> = world
                    .stages
                    .iter()
                    .map(|stage| {
                        let creatures: Vec<CreatureView> = self
                            .catalog
                            .creatures_in_stage(&stage.id)
                            .into_iter()
                            .map(|c| CreatureView {
                                id: c.id.clone(),
                                name: c.name.clone(),
                                image: c.image.clone(),
                                is_boss: c.is_boss,
                                defeated: self.is_defeated(&c.id),
                            })
                            .collect();
                        StageView {
                            id: stage.id.clone(),
                            name: stage.name.clone(),
                            description: stage.description.clone(),
                            unlocked: stage.is_unlocked_by(&self.state.completed_stage_ids),
                            completed: self.is_stage_completed(&stage.id),
                            defeated: creatures.iter().filter(|c| c.defeated).count(),
                            total: creatures.len(),
                            creatures,
                        }
                    })
                    .collect();
                WorldView {
                    id: world.id.clone(),
                    name: world.name.clone(),
                    description: world.description.clone(),
                    image: world.image.clone(),
                    story_intro: world.story_intro.clone(),
                    unlocked: stages.iter().any(|s| s.unlocked),
                    mastered: self.is_world_mastered(world),
                    stages,
                }
            })
            .collect()
    }
}
