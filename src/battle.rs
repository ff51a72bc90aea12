// Battle state machine: creature and player health, boss phases,
// counter-attacks, and the win/lose transitions driven by judgments.

use serde::Serialize;

use crate::catalog::Creature;
use crate::judge::{SpellJudgment, SpellRequest};

pub const DEFAULT_MAX_PLAYER_HEALTH: i32 = 100;

/// Top-level encounter state. `Selection` means no creature is engaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GameState {
    Selection,
    Ready,
    Casting,
    Victory,
    Defeat,
}

impl GameState {
    pub fn is_terminal(self) -> bool {
        matches!(self, GameState::Victory | GameState::Defeat)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BattleError {
    #[error("The encounter is over; reset it or return to creature selection")]
    EncounterOver,
    #[error("A spell is already being cast")]
    AlreadyCasting,
}

/// A boss moving into its next phase during a turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTransition {
    /// 1-based number of the phase entered.
    pub phase: u8,
    pub weakness: String,
    pub description: String,
}

/// What one applied judgment did to the battle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    pub moderated: bool,
    /// Damage actually absorbed by the creature.
    pub creature_damage: i32,
    /// Health actually restored to the player.
    pub player_healing: i32,
    /// Counter-attack damage dealt to the player (0 when suppressed).
    pub player_damage: i32,
    pub phase_transitions: Vec<PhaseTransition>,
    pub status: GameState,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleState {
    pub creature: Creature,
    pub current_health: i32,
    pub current_phase_index: Option<usize>,
    pub current_phase_health: Option<i32>,
    pub player_health: i32,
    pub max_player_health: i32,
    pub status: GameState,
    pub turns: u32,
}

impl BattleState {
    pub fn new(creature: Creature, max_player_health: i32) -> Self {
        let (phase_index, phase_health) = if creature.has_phases() {
            (Some(0), Some(creature.phases[0].phase_health))
        } else {
            (None, None)
        };
        Self {
            current_health: creature.max_health,
            creature,
            current_phase_index: phase_index,
            current_phase_health: phase_health,
            player_health: max_player_health,
            max_player_health,
            status: GameState::Ready,
            turns: 0,
        }
    }

    /// Restart the encounter against the same creature.
    pub fn reset(&mut self) {
        *self = Self::new(self.creature.clone(), self.max_player_health);
    }

    /// The weakness the judge should score against right now.
    pub fn current_weakness(&self) -> &str {
        match self.current_phase_index {
            Some(i) => &self.creature.phases[i].weakness,
            None => &self.creature.weakness,
        }
    }

    /// 1-based boss phase, if this is a phased battle.
    pub fn boss_phase(&self) -> Option<u8> {
        self.current_phase_index.map(|i| (i + 1) as u8)
    }

    pub fn spell_request(&self, text: &str) -> SpellRequest {
        SpellRequest {
            text: text.to_string(),
            target_creature: self.creature.name.clone(),
            target_weakness: self.current_weakness().to_string(),
            is_boss_battle: self.creature.is_boss,
            boss_phase: self.boss_phase(),
        }
    }

    /// Ready → Casting.
    pub fn begin_cast(&mut self) -> Result<(), BattleError> {
        match self.status {
            GameState::Ready | GameState::Selection => {
                self.status = GameState::Casting;
                Ok(())
            }
            GameState::Casting => Err(BattleError::AlreadyCasting),
            GameState::Victory | GameState::Defeat => Err(BattleError::EncounterOver),
        }
    }

    /// Casting → Ready without a judgment (the turn was abandoned).
    pub fn abort_cast(&mut self) {
        if self.status == GameState::Casting {
            self.status = GameState::Ready;
        }
    }

    pub fn apply_judgment(&mut self, judgment: &SpellJudgment) -> Result<TurnOutcome, BattleError> {
        if self.status.is_terminal() {
            return Err(BattleError::EncounterOver);
        }
        self.status = GameState::Ready;

        if judgment.moderated {
            return Ok(TurnOutcome {
                moderated: true,
                creature_damage: 0,
                player_healing: 0,
                player_damage: 0,
                phase_transitions: Vec::new(),
                status: self.status,
            });
        }

        self.turns += 1;

        let healing = judgment.healing.max(0);
        let before = self.player_health;
        self.player_health = (self.player_health + healing).min(self.max_player_health);
        let player_healing = self.player_health - before;

        let damage = judgment.damage.max(0);
        let (creature_damage, phase_transitions) = if self.current_phase_index.is_some() {
            self.damage_phased(damage)
        } else {
            let absorbed = damage.min(self.current_health);
            self.current_health -= absorbed;
            (absorbed, Vec::new())
        };

        if self.current_health <= 0 {
            self.status = GameState::Victory;
            return Ok(TurnOutcome {
                moderated: false,
                creature_damage,
                player_healing,
                player_damage: 0,
                phase_transitions,
                status: self.status,
            });
        }

        // A pure self-heal does not provoke retaliation.
        let player_damage = if healing > 0 && damage == 0 {
            0
        } else {
            counter_attack_damage(&self.creature, self.max_player_health, judgment.effectiveness)
        };
        self.player_health = (self.player_health - player_damage).max(0);
        if self.player_health <= 0 {
            self.status = GameState::Defeat;
        }

        Ok(TurnOutcome {
            moderated: false,
            creature_damage,
            player_healing,
            player_damage,
            phase_transitions,
            status: self.status,
        })
    }

    /// Damage the current phase, spilling any excess into following phases.
    fn damage_phased(&mut self, damage: i32) -> (i32, Vec<PhaseTransition>) {
        let phases = &self.creature.phases;
        let mut index = self.current_phase_index.unwrap_or(0);
        let mut phase_health = self.current_phase_health.unwrap_or(0);
        let mut remaining = damage;
        let mut absorbed = 0;
        let mut transitions = Vec::new();

        loop {
            let take = remaining.min(phase_health);
            phase_health -= take;
            remaining -= take;
            absorbed += take;

            if phase_health > 0 || index + 1 >= phases.len() {
                break;
            }
            index += 1;
            phase_health = phases[index].phase_health;
            transitions.push(PhaseTransition {
                phase: (index + 1) as u8,
                weakness: phases[index].weakness.clone(),
                description: phases[index].description.clone(),
            });
            if remaining == 0 {
                break;
            }
        }

        let later: i32 = phases[index + 1..].iter().map(|p| p.phase_health).sum();
        self.current_phase_index = Some(index);
        self.current_phase_health = Some(phase_health);
        self.current_health = phase_health + later;
        (absorbed, transitions)
    }
}

fn ceil_div(a: i32, b: i32) -> i32 {
    (a + b - 1) / b
}

/// Retaliation damage after a surviving creature is hit. Bosses hit harder
/// when the player's spell was weak.
pub fn counter_attack_damage(creature: &Creature, max_player_health: i32, effectiveness: i32) -> i32 {
    let divisor = if !creature.is_boss {
        3
    } else if effectiveness >= 7 {
        8
    } else if effectiveness >= 4 {
        5
    } else {
        4
    };
    ceil_div(max_player_health, divisor)
}

/// Score for a first clear of `creature`.
pub fn victory_score(creature: &Creature, effectiveness: i32) -> i32 {
    creature.max_health + effectiveness * 10
}
