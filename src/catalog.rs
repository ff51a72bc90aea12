// Content catalog: worlds, stages and creatures. Read-only reference data
// embedded at build time and parsed once.

use std::collections::{BTreeSet, HashMap};

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

const CATALOG_JSON: &str = include_str!("../data/catalog.json");

lazy_static! {
    pub static ref CATALOG: Catalog =
        Catalog::from_json(CATALOG_JSON).expect("embedded catalog is valid JSON");
}

/// One segment of a boss creature's health pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    pub phase_health: i32,
    pub weakness: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Creature {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub max_health: i32,
    pub weakness: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub world: String,
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub flavor_text: String,
    #[serde(default)]
    pub hints: Vec<String>,
    #[serde(default)]
    pub is_boss: bool,
    /// Ordered phases; only bosses have them. Their healths sum to `max_health`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phases: Vec<Phase>,
}

impl Creature {
    /// Minimal non-boss creature, mostly useful for tests and ad-hoc battles.
    pub fn simple(id: &str, name: &str, max_health: i32, weakness: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            max_health,
            weakness: weakness.to_string(),
            image: String::new(),
            world: String::new(),
            stage: String::new(),
            flavor_text: String::new(),
            hints: Vec::new(),
            is_boss: false,
            phases: Vec::new(),
        }
    }

    pub fn has_phases(&self) -> bool {
        self.is_boss && !self.phases.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub creatures: Vec<String>,
    #[serde(default)]
    pub required_to_unlock: Vec<String>,
}

impl Stage {
    /// A stage with no prerequisites is always unlocked.
    pub fn is_unlocked_by(&self, completed: &BTreeSet<String>) -> bool {
        self.required_to_unlock.iter().all(|r| completed.contains(r))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct World {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub story_intro: String,
    pub stages: Vec<Stage>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    worlds: Vec<World>,
    creatures: Vec<Creature>,
}

/// Worlds in campaign order plus a creature index.
#[derive(Debug, Clone)]
pub struct Catalog {
    worlds: Vec<World>,
    creatures: HashMap<String, Creature>,
}

impl Catalog {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let file: CatalogFile = serde_json::from_str(json)?;
        Ok(Self::new(file.worlds, file.creatures))
    }

    pub fn new(worlds: Vec<World>, creatures: Vec<Creature>) -> Self {
        let creatures = creatures
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        Self { worlds, creatures }
    }

    pub fn worlds(&self) -> &[World] {
        &self.worlds
    }

    pub fn creature(&self, id: &str) -> Option<&Creature> {
        self.creatures.get(id)
    }

    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.worlds.iter().flat_map(|w| w.stages.iter())
    }

    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.stages().find(|s| s.id == id)
    }

    /// The world that owns the given stage.
    pub fn world_of_stage(&self, stage_id: &str) -> Option<&World> {
        self.worlds
            .iter()
            .find(|w| w.stages.iter().any(|s| s.id == stage_id))
    }

    pub fn creatures_in_stage(&self, stage_id: &str) -> Vec<&Creature> {
        self.stage(stage_id)
            .map(|s| s.creatures.iter().filter_map(|id| self.creature(id)).collect())
            .unwrap_or_default()
    }

    /// Every creature, world by world and stage by stage.
    pub fn creatures_in_order(&self) -> Vec<&Creature> {
        self.stages()
            .flat_map(|s| s.creatures.iter())
            .filter_map(|id| self.creature(id))
            .collect()
    }

    /// The stage a creature belongs to, by scanning stage rosters.
    pub fn stage_of_creature(&self, creature_id: &str) -> Option<&Stage> {
        self.stages()
            .find(|s| s.creatures.iter().any(|c| c == creature_id))
    }

    pub fn available_stages(&self, completed: &BTreeSet<String>) -> Vec<&Stage> {
        self.stages().filter(|s| s.is_unlocked_by(completed)).collect()
    }

    pub fn total_creatures(&self) -> usize {
        self.creatures_in_order().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_catalog_parses() {
        let catalog = &*CATALOG;
        assert_eq!(catalog.worlds().len(), 3);
        assert_eq!(catalog.stages().count(), 6);
        assert_eq!(catalog.total_creatures(), 11);
    }

    #[test]
    fn test_boss_phase_health_sums_to_max() {
        for creature in CATALOG.creatures_in_order() {
            if creature.has_phases() {
                let sum: i32 = creature.phases.iter().map(|p| p.phase_health).sum();
                assert_eq!(sum, creature.max_health, "{}", creature.id);
            }
        }
        let oracle = CATALOG.creature("ancientOracle").unwrap();
        assert!(oracle.is_boss);
        assert_eq!(oracle.phases.len(), 3);
    }

    #[test]
    fn test_stage_rosters_reference_known_creatures() {
        for stage in CATALOG.stages() {
            for id in &stage.creatures {
                let creature = CATALOG.creature(id).expect("creature in catalog");
                assert_eq!(creature.stage, stage.id);
            }
            for req in &stage.required_to_unlock {
                assert!(CATALOG.stage(req).is_some(), "unknown prerequisite {req}");
            }
        }
    }

    #[test]
    fn test_lookups() {
        let stage = CATALOG.stage_of_creature("stormEagle").unwrap();
        assert_eq!(stage.id, "elemental_advanced");
        let world = CATALOG.world_of_stage(&stage.id).unwrap();
        assert_eq!(world.id, "elementalRealm");
        let names: Vec<&str> = CATALOG
            .creatures_in_stage("elemental_basic")
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["Fire Dragon", "Earth Golem"]);
        assert!(CATALOG.creature("missing").is_none());
    }

    #[test]
    fn test_available_stages() {
        let mut completed = BTreeSet::new();
        let ids: Vec<&str> = CATALOG
            .available_stages(&completed)
            .iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(ids, vec!["elemental_basic"]);

        completed.insert("elemental_basic".to_string());
        completed.insert("elemental_advanced".to_string());
        let ids: Vec<&str> = CATALOG
            .available_stages(&completed)
            .iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(ids, vec!["elemental_basic", "elemental_advanced", "shadow_basic"]);
    }
}
