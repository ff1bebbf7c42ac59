use anyhow::{Context, Result};
use roomrando_game::{ItemKindId, PlayerId, ScenarioId};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

/// All knobs the generator recognizes. Loadable from a JSON preset.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RandomizerSettings {
    pub player: PlayerId,
    pub scenario: ScenarioId,
    /// Rewrite door targets; false replays the original connectivity.
    pub random_doors: bool,
    /// The playthrough is split into `area_count + 1` areas.
    pub area_count: usize,
    /// Density dial 0-7: what fraction of optional rooms is included.
    pub area_size: usize,
    pub ratio_ammo: u8,
    pub ratio_health: u8,
    pub ratio_ink_ribbons: u8,
    /// Ammo amount dial 0-8; 8 fills pickups to the kind's maximum.
    pub ammo_quantity: u8,
    /// Permute remaining items instead of redistributing by ratio.
    pub shuffle_items: bool,
    /// Allow taking a key from a not-yet-reached slot when placement
    /// would otherwise fail.
    pub alternative_routes: bool,
    /// Lock the far side of key-gated doors so a loopback cannot bypass
    /// the gate.
    pub protect_soft_lock: bool,
    /// Weapon kinds eligible for distribution; None means all.
    pub enabled_weapons: Option<Vec<ItemKindId>>,
}

impl Default for RandomizerSettings {
    fn default() -> Self {
        RandomizerSettings {
            player: 0,
            scenario: 0,
            random_doors: false,
            area_count: 3,
            area_size: 7,
            ratio_ammo: 16,
            ratio_health: 16,
            ratio_ink_ribbons: 16,
            ammo_quantity: 8,
            shuffle_items: true,
            alternative_routes: true,
            protect_soft_lock: true,
            enabled_weapons: None,
        }
    }
}

impl RandomizerSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        serde_json::from_reader(file)
            .with_context(|| format!("parsing settings preset {}", path.display()))
    }

    pub fn weapon_enabled(&self, kind: ItemKindId) -> bool {
        match &self.enabled_weapons {
            Some(list) => list.contains(&kind),
            None => true,
        }
    }
}
