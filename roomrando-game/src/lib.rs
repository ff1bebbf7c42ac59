//! Static world-description data model: rooms, doors, item slots and the
//! item catalog, as loaded from JSON. The randomizer core (`roomrando`)
//! consumes this read-only description and never mutates it.

use anyhow::{bail, Context, Result};
use hashbrown::HashMap;
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display, Formatter};
use std::fs::File;
use std::path::Path;
use std::str::FromStr;

pub type KeyId = u8; // Key item kind, as referenced by door/room requirement lists
pub type ItemKindId = u8; // Item kind, index into the ItemCatalog
pub type DoorId = u8; // Door identifier, only unique within a room
pub type PlayerId = usize; // Playable character index
pub type ScenarioId = usize; // Scenario index (e.g. A/B game)

/// Stage + room identifier, written as three hex digits ("10B" = stage 1,
/// room 0x0B).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId {
    pub stage: u8,
    pub room: u8,
}

impl RoomId {
    pub fn new(stage: u8, room: u8) -> Self {
        RoomId { stage, room }
    }
}

impl Display for RoomId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:X}{:02X}", self.stage, self.room)
    }
}

impl Debug for RoomId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl FromStr for RoomId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 3 {
            bail!("invalid room id: {s:?}");
        }
        let stage = u8::from_str_radix(&s[0..1], 16).with_context(|| format!("room id {s:?}"))?;
        let room = u8::from_str_radix(&s[1..3], 16).with_context(|| format!("room id {s:?}"))?;
        Ok(RoomId { stage, room })
    }
}

impl Serialize for RoomId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RoomId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A (room, in-room item id) pair identifying one item slot.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomItemId {
    pub room: RoomId,
    pub id: u8,
}

impl RoomItemId {
    pub fn new(room: RoomId, id: u8) -> Self {
        RoomItemId { room, id }
    }
}

impl Display for RoomItemId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.room, self.id)
    }
}

impl Debug for RoomItemId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl FromStr for RoomItemId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((room, id)) = s.split_once(':') else {
            bail!("invalid room item id: {s:?}");
        };
        Ok(RoomItemId {
            room: room.parse()?,
            id: id.parse().with_context(|| format!("room item id {s:?}"))?,
        })
    }
}

/// A door/room target reference: either a bare room ("10B") or a specific
/// door within it ("10B:2").
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct DoorTarget {
    pub room: RoomId,
    pub door: Option<DoorId>,
}

impl FromStr for DoorTarget {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((room, door)) => Ok(DoorTarget {
                room: room.parse()?,
                door: Some(door.parse().with_context(|| format!("door target {s:?}"))?),
            }),
            None => Ok(DoorTarget {
                room: s.parse()?,
                door: None,
            }),
        }
    }
}

/// Lock state of one side of a door.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    /// Freely traversable.
    #[default]
    None,
    /// Permanently blocked; never traversable.
    Always,
    /// Locked on this side only (openable from the other).
    Side,
    /// Gated behind another edge; the other side must be connected first.
    Gate,
    /// Temporarily blocked; becomes traversable without a key.
    Unblock,
}

/// Category tag controlling how a room participates in door rewriting.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomCategory {
    #[default]
    Normal,
    /// Never included in a rewritten graph.
    Exclude,
    /// Doors in this room are never rewritten or re-locked.
    Static,
    /// Area-transition room; terminates an area.
    Bridge,
    /// Like Bridge, but only used when multiple areas are generated.
    Segment,
    /// Content-dense reward room; each area wants one before key gating.
    Box,
}

/// Whether an item slot may host a randomly placed key item.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemPriority {
    #[default]
    Normal,
    /// Do not place a key item here.
    Low,
    /// The item must stay exactly as defined.
    Fixed,
}

/// A concrete item written into a slot.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Item {
    pub kind: ItemKindId,
    pub amount: u8,
}

/// Broad item grouping used by the non-key distribution tables.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemGroup {
    Key,
    Weapon,
    Ammo,
    Heal,
    InkRibbon,
    Document,
    Misc,
}

fn default_amount() -> u8 {
    1
}

fn default_probability() -> f64 {
    1.0
}

/// One entry of the item catalog.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemDefinition {
    pub kind: ItemKindId,
    pub name: String,
    pub group: ItemGroup,
    /// Maximum amount per pickup (ammo capacity for ammo kinds).
    #[serde(default = "default_amount")]
    pub max_amount: u8,
    /// Relative weight within the kind's distribution table.
    #[serde(default = "default_probability")]
    pub probability: f64,
    /// For weapons: the ammo kinds this weapon feeds on.
    #[serde(default)]
    pub ammo: Vec<ItemKindId>,
    /// For keys: consumed on use, so one copy is needed per gate.
    #[serde(default)]
    pub consumable: bool,
    /// For keys: not required to finish the game.
    #[serde(default)]
    pub optional: bool,
}

/// Item kind attribute table. Stands in for the per-game item helper at
/// the interface boundary: the randomizer only ever asks it questions,
/// never the game binary.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ItemCatalog {
    pub items: Vec<ItemDefinition>,
    #[serde(skip)]
    index: HashMap<ItemKindId, usize>,
}

impl ItemCatalog {
    pub fn new(items: Vec<ItemDefinition>) -> Self {
        let mut catalog = ItemCatalog {
            items,
            index: HashMap::new(),
        };
        catalog.reindex();
        catalog
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let mut catalog: ItemCatalog = serde_json::from_reader(file)
            .with_context(|| format!("parsing item catalog {}", path.display()))?;
        catalog.reindex();
        info!("loaded item catalog: {} kinds", catalog.items.len());
        Ok(catalog)
    }

    fn reindex(&mut self) {
        self.index = self
            .items
            .iter()
            .enumerate()
            .map(|(i, def)| (def.kind, i))
            .collect();
    }

    pub fn get(&self, kind: ItemKindId) -> Option<&ItemDefinition> {
        self.index.get(&kind).map(|&i| &self.items[i])
    }

    pub fn name(&self, kind: ItemKindId) -> String {
        match self.get(kind) {
            Some(def) => def.name.clone(),
            None => format!("item {kind}"),
        }
    }

    pub fn group(&self, kind: ItemKindId) -> ItemGroup {
        self.get(kind).map(|x| x.group).unwrap_or(ItemGroup::Misc)
    }

    pub fn is_key(&self, kind: ItemKindId) -> bool {
        self.group(kind) == ItemGroup::Key
    }

    pub fn is_optional_key(&self, kind: ItemKindId) -> bool {
        self.get(kind).map(|x| x.optional).unwrap_or(false)
    }

    pub fn is_consumable_key(&self, kind: ItemKindId) -> bool {
        self.get(kind).map(|x| x.consumable).unwrap_or(false)
    }

    pub fn max_amount(&self, kind: ItemKindId) -> u8 {
        self.get(kind).map(|x| x.max_amount).unwrap_or(1).max(1)
    }

    pub fn probability(&self, kind: ItemKindId) -> f64 {
        self.get(kind).map(|x| x.probability).unwrap_or(1.0)
    }

    /// All weapon kinds, in catalog order.
    pub fn weapons(&self) -> Vec<ItemKindId> {
        self.kinds_in_group(ItemGroup::Weapon)
    }

    pub fn kinds_in_group(&self, group: ItemGroup) -> Vec<ItemKindId> {
        self.items
            .iter()
            .filter(|x| x.group == group)
            .map(|x| x.kind)
            .collect()
    }

    pub fn ammo_for_weapon(&self, weapon: ItemKindId) -> Vec<ItemKindId> {
        self.get(weapon).map(|x| x.ammo.clone()).unwrap_or_default()
    }
}

/// Spawn point used when a door deposits the player into a room.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct DoorEntrance {
    pub x: i16,
    pub y: i16,
    pub z: i16,
    pub d: i16,
    #[serde(default)]
    pub floor: u8,
    #[serde(default)]
    pub camera: u8,
}

/// Per-player/scenario/door-rando applicability filter shared by door,
/// item and category definitions.
pub trait Applicability {
    fn player(&self) -> Option<PlayerId>;
    fn scenario(&self) -> Option<ScenarioId>;
    fn door_rando(&self) -> Option<bool>;

    fn applies(&self, player: PlayerId, scenario: ScenarioId, door_rando: bool) -> bool {
        self.player().map_or(true, |p| p == player)
            && self.scenario().map_or(true, |s| s == scenario)
            && self.door_rando().map_or(true, |d| d == door_rando)
    }
}

macro_rules! impl_applicability {
    ($ty:ty) => {
        impl Applicability for $ty {
            fn player(&self) -> Option<PlayerId> {
                self.player
            }
            fn scenario(&self) -> Option<ScenarioId> {
                self.scenario
            }
            fn door_rando(&self) -> Option<bool> {
                self.door_rando
            }
        }
    };
}

/// One door of a room, as described by the map data.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DoorDescription {
    /// Original target: "SRR" or "SRR:door".
    pub target: String,
    #[serde(default)]
    pub id: Option<DoorId>,
    /// Spawn point in this room for arrivals through this door. Doors
    /// without one are one-way sources and cannot absorb a connection.
    #[serde(default)]
    pub entrance: Option<DoorEntrance>,
    #[serde(default)]
    pub lock: Option<LockKind>,
    #[serde(default)]
    pub lock_id: Option<u8>,
    #[serde(default)]
    pub requires: Vec<KeyId>,
    #[serde(default)]
    pub requires_room: Vec<RoomId>,
    /// Whether the door may be rewritten at all. Defaults to true.
    #[serde(default)]
    pub randomize: Option<bool>,
    #[serde(default)]
    pub no_return: bool,
    #[serde(default)]
    pub no_unlock: bool,
    #[serde(default)]
    pub is_bridge_edge: bool,
    #[serde(default)]
    pub player: Option<PlayerId>,
    #[serde(default)]
    pub scenario: Option<ScenarioId>,
    #[serde(default)]
    pub door_rando: Option<bool>,
}

impl_applicability!(DoorDescription);

/// One item slot of a room.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ItemDescription {
    pub id: u8,
    #[serde(default)]
    pub kind: Option<ItemKindId>,
    #[serde(default)]
    pub amount: Option<u8>,
    #[serde(default)]
    pub requires: Vec<KeyId>,
    #[serde(default)]
    pub requires_room: Vec<RoomId>,
    /// Slot whose final content this slot mirrors ("SRR:id").
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub priority: ItemPriority,
    #[serde(default)]
    pub player: Option<PlayerId>,
    #[serde(default)]
    pub scenario: Option<ScenarioId>,
    #[serde(default)]
    pub door_rando: Option<bool>,
}

impl_applicability!(ItemDescription);

/// Category tag with applicability filters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CategoryDescription {
    pub category: RoomCategory,
    #[serde(default)]
    pub player: Option<PlayerId>,
    #[serde(default)]
    pub scenario: Option<ScenarioId>,
    #[serde(default)]
    pub door_rando: Option<bool>,
}

impl_applicability!(CategoryDescription);

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoomDescription {
    /// Keys needed merely to enter/use the room, independent of any door.
    #[serde(default)]
    pub requires: Vec<KeyId>,
    #[serde(default)]
    pub requires_room: Vec<RoomId>,
    #[serde(default)]
    pub doors: Vec<DoorDescription>,
    #[serde(default)]
    pub items: Vec<ItemDescription>,
    #[serde(default)]
    pub rando: Vec<CategoryDescription>,
}

/// Start/end room pair, selected by applicability.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StartEndDescription {
    pub start: RoomId,
    pub end: RoomId,
    #[serde(default)]
    pub player: Option<PlayerId>,
    #[serde(default)]
    pub scenario: Option<ScenarioId>,
    #[serde(default)]
    pub door_rando: Option<bool>,
}

impl_applicability!(StartEndDescription);

/// The full static world description, keyed by room id.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MapDescription {
    pub start_end: Vec<StartEndDescription>,
    pub rooms: HashMap<RoomId, RoomDescription>,
    /// Lock ids (pre-offset, 0..125) the game reserves for scripted use.
    #[serde(default)]
    pub reserved_lock_ids: Vec<u8>,
}

impl MapDescription {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let map: MapDescription = serde_json::from_reader(file)
            .with_context(|| format!("parsing map description {}", path.display()))?;
        info!("loaded map description: {} rooms", map.rooms.len());
        Ok(map)
    }

    pub fn room(&self, id: RoomId) -> Option<&RoomDescription> {
        self.rooms.get(&id)
    }

    /// Room ids in deterministic (sorted) order. The description is
    /// stored in a hash map; every iteration that feeds randomization
    /// must go through this.
    pub fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.rooms.keys().copied().collect();
        ids.sort();
        ids
    }
}
