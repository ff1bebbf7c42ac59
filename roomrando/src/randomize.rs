pub mod doors;
pub mod items;
pub mod rng_table;

use crate::graph::{GraphBuilder, PlayGraph};
use crate::settings::RandomizerSettings;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use roomrando_game::{
    DoorEntrance, DoorId, ItemCatalog, ItemKindId, LockKind, MapDescription, PlayerId, RoomId,
    RoomItemId, ScenarioId,
};
use serde::Serialize;
use thiserror::Error;

/// Failure modes of a single generation attempt. `UnsolvableSeed` and
/// `IterationLimitExceeded` are retryable with a different seed; the
/// rest indicate broken input data.
#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("no map definition for room {room}")]
    MissingMapDefinition { room: RoomId },
    #[error("room {room} references unparseable target {reference:?}")]
    InvalidReference { room: RoomId, reference: String },
    #[error("no start/end definition for player {player} scenario {scenario}")]
    NoStartEnd {
        player: PlayerId,
        scenario: ScenarioId,
    },
    #[error("seed cannot be solved: {reason}")]
    UnsolvableSeed { reason: String },
    #[error("item slot {slot} assigned twice")]
    DuplicateItemSlot { slot: RoomItemId },
    #[error("invalid settings: {reason}")]
    InvalidSettings { reason: String },
    #[error("item placement exceeded {limit} iterations")]
    IterationLimitExceeded { limit: usize },
}

impl GenerateError {
    /// Whether trying again with a different seed can help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerateError::UnsolvableSeed { .. } | GenerateError::IterationLimitExceeded { .. }
        )
    }
}

fn make_rng(seed: u64) -> StdRng {
    let mut rng_seed = [0u8; 32];
    rng_seed[..8].copy_from_slice(&seed.to_le_bytes());
    StdRng::from_seed(rng_seed)
}

/// One rewritten (or replayed) door side in the output.
#[derive(Clone, Debug, Serialize)]
pub struct DoorAssignment {
    pub room: RoomId,
    pub door_id: DoorId,
    pub target_room: RoomId,
    pub target_entrance: Option<DoorEntrance>,
    pub lock: LockKind,
    pub lock_id: u8,
    pub no_return: bool,
}

/// One item slot's final content.
#[derive(Clone, Debug, Serialize)]
pub struct ItemAssignment {
    pub room: RoomId,
    pub id: u8,
    pub kind: ItemKindId,
    pub name: String,
    pub amount: u8,
}

/// The complete, game-agnostic result of one generation attempt.
#[derive(Clone, Debug, Serialize)]
pub struct Randomization {
    pub seed: u64,
    pub player: PlayerId,
    pub scenario: ScenarioId,
    pub doors: Vec<DoorAssignment>,
    pub items: Vec<ItemAssignment>,
    pub all_rooms_reachable: bool,
}

pub struct Randomizer<'a> {
    pub map: &'a MapDescription,
    pub catalog: &'a ItemCatalog,
    pub settings: &'a RandomizerSettings,
}

impl<'a> Randomizer<'a> {
    pub fn new(
        map: &'a MapDescription,
        catalog: &'a ItemCatalog,
        settings: &'a RandomizerSettings,
    ) -> Self {
        Randomizer {
            map,
            catalog,
            settings,
        }
    }

    /// Runs one full generation attempt. Returns the final graph too so
    /// callers can render a spoiler graph from it.
    pub fn randomize(&self, seed: u64) -> Result<(Randomization, PlayGraph), GenerateError> {
        // Distinct players of the same seed get distinct worlds.
        let base_seed = seed.wrapping_add(self.settings.player as u64);

        let mut graph = GraphBuilder::new(self.map, self.settings).build()?;
        info!(
            "built graph: {} rooms, start {}, end {}",
            graph.nodes.len(),
            graph.node(graph.start).room,
            graph.node(graph.end).room
        );

        if self.settings.random_doors {
            let mut door_rng = make_rng(base_seed.wrapping_add(1));
            doors::create_random_graph(&mut graph, self.settings, &mut door_rng)?;
        } else {
            doors::replay_original_graph(&mut graph)?;
        }

        let mut item_rng = make_rng(base_seed.wrapping_add(2));
        items::ItemRandomizer::new(&mut graph, self.catalog, self.settings, &mut item_rng)
            .randomize()?;

        let randomization = self.extract(seed, &graph);
        Ok((randomization, graph))
    }

    fn extract(&self, seed: u64, graph: &PlayGraph) -> Randomization {
        let mut doors: Vec<DoorAssignment> = Vec::new();
        for node in &graph.nodes {
            for edge in &node.edges {
                let Some(door_id) = edge.door_id else {
                    continue;
                };
                let Some(target) = edge.target else {
                    continue;
                };
                let target_node = graph.node(target);
                doors.push(DoorAssignment {
                    room: node.room,
                    door_id,
                    target_room: target_node.room,
                    target_entrance: edge.target_entrance,
                    lock: edge.lock,
                    lock_id: edge.lock_id,
                    no_return: edge.no_return,
                });
            }
        }
        doors.sort_by_key(|x| (x.room, x.door_id));

        let mut items: Vec<ItemAssignment> = Vec::new();
        for node in &graph.nodes {
            for slot in &node.items {
                items.push(ItemAssignment {
                    room: slot.room,
                    id: slot.id,
                    kind: slot.kind,
                    name: self.catalog.name(slot.kind),
                    amount: slot.amount,
                });
            }
        }
        items.sort_by_key(|x| (x.room, x.id));

        Randomization {
            seed,
            player: self.settings.player,
            scenario: self.settings.scenario,
            doors,
            items,
            all_rooms_reachable: graph.all_visited(),
        }
    }
}
