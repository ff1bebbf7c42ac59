//! In-memory play graph: one node per room, one edge per door side.
//! Nodes live in an arena (`Vec<PlayNode>`) and refer to each other by
//! index; an edge's reverse direction is a separate edge on the target
//! node, kept in sync by the door randomizer rather than structurally
//! linked.

use crate::randomize::GenerateError;
use crate::settings::RandomizerSettings;
use hashbrown::HashMap;
use roomrando_game::{
    Applicability, DoorEntrance, DoorId, DoorTarget, ItemKindId, ItemPriority, KeyId,
    LockKind, MapDescription, RoomCategory, RoomId, RoomItemId,
};

pub type NodeIdx = usize; // Index into PlayGraph.nodes

/// Identifies one edge: (owning node, position in its edge list).
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct EdgeId {
    pub node: NodeIdx,
    pub edge: usize,
}

impl EdgeId {
    pub fn new(node: NodeIdx, edge: usize) -> Self {
        EdgeId { node, edge }
    }
}

/// One item slot within a room.
#[derive(Clone, Debug, PartialEq)]
pub struct ItemSlot {
    pub room: RoomId,
    pub id: u8,
    pub kind: ItemKindId,
    pub amount: u8,
    pub requires: Vec<KeyId>,
    pub requires_room: Vec<RoomId>,
    pub priority: ItemPriority,
}

impl ItemSlot {
    pub fn slot_id(&self) -> RoomItemId {
        RoomItemId::new(self.room, self.id)
    }
}

/// One side of a door.
#[derive(Clone, Debug)]
pub struct PlayEdge {
    pub parent: NodeIdx,
    pub original_target: RoomId,
    /// Door id named by the original target ("SRR:door"), if any.
    pub original_target_door: Option<DoorId>,
    pub target: Option<NodeIdx>,
    pub lock: LockKind,
    pub lock_id: u8,
    pub no_return: bool,
    pub requires: Vec<KeyId>,
    pub requires_room: Vec<NodeIdx>,
    pub door_id: Option<DoorId>,
    /// Spawn point in this room for arrivals through this edge.
    pub entrance: Option<DoorEntrance>,
    /// Spawn point at the far side, taken from the partner edge once
    /// connected.
    pub target_entrance: Option<DoorEntrance>,
    pub randomize: bool,
    pub no_unlock: bool,
    pub is_bridge_edge: bool,
}

impl PlayEdge {
    /// Key-richness score used to avoid wasting the most demanding edge
    /// on a loopback or leaf.
    pub fn key_score(&self, accumulated: usize) -> usize {
        accumulated + self.requires.len() + self.requires_room.len()
    }
}

#[derive(Clone, Debug)]
pub struct PlayNode {
    pub room: RoomId,
    pub edges: Vec<PlayEdge>,
    pub items: Vec<ItemSlot>,
    /// (local slot id, source slot) pairs: the local slot mirrors the
    /// source's final content.
    pub linked_slots: Vec<(u8, RoomItemId)>,
    pub requires: Vec<KeyId>,
    pub requires_room: Vec<NodeIdx>,
    pub category: RoomCategory,
    pub visited: bool,
    pub depth: usize,
    /// Every key needed to reach this room, accumulated while the graph
    /// is connected. Invariant: a superset of the connecting
    /// predecessor's set.
    pub all_required_keys: Vec<KeyId>,
    /// Key items placed here by the item randomizer (spoiler output).
    pub placed_key_items: Vec<ItemSlot>,
}

impl PlayNode {
    fn new(room: RoomId) -> Self {
        PlayNode {
            room,
            edges: Vec::new(),
            items: Vec::new(),
            linked_slots: Vec::new(),
            requires: Vec::new(),
            requires_room: Vec::new(),
            category: RoomCategory::Normal,
            visited: false,
            depth: 0,
            all_required_keys: Vec::new(),
            placed_key_items: Vec::new(),
        }
    }

    /// Item slots that could host a key item right now: normal priority
    /// and no key requirement of their own.
    pub fn free_key_slots(&self) -> usize {
        self.items
            .iter()
            .filter(|x| x.priority == ItemPriority::Normal && x.requires.is_empty())
            .count()
    }
}

#[derive(Debug)]
pub struct PlayGraph {
    pub nodes: Vec<PlayNode>,
    pub start: NodeIdx,
    pub end: NodeIdx,
    index: HashMap<RoomId, NodeIdx>,
    /// Pre-offset lock ids reserved by the game's own scripts.
    pub reserved_lock_ids: Vec<u8>,
}

impl PlayGraph {
    pub fn node(&self, idx: NodeIdx) -> &PlayNode {
        &self.nodes[idx]
    }

    pub fn node_mut(&mut self, idx: NodeIdx) -> &mut PlayNode {
        &mut self.nodes[idx]
    }

    pub fn edge(&self, id: EdgeId) -> &PlayEdge {
        &self.nodes[id.node].edges[id.edge]
    }

    pub fn edge_mut(&mut self, id: EdgeId) -> &mut PlayEdge {
        &mut self.nodes[id.node].edges[id.edge]
    }

    pub fn find_node(&self, room: RoomId) -> Option<NodeIdx> {
        self.index.get(&room).copied()
    }

    pub fn edge_ids(&self, node: NodeIdx) -> impl Iterator<Item = EdgeId> {
        (0..self.nodes[node].edges.len()).map(move |e| EdgeId::new(node, e))
    }

    /// Human-readable "room:door [keys]" label for logging.
    pub fn edge_label(&self, id: EdgeId) -> String {
        let edge = self.edge(id);
        let node = self.node(id.node);
        let mut s = match edge.door_id {
            Some(door) => format!("{}:{}", node.room, door),
            None => format!("{}:?", node.room),
        };
        if !edge.requires.is_empty() {
            s.push_str(&format!(" {:?}", edge.requires));
        }
        s
    }

    pub fn all_visited(&self) -> bool {
        self.nodes.iter().all(|x| x.visited)
    }
}

/// Builds the play graph from the map description, applying
/// player/scenario/variant filters. The map description is injected; no
/// global state is consulted.
pub struct GraphBuilder<'a> {
    map: &'a MapDescription,
    settings: &'a RandomizerSettings,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(map: &'a MapDescription, settings: &'a RandomizerSettings) -> Self {
        GraphBuilder { map, settings }
    }

    fn applies<T: Applicability>(&self, x: &T) -> bool {
        x.applies(
            self.settings.player,
            self.settings.scenario,
            self.settings.random_doors,
        )
    }

    pub fn build(&self) -> Result<PlayGraph, GenerateError> {
        let room_ids = self.map.room_ids();
        let mut nodes: Vec<PlayNode> = Vec::with_capacity(room_ids.len());
        let mut index: HashMap<RoomId, NodeIdx> = HashMap::new();
        for &room in &room_ids {
            index.insert(room, nodes.len());
            nodes.push(PlayNode::new(room));
        }

        let resolve = |room: RoomId| -> Result<NodeIdx, GenerateError> {
            index
                .get(&room)
                .copied()
                .ok_or(GenerateError::MissingMapDefinition { room })
        };

        for &room in &room_ids {
            let idx = resolve(room)?;
            let desc = self.map.room(room).unwrap();

            let mut node = PlayNode::new(room);
            node.requires = desc.requires.clone();
            for &req_room in &desc.requires_room {
                node.requires_room.push(resolve(req_room)?);
            }
            for cat in &desc.rando {
                if self.applies(cat) {
                    node.category = cat.category;
                }
            }

            for door in &desc.doors {
                if !self.applies(door) {
                    continue;
                }
                let target: DoorTarget =
                    door.target
                        .parse()
                        .map_err(|_| GenerateError::InvalidReference {
                            room,
                            reference: door.target.clone(),
                        })?;
                resolve(target.room)?;
                let mut edge = PlayEdge {
                    parent: idx,
                    original_target: target.room,
                    original_target_door: target.door,
                    target: None,
                    lock: door.lock.unwrap_or(LockKind::None),
                    lock_id: door.lock_id.unwrap_or(0),
                    no_return: door.no_return,
                    requires: door.requires.clone(),
                    requires_room: Vec::new(),
                    door_id: door.id,
                    entrance: door.entrance,
                    target_entrance: None,
                    randomize: door.randomize.unwrap_or(true),
                    no_unlock: door.no_unlock,
                    is_bridge_edge: door.is_bridge_edge,
                };
                for &req_room in &door.requires_room {
                    edge.requires_room.push(resolve(req_room)?);
                }
                node.edges.push(edge);
            }

            for item in &desc.items {
                if !self.applies(item) {
                    continue;
                }
                if let Some(link) = &item.link {
                    let source: RoomItemId =
                        link.parse().map_err(|_| GenerateError::InvalidReference {
                            room,
                            reference: link.clone(),
                        })?;
                    resolve(source.room)?;
                    node.linked_slots.push((item.id, source));
                    continue;
                }
                node.items.push(ItemSlot {
                    room,
                    id: item.id,
                    kind: item.kind.unwrap_or(0),
                    amount: item.amount.unwrap_or(1),
                    requires: item.requires.clone(),
                    requires_room: item.requires_room.clone(),
                    priority: item.priority,
                });
            }

            // Removed fixed items show up as kind 0.
            node.items.retain(|x| x.kind != 0);
            nodes[idx] = node;
        }

        let start_end = self
            .map
            .start_end
            .iter()
            .find(|x| self.applies(*x))
            .ok_or(GenerateError::NoStartEnd {
                player: self.settings.player,
                scenario: self.settings.scenario,
            })?;
        let start = resolve(start_end.start)?;
        let end = resolve(start_end.end)?;

        Ok(PlayGraph {
            nodes,
            start,
            end,
            index,
            reserved_lock_ids: self.map.reserved_lock_ids.clone(),
        })
    }
}
