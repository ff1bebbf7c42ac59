//! Key item placement and non-key distribution. Runs an alternating
//! reachability search / placement loop: every key demanded by a door
//! or gated slot on the frontier gets moved into a slot that is already
//! reachable, then the search expands and the loop repeats until the
//! end room is reached and only optional keys remain outstanding.

use crate::graph::{ItemSlot, NodeIdx, PlayGraph};
use crate::randomize::rng_table::ProbabilityTable;
use crate::randomize::GenerateError;
use crate::settings::RandomizerSettings;
use hashbrown::HashSet;
use log::info;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use roomrando_game::{
    ItemCatalog, ItemGroup, ItemKindId, ItemPriority, KeyId, LockKind, RoomItemId,
};
use std::collections::VecDeque;

/// Hard cap on placement iterations; a graph that cannot settle within
/// this many rounds is treated as unsolvable.
pub const ITEM_PLACEMENT_LOOP_LIMIT: usize = 5000;

/// An outstanding key demand discovered by the search: the keys, the
/// slot they guard (if any), and whether a door raised it.
#[derive(Clone, Debug, PartialEq)]
struct KeyRequirement {
    keys: Vec<KeyId>,
    item: Option<ItemSlot>,
    is_door: bool,
}

impl KeyRequirement {
    fn new(mut keys: Vec<KeyId>, item: Option<ItemSlot>, is_door: bool) -> Self {
        keys.sort();
        KeyRequirement {
            keys,
            item,
            is_door,
        }
    }
}

pub struct ItemRandomizer<'a> {
    graph: &'a mut PlayGraph,
    catalog: &'a ItemCatalog,
    settings: &'a RandomizerSettings,
    rng: &'a mut StdRng,
    /// Reachable, still-unassigned slots.
    current_pool: Vec<ItemSlot>,
    /// Slots frozen at checkpoints, redistributed at the end.
    shuffle_pool: Vec<ItemSlot>,
    /// Final assignments, applied to the graph last.
    defined: Vec<ItemSlot>,
    required: Vec<KeyRequirement>,
    have: HashSet<KeyId>,
    visited_rooms: HashSet<NodeIdx>,
    visited_slots: HashSet<RoomItemId>,
}

impl<'a> ItemRandomizer<'a> {
    pub fn new(
        graph: &'a mut PlayGraph,
        catalog: &'a ItemCatalog,
        settings: &'a RandomizerSettings,
        rng: &'a mut StdRng,
    ) -> Self {
        ItemRandomizer {
            graph,
            catalog,
            settings,
            rng,
            current_pool: Vec::new(),
            shuffle_pool: Vec::new(),
            defined: Vec::new(),
            required: Vec::new(),
            have: HashSet::new(),
            visited_rooms: HashSet::new(),
            visited_slots: HashSet::new(),
        }
    }

    pub fn randomize(&mut self) -> Result<(), GenerateError> {
        info!("placing key items");
        let mut checkpoint = self.graph.start;
        let end = self.graph.end;

        let mut loop_limit = ITEM_PLACEMENT_LOOP_LIMIT;
        while !self.visited_rooms.contains(&end) || !self.just_optional_items_left() {
            if loop_limit == 0 {
                return Err(GenerateError::IterationLimitExceeded {
                    limit: ITEM_PLACEMENT_LOOP_LIMIT,
                });
            }
            loop_limit -= 1;

            self.place_key_item(self.settings.random_doors || self.settings.alternative_routes)?;
            let new_checkpoint = self.search(checkpoint);
            if new_checkpoint != checkpoint && self.required.is_empty() {
                info!("    ------------ checkpoint ------------");
                if self.settings.random_doors {
                    // Beyond a one-way door the old pool is out of
                    // reach; freeze it for the non-key pass and restart
                    // the inventory from what the route so far granted.
                    let moved = self
                        .current_pool
                        .drain(..)
                        .filter(|x| x.priority != ItemPriority::Fixed);
                    self.shuffle_pool.extend(moved);
                    self.have.clear();
                    for &key in &self.graph.node(new_checkpoint).all_required_keys {
                        self.have.insert(key);
                    }
                }
                checkpoint = new_checkpoint;
            }
        }
        let moved = self
            .current_pool
            .drain(..)
            .filter(|x| x.priority != ItemPriority::Fixed);
        self.shuffle_pool.extend(moved);

        if !self.settings.random_doors && self.settings.shuffle_items {
            self.shuffle_remaining_pool()?;
        } else {
            self.randomise_remaining_pool()?;
        }

        self.set_linked_items()?;
        self.apply_defined_pool();
        Ok(())
    }

    fn just_optional_items_left(&self) -> bool {
        self.required.iter().all(|x| {
            !x.is_door
                && x.item
                    .as_ref()
                    .map_or(true, |item| self.catalog.is_optional_key(item.kind))
        })
    }

    /// Expands reachability until stable. A single pass can stall when a
    /// room requirement is discovered after the room guarding it was
    /// already walked, so the inner search repeats until the visited
    /// count stops growing.
    fn search(&mut self, start: NodeIdx) -> NodeIdx {
        let mut visited = self.visited_rooms.len();
        loop {
            let result = self.search_internal(start);
            let now = self.visited_rooms.len();
            if now <= visited {
                return result;
            }
            visited = now;
        }
    }

    fn search_internal(&mut self, start: NodeIdx) -> NodeIdx {
        let mut checkpoint = start;
        let mut seen: HashSet<NodeIdx> = HashSet::new();
        let mut stack = vec![start];
        while let Some(node_idx) = stack.pop() {
            seen.insert(node_idx);

            if self.visited_rooms.insert(node_idx) {
                let (room_requires, items) = {
                    let node = self.graph.node(node_idx);
                    (node.requires.clone(), node.items.clone())
                };
                // Keys the room itself demands guard no particular slot.
                if !room_requires.is_empty() {
                    self.push_required(KeyRequirement::new(room_requires, None, false));
                }
                for item in items {
                    if item.requires.is_empty() {
                        self.add_item_to_pool(item);
                    } else {
                        self.push_required(KeyRequirement::new(
                            item.requires.clone(),
                            Some(item),
                            false,
                        ));
                    }
                }
            }

            let edges = self.graph.node(node_idx).edges.clone();
            for edge in edges {
                let Some(target) = edge.target else {
                    continue;
                };
                if edge.lock != LockKind::None && edge.lock != LockKind::Unblock {
                    continue;
                }
                if !edge
                    .requires_room
                    .iter()
                    .all(|x| self.visited_rooms.contains(x))
                {
                    continue;
                }

                let mut missing: Vec<KeyId> = edge
                    .requires
                    .iter()
                    .copied()
                    .filter(|x| !self.have.contains(x))
                    .collect();
                missing.sort();
                missing.dedup();
                let just_optional = missing.iter().all(|&x| self.catalog.is_optional_key(x));
                if missing.is_empty() || just_optional {
                    if seen.contains(&target) {
                        continue;
                    }
                    if edge.no_return {
                        // Crossing now would abandon this side; remember
                        // it as the next checkpoint instead.
                        if !self.visited_rooms.contains(&target) {
                            checkpoint = target;
                        }
                    } else {
                        stack.push(target);
                    }
                } else {
                    self.push_required(KeyRequirement::new(missing, None, true));
                }
            }
        }
        checkpoint
    }

    fn push_required(&mut self, requirement: KeyRequirement) {
        if !self.required.contains(&requirement) {
            self.required.push(requirement);
        }
    }

    fn add_item_to_pool(&mut self, item: ItemSlot) {
        if self.visited_slots.insert(item.slot_id()) {
            self.current_pool.push(item);
        }
    }

    fn update_required_item_list(&mut self) {
        let ready: Vec<ItemSlot> = self
            .required
            .iter()
            .filter(|x| x.item.is_some() && x.keys.iter().all(|k| self.have.contains(k)))
            .filter_map(|x| x.item.clone())
            .collect();
        for item in ready {
            self.add_item_to_pool(item);
        }
        let have = &self.have;
        self.required
            .retain(|x| !x.keys.iter().all(|k| have.contains(k)));
    }

    /// Doors first, then cheaper requirements, so progress-gating keys
    /// land before slot-gating ones.
    fn key_item_place_order(&mut self) -> Vec<KeyId> {
        self.update_required_item_list();
        let mut requirements = self.required.clone();
        requirements.shuffle(self.rng);
        requirements.sort_by_key(|x| (usize::from(!x.is_door), x.keys.len()));
        requirements
            .iter()
            .flat_map(|x| x.keys.iter().copied())
            .filter(|x| !self.have.contains(x))
            .collect()
    }

    fn place_key_item(&mut self, alternative_routes: bool) -> Result<(), GenerateError> {
        if self.key_item_place_order().is_empty() {
            return Ok(());
        }

        let check_list = self.key_item_place_order();
        for &req in &check_list {
            if self.place_key_item_single(req, alternative_routes)? {
                let quantity = self.key_quantity(req);
                for i in 1..quantity {
                    if !self.place_key_item_single(req, true)? {
                        return Err(GenerateError::UnsolvableSeed {
                            reason: format!(
                                "unable to place copy {} of {}",
                                i + 1,
                                self.catalog.name(req)
                            ),
                        });
                    }
                }
                self.update_required_item_list();
                return Ok(());
            }
        }

        if !alternative_routes {
            // Nothing placeable on the direct route; retry allowing keys
            // to be pulled from not-yet-reached slots.
            return self.place_key_item(true);
        }

        info!("    unable to place the following key items:");
        for &key in &check_list {
            info!("        {}", self.catalog.name(key));
        }
        if check_list.iter().any(|&x| !self.catalog.is_optional_key(x)) {
            return Err(GenerateError::UnsolvableSeed {
                reason: "unable to find a key item to swap".to_string(),
            });
        }
        self.required.clear();
        Ok(())
    }

    /// Consumable keys need one copy per gate; everything else one.
    fn key_quantity(&self, kind: KeyId) -> u8 {
        if self.catalog.is_consumable_key(kind) {
            self.total_key_requirement_count(self.graph.start, kind)
        } else {
            1
        }
    }

    fn place_key_item_single(
        &mut self,
        req: KeyId,
        alternative_route: bool,
    ) -> Result<bool, GenerateError> {
        let mut index = match self.find_new_key_item_location(req, false) {
            Some(index) => index,
            None => {
                if self.settings.random_doors {
                    return Err(GenerateError::UnsolvableSeed {
                        reason: "not enough item pickups for the required key items".to_string(),
                    });
                }
                match self.find_new_key_item_location(req, true) {
                    Some(index) => index,
                    None => {
                        return Err(GenerateError::UnsolvableSeed {
                            reason: format!(
                                "unable to find a location for {}",
                                self.catalog.name(req)
                            ),
                        })
                    }
                }
            }
        };
        let mut item_entry = self.current_pool[index].clone();

        if !self.settings.random_doors {
            let mut future_item = false;
            let mut original_index = self.current_pool.iter().position(|x| x.kind == req);
            if original_index.is_none() && alternative_route {
                if let Some((future_node, item_index)) = self.find_key_in_later_area(req) {
                    // Swap the key out of its future slot: the slot gets
                    // the displaced item, the key moves here.
                    let (future_room, future_id, future_amount) = {
                        let slot = &mut self.graph.node_mut(future_node).items[item_index];
                        let out = (slot.room, slot.id, slot.amount);
                        slot.kind = item_entry.kind;
                        slot.amount = item_entry.amount;
                        out
                    };
                    item_entry.amount = future_amount;
                    future_item = true;

                    for requirement in &mut self.required {
                        if let Some(item) = &mut requirement.item {
                            if item.room == future_room && item.id == future_id {
                                item.kind = item_entry.kind;
                                item.amount = item_entry.amount;
                            }
                        }
                    }
                }
            }
            if !future_item {
                if original_index.is_none() {
                    // The original copy may sit in a previous
                    // checkpoint's frozen pool.
                    if let Some(shuffle_index) =
                        self.shuffle_pool.iter().position(|x| x.kind == req)
                    {
                        let item = self.shuffle_pool.remove(shuffle_index);
                        self.current_pool.push(item);
                        original_index = Some(self.current_pool.len() - 1);
                    }
                }
                let Some(original_index) = original_index else {
                    return Ok(false);
                };

                // A fixed original cannot move; place the key in situ.
                if self.current_pool[original_index].priority == ItemPriority::Fixed {
                    index = original_index;
                    item_entry = self.current_pool[original_index].clone();
                }

                let key_count = self.current_pool[original_index].amount;
                self.current_pool[original_index].kind = item_entry.kind;
                self.current_pool[original_index].amount = item_entry.amount;
                item_entry.amount = key_count;
            }
        } else {
            let node = self
                .graph
                .find_node(item_entry.room)
                .ok_or(GenerateError::MissingMapDefinition {
                    room: item_entry.room,
                })?;
            item_entry.amount = self.total_key_requirement_count(node, req);
        }
        item_entry.kind = req;

        self.have.insert(req);
        self.current_pool.remove(index);
        self.push_defined(item_entry.clone())?;
        let node = self
            .graph
            .find_node(item_entry.room)
            .ok_or(GenerateError::MissingMapDefinition {
                room: item_entry.room,
            })?;
        info!(
            "    placing key item ({} x{}) at {}",
            self.catalog.name(item_entry.kind),
            item_entry.amount,
            item_entry.slot_id()
        );
        self.graph.node_mut(node).placed_key_items.push(item_entry);
        Ok(true)
    }

    fn find_new_key_item_location(&mut self, kind: KeyId, include_low: bool) -> Option<usize> {
        let mut order: Vec<usize> = (0..self.current_pool.len()).collect();
        order.shuffle(self.rng);

        let mut best = None;
        for i in order {
            let item = &self.current_pool[i];
            if item.priority == ItemPriority::Fixed {
                continue;
            }
            if !include_low && item.priority == ItemPriority::Low {
                continue;
            }
            if !item.requires.iter().all(|x| self.have.contains(x)) {
                continue;
            }
            let rooms_visited = item.requires_room.iter().all(|&room| {
                self.graph
                    .find_node(room)
                    .is_some_and(|x| self.visited_rooms.contains(&x))
            });
            if !rooms_visited {
                continue;
            }
            if item.kind == kind {
                // Same kind: usable, but prefer displacing something else.
                best = Some(i);
            } else {
                return Some(i);
            }
        }
        best
    }

    fn find_key_in_later_area(&self, kind: KeyId) -> Option<(NodeIdx, usize)> {
        for (node_idx, node) in self.graph.nodes.iter().enumerate() {
            for (item_idx, item) in node.items.iter().enumerate() {
                if item.kind == kind
                    && item.priority != ItemPriority::Fixed
                    && !self.visited_slots.contains(&item.slot_id())
                {
                    return Some((node_idx, item_idx));
                }
            }
        }
        None
    }

    /// How many copies of `kind` the world demands, walking every room
    /// reachable from `start`.
    fn total_key_requirement_count(&self, start: NodeIdx, kind: KeyId) -> u8 {
        let mut total: u8 = 0;
        let mut visited: HashSet<NodeIdx> = HashSet::new();
        let mut stack = vec![start];
        visited.insert(start);
        while let Some(node_idx) = stack.pop() {
            let node = self.graph.node(node_idx);
            if node.requires.contains(&kind) {
                total += 1;
            }
            for item in &node.items {
                if item.requires.contains(&kind) {
                    total += 1;
                }
            }
            for edge in &node.edges {
                if edge.requires.contains(&kind) {
                    total += 1;
                }
                if let Some(target) = edge.target {
                    if edge.lock != LockKind::Always && visited.insert(target) {
                        stack.push(target);
                    }
                }
            }
        }
        total.max(1)
    }

    /// Redistributes the frozen pool as weapons, ammo, health and ink
    /// ribbons according to the configured ratios.
    fn randomise_remaining_pool(&mut self) -> Result<(), GenerateError> {
        info!("randomizing non-key items");
        if self.settings.ratio_ammo == 0
            && self.settings.ratio_health == 0
            && self.settings.ratio_ink_ribbons == 0
        {
            return Err(GenerateError::InvalidSettings {
                reason: "no item ratios have been set".to_string(),
            });
        }

        // Low priority slots go to the back so they soak up the
        // leftovers of whichever table runs last.
        let mut normal: Vec<ItemSlot> = self
            .shuffle_pool
            .iter()
            .filter(|x| x.priority == ItemPriority::Normal)
            .cloned()
            .collect();
        normal.shuffle(self.rng);
        let mut shuffled: VecDeque<ItemSlot> = normal.into();
        shuffled.extend(
            self.shuffle_pool
                .iter()
                .filter(|x| x.priority == ItemPriority::Low)
                .cloned(),
        );
        self.shuffle_pool.clear();

        // Weapons first so every enabled weapon exists somewhere.
        let mut weapon_pool: Vec<ItemKindId> = self
            .catalog
            .weapons()
            .into_iter()
            .filter(|&x| self.settings.weapon_enabled(x))
            .collect();
        let mut available_weapons: Vec<ItemKindId> = Vec::new();
        while let Some(weapon) = weapon_pool.pop() {
            available_weapons.push(weapon);
            let amount = self.random_amount(weapon, true);
            self.spawn_item(&mut shuffled, weapon, amount)?;
        }

        let mut ammo_kinds: Vec<ItemKindId> = Vec::new();
        for &weapon in &available_weapons {
            for kind in self.catalog.ammo_for_weapon(weapon) {
                if !ammo_kinds.contains(&kind) {
                    ammo_kinds.push(kind);
                }
            }
        }

        let mut ammo_table = ProbabilityTable::new();
        for kind in ammo_kinds {
            ammo_table.add(kind, self.catalog.probability(kind));
        }
        let mut health_table = ProbabilityTable::new();
        for kind in self.catalog.kinds_in_group(ItemGroup::Heal) {
            health_table.add(kind, self.catalog.probability(kind));
        }
        let mut ink_table = ProbabilityTable::new();
        for kind in self.catalog.kinds_in_group(ItemGroup::InkRibbon) {
            ink_table.add(kind, self.catalog.probability(kind));
        }

        let total_ratio = f64::from(self.settings.ratio_ammo)
            + f64::from(self.settings.ratio_health)
            + f64::from(self.settings.ratio_ink_ribbons);
        let bucket = |ratio: u8| -> usize {
            (f64::from(ratio) / total_ratio * shuffled.len() as f64).ceil() as usize
        };
        let mut proportions: Vec<(usize, ProbabilityTable<ItemKindId>)> = vec![
            (bucket(self.settings.ratio_ammo), ammo_table),
            (bucket(self.settings.ratio_health), health_table),
            (bucket(self.settings.ratio_ink_ribbons), ink_table),
        ];
        proportions.retain(|x| x.0 != 0 && !x.1.is_empty());
        proportions.sort_by_key(|x| x.0);
        if let Some(last) = proportions.last_mut() {
            // The largest bucket absorbs rounding leftovers.
            last.0 = usize::MAX;
        }
        for (count, table) in proportions {
            self.spawn_items(&mut shuffled, count, &table)?;
        }
        Ok(())
    }

    fn spawn_items(
        &mut self,
        pool: &mut VecDeque<ItemSlot>,
        count: usize,
        table: &ProbabilityTable<ItemKindId>,
    ) -> Result<(), GenerateError> {
        for _ in 0..count {
            let kind = table.next(self.rng);
            let amount = self.random_amount(kind, false);
            if !self.spawn_item(pool, kind, amount)? {
                break;
            }
        }
        Ok(())
    }

    fn spawn_item(
        &mut self,
        pool: &mut VecDeque<ItemSlot>,
        kind: ItemKindId,
        amount: u8,
    ) -> Result<bool, GenerateError> {
        let Some(mut entry) = pool.pop_front() else {
            return Ok(false);
        };
        entry.kind = kind;
        entry.amount = amount;
        info!(
            "    placed {} x{} at {}",
            self.catalog.name(entry.kind),
            entry.amount,
            entry.slot_id()
        );
        self.push_defined(entry)?;
        Ok(true)
    }

    /// Every slot receives exactly one final assignment; a second one
    /// means the pools went out of sync, which is a hard error.
    fn push_defined(&mut self, entry: ItemSlot) -> Result<(), GenerateError> {
        if self.defined.iter().any(|x| x.slot_id() == entry.slot_id()) {
            return Err(GenerateError::DuplicateItemSlot {
                slot: entry.slot_id(),
            });
        }
        self.defined.push(entry);
        Ok(())
    }

    fn random_amount(&mut self, kind: ItemKindId, full_quantity: bool) -> u8 {
        if self.catalog.group(kind) == ItemGroup::InkRibbon {
            return self.rng.gen_range(1..3);
        }
        let multiplier = if full_quantity {
            1.0
        } else {
            f64::from(self.settings.ammo_quantity) / 8.0
        };
        let max = ((f64::from(self.catalog.max_amount(kind))) * multiplier) as u8;
        self.rng.gen_range(1..=max.max(1))
    }

    /// Permutes the frozen pool in place instead of redistributing it.
    fn shuffle_remaining_pool(&mut self) -> Result<(), GenerateError> {
        info!("shuffling non-key items");
        let entries: Vec<ItemSlot> = self
            .shuffle_pool
            .iter()
            .filter(|x| x.priority != ItemPriority::Low)
            .cloned()
            .collect();
        let mut contents = entries.clone();
        contents.shuffle(self.rng);
        for (mut entry, content) in entries.into_iter().zip(contents) {
            entry.kind = content.kind;
            entry.amount = content.amount;
            info!(
                "    placed {} x{} at {}",
                self.catalog.name(entry.kind),
                entry.amount,
                entry.slot_id()
            );
            self.push_defined(entry)?;
        }
        self.shuffle_pool.clear();
        Ok(())
    }

    /// Copies final assignments into slots that mirror another slot.
    fn set_linked_items(&mut self) -> Result<(), GenerateError> {
        info!("setting up linked items");
        let links: Vec<(NodeIdx, u8, RoomItemId)> = self
            .graph
            .nodes
            .iter()
            .enumerate()
            .flat_map(|(idx, node)| {
                node.linked_slots
                    .iter()
                    .map(move |&(id, source)| (idx, id, source))
            })
            .collect();
        for (node_idx, id, source) in links {
            if let Some(entry) = self.defined.iter().find(|x| x.slot_id() == source) {
                let mut copy = entry.clone();
                copy.room = self.graph.node(node_idx).room;
                copy.id = id;
                info!(
                    "    {} x{} mirrored at {}",
                    self.catalog.name(copy.kind),
                    copy.amount,
                    copy.slot_id()
                );
                self.push_defined(copy)?;
            }
        }
        Ok(())
    }

    /// Writes the defined pool back into the graph's slots.
    fn apply_defined_pool(&mut self) {
        let defined = std::mem::take(&mut self.defined);
        for entry in &defined {
            let Some(node_idx) = self.graph.find_node(entry.room) else {
                continue;
            };
            let node = self.graph.node_mut(node_idx);
            match node.items.iter_mut().find(|x| x.id == entry.id) {
                Some(slot) => {
                    slot.kind = entry.kind;
                    slot.amount = entry.amount;
                }
                None => node.items.push(entry.clone()),
            }
        }
        self.defined = defined;
    }
}
