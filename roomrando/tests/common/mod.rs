use hashbrown::HashSet;
use roomrando::randomize::Randomization;
use roomrando_game::{
    DoorDescription, DoorEntrance, ItemCatalog, ItemDefinition, ItemDescription, ItemGroup,
    MapDescription, RoomDescription, RoomId, StartEndDescription,
};

pub const AMMO: u8 = 1;
pub const HERB: u8 = 2;
pub const HANDGUN: u8 = 3;
pub const SPADE_KEY: u8 = 0x10;
pub const HEART_KEY: u8 = 0x11;

pub fn catalog() -> ItemCatalog {
    catalog_inner(false)
}

/// Same catalog, but keys are consumed on use (one copy per gate).
pub fn catalog_consumable_keys() -> ItemCatalog {
    catalog_inner(true)
}

fn catalog_inner(consumable_keys: bool) -> ItemCatalog {
    let def = |kind, name: &str, group, max_amount, consumable| ItemDefinition {
        kind,
        name: name.to_string(),
        group,
        max_amount,
        probability: 1.0,
        ammo: if group == ItemGroup::Weapon {
            vec![AMMO]
        } else {
            vec![]
        },
        consumable,
        optional: false,
    };
    ItemCatalog::new(vec![
        def(AMMO, "Handgun Ammo", ItemGroup::Ammo, 60, false),
        def(HERB, "Green Herb", ItemGroup::Heal, 1, false),
        def(HANDGUN, "Handgun", ItemGroup::Weapon, 18, false),
        def(SPADE_KEY, "Spade Key", ItemGroup::Key, 1, consumable_keys),
        def(HEART_KEY, "Heart Key", ItemGroup::Key, 1, consumable_keys),
    ])
}

/// `count` rooms in a cycle, two doors each, a few spare pickups per
/// room. Start is the first room, end the last.
pub fn ring_map(count: usize) -> MapDescription {
    assert!((3..=15).contains(&count));
    let room_name = |i: usize| format!("1{i:02X}");
    let mut map = MapDescription::default();
    map.start_end.push(StartEndDescription {
        start: room_name(0).parse().unwrap(),
        end: room_name(count - 1).parse().unwrap(),
        player: None,
        scenario: None,
        door_rando: None,
    });
    for i in 0..count {
        let prev = room_name((i + count - 1) % count);
        let next = room_name((i + 1) % count);
        map.rooms.insert(
            room_name(i).parse().unwrap(),
            RoomDescription {
                doors: vec![door(&prev, 0, &[]), door(&next, 1, &[])],
                items: vec![item(0, AMMO), item(1, HERB)],
                ..Default::default()
            },
        );
    }
    map
}

pub fn entrance() -> Option<DoorEntrance> {
    Some(DoorEntrance {
        x: 0,
        y: 0,
        z: 0,
        d: 0,
        floor: 0,
        camera: 0,
    })
}

pub fn door(target: &str, id: u8, requires: &[u8]) -> DoorDescription {
    DoorDescription {
        target: target.to_string(),
        id: Some(id),
        entrance: entrance(),
        requires: requires.to_vec(),
        ..Default::default()
    }
}

pub fn item(id: u8, kind: u8) -> ItemDescription {
    ItemDescription {
        id,
        kind: Some(kind),
        amount: Some(1),
        ..Default::default()
    }
}

/// 100 (start, free slots) -> 101 (Spade Key gate, key room) ->
/// 102 (Heart Key gate, end).
pub fn three_room_map() -> MapDescription {
    let mut map = MapDescription::default();
    map.start_end.push(StartEndDescription {
        start: "100".parse().unwrap(),
        end: "102".parse().unwrap(),
        player: None,
        scenario: None,
        door_rando: None,
    });
    map.rooms.insert(
        "100".parse().unwrap(),
        RoomDescription {
            doors: vec![door("101", 0, &[SPADE_KEY])],
            items: vec![item(0, AMMO), item(1, HERB), item(2, AMMO)],
            ..Default::default()
        },
    );
    map.rooms.insert(
        "101".parse().unwrap(),
        RoomDescription {
            doors: vec![door("100", 0, &[]), door("102", 1, &[HEART_KEY])],
            items: vec![item(0, SPADE_KEY), item(1, HERB)],
            ..Default::default()
        },
    );
    map.rooms.insert(
        "102".parse().unwrap(),
        RoomDescription {
            doors: vec![door("101", 0, &[])],
            items: vec![item(0, HEART_KEY)],
            ..Default::default()
        },
    );
    map
}

/// Replays the generated world like a player would: walk every door
/// whose keys are in hand, pick up every reachable item, repeat until
/// nothing changes. True when the end room gets visited.
pub fn solvable(map: &MapDescription, catalog: &ItemCatalog, result: &Randomization) -> bool {
    let start = map.start_end[0].start;
    let end = map.start_end[0].end;

    let mut have: HashSet<u8> = HashSet::new();
    let mut visited: HashSet<RoomId> = HashSet::new();
    loop {
        let before = (visited.len(), have.len());

        visited.clear();
        visited.insert(start);
        let mut stack = vec![start];
        while let Some(room) = stack.pop() {
            for assignment in result.doors.iter().filter(|x| x.room == room) {
                let requires = map.rooms[&room]
                    .doors
                    .iter()
                    .find(|x| x.id == Some(assignment.door_id))
                    .map(|x| x.requires.clone())
                    .unwrap_or_default();
                if assignment.lock != roomrando_game::LockKind::None {
                    continue;
                }
                if !requires.iter().all(|x| have.contains(x)) {
                    continue;
                }
                if visited.insert(assignment.target_room) {
                    stack.push(assignment.target_room);
                }
            }
        }

        for assignment in &result.items {
            if !visited.contains(&assignment.room) {
                continue;
            }
            let requires = map.rooms[&assignment.room]
                .items
                .iter()
                .find(|x| x.id == assignment.id)
                .map(|x| x.requires.clone())
                .unwrap_or_default();
            if requires.iter().all(|x| have.contains(x)) && catalog.is_key(assignment.kind) {
                have.insert(assignment.kind);
            }
        }

        if (visited.len(), have.len()) == before {
            break;
        }
    }
    visited.contains(&end)
}
