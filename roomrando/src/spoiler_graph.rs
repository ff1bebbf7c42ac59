//! Graphviz DOT rendering of the final play graph, for eyeballing a
//! seed's route and key placement.

use crate::graph::{PlayGraph, PlayNode};
use roomrando_game::{ItemCatalog, LockKind, RoomCategory};
use std::fmt::Write;

fn node_color(graph: &PlayGraph, idx: usize, node: &PlayNode) -> Option<&'static str> {
    match node.category {
        RoomCategory::Box => Some("green"),
        RoomCategory::Bridge => Some("orange"),
        RoomCategory::Segment => Some("red"),
        _ if idx == graph.start || idx == graph.end => Some("lightblue"),
        _ => None,
    }
}

fn node_label(node: &PlayNode, catalog: &ItemCatalog) -> String {
    let mut label = node.room.to_string();
    for item in &node.placed_key_items {
        let _ = write!(label, "\\n{} x{}", catalog.name(item.kind), item.amount);
    }
    let items_left = node.items.len().saturating_sub(node.placed_key_items.len());
    if items_left > 0 {
        let potential = node
            .free_key_slots()
            .saturating_sub(node.placed_key_items.len());
        let _ = write!(label, "\\n{potential}/{items_left} other items");
    }
    label
}

fn accessible(lock: LockKind) -> bool {
    lock == LockKind::None || lock == LockKind::Unblock
}

/// Renders the connected part of the graph as DOT. Each two-way
/// connection appears once, drawn from the shallower room.
pub fn render_dot(graph: &PlayGraph, catalog: &ItemCatalog) -> String {
    let mut out = String::new();
    out.push_str("graph world {\n");
    out.push_str("    node [shape=box];\n");

    for (idx, node) in graph.nodes.iter().enumerate() {
        if !node.visited {
            continue;
        }
        let mut attrs = format!("label=\"{}\"", node_label(node, catalog));
        if let Some(color) = node_color(graph, idx, node) {
            let _ = write!(attrs, ", style=filled, fillcolor={color}");
        }
        let _ = writeln!(out, "    \"{}\" [{}];", node.room, attrs);
    }

    for (idx, node) in graph.nodes.iter().enumerate() {
        if !node.visited {
            continue;
        }
        for edge in &node.edges {
            let Some(target) = edge.target else {
                continue;
            };
            if !accessible(edge.lock) {
                continue;
            }
            let target_node = graph.node(target);
            let opposite = target_node.edges.iter().find(|x| x.target == Some(idx));
            // Draw each mutual connection from the shallower side only.
            if opposite.is_some_and(|x| accessible(x.lock)) && target_node.depth < node.depth {
                continue;
            }

            let mut label = match edge.door_id {
                Some(door) => door.to_string(),
                None => String::new(),
            };
            if edge.no_return {
                label.push_str("\\n(no return)");
            }
            if edge.lock == LockKind::None {
                if opposite.is_some_and(|x| x.lock == LockKind::Side) {
                    label.push_str("\\n(locked)");
                }
            } else {
                let _ = write!(label, "\\n({:?})", edge.lock);
            }
            for &key in &edge.requires {
                let _ = write!(label, "\\n[{}]", catalog.name(key));
            }

            let _ = writeln!(
                out,
                "    \"{}\" -- \"{}\" [label=\"{}\"];",
                node.room, target_node.room, label
            );
        }
    }

    out.push_str("}\n");
    out
}
