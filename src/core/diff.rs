//! Snapshot diffing for `/snapshot/diff`.
//!
//! Compares two full snapshots by node path and reports additions, removals
//! and per-field changes. The diff never touches ref assignment — refs stay
//! whatever the snapshot engine handed out.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::core::snapshot::{NodeRecord, Snapshot};

/// Fields compared per node, beyond script properties.
const TRACKED_FIELDS: &[&str] = &["position", "rotation", "scale", "visible", "text", "size"];

/// Structured difference between `old` and `new`.
pub fn diff_snapshots(old: &Snapshot, new: &Snapshot) -> Value {
    let old_map = flatten(&old.nodes);
    let new_map = flatten(&new.nodes);

    let mut added: Vec<&String> = new_map
        .keys()
        .filter(|path| !old_map.contains_key(*path))
        .collect();
    added.sort();
    let mut removed: Vec<&String> = old_map
        .keys()
        .filter(|path| !new_map.contains_key(*path))
        .collect();
    removed.sort();

    let mut changed = Map::new();
    for (path, new_node) in &new_map {
        let Some(old_node) = old_map.get(path) else {
            continue;
        };
        let fields = diff_node(old_node, new_node);
        if !fields.is_empty() {
            changed.insert(path.clone(), Value::Object(fields));
        }
    }

    json!({
        "scene_changed": old.scene_file != new.scene_file,
        "nodes_added": added,
        "nodes_removed": removed,
        "nodes_changed": changed,
    })
}

fn flatten<'a>(nodes: &'a [NodeRecord]) -> BTreeMap<String, &'a NodeRecord> {
    let mut map = BTreeMap::new();
    let mut stack: Vec<&NodeRecord> = nodes.iter().collect();
    while let Some(node) = stack.pop() {
        map.insert(node.path.clone(), node);
        stack.extend(node.children.iter());
    }
    map
}

fn field_value(node: &NodeRecord, field: &str) -> Value {
    match field {
        "position" => node.position.clone().unwrap_or(Value::Null),
        "rotation" => node.rotation.clone().unwrap_or(Value::Null),
        "scale" => node.scale.clone().unwrap_or(Value::Null),
        "visible" => Value::Bool(node.visible),
        "text" => node
            .text
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
        "size" => node.size.clone().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn diff_node(old: &NodeRecord, new: &NodeRecord) -> Map<String, Value> {
    let mut fields = Map::new();
    for field in TRACKED_FIELDS {
        let before = field_value(old, field);
        let after = field_value(new, field);
        if before != after {
            fields.insert(field.to_string(), json!({"old": before, "new": after}));
        }
    }

    // Script properties, both directions.
    for (key, after) in &new.properties {
        let before = old.properties.get(key).cloned().unwrap_or(Value::Null);
        if &before != after {
            fields.insert(key.clone(), json!({"old": before, "new": after}));
        }
    }
    for (key, before) in &old.properties {
        if !new.properties.contains_key(key) {
            fields.insert(key.clone(), json!({"old": before, "new": Value::Null}));
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::refs::RefMap;
    use crate::core::snapshot::take_snapshot;
    use crate::sim::SimEngine;
    use crate::value::{EngineValue, ValueKind};
    use glam::Vec2;

    #[test]
    fn diff_reports_moves_adds_and_removes() {
        let mut sim = SimEngine::new("d");
        sim.set_scene("Main", "res://main.tscn");
        let root = sim.scene_root().unwrap();
        let player = sim.add_child(root, "Player", "CharacterBody2D");
        sim.set_prop(player, "position", EngineValue::Vec2(Vec2::new(0.0, 0.0)));
        sim.set_script_prop(player, "health", EngineValue::Int(100), ValueKind::Int);
        let enemy = sim.add_child(root, "Enemy", "Area2D");

        let mut refs = RefMap::new();
        let before = take_snapshot(&sim, &mut refs, None, 12, 2000, 0);

        sim.set_prop(player, "position", EngineValue::Vec2(Vec2::new(64.0, 0.0)));
        sim.set_prop(player, "health", EngineValue::Int(75));
        sim.remove_node(enemy);
        sim.add_child(root, "Pickup", "Area2D");

        let after = take_snapshot(&sim, &mut refs, None, 12, 2000, 0);
        let diff = diff_snapshots(&before, &after);

        assert_eq!(diff["nodes_added"], serde_json::json!(["Pickup"]));
        assert_eq!(diff["nodes_removed"], serde_json::json!(["Enemy"]));
        let player_changes = &diff["nodes_changed"]["Player"];
        assert_eq!(player_changes["position"]["new"], serde_json::json!([64.0, 0.0]));
        assert_eq!(player_changes["health"]["old"], 100);
        assert_eq!(player_changes["health"]["new"], 75);
        assert_eq!(diff["scene_changed"], false);
    }

    #[test]
    fn identical_snapshots_diff_empty() {
        let mut sim = SimEngine::new("d");
        sim.set_scene("Main", "res://main.tscn");
        let root = sim.scene_root().unwrap();
        sim.add_child(root, "Thing", "Node2D");

        let mut refs = RefMap::new();
        let a = take_snapshot(&sim, &mut refs, None, 12, 2000, 0);
        let b = take_snapshot(&sim, &mut refs, None, 12, 2000, 0);
        let diff = diff_snapshots(&a, &b);
        assert!(diff["nodes_added"].as_array().unwrap().is_empty());
        assert!(diff["nodes_removed"].as_array().unwrap().is_empty());
        assert!(diff["nodes_changed"].as_object().unwrap().is_empty());
    }
}
