//! Deep single-node introspection.
//!
//! `/state` answers with a flat map: a common preamble plus the contribution
//! of every capability reader whose predicate matches the node. Readers are
//! a closed, ordered registry; each one owns a disjoint set of field keys,
//! so iteration order never changes the result.
//!
//! Readers pull data through the uniform property/method surface of the
//! engine contract; a field whose property or method is missing is simply
//! omitted rather than erroring the whole read.

use serde_json::{Map, Value};

use crate::engine::{Engine, InstanceId};
use crate::serialize::to_json;
use crate::value::EngineValue;

/// One capability family (kinematic body, timer, camera, …).
pub trait CapabilityReader: Sync {
    fn applies(&self, engine: &dyn Engine, id: InstanceId) -> bool;
    fn read(&self, engine: &mut dyn Engine, id: InstanceId, out: &mut Map<String, Value>);
}

/// Read the full state map for one node.
pub fn read_state(engine: &mut dyn Engine, id: InstanceId) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert(
        "name".into(),
        Value::String(engine.node_name(id).unwrap_or_default().to_string()),
    );
    out.insert(
        "type".into(),
        Value::String(engine.class_name(id).unwrap_or_default().to_string()),
    );
    out.insert(
        "path".into(),
        Value::String(engine.path_to(id).unwrap_or_default()),
    );

    for reader in READERS {
        if reader.applies(engine, id) {
            reader.read(engine, id, &mut out);
        }
    }

    // Trailing additions for every node.
    let mut script = Map::new();
    for info in engine.script_properties(id) {
        if !info.storage {
            continue;
        }
        if let Some(v) = engine.get_property(id, &info.name) {
            script.insert(info.name, to_json(&v));
        }
    }
    if !script.is_empty() {
        out.insert("properties".into(), Value::Object(script));
    }

    let groups: Vec<Value> = engine
        .groups(id)
        .into_iter()
        .filter(|g| !g.starts_with('_'))
        .map(Value::String)
        .collect();
    if !groups.is_empty() {
        out.insert("groups".into(), Value::Array(groups));
    }

    let signals: Vec<Value> = engine
        .signals(id)
        .into_iter()
        .filter(|s| s.connection_count > 0)
        .map(|s| Value::String(s.name))
        .collect();
    if !signals.is_empty() {
        out.insert("signals".into(), Value::Array(signals));
    }

    out
}

// --- helpers -------------------------------------------------------------

fn prop(engine: &dyn Engine, id: InstanceId, name: &str) -> Option<Value> {
    engine.get_property(id, name).map(|v| to_json(&v))
}

fn call(engine: &mut dyn Engine, id: InstanceId, name: &str) -> Option<Value> {
    if !engine.has_method(id, name) {
        return None;
    }
    engine.call_method(id, name, &[]).ok().map(|v| to_json(&v))
}

/// Property first, zero-arg method second — engines differ on which side of
/// the line things like `is_on_floor` live.
fn prop_or_call(engine: &mut dyn Engine, id: InstanceId, name: &str) -> Option<Value> {
    prop(engine, id, name).or_else(|| call(engine, id, name))
}

fn put(out: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(v) = value {
        out.insert(key.to_string(), v);
    }
}

/// Paths of the nodes in an object list returned by a method call.
fn object_paths(engine: &mut dyn Engine, id: InstanceId, method: &str) -> Option<Value> {
    if !engine.has_method(id, method) {
        return None;
    }
    let result = engine.call_method(id, method, &[]).ok()?;
    let items = match result {
        EngineValue::List(items) => items,
        _ => return None,
    };
    let paths: Vec<Value> = items
        .iter()
        .filter_map(|v| v.as_object())
        .filter_map(|oid| engine.path_to(oid))
        .map(Value::String)
        .collect();
    Some(Value::Array(paths))
}

// --- capability readers --------------------------------------------------

struct Spatial2d;
impl CapabilityReader for Spatial2d {
    fn applies(&self, e: &dyn Engine, id: InstanceId) -> bool {
        e.is_class(id, "Node2D")
    }
    fn read(&self, e: &mut dyn Engine, id: InstanceId, out: &mut Map<String, Value>) {
        put(out, "position", prop(e, id, "position"));
        if let Some(p) = e.global_position_2d(id) {
            out.insert("global_position".into(), serde_json::json!([p.x, p.y]));
        }
        put(out, "rotation", prop(e, id, "rotation"));
        put(out, "scale", prop(e, id, "scale"));
    }
}

struct Spatial3d;
impl CapabilityReader for Spatial3d {
    fn applies(&self, e: &dyn Engine, id: InstanceId) -> bool {
        e.is_class(id, "Node3D")
    }
    fn read(&self, e: &mut dyn Engine, id: InstanceId, out: &mut Map<String, Value>) {
        put(out, "position", prop(e, id, "position"));
        if let Some(p) = e.global_position_3d(id) {
            out.insert("global_position".into(), serde_json::json!([p.x, p.y, p.z]));
        }
        put(out, "rotation", prop(e, id, "rotation"));
        put(out, "scale", prop(e, id, "scale"));
    }
}

struct UiLayout;
impl CapabilityReader for UiLayout {
    fn applies(&self, e: &dyn Engine, id: InstanceId) -> bool {
        e.is_class(id, "Control")
    }
    fn read(&self, e: &mut dyn Engine, id: InstanceId, out: &mut Map<String, Value>) {
        put(out, "size", prop(e, id, "size"));
        if let Some(r) = e.global_rect(id) {
            out.insert(
                "global_position".into(),
                serde_json::json!([r.position.x, r.position.y]),
            );
        }
        out.insert(
            "visible_in_tree".into(),
            Value::Bool(e.is_visible_in_tree(id)),
        );
    }
}

struct CanvasItem;
impl CapabilityReader for CanvasItem {
    fn applies(&self, e: &dyn Engine, id: InstanceId) -> bool {
        e.is_class(id, "CanvasItem")
    }
    fn read(&self, e: &mut dyn Engine, id: InstanceId, out: &mut Map<String, Value>) {
        put(out, "modulate", prop(e, id, "modulate"));
        put(out, "self_modulate", prop(e, id, "self_modulate"));
        put(out, "z_index", prop(e, id, "z_index"));
        out.insert(
            "visible_in_tree".into(),
            Value::Bool(e.is_visible_in_tree(id)),
        );
    }
}

struct KinematicBody {
    class: &'static str,
}
impl CapabilityReader for KinematicBody {
    fn applies(&self, e: &dyn Engine, id: InstanceId) -> bool {
        e.is_class(id, self.class)
    }
    fn read(&self, e: &mut dyn Engine, id: InstanceId, out: &mut Map<String, Value>) {
        put(out, "velocity", prop(e, id, "velocity"));
        put(out, "is_on_floor", prop_or_call(e, id, "is_on_floor"));
        put(out, "is_on_wall", prop_or_call(e, id, "is_on_wall"));
        put(out, "is_on_ceiling", prop_or_call(e, id, "is_on_ceiling"));

        let count = call(e, id, "get_slide_collision_count")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        out.insert("slide_collision_count".into(), serde_json::json!(count));
        if count > 0 {
            let mut collisions = Vec::new();
            for i in 0..count {
                let entry = e
                    .call_method(id, "get_slide_collision", &[EngineValue::Int(i)])
                    .ok();
                if let Some(EngineValue::List(pair)) = entry {
                    let collider = pair
                        .first()
                        .and_then(|v| v.as_object())
                        .and_then(|oid| e.node_name(oid).map(|n| n.to_string()))
                        .unwrap_or_default();
                    let normal = pair.get(1).map(to_json).unwrap_or(Value::Null);
                    collisions.push(serde_json::json!({
                        "collider": collider,
                        "normal": normal,
                    }));
                }
            }
            out.insert("slide_collisions".into(), Value::Array(collisions));
        }
    }
}

struct RigidBody {
    class: &'static str,
}
impl CapabilityReader for RigidBody {
    fn applies(&self, e: &dyn Engine, id: InstanceId) -> bool {
        e.is_class(id, self.class)
    }
    fn read(&self, e: &mut dyn Engine, id: InstanceId, out: &mut Map<String, Value>) {
        put(out, "linear_velocity", prop(e, id, "linear_velocity"));
        put(out, "angular_velocity", prop(e, id, "angular_velocity"));
        put(out, "sleeping", prop(e, id, "sleeping"));
        put(out, "mass", prop(e, id, "mass"));
        put(out, "gravity_scale", prop(e, id, "gravity_scale"));
        put(out, "contact_monitor", prop(e, id, "contact_monitor"));
        // Friction and bounce only exist when an override material is set.
        let has_material = matches!(
            e.get_property(id, "physics_material_override"),
            Some(EngineValue::Resource(_))
        );
        if has_material {
            put(out, "friction", prop(e, id, "friction"));
            put(out, "bounce", prop(e, id, "bounce"));
        }
    }
}

struct AnimationPlayer;
impl CapabilityReader for AnimationPlayer {
    fn applies(&self, e: &dyn Engine, id: InstanceId) -> bool {
        e.is_class(id, "AnimationPlayer")
    }
    fn read(&self, e: &mut dyn Engine, id: InstanceId, out: &mut Map<String, Value>) {
        put(out, "current_animation", prop(e, id, "current_animation"));
        put(
            out,
            "animation_position",
            prop_or_call(e, id, "current_animation_position"),
        );
        put(out, "is_playing", prop_or_call(e, id, "is_playing"));
    }
}

struct AnimatedSprite;
impl CapabilityReader for AnimatedSprite {
    fn applies(&self, e: &dyn Engine, id: InstanceId) -> bool {
        e.is_class(id, "AnimatedSprite2D") || e.is_class(id, "AnimatedSprite3D")
    }
    fn read(&self, e: &mut dyn Engine, id: InstanceId, out: &mut Map<String, Value>) {
        put(out, "animation", prop(e, id, "animation"));
        put(out, "frame", prop(e, id, "frame"));
        put(out, "is_playing", prop_or_call(e, id, "is_playing"));
    }
}

struct Area;
impl CapabilityReader for Area {
    fn applies(&self, e: &dyn Engine, id: InstanceId) -> bool {
        e.is_class(id, "Area2D") || e.is_class(id, "Area3D")
    }
    fn read(&self, e: &mut dyn Engine, id: InstanceId, out: &mut Map<String, Value>) {
        put(
            out,
            "overlapping_bodies",
            object_paths(e, id, "get_overlapping_bodies"),
        );
        put(
            out,
            "overlapping_areas",
            object_paths(e, id, "get_overlapping_areas"),
        );
    }
}

struct TimerReader;
impl CapabilityReader for TimerReader {
    fn applies(&self, e: &dyn Engine, id: InstanceId) -> bool {
        e.is_class(id, "Timer")
    }
    fn read(&self, e: &mut dyn Engine, id: InstanceId, out: &mut Map<String, Value>) {
        put(out, "time_left", prop(e, id, "time_left"));
        put(out, "is_stopped", prop_or_call(e, id, "is_stopped"));
        put(out, "wait_time", prop(e, id, "wait_time"));
        put(out, "one_shot", prop(e, id, "one_shot"));
        put(out, "autostart", prop(e, id, "autostart"));
    }
}

struct AudioPlayer;
impl CapabilityReader for AudioPlayer {
    fn applies(&self, e: &dyn Engine, id: InstanceId) -> bool {
        e.is_class(id, "AudioStreamPlayer")
            || e.is_class(id, "AudioStreamPlayer2D")
            || e.is_class(id, "AudioStreamPlayer3D")
    }
    fn read(&self, e: &mut dyn Engine, id: InstanceId, out: &mut Map<String, Value>) {
        put(out, "playing", prop(e, id, "playing"));
        put(out, "stream", prop(e, id, "stream"));
        put(out, "volume_db", prop(e, id, "volume_db"));
        put(out, "bus", prop(e, id, "bus"));
        let positional =
            e.is_class(id, "AudioStreamPlayer2D") || e.is_class(id, "AudioStreamPlayer3D");
        if positional {
            put(out, "max_distance", prop(e, id, "max_distance"));
            put(out, "attenuation", prop(e, id, "attenuation"));
        }
    }
}

struct Particles;
impl CapabilityReader for Particles {
    fn applies(&self, e: &dyn Engine, id: InstanceId) -> bool {
        ["GPUParticles2D", "CPUParticles2D", "GPUParticles3D", "CPUParticles3D"]
            .iter()
            .any(|c| e.is_class(id, c))
    }
    fn read(&self, e: &mut dyn Engine, id: InstanceId, out: &mut Map<String, Value>) {
        put(out, "emitting", prop(e, id, "emitting"));
        put(out, "amount", prop(e, id, "amount"));
        put(out, "lifetime", prop(e, id, "lifetime"));
        put(out, "one_shot", prop(e, id, "one_shot"));
    }
}

struct Camera2d;
impl CapabilityReader for Camera2d {
    fn applies(&self, e: &dyn Engine, id: InstanceId) -> bool {
        e.is_class(id, "Camera2D")
    }
    fn read(&self, e: &mut dyn Engine, id: InstanceId, out: &mut Map<String, Value>) {
        put(out, "current", prop_or_call(e, id, "is_current"));
        put(out, "zoom", prop(e, id, "zoom"));
        let limits: Vec<Value> = ["limit_left", "limit_top", "limit_right", "limit_bottom"]
            .iter()
            .filter_map(|k| prop(e, id, k))
            .collect();
        if limits.len() == 4 {
            out.insert("limits".into(), Value::Array(limits));
        }
        put(
            out,
            "drag_horizontal_enabled",
            prop(e, id, "drag_horizontal_enabled"),
        );
        put(
            out,
            "drag_vertical_enabled",
            prop(e, id, "drag_vertical_enabled"),
        );
    }
}

struct Camera3d;
impl CapabilityReader for Camera3d {
    fn applies(&self, e: &dyn Engine, id: InstanceId) -> bool {
        e.is_class(id, "Camera3D")
    }
    fn read(&self, e: &mut dyn Engine, id: InstanceId, out: &mut Map<String, Value>) {
        put(out, "current", prop_or_call(e, id, "is_current"));
        put(out, "fov", prop(e, id, "fov"));
        put(out, "near", prop(e, id, "near"));
        put(out, "far", prop(e, id, "far"));
        put(out, "projection", prop(e, id, "projection"));
    }
}

struct NavigationAgent;
impl CapabilityReader for NavigationAgent {
    fn applies(&self, e: &dyn Engine, id: InstanceId) -> bool {
        e.is_class(id, "NavigationAgent2D") || e.is_class(id, "NavigationAgent3D")
    }
    fn read(&self, e: &mut dyn Engine, id: InstanceId, out: &mut Map<String, Value>) {
        put(out, "target_position", prop(e, id, "target_position"));
        put(
            out,
            "is_navigation_finished",
            prop_or_call(e, id, "is_navigation_finished"),
        );
        put(
            out,
            "distance_to_target",
            prop_or_call(e, id, "distance_to_target"),
        );
        put(
            out,
            "is_target_reachable",
            prop_or_call(e, id, "is_target_reachable"),
        );
        put(out, "max_speed", prop(e, id, "max_speed"));
    }
}

struct Raycast;
impl CapabilityReader for Raycast {
    fn applies(&self, e: &dyn Engine, id: InstanceId) -> bool {
        e.is_class(id, "RayCast2D") || e.is_class(id, "RayCast3D")
    }
    fn read(&self, e: &mut dyn Engine, id: InstanceId, out: &mut Map<String, Value>) {
        put(out, "enabled", prop(e, id, "enabled"));
        put(out, "is_colliding", prop_or_call(e, id, "is_colliding"));
        let collider = match e.get_property(id, "collider") {
            Some(EngineValue::Object(oid)) => e.node_name(oid).map(|n| n.to_string()),
            Some(EngineValue::Str(s)) => Some(s),
            _ => call(e, id, "get_collider").and_then(|v| v.as_str().map(String::from)),
        };
        put(out, "collider", collider.map(Value::String));
        put(out, "collision_point", prop_or_call(e, id, "get_collision_point"));
        put(
            out,
            "collision_normal",
            prop_or_call(e, id, "get_collision_normal"),
        );
    }
}

struct TileMapLayer;
impl CapabilityReader for TileMapLayer {
    fn applies(&self, e: &dyn Engine, id: InstanceId) -> bool {
        e.is_class(id, "TileMapLayer")
    }
    fn read(&self, e: &mut dyn Engine, id: InstanceId, out: &mut Map<String, Value>) {
        put(out, "tile_set", prop(e, id, "tile_set"));
        put(out, "enabled", prop(e, id, "enabled"));
        put(out, "used_cells_count", prop_or_call(e, id, "used_cells_count"));
    }
}

struct ProgressWidget;
impl CapabilityReader for ProgressWidget {
    fn applies(&self, e: &dyn Engine, id: InstanceId) -> bool {
        e.is_class(id, "Range")
    }
    fn read(&self, e: &mut dyn Engine, id: InstanceId, out: &mut Map<String, Value>) {
        put(out, "value", prop(e, id, "value"));
        put(out, "min_value", prop(e, id, "min_value"));
        put(out, "max_value", prop(e, id, "max_value"));
        put(out, "ratio", prop_or_call(e, id, "ratio"));
    }
}

struct TextInput;
impl CapabilityReader for TextInput {
    fn applies(&self, e: &dyn Engine, id: InstanceId) -> bool {
        e.is_class(id, "LineEdit") || e.is_class(id, "TextEdit")
    }
    fn read(&self, e: &mut dyn Engine, id: InstanceId, out: &mut Map<String, Value>) {
        put(out, "text", prop(e, id, "text"));
        put(out, "placeholder", prop(e, id, "placeholder_text"));
        put(out, "editable", prop(e, id, "editable"));
    }
}

struct TextDisplay;
impl CapabilityReader for TextDisplay {
    fn applies(&self, e: &dyn Engine, id: InstanceId) -> bool {
        e.is_class(id, "Label") || e.is_class(id, "Button") || e.is_class(id, "RichTextLabel")
    }
    fn read(&self, e: &mut dyn Engine, id: InstanceId, out: &mut Map<String, Value>) {
        put(out, "text", prop(e, id, "text"));
        if e.is_class(id, "Button") {
            put(out, "disabled", prop(e, id, "disabled"));
        }
    }
}

/// The closed, ordered capability registry.
static READERS: &[&dyn CapabilityReader] = &[
    &Spatial2d,
    &Spatial3d,
    &UiLayout,
    &CanvasItem,
    &KinematicBody {
        class: "CharacterBody2D",
    },
    &KinematicBody {
        class: "CharacterBody3D",
    },
    &RigidBody {
        class: "RigidBody2D",
    },
    &RigidBody {
        class: "RigidBody3D",
    },
    &AnimationPlayer,
    &AnimatedSprite,
    &Area,
    &TimerReader,
    &AudioPlayer,
    &Particles,
    &Camera2d,
    &Camera3d,
    &NavigationAgent,
    &Raycast,
    &TileMapLayer,
    &ProgressWidget,
    &TextInput,
    &TextDisplay,
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimEngine;
    use crate::value::ValueKind;
    use glam::Vec2;

    #[test]
    fn kinematic_body_contributes_velocity_fields() {
        let mut sim = SimEngine::new("t");
        sim.set_scene("Main", "res://main.tscn");
        let root = sim.scene_root().unwrap();
        let player = sim.add_child(root, "Player", "CharacterBody2D");
        sim.set_prop(player, "velocity", EngineValue::Vec2(Vec2::new(10.0, 0.0)));
        sim.set_prop(player, "_on_floor", EngineValue::Bool(true));

        let state = read_state(&mut sim, player);
        assert_eq!(state["type"], "CharacterBody2D");
        assert_eq!(state["velocity"], serde_json::json!([10.0, 0.0]));
        assert_eq!(state["is_on_floor"], serde_json::json!(true));
        // Spatial reader fires too; disjoint keys merge cleanly.
        assert!(state.contains_key("position"));
    }

    #[test]
    fn timer_fields() {
        let mut sim = SimEngine::new("t");
        sim.set_scene("Main", "res://main.tscn");
        let root = sim.scene_root().unwrap();
        let timer = sim.add_child(root, "Spawner", "Timer");
        sim.set_prop(timer, "wait_time", EngineValue::Float(2.0));
        sim.set_prop(timer, "time_left", EngineValue::Float(0.5));
        sim.set_prop(timer, "one_shot", EngineValue::Bool(false));

        let state = read_state(&mut sim, timer);
        assert_eq!(state["wait_time"], serde_json::json!(2.0));
        assert_eq!(state["time_left"], serde_json::json!(0.5));
        // No spatial fields on a plain Node subclass.
        assert!(!state.contains_key("position"));
    }

    #[test]
    fn button_contributes_text_and_disabled() {
        let mut sim = SimEngine::new("t");
        sim.set_scene("Main", "res://main.tscn");
        let root = sim.scene_root().unwrap();
        let button = sim.add_child(root, "Start", "Button");
        sim.set_prop(button, "text", EngineValue::Str("Start".into()));
        sim.set_prop(button, "disabled", EngineValue::Bool(false));

        let state = read_state(&mut sim, button);
        assert_eq!(state["text"], serde_json::json!("Start"));
        assert_eq!(state["disabled"], serde_json::json!(false));
        // Buttons are Controls: layout reader ran.
        assert!(state.contains_key("visible_in_tree"));
    }

    #[test]
    fn script_properties_and_groups_trail_every_read() {
        let mut sim = SimEngine::new("t");
        sim.set_scene("Main", "res://main.tscn");
        let root = sim.scene_root().unwrap();
        let node = sim.add_child(root, "Thing", "Node");
        sim.set_script_prop(node, "score", EngineValue::Int(7), ValueKind::Int);
        sim.add_group(node, "things");

        let state = read_state(&mut sim, node);
        assert_eq!(state["properties"]["score"], serde_json::json!(7));
        assert_eq!(state["groups"], serde_json::json!(["things"]));
    }
}
