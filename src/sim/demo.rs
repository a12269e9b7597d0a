//! Canned demo scene for the `simbridge` binary and the integration tests.
//!
//! A small platformer-shaped tree: a player body with script state, an
//! enemy area, a HUD with interactive controls, a timer, audio and an input
//! probe node whose properties mirror every injected event (so tests can
//! verify injection through the public API alone).

use glam::Vec2;

use crate::config::BRIDGE_NODE_NAME;
use crate::engine::InstanceId;
use crate::value::{EngineValue, ValueKind};

use super::SimEngine;

/// Handles to the interesting demo nodes.
pub struct DemoScene {
    pub player: InstanceId,
    pub enemy: InstanceId,
    pub start_button: InstanceId,
    pub score_label: InstanceId,
    pub input_probe: InstanceId,
    pub spawner: InstanceId,
}

/// Build the demo scene and input map into `sim`.
pub fn build(sim: &mut SimEngine) -> DemoScene {
    sim.set_scene("Main", "res://main.tscn");
    let root = sim.scene_root().expect("scene installed");

    let player = sim.add_child(root, "Player", "CharacterBody2D");
    sim.set_prop(player, "position", EngineValue::Vec2(Vec2::new(100.0, 200.0)));
    sim.set_prop(player, "_on_floor", EngineValue::Bool(true));
    sim.set_script_prop(player, "health", EngineValue::Int(100), ValueKind::Int);
    sim.set_script_prop(player, "speed", EngineValue::Float(200.0), ValueKind::Float);
    sim.add_group(player, "player");
    sim.add_signal(player, "died", 0);
    sim.add_child(player, "Sprite", "Sprite2D");

    let enemy = sim.add_child(root, "Enemy", "Area2D");
    sim.set_prop(enemy, "position", EngineValue::Vec2(Vec2::new(300.0, 200.0)));
    sim.set_script_prop(enemy, "damage", EngineValue::Int(10), ValueKind::Int);
    sim.add_group(enemy, "enemies");

    let hud = sim.add_child(root, "HUD", "Control");
    sim.set_prop(hud, "size", EngineValue::Vec2(Vec2::new(640.0, 60.0)));

    let start_button = sim.add_child(hud, "StartButton", "Button");
    sim.set_prop(start_button, "position", EngineValue::Vec2(Vec2::new(10.0, 10.0)));
    sim.set_prop(start_button, "size", EngineValue::Vec2(Vec2::new(120.0, 40.0)));
    sim.set_prop(start_button, "text", EngineValue::Str("Start".into()));

    let score_label = sim.add_child(hud, "ScoreLabel", "Label");
    sim.set_prop(score_label, "position", EngineValue::Vec2(Vec2::new(150.0, 14.0)));
    sim.set_prop(score_label, "size", EngineValue::Vec2(Vec2::new(120.0, 30.0)));
    sim.set_prop(score_label, "text", EngineValue::Str("Score: 0".into()));

    let health_bar = sim.add_child(hud, "HealthBar", "ProgressBar");
    sim.set_prop(health_bar, "position", EngineValue::Vec2(Vec2::new(300.0, 14.0)));
    sim.set_prop(health_bar, "value", EngineValue::Float(100.0));

    let input_probe = sim.add_child(root, "InputProbe", "Node");
    sim.set_script_prop(input_probe, "count", EngineValue::Int(0), ValueKind::Int);
    sim.set_script_prop(input_probe, "last", EngineValue::Str(String::new()), ValueKind::Str);
    sim.set_script_prop(
        input_probe,
        "history",
        EngineValue::StrArray(Vec::new()),
        ValueKind::StrArray,
    );

    let spawner = sim.add_child(root, "Spawner", "Timer");
    sim.set_prop(spawner, "wait_time", EngineValue::Float(1.0));

    sim.add_child(root, "Music", "AudioStreamPlayer");
    sim.add_child(root, "Camera", "Camera2D");

    // Autoload plus the bridge's own node, both outside the current scene.
    let tree_root = sim.tree_root().expect("root exists");
    let game_state = sim.add_child(tree_root, "GameState", "Node");
    sim.set_script_prop(game_state, "level", EngineValue::Int(1), ValueKind::Int);
    sim.add_child(tree_root, BRIDGE_NODE_NAME, "Node");

    sim.set_action("jump", &["Space"]);
    sim.set_action("move_left", &["A"]);
    sim.set_action("move_right", &["D"]);
    sim.set_action("shoot", &["Mouse Left"]);

    // The builder itself queues lifecycle events; a fresh run starts clean.
    sim.drain_tree_events();
    sim.print("demo scene ready");

    DemoScene {
        player,
        enemy,
        start_button,
        score_label,
        input_probe,
        spawner,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_scene_builds_consistently() {
        let mut sim = SimEngine::new("demo");
        let scene = build(&mut sim);
        let root = sim.scene_root().unwrap();
        assert_eq!(sim.resolve_path(root, "Player"), Some(scene.player));
        assert_eq!(
            sim.resolve_path(root, "HUD/StartButton"),
            Some(scene.start_button)
        );
        assert!(sim.drain_tree_events().is_empty());
    }
}
