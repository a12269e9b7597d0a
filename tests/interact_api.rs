//! Input injection and mutation endpoints, verified through the demo
//! scene's input probe node (its properties mirror every injected event).

mod common;

use common::Harness;
use serde_json::{json, Value};

fn probe_history(h: &Harness) -> Vec<String> {
    let state = h.get_ok("/state?path=InputProbe");
    state["properties"]["history"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_str)
        .map(String::from)
        .collect()
}

#[test]
fn click_emits_press_then_release() {
    let h = Harness::start();
    let out = h.post_ok("/click", json!({"x": 200, "y": 120}));
    assert!(out["_description"].as_str().unwrap().contains("Clicked"));

    let history = probe_history(&h);
    let down = history.iter().position(|e| e == "mouse:left:down:200,120");
    let up = history.iter().position(|e| e == "mouse:left:up:200,120");
    assert!(down.is_some() && up.is_some());
    assert!(down < up, "press must precede release: {:?}", history);
}

#[test]
fn double_click_carries_the_flag() {
    let h = Harness::start();
    h.post_ok("/click", json!({"x": 10, "y": 10, "button": "right", "double": true}));
    let history = probe_history(&h);
    assert!(history.iter().any(|e| e == "mouse:right:down:10,10:double"));
}

#[test]
fn click_node_targets_the_control_center() {
    let h = Harness::start();
    // StartButton: HUD at origin, button at (10,10) size 120x40 → center (70, 30).
    let out = h.post_ok("/click_node", json!({"path": "HUD/StartButton"}));
    assert!(out["_description"]
        .as_str()
        .unwrap()
        .contains("HUD/StartButton"));
    let history = probe_history(&h);
    assert!(history.iter().any(|e| e == "mouse:left:down:70,30"));

    let missing = h.post_ok("/click_node", json!({"ref": "Zzz999"}));
    assert_eq!(missing["error"], "Node not found: Zzz999");
}

#[test]
fn key_tap_and_hold_sequencing() {
    let h = Harness::start();
    let out = h.post_ok("/key", json!({"key": "d", "action": "tap"}));
    assert_eq!(out["_description"], "Tapped 'd'");
    let history = probe_history(&h);
    let down = history.iter().position(|e| e == "key:68:down");
    let up = history.iter().position(|e| e == "key:68:up");
    assert!(down.is_some() && down < up, "{:?}", history);

    // Hold with a duration spans engine time.
    let started = std::time::Instant::now();
    let out = h.post_ok("/key", json!({"key": "space", "action": "hold", "duration": 0.25}));
    assert!(out["_description"].as_str().unwrap().contains("Held"));
    assert!(started.elapsed().as_secs_f64() >= 0.2);

    // Hold with zero duration still presses and releases.
    h.post_ok("/key", json!({"key": "a", "action": "hold", "duration": 0}));
    let history = probe_history(&h);
    assert!(history.iter().any(|e| e == "key:65:down"));
    assert!(history.iter().any(|e| e == "key:65:up"));
}

#[test]
fn unknown_key_and_action_are_reported() {
    let h = Harness::start();
    let out = h.post_ok("/key", json!({"key": "flux_capacitor"}));
    assert_eq!(out["error"], "Unknown key 'flux_capacitor'");

    let out = h.post_ok("/key", json!({"key": "a", "action": "wiggle"}));
    assert_eq!(out["error"], "Unknown key action 'wiggle'");

    let out = h.post_ok("/action", json!({"action": "teleport"}));
    assert_eq!(out["error"], "Action not found: teleport");
}

#[test]
fn mapped_actions_reach_the_input_map() {
    let h = Harness::start();
    h.post_ok("/action", json!({"action": "jump"}));
    h.post_ok("/action", json!({"action": "jump", "pressed": false}));
    let history = probe_history(&h);
    assert!(history.iter().any(|e| e == "action:jump:down:1.00"));
    assert!(history.iter().any(|e| e == "action:jump:up:1.00"));
}

#[test]
fn mouse_move_updates_engine_cursor() {
    let h = Harness::start();
    h.post_ok("/mouse_move", json!({"x": 321, "y": 99}));
    let snap = h.get_ok("/snapshot?depth=1");
    assert_eq!(snap["mouse_position"], json!([321.0, 99.0]));
}

#[test]
fn sequence_runs_steps_in_order_with_timing() {
    let h = Harness::start();
    let started = std::time::Instant::now();
    let out = h.post_ok(
        "/sequence",
        json!({
            "steps": [
                {"key": "d", "action": "hold", "duration": 0.3},
                {"wait": 0.1},
                {"action": "jump", "pressed": true},
            ],
            "snapshot_after": true,
        }),
    );
    assert_eq!(out["steps_executed"], 3);
    // Interleaved delays sum on the engine clock.
    assert!(out["elapsed"].as_f64().unwrap() >= 0.4);
    assert!(started.elapsed().as_secs_f64() >= 0.4);
    assert!(out["snapshot"]["nodes"].is_array());

    let history = probe_history(&h);
    let d_down = history.iter().position(|e| e == "key:68:down").unwrap();
    let d_up = history.iter().position(|e| e == "key:68:up").unwrap();
    let jump = history
        .iter()
        .position(|e| e == "action:jump:down:1.00")
        .unwrap();
    assert!(d_down < d_up && d_up < jump, "{:?}", history);
}

#[test]
fn sequence_skips_unreachable_refs() {
    let h = Harness::start();
    let out = h.post_ok(
        "/sequence",
        json!({
            "steps": [
                {"click_node": "Zzz404"},
                {"mouse_move": [5, 5]},
            ],
            "snapshot_after": false,
        }),
    );
    // Unknown targets warn and proceed.
    assert_eq!(out["steps_executed"], 2);
    let history = probe_history(&h);
    assert!(history.iter().any(|e| e == "motion:5,5"));
}

#[test]
fn set_property_converts_to_the_declared_kind() {
    let h = Harness::start();
    h.post_ok(
        "/set_property",
        json!({"path": "Player", "property": "position", "value": [64, 32]}),
    );
    let state = h.get_ok("/state?path=Player");
    assert_eq!(state["position"], json!([64.0, 32.0]));

    let out = h.post_ok(
        "/set_property",
        json!({"path": "Player", "property": "position", "value": "not a vector"}),
    );
    assert!(out["error"].as_str().unwrap().contains("Cannot convert"));

    let out = h.post_ok(
        "/set_property",
        json!({"path": "Player", "property": "no_such_prop", "value": 1}),
    );
    assert!(out["error"].as_str().unwrap().contains("no_such_prop"));
}

#[test]
fn set_property_with_trailing_snapshot() {
    let h = Harness::start();
    let out = h.post_ok(
        "/set_property",
        json!({"path": "Player", "property": "health", "value": 42, "snapshot": true}),
    );
    assert_eq!(out["ok"], true);
    let nodes = out["snapshot"]["nodes"].as_array().unwrap();
    let player = common::find_node(nodes, "Player").unwrap();
    assert_eq!(player["properties"]["health"], 42);
}

#[test]
fn call_method_invokes_and_reports_result() {
    let h = Harness::start();
    let out = h.post_ok(
        "/call_method",
        json!({"path": "Player", "method": "take_damage", "args": [25]}),
    );
    assert_eq!(out["result"], 75);

    let out = h.post_ok(
        "/call_method",
        json!({"path": "Player", "method": "levitate"}),
    );
    assert_eq!(out["error"], "Method not found: levitate on CharacterBody2D");
}
