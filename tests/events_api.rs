//! Event accumulator over HTTP: watches, draining, signals, scene changes.

mod common;

use common::Harness;
use serde_json::{json, Value};

fn drain_until<F: Fn(&[Value]) -> bool>(h: &Harness, pred: F) -> Vec<Value> {
    let mut collected = Vec::new();
    for _ in 0..100 {
        let out = h.get_ok("/events");
        if let Some(events) = out["events"].as_array() {
            collected.extend(events.iter().cloned());
        }
        if pred(&collected) {
            return collected;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    panic!("expected events never arrived: {:?}", collected);
}

#[test]
fn watch_lifecycle_and_property_changed_event() {
    let h = Harness::start();
    let out = h.post_ok(
        "/events/watch",
        json!({"node_path": "Player", "property": "health", "label": "health"}),
    );
    assert_eq!(out["ok"], true);
    assert_eq!(out["watch"]["last_value"], 100);

    let listed = h.get_ok("/events/watches");
    assert_eq!(listed["watches"][0]["node_path"], "Player");

    h.post_ok(
        "/set_property",
        json!({"path": "Player", "property": "health", "value": 90}),
    );

    let events = drain_until(&h, |evts| {
        evts.iter().any(|e| e["type"] == "property_changed")
    });
    let change = events
        .iter()
        .find(|e| e["type"] == "property_changed")
        .unwrap();
    assert_eq!(change["source"], "Player");
    assert_eq!(change["detail"]["label"], "health");
    assert_eq!(change["detail"]["old_value"], 100);
    assert_eq!(change["detail"]["new_value"], 90);
    assert!(change["id"].as_u64().unwrap() >= 1);

    // Drained means gone.
    let out = h.get_ok("/events");
    assert_eq!(out["count"], 0);

    let out = h.post_ok(
        "/events/unwatch",
        json!({"node_path": "Player", "property": "health"}),
    );
    assert_eq!(out["removed"], true);
    let listed = h.get_ok("/events/watches");
    assert!(listed["watches"].as_array().unwrap().is_empty());
}

#[test]
fn watch_of_missing_target_is_an_error() {
    let h = Harness::start();
    let out = h.post_ok(
        "/events/watch",
        json!({"node_path": "Ghost", "property": "health"}),
    );
    assert_eq!(out["error"], "Node not found: Ghost");

    let out = h.post_ok(
        "/events/watch",
        json!({"node_path": "Player", "property": "mana"}),
    );
    assert_eq!(out["error"], "Property not found: Player.mana");
}

#[test]
fn peek_preserves_the_buffer_and_ids_increase() {
    let h = Harness::start();
    h.post_ok(
        "/events/watch",
        json!({"node_path": "Player", "property": "health"}),
    );
    for hp in [90, 80] {
        h.post_ok(
            "/set_property",
            json!({"path": "Player", "property": "health", "value": hp}),
        );
        std::thread::sleep(std::time::Duration::from_millis(30));
    }

    let peeked = h.get_ok("/events?peek=true");
    let first_count = peeked["count"].as_u64().unwrap();
    assert!(first_count >= 2);

    // Peek left everything in place.
    let drained = h.get_ok("/events");
    assert_eq!(drained["count"].as_u64().unwrap(), first_count);

    let ids: Vec<u64> = drained["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_u64().unwrap())
        .collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn button_press_signal_is_auto_captured() {
    let h = Harness::start();
    h.post_ok(
        "/call_method",
        json!({"path": "HUD/StartButton", "method": "emit_signal", "args": ["pressed"]}),
    );
    let events = drain_until(&h, |evts| evts.iter().any(|e| e["type"] == "signal"));
    let signal = events.iter().find(|e| e["type"] == "signal").unwrap();
    assert_eq!(signal["source"], "HUD/StartButton");
    assert_eq!(signal["detail"]["signal"], "pressed");
}

#[test]
fn timer_timeout_is_captured_while_running() {
    let h = Harness::start();
    h.post_ok(
        "/call_method",
        json!({"path": "Spawner", "method": "start", "args": [0.1]}),
    );
    let events = drain_until(&h, |evts| {
        evts.iter()
            .any(|e| e["type"] == "signal" && e["detail"]["signal"] == "timeout")
    });
    assert!(events
        .iter()
        .any(|e| e["source"] == "Spawner" && e["detail"]["signal"] == "timeout"));
}

#[test]
fn node_lifecycle_events_flow_through() {
    let h = Harness::start();
    h.post_ok(
        "/call_method",
        json!({"path": "Enemy", "method": "queue_free"}),
    );
    let events = drain_until(&h, |evts| {
        evts.iter().any(|e| e["type"] == "node_removed")
    });
    let removed = events
        .iter()
        .find(|e| e["type"] == "node_removed")
        .unwrap();
    assert_eq!(removed["source"], "Enemy");
}

#[test]
fn scene_change_emits_first_then_rebuilds() {
    let h = Harness::start();
    // Flush anything pending.
    h.get_ok("/events");

    h.post_ok(
        "/call_method",
        json!({"path": ".", "method": "change_scene_to_file", "args": ["res://level2.tscn"]}),
    );
    let events = drain_until(&h, |evts| {
        evts.iter().any(|e| e["type"] == "scene_changed")
    });
    let first = &events[0];
    assert_eq!(first["type"], "scene_changed");
    assert_eq!(first["detail"]["from"], "res://main.tscn");
    assert_eq!(first["detail"]["to"], "res://level2.tscn");

    let info = h.get_ok("/info");
    assert_eq!(info["current_scene"], "level2");
    assert_eq!(info["scene_file"], "res://level2.tscn");

    let history = h.get_ok("/scene_history");
    assert!(!history["events"].as_array().unwrap().is_empty());
}

#[test]
fn snapshot_reports_pending_event_count() {
    let h = Harness::start();
    h.get_ok("/events");
    h.post_ok(
        "/call_method",
        json!({"path": "HUD/StartButton", "method": "emit_signal", "args": ["pressed"]}),
    );
    // Give the accumulator a tick to record it.
    std::thread::sleep(std::time::Duration::from_millis(50));
    let snap = h.get_ok("/snapshot?depth=1");
    assert!(snap["pending_events"].as_u64().unwrap() >= 1);
}
