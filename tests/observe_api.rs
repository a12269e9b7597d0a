//! Observation endpoints: snapshots, refs, state, diffs and screenshots.

mod common;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use common::{find_node, Harness};
use scenebridge::config::BridgeConfig;
use serde_json::json;

#[test]
fn snapshot_shape_and_refs() {
    let h = Harness::start();
    let snap = h.get_ok("/snapshot");

    assert_eq!(snap["scene_name"], "Main");
    assert_eq!(snap["scene_file"], "res://main.tscn");
    assert!(snap["frame"].as_u64().is_some());
    assert!(snap["truncated"].is_null(), "untruncated snapshots omit the flag");

    let nodes = snap["nodes"].as_array().unwrap();
    let player = find_node(nodes, "Player").expect("player record");
    assert_eq!(player["type"], "CharacterBody2D");
    assert_eq!(player["path"], "Player");
    assert!(player["ref"].as_str().unwrap().starts_with("Cha"));
    assert_eq!(player["properties"]["health"], 100);
    assert_eq!(player["groups"], json!(["player"]));

    let label = find_node(nodes, "ScoreLabel").expect("label record");
    assert_eq!(label["text"], "Score: 0");
    // Spatial fields are null for non-spatial classes, never absent.
    let probe = find_node(nodes, "InputProbe").expect("probe record");
    assert!(probe["position"].is_null());
}

#[test]
fn refs_survive_mutation_between_snapshots() {
    let h = Harness::start();
    let s1 = h.get_ok("/snapshot");
    let player_ref = find_node(s1["nodes"].as_array().unwrap(), "Player").unwrap()["ref"]
        .as_str()
        .unwrap()
        .to_string();

    let out = h.post_ok(
        "/set_property",
        json!({"ref": player_ref, "property": "position", "value": [400, 100]}),
    );
    assert_eq!(out["ok"], true);

    let s2 = h.get_ok("/snapshot");
    let player = find_node(s2["nodes"].as_array().unwrap(), "Player").unwrap();
    assert_eq!(player["ref"], player_ref.as_str());
    let pos = player["position"].as_array().unwrap();
    assert!((pos[0].as_f64().unwrap() - 400.0).abs() < 1.0);
    assert!((pos[1].as_f64().unwrap() - 100.0).abs() < 1.0);
}

#[test]
fn snapshot_root_focuses_the_walk() {
    let h = Harness::start();
    let snap = h.get_ok("/snapshot?root=HUD");
    let nodes = snap["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0]["name"], "HUD");
    assert!(find_node(nodes, "StartButton").is_some());
    assert!(find_node(nodes, "Player").is_none());

    // Unresolvable root degrades to the scene root.
    let snap = h.get_ok("/snapshot?root=NoSuchThing");
    assert!(find_node(snap["nodes"].as_array().unwrap(), "Player").is_some());
}

#[test]
fn node_cap_truncates_explicitly() {
    let h = Harness::start_with(BridgeConfig {
        max_node_count: 5,
        ..BridgeConfig::default()
    });
    let snap = h.get_ok("/snapshot");
    assert_eq!(snap["truncated"], true);
    assert_eq!(snap["truncated_at"], 5);
    assert!(snap["note"].as_str().unwrap().contains("root="));
}

#[test]
fn state_reads_type_dispatched_fields() {
    let h = Harness::start();
    let state = h.get_ok("/state?path=Player");
    assert_eq!(state["type"], "CharacterBody2D");
    assert_eq!(state["is_on_floor"], true);
    assert!(state["velocity"].is_array());
    assert_eq!(state["properties"]["health"], 100);

    let state = h.get_ok("/state?path=HUD/StartButton");
    assert_eq!(state["text"], "Start");
    assert_eq!(state["disabled"], false);

    let state = h.get_ok("/state?path=Missing");
    assert_eq!(state["error"], "Node not found: Missing");
}

#[test]
fn snapshot_diff_baseline_then_changes() {
    let h = Harness::start();
    let first = h.get_ok("/snapshot/diff");
    assert_eq!(first["baseline_set"], true);

    h.post_ok(
        "/set_property",
        json!({"path": "Player", "property": "health", "value": 60}),
    );
    let second = h.get_ok("/snapshot/diff");
    let changes = &second["diff"]["nodes_changed"]["Player"];
    assert_eq!(changes["health"]["old"], 100);
    assert_eq!(changes["health"]["new"], 60);
}

#[test]
fn screenshot_decodes_at_requested_size() {
    let h = Harness::start();
    let shot = h.get_ok("/screenshot?width=320&height=180&annotate=false");
    assert_eq!(shot["mime"], "image/jpeg");
    assert_eq!(shot["size"], json!([320, 180]));

    let bytes = BASE64.decode(shot["image"].as_str().unwrap()).unwrap();
    let img = image::load_from_memory(&bytes).unwrap();
    assert_eq!(img.width(), 320);
    assert_eq!(img.height(), 180);
}

#[test]
fn annotated_snapshot_screenshot_respects_budget() {
    let budget = 40_000;
    let h = Harness::start_with(BridgeConfig {
        max_base64_len: budget,
        ..BridgeConfig::default()
    });
    let snap = h.get_ok("/snapshot?include_screenshot=true&annotate=true");
    let payload = snap["screenshot"].as_str().expect("embedded screenshot");
    assert!(payload.len() <= budget, "{} > {}", payload.len(), budget);

    let bytes = BASE64.decode(payload).unwrap();
    assert!(image::load_from_memory(&bytes).is_ok());
}

#[test]
fn node_screenshot_crops_to_the_target() {
    let h = Harness::start();
    let shot = h.get_ok("/screenshot/node?path=HUD/StartButton&width=64&height=64");
    assert!(shot["node_rect"]["size"][0].as_f64().unwrap() > 0.0);
    let bytes = BASE64.decode(shot["image"].as_str().unwrap()).unwrap();
    assert!(image::load_from_memory(&bytes).is_ok());

    let missing = h.get_ok("/screenshot/node?path=Nope");
    assert_eq!(missing["error"], "Node not found: Nope");
}
