//! Transport-level protocol behavior: routing, error framing, CORS, game
//! control endpoints.

mod common;

use common::Harness;
use serde_json::json;

#[test]
fn unknown_route_is_404_with_context() {
    let h = Harness::start();
    let (status, body) = h.get("/definitely_not_a_route");
    assert_eq!(status, 404);
    assert_eq!(body["path"], "/definitely_not_a_route");
    assert_eq!(body["method"], "GET");
    assert!(body["error"].is_string());
}

#[test]
fn malformed_json_post_is_400() {
    let h = Harness::start();
    let (status, text) = h.raw(
        b"POST /click HTTP/1.1\r\nHost: t\r\nContent-Type: application/json\r\nContent-Length: 1\r\n\r\n{",
    );
    assert_eq!(status, 400);
    assert!(text.contains("Invalid JSON in request body"));
}

#[test]
fn responses_carry_cors_and_close() {
    let h = Harness::start();
    let (_, text) = h.raw(b"GET /info HTTP/1.1\r\nHost: t\r\n\r\n");
    assert!(text.contains("Access-Control-Allow-Origin: *"));
    assert!(text.contains("Connection: close"));
}

#[test]
fn options_preflight_is_204() {
    let h = Harness::start();
    let (status, text) = h.raw(b"OPTIONS /click HTTP/1.1\r\nHost: t\r\n\r\n");
    assert_eq!(status, 204);
    assert!(text.contains("Access-Control-Allow-Methods"));
}

#[test]
fn missing_parameters_are_semantic_errors() {
    let h = Harness::start();
    // Errors ride in a 200 body; 4xx is reserved for transport failures.
    let out = h.post_ok("/click", json!({"y": 10}));
    assert_eq!(out["error"], "Must provide 'x'");

    let out = h.post_ok("/set_property", json!({"path": "Player"}));
    assert_eq!(out["error"], "Must provide 'property'");

    let out = h.get_ok("/state");
    assert_eq!(out["error"], "Must provide 'ref' or 'path'");
}

#[test]
fn info_reports_project_scene_and_autoloads() {
    let h = Harness::start();
    let info = h.get_ok("/info");
    assert_eq!(info["project"], "harness");
    assert_eq!(info["current_scene"], "Main");
    assert_eq!(info["viewport_size"], json!([640, 360]));
    assert_eq!(info["paused"], false);

    let actions: Vec<&str> = info["actions"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert!(actions.contains(&"jump"));

    let autoloads = info["autoloads"].as_array().unwrap();
    assert!(autoloads.iter().any(|v| v == "GameState"));
    // The bridge's own node never shows up.
    assert!(!autoloads.iter().any(|v| v == "SceneBridge"));
}

#[test]
fn actions_listing_includes_bindings() {
    let h = Harness::start();
    let out = h.get_ok("/actions");
    assert_eq!(out["actions"]["jump"], json!(["Space"]));
}

#[test]
fn pause_and_timescale_round_trip() {
    let h = Harness::start();
    let out = h.post_ok("/pause", json!({"paused": true}));
    assert_eq!(out["paused"], true);
    assert_eq!(h.get_ok("/info")["paused"], true);

    // Snapshots keep working while paused.
    let snap = h.get_ok("/snapshot?depth=2");
    assert_eq!(snap["paused"], true);

    h.post_ok("/pause", json!({"paused": false}));
    assert_eq!(h.get_ok("/info")["paused"], false);

    // Scale clamps to 0.01..=10.
    let out = h.post_ok("/timescale", json!({"scale": 50.0}));
    assert_eq!(out["scale"], 10.0);
    let out = h.post_ok("/timescale", json!({"scale": 0.0001}));
    assert_eq!(out["scale"], 0.01);
    h.post_ok("/timescale", json!({"scale": 1.0}));
}

#[test]
fn console_returns_engine_log_tail() {
    let h = Harness::start();
    let out = h.get_ok("/console");
    let output = out["output"].as_str().unwrap();
    assert!(output.contains("scene loaded") || output.contains("demo scene ready"));
}

#[test]
fn concurrent_connections_do_not_block_each_other() {
    let h = Harness::start();
    let addr = h.addr;

    // A long wait on one connection...
    let waiter = std::thread::spawn(move || {
        let h2 = HarnessRef { addr };
        h2.post("/wait", json!({"seconds": 1.0, "snapshot": false}))
    });

    // ...must not delay a quick request on another.
    std::thread::sleep(std::time::Duration::from_millis(100));
    let started = std::time::Instant::now();
    h.get_ok("/info");
    assert!(started.elapsed() < std::time::Duration::from_millis(500));

    let (status, out) = waiter.join().unwrap();
    assert_eq!(status, 200);
    assert_eq!(out["seconds"], 1.0);
}

/// Thin client clone for threads (Harness itself owns the engine loop).
struct HarnessRef {
    addr: std::net::SocketAddr,
}

impl HarnessRef {
    fn post(&self, path: &str, body: serde_json::Value) -> (u16, serde_json::Value) {
        use std::io::{Read, Write};
        let payload = serde_json::to_vec(&body).unwrap();
        let mut stream = std::net::TcpStream::connect(self.addr).unwrap();
        stream
            .set_read_timeout(Some(std::time::Duration::from_secs(30)))
            .unwrap();
        let head = format!(
            "POST {} HTTP/1.1\r\nHost: t\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
            path,
            payload.len()
        );
        stream.write_all(head.as_bytes()).unwrap();
        stream.write_all(&payload).unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        let text = String::from_utf8_lossy(&out);
        let status = text
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let json = text
            .split_once("\r\n\r\n")
            .and_then(|(_, b)| serde_json::from_str(b).ok())
            .unwrap_or(serde_json::Value::Null);
        (status, json)
    }
}
