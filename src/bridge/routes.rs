//! Route handlers: thin adapters between the wire and the subsystems.
//!
//! Conventions (uniform across the protocol):
//! - Semantic failures are HTTP 200 with an `error` field in the body;
//!   4xx/5xx is reserved for transport-level failures.
//! - Missing required parameters read `Must provide '<name>'`.
//! - `ref` and `path` are interchangeable wherever a node is addressed.
//! - Successful responses carry a human-readable `_description`.
//! - Mutation endpoints accept trailing `snapshot`/`screenshot` flags so a
//!   client can fuse action and observation into one round-trip.

use std::collections::VecDeque;

use glam::Vec2;
use serde_json::{json, Map, Value};

use crate::core::diff::diff_snapshots;
use crate::core::input::{
    action_event, key_event, mouse_button_event, mouse_motion_event, node_click_point,
    parse_steps, resolve_key, ClickTarget, KeyAction,
};
use crate::core::screenshot::{capture, capture_node, collect_annotations, CaptureOptions};
use crate::core::snapshot::{count_nodes, take_snapshot};
use crate::core::state::read_state;
use crate::core::wait::{parse_condition, Condition};
use crate::engine::input::MouseButton;
use crate::engine::InstanceId;
use crate::serialize::{from_json, from_json_typed, to_json};
use crate::server::request::Request;
use crate::server::response::Reply;
use crate::server::HttpServer;

use super::task::{Deadline, Task};
use super::{attach_observations, Ctx, Handler, HandlerResult, Observe};

/// Install the full runtime route table.
pub fn register_all(server: &mut HttpServer<Handler>) {
    server.register("GET", "/snapshot", snapshot);
    server.register("GET", "/snapshot/diff", snapshot_diff);
    server.register("GET", "/screenshot", screenshot);
    server.register("GET", "/screenshot/node", screenshot_node);
    server.register("POST", "/click", click);
    server.register("POST", "/click_node", click_node);
    server.register("POST", "/key", key);
    server.register("POST", "/action", action);
    server.register("GET", "/actions", actions);
    server.register("POST", "/mouse_move", mouse_move);
    server.register("POST", "/sequence", sequence);
    server.register("GET", "/state", state);
    server.register("POST", "/set_property", set_property);
    server.register("POST", "/call_method", call_method);
    server.register("POST", "/wait", wait);
    server.register("POST", "/wait_for", wait_for);
    server.register("GET", "/info", info);
    server.register("POST", "/pause", pause);
    server.register("POST", "/timescale", timescale);
    server.register("GET", "/console", console);
    server.register("GET", "/scene_history", scene_history);
    server.register("GET", "/events", events);
    server.register("POST", "/events/watch", events_watch);
    server.register("POST", "/events/unwatch", events_unwatch);
    server.register("GET", "/events/watches", events_watches);
}

// --- small helpers -------------------------------------------------------

fn done(value: Value) -> HandlerResult {
    HandlerResult::Done(Reply::Value(value))
}

fn err(message: impl Into<String>) -> HandlerResult {
    done(json!({"error": message.into()}))
}

fn missing(name: &str) -> HandlerResult {
    err(format!("Must provide '{}'", name))
}

/// The `ref`-or-`path` identifier, if any was supplied.
fn target_ident(request: &Request) -> Option<String> {
    request
        .str_param("ref")
        .or_else(|| request.str_param("path"))
}

/// Resolve the addressed node or produce the uniform error body.
fn resolve_target(ctx: &mut Ctx<'_>, request: &Request) -> Result<InstanceId, HandlerResult> {
    let Some(ident) = target_ident(request) else {
        return Err(err("Must provide 'ref' or 'path'"));
    };
    ctx.state
        .refs
        .resolve(ctx.engine, &ident, None)
        .ok_or_else(|| err(format!("Node not found: {}", ident)))
}

fn observe_flags(request: &Request, snapshot_default: bool) -> Observe {
    Observe {
        snapshot: request.bool_param("snapshot").unwrap_or(snapshot_default),
        screenshot: request.bool_param("screenshot").unwrap_or(false),
    }
}

fn capture_opts(ctx: &Ctx<'_>, request: &Request) -> CaptureOptions {
    CaptureOptions {
        width: request
            .u32_param("width")
            .unwrap_or(ctx.config.screenshot_width),
        height: request
            .u32_param("height")
            .unwrap_or(ctx.config.screenshot_height),
        quality: request
            .f64_param("quality")
            .map(|q| q as f32)
            .unwrap_or(ctx.config.screenshot_quality),
        max_base64_len: ctx.config.max_base64_len,
    }
}

// --- observation ---------------------------------------------------------

fn snapshot(ctx: &mut Ctx<'_>, request: &Request) -> HandlerResult {
    let depth = request
        .u32_param("depth")
        .unwrap_or(ctx.config.max_snapshot_depth);
    let root_ident = request.str_param("root").unwrap_or_default();
    let root = if root_ident.is_empty() {
        None
    } else {
        ctx.state
            .refs
            .resolve_or_scene_root(ctx.engine, &root_ident)
    };

    let snap = take_snapshot(
        ctx.engine,
        &mut ctx.state.refs,
        root,
        depth,
        ctx.config.max_node_count,
        ctx.state.accumulator.count(),
    );
    let nodes = count_nodes(&snap.nodes);
    let description = format!("Snapshot of '{}': {} node(s)", snap.scene_name, nodes);

    let mut out = match serde_json::to_value(&snap) {
        Ok(v) => v,
        Err(e) => return err(format!("Snapshot serialization failed: {}", e)),
    };
    out["_description"] = json!(description);

    if request.bool_param("include_screenshot").unwrap_or(false) {
        let annotate = request.bool_param("annotate").unwrap_or(true);
        let annotations = if annotate {
            Some(collect_annotations(ctx.engine, &mut ctx.state.refs))
        } else {
            None
        };
        match capture(
            ctx.engine,
            capture_opts(ctx, request),
            annotations.as_deref(),
            "snapshot",
        ) {
            // Snapshots embed the bare base64 payload.
            Ok(shot) => out["screenshot"] = shot["image"].clone(),
            Err(e) => out["note"] = json!(format!("Screenshot unavailable: {}", e)),
        }
    }
    done(out)
}

fn snapshot_diff(ctx: &mut Ctx<'_>, request: &Request) -> HandlerResult {
    let depth = request
        .u32_param("depth")
        .unwrap_or(ctx.config.max_snapshot_depth);
    let current = take_snapshot(
        ctx.engine,
        &mut ctx.state.refs,
        None,
        depth,
        ctx.config.max_node_count,
        ctx.state.accumulator.count(),
    );

    let out = match ctx.state.diff_baseline.replace(current.clone()) {
        None => json!({
            "baseline_set": true,
            "_description": "Baseline snapshot stored; call again to diff",
        }),
        Some(previous) => {
            let diff = diff_snapshots(&previous, &current);
            let added = diff["nodes_added"].as_array().map(|a| a.len()).unwrap_or(0);
            let removed = diff["nodes_removed"].as_array().map(|a| a.len()).unwrap_or(0);
            let changed = diff["nodes_changed"]
                .as_object()
                .map(|o| o.len())
                .unwrap_or(0);
            json!({
                "diff": diff,
                "_description": format!(
                    "Snapshot diff: {} added, {} removed, {} changed",
                    added, removed, changed
                ),
            })
        }
    };
    done(out)
}

fn screenshot(ctx: &mut Ctx<'_>, request: &Request) -> HandlerResult {
    let annotate = request.bool_param("annotate").unwrap_or(true);
    let annotations = if annotate {
        Some(collect_annotations(ctx.engine, &mut ctx.state.refs))
    } else {
        None
    };
    match capture(
        ctx.engine,
        capture_opts(ctx, request),
        annotations.as_deref(),
        "viewport",
    ) {
        Ok(mut shot) => {
            shot["_description"] = json!(format!(
                "Screenshot {}x{}",
                shot["size"][0], shot["size"][1]
            ));
            done(shot)
        }
        Err(e) => err(e),
    }
}

fn screenshot_node(ctx: &mut Ctx<'_>, request: &Request) -> HandlerResult {
    let id = match resolve_target(ctx, request) {
        Ok(id) => id,
        Err(e) => return e,
    };
    match capture_node(ctx.engine, id, capture_opts(ctx, request)) {
        Ok(mut shot) => {
            shot["_description"] = json!("Node screenshot");
            done(shot)
        }
        Err(e) => err(e),
    }
}

fn state(ctx: &mut Ctx<'_>, request: &Request) -> HandlerResult {
    let id = match resolve_target(ctx, request) {
        Ok(id) => id,
        Err(e) => return e,
    };
    let mut map = read_state(ctx.engine, id);
    let target = map
        .get("path")
        .and_then(Value::as_str)
        .unwrap_or("?")
        .to_string();
    let class = map
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("?")
        .to_string();
    map.insert(
        "_description".into(),
        json!(format!("State of '{}' ({})", target, class)),
    );
    done(Value::Object(map))
}

// --- input ---------------------------------------------------------------

fn click(ctx: &mut Ctx<'_>, request: &Request) -> HandlerResult {
    let Some(x) = request.f64_param("x") else {
        return missing("x");
    };
    let Some(y) = request.f64_param("y") else {
        return missing("y");
    };
    let button = MouseButton::from_name(
        &request.str_param("button").unwrap_or_else(|| "left".into()),
    );
    let double = request.bool_param("double").unwrap_or(false);
    let position = Vec2::new(x as f32, y as f32);

    press_click(ctx, position, button, double);
    let verb = if double { "Double-clicked" } else { "Clicked" };
    HandlerResult::Suspend(Task::ClickRelease {
        button,
        position,
        after_frame: ctx.engine.frame(),
        base: json!({
            "_description": format!("{} {} at ({:.0}, {:.0})", verb, button.name(), x, y),
            "position": [x, y],
            "button": button.name(),
        }),
        observe: observe_flags(request, false),
    })
}

fn click_node(ctx: &mut Ctx<'_>, request: &Request) -> HandlerResult {
    let ident = target_ident(request).unwrap_or_default();
    let id = match resolve_target(ctx, request) {
        Ok(id) => id,
        Err(e) => return e,
    };
    match node_click_point(ctx.engine, id) {
        ClickTarget::Point(position) => {
            press_click(ctx, position, MouseButton::Left, false);
            HandlerResult::Suspend(Task::ClickRelease {
                button: MouseButton::Left,
                position,
                after_frame: ctx.engine.frame(),
                base: json!({
                    "_description": format!(
                        "Clicked node '{}' at ({:.0}, {:.0})",
                        ident, position.x, position.y
                    ),
                    "position": [position.x, position.y],
                }),
                observe: observe_flags(request, false),
            })
        }
        ClickTarget::Diagnostic(message) => err(message),
    }
}

fn press_click(ctx: &mut Ctx<'_>, position: Vec2, button: MouseButton, double: bool) {
    ctx.engine
        .dispatch_input(mouse_motion_event(position, Vec2::ZERO));
    ctx.engine
        .dispatch_input(mouse_button_event(button, position, true, double));
}

fn key(ctx: &mut Ctx<'_>, request: &Request) -> HandlerResult {
    let Some(name) = request.str_param("key") else {
        return missing("key");
    };
    let Some(keycode) = resolve_key(&name) else {
        return err(format!("Unknown key '{}'", name));
    };
    let action_name = request.str_param("action").unwrap_or_default();
    let Some(action) = KeyAction::from_name(&action_name) else {
        return err(format!("Unknown key action '{}'", action_name));
    };
    let duration = request.f64_param("duration").unwrap_or(0.0).max(0.0);

    match action {
        KeyAction::Press => {
            ctx.engine.dispatch_input(key_event(keycode, true));
            done(json!({"_description": format!("Key '{}' press", name)}))
        }
        KeyAction::Release => {
            ctx.engine.dispatch_input(key_event(keycode, false));
            done(json!({"_description": format!("Key '{}' release", name)}))
        }
        KeyAction::Tap => {
            ctx.engine.dispatch_input(key_event(keycode, true));
            HandlerResult::Suspend(Task::KeyRelease {
                keycode,
                deadline: Deadline::Frame(ctx.engine.frame()),
                base: json!({"_description": format!("Tapped '{}'", name)}),
            })
        }
        KeyAction::Hold => {
            ctx.engine.dispatch_input(key_event(keycode, true));
            let deadline = if duration > 0.0 {
                Deadline::Clock(ctx.engine.engine_time() + duration)
            } else {
                Deadline::Frame(ctx.engine.frame())
            };
            HandlerResult::Suspend(Task::KeyRelease {
                keycode,
                deadline,
                base: json!({
                    "_description": format!("Held '{}' for {}s", name, duration),
                }),
            })
        }
    }
}

fn action(ctx: &mut Ctx<'_>, request: &Request) -> HandlerResult {
    let Some(name) = request.str_param("action") else {
        return missing("action");
    };
    if !ctx.engine.has_action(&name) {
        return err(format!("Action not found: {}", name));
    }
    let pressed = request.bool_param("pressed").unwrap_or(true);
    let strength = request.f64_param("strength").unwrap_or(1.0) as f32;
    ctx.engine
        .dispatch_input(action_event(&name, pressed, strength));
    done(json!({
        "_description": format!(
            "Action '{}' {}",
            name,
            if pressed { "pressed" } else { "released" }
        ),
    }))
}

fn actions(ctx: &mut Ctx<'_>, _request: &Request) -> HandlerResult {
    let mut map = Map::new();
    for name in ctx.engine.action_names() {
        let bindings = ctx.engine.action_bindings(&name);
        map.insert(name, json!(bindings));
    }
    let count = map.len();
    done(json!({
        "actions": map,
        "_description": format!("{} input action(s)", count),
    }))
}

fn mouse_move(ctx: &mut Ctx<'_>, request: &Request) -> HandlerResult {
    let Some(x) = request.f64_param("x") else {
        return missing("x");
    };
    let Some(y) = request.f64_param("y") else {
        return missing("y");
    };
    let rel = Vec2::new(
        request.f64_param("relative_x").unwrap_or(0.0) as f32,
        request.f64_param("relative_y").unwrap_or(0.0) as f32,
    );
    let position = Vec2::new(x as f32, y as f32);
    ctx.engine.dispatch_input(mouse_motion_event(position, rel));
    done(json!({
        "_description": format!("Mouse moved to ({:.0}, {:.0})", x, y),
    }))
}

fn sequence(ctx: &mut Ctx<'_>, request: &Request) -> HandlerResult {
    let Some(steps_value) = request.value_param("steps") else {
        return missing("steps");
    };
    let steps = match parse_steps(&steps_value) {
        Ok(steps) => steps,
        Err(e) => return err(e),
    };
    HandlerResult::Suspend(Task::Sequence {
        remaining: VecDeque::from(steps),
        active: None,
        started: ctx.engine.engine_time(),
        executed: 0,
        observe: Observe {
            snapshot: request.bool_param("snapshot_after").unwrap_or(true),
            screenshot: request.bool_param("screenshot_after").unwrap_or(false),
        },
    })
}

// --- mutation ------------------------------------------------------------

fn set_property(ctx: &mut Ctx<'_>, request: &Request) -> HandlerResult {
    let id = match resolve_target(ctx, request) {
        Ok(id) => id,
        Err(e) => return e,
    };
    let Some(property) = request.str_param("property") else {
        return missing("property");
    };
    let Some(raw) = request.value_param("value") else {
        return missing("value");
    };

    // The receiving property's kind steers deserialization, so a JSON
    // `[400, 100]` lands as a vector when the property is one.
    let value = match ctx.engine.property_kind(id, &property) {
        Some(kind) => match from_json_typed(&raw, kind) {
            Some(v) => v,
            None => {
                return err(format!(
                    "Cannot convert value for '{}' (expected {:?})",
                    property, kind
                ))
            }
        },
        None => from_json(&raw),
    };

    if let Err(e) = ctx.engine.set_property(id, &property, value) {
        return err(e.to_string());
    }

    let ident = target_ident(request).unwrap_or_default();
    let mut out = json!({
        "ok": true,
        "_description": format!("Set '{}'.{}", ident, property),
    });
    attach_observations(ctx, &mut out, &observe_flags(request, false));
    done(out)
}

fn call_method(ctx: &mut Ctx<'_>, request: &Request) -> HandlerResult {
    let id = match resolve_target(ctx, request) {
        Ok(id) => id,
        Err(e) => return e,
    };
    let Some(method) = request.str_param("method") else {
        return missing("method");
    };
    let args: Vec<_> = request
        .value_param("args")
        .and_then(|v| v.as_array().cloned())
        .unwrap_or_default()
        .iter()
        .map(from_json)
        .collect();

    if !ctx.engine.has_method(id, &method) {
        let class = ctx.engine.class_name(id).unwrap_or("Node").to_string();
        return err(format!("Method not found: {} on {}", method, class));
    }
    match ctx.engine.call_method(id, &method, &args) {
        Ok(result) => {
            let ident = target_ident(request).unwrap_or_default();
            done(json!({
                "result": to_json(&result),
                "_description": format!("Called '{}'.{}()", ident, method),
            }))
        }
        Err(e) => err(e.to_string()),
    }
}

// --- waiting -------------------------------------------------------------

fn wait(ctx: &mut Ctx<'_>, request: &Request) -> HandlerResult {
    let seconds = request.f64_param("seconds").unwrap_or(1.0).max(0.0);
    HandlerResult::Suspend(Task::Wait {
        until: ctx.engine.engine_time() + seconds,
        base: json!({
            "_description": format!("Waited {}s", seconds),
            "seconds": seconds,
        }),
        observe: observe_flags(request, true),
    })
}

fn wait_for(ctx: &mut Ctx<'_>, request: &Request) -> HandlerResult {
    let Some(kind) = request.str_param("condition") else {
        return missing("condition");
    };
    let ident = target_ident(request).unwrap_or_default();
    let property = request.str_param("property").unwrap_or_default();
    let signal = request.str_param("signal").unwrap_or_default();
    let value = request.value_param("value");

    let cond = match parse_condition(&kind, &ident, &property, value, &signal) {
        Ok(c) => c,
        Err(e) => return err(e),
    };

    // Signal conditions install a one-shot subscription up front; the task
    // disconnects it on fire or timeout.
    let signal_sub = if let Condition::Signal { ident, signal } = &cond {
        let Some(id) = ctx.state.refs.resolve(ctx.engine, ident, None) else {
            return err(format!("Node not found: {}", ident));
        };
        if !ctx.engine.has_signal(id, signal) {
            let class = ctx.engine.class_name(id).unwrap_or("Node").to_string();
            return err(format!("Signal not found: {} on {}", signal, class));
        }
        let sub = ctx.state.sub_ids.next();
        if let Err(e) = ctx.engine.connect_signal(id, signal, sub) {
            return err(e.to_string());
        }
        Some((sub, id, signal.clone()))
    } else {
        None
    };

    let timeout = request.f64_param("timeout").unwrap_or(10.0).max(0.0);
    let poll_every = request.f64_param("poll_interval").unwrap_or(0.1).max(0.01);
    let now = ctx.engine.engine_time();
    HandlerResult::Suspend(Task::WaitFor {
        cond,
        started: now,
        deadline: now + timeout,
        poll_every,
        next_poll: now,
        signal_sub,
        observe: observe_flags(request, true),
    })
}

// --- game control --------------------------------------------------------

fn info(ctx: &mut Ctx<'_>, _request: &Request) -> HandlerResult {
    let engine = &*ctx.engine;
    let (vw, vh) = engine.viewport_size();

    // Autoloads are the tree-root children that are not the scene itself.
    let mut autoloads = Vec::new();
    if let Some(root) = engine.tree_root() {
        let scene = engine.scene_root();
        for child in engine.children(root) {
            if Some(child) == scene {
                continue;
            }
            if let Some(name) = engine.node_name(child) {
                if !name.starts_with('@') && name != crate::config::BRIDGE_NODE_NAME {
                    autoloads.push(name.to_string());
                }
            }
        }
    }

    done(json!({
        "project": engine.project_name(),
        "current_scene": engine.scene_name(),
        "scene_file": engine.scene_file(),
        "viewport_size": [vw, vh],
        "fps": engine.fps(),
        "frame": engine.frame(),
        "time": engine.engine_time(),
        "time_scale": engine.time_scale(),
        "paused": engine.is_paused(),
        "actions": engine.action_names(),
        "autoloads": autoloads,
        "_description": format!("Game info: scene '{}'", engine.scene_name()),
    }))
}

fn pause(ctx: &mut Ctx<'_>, request: &Request) -> HandlerResult {
    let paused = request.bool_param("paused").unwrap_or(true);
    ctx.engine.set_paused(paused);
    done(json!({
        "paused": paused,
        "_description": if paused { "Game paused" } else { "Game resumed" },
    }))
}

fn timescale(ctx: &mut Ctx<'_>, request: &Request) -> HandlerResult {
    let Some(scale) = request.f64_param("scale") else {
        return missing("scale");
    };
    let clamped = scale.clamp(0.01, 10.0);
    ctx.engine.set_time_scale(clamped);
    done(json!({
        "scale": clamped,
        "_description": format!("Time scale set to {}x", clamped),
    }))
}

fn console(ctx: &mut Ctx<'_>, _request: &Request) -> HandlerResult {
    match ctx.engine.log_tail(16 * 1024) {
        Some(output) => {
            let lines = output.lines().count();
            done(json!({
                "output": output,
                "_description": format!("Console output ({} line(s))", lines),
            }))
        }
        None => done(json!({
            "output": "",
            "note": "Engine log unavailable",
        })),
    }
}

fn scene_history(ctx: &mut Ctx<'_>, _request: &Request) -> HandlerResult {
    let events = ctx.state.accumulator.scene_history();
    let count = events.len();
    done(json!({
        "events": events,
        "_description": format!("Scene history: {} event(s)", count),
    }))
}

// --- event accumulator ---------------------------------------------------

fn events(ctx: &mut Ctx<'_>, request: &Request) -> HandlerResult {
    let peek = request.bool_param("peek").unwrap_or(false);
    let list = if peek {
        ctx.state.accumulator.peek()
    } else {
        ctx.state.accumulator.drain()
    };
    let count = list.len();
    let events = match serde_json::to_value(&list) {
        Ok(v) => v,
        Err(e) => return err(format!("Event serialization failed: {}", e)),
    };
    done(json!({
        "events": events,
        "count": count,
        "_description": format!(
            "{} game event(s){}",
            count,
            if peek { " (peek)" } else { "" }
        ),
    }))
}

fn events_watch(ctx: &mut Ctx<'_>, request: &Request) -> HandlerResult {
    let Some(node_path) = request.str_param("node_path") else {
        return missing("node_path");
    };
    let Some(property) = request.str_param("property") else {
        return missing("property");
    };
    let label = request.str_param("label").unwrap_or_default();

    match ctx
        .state
        .accumulator
        .add_watch(ctx.engine, &node_path, &property, &label)
    {
        Ok(watch) => done(json!({
            "ok": true,
            "watch": serde_json::to_value(&watch).unwrap_or(Value::Null),
            "_description": format!("Watching '{}.{}'", node_path, property),
        })),
        Err(e) => err(e),
    }
}

fn events_unwatch(ctx: &mut Ctx<'_>, request: &Request) -> HandlerResult {
    let Some(node_path) = request.str_param("node_path") else {
        return missing("node_path");
    };
    let Some(property) = request.str_param("property") else {
        return missing("property");
    };
    let removed = ctx.state.accumulator.remove_watch(&node_path, &property);
    done(json!({
        "ok": true,
        "removed": removed,
        "_description": format!("Unwatched '{}.{}'", node_path, property),
    }))
}

fn events_watches(ctx: &mut Ctx<'_>, _request: &Request) -> HandlerResult {
    let watches = ctx.state.accumulator.watches();
    let count = watches.len();
    done(json!({
        "watches": serde_json::to_value(watches).unwrap_or(Value::Null),
        "_description": format!("{} active watch(es)", count),
    }))
}
