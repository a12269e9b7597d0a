//! Input synthesis: key-name resolution, click targeting and sequence steps.
//!
//! Press/release pacing (tap = press, one frame, release; hold = press,
//! engine-clock delay, release) lives in the continuation layer
//! ([`crate::core::task`]); this module supplies the pure pieces.

use glam::Vec2;
use log::warn;
use serde_json::Value;

use crate::engine::input::{InputEvent, MouseButton};
use crate::engine::{Engine, InstanceId, Projection};

/// Named keycodes outside the printable-ASCII range. The engine contract
/// consumes this keycode space as-is.
pub mod keys {
    const SPECIAL: u32 = 0x0040_0000;

    pub const ESCAPE: u32 = SPECIAL | 0x01;
    pub const TAB: u32 = SPECIAL | 0x02;
    pub const BACKSPACE: u32 = SPECIAL | 0x03;
    pub const ENTER: u32 = SPECIAL | 0x04;
    pub const INSERT: u32 = SPECIAL | 0x05;
    pub const DELETE: u32 = SPECIAL | 0x06;
    pub const HOME: u32 = SPECIAL | 0x07;
    pub const END: u32 = SPECIAL | 0x08;
    pub const PAGE_UP: u32 = SPECIAL | 0x09;
    pub const PAGE_DOWN: u32 = SPECIAL | 0x0a;
    pub const UP: u32 = SPECIAL | 0x0b;
    pub const DOWN: u32 = SPECIAL | 0x0c;
    pub const LEFT: u32 = SPECIAL | 0x0d;
    pub const RIGHT: u32 = SPECIAL | 0x0e;
    pub const SHIFT: u32 = SPECIAL | 0x0f;
    pub const CTRL: u32 = SPECIAL | 0x10;
    pub const ALT: u32 = SPECIAL | 0x11;
    pub const META: u32 = SPECIAL | 0x12;
    pub const CAPS_LOCK: u32 = SPECIAL | 0x13;
    pub const NUM_LOCK: u32 = SPECIAL | 0x14;
    pub const SCROLL_LOCK: u32 = SPECIAL | 0x15;
    pub const F1: u32 = SPECIAL | 0x20;
}

/// Resolve a lowercased key name to a keycode.
///
/// Covers letters, digits, whitespace, modifiers, arrows, function keys,
/// lock keys and common punctuation, with platform aliases for the super
/// key. Single characters fall back to their ASCII uppercase form.
pub fn resolve_key(name: &str) -> Option<u32> {
    let lower = name.to_lowercase();
    let code = match lower.as_str() {
        "space" => b' ' as u32,
        "enter" | "return" => keys::ENTER,
        "escape" | "esc" => keys::ESCAPE,
        "tab" => keys::TAB,
        "backspace" => keys::BACKSPACE,
        "delete" | "del" => keys::DELETE,
        "insert" => keys::INSERT,
        "home" => keys::HOME,
        "end" => keys::END,
        "pageup" | "page_up" => keys::PAGE_UP,
        "pagedown" | "page_down" => keys::PAGE_DOWN,
        "up" => keys::UP,
        "down" => keys::DOWN,
        "left" => keys::LEFT,
        "right" => keys::RIGHT,
        "shift" => keys::SHIFT,
        "ctrl" | "control" => keys::CTRL,
        "alt" => keys::ALT,
        "meta" | "super" | "win" | "cmd" => keys::META,
        "capslock" | "caps_lock" => keys::CAPS_LOCK,
        "numlock" | "num_lock" => keys::NUM_LOCK,
        "scrolllock" | "scroll_lock" => keys::SCROLL_LOCK,
        "comma" => b',' as u32,
        "period" | "dot" => b'.' as u32,
        "slash" => b'/' as u32,
        "backslash" => b'\\' as u32,
        "semicolon" => b';' as u32,
        "apostrophe" | "quote" => b'\'' as u32,
        "backtick" | "grave" => b'`' as u32,
        "minus" => b'-' as u32,
        "equal" | "equals" => b'=' as u32,
        "bracketleft" => b'[' as u32,
        "bracketright" => b']' as u32,
        _ => {
            if let Some(n) = lower.strip_prefix('f').and_then(|s| s.parse::<u32>().ok()) {
                if (1..=12).contains(&n) {
                    return Some(keys::F1 + (n - 1));
                }
            }
            let mut chars = lower.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii() => c.to_ascii_uppercase() as u32,
                _ => return None,
            }
        }
    };
    Some(code)
}

/// How `/key` delivers a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Press, one frame, release.
    Tap,
    /// Press only.
    Press,
    /// Release only.
    Release,
    /// Press, engine-clock delay, release.
    Hold,
}

impl KeyAction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "tap" | "" => Some(KeyAction::Tap),
            "press" => Some(KeyAction::Press),
            "release" => Some(KeyAction::Release),
            "hold" => Some(KeyAction::Hold),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            KeyAction::Tap => "tap",
            KeyAction::Press => "press",
            KeyAction::Release => "release",
            KeyAction::Hold => "hold",
        }
    }
}

pub fn key_event(keycode: u32, pressed: bool) -> InputEvent {
    InputEvent::Key { keycode, pressed }
}

pub fn mouse_button_event(
    button: MouseButton,
    position: Vec2,
    pressed: bool,
    double: bool,
) -> InputEvent {
    InputEvent::MouseButton {
        button,
        position,
        pressed,
        double,
    }
}

pub fn mouse_motion_event(position: Vec2, relative: Vec2) -> InputEvent {
    InputEvent::MouseMotion { position, relative }
}

pub fn action_event(name: &str, pressed: bool, strength: f32) -> InputEvent {
    InputEvent::Action {
        name: name.to_string(),
        pressed,
        strength: strength.clamp(0.0, 1.0),
    }
}

/// Where a click on a node should land.
#[derive(Debug, Clone, PartialEq)]
pub enum ClickTarget {
    Point(Vec2),
    /// The click cannot be performed; carries the diagnostic for the client.
    Diagnostic(String),
}

/// Compute the click point for a node: rect center for UI, global position
/// for 2D, camera projection for 3D.
pub fn node_click_point(engine: &dyn Engine, id: InstanceId) -> ClickTarget {
    let class = engine.class_name(id).unwrap_or("Node").to_string();
    if engine.is_class(id, "Control") {
        if let Some(rect) = engine.global_rect(id) {
            return ClickTarget::Point(rect.center());
        }
    }
    if engine.is_class(id, "Node2D") {
        if let Some(p) = engine.global_position_2d(id) {
            return ClickTarget::Point(p);
        }
    }
    if engine.is_class(id, "Node3D") {
        return match engine.project_to_screen(id) {
            Projection::OnScreen(p) => ClickTarget::Point(p),
            Projection::Behind => {
                warn!("click target behind camera: {}", class);
                ClickTarget::Diagnostic("Node is behind the active 3D camera".into())
            }
            Projection::NoCamera | Projection::NotSpatial => {
                warn!("no active 3D camera for click on {}", class);
                ClickTarget::Diagnostic("No active 3D camera to project the node".into())
            }
        };
    }
    warn!("unsupported click target class: {}", class);
    ClickTarget::Diagnostic(format!("Cannot click a {} node", class))
}

/// One step of a scripted input sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Wait { seconds: f64 },
    Key {
        key: String,
        action: KeyAction,
        duration: f64,
    },
    Action {
        name: String,
        pressed: bool,
        strength: f32,
    },
    Click { x: f32, y: f32 },
    ClickNode { ident: String },
    MouseMove { x: f32, y: f32 },
}

/// Parse the `steps` array of `/sequence`. Each step is a tagged map; the
/// first recognized tag wins.
pub fn parse_steps(value: &Value) -> Result<Vec<Step>, String> {
    let items = value
        .as_array()
        .ok_or_else(|| "steps must be an array".to_string())?;

    let mut steps = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let map = item
            .as_object()
            .ok_or_else(|| format!("step {} is not an object", i))?;

        if let Some(secs) = map.get("wait").and_then(Value::as_f64) {
            steps.push(Step::Wait { seconds: secs });
        } else if let Some(key) = map.get("key").and_then(Value::as_str) {
            let duration = map.get("duration").and_then(Value::as_f64).unwrap_or(0.0);
            let action = match map.get("action").and_then(Value::as_str) {
                // A bare duration implies a hold.
                None if duration > 0.0 => KeyAction::Hold,
                None => KeyAction::Tap,
                Some(name) => KeyAction::from_name(name)
                    .ok_or_else(|| format!("step {}: unknown key action '{}'", i, name))?,
            };
            steps.push(Step::Key {
                key: key.to_string(),
                action,
                duration,
            });
        } else if let Some(name) = map.get("action").and_then(Value::as_str) {
            steps.push(Step::Action {
                name: name.to_string(),
                pressed: map.get("pressed").and_then(Value::as_bool).unwrap_or(true),
                strength: map
                    .get("strength")
                    .and_then(Value::as_f64)
                    .unwrap_or(1.0) as f32,
            });
        } else if let Some(pos) = map.get("click") {
            let (x, y) = point(pos).ok_or_else(|| format!("step {}: bad click position", i))?;
            steps.push(Step::Click { x, y });
        } else if let Some(ident) = map.get("click_node").and_then(Value::as_str) {
            steps.push(Step::ClickNode {
                ident: ident.to_string(),
            });
        } else if let Some(pos) = map.get("mouse_move") {
            let (x, y) =
                point(pos).ok_or_else(|| format!("step {}: bad mouse_move position", i))?;
            steps.push(Step::MouseMove { x, y });
        } else {
            return Err(format!("step {} has no recognized action", i));
        }
    }
    Ok(steps)
}

fn point(value: &Value) -> Option<(f32, f32)> {
    let arr = value.as_array()?;
    if arr.len() != 2 {
        return None;
    }
    Some((arr[0].as_f64()? as f32, arr[1].as_f64()? as f32))
}
