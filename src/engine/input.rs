//! Synthesized input event model.
//!
//! Events delivered through [`crate::engine::Engine::dispatch_input`] enter
//! the engine's raw-input path, so a game cannot tell synthetic input from a
//! real device.

use glam::Vec2;

/// Mouse button identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    /// Parse the wire name used by `/click`. Unknown names fall back to left.
    pub fn from_name(name: &str) -> Self {
        match name {
            "right" => MouseButton::Right,
            "middle" => MouseButton::Middle,
            _ => MouseButton::Left,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
        }
    }
}

/// A single synthesized input event.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Key {
        keycode: u32,
        pressed: bool,
    },
    MouseButton {
        button: MouseButton,
        /// Local and global position coincide for a whole-viewport bridge.
        position: Vec2,
        pressed: bool,
        double: bool,
    },
    MouseMotion {
        position: Vec2,
        relative: Vec2,
    },
    /// Mapped-action event; drives the engine's input map regardless of the
    /// concrete key bindings.
    Action {
        name: String,
        pressed: bool,
        strength: f32,
    },
}

impl InputEvent {
    pub fn is_pressed(&self) -> bool {
        match self {
            InputEvent::Key { pressed, .. } => *pressed,
            InputEvent::MouseButton { pressed, .. } => *pressed,
            InputEvent::MouseMotion { .. } => false,
            InputEvent::Action { pressed, .. } => *pressed,
        }
    }

    /// Short form for logs and the sim input journal.
    pub fn summary(&self) -> String {
        match self {
            InputEvent::Key { keycode, pressed } => {
                format!("key:{}:{}", keycode, if *pressed { "down" } else { "up" })
            }
            InputEvent::MouseButton {
                button,
                position,
                pressed,
                double,
            } => format!(
                "mouse:{}:{}:{:.0},{:.0}{}",
                button.name(),
                if *pressed { "down" } else { "up" },
                position.x,
                position.y,
                if *double { ":double" } else { "" }
            ),
            InputEvent::MouseMotion { position, .. } => {
                format!("motion:{:.0},{:.0}", position.x, position.y)
            }
            InputEvent::Action {
                name,
                pressed,
                strength,
            } => format!(
                "action:{}:{}:{:.2}",
                name,
                if *pressed { "down" } else { "up" },
                strength
            ),
        }
    }
}
