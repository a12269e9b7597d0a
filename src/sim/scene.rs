//! Node storage and class metadata for the simulation engine.
//!
//! The class table models the slice of a real engine's hierarchy the bridge
//! cares about: spatial bases, physics bodies, UI controls and the helper
//! classes the state reader and event accumulator dispatch on.

use glam::{Vec2, Vec3};
use indexmap::IndexMap;

use crate::engine::{InstanceId, PropertyInfo};
use crate::value::EngineValue;

/// Immediate superclass, `None` for `Node` (and unknown classes).
pub fn parent_class(class: &str) -> Option<&'static str> {
    Some(match class {
        "CanvasItem" | "Node3D" | "CanvasLayer" | "Timer" | "AnimationPlayer" | "AnimationTree"
        | "AudioStreamPlayer" | "NavigationAgent2D" | "NavigationAgent3D" | "Viewport" => "Node",
        "Node2D" | "Control" => "CanvasItem",
        "Sprite2D" | "AnimatedSprite2D" | "Camera2D" | "RayCast2D"
        | "VisibleOnScreenNotifier2D" | "TileMapLayer" | "GPUParticles2D" | "CPUParticles2D"
        | "CollisionObject2D" | "CollisionShape2D" | "AudioStreamPlayer2D" => "Node2D",
        "Area2D" | "PhysicsBody2D" => "CollisionObject2D",
        "CharacterBody2D" | "RigidBody2D" | "StaticBody2D" => "PhysicsBody2D",
        "Sprite3D" | "AnimatedSprite3D" | "Camera3D" | "RayCast3D"
        | "VisibleOnScreenNotifier3D" | "GPUParticles3D" | "CPUParticles3D"
        | "CollisionObject3D" | "AudioStreamPlayer3D" => "Node3D",
        "Area3D" | "PhysicsBody3D" => "CollisionObject3D",
        "CharacterBody3D" | "RigidBody3D" | "StaticBody3D" => "PhysicsBody3D",
        "BaseButton" | "Label" | "RichTextLabel" | "Range" | "LineEdit" | "TextEdit"
        | "Container" | "Panel" => "Control",
        "Button" | "CheckBox" => "BaseButton",
        "ProgressBar" | "HSlider" => "Range",
        "VBoxContainer" | "HBoxContainer" | "MarginContainer" | "GridContainer"
        | "PanelContainer" => "Container",
        _ => return None,
    })
}

/// `class` is `ancestor` or inherits from it.
pub fn is_subclass_or_self(class: &str, ancestor: &str) -> bool {
    let mut current = class;
    loop {
        if current == ancestor {
            return true;
        }
        match parent_class(current) {
            Some(parent) => current = parent,
            None => return false,
        }
    }
}

/// Signals a class exposes, with argument counts, inherited included.
pub fn class_signals(class: &str) -> Vec<(&'static str, usize)> {
    let mut out = Vec::new();
    let mut current = Some(class);
    while let Some(c) = current {
        let own: &[(&'static str, usize)] = match c {
            "Area2D" | "Area3D" => &[
                ("body_entered", 1),
                ("body_exited", 1),
                ("area_entered", 1),
                ("area_exited", 1),
            ],
            "RigidBody2D" | "RigidBody3D" => &[
                ("body_entered", 1),
                ("body_exited", 1),
                ("sleeping_state_changed", 0),
            ],
            "Timer" => &[("timeout", 0)],
            "BaseButton" => &[("pressed", 0), ("toggled", 1)],
            "AnimationPlayer" | "AnimationTree" => &[("animation_finished", 1)],
            "AnimatedSprite2D" | "AnimatedSprite3D" => &[("animation_finished", 0)],
            "AudioStreamPlayer" | "AudioStreamPlayer2D" | "AudioStreamPlayer3D" => {
                &[("finished", 0)]
            }
            "VisibleOnScreenNotifier2D" | "VisibleOnScreenNotifier3D" => {
                &[("screen_entered", 0), ("screen_exited", 0)]
            }
            "NavigationAgent2D" | "NavigationAgent3D" => {
                &[("target_reached", 0), ("navigation_finished", 0)]
            }
            _ => &[],
        };
        for sig in own {
            if !out.iter().any(|(n, _)| n == &sig.0) {
                out.push(*sig);
            }
        }
        current = parent_class(c);
    }
    out
}

/// One simulated node.
#[derive(Debug, Clone)]
pub struct SimNode {
    pub id: InstanceId,
    pub name: String,
    pub class: String,
    pub parent: Option<InstanceId>,
    pub children: Vec<InstanceId>,
    pub props: IndexMap<String, EngineValue>,
    pub script_props: Vec<PropertyInfo>,
    pub groups: Vec<String>,
    /// Signals declared beyond the class set (script signals).
    pub extra_signals: Vec<(String, usize)>,
}

impl SimNode {
    pub fn new(id: InstanceId, name: &str, class: &str) -> Self {
        let mut node = Self {
            id,
            name: name.to_string(),
            class: class.to_string(),
            parent: None,
            children: Vec::new(),
            props: IndexMap::new(),
            script_props: Vec::new(),
            groups: Vec::new(),
            extra_signals: Vec::new(),
        };
        node.install_class_defaults();
        node
    }

    /// Seed the built-in properties a real node of this class would carry.
    fn install_class_defaults(&mut self) {
        let class = self.class.clone();
        let is = |ancestor: &str| is_subclass_or_self(&class, ancestor);

        if is("CanvasItem") {
            self.props.insert("visible".into(), EngineValue::Bool(true));
            self.props.insert(
                "modulate".into(),
                EngineValue::Color(crate::value::Color {
                    r: 1.0,
                    g: 1.0,
                    b: 1.0,
                    a: 1.0,
                }),
            );
            self.props.insert("z_index".into(), EngineValue::Int(0));
        }
        if is("Node2D") {
            self.props
                .insert("position".into(), EngineValue::Vec2(Vec2::ZERO));
            self.props.insert("rotation".into(), EngineValue::Float(0.0));
            self.props
                .insert("scale".into(), EngineValue::Vec2(Vec2::ONE));
        }
        if is("Node3D") {
            self.props.insert("visible".into(), EngineValue::Bool(true));
            self.props
                .insert("position".into(), EngineValue::Vec3(Vec3::ZERO));
            self.props
                .insert("rotation".into(), EngineValue::Vec3(Vec3::ZERO));
            self.props
                .insert("scale".into(), EngineValue::Vec3(Vec3::ONE));
        }
        if is("Control") {
            self.props
                .insert("position".into(), EngineValue::Vec2(Vec2::ZERO));
            self.props
                .insert("size".into(), EngineValue::Vec2(Vec2::new(40.0, 24.0)));
        }
        if is("CharacterBody2D") {
            self.props
                .insert("velocity".into(), EngineValue::Vec2(Vec2::ZERO));
        }
        if is("CharacterBody3D") {
            self.props
                .insert("velocity".into(), EngineValue::Vec3(Vec3::ZERO));
        }
        if is("RigidBody2D") {
            self.props
                .insert("linear_velocity".into(), EngineValue::Vec2(Vec2::ZERO));
            self.props
                .insert("angular_velocity".into(), EngineValue::Float(0.0));
            self.props.insert("sleeping".into(), EngineValue::Bool(false));
            self.props.insert("mass".into(), EngineValue::Float(1.0));
            self.props
                .insert("gravity_scale".into(), EngineValue::Float(1.0));
            self.props
                .insert("contact_monitor".into(), EngineValue::Bool(false));
        }
        if is("Timer") {
            self.props.insert("wait_time".into(), EngineValue::Float(1.0));
            self.props.insert("time_left".into(), EngineValue::Float(0.0));
            self.props.insert("one_shot".into(), EngineValue::Bool(false));
            self.props.insert("autostart".into(), EngineValue::Bool(false));
            self.props.insert("_stopped".into(), EngineValue::Bool(true));
        }
        if is("Label") || is("Button") || is("RichTextLabel") {
            self.props.insert("text".into(), EngineValue::Str(String::new()));
        }
        if is("Button") {
            self.props.insert("disabled".into(), EngineValue::Bool(false));
        }
        if is("LineEdit") || is("TextEdit") {
            self.props.insert("text".into(), EngineValue::Str(String::new()));
            self.props
                .insert("placeholder_text".into(), EngineValue::Str(String::new()));
            self.props.insert("editable".into(), EngineValue::Bool(true));
        }
        if is("Range") {
            self.props.insert("value".into(), EngineValue::Float(0.0));
            self.props.insert("min_value".into(), EngineValue::Float(0.0));
            self.props.insert("max_value".into(), EngineValue::Float(100.0));
        }
        if is("AnimationPlayer") {
            self.props
                .insert("current_animation".into(), EngineValue::Str(String::new()));
            self.props.insert("playing".into(), EngineValue::Bool(false));
        }
        if is("AnimatedSprite2D") || is("AnimatedSprite3D") {
            self.props
                .insert("animation".into(), EngineValue::Str("default".into()));
            self.props.insert("frame".into(), EngineValue::Int(0));
            self.props.insert("playing".into(), EngineValue::Bool(false));
        }
        if is("AudioStreamPlayer") || is("AudioStreamPlayer2D") || is("AudioStreamPlayer3D") {
            self.props.insert("playing".into(), EngineValue::Bool(false));
            self.props.insert("volume_db".into(), EngineValue::Float(0.0));
            self.props
                .insert("bus".into(), EngineValue::StringName("Master".into()));
        }
        if is("Camera2D") {
            self.props
                .insert("zoom".into(), EngineValue::Vec2(Vec2::ONE));
        }
        if is("Camera3D") {
            self.props.insert("fov".into(), EngineValue::Float(75.0));
            self.props.insert("near".into(), EngineValue::Float(0.05));
            self.props.insert("far".into(), EngineValue::Float(4000.0));
            self.props
                .insert("projection".into(), EngineValue::Int(0));
        }
    }

    pub fn is_class(&self, ancestor: &str) -> bool {
        is_subclass_or_self(&self.class, ancestor)
    }

    /// All signals: class-derived plus script-declared.
    pub fn signal_defs(&self) -> Vec<(String, usize)> {
        let mut out: Vec<(String, usize)> = class_signals(&self.class)
            .into_iter()
            .map(|(n, c)| (n.to_string(), c))
            .collect();
        for (name, argc) in &self.extra_signals {
            if !out.iter().any(|(n, _)| n == name) {
                out.push((name.clone(), *argc));
            }
        }
        out
    }

    pub fn has_signal(&self, name: &str) -> bool {
        self.signal_defs().iter().any(|(n, _)| n == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_walks_to_node() {
        assert!(is_subclass_or_self("Button", "Control"));
        assert!(is_subclass_or_self("Button", "CanvasItem"));
        assert!(is_subclass_or_self("CharacterBody2D", "Node2D"));
        assert!(is_subclass_or_self("Area3D", "Node3D"));
        assert!(!is_subclass_or_self("Button", "Node2D"));
        assert!(is_subclass_or_self("Node", "Node"));
    }

    #[test]
    fn signals_are_inherited_and_deduped() {
        let sigs = class_signals("Button");
        assert!(sigs.iter().any(|(n, c)| *n == "pressed" && *c == 0));

        let area = class_signals("Area2D");
        assert!(area.iter().any(|(n, c)| *n == "body_entered" && *c == 1));
    }

    #[test]
    fn defaults_follow_the_class_chain() {
        let body = SimNode::new(InstanceId::new(1), "P", "CharacterBody2D");
        assert!(body.props.contains_key("position"));
        assert!(body.props.contains_key("velocity"));
        assert!(body.props.contains_key("visible"));

        let plain = SimNode::new(InstanceId::new(2), "N", "Node");
        assert!(!plain.props.contains_key("position"));
    }
}
