//! In-memory simulation engine.
//!
//! A complete [`Engine`] implementation over a synthetic scene tree: typed
//! nodes with class inheritance, script properties, signals, an input
//! journal, a painted framebuffer and a tickable clock with pause and time
//! scale. It backs the integration tests and the `simbridge` demo binary,
//! standing in for a real engine embedding.

pub mod demo;
pub mod scene;

use std::collections::{HashMap, VecDeque};

use glam::{Vec2, Vec3};
use image::{Rgba, RgbaImage};
use indexmap::IndexMap;

use crate::engine::input::InputEvent;
use crate::engine::{
    Engine, InstanceId, Projection, PropertyInfo, Scene, SignalEmission, SignalInfo, SubId,
    TreeEvent,
};
use crate::error::BridgeError;
use crate::value::{EngineValue, Rect2, ValueKind};
use scene::SimNode;

const LOG_CAP: usize = 500;

pub struct SimEngine {
    project: String,
    nodes: HashMap<InstanceId, SimNode>,
    next_id: u64,
    root: Option<InstanceId>,
    scene: Option<InstanceId>,
    scene_file: String,
    frame: u64,
    engine_clock: f64,
    wall_clock: f64,
    paused: bool,
    time_scale: f64,
    viewport: (u32, u32),
    mouse: Vec2,
    connections: HashMap<(InstanceId, String), Vec<SubId>>,
    signal_queue: Vec<SignalEmission>,
    tree_queue: Vec<TreeEvent>,
    actions: IndexMap<String, Vec<String>>,
    input_journal: Vec<InputEvent>,
    log_lines: VecDeque<String>,
    active_camera_3d: Option<InstanceId>,
}

impl SimEngine {
    pub fn new(project: &str) -> Self {
        let mut sim = Self {
            project: project.to_string(),
            nodes: HashMap::new(),
            next_id: 1000,
            root: None,
            scene: None,
            scene_file: String::new(),
            frame: 0,
            engine_clock: 0.0,
            wall_clock: 0.0,
            paused: false,
            time_scale: 1.0,
            viewport: (640, 360),
            mouse: Vec2::ZERO,
            connections: HashMap::new(),
            signal_queue: Vec::new(),
            tree_queue: Vec::new(),
            actions: IndexMap::new(),
            input_journal: Vec::new(),
            log_lines: VecDeque::new(),
            active_camera_3d: None,
        };
        let root = sim.create_node("root", "Viewport");
        sim.root = Some(root);
        sim
    }

    fn create_node(&mut self, name: &str, class: &str) -> InstanceId {
        self.next_id += 1;
        let id = InstanceId::new(self.next_id);
        self.nodes.insert(id, SimNode::new(id, name, class));
        id
    }

    /// Install a fresh current scene, discarding any previous one. Does not
    /// queue lifecycle events: a scene swap surfaces as a scene change, not
    /// as a removal flood.
    pub fn set_scene(&mut self, name: &str, file: &str) {
        if let Some(old) = self.scene.take() {
            self.discard_subtree(old);
        }
        let scene = self.create_node(name, "Node2D");
        let root = self.root.expect("sim always has a root");
        self.nodes.get_mut(&scene).unwrap().parent = Some(root);
        self.nodes.get_mut(&root).unwrap().children.push(scene);
        self.scene = Some(scene);
        self.scene_file = file.to_string();
        self.print(&format!("scene loaded: {}", file));
    }

    /// Swap scenes mid-run; the bridge notices through the file path.
    pub fn change_scene(&mut self, name: &str, file: &str) {
        self.set_scene(name, file);
    }

    fn discard_subtree(&mut self, id: InstanceId) {
        for child in self
            .nodes
            .get(&id)
            .map(|n| n.children.clone())
            .unwrap_or_default()
        {
            self.discard_subtree(child);
        }
        if let Some(node) = self.nodes.remove(&id) {
            if let Some(parent) = node.parent.and_then(|p| self.nodes.get_mut(&p)) {
                parent.children.retain(|c| *c != id);
            }
        }
        self.connections.retain(|(nid, _), _| *nid != id);
    }

    /// Create and attach a node; queues a `NodeAdded` lifecycle event.
    pub fn add_child(&mut self, parent: InstanceId, name: &str, class: &str) -> InstanceId {
        let id = self.create_node(name, class);
        self.nodes.get_mut(&id).unwrap().parent = Some(parent);
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.push(id);
        }
        self.tree_queue.push(TreeEvent::NodeAdded(id));
        id
    }

    /// Free a node and its subtree; queues `NodeRemoved` events.
    pub fn remove_node(&mut self, id: InstanceId) {
        for child in self
            .nodes
            .get(&id)
            .map(|n| n.children.clone())
            .unwrap_or_default()
        {
            self.remove_node(child);
        }
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let name = node.name.clone();
        let path = self.path_of(id).unwrap_or_else(|| name.clone());
        if let Some(node) = self.nodes.remove(&id) {
            if let Some(parent) = node.parent.and_then(|p| self.nodes.get_mut(&p)) {
                parent.children.retain(|c| *c != id);
            }
        }
        self.connections.retain(|(nid, _), _| *nid != id);
        if self.active_camera_3d == Some(id) {
            self.active_camera_3d = None;
        }
        self.tree_queue.push(TreeEvent::NodeRemoved { id, name, path });
    }

    /// Direct property write, creating the property if needed (sim-side
    /// scene construction; the engine-facing `set_property` refuses unknown
    /// names).
    pub fn set_prop(&mut self, id: InstanceId, name: &str, value: EngineValue) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.props.insert(name.to_string(), value);
        }
    }

    /// Declare a script property (storage-flagged) with an initial value.
    pub fn set_script_prop(
        &mut self,
        id: InstanceId,
        name: &str,
        value: EngineValue,
        kind: ValueKind,
    ) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.props.insert(name.to_string(), value);
            node.script_props.retain(|p| p.name != name);
            node.script_props.push(PropertyInfo {
                name: name.to_string(),
                kind,
                storage: true,
            });
        }
    }

    pub fn add_group(&mut self, id: InstanceId, group: &str) {
        if let Some(node) = self.nodes.get_mut(&id) {
            if !node.groups.iter().any(|g| g == group) {
                node.groups.push(group.to_string());
            }
        }
    }

    /// Declare a script signal on a node.
    pub fn add_signal(&mut self, id: InstanceId, name: &str, arg_count: usize) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.extra_signals.push((name.to_string(), arg_count));
        }
    }

    /// Fire a signal; queued emissions reach every connected subscriber on
    /// the next drain.
    pub fn emit_signal(&mut self, id: InstanceId, signal: &str, args: &[EngineValue]) {
        let subs = self
            .connections
            .get(&(id, signal.to_string()))
            .cloned()
            .unwrap_or_default();
        for sub in subs {
            self.signal_queue.push(SignalEmission {
                sub,
                source: id,
                signal: signal.to_string(),
                args: args.to_vec(),
            });
        }
    }

    pub fn set_action(&mut self, name: &str, bindings: &[&str]) {
        self.actions
            .insert(name.to_string(), bindings.iter().map(|s| s.to_string()).collect());
    }

    pub fn set_active_camera_3d(&mut self, camera: Option<InstanceId>) {
        self.active_camera_3d = camera;
    }

    pub fn set_viewport_size(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    pub fn injected_input(&self) -> &[InputEvent] {
        &self.input_journal
    }

    /// Append a line to the rolling engine log.
    pub fn print(&mut self, line: &str) {
        if self.log_lines.len() >= LOG_CAP {
            self.log_lines.pop_front();
        }
        self.log_lines.push_back(line.to_string());
    }

    /// Advance the simulation by `dt` wall seconds: clocks, timers and a
    /// small physics stub (velocity integration) so injected input has
    /// visible consequences.
    pub fn tick(&mut self, dt: f64) {
        self.wall_clock += dt;
        self.frame += 1;
        if self.paused {
            return;
        }
        let scaled = dt * self.time_scale;
        self.engine_clock += scaled;

        let ids: Vec<InstanceId> = self.nodes.keys().copied().collect();
        for id in ids {
            self.tick_node(id, scaled);
        }
    }

    fn tick_node(&mut self, id: InstanceId, dt: f64) {
        let (is_character, is_rigid, is_timer) = match self.node(id) {
            Some(n) => (
                n.is_class("CharacterBody2D"),
                n.is_class("RigidBody2D"),
                n.is_class("Timer"),
            ),
            None => return,
        };

        // Velocity integration for 2D bodies.
        if is_character || is_rigid {
            let vel_key = if is_rigid { "linear_velocity" } else { "velocity" };
            let velocity = self.get_property(id, vel_key).and_then(|v| v.as_vec2());
            if let Some(v) = velocity {
                if let Some(node) = self.nodes.get_mut(&id) {
                    if let Some(EngineValue::Vec2(pos)) = node.props.get_mut("position") {
                        *pos += v * dt as f32;
                    }
                }
            }
        }

        // Timer countdown.
        if is_timer {
            let stopped = self
                .get_property(id, "_stopped")
                .and_then(|v| v.as_bool())
                .unwrap_or(true);
            if stopped {
                return;
            }
            let left = self
                .get_property(id, "time_left")
                .and_then(|v| v.as_float())
                .unwrap_or(0.0);
            let next = left - dt;
            if next > 0.0 {
                self.set_prop(id, "time_left", EngineValue::Float(next));
                return;
            }
            let one_shot = self
                .get_property(id, "one_shot")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let wait = self
                .get_property(id, "wait_time")
                .and_then(|v| v.as_float())
                .unwrap_or(1.0);
            if one_shot {
                self.set_prop(id, "time_left", EngineValue::Float(0.0));
                self.set_prop(id, "_stopped", EngineValue::Bool(true));
            } else {
                self.set_prop(id, "time_left", EngineValue::Float(wait));
            }
            self.emit_signal(id, "timeout", &[]);
        }
    }

    // --- internals --------------------------------------------------------

    fn node(&self, id: InstanceId) -> Option<&SimNode> {
        self.nodes.get(&id)
    }

    fn attached(&self, id: InstanceId) -> bool {
        let mut current = Some(id);
        while let Some(c) = current {
            if Some(c) == self.root {
                return true;
            }
            current = self.node(c).and_then(|n| n.parent);
        }
        false
    }

    fn path_of(&self, id: InstanceId) -> Option<String> {
        if !self.attached(id) {
            return None;
        }
        if Some(id) == self.scene {
            return Some(".".to_string());
        }
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(c) = current {
            if Some(c) == self.scene {
                segments.reverse();
                return Some(segments.join("/"));
            }
            if Some(c) == self.root {
                // Not under the scene root (autoload); absolute form.
                segments.reverse();
                return Some(format!("/root/{}", segments.join("/")));
            }
            segments.push(self.node(c)?.name.clone());
            current = self.node(c).and_then(|n| n.parent);
        }
        None
    }

    fn lookup_path(&self, root: InstanceId, path: &str) -> Option<InstanceId> {
        let (mut current, rest) = if let Some(stripped) = path.strip_prefix("/root") {
            (self.root?, stripped.trim_start_matches('/'))
        } else {
            (root, path)
        };
        for segment in rest.split('/') {
            match segment {
                "" | "." => continue,
                ".." => current = self.node(current)?.parent?,
                name => {
                    let children = &self.node(current)?.children;
                    current = *children
                        .iter()
                        .find(|c| self.node(**c).map(|n| n.name == name).unwrap_or(false))?;
                }
            }
        }
        Some(current)
    }

    /// Global 2D position: the sum of local positions up the chain.
    fn accumulated_position(&self, id: InstanceId) -> Vec2 {
        let mut total = Vec2::ZERO;
        let mut current = Some(id);
        while let Some(c) = current {
            if let Some(node) = self.node(c) {
                if let Some(EngineValue::Vec2(p)) = node.props.get("position") {
                    total += *p;
                }
                current = node.parent;
            } else {
                break;
            }
        }
        total
    }

    fn update_input_probe(&mut self, event: &InputEvent) {
        let Some(scene) = self.scene else {
            return;
        };
        let Some(probe) = self.lookup_path(scene, "InputProbe") else {
            return;
        };
        let summary = event.summary();
        if let Some(node) = self.nodes.get_mut(&probe) {
            let count = node
                .props
                .get("count")
                .and_then(|v| v.as_int())
                .unwrap_or(0);
            node.props.insert("count".into(), EngineValue::Int(count + 1));
            node.props
                .insert("last".into(), EngineValue::Str(summary.clone()));
            if let Some(EngineValue::StrArray(history)) = node.props.get_mut("history") {
                history.push(summary);
                if history.len() > 64 {
                    history.remove(0);
                }
            }
        }
    }
}

impl Scene for SimEngine {
    fn tree_root(&self) -> Option<InstanceId> {
        self.root
    }

    fn scene_root(&self) -> Option<InstanceId> {
        self.scene
    }

    fn is_valid(&self, id: InstanceId) -> bool {
        self.nodes.contains_key(&id)
    }

    fn is_in_tree(&self, id: InstanceId) -> bool {
        self.attached(id)
    }

    fn node_name(&self, id: InstanceId) -> Option<&str> {
        self.node(id).map(|n| n.name.as_str())
    }

    fn class_name(&self, id: InstanceId) -> Option<&str> {
        self.node(id).map(|n| n.class.as_str())
    }

    fn is_class(&self, id: InstanceId, class: &str) -> bool {
        self.node(id).map(|n| n.is_class(class)).unwrap_or(false)
    }

    fn parent(&self, id: InstanceId) -> Option<InstanceId> {
        self.node(id).and_then(|n| n.parent)
    }

    fn children(&self, id: InstanceId) -> Vec<InstanceId> {
        self.node(id).map(|n| n.children.clone()).unwrap_or_default()
    }

    fn path_to(&self, id: InstanceId) -> Option<String> {
        self.path_of(id)
    }

    fn resolve_path(&self, root: InstanceId, path: &str) -> Option<InstanceId> {
        self.lookup_path(root, path)
    }

    fn get_property(&self, id: InstanceId, name: &str) -> Option<EngineValue> {
        self.node(id).and_then(|n| n.props.get(name)).cloned()
    }

    fn set_property(
        &mut self,
        id: InstanceId,
        name: &str,
        value: EngineValue,
    ) -> Result<(), BridgeError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| BridgeError::NodeNotFound(id.to_string()))?;
        if !node.props.contains_key(name) {
            return Err(BridgeError::capability(node.class.clone(), "property", name));
        }
        node.props.insert(name.to_string(), value);
        Ok(())
    }

    fn property_kind(&self, id: InstanceId, name: &str) -> Option<ValueKind> {
        self.node(id)
            .and_then(|n| n.props.get(name))
            .map(|v| v.kind())
    }

    fn has_method(&self, id: InstanceId, name: &str) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        match name {
            "emit_signal" | "queue_free" | "change_scene_to_file" => true,
            "take_damage" | "heal" => node.props.contains_key("health"),
            "start" | "stop" if node.is_class("Timer") => true,
            "is_stopped" => node.is_class("Timer"),
            "is_on_floor" | "is_on_wall" | "is_on_ceiling" | "get_slide_collision_count"
            | "get_slide_collision" => {
                node.is_class("CharacterBody2D") || node.is_class("CharacterBody3D")
            }
            "get_overlapping_bodies" | "get_overlapping_areas" => {
                node.is_class("Area2D") || node.is_class("Area3D")
            }
            "is_playing" | "play" | "stop" => node.props.contains_key("playing"),
            "is_current" => node.is_class("Camera2D") || node.is_class("Camera3D"),
            _ => false,
        }
    }

    fn call_method(
        &mut self,
        id: InstanceId,
        name: &str,
        args: &[EngineValue],
    ) -> Result<EngineValue, BridgeError> {
        if !self.nodes.contains_key(&id) {
            return Err(BridgeError::NodeNotFound(id.to_string()));
        }
        if !self.has_method(id, name) {
            let class = self.class_name(id).unwrap_or("Node").to_string();
            return Err(BridgeError::capability(class, "method", name));
        }
        match name {
            "emit_signal" => {
                let signal = args
                    .first()
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| BridgeError::Engine("emit_signal needs a name".into()))?
                    .to_string();
                self.emit_signal(id, &signal, &args[1..]);
                Ok(EngineValue::Nil)
            }
            "queue_free" => {
                self.remove_node(id);
                Ok(EngineValue::Nil)
            }
            "change_scene_to_file" => {
                let file = args
                    .first()
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| BridgeError::Engine("change_scene_to_file needs a path".into()))?
                    .to_string();
                let stem = file
                    .rsplit('/')
                    .next()
                    .unwrap_or(&file)
                    .trim_end_matches(".tscn")
                    .to_string();
                self.change_scene(&stem, &file);
                Ok(EngineValue::Nil)
            }
            "take_damage" | "heal" => {
                let amount = args.first().and_then(|v| v.as_float()).unwrap_or(0.0);
                let delta = if name == "heal" { amount } else { -amount };
                let node = self.nodes.get_mut(&id).unwrap();
                let next = match node.props.get("health") {
                    Some(EngineValue::Int(h)) => EngineValue::Int(h + delta as i64),
                    Some(EngineValue::Float(h)) => EngineValue::Float(h + delta),
                    _ => return Err(BridgeError::Engine("no health property".into())),
                };
                node.props.insert("health".into(), next.clone());
                Ok(next)
            }
            "start" => {
                let node = self.nodes.get_mut(&id).unwrap();
                let wait = args
                    .first()
                    .and_then(|v| v.as_float())
                    .or_else(|| node.props.get("wait_time").and_then(|v| v.as_float()))
                    .unwrap_or(1.0);
                node.props.insert("wait_time".into(), EngineValue::Float(wait));
                node.props.insert("time_left".into(), EngineValue::Float(wait));
                node.props.insert("_stopped".into(), EngineValue::Bool(false));
                Ok(EngineValue::Nil)
            }
            "stop" if self.is_class(id, "Timer") => {
                let node = self.nodes.get_mut(&id).unwrap();
                node.props.insert("_stopped".into(), EngineValue::Bool(true));
                Ok(EngineValue::Nil)
            }
            "is_stopped" => Ok(EngineValue::Bool(
                self.get_property(id, "_stopped")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true),
            )),
            "is_on_floor" | "is_on_wall" | "is_on_ceiling" => {
                let key = format!("_on_{}", &name[6..]);
                Ok(EngineValue::Bool(
                    self.get_property(id, &key)
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false),
                ))
            }
            "get_slide_collision_count" => {
                let count = match self.get_property(id, "slide_collisions") {
                    Some(EngineValue::List(items)) => items.len() as i64,
                    _ => 0,
                };
                Ok(EngineValue::Int(count))
            }
            "get_slide_collision" => {
                let index = args.first().and_then(|v| v.as_int()).unwrap_or(0) as usize;
                match self.get_property(id, "slide_collisions") {
                    Some(EngineValue::List(items)) if index < items.len() => {
                        Ok(items[index].clone())
                    }
                    _ => Err(BridgeError::Engine("slide collision out of range".into())),
                }
            }
            "get_overlapping_bodies" => Ok(self
                .get_property(id, "_overlapping_bodies")
                .unwrap_or(EngineValue::List(Vec::new()))),
            "get_overlapping_areas" => Ok(self
                .get_property(id, "_overlapping_areas")
                .unwrap_or(EngineValue::List(Vec::new()))),
            "is_playing" => Ok(EngineValue::Bool(
                self.get_property(id, "playing")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
            )),
            "play" => {
                if let Some(anim) = args.first().and_then(|v| v.as_str()).map(String::from) {
                    self.set_prop(id, "current_animation", EngineValue::Str(anim));
                }
                self.set_prop(id, "playing", EngineValue::Bool(true));
                Ok(EngineValue::Nil)
            }
            "stop" => {
                self.set_prop(id, "playing", EngineValue::Bool(false));
                Ok(EngineValue::Nil)
            }
            "is_current" => Ok(EngineValue::Bool(self.active_camera_3d == Some(id))),
            other => {
                let class = self.class_name(id).unwrap_or("Node").to_string();
                Err(BridgeError::capability(class, "method", other))
            }
        }
    }

    fn script_properties(&self, id: InstanceId) -> Vec<PropertyInfo> {
        self.node(id).map(|n| n.script_props.clone()).unwrap_or_default()
    }

    fn groups(&self, id: InstanceId) -> Vec<String> {
        self.node(id).map(|n| n.groups.clone()).unwrap_or_default()
    }

    fn signals(&self, id: InstanceId) -> Vec<SignalInfo> {
        let Some(node) = self.node(id) else {
            return Vec::new();
        };
        node.signal_defs()
            .into_iter()
            .map(|(name, arg_count)| {
                let connection_count = self
                    .connections
                    .get(&(id, name.clone()))
                    .map(|subs| subs.len())
                    .unwrap_or(0);
                SignalInfo {
                    name,
                    arg_count,
                    connection_count,
                }
            })
            .collect()
    }

    fn has_signal(&self, id: InstanceId, name: &str) -> bool {
        self.node(id).map(|n| n.has_signal(name)).unwrap_or(false)
    }

    fn connect_signal(
        &mut self,
        id: InstanceId,
        signal: &str,
        sub: SubId,
    ) -> Result<(), BridgeError> {
        if !self.has_signal(id, signal) {
            let class = self.class_name(id).unwrap_or("Node").to_string();
            return Err(BridgeError::capability(class, "signal", signal));
        }
        self.connections
            .entry((id, signal.to_string()))
            .or_default()
            .push(sub);
        Ok(())
    }

    fn disconnect_signal(&mut self, id: InstanceId, signal: &str, sub: SubId) {
        if let Some(subs) = self.connections.get_mut(&(id, signal.to_string())) {
            subs.retain(|s| *s != sub);
            if subs.is_empty() {
                self.connections.remove(&(id, signal.to_string()));
            }
        }
    }

    fn drain_signals(&mut self) -> Vec<SignalEmission> {
        std::mem::take(&mut self.signal_queue)
    }

    fn drain_tree_events(&mut self) -> Vec<TreeEvent> {
        std::mem::take(&mut self.tree_queue)
    }

    fn global_rect(&self, id: InstanceId) -> Option<Rect2> {
        if !self.is_class(id, "Control") {
            return None;
        }
        let position = self.accumulated_position(id);
        let size = self
            .get_property(id, "size")
            .and_then(|v| v.as_vec2())
            .unwrap_or(Vec2::ZERO);
        Some(Rect2 { position, size })
    }

    fn global_position_2d(&self, id: InstanceId) -> Option<Vec2> {
        if self.is_class(id, "Node2D") || self.is_class(id, "Control") {
            Some(self.accumulated_position(id))
        } else {
            None
        }
    }

    fn global_position_3d(&self, id: InstanceId) -> Option<Vec3> {
        if !self.is_class(id, "Node3D") {
            return None;
        }
        let mut total = Vec3::ZERO;
        let mut current = Some(id);
        while let Some(c) = current {
            let node = self.node(c)?;
            if let Some(EngineValue::Vec3(p)) = node.props.get("position") {
                total += *p;
            }
            current = node.parent;
        }
        Some(total)
    }

    fn project_to_screen(&self, id: InstanceId) -> Projection {
        let Some(point) = self.global_position_3d(id) else {
            return Projection::NotSpatial;
        };
        let Some(camera) = self.active_camera_3d else {
            return Projection::NoCamera;
        };
        let cam_pos = self.global_position_3d(camera).unwrap_or(Vec3::ZERO);
        let rel = point - cam_pos;
        if rel.z <= 0.01 {
            return Projection::Behind;
        }
        let (vw, vh) = self.viewport;
        let center = Vec2::new(vw as f32 / 2.0, vh as f32 / 2.0);
        let scale = 300.0 / rel.z;
        Projection::OnScreen(center + Vec2::new(rel.x * scale, -rel.y * scale))
    }

    fn is_visible_in_tree(&self, id: InstanceId) -> bool {
        let mut current = Some(id);
        while let Some(c) = current {
            let Some(node) = self.node(c) else {
                return false;
            };
            if let Some(EngineValue::Bool(false)) = node.props.get("visible") {
                return false;
            }
            current = node.parent;
        }
        true
    }
}

impl Engine for SimEngine {
    fn frame(&self) -> u64 {
        self.frame
    }

    fn fps(&self) -> f32 {
        60.0
    }

    fn engine_time(&self) -> f64 {
        self.engine_clock
    }

    fn wall_time(&self) -> f64 {
        self.wall_clock
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    fn time_scale(&self) -> f64 {
        self.time_scale
    }

    fn set_time_scale(&mut self, scale: f64) {
        self.time_scale = scale;
    }

    fn viewport_size(&self) -> (u32, u32) {
        self.viewport
    }

    fn mouse_position(&self) -> Vec2 {
        self.mouse
    }

    fn scene_file(&self) -> String {
        self.scene_file.clone()
    }

    fn scene_name(&self) -> String {
        self.scene
            .and_then(|s| self.node(s))
            .map(|n| n.name.clone())
            .unwrap_or_default()
    }

    fn project_name(&self) -> String {
        self.project.clone()
    }

    fn dispatch_input(&mut self, event: InputEvent) {
        match &event {
            InputEvent::MouseMotion { position, .. } => self.mouse = *position,
            InputEvent::MouseButton { position, .. } => self.mouse = *position,
            _ => {}
        }
        self.update_input_probe(&event);
        self.input_journal.push(event);
    }

    fn action_names(&self) -> Vec<String> {
        self.actions.keys().cloned().collect()
    }

    fn has_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    fn action_bindings(&self, name: &str) -> Vec<String> {
        self.actions.get(name).cloned().unwrap_or_default()
    }

    fn capture_viewport(&self) -> Option<RgbaImage> {
        let (w, h) = self.viewport;
        let mut image = RgbaImage::from_fn(w, h, |x, y| {
            let r = (x * 255 / w.max(1)) as u8;
            let b = (y * 255 / h.max(1)) as u8;
            Rgba([r / 2, 40, b / 2, 255])
        });
        // Paint visible 2D nodes so captures carry scene structure.
        for node in self.nodes.values() {
            if !node.is_class("Node2D") || !self.attached(node.id) || !self.is_visible_in_tree(node.id)
            {
                continue;
            }
            let pos = self.accumulated_position(node.id);
            let seed = node.id.get();
            let color = Rgba([
                160 + (seed % 96) as u8,
                100 + (seed % 156) as u8,
                80 + (seed % 176) as u8,
                255,
            ]);
            for dy in 0..12i32 {
                for dx in 0..12i32 {
                    let px = pos.x as i32 + dx - 6;
                    let py = pos.y as i32 + dy - 6;
                    if px >= 0 && py >= 0 && (px as u32) < w && (py as u32) < h {
                        image.put_pixel(px as u32, py as u32, color);
                    }
                }
            }
        }
        Some(image)
    }

    fn log_tail(&self, max_bytes: usize) -> Option<String> {
        let mut lines: Vec<&str> = Vec::new();
        let mut total = 0;
        for line in self.log_lines.iter().rev() {
            total += line.len() + 1;
            if total > max_bytes {
                break;
            }
            lines.push(line);
        }
        lines.reverse();
        Some(lines.join("\n"))
    }
}

// Inherent mirrors of the trait accessors used pervasively in tests, so
// callers need no trait import for the common cases.
impl SimEngine {
    pub fn scene_root(&self) -> Option<InstanceId> {
        self.scene
    }

    pub fn tree_root(&self) -> Option<InstanceId> {
        self.root
    }

    pub fn resolve_path(&self, root: InstanceId, path: &str) -> Option<InstanceId> {
        self.lookup_path(root, path)
    }

    pub fn drain_signals(&mut self) -> Vec<SignalEmission> {
        std::mem::take(&mut self.signal_queue)
    }

    pub fn drain_tree_events(&mut self) -> Vec<TreeEvent> {
        std::mem::take(&mut self.tree_queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_round_trip() {
        let mut sim = SimEngine::new("t");
        sim.set_scene("Main", "res://main.tscn");
        let root = sim.scene_root().unwrap();
        let hud = sim.add_child(root, "HUD", "Control");
        let label = sim.add_child(hud, "Score", "Label");

        let path = Scene::path_to(&sim, label).unwrap();
        assert_eq!(path, "HUD/Score");
        assert_eq!(sim.resolve_path(root, &path), Some(label));
        assert_eq!(Scene::path_to(&sim, root).unwrap(), ".");
    }

    #[test]
    fn autoloads_get_absolute_paths() {
        let mut sim = SimEngine::new("t");
        sim.set_scene("Main", "res://main.tscn");
        let tree_root = sim.tree_root().unwrap();
        let autoload = sim.add_child(tree_root, "GameState", "Node");

        let path = Scene::path_to(&sim, autoload).unwrap();
        assert_eq!(path, "/root/GameState");
        let scene = sim.scene_root().unwrap();
        assert_eq!(sim.resolve_path(scene, &path), Some(autoload));
    }

    #[test]
    fn pause_freezes_engine_clock_but_not_frames() {
        let mut sim = SimEngine::new("t");
        sim.set_scene("Main", "res://main.tscn");
        sim.tick(0.1);
        assert!(sim.engine_time() > 0.0);
        let t = sim.engine_time();
        let f = sim.frame();

        Engine::set_paused(&mut sim, true);
        sim.tick(0.1);
        assert_eq!(sim.engine_time(), t);
        assert_eq!(sim.frame(), f + 1);
        assert!(sim.wall_time() > 0.1);
    }

    #[test]
    fn time_scale_stretches_the_clock() {
        let mut sim = SimEngine::new("t");
        sim.set_scene("Main", "res://main.tscn");
        Engine::set_time_scale(&mut sim, 2.0);
        sim.tick(0.5);
        assert!((sim.engine_time() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn velocity_integration_moves_bodies() {
        let mut sim = SimEngine::new("t");
        sim.set_scene("Main", "res://main.tscn");
        let root = sim.scene_root().unwrap();
        let body = sim.add_child(root, "P", "CharacterBody2D");
        sim.set_prop(body, "velocity", EngineValue::Vec2(Vec2::new(100.0, 0.0)));
        sim.tick(0.5);
        let pos = sim.get_property(body, "position").unwrap().as_vec2().unwrap();
        assert!((pos.x - 50.0).abs() < 1e-3);
    }

    #[test]
    fn timer_fires_and_reloads() {
        let mut sim = SimEngine::new("t");
        sim.set_scene("Main", "res://main.tscn");
        let root = sim.scene_root().unwrap();
        let timer = sim.add_child(root, "T", "Timer");
        let probe = SubId(99);
        sim.connect_signal(timer, "timeout", probe).unwrap();
        sim.call_method(timer, "start", &[EngineValue::Float(0.2)])
            .unwrap();

        sim.tick(0.25);
        let fired = sim.drain_signals();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].signal, "timeout");
        // Repeating timer reloads.
        let left = sim.get_property(timer, "time_left").unwrap().as_float().unwrap();
        assert!(left > 0.0);
    }

    #[test]
    fn set_property_rejects_unknown_names() {
        let mut sim = SimEngine::new("t");
        sim.set_scene("Main", "res://main.tscn");
        let root = sim.scene_root().unwrap();
        let node = sim.add_child(root, "N", "Node2D");
        assert!(Scene::set_property(&mut sim, node, "position", EngineValue::Vec2(Vec2::ONE)).is_ok());
        assert!(Scene::set_property(&mut sim, node, "nonsense", EngineValue::Int(1)).is_err());
    }

    #[test]
    fn projection_needs_a_camera() {
        let mut sim = SimEngine::new("t");
        sim.set_scene("Main", "res://main.tscn");
        let root = sim.scene_root().unwrap();
        let crate_node = sim.add_child(root, "Crate", "Node3D");
        sim.set_prop(crate_node, "position", EngineValue::Vec3(Vec3::new(0.0, 0.0, 10.0)));

        assert_eq!(sim.project_to_screen(crate_node), Projection::NoCamera);

        let camera = sim.add_child(root, "Cam", "Camera3D");
        sim.set_active_camera_3d(Some(camera));
        assert!(matches!(
            sim.project_to_screen(crate_node),
            Projection::OnScreen(_)
        ));

        sim.set_prop(crate_node, "position", EngineValue::Vec3(Vec3::new(0.0, 0.0, -5.0)));
        assert_eq!(sim.project_to_screen(crate_node), Projection::Behind);
    }
}
