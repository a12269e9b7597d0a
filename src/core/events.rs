//! Event accumulator.
//!
//! Buffers everything significant that happens between client observations:
//! auto-subscribed engine signals, node lifecycle, watched-property changes
//! and scene transitions. Bounded FIFO with strictly monotonic ids for the
//! bridge lifetime.
//!
//! Subscriptions hold nodes only by instance id and are explicitly
//! disconnected on scene change and on [`EventAccumulator::stop`]; a stale
//! callback can therefore never fire against a freed target.

use std::collections::{HashMap, VecDeque};

use log::{debug, info};
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::BRIDGE_NODE_NAME;
use crate::engine::{Engine, InstanceId, SignalEmission, SubId, SubIdGen, TreeEvent};
use crate::serialize::to_json;

/// Signals subscribed automatically on every node whose class exposes them.
const AUTO_SIGNALS: &[(&str, &str)] = &[
    ("Area2D", "body_entered"),
    ("Area2D", "body_exited"),
    ("Area2D", "area_entered"),
    ("Area2D", "area_exited"),
    ("Area3D", "body_entered"),
    ("Area3D", "body_exited"),
    ("Area3D", "area_entered"),
    ("Area3D", "area_exited"),
    ("RigidBody2D", "body_entered"),
    ("RigidBody2D", "body_exited"),
    ("RigidBody3D", "body_entered"),
    ("RigidBody3D", "body_exited"),
    ("AnimationPlayer", "animation_finished"),
    ("AnimatedSprite2D", "animation_finished"),
    ("AnimatedSprite3D", "animation_finished"),
    ("AnimationTree", "animation_finished"),
    ("VisibleOnScreenNotifier2D", "screen_entered"),
    ("VisibleOnScreenNotifier2D", "screen_exited"),
    ("VisibleOnScreenNotifier3D", "screen_entered"),
    ("VisibleOnScreenNotifier3D", "screen_exited"),
    ("Timer", "timeout"),
    ("BaseButton", "pressed"),
    ("AudioStreamPlayer", "finished"),
    ("AudioStreamPlayer2D", "finished"),
    ("AudioStreamPlayer3D", "finished"),
    ("RigidBody2D", "sleeping_state_changed"),
    ("RigidBody3D", "sleeping_state_changed"),
    ("NavigationAgent2D", "target_reached"),
    ("NavigationAgent2D", "navigation_finished"),
    ("NavigationAgent3D", "target_reached"),
    ("NavigationAgent3D", "navigation_finished"),
];

/// How many tree-change timestamps `/scene_history` keeps.
const TREE_HISTORY_CAP: usize = 50;

/// One buffered event.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeEvent {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub time: f64,
    pub frame: u64,
    pub source: String,
    pub detail: Value,
}

/// A watched (node, property) pair with its last serialized value.
#[derive(Debug, Clone, Serialize)]
pub struct Watch {
    pub node_path: String,
    pub property: String,
    pub label: String,
    pub last_value: Value,
}

struct SubEntry {
    node: InstanceId,
    signal: String,
    arg_count: usize,
}

pub struct EventAccumulator {
    enabled: bool,
    next_event_id: u64,
    events: VecDeque<BridgeEvent>,
    cap: usize,
    subs: HashMap<SubId, SubEntry>,
    watches: Vec<Watch>,
    scene_baseline: String,
    tree_history: VecDeque<(f64, u64)>,
    /// Nodes added last tick, subscribed one frame later so they are fully
    /// installed before callbacks attach.
    pending_attach: Vec<InstanceId>,
}

impl EventAccumulator {
    pub fn new(cap: usize) -> Self {
        Self {
            enabled: false,
            next_event_id: 0,
            events: VecDeque::new(),
            cap,
            subs: HashMap::new(),
            watches: Vec::new(),
            scene_baseline: String::new(),
            tree_history: VecDeque::new(),
            pending_attach: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Subscribe to the current scene and record the scene-path baseline.
    pub fn start(&mut self, engine: &mut dyn Engine, ids: &mut SubIdGen) {
        if self.enabled {
            return;
        }
        self.enabled = true;
        self.scene_baseline = engine.scene_file();
        self.subscribe_tree(engine, ids);
        info!(
            "event accumulator started: {} signal subscription(s), scene '{}'",
            self.subs.len(),
            self.scene_baseline
        );
    }

    /// Disconnect every subscription. Must run before the accumulator is
    /// dropped, and again on scene change before resubscribing.
    pub fn stop(&mut self, engine: &mut dyn Engine) {
        for (sub, entry) in self.subs.drain() {
            engine.disconnect_signal(entry.node, &entry.signal, sub);
        }
        self.pending_attach.clear();
        self.enabled = false;
    }

    fn subscribe_tree(&mut self, engine: &mut dyn Engine, ids: &mut SubIdGen) {
        let Some(root) = engine.tree_root() else {
            return;
        };
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if Self::is_filtered(engine, id) {
                continue;
            }
            self.attach_node(engine, ids, id);
            stack.extend(engine.children(id));
        }
    }

    fn is_filtered(engine: &dyn Engine, id: InstanceId) -> bool {
        match engine.node_name(id) {
            Some(name) => name.starts_with('@') || name == BRIDGE_NODE_NAME,
            None => true,
        }
    }

    /// Install one callback per matching (node, signal) pair.
    fn attach_node(&mut self, engine: &mut dyn Engine, ids: &mut SubIdGen, id: InstanceId) {
        let signal_meta = engine.signals(id);
        for (class, signal) in AUTO_SIGNALS {
            if !engine.is_class(id, class) {
                continue;
            }
            let Some(meta) = signal_meta.iter().find(|s| s.name == *signal) else {
                continue;
            };
            // The same signal can match through several class rows.
            let already = self
                .subs
                .values()
                .any(|e| e.node == id && e.signal == *signal);
            if already {
                continue;
            }
            let sub = ids.next();
            if engine.connect_signal(id, signal, sub).is_ok() {
                self.subs.insert(
                    sub,
                    SubEntry {
                        node: id,
                        signal: signal.to_string(),
                        arg_count: meta.arg_count,
                    },
                );
            }
        }
    }

    /// Per-tick processing: deferred attaches, scene-change detection, tree
    /// events, signal emissions and watch polling.
    pub fn poll(
        &mut self,
        engine: &mut dyn Engine,
        ids: &mut SubIdGen,
        emissions: &[SignalEmission],
        tree_events: &[TreeEvent],
    ) {
        if !self.enabled {
            return;
        }

        // Scene change first: the spec promises the next event after a
        // change is `scene_changed`, so the removal flood of the old scene
        // never reaches the buffer.
        let current_scene = engine.scene_file();
        if current_scene != self.scene_baseline {
            let detail = json!({
                "from": self.scene_baseline,
                "to": current_scene,
            });
            let from = std::mem::replace(&mut self.scene_baseline, current_scene);
            debug!("scene changed: '{}' -> '{}'", from, self.scene_baseline);
            self.push(engine, "scene_changed", String::new(), detail);
            self.note_tree_change(engine);

            // Old subscriptions target freed nodes; disconnect and rebuild.
            for (sub, entry) in self.subs.drain().collect::<Vec<_>>() {
                engine.disconnect_signal(entry.node, &entry.signal, sub);
            }
            self.pending_attach.clear();
            self.subscribe_tree(engine, ids);
            self.poll_watches(engine);
            return;
        }

        // Nodes added on a previous tick are now fully installed.
        for id in std::mem::take(&mut self.pending_attach) {
            if engine.is_valid(id) && engine.is_in_tree(id) && !Self::is_filtered(engine, id) {
                self.attach_node(engine, ids, id);
            }
        }

        for event in tree_events {
            match event {
                TreeEvent::NodeAdded(id) => {
                    if Self::is_filtered(engine, *id) {
                        continue;
                    }
                    let path = engine.path_to(*id).unwrap_or_default();
                    let class = engine.class_name(*id).unwrap_or_default().to_string();
                    self.push(engine, "node_added", path, json!({"class": class}));
                    self.note_tree_change(engine);
                    self.pending_attach.push(*id);
                }
                TreeEvent::NodeRemoved { id, name, path } => {
                    if name.starts_with('@') || name == BRIDGE_NODE_NAME {
                        continue;
                    }
                    // Purge subscriptions that targeted the freed node.
                    let dead: Vec<SubId> = self
                        .subs
                        .iter()
                        .filter(|(_, e)| e.node == *id)
                        .map(|(s, _)| *s)
                        .collect();
                    for sub in dead {
                        self.subs.remove(&sub);
                    }
                    self.push(engine, "node_removed", path.clone(), json!({"name": name}));
                    self.note_tree_change(engine);
                }
            }
        }

        for emission in emissions {
            let (node, arg_count) = match self.subs.get(&emission.sub) {
                Some(entry) => (entry.node, entry.arg_count),
                None => continue,
            };
            let source = engine
                .path_to(node)
                .or_else(|| engine.node_name(node).map(|n| n.to_string()))
                .unwrap_or_default();
            let mut detail = serde_json::Map::new();
            detail.insert("signal".into(), json!(emission.signal));
            // One-arg signals carry a node; record its relative path and
            // drop any excess arguments.
            if arg_count >= 1 {
                if let Some(arg) = emission.args.first() {
                    match arg.as_object() {
                        Some(oid) => {
                            if let Some(path) = engine.path_to(oid) {
                                detail.insert("node".into(), json!(path));
                            }
                        }
                        None => {
                            detail.insert("arg".into(), to_json(arg));
                        }
                    }
                }
            }
            self.push(engine, "signal", source, Value::Object(detail));
        }

        self.poll_watches(engine);
    }

    fn poll_watches(&mut self, engine: &mut dyn Engine) {
        let Some(scene_root) = engine.scene_root() else {
            return;
        };
        let mut changes = Vec::new();
        for (idx, watch) in self.watches.iter().enumerate() {
            let Some(id) = engine.resolve_path(scene_root, &watch.node_path) else {
                continue;
            };
            let Some(value) = engine.get_property(id, &watch.property) else {
                continue;
            };
            let serialized = to_json(&value);
            if serialized != watch.last_value {
                changes.push((idx, watch.last_value.clone(), serialized));
            }
        }
        for (idx, old_value, new_value) in changes {
            let (path, label, property) = {
                let w = &self.watches[idx];
                (w.node_path.clone(), w.label.clone(), w.property.clone())
            };
            self.watches[idx].last_value = new_value.clone();
            self.push(
                engine,
                "property_changed",
                path,
                json!({
                    "label": label,
                    "property": property,
                    "old_value": old_value,
                    "new_value": new_value,
                }),
            );
        }
    }

    /// Register a watch. Membership is unique on (node_path, property); a
    /// duplicate registration refreshes the label and baseline value.
    pub fn add_watch(
        &mut self,
        engine: &mut dyn Engine,
        node_path: &str,
        property: &str,
        label: &str,
    ) -> Result<Watch, String> {
        let Some(scene_root) = engine.scene_root() else {
            return Err("No active scene".to_string());
        };
        let Some(id) = engine.resolve_path(scene_root, node_path) else {
            return Err(format!("Node not found: {}", node_path));
        };
        let Some(value) = engine.get_property(id, property) else {
            return Err(format!("Property not found: {}.{}", node_path, property));
        };

        let label = if label.is_empty() {
            format!("{}.{}", node_path, property)
        } else {
            label.to_string()
        };
        let watch = Watch {
            node_path: node_path.to_string(),
            property: property.to_string(),
            label,
            last_value: to_json(&value),
        };
        self.watches
            .retain(|w| !(w.node_path == node_path && w.property == property));
        self.watches.push(watch.clone());
        Ok(watch)
    }

    pub fn remove_watch(&mut self, node_path: &str, property: &str) -> bool {
        let before = self.watches.len();
        self.watches
            .retain(|w| !(w.node_path == node_path && w.property == property));
        self.watches.len() != before
    }

    pub fn watches(&self) -> &[Watch] {
        &self.watches
    }

    /// Return and clear the buffer.
    pub fn drain(&mut self) -> Vec<BridgeEvent> {
        self.events.drain(..).collect()
    }

    /// Read without clearing.
    pub fn peek(&self) -> Vec<BridgeEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.events.len()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Recent tree-change timestamps, oldest first.
    pub fn scene_history(&self) -> Vec<Value> {
        self.tree_history
            .iter()
            .map(|(time, frame)| json!({"time": time, "frame": frame}))
            .collect()
    }

    fn note_tree_change(&mut self, engine: &dyn Engine) {
        if self.tree_history.len() >= TREE_HISTORY_CAP {
            self.tree_history.pop_front();
        }
        self.tree_history
            .push_back((engine.engine_time(), engine.frame()));
    }

    fn push(&mut self, engine: &dyn Engine, kind: &str, source: String, detail: Value) {
        self.next_event_id += 1;
        if self.events.len() >= self.cap {
            self.events.pop_front();
        }
        self.events.push_back(BridgeEvent {
            id: self.next_event_id,
            kind: kind.to_string(),
            time: engine.engine_time(),
            frame: engine.frame(),
            source,
            detail,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimEngine;
    use crate::value::{EngineValue, ValueKind};

    fn scene_with_player() -> (SimEngine, InstanceId) {
        let mut sim = SimEngine::new("evt");
        sim.set_scene("Main", "res://main.tscn");
        let root = sim.scene_root().unwrap();
        let player = sim.add_child(root, "Player", "CharacterBody2D");
        sim.set_script_prop(player, "health", EngineValue::Int(100), ValueKind::Int);
        // Construction-time lifecycle noise is not under test.
        sim.drain_tree_events();
        (sim, player)
    }

    fn tick(acc: &mut EventAccumulator, sim: &mut SimEngine, ids: &mut SubIdGen) {
        let emissions = sim.drain_signals();
        let tree = sim.drain_tree_events();
        acc.poll(sim, ids, &emissions, &tree);
    }

    #[test]
    fn watch_emits_property_changed_with_old_and_new() {
        let (mut sim, player) = scene_with_player();
        let mut acc = EventAccumulator::new(200);
        let mut ids = SubIdGen::new();
        acc.start(&mut sim, &mut ids);

        acc.add_watch(&mut sim, "Player", "health", "health").unwrap();
        sim.set_prop(player, "health", EngineValue::Int(90));
        tick(&mut acc, &mut sim, &mut ids);

        let events = acc.drain();
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.kind, "property_changed");
        assert_eq!(e.source, "Player");
        assert_eq!(e.detail["label"], "health");
        assert_eq!(e.detail["old_value"], 100);
        assert_eq!(e.detail["new_value"], 90);
        assert_eq!(acc.count(), 0);
    }

    #[test]
    fn event_ids_are_strictly_monotonic() {
        let (mut sim, player) = scene_with_player();
        let mut acc = EventAccumulator::new(200);
        let mut ids = SubIdGen::new();
        acc.start(&mut sim, &mut ids);
        acc.add_watch(&mut sim, "Player", "health", "").unwrap();

        for hp in [90, 80, 70] {
            sim.set_prop(player, "health", EngineValue::Int(hp));
            tick(&mut acc, &mut sim, &mut ids);
        }
        let events = acc.drain();
        assert_eq!(events.len(), 3);
        assert!(events.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn buffer_caps_and_evicts_from_the_head() {
        let (mut sim, player) = scene_with_player();
        let mut acc = EventAccumulator::new(5);
        let mut ids = SubIdGen::new();
        acc.start(&mut sim, &mut ids);
        acc.add_watch(&mut sim, "Player", "health", "").unwrap();

        for hp in 0..10 {
            sim.set_prop(player, "health", EngineValue::Int(hp));
            tick(&mut acc, &mut sim, &mut ids);
        }
        let events = acc.drain();
        assert_eq!(events.len(), 5);
        // Oldest were discarded; ids keep climbing.
        assert!(events[0].id > 1);
    }

    #[test]
    fn auto_signal_records_source_and_node_arg() {
        let (mut sim, player) = scene_with_player();
        let root = sim.scene_root().unwrap();
        let area = sim.add_child(root, "Lava", "Area2D");
        sim.drain_tree_events();

        let mut acc = EventAccumulator::new(200);
        let mut ids = SubIdGen::new();
        acc.start(&mut sim, &mut ids);

        sim.emit_signal(area, "body_entered", &[EngineValue::Object(player)]);
        tick(&mut acc, &mut sim, &mut ids);

        let events = acc.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "signal");
        assert_eq!(events[0].source, "Lava");
        assert_eq!(events[0].detail["signal"], "body_entered");
        assert_eq!(events[0].detail["node"], "Player");
    }

    #[test]
    fn node_lifecycle_events_and_deferred_attach() {
        let (mut sim, _player) = scene_with_player();
        let root = sim.scene_root().unwrap();
        let mut acc = EventAccumulator::new(200);
        let mut ids = SubIdGen::new();
        acc.start(&mut sim, &mut ids);

        let timer = sim.add_child(root, "Spawned", "Timer");
        tick(&mut acc, &mut sim, &mut ids);
        // Deferred by one frame, then subscribed.
        tick(&mut acc, &mut sim, &mut ids);

        sim.emit_signal(timer, "timeout", &[]);
        tick(&mut acc, &mut sim, &mut ids);

        sim.remove_node(timer);
        tick(&mut acc, &mut sim, &mut ids);

        let kinds: Vec<String> = acc.drain().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec!["node_added", "signal", "node_removed"]);
    }

    #[test]
    fn scene_change_emits_first_and_resubscribes() {
        let (mut sim, _player) = scene_with_player();
        let mut acc = EventAccumulator::new(200);
        let mut ids = SubIdGen::new();
        acc.start(&mut sim, &mut ids);
        acc.clear();

        sim.change_scene("Level2", "res://level2.tscn");
        let l2root = sim.scene_root().unwrap();
        let timer = sim.add_child(l2root, "L2Timer", "Timer");
        tick(&mut acc, &mut sim, &mut ids);

        let events = acc.drain();
        assert_eq!(events[0].kind, "scene_changed");
        assert_eq!(events[0].detail["to"], "res://level2.tscn");

        // Subscriptions now live on the new scene.
        sim.emit_signal(timer, "timeout", &[]);
        tick(&mut acc, &mut sim, &mut ids);
        let events = acc.drain();
        assert!(events.iter().any(|e| e.kind == "signal" && e.source == "L2Timer"));
    }

    #[test]
    fn stop_disconnects_everything() {
        let (mut sim, _player) = scene_with_player();
        let root = sim.scene_root().unwrap();
        let timer = sim.add_child(root, "T", "Timer");
        sim.drain_tree_events();

        let mut acc = EventAccumulator::new(200);
        let mut ids = SubIdGen::new();
        acc.start(&mut sim, &mut ids);
        acc.stop(&mut sim);

        sim.emit_signal(timer, "timeout", &[]);
        assert!(sim.drain_signals().is_empty());
    }
}
