//! Scene-tree snapshots.
//!
//! One traversal produces an immutable, JSON-ready tree of node records with
//! stable refs. Traversal is bounded twice over (depth and node count) and
//! reports truncation explicitly instead of silently dropping nodes.

use serde::Serialize;
use serde_json::Value;

use crate::config::BRIDGE_NODE_NAME;
use crate::core::refs::RefMap;
use crate::engine::{Engine, InstanceId, Scene};
use crate::serialize::to_json;
use crate::value::EngineValue;

/// One node in a snapshot. Spatial fields are `null` (not absent) for
/// non-spatial nodes, so clients can rely on the shape.
#[derive(Debug, Clone, Serialize)]
pub struct NodeRecord {
    #[serde(rename = "ref")]
    pub node_ref: String,
    pub name: String,
    #[serde(rename = "type")]
    pub class: String,
    pub path: String,
    pub visible: bool,
    pub position: Option<Value>,
    pub global_position: Option<Value>,
    pub rotation: Option<Value>,
    pub scale: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub properties: serde_json::Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub scene_file: String,
    pub scene_name: String,
    pub viewport_size: [u32; 2],
    pub mouse_position: [f32; 2],
    pub frame: u64,
    pub fps: f32,
    pub time: f64,
    pub paused: bool,
    pub pending_events: usize,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated_at: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub nodes: Vec<NodeRecord>,
}

struct WalkState<'a> {
    refs: &'a mut RefMap,
    visited: usize,
    max_nodes: usize,
    truncated: bool,
}

/// Take a snapshot rooted at `root` (scene root when `None`).
///
/// `pending_events` is stitched in so a client sees at a glance that the
/// accumulator holds something worth draining.
pub fn take_snapshot(
    engine: &dyn Engine,
    refs: &mut RefMap,
    root: Option<InstanceId>,
    max_depth: u32,
    max_nodes: usize,
    pending_events: usize,
) -> Snapshot {
    refs.prune(engine);

    let mouse = engine.mouse_position();
    let (vw, vh) = engine.viewport_size();
    let mut state = WalkState {
        refs,
        visited: 0,
        max_nodes,
        truncated: false,
    };

    let mut nodes = Vec::new();
    if let Some(root) = root.or_else(|| engine.scene_root()) {
        if let Some(record) = walk(engine, root, 0, max_depth, &mut state) {
            nodes.push(record);
        }
    }

    Snapshot {
        scene_file: engine.scene_file(),
        scene_name: engine.scene_name(),
        viewport_size: [vw, vh],
        mouse_position: [mouse.x, mouse.y],
        frame: engine.frame(),
        fps: engine.fps(),
        time: engine.engine_time(),
        paused: engine.is_paused(),
        pending_events,
        truncated: state.truncated,
        truncated_at: state.truncated.then_some(state.visited),
        note: state
            .truncated
            .then(|| "node cap reached; use root= to focus the walk".to_string()),
        nodes,
    }
}

/// Depth-first pre-order walk. Engine-internal nodes (`@`-prefixed) and the
/// bridge's own node are skipped together with their subtrees.
fn walk<S: Scene + ?Sized>(
    scene: &S,
    id: InstanceId,
    depth: u32,
    max_depth: u32,
    state: &mut WalkState<'_>,
) -> Option<NodeRecord> {
    let name = scene.node_name(id)?.to_string();
    if name.starts_with('@') || name == BRIDGE_NODE_NAME {
        return None;
    }
    if state.visited >= state.max_nodes {
        state.truncated = true;
        return None;
    }
    state.visited += 1;

    let mut record = describe(scene, id, state.refs, &name);

    if depth < max_depth {
        for child in scene.children(id) {
            if state.visited >= state.max_nodes {
                state.truncated = true;
                break;
            }
            if let Some(child_record) = walk(scene, child, depth + 1, max_depth, state) {
                record.children.push(child_record);
            }
        }
    }
    Some(record)
}

/// Build the record for a single node.
fn describe<S: Scene + ?Sized>(
    scene: &S,
    id: InstanceId,
    refs: &mut RefMap,
    name: &str,
) -> NodeRecord {
    let class = scene.class_name(id).unwrap_or("Node").to_string();
    let node_ref = refs.ref_for(scene, id);

    let is_2d = scene.is_class(id, "Node2D");
    let is_3d = scene.is_class(id, "Node3D");
    let is_control = scene.is_class(id, "Control");

    let (position, rotation, scale) = if is_2d || is_3d {
        (
            scene.get_property(id, "position").map(|v| to_json(&v)),
            scene.get_property(id, "rotation").map(|v| to_json(&v)),
            scene.get_property(id, "scale").map(|v| to_json(&v)),
        )
    } else if is_control {
        (
            scene.get_property(id, "position").map(|v| to_json(&v)),
            None,
            None,
        )
    } else {
        (None, None, None)
    };

    let global_position = if is_2d || is_control {
        scene
            .global_position_2d(id)
            .map(|p| serde_json::json!([p.x, p.y]))
    } else if is_3d {
        scene
            .global_position_3d(id)
            .map(|p| serde_json::json!([p.x, p.y, p.z]))
    } else {
        None
    };

    let size = if is_control {
        scene.get_property(id, "size").map(|v| to_json(&v))
    } else {
        None
    };

    let text = node_text(scene, id);

    let groups = scene
        .groups(id)
        .into_iter()
        .filter(|g| !g.starts_with('_'))
        .collect();

    let mut properties = serde_json::Map::new();
    for info in scene.script_properties(id) {
        if !info.storage {
            continue;
        }
        if let Some(value) = scene.get_property(id, &info.name) {
            properties.insert(info.name, to_json(&value));
        }
    }

    NodeRecord {
        node_ref,
        name: name.to_string(),
        class,
        path: scene.path_to(id).unwrap_or_default(),
        visible: scene.is_visible_in_tree(id),
        position,
        global_position,
        rotation,
        scale,
        size,
        text,
        groups,
        properties,
        children: Vec::new(),
    }
}

/// Text for label/button/line-edit/text-edit/rich-text classes, or any node
/// that happens to expose a string `text` property.
pub fn node_text<S: Scene + ?Sized>(scene: &S, id: InstanceId) -> Option<String> {
    match scene.get_property(id, "text") {
        Some(EngineValue::Str(s)) => Some(s),
        _ => None,
    }
}

/// Total records in a snapshot tree.
pub fn count_nodes(nodes: &[NodeRecord]) -> usize {
    nodes
        .iter()
        .map(|n| 1 + count_nodes(&n.children))
        .sum()
}
