//! Thin contract over the embedding engine.
//!
//! The bridge never owns scene nodes. Everything is addressed by
//! [`InstanceId`] — the engine's stable per-object identifier — and every
//! access re-validates the id, so a freed node degrades to `None`/`Err`
//! instead of a dangling reference.
//!
//! The engine side of the contract also owns all file I/O (log tailing) and
//! rendering (viewport capture); the bridge consumes results only.

pub mod input;

use std::fmt;

use image::RgbaImage;

use crate::error::BridgeError;
use crate::value::{EngineValue, Rect2, ValueKind};
use glam::{Vec2, Vec3};
use input::InputEvent;

/// Engine-assigned object identifier, unique for the engine's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle for a signal subscription, used to disconnect the exact connection
/// that was made. Allocated by the bridge, opaque to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubId(pub u64);

/// Allocator for [`SubId`]s. One instance per bridge, shared by every
/// subscriber (accumulator, signal waiters) so handles never collide.
#[derive(Debug, Default)]
pub struct SubIdGen {
    next: u64,
}

impl SubIdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> SubId {
        self.next += 1;
        SubId(self.next)
    }
}

/// One signal firing, delivered on the next drain after emission.
#[derive(Debug, Clone)]
pub struct SignalEmission {
    pub sub: SubId,
    pub source: InstanceId,
    pub signal: String,
    pub args: Vec<EngineValue>,
}

/// Scene-tree lifecycle notification.
#[derive(Debug, Clone)]
pub enum TreeEvent {
    NodeAdded(InstanceId),
    /// Removal carries the last known name and path; the id is already dead.
    NodeRemoved {
        id: InstanceId,
        name: String,
        path: String,
    },
}

/// Signal metadata as reported by the node's class.
#[derive(Debug, Clone)]
pub struct SignalInfo {
    pub name: String,
    pub arg_count: usize,
    pub connection_count: usize,
}

/// Script property metadata. Only `storage`-flagged properties appear in
/// snapshots (exported / persistent variables).
#[derive(Debug, Clone)]
pub struct PropertyInfo {
    pub name: String,
    pub kind: ValueKind,
    pub storage: bool,
}

/// Result of projecting a node onto the screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    OnScreen(Vec2),
    /// 3D point behind the active camera.
    Behind,
    /// No active 3D camera to project with.
    NoCamera,
    /// The node has no spatial position at all.
    NotSpatial,
}

/// Read/write access to the live scene tree.
pub trait Scene {
    /// Absolute root of the whole tree (autoloads hang off this).
    fn tree_root(&self) -> Option<InstanceId>;
    /// Root of the currently running scene.
    fn scene_root(&self) -> Option<InstanceId>;
    /// Whether the id still refers to a live object.
    fn is_valid(&self, id: InstanceId) -> bool;
    /// Whether the node is currently attached to the tree.
    fn is_in_tree(&self, id: InstanceId) -> bool;

    fn node_name(&self, id: InstanceId) -> Option<&str>;
    fn class_name(&self, id: InstanceId) -> Option<&str>;
    /// Inheritance-aware class test (`is_class(button, "Control")` is true).
    fn is_class(&self, id: InstanceId, class: &str) -> bool;

    fn parent(&self, id: InstanceId) -> Option<InstanceId>;
    fn children(&self, id: InstanceId) -> Vec<InstanceId>;
    /// Path relative to the scene root, e.g. `Level/Player/Sprite`.
    fn path_to(&self, id: InstanceId) -> Option<String>;
    /// Resolve a `/`-separated path downward from `root`.
    fn resolve_path(&self, root: InstanceId, path: &str) -> Option<InstanceId>;

    fn get_property(&self, id: InstanceId, name: &str) -> Option<EngineValue>;
    fn set_property(
        &mut self,
        id: InstanceId,
        name: &str,
        value: EngineValue,
    ) -> Result<(), BridgeError>;
    /// Declared kind of a property, for typed deserialization.
    fn property_kind(&self, id: InstanceId, name: &str) -> Option<ValueKind>;
    fn has_method(&self, id: InstanceId, name: &str) -> bool;
    fn call_method(
        &mut self,
        id: InstanceId,
        name: &str,
        args: &[EngineValue],
    ) -> Result<EngineValue, BridgeError>;

    /// Script-declared properties with their storage flags.
    fn script_properties(&self, id: InstanceId) -> Vec<PropertyInfo>;
    fn groups(&self, id: InstanceId) -> Vec<String>;
    fn signals(&self, id: InstanceId) -> Vec<SignalInfo>;
    fn has_signal(&self, id: InstanceId, name: &str) -> bool;

    // --- Signal plumbing ---

    /// Connect `sub` to a signal. Emissions surface via [`Scene::drain_signals`].
    fn connect_signal(
        &mut self,
        id: InstanceId,
        signal: &str,
        sub: SubId,
    ) -> Result<(), BridgeError>;
    /// Disconnect; unknown handles are ignored.
    fn disconnect_signal(&mut self, id: InstanceId, signal: &str, sub: SubId);
    /// Emissions since the previous drain, in emission order.
    fn drain_signals(&mut self) -> Vec<SignalEmission>;
    /// Tree lifecycle events since the previous drain.
    fn drain_tree_events(&mut self) -> Vec<TreeEvent>;

    // --- Geometry ---

    /// Global screen rect, UI nodes only.
    fn global_rect(&self, id: InstanceId) -> Option<Rect2>;
    /// Global 2D position, 2D nodes only.
    fn global_position_2d(&self, id: InstanceId) -> Option<Vec2>;
    /// Global 3D position, 3D nodes only.
    fn global_position_3d(&self, id: InstanceId) -> Option<Vec3>;
    /// Project a node onto the screen through the active camera set.
    fn project_to_screen(&self, id: InstanceId) -> Projection;
    /// Node is visible, and so is every ancestor.
    fn is_visible_in_tree(&self, id: InstanceId) -> bool;
}

/// Full engine surface the runtime bridge consumes.
pub trait Engine: Scene {
    /// Rendered frame counter.
    fn frame(&self) -> u64;
    fn fps(&self) -> f32;
    /// Seconds on the engine clock. Scales with time scale, frozen while
    /// paused — waits measured against it intentionally stall during pause.
    fn engine_time(&self) -> f64;
    /// Seconds since engine start on the wall clock.
    fn wall_time(&self) -> f64;

    fn is_paused(&self) -> bool;
    fn set_paused(&mut self, paused: bool);
    fn time_scale(&self) -> f64;
    fn set_time_scale(&mut self, scale: f64);

    fn viewport_size(&self) -> (u32, u32);
    fn mouse_position(&self) -> Vec2;

    fn scene_file(&self) -> String;
    fn scene_name(&self) -> String;
    fn project_name(&self) -> String;

    /// Feed a synthesized event through the engine's raw-input dispatch.
    fn dispatch_input(&mut self, event: InputEvent);
    /// Names of mapped input actions.
    fn action_names(&self) -> Vec<String>;
    fn has_action(&self, name: &str) -> bool;
    /// Human-readable binding descriptions for one action.
    fn action_bindings(&self, name: &str) -> Vec<String>;

    /// Current viewport texture; `None` when no frame has been presented.
    fn capture_viewport(&self) -> Option<RgbaImage>;

    /// Tail of the engine's rolling log file.
    fn log_tail(&self, max_bytes: usize) -> Option<String>;
}
