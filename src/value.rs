//! Engine-native value type shared across the bridge.
//!
//! Every property read, method argument, signal argument and watch value
//! travels through [`EngineValue`]. The JSON mapping lives in
//! [`crate::serialize`].

use glam::{Mat3, Quat, Vec2, Vec3, Vec4};

use crate::engine::InstanceId;

/// Engine-native variant value.
///
/// Mirrors the value types a scene node can hold. `Object` carries a bare
/// instance id and only appears in signal arguments; it never round-trips
/// through JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Color(Color),
    Rect2(Rect2),
    Transform2D(Transform2D),
    Basis(Mat3),
    Quat(Quat),
    Aabb(Aabb),
    Bytes(Vec<u8>),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
    StrArray(Vec<String>),
    List(Vec<EngineValue>),
    NodePath(String),
    StringName(String),
    /// A resource reference, addressed by its resource path.
    Resource(String),
    /// A live object reference (signal arguments only).
    Object(InstanceId),
}

/// RGBA color, components in 0.0..=1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

/// Axis-aligned 2D rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect2 {
    pub position: Vec2,
    pub size: Vec2,
}

impl Rect2 {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self {
            position: Vec2::new(x, y),
            size: Vec2::new(w, h),
        }
    }

    pub fn center(&self) -> Vec2 {
        self.position + self.size * 0.5
    }

    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.position.x
            && p.y >= self.position.y
            && p.x < self.position.x + self.size.x
            && p.y < self.position.y + self.size.y
    }

    /// Grow by `pad` on every side.
    pub fn padded(&self, pad: f32) -> Self {
        Self {
            position: self.position - Vec2::splat(pad),
            size: self.size + Vec2::splat(pad * 2.0),
        }
    }

    /// Intersection with another rect; zero-sized when disjoint.
    pub fn clamped_to(&self, bounds: Rect2) -> Self {
        let x0 = self.position.x.max(bounds.position.x);
        let y0 = self.position.y.max(bounds.position.y);
        let x1 = (self.position.x + self.size.x).min(bounds.position.x + bounds.size.x);
        let y1 = (self.position.y + self.size.y).min(bounds.position.y + bounds.size.y);
        Self {
            position: Vec2::new(x0, y0),
            size: Vec2::new((x1 - x0).max(0.0), (y1 - y0).max(0.0)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size.x <= 0.0 || self.size.y <= 0.0
    }
}

/// 2D transform reduced to origin + rotation (radians).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform2D {
    pub origin: Vec2,
    pub rotation: f32,
}

/// Axis-aligned 3D bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub position: Vec3,
    pub size: Vec3,
}

/// Type tag used to steer deserialization toward the receiving property's
/// native type (a bare JSON `[400, 100]` is a `Vec2` only if the property
/// says so).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Nil,
    Bool,
    Int,
    Float,
    Str,
    Vec2,
    Vec3,
    Vec4,
    Color,
    Rect2,
    Transform2D,
    Basis,
    Quat,
    Aabb,
    Bytes,
    IntArray,
    FloatArray,
    StrArray,
    List,
    NodePath,
    StringName,
    Resource,
    Object,
}

impl EngineValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            EngineValue::Nil => ValueKind::Nil,
            EngineValue::Bool(_) => ValueKind::Bool,
            EngineValue::Int(_) => ValueKind::Int,
            EngineValue::Float(_) => ValueKind::Float,
            EngineValue::Str(_) => ValueKind::Str,
            EngineValue::Vec2(_) => ValueKind::Vec2,
            EngineValue::Vec3(_) => ValueKind::Vec3,
            EngineValue::Vec4(_) => ValueKind::Vec4,
            EngineValue::Color(_) => ValueKind::Color,
            EngineValue::Rect2(_) => ValueKind::Rect2,
            EngineValue::Transform2D(_) => ValueKind::Transform2D,
            EngineValue::Basis(_) => ValueKind::Basis,
            EngineValue::Quat(_) => ValueKind::Quat,
            EngineValue::Aabb(_) => ValueKind::Aabb,
            EngineValue::Bytes(_) => ValueKind::Bytes,
            EngineValue::IntArray(_) => ValueKind::IntArray,
            EngineValue::FloatArray(_) => ValueKind::FloatArray,
            EngineValue::StrArray(_) => ValueKind::StrArray,
            EngineValue::List(_) => ValueKind::List,
            EngineValue::NodePath(_) => ValueKind::NodePath,
            EngineValue::StringName(_) => ValueKind::StringName,
            EngineValue::Resource(_) => ValueKind::Resource,
            EngineValue::Object(_) => ValueKind::Object,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EngineValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            EngineValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric coercion: ints read as floats too.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            EngineValue::Float(v) => Some(*v),
            EngineValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            EngineValue::Str(s) | EngineValue::StringName(s) | EngineValue::NodePath(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_vec2(&self) -> Option<Vec2> {
        match self {
            EngineValue::Vec2(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vec3(&self) -> Option<Vec3> {
        match self {
            EngineValue::Vec3(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<InstanceId> {
        match self {
            EngineValue::Object(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<bool> for EngineValue {
    fn from(v: bool) -> Self {
        EngineValue::Bool(v)
    }
}

impl From<i64> for EngineValue {
    fn from(v: i64) -> Self {
        EngineValue::Int(v)
    }
}

impl From<f64> for EngineValue {
    fn from(v: f64) -> Self {
        EngineValue::Float(v)
    }
}

impl From<&str> for EngineValue {
    fn from(v: &str) -> Self {
        EngineValue::Str(v.to_string())
    }
}

impl From<String> for EngineValue {
    fn from(v: String) -> Self {
        EngineValue::Str(v)
    }
}

impl From<Vec2> for EngineValue {
    fn from(v: Vec2) -> Self {
        EngineValue::Vec2(v)
    }
}

impl From<Vec3> for EngineValue {
    fn from(v: Vec3) -> Self {
        EngineValue::Vec3(v)
    }
}
