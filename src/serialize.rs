//! JSON mapping for engine values.
//!
//! One serialized form is used everywhere: snapshot properties, watch values,
//! request bodies and method results. Keeping a single mapping makes
//! "serialized-form equality" well-defined for watches and `property_equals`
//! waits.
//!
//! Wire shapes:
//! - vectors → fixed-length arrays, colors → `{r,g,b,a}`
//! - rects → `{position:[x,y], size:[w,h]}`, AABBs the same in 3 dims
//! - 2D transforms → `{origin, rotation}`, basis → 3×3 row-major array
//! - quaternions → `[x,y,z,w]`, byte arrays → base64 strings
//! - node paths / string-names → strings, resources → their resource path

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use glam::{Mat3, Quat, Vec2, Vec3, Vec4};
use serde_json::{json, Value};

use crate::value::{Aabb, Color, EngineValue, Rect2, Transform2D, ValueKind};

/// Serialize an engine value into its JSON-safe form.
pub fn to_json(value: &EngineValue) -> Value {
    match value {
        EngineValue::Nil => Value::Null,
        EngineValue::Bool(v) => json!(v),
        EngineValue::Int(v) => json!(v),
        EngineValue::Float(v) => json!(v),
        EngineValue::Str(v) => json!(v),
        EngineValue::Vec2(v) => json!([v.x, v.y]),
        EngineValue::Vec3(v) => json!([v.x, v.y, v.z]),
        EngineValue::Vec4(v) => json!([v.x, v.y, v.z, v.w]),
        EngineValue::Color(c) => json!({"r": c.r, "g": c.g, "b": c.b, "a": c.a}),
        EngineValue::Rect2(r) => json!({
            "position": [r.position.x, r.position.y],
            "size": [r.size.x, r.size.y],
        }),
        EngineValue::Transform2D(t) => json!({
            "origin": [t.origin.x, t.origin.y],
            "rotation": t.rotation,
        }),
        EngineValue::Basis(m) => {
            let rows: Vec<Vec<f32>> = (0..3)
                .map(|r| (0..3).map(|c| m.col(c)[r]).collect())
                .collect();
            json!(rows)
        }
        EngineValue::Quat(q) => json!([q.x, q.y, q.z, q.w]),
        EngineValue::Aabb(b) => json!({
            "position": [b.position.x, b.position.y, b.position.z],
            "size": [b.size.x, b.size.y, b.size.z],
        }),
        EngineValue::Bytes(b) => json!(BASE64.encode(b)),
        EngineValue::IntArray(v) => json!(v),
        EngineValue::FloatArray(v) => json!(v),
        EngineValue::StrArray(v) => json!(v),
        EngineValue::List(items) => Value::Array(items.iter().map(to_json).collect()),
        EngineValue::NodePath(p) => json!(p),
        EngineValue::StringName(s) => json!(s),
        EngineValue::Resource(path) => json!(path),
        // Live references have no wire form; fall back to a display string.
        EngineValue::Object(id) => json!(format!("<object#{}>", id.get())),
    }
}

/// Deserialize with no type hint: numbers, strings, bools and nested arrays
/// map naturally; arrays of 2–4 numbers stay numeric lists (not vectors)
/// because the caller gave us nothing to infer from.
pub fn from_json(value: &Value) -> EngineValue {
    match value {
        Value::Null => EngineValue::Nil,
        Value::Bool(b) => EngineValue::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                EngineValue::Int(i)
            } else {
                EngineValue::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => EngineValue::Str(s.clone()),
        Value::Array(items) => EngineValue::List(items.iter().map(from_json).collect()),
        Value::Object(map) => {
            // A {r,g,b,a} object is unambiguous enough to accept untyped.
            if map.len() <= 4 && map.contains_key("r") && map.contains_key("g") {
                return EngineValue::Color(Color {
                    r: num(map.get("r")) as f32,
                    g: num(map.get("g")) as f32,
                    b: num(map.get("b")) as f32,
                    a: map.get("a").map(|v| num(Some(v)) as f32).unwrap_or(1.0),
                });
            }
            // Other objects have no untyped engine form; keep the raw text.
            EngineValue::Str(value.to_string())
        }
    }
}

/// Deserialize steered by the receiving property's kind.
///
/// Returns `None` when the JSON shape cannot produce the requested kind, so
/// callers can report a useful error instead of silently storing garbage.
pub fn from_json_typed(value: &Value, kind: ValueKind) -> Option<EngineValue> {
    match kind {
        ValueKind::Nil => Some(EngineValue::Nil),
        ValueKind::Bool => value.as_bool().map(EngineValue::Bool),
        ValueKind::Int => value.as_i64().map(EngineValue::Int),
        ValueKind::Float => value.as_f64().map(EngineValue::Float),
        ValueKind::Str => value.as_str().map(|s| EngineValue::Str(s.to_string())),
        ValueKind::Vec2 => floats(value, 2).map(|v| EngineValue::Vec2(Vec2::new(v[0], v[1]))),
        ValueKind::Vec3 => {
            floats(value, 3).map(|v| EngineValue::Vec3(Vec3::new(v[0], v[1], v[2])))
        }
        ValueKind::Vec4 => {
            floats(value, 4).map(|v| EngineValue::Vec4(Vec4::new(v[0], v[1], v[2], v[3])))
        }
        ValueKind::Color => {
            let map = value.as_object()?;
            Some(EngineValue::Color(Color {
                r: num(map.get("r")) as f32,
                g: num(map.get("g")) as f32,
                b: num(map.get("b")) as f32,
                a: map.get("a").map(|v| num(Some(v)) as f32).unwrap_or(1.0),
            }))
        }
        ValueKind::Rect2 => {
            let map = value.as_object()?;
            let pos = floats(map.get("position")?, 2)?;
            let size = floats(map.get("size")?, 2)?;
            Some(EngineValue::Rect2(Rect2 {
                position: Vec2::new(pos[0], pos[1]),
                size: Vec2::new(size[0], size[1]),
            }))
        }
        ValueKind::Transform2D => {
            let map = value.as_object()?;
            let origin = floats(map.get("origin")?, 2)?;
            Some(EngineValue::Transform2D(Transform2D {
                origin: Vec2::new(origin[0], origin[1]),
                rotation: map.get("rotation")?.as_f64()? as f32,
            }))
        }
        ValueKind::Basis => {
            let rows = value.as_array()?;
            if rows.len() != 3 {
                return None;
            }
            let mut cols = [[0.0f32; 3]; 3];
            for (r, row) in rows.iter().enumerate() {
                let row = floats(row, 3)?;
                for c in 0..3 {
                    cols[c][r] = row[c];
                }
            }
            Some(EngineValue::Basis(Mat3::from_cols_array_2d(&cols)))
        }
        ValueKind::Quat => {
            floats(value, 4).map(|v| EngineValue::Quat(Quat::from_xyzw(v[0], v[1], v[2], v[3])))
        }
        ValueKind::Aabb => {
            let map = value.as_object()?;
            let pos = floats(map.get("position")?, 3)?;
            let size = floats(map.get("size")?, 3)?;
            Some(EngineValue::Aabb(Aabb {
                position: Vec3::new(pos[0], pos[1], pos[2]),
                size: Vec3::new(size[0], size[1], size[2]),
            }))
        }
        ValueKind::Bytes => {
            let text = value.as_str()?;
            BASE64.decode(text).ok().map(EngineValue::Bytes)
        }
        ValueKind::IntArray => {
            let items = value.as_array()?;
            items
                .iter()
                .map(|v| v.as_i64())
                .collect::<Option<Vec<_>>>()
                .map(EngineValue::IntArray)
        }
        ValueKind::FloatArray => {
            let items = value.as_array()?;
            items
                .iter()
                .map(|v| v.as_f64())
                .collect::<Option<Vec<_>>>()
                .map(EngineValue::FloatArray)
        }
        ValueKind::StrArray => {
            let items = value.as_array()?;
            items
                .iter()
                .map(|v| v.as_str().map(|s| s.to_string()))
                .collect::<Option<Vec<_>>>()
                .map(EngineValue::StrArray)
        }
        ValueKind::List => Some(from_json(value)),
        ValueKind::NodePath => value.as_str().map(|s| EngineValue::NodePath(s.to_string())),
        ValueKind::StringName => value
            .as_str()
            .map(|s| EngineValue::StringName(s.to_string())),
        ValueKind::Resource => value.as_str().map(|s| EngineValue::Resource(s.to_string())),
        // Object references cannot be constructed from JSON.
        ValueKind::Object => None,
    }
}

fn num(value: Option<&Value>) -> f64 {
    value.and_then(Value::as_f64).unwrap_or(0.0)
}

fn floats(value: &Value, n: usize) -> Option<Vec<f32>> {
    let items = value.as_array()?;
    if items.len() != n {
        return None;
    }
    items
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: EngineValue) {
        let wire = to_json(&v);
        let back = from_json_typed(&wire, v.kind()).expect("typed deserialize");
        assert_eq!(v, back, "round-trip failed for {:?}", wire);
    }

    #[test]
    fn scalars_round_trip() {
        round_trip(EngineValue::Bool(true));
        round_trip(EngineValue::Int(-42));
        round_trip(EngineValue::Float(1.5));
        round_trip(EngineValue::Str("hello".into()));
    }

    #[test]
    fn vectors_round_trip() {
        round_trip(EngineValue::Vec2(Vec2::new(400.0, 100.0)));
        round_trip(EngineValue::Vec3(Vec3::new(1.0, 2.0, 3.0)));
        round_trip(EngineValue::Vec4(Vec4::new(1.0, 0.0, 0.5, 0.25)));
        round_trip(EngineValue::Quat(Quat::from_xyzw(0.0, 0.0, 0.0, 1.0)));
    }

    #[test]
    fn compound_round_trip() {
        round_trip(EngineValue::Color(Color {
            r: 1.0,
            g: 0.25,
            b: 0.0,
            a: 0.5,
        }));
        round_trip(EngineValue::Rect2(Rect2::new(0.0, 10.0, 64.0, 32.0)));
        round_trip(EngineValue::Transform2D(Transform2D {
            origin: Vec2::new(5.0, -5.0),
            rotation: 0.75,
        }));
        round_trip(EngineValue::Aabb(Aabb {
            position: Vec3::ZERO,
            size: Vec3::new(2.0, 2.0, 2.0),
        }));
        round_trip(EngineValue::Basis(Mat3::IDENTITY));
    }

    #[test]
    fn arrays_round_trip() {
        round_trip(EngineValue::Bytes(vec![0, 1, 2, 255]));
        round_trip(EngineValue::IntArray(vec![1, 2, 3]));
        round_trip(EngineValue::FloatArray(vec![0.5, 1.5]));
        round_trip(EngineValue::StrArray(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn bytes_are_base64_strings() {
        let wire = to_json(&EngineValue::Bytes(vec![1, 2, 3]));
        assert_eq!(wire, json!("AQID"));
    }

    #[test]
    fn resources_serialize_as_paths() {
        let wire = to_json(&EngineValue::Resource("res://player.tscn".into()));
        assert_eq!(wire, json!("res://player.tscn"));
    }

    #[test]
    fn untyped_color_object_is_recognized() {
        let v = from_json(&json!({"r": 1.0, "g": 0.0, "b": 0.0}));
        assert_eq!(
            v,
            EngineValue::Color(Color {
                r: 1.0,
                g: 0.0,
                b: 0.0,
                a: 1.0
            })
        );
    }

    #[test]
    fn typed_vec2_from_bare_array() {
        let v = from_json_typed(&json!([400, 100]), ValueKind::Vec2).unwrap();
        assert_eq!(v, EngineValue::Vec2(Vec2::new(400.0, 100.0)));
        // Wrong arity is a shape error, not a truncation.
        assert!(from_json_typed(&json!([1, 2, 3]), ValueKind::Vec2).is_none());
    }
}
