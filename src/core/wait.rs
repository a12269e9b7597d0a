//! Condition evaluation for `/wait_for`.
//!
//! Pure predicate logic; the pacing (poll cadence, deadline, one-shot signal
//! subscription) lives in the continuation layer.

use serde_json::Value;

use crate::core::refs::RefMap;
use crate::engine::Engine;
use crate::serialize::to_json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Equals,
    Greater,
    Less,
}

#[derive(Debug, Clone)]
pub enum Condition {
    NodeExists {
        ident: String,
    },
    NodeFreed {
        ident: String,
    },
    Property {
        ident: String,
        property: String,
        op: CmpOp,
        value: Value,
    },
    Signal {
        ident: String,
        signal: String,
    },
}

/// Build a condition from request parameters, validating the combination.
pub fn parse_condition(
    kind: &str,
    ident: &str,
    property: &str,
    value: Option<Value>,
    signal: &str,
) -> Result<Condition, String> {
    if ident.is_empty() {
        return Err("Must provide 'ref' or 'path'".to_string());
    }
    match kind {
        "node_exists" => Ok(Condition::NodeExists {
            ident: ident.to_string(),
        }),
        "node_freed" => Ok(Condition::NodeFreed {
            ident: ident.to_string(),
        }),
        "property_equals" | "property_greater" | "property_less" => {
            if property.is_empty() {
                return Err("Must provide 'property'".to_string());
            }
            let value = value.ok_or_else(|| "Must provide 'value'".to_string())?;
            let op = match kind {
                "property_equals" => CmpOp::Equals,
                "property_greater" => CmpOp::Greater,
                _ => CmpOp::Less,
            };
            Ok(Condition::Property {
                ident: ident.to_string(),
                property: property.to_string(),
                op,
                value,
            })
        }
        "signal" => {
            if signal.is_empty() {
                return Err("Must provide 'signal'".to_string());
            }
            Ok(Condition::Signal {
                ident: ident.to_string(),
                signal: signal.to_string(),
            })
        }
        other => Err(format!("Unknown condition '{}'", other)),
    }
}

impl Condition {
    /// Evaluate a pollable condition. Signal conditions are not pollable
    /// (they latch through a one-shot subscription) and always report false
    /// here.
    pub fn check(&self, engine: &dyn Engine, refs: &mut RefMap) -> bool {
        match self {
            Condition::NodeExists { ident } => refs.resolve(engine, ident, None).is_some(),
            Condition::NodeFreed { ident } => refs.resolve(engine, ident, None).is_none(),
            Condition::Property {
                ident,
                property,
                op,
                value,
            } => {
                let Some(id) = refs.resolve(engine, ident, None) else {
                    return false;
                };
                let Some(current) = engine.get_property(id, property) else {
                    return false;
                };
                let serialized = to_json(&current);
                match op {
                    // Serialized-form equality survives JSON round-trips.
                    CmpOp::Equals => &serialized == value,
                    CmpOp::Greater | CmpOp::Less => {
                        let (Some(a), Some(b)) = (serialized.as_f64(), value.as_f64()) else {
                            return false;
                        };
                        if *op == CmpOp::Greater {
                            a > b
                        } else {
                            a < b
                        }
                    }
                }
            }
            Condition::Signal { .. } => false,
        }
    }
}
