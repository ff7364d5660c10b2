//! Slot store and reference resolver.
//!
//! Steps publish results under declared slot names; later steps consume
//! them through indirection markers embedded in their arguments. A
//! marker is an object carrying a `$slot` key (and optionally `$field`
//! to project one field out of the stored value). Arguments are parsed
//! into an explicit expression grammar up front, so resolution is
//! structurally total and ordinary data cannot be misread as a
//! reference. Stored values are always concrete — a resolved slot can
//! never contain a further indirection, so resolution terminates.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ExecError;

/// Marker keys recognized inside argument objects.
const SLOT_KEY: &str = "$slot";
const FIELD_KEY: &str = "$field";

/// Write-once-per-step result store, scoped to one plan run.
///
/// A later step writing the same name replaces the value (last write
/// wins); reading a name that was never written is an error at
/// resolution time.
#[derive(Default)]
pub struct SlotStore {
    slots: HashMap<String, Value>,
}

impl SlotStore {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }

    pub fn insert(&mut self, name: &str, value: Value) {
        if self.slots.contains_key(name) {
            debug!("Slot '{name}' overwritten by a later step");
        }
        self.slots.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.slots.get(name)
    }

    /// Fetches a slot or fails with the error the resolver would raise.
    pub fn require(&self, name: &str) -> Result<&Value, ExecError> {
        self.get(name).ok_or_else(|| ExecError::SlotReference {
            message: format!("slot '{name}' has not been written"),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Parsed argument tree: literals, slot references, and composites.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgExpr {
    Literal(Value),
    SlotRef {
        slot: String,
        field: Option<String>,
    },
    Seq(Vec<ArgExpr>),
    Map(Vec<(String, ArgExpr)>),
}

impl ArgExpr {
    /// Parses an argument value into the expression grammar. Total:
    /// every JSON value has exactly one parse. An object is a slot
    /// reference only when its keys are exactly the marker keys with
    /// string values; anything else is ordinary data.
    pub fn parse(value: &Value) -> ArgExpr {
        match value {
            Value::Array(items) => ArgExpr::Seq(items.iter().map(ArgExpr::parse).collect()),
            Value::Object(map) => match Self::parse_slot_ref(map) {
                Some(reference) => reference,
                None => ArgExpr::Map(
                    map.iter()
                        .map(|(key, entry)| (key.clone(), ArgExpr::parse(entry)))
                        .collect(),
                ),
            },
            other => ArgExpr::Literal(other.clone()),
        }
    }

    fn parse_slot_ref(map: &Map<String, Value>) -> Option<ArgExpr> {
        let slot = map.get(SLOT_KEY)?.as_str()?;
        let field = match map.get(FIELD_KEY) {
            Some(value) => Some(value.as_str()?.to_string()),
            None => None,
        };
        let expected_keys = 1 + usize::from(field.is_some());
        if map.len() != expected_keys {
            return None;
        }
        Some(ArgExpr::SlotRef {
            slot: slot.to_string(),
            field,
        })
    }

    /// Replaces every reference with the named slot's stored value
    /// (or a field projected out of it), rebuilding composites with
    /// keys and element order preserved.
    pub fn resolve(&self, slots: &SlotStore) -> Result<Value, ExecError> {
        match self {
            ArgExpr::Literal(value) => Ok(value.clone()),
            ArgExpr::SlotRef { slot, field } => {
                let stored = slots.require(slot)?;
                match field {
                    None => Ok(stored.clone()),
                    Some(field) => stored
                        .get(field)
                        .cloned()
                        .ok_or_else(|| ExecError::SlotReference {
                            message: format!("slot '{slot}' has no field '{field}'"),
                        }),
                }
            }
            ArgExpr::Seq(items) => {
                let resolved: Result<Vec<Value>, ExecError> =
                    items.iter().map(|item| item.resolve(slots)).collect();
                Ok(Value::Array(resolved?))
            }
            ArgExpr::Map(entries) => {
                let mut map = Map::new();
                for (key, entry) in entries {
                    map.insert(key.clone(), entry.resolve(slots)?);
                }
                Ok(Value::Object(map))
            }
        }
    }

    /// Slot names referenced anywhere in this expression, in
    /// encounter order. Used by the validator to catch references to
    /// slots no earlier step writes.
    pub fn referenced_slots(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_slots(&mut names);
        names
    }

    fn collect_slots(&self, names: &mut Vec<String>) {
        match self {
            ArgExpr::Literal(_) => {}
            ArgExpr::SlotRef { slot, .. } => names.push(slot.clone()),
            ArgExpr::Seq(items) => {
                for item in items {
                    item.collect_slots(names);
                }
            }
            ArgExpr::Map(entries) => {
                for (_, entry) in entries {
                    entry.collect_slots(names);
                }
            }
        }
    }
}

/// Parses and resolves an argument tree in one call.
pub fn resolve_args(args: &Value, slots: &SlotStore) -> Result<Value, ExecError> {
    ArgExpr::parse(args).resolve(slots)
}
