//! The raw schema tree: ownership, mutation and key classification.

use std::cell::{Ref, RefCell};
use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::warn;

use crate::core::path;
use crate::core::variant::{ParsedKey, Qualifier};
use crate::errors::Error;

/// Names of the access-layer operations; `set` on these fails fast instead
/// of silently shadowing the API surface.
pub(crate) const RESERVED_KEYS: &[&str] = &["get", "set", "has"];

/// Owns the schema tree. All mutation goes through [`SchemaStore::set`].
#[derive(Debug)]
pub(crate) struct SchemaStore {
    root: RefCell<Value>,
}

impl SchemaStore {
    /// Validate and adopt a schema. The root must be an object, and no
    /// object may declare both an expression key and an independently
    /// authored static sibling for the same base name and qualifier set.
    pub fn new(root: Value) -> Result<Self, Error> {
        match root.as_object() {
            Some(map) => scan_conflicts(map, "")?,
            None => {
                return Err(Error::Parse {
                    path: String::new(),
                    message: "schema root must be an object".to_string(),
                });
            }
        }
        Ok(Self {
            root: RefCell::new(root),
        })
    }

    pub fn borrow_root(&self) -> Ref<'_, Value> {
        self.root.borrow()
    }

    pub fn snapshot(&self) -> Value {
        self.root.borrow().clone()
    }

    /// Write `value` at the given segments, creating intermediate objects as
    /// needed. Returns the qualifier-aware storage path of the written key,
    /// which drives cache invalidation.
    pub fn set(&self, segments: &[String], value: Value) -> Result<String, Error> {
        let Some((last, intermediate)) = segments.split_last() else {
            return Err(Error::PathNotFound {
                path: String::new(),
            });
        };
        let parsed = ParsedKey::parse(last);
        if RESERVED_KEYS.contains(&parsed.base) {
            return Err(Error::ReservedKey {
                name: parsed.base.to_string(),
            });
        }

        let mut root = self.root.borrow_mut();
        let mut written = String::new();
        let mut current = match root.as_object_mut() {
            Some(map) => map,
            None => {
                return Err(Error::PathNotFound {
                    path: String::new(),
                });
            }
        };
        for segment in intermediate {
            written = path::join(&written, ParsedKey::parse(segment).base);
            let slot = current
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            current = match slot.as_object_mut() {
                Some(map) => map,
                None => {
                    // A scalar blocks the walk; replacing it implicitly would
                    // destroy authored data.
                    return Err(Error::PathNotFound { path: written });
                }
            };
        }

        // The expression form and its materialized sibling never coexist:
        // writing one retires the other.
        let sibling = if parsed.is_expression {
            parsed.storage_name().to_string()
        } else {
            format!(".{last}")
        };
        current.shift_remove(&sibling);
        current.insert(last.clone(), value);
        Ok(path::join(&written, parsed.storage_name()))
    }

    /// Structural presence check; never evaluates expressions. Intermediate
    /// segments descend through exact static keys (and array indices) only;
    /// the final segment also matches expression and variant forms.
    pub fn has(&self, segments: &[String]) -> bool {
        let root = self.root.borrow();
        let Some((last, intermediate)) = segments.split_last() else {
            return false;
        };
        let mut current: &Value = &root;
        for segment in intermediate {
            current = match current {
                Value::Object(map) => match map.get(segment.as_str()) {
                    Some(value) => value,
                    None => return false,
                },
                Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i))
                {
                    Some(value) => value,
                    None => return false,
                },
                _ => return false,
            };
        }
        match current {
            Value::Object(map) => {
                let wanted = ParsedKey::parse(last);
                map.keys().any(|key| {
                    let parsed = ParsedKey::parse(key);
                    parsed.base == wanted.base
                        && (wanted.qualifiers.is_empty()
                            || parsed.qualifier_signature() == wanted.qualifier_signature())
                })
            }
            Value::Array(items) => last.parse::<usize>().is_ok_and(|i| i < items.len()),
            _ => false,
        }
    }

    /// Logical key names of the object at the given segments: sentinel
    /// stripped, qualifiers collapsed, declaration order kept.
    pub fn keys_at(&self, segments: &[String]) -> Vec<String> {
        let root = self.root.borrow();
        let mut current: &Value = &root;
        for segment in segments {
            current = match current {
                Value::Object(map) => match map.get(segment.as_str()) {
                    Some(value) => value,
                    None => return Vec::new(),
                },
                Value::Array(items) => {
                    match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                        Some(value) => value,
                        None => return Vec::new(),
                    }
                }
                _ => return Vec::new(),
            };
        }
        match current {
            Value::Object(map) => {
                let mut seen = Vec::new();
                for key in map.keys() {
                    let base = ParsedKey::parse(key).base.to_string();
                    if !base.is_empty() && !seen.contains(&base) {
                        seen.push(base);
                    }
                }
                seen
            }
            _ => Vec::new(),
        }
    }
}

fn scan_conflicts(map: &Map<String, Value>, prefix: &str) -> Result<(), Error> {
    let mut seen: HashMap<(String, Vec<Qualifier>), [bool; 2]> = HashMap::new();
    for (key, value) in map {
        let parsed = ParsedKey::parse(key);
        if parsed.base.is_empty() {
            continue;
        }
        let signature = (parsed.base.to_string(), parsed.qualifier_signature());
        let flags = seen.entry(signature).or_default();
        let slot = usize::from(parsed.is_expression);
        if flags[slot] {
            // Same base, same qualifier set, spelled differently: the first
            // declared key wins during resolution.
            warn!(
                key = %path::join(prefix, parsed.storage_name()),
                "ambiguous duplicate variant declaration"
            );
        }
        flags[slot] = true;
        if flags[0] && flags[1] {
            return Err(Error::ConflictingKey {
                path: path::join(prefix, parsed.storage_name()),
            });
        }
        if !parsed.is_expression {
            scan_value(value, &path::join(prefix, parsed.base))?;
        }
    }
    Ok(())
}

fn scan_value(value: &Value, prefix: &str) -> Result<(), Error> {
    match value {
        Value::Object(map) => scan_conflicts(map, prefix),
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                scan_value(item, &path::join(prefix, &index.to_string()))?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
