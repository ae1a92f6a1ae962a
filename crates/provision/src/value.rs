//! Input value tree with embedded reference markers.
//!
//! Resource inputs are literal values that may embed [`Reference`]s to other
//! resources' future outputs, at any nesting depth. References are collected
//! with a generic deep-scan visitor rather than per-field handling, and
//! resolve only once the upstream resource has been provisioned.

use serde_json::Value as Json;
use std::collections::BTreeMap;

/// A lazy pointer from one resource's input to another's computed output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    /// Logical name of the upstream resource
    pub resource: String,
    /// Output attribute to read once provisioned
    pub attribute: String,
}

impl Reference {
    pub fn new(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            attribute: attribute.into(),
        }
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${{{}.{}}}", self.resource, self.attribute)
    }
}

/// Placeholder shown in plans for values that only exist after apply.
pub const KNOWN_AFTER_APPLY: &str = "(known after apply)";

/// A declaration-time input value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Unresolved pointer to another resource's output
    Ref(Reference),
    /// String interpolation: parts are stringified and joined on resolve
    Concat(Vec<Value>),
    /// Marks a value for redaction in plan output; resolves transparently
    Secret(Box<Value>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    pub fn int(n: i64) -> Self {
        Self::Number(n.into())
    }

    pub fn reference(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::Ref(Reference::new(resource, attribute))
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Self::List(items.into_iter().collect())
    }

    /// Collect every reference embedded anywhere in this value tree.
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.visit_references(&mut out);
        out
    }

    fn visit_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Self::Null | Self::Bool(_) | Self::Number(_) | Self::String(_) => {}
            Self::List(items) | Self::Concat(items) => {
                for item in items {
                    item.visit_references(out);
                }
            }
            Self::Map(entries) => {
                for value in entries.values() {
                    value.visit_references(out);
                }
            }
            Self::Ref(reference) => out.push(reference),
            Self::Secret(inner) => inner.visit_references(out),
        }
    }

    /// Whether any part of this value is marked secret.
    pub fn contains_secret(&self) -> bool {
        match self {
            Self::Secret(_) => true,
            Self::List(items) | Self::Concat(items) => items.iter().any(Value::contains_secret),
            Self::Map(entries) => entries.values().any(Value::contains_secret),
            _ => false,
        }
    }

    /// Resolve this value against provisioned outputs.
    ///
    /// `lookup` maps a reference to the upstream resource's output attribute;
    /// the first reference it cannot answer is returned as the error.
    pub fn resolve<F>(&self, lookup: &F) -> Result<Json, Reference>
    where
        F: Fn(&Reference) -> Option<Json>,
    {
        match self {
            Self::Null => Ok(Json::Null),
            Self::Bool(b) => Ok(Json::Bool(*b)),
            Self::Number(n) => Ok(Json::Number(n.clone())),
            Self::String(s) => Ok(Json::String(s.clone())),
            Self::List(items) => items
                .iter()
                .map(|item| item.resolve(lookup))
                .collect::<Result<Vec<_>, _>>()
                .map(Json::Array),
            Self::Map(entries) => {
                let mut map = serde_json::Map::new();
                for (key, value) in entries {
                    map.insert(key.clone(), value.resolve(lookup)?);
                }
                Ok(Json::Object(map))
            }
            Self::Ref(reference) => lookup(reference).ok_or_else(|| reference.clone()),
            Self::Concat(parts) => {
                let mut joined = String::new();
                for part in parts {
                    joined.push_str(&json_to_text(&part.resolve(lookup)?));
                }
                Ok(Json::String(joined))
            }
            Self::Secret(inner) => inner.resolve(lookup),
        }
    }

    /// Resolve with a placeholder for unknown references.
    ///
    /// Used at plan time, when upstream resources may not be provisioned yet.
    /// Returns the resolved value and whether it was fully resolved.
    pub fn resolve_lossy<F>(&self, lookup: &F) -> (Json, bool)
    where
        F: Fn(&Reference) -> Option<Json>,
    {
        match self {
            Self::Ref(reference) => match lookup(reference) {
                Some(value) => (value, true),
                None => (Json::String(KNOWN_AFTER_APPLY.to_string()), false),
            },
            Self::List(items) => {
                let mut complete = true;
                let resolved = items
                    .iter()
                    .map(|item| {
                        let (value, ok) = item.resolve_lossy(lookup);
                        complete &= ok;
                        value
                    })
                    .collect();
                (Json::Array(resolved), complete)
            }
            Self::Map(entries) => {
                let mut complete = true;
                let mut map = serde_json::Map::new();
                for (key, value) in entries {
                    let (resolved, ok) = value.resolve_lossy(lookup);
                    complete &= ok;
                    map.insert(key.clone(), resolved);
                }
                (Json::Object(map), complete)
            }
            Self::Concat(parts) => {
                let mut complete = true;
                let mut joined = String::new();
                for part in parts {
                    let (value, ok) = part.resolve_lossy(lookup);
                    complete &= ok;
                    joined.push_str(&json_to_text(&value));
                }
                (Json::String(joined), complete)
            }
            Self::Secret(inner) => inner.resolve_lossy(lookup),
            other => (
                other
                    .resolve(&|_| None)
                    .unwrap_or_else(|_| Json::String(KNOWN_AFTER_APPLY.to_string())),
                true,
            ),
        }
    }
}

/// Stringify a resolved value for interpolation.
fn json_to_text(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        Json::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nested_value() -> Value {
        let mut rule = BTreeMap::new();
        rule.insert(
            "security_group_id".to_string(),
            Value::reference("demo-sql-security-group", "id"),
        );
        rule.insert(
            "cidr_blocks".to_string(),
            Value::list([
                Value::string("10.200.32.0/20"),
                Value::reference("demo-vpc", "cidr_block"),
            ]),
        );
        Value::Map(rule)
    }

    #[test]
    fn deep_scan_finds_nested_references() {
        let value = nested_value();
        let refs = value.references();
        assert_eq!(refs.len(), 2);
        assert!(refs.iter().any(|r| r.resource == "demo-vpc"));
        assert!(
            refs.iter()
                .any(|r| r.resource == "demo-sql-security-group" && r.attribute == "id")
        );
    }

    #[test]
    fn resolve_replaces_references() {
        let value = nested_value();
        let resolved = value
            .resolve(&|r| match r.resource.as_str() {
                "demo-vpc" => Some(json!("10.200.0.0/16")),
                "demo-sql-security-group" => Some(json!("sg-0001")),
                _ => None,
            })
            .unwrap();

        assert_eq!(
            resolved,
            json!({
                "cidr_blocks": ["10.200.32.0/20", "10.200.0.0/16"],
                "security_group_id": "sg-0001",
            })
        );
    }

    #[test]
    fn resolve_reports_first_missing_reference() {
        let value = Value::reference("absent", "id");
        let err = value.resolve(&|_| None).unwrap_err();
        assert_eq!(err.resource, "absent");
    }

    #[test]
    fn concat_builds_connection_strings() {
        let value = Value::Concat(vec![
            Value::string("postgres://admin@"),
            Value::reference("db", "endpoint"),
            Value::string("/saleor"),
        ]);
        let resolved = value
            .resolve(&|_| Some(json!("db-1.internal:5432")))
            .unwrap();
        assert_eq!(resolved, json!("postgres://admin@db-1.internal:5432/saleor"));
    }

    #[test]
    fn lossy_resolution_marks_unknowns() {
        let value = Value::list([Value::string("a"), Value::reference("later", "id")]);
        let (resolved, complete) = value.resolve_lossy(&|_| None);
        assert!(!complete);
        assert_eq!(resolved, json!(["a", KNOWN_AFTER_APPLY]));
    }

    #[test]
    fn secrets_resolve_transparently_but_are_flagged() {
        let value = Value::Secret(Box::new(Value::string("hunter2")));
        assert!(value.contains_secret());
        assert_eq!(value.resolve(&|_| None).unwrap(), json!("hunter2"));

        let mut map = BTreeMap::new();
        map.insert("password".to_string(), value);
        assert!(Value::Map(map).contains_secret());
    }
}
