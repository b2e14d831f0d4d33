use serde_json::Value;
use std::collections::BTreeMap;

use crate::PropertyMap;

/// Declared type of a component property
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PropertyKind {
    Bool,
    Int,
    Float,
    String,
    Array,
    Object,
    Any,
}

impl PropertyKind {
    pub fn name(self) -> &'static str {
        match self {
            PropertyKind::Bool => "bool",
            PropertyKind::Int => "int",
            PropertyKind::Float => "float",
            PropertyKind::String => "string",
            PropertyKind::Array => "array",
            PropertyKind::Object => "object",
            PropertyKind::Any => "any",
        }
    }

    /// Name of the JSON shape of `value`, for error reporting.
    pub fn of(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(n) if n.is_f64() => "float",
            Value::Number(_) => "int",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

/// Where a property lives between requests
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Visibility {
    /// Sent to the client, signed by the checksum.
    Public,
    /// Kept in the component cache, never sent to the client.
    Protected,
    /// Not serialized at all; reset to its default on every request.
    Transient,
}

#[derive(Clone, Debug)]
pub struct PropertySchema {
    pub name: String,
    pub kind: PropertyKind,
    pub visibility: Visibility,
    pub default: Value,
}

/// Declared shape of a component class.
///
/// Property order is declaration order; lookups go through a name index.
#[derive(Clone, Debug)]
pub struct ComponentSchema {
    name: String,
    properties: Vec<PropertySchema>,
    index: BTreeMap<String, usize>,
    listeners: BTreeMap<String, String>,
}

impl ComponentSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            index: BTreeMap::new(),
            listeners: BTreeMap::new(),
        }
    }

    pub fn public(self, name: &str, kind: PropertyKind, default: Value) -> Self {
        self.property(name, kind, Visibility::Public, default)
    }

    pub fn protected(self, name: &str, kind: PropertyKind, default: Value) -> Self {
        self.property(name, kind, Visibility::Protected, default)
    }

    pub fn transient(self, name: &str, kind: PropertyKind, default: Value) -> Self {
        self.property(name, kind, Visibility::Transient, default)
    }

    /// Declare a property. Redeclaring a name replaces the earlier entry.
    pub fn property(
        mut self,
        name: &str,
        kind: PropertyKind,
        visibility: Visibility,
        default: Value,
    ) -> Self {
        let prop = PropertySchema {
            name: name.to_string(),
            kind,
            visibility,
            default,
        };
        match self.index.get(name) {
            Some(&slot) => self.properties[slot] = prop,
            None => {
                self.index.insert(name.to_string(), self.properties.len());
                self.properties.push(prop);
            }
        }
        self
    }

    /// Route the client event `event` to `method`.
    pub fn listen(mut self, event: &str, method: &str) -> Self {
        self.listeners.insert(event.to_string(), method.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, name: &str) -> Option<&PropertySchema> {
        self.index.get(name).map(|&slot| &self.properties[slot])
    }

    pub fn properties(&self) -> impl Iterator<Item = &PropertySchema> {
        self.properties.iter()
    }

    pub fn with_visibility(&self, visibility: Visibility) -> impl Iterator<Item = &PropertySchema> {
        self.properties
            .iter()
            .filter(move |p| p.visibility == visibility)
    }

    /// Event names this component listens for, sorted.
    pub fn listened_events(&self) -> Vec<String> {
        self.listeners.keys().cloned().collect()
    }

    /// Method bound to `event`, if the component listens for it.
    pub fn listener_for(&self, event: &str) -> Option<&str> {
        self.listeners.get(event).map(String::as_str)
    }

    /// Class defaults for every property of the given visibility.
    pub fn defaults(&self, visibility: Visibility) -> PropertyMap {
        self.with_visibility(visibility)
            .map(|p| (p.name.clone(), p.default.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_split_by_visibility() {
        let schema = ComponentSchema::new("counter")
            .public("count", PropertyKind::Int, json!(0))
            .protected("secretSeed", PropertyKind::Int, json!(42))
            .transient("scratch", PropertyKind::Any, Value::Null)
            .listen("reset", "resetCount");

        assert_eq!(schema.defaults(Visibility::Public), PropertyMap::from([("count".to_string(), json!(0))]));
        assert_eq!(schema.defaults(Visibility::Protected)["secretSeed"], json!(42));
        assert_eq!(schema.get("scratch").map(|p| p.visibility), Some(Visibility::Transient));
        assert_eq!(schema.listener_for("reset"), Some("resetCount"));
        assert_eq!(schema.listened_events(), vec!["reset".to_string()]);
    }

    #[test]
    fn test_redeclare_replaces() {
        let schema = ComponentSchema::new("x")
            .public("a", PropertyKind::Int, json!(1))
            .protected("a", PropertyKind::String, json!("s"));
        assert_eq!(schema.properties().count(), 1);
        assert_eq!(schema.get("a").map(|p| p.kind), Some(PropertyKind::String));
    }

    #[test]
    fn test_kind_of_value() {
        assert_eq!(PropertyKind::of(&json!(1)), "int");
        assert_eq!(PropertyKind::of(&json!(1.5)), "float");
        assert_eq!(PropertyKind::of(&json!([1])), "array");
    }
}
