use serde_json::{Number, Value};

use crate::component::ComponentInstance;
use crate::error::ProtocolError;
use crate::schema::{PropertyKind, PropertySchema, Visibility};
use crate::PropertyMap;

/// Coerce an incoming value to the property's declared kind.
///
/// Scalars convert between each other where the meaning is unambiguous;
/// structural mismatches are errors. `null` is accepted for every kind.
pub fn coerce(prop: &PropertySchema, value: &Value) -> Result<Value, ProtocolError> {
    let mismatch = || ProtocolError::TypeMismatch {
        property: prop.name.clone(),
        expected: prop.kind.name(),
        found: PropertyKind::of(value),
    };

    if value.is_null() {
        return Ok(Value::Null);
    }

    let coerced = match (prop.kind, value) {
        (PropertyKind::Any, v) => Some(v.clone()),

        (PropertyKind::Bool, Value::Bool(_)) => Some(value.clone()),
        (PropertyKind::Bool, Value::Number(n)) => match n.as_i64() {
            Some(0) => Some(Value::Bool(false)),
            Some(1) => Some(Value::Bool(true)),
            _ => None,
        },
        (PropertyKind::Bool, Value::String(s)) => match s.as_str() {
            "true" | "1" => Some(Value::Bool(true)),
            "false" | "0" | "" => Some(Value::Bool(false)),
            _ => None,
        },

        (PropertyKind::Int, Value::Number(n)) if n.is_i64() || n.is_u64() => Some(value.clone()),
        (PropertyKind::Int, Value::Number(n)) => n
            .as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
            .map(|f| Value::from(f as i64)),
        (PropertyKind::Int, Value::Bool(b)) => Some(Value::from(i64::from(*b))),
        (PropertyKind::Int, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),

        (PropertyKind::Float, Value::Number(_)) => Some(value.clone()),
        (PropertyKind::Float, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),

        (PropertyKind::String, Value::String(_)) => Some(value.clone()),
        (PropertyKind::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (PropertyKind::String, Value::Bool(b)) => Some(Value::String(b.to_string())),

        (PropertyKind::Array, Value::Array(_)) => Some(value.clone()),
        (PropertyKind::Object, Value::Object(_)) => Some(value.clone()),

        _ => None,
    };

    coerced.ok_or_else(mismatch)
}

/// Assign public properties from the payload onto a raw instance.
///
/// Names the schema does not declare public are skipped and logged; the
/// caller is responsible for integrity of `data`.
pub fn hydrate_public(instance: &mut ComponentInstance, data: &PropertyMap) -> Result<(), ProtocolError> {
    for (name, value) in data {
        let prop = match instance.schema().get(name) {
            Some(prop) if prop.visibility == Visibility::Public => prop,
            Some(prop) => {
                tracing::warn!(
                    id = %instance.id(),
                    property = %name,
                    visibility = ?prop.visibility,
                    "ignoring non-public property in payload"
                );
                continue;
            }
            None => {
                tracing::warn!(
                    id = %instance.id(),
                    component = instance.name(),
                    property = %name,
                    "ignoring unknown property in payload"
                );
                continue;
            }
        };
        let value = coerce(prop, value)?;
        instance.public.insert(name.clone(), value);
    }
    Ok(())
}

/// Public properties as they go on the wire, in name order.
pub fn dehydrate_public(instance: &ComponentInstance) -> PropertyMap {
    serializable(instance, Visibility::Public, &instance.public)
}

/// Restore protected properties from a cache hit.
///
/// Declared properties missing from the snapshot keep their defaults, and
/// snapshot keys the class no longer declares protected are dropped.
pub fn hydrate_protected(instance: &mut ComponentInstance, cached: PropertyMap) {
    for (name, value) in cached {
        let declared = instance
            .schema()
            .get(&name)
            .is_some_and(|p| p.visibility == Visibility::Protected);
        if declared {
            instance.protected.insert(name, value);
        } else {
            tracing::debug!(id = %instance.id(), property = %name, "dropping stale cached property");
        }
    }
}

/// Protected properties as they go into the cache.
pub fn dehydrate_protected(instance: &ComponentInstance) -> PropertyMap {
    serializable(instance, Visibility::Protected, &instance.protected)
}

fn serializable(instance: &ComponentInstance, visibility: Visibility, values: &PropertyMap) -> PropertyMap {
    instance
        .schema()
        .with_visibility(visibility)
        .map(|p| {
            let value = values.get(&p.name).cloned().unwrap_or(Value::Null);
            (p.name.clone(), value)
        })
        .collect()
}
