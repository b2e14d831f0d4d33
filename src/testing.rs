use serde_json::{json, Value};
use std::sync::Arc;

use crate::cache::ComponentCache;
use crate::checksum::SigningKey;
use crate::component::{Component, ComponentInstance, ComponentRegistry};
use crate::connection::ConnectionHandler;
use crate::error::ActionError;
use crate::pipeline::Pipeline;
use crate::schema::{ComponentSchema, PropertyKind};
use crate::ComponentId;

pub(crate) const SECRET: &[u8] = b"unit-test-signing-secret";

pub(crate) fn key() -> SigningKey {
    SigningKey::new(SECRET.to_vec()).unwrap()
}

pub(crate) struct Counter {
    schema: Arc<ComponentSchema>,
}

impl Counter {
    pub(crate) fn new() -> Self {
        Self::named("counter")
    }

    /// Same behaviour registered under another class name.
    pub(crate) fn named(name: &str) -> Self {
        let schema = ComponentSchema::new(name)
            .public("count", PropertyKind::Int, json!(0))
            .protected("secretSeed", PropertyKind::Int, json!(42))
            .transient("lastAction", PropertyKind::String, Value::Null)
            .listen("reset", "resetCount");
        Self {
            schema: Arc::new(schema),
        }
    }
}

impl Component for Counter {
    fn schema(&self) -> Arc<ComponentSchema> {
        self.schema.clone()
    }

    fn mount(&self, instance: &mut ComponentInstance, params: &[Value]) -> anyhow::Result<()> {
        if let Some(start) = params.first().and_then(Value::as_i64) {
            instance.set("count", start)?;
        }
        Ok(())
    }

    fn call(
        &self,
        instance: &mut ComponentInstance,
        method: &str,
        params: &[Value],
    ) -> Result<(), ActionError> {
        let count = instance.get_i64("count").unwrap_or_default();
        instance.set("lastAction", method)?;
        match method {
            "increment" => instance.set("count", count + 1),
            "decrement" => instance.set("count", count - 1),
            "add" => {
                let by = params
                    .first()
                    .and_then(Value::as_i64)
                    .ok_or_else(|| ActionError::InvalidParams {
                        method: method.to_string(),
                        reason: "expected an integer".to_string(),
                    })?;
                instance.set("count", count + by)
            }
            "resetCount" => {
                instance.set("count", 0)?;
                instance.emit("counterReset", vec![]);
                Ok(())
            }
            "reseed" => instance.set("secretSeed", count),
            "explode" => {
                instance.set("count", count + 100)?;
                Err(anyhow::anyhow!("database unreachable at 10.0.0.7").into())
            }
            "validate" => {
                if count < 10 {
                    instance.add_error("count", "count must be at least 10");
                }
                Ok(())
            }
            "goHome" => {
                instance.flash("status", "saved");
                instance.redirect("/home");
                Ok(())
            }
            "notify" => {
                instance.flash("status", "noted");
                Ok(())
            }
            "spawnChildren" => {
                instance.set_children(vec![ComponentId::from("child-a"), ComponentId::from("child-b")]);
                Ok(())
            }
            _ => Err(ActionError::UnknownMethod(method.to_string())),
        }
    }
}

pub(crate) fn handler() -> ConnectionHandler {
    let registry = ComponentRegistry::new().register(Counter::new());
    let cache = Arc::new(ComponentCache::default());
    let pipeline = Pipeline::standard(key(), cache.clone());
    ConnectionHandler::new(registry, pipeline, cache)
}
