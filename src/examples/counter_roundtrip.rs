use livestate_protocol::*;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

struct Counter {
    schema: Arc<ComponentSchema>,
}

impl Counter {
    fn new() -> Self {
        let schema = ComponentSchema::new("counter")
            .public("count", PropertyKind::Int, json!(0))
            .public("step", PropertyKind::Int, json!(1))
            .protected("secretSeed", PropertyKind::Int, json!(42))
            .listen("reset", "reset");
        Self {
            schema: Arc::new(schema),
        }
    }
}

impl Component for Counter {
    fn schema(&self) -> Arc<ComponentSchema> {
        self.schema.clone()
    }

    fn call(&self, instance: &mut ComponentInstance, method: &str, _params: &[Value]) -> Result<(), ActionError> {
        let count = instance.get_i64("count").unwrap_or_default();
        let step = instance.get_i64("step").unwrap_or(1);
        match method {
            "increment" => instance.set("count", count + step),
            "reset" => {
                instance.emit("counterReset", vec![json!(count)]);
                instance.set("count", 0)
            }
            "fail" => Err(anyhow::anyhow!("intentional failure").into()),
            _ => Err(ActionError::UnknownMethod(method.to_string())),
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("🔁 Livestate - in-process counter round trip\n");

    let config = ProtocolConfig::new("counter-roundtrip-demo-secret");
    let handler = config.build_handler(ComponentRegistry::new().register(Counter::new()))?;
    let mut store = ClientStore::new();

    let mounted = handler.mount("counter", &[])?;
    let id = mounted.id.clone();
    println!("1️⃣  Mounted {} as {}", mounted.name, id);
    print_payload(&mounted);
    store.add_component(mounted);

    let rounds: Vec<(&str, Vec<Action>)> = vec![
        ("increment", vec![Action::call("increment", vec![])]),
        (
            "step = 5, then increment",
            vec![Action::call("increment", vec![]), Action::sync("step", json!("5"))],
        ),
        ("failing action", vec![Action::call("fail", vec![])]),
        ("reset event", vec![Action::fire("reset", vec![])]),
    ];

    for (n, (label, actions)) in rounds.into_iter().enumerate() {
        println!("\n{}️⃣  {}", n + 2, label);
        let request = store
            .build_request(&id, actions)
            .ok_or_else(|| anyhow::anyhow!("component {id} is not mounted"))?;
        let wire_request = serde_json::to_vec(&request)?;
        let wire_response = handler.handle(&wire_request);
        println!("   {} bytes out, {} bytes back", wire_request.len(), wire_response.len());

        match store.apply_response(wire::decode_response(&wire_response)?) {
            Ok(payload) => print_payload(payload),
            Err(rejection) => println!("   ❌ rejected: {} ({})", rejection.message, rejection.status),
        }
    }

    println!("\n🧪 Tampering with the stored payload...");
    let mut request = store
        .build_request(&id, vec![])
        .ok_or_else(|| anyhow::anyhow!("component {id} is not mounted"))?;
    request.data.insert("count".to_string(), json!(1_000_000));
    if let Err(rejection) = store.apply_response(handler.respond(request)) {
        println!("   ❌ rejected: {:?} ({})", rejection.kind, rejection.status);
    }

    store.tear_down_components();
    println!("\n🎉 Done, {} teardown(s) pending", store.pending_teardowns().len());
    Ok(())
}

fn print_payload(payload: &ResponsePayload) {
    println!("   data: {}", serde_json::to_string(&payload.data).unwrap_or_default());
    println!("   checksum: {}", payload.checksum);
    if !payload.effects.dirty.is_empty() {
        println!("   dirty: {:?}", payload.effects.dirty);
    }
    for emit in &payload.effects.emits {
        println!("   emitted: {} {:?}", emit.event, emit.params);
    }
    if let Some(error) = &payload.effects.error {
        println!("   ⚠️  {}: {}", error.action, error.message);
    }
}
