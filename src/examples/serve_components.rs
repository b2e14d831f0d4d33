use livestate_protocol::*;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::UdpSocket;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// What the demo driver sends: a first render or a follow-up request.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
enum Envelope {
    Mount {
        name: String,
        #[serde(default)]
        params: Vec<Value>,
    },
    Request(RequestPayload),
}

struct Counter {
    schema: Arc<ComponentSchema>,
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

    fn call(&self, instance: &mut ComponentInstance, method: &str, _params: &[Value]) -> Result<(), ActionError> {
        let count = instance.get_i64("count").unwrap_or_default();
        match method {
            "increment" => instance.set("count", count + 1),
            "decrement" => instance.set("count", count - 1),
            "save" => {
                instance.flash("status", format!("saved {count}"));
                instance.redirect("/counters");
                Ok(())
            }
            _ => Err(ActionError::UnknownMethod(method.to_string())),
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ProtocolConfig::from_file(path)?,
        None => ProtocolConfig::new("serve-components-demo-secret"),
    };
    let counter = Counter {
        schema: Arc::new(
            ComponentSchema::new("counter")
                .public("count", PropertyKind::Int, json!(0))
                .protected("visits", PropertyKind::Int, json!(0)),
        ),
    };
    let handler = config.build_handler(ComponentRegistry::new().register(counter))?;

    println!("🌀 Livestate - component server");
    println!("📡 Listening on 127.0.0.1:50051...\n");

    let sock = UdpSocket::bind("127.0.0.1:50051")?;
    let mut buf = vec![0u8; 65536]; // 64 KiB max datagram

    loop {
        let (size, src) = match sock.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) => {
                eprintln!("❌ Recv error: {}", e);
                continue;
            }
        };
        println!("📥 Received {} bytes from {}", size, src);

        let response = match serde_json::from_slice::<Envelope>(&buf[..size]) {
            Ok(Envelope::Mount { name, params }) => handler.mount_response(&name, &params),
            Ok(Envelope::Request(request)) => handler.respond(request),
            Err(e) => {
                tracing::warn!(%src, error = %e, "undecodable envelope");
                Rejection::new(RejectionKind::Malformed).into()
            }
        };
        match &response {
            WireResponse::Payload(payload) => println!(
                "   ✓ {} {} data={} gc={}",
                payload.name,
                payload.id,
                serde_json::to_string(&payload.data)?,
                payload.gc
            ),
            WireResponse::Rejected { error } => println!("   ✗ {:?} ({})", error.kind, error.status),
        }

        let bytes = wire::encode_response(&response)?;
        sock.send_to(&bytes, src)?;
        println!("   cached components: {}\n", handler.cache().len());
    }
}
