use livestate_protocol::*;
use serde_json::{json, Value};
use std::net::UdpSocket;
use std::time::Duration;

fn exchange(sock: &UdpSocket, envelope: &Value) -> anyhow::Result<WireResponse> {
    sock.send(&serde_json::to_vec(envelope)?)?;
    let mut buf = vec![0u8; 65536];
    let size = sock.recv(&mut buf)?;
    Ok(wire::decode_response(&buf[..size])?)
}

fn mount(sock: &UdpSocket, store: &mut ClientStore, start: i64) -> anyhow::Result<ComponentId> {
    let response = exchange(sock, &json!({"mount": {"name": "counter", "params": [start]}}))?;
    let payload = match response {
        WireResponse::Payload(payload) => payload,
        WireResponse::Rejected { error } => anyhow::bail!("mount rejected: {}", error.message),
    };
    let id = payload.id.clone();
    store.add_component(payload);
    Ok(id)
}

fn act(sock: &UdpSocket, store: &mut ClientStore, id: &ComponentId, actions: Vec<Action>) -> anyhow::Result<()> {
    let request = store
        .build_request(id, actions)
        .ok_or_else(|| anyhow::anyhow!("component {id} is not mounted"))?;
    let response = exchange(sock, &json!({ "request": request }))?;
    match store.apply_response(response) {
        Ok(payload) => {
            println!("✅ data={} gc={}", serde_json::to_string(&payload.data)?, payload.gc);
            if let Some(to) = &payload.effects.redirect_to {
                println!("   ↪ redirect to {} with {} flash message(s)", to, payload.effects.flash.len());
            }
        }
        Err(rejection) => println!("❌ rejected: {:?} ({})", rejection.kind, rejection.status),
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    println!("🌀 Livestate - driving a remote counter");

    let sock = UdpSocket::bind("0.0.0.0:0")?;
    sock.connect("127.0.0.1:50051")?;
    sock.set_read_timeout(Some(Duration::from_secs(2)))?;

    let mut store = ClientStore::new();

    println!("\n1️⃣  Mounting two counters...");
    let first = mount(&sock, &mut store, 0)?;
    let second = mount(&sock, &mut store, 10)?;
    println!("   {} and {}", first, second);

    println!("\n2️⃣  Incrementing the first one twice...");
    act(&sock, &mut store, &first, vec![Action::call("increment", vec![])])?;
    act(&sock, &mut store, &first, vec![Action::call("increment", vec![])])?;

    println!("\n3️⃣  Tearing down the second one and reporting it...");
    store.remove_component(&second);
    act(&sock, &mut store, &first, vec![Action::call("save", vec![])])?;

    println!("\n4️⃣  Sending a tampered payload...");
    let mut request = store
        .build_request(&first, vec![])
        .ok_or_else(|| anyhow::anyhow!("component {first} is not mounted"))?;
    request.data.insert("count".to_string(), json!(999));
    let response = exchange(&sock, &json!({ "request": request }))?;
    if let Some(rejection) = response.rejection() {
        println!("❌ rejected as expected: {:?} ({})", rejection.kind, rejection.status);
    }

    println!("\n🎉 Done");
    Ok(())
}
