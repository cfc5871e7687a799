//! Example: Print outlet changes pushed by the device and connection events.

use wattbox_client::{ClientConfig, ClientEvent, Connection};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = ClientConfig::builder()
        .host("192.168.1.50")
        .credentials("wattbox", "wattbox")
        .build();

    let conn = Connection::connect(config).await?;

    let _guard = conn.on_unsolicited(|msg| {
        if let Some(states) = msg.outlet_states() {
            let on: Vec<usize> = states
                .iter()
                .enumerate()
                .filter(|(_, on)| **on)
                .map(|(i, _)| i + 1)
                .collect();
            println!("Outlets on: {:?}", on);
        } else {
            println!("Unsolicited: {}", msg);
        }
    });

    let mut events = conn.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ClientEvent::StateChanged { from, to } => println!("State: {} -> {}", from, to),
                ClientEvent::Reconnecting { attempt, delay } => {
                    println!("Reconnect #{} in {:?}", attempt, delay)
                }
                ClientEvent::Fault(reason) => println!("Fault: {}", reason),
                ClientEvent::Unsolicited(_) => {}
            }
        }
    });

    println!("Listening, press Ctrl+C to stop...");
    tokio::signal::ctrl_c().await?;
    conn.close().await;
    Ok(())
}
