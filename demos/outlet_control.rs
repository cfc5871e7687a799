//! Example: Switch outlets and issue raw commands over TLS.

use std::time::Duration;

use wattbox_client::{
    ClientConfig, Connection, OutletAction, TlsConfig, TransportKind, WattBox,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = ClientConfig::builder()
        .host("192.168.1.50")
        .transport(TransportKind::Encrypted)
        .credentials("wattbox", "wattbox")
        .tls(TlsConfig {
            accept_invalid_certs: true,
            ..Default::default()
        })
        .command_timeout(Duration::from_secs(5))
        .build();

    let conn = Connection::connect(config).await?;
    let wattbox = WattBox::from_connection(conn.clone());

    println!("Turning outlet 2 off");
    wattbox.outlet_off(2).await?;
    tokio::time::sleep(Duration::from_secs(2)).await;

    println!("Power-cycling outlet 2 with a 5 s delay");
    wattbox.set_outlet(2, OutletAction::Reset, Some(5)).await?;

    // Concurrent callers share the one connection; replies stay in order.
    let (status, names) = tokio::join!(conn.query("OutletStatus", &[]), conn.query("OutletName", &[]));
    println!("Status: {:?}", status?);
    println!("Names:  {:?}", names?);

    conn.close().await;
    Ok(())
}
