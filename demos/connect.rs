//! Example: Connect to a WattBox and print device status.

use wattbox_client::{ClientConfig, DeviceCapabilities, WattBox};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = ClientConfig::builder()
        .host("192.168.1.50")
        .credentials("wattbox", "wattbox")
        .build();

    println!("Connecting to WattBox...");
    let wattbox = WattBox::connect(config).await?;

    let info = wattbox.device_info().await?;
    println!("\n--- {} ({}) ---", info.system.model, info.system.hostname);
    println!("  Firmware:    {}", info.system.firmware);
    println!("  Service tag: {}", info.system.service_tag);

    println!("\n--- Outlets ({}) ---", info.outlets.len());
    for outlet in &info.outlets {
        println!(
            "  Outlet {:2}: {:20} on={} watts={}",
            outlet.index,
            outlet.name,
            outlet.status,
            outlet
                .power
                .map(|p| format!("{:.1}", p.power_watts))
                .unwrap_or_else(|| "-".into()),
        );
    }

    if info.capabilities.contains(DeviceCapabilities::POWER_METERING)
        && let Some(power) = &info.power_status
    {
        println!("\n--- Power ---");
        println!("  {:.1} W / {:.2} A / {:.1} V", power.power_watts, power.current_amps, power.voltage_volts);
    }

    if let Some(ups) = &info.ups_status {
        println!("\n--- UPS ---");
        println!("  Charge: {}%", ups.battery_charge);
        println!("  Runtime: {} min", ups.battery_runtime);
        println!("  On battery: {}", ups.power_lost);
    }

    wattbox.close().await;
    println!("\nDisconnected.");
    Ok(())
}
