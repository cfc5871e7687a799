// MIT License - Copyright (c) 2026 Peter Wright
// Typed WattBox operations

use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::connection::{CallbackGuard, Connection, ConnectionState};
use crate::error::{Result, WattBoxError};
use crate::event::EventReceiver;
use crate::models::{
    DeviceCapabilities, DeviceInfo, OutletAction, OutletInfo, OutletMode, OutletPower,
    PowerStatus, RebootOperation, SystemInfo, UnsolicitedMessage, UpsStatus,
};
use crate::protocol::{
    parse_count, parse_flag, parse_outlet_power, parse_outlet_status, parse_power_status,
    parse_single, parse_ups_status, sanitize_outlet_name, validate_outlet_number, Command,
};

/// The main public API for controlling a WattBox.
///
/// Wraps a [`Connection`] with typed queries and outlet controls. All
/// methods may be called concurrently from clones of the connection.
///
/// # Example
///
/// ```no_run
/// use wattbox_client::{ClientConfig, OutletAction, WattBox};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = ClientConfig::builder()
///         .host("192.168.1.50")
///         .credentials("wattbox", "wattbox")
///         .build();
///
///     let wattbox = WattBox::connect(config).await?;
///
///     for outlet in wattbox.outlets().await? {
///         println!("{:>2} {:<20} {}", outlet.index, outlet.name, outlet.status);
///     }
///
///     // Power-cycle outlet 3
///     wattbox.set_outlet(3, OutletAction::Reset, None).await?;
///
///     wattbox.close().await;
///     Ok(())
/// }
/// ```
pub struct WattBox {
    conn: Connection,
    outlet_count: RwLock<Option<u32>>,
}

impl WattBox {
    /// Connect, log in and return once the device is ready.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        Ok(Self::from_connection(Connection::connect(config).await?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            outlet_count: RwLock::new(None),
        }
    }

    /// The underlying connection, for raw commands.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// Subscribe to connection events.
    pub fn subscribe(&self) -> EventReceiver {
        self.conn.subscribe()
    }

    pub fn on_unsolicited<F>(&self, callback: F) -> CallbackGuard
    where
        F: Fn(UnsolicitedMessage) + Send + 'static,
    {
        self.conn.on_unsolicited(callback)
    }

    pub async fn close(&self) {
        self.conn.close().await;
    }

    async fn values(&self, command: Command) -> Result<Vec<String>> {
        Ok(self.conn.execute(command).await?.into_values())
    }

    async fn ack(&self, command: Command) -> Result<()> {
        self.conn.execute(command).await?;
        Ok(())
    }

    // --- Identity ---

    pub async fn firmware(&self) -> Result<String> {
        parse_single(&self.values(Command::Firmware).await?)
    }

    pub async fn hostname(&self) -> Result<String> {
        parse_single(&self.values(Command::Hostname).await?)
    }

    pub async fn service_tag(&self) -> Result<String> {
        parse_single(&self.values(Command::ServiceTag).await?)
    }

    pub async fn model(&self) -> Result<String> {
        parse_single(&self.values(Command::Model).await?)
    }

    /// Number of outlets. Cached after the first successful query.
    pub async fn outlet_count(&self) -> Result<u32> {
        if let Some(count) = *self.outlet_count.read().await {
            return Ok(count);
        }
        let count = parse_count(&self.values(Command::OutletCount).await?)?;
        *self.outlet_count.write().await = Some(count);
        Ok(count)
    }

    pub async fn system_info(&self) -> Result<SystemInfo> {
        Ok(SystemInfo {
            firmware: self.firmware().await?,
            hostname: self.hostname().await?,
            service_tag: self.service_tag().await?,
            model: self.model().await?,
            outlet_count: self.outlet_count().await?,
        })
    }

    // --- Outlets ---

    /// On/off state of every outlet, in outlet order.
    pub async fn outlet_status(&self) -> Result<Vec<bool>> {
        parse_outlet_status(&self.values(Command::OutletStatus).await?)
    }

    pub async fn outlet_names(&self) -> Result<Vec<String>> {
        self.values(Command::OutletNames).await
    }

    /// Names and states of all outlets.
    pub async fn outlets(&self) -> Result<Vec<OutletInfo>> {
        let states = self.outlet_status().await?;
        let names = self.outlet_names().await?;
        Ok(states
            .iter()
            .enumerate()
            .map(|(i, &status)| {
                let index = i as u32 + 1;
                let mut outlet = OutletInfo::new(index);
                if let Some(name) = names.get(i).filter(|n| !n.is_empty()) {
                    outlet.name = name.clone();
                }
                outlet.status = status;
                outlet
            })
            .collect())
    }

    /// Power readings for one outlet. Not every model meters outlets.
    pub async fn outlet_power(&self, outlet: u32) -> Result<OutletPower> {
        self.check_outlet(outlet).await?;
        parse_outlet_power(&self.values(Command::OutletPowerStatus { outlet }).await?)
    }

    /// Switch an outlet. `delay` (1-600 s) applies to `Reset`.
    pub async fn set_outlet(
        &self,
        outlet: u32,
        action: OutletAction,
        delay: Option<u32>,
    ) -> Result<()> {
        self.check_outlet(outlet).await?;
        info!("Outlet {} -> {}", outlet, action);
        self.ack(Command::OutletSet {
            outlet,
            action,
            delay,
        })
        .await
    }

    pub async fn outlet_on(&self, outlet: u32) -> Result<()> {
        self.set_outlet(outlet, OutletAction::On, None).await
    }

    pub async fn outlet_off(&self, outlet: u32) -> Result<()> {
        self.set_outlet(outlet, OutletAction::Off, None).await
    }

    pub async fn outlet_toggle(&self, outlet: u32) -> Result<()> {
        self.set_outlet(outlet, OutletAction::Toggle, None).await
    }

    pub async fn outlet_reset(&self, outlet: u32) -> Result<()> {
        self.set_outlet(outlet, OutletAction::Reset, None).await
    }

    /// Power-cycle every resettable outlet.
    pub async fn reset_all_outlets(&self) -> Result<()> {
        info!("Resetting all outlets");
        self.ack(Command::OutletSet {
            outlet: 0,
            action: OutletAction::Reset,
            delay: None,
        })
        .await
    }

    /// Rename an outlet. Reserved characters are removed and the name is
    /// truncated to the device limit.
    pub async fn set_outlet_name(&self, outlet: u32, name: &str) -> Result<()> {
        self.check_outlet(outlet).await?;
        let name = sanitize_outlet_name(name);
        if name.is_empty() {
            return Err(WattBoxError::InvalidArgument(
                "outlet name is empty after removing reserved characters".into(),
            ));
        }
        self.ack(Command::OutletNameSet { outlet, name }).await
    }

    /// Rename every outlet at once, in outlet order.
    pub async fn set_outlet_names(&self, names: &[&str]) -> Result<()> {
        let names = names.iter().map(|n| sanitize_outlet_name(n)).collect();
        self.ack(Command::OutletNameSetAll { names }).await
    }

    pub async fn set_outlet_mode(&self, outlet: u32, mode: OutletMode) -> Result<()> {
        self.check_outlet(outlet).await?;
        self.ack(Command::OutletModeSet { outlet, mode }).await
    }

    /// Delay (1-600 s) before an outlet powers on after the device starts.
    pub async fn set_power_on_delay(&self, outlet: u32, delay: u32) -> Result<()> {
        self.check_outlet(outlet).await?;
        self.ack(Command::OutletPowerOnDelaySet { outlet, delay })
            .await
    }

    /// One host-monitoring operation per outlet, in outlet order.
    pub async fn set_reboot_operations(&self, operations: Vec<RebootOperation>) -> Result<()> {
        self.ack(Command::OutletRebootSet { operations }).await
    }

    async fn check_outlet(&self, outlet: u32) -> Result<()> {
        let count = self.outlet_count().await?;
        validate_outlet_number(outlet, count)
    }

    // --- Power / UPS ---

    pub async fn power_status(&self) -> Result<PowerStatus> {
        parse_power_status(&self.values(Command::PowerStatus).await?)
    }

    pub async fn ups_connected(&self) -> Result<bool> {
        parse_flag(&self.values(Command::UpsConnection).await?)
    }

    pub async fn ups_status(&self) -> Result<UpsStatus> {
        parse_ups_status(&self.values(Command::UpsStatus).await?)
    }

    // --- Auto reboot ---

    pub async fn auto_reboot(&self) -> Result<bool> {
        parse_flag(&self.values(Command::AutoReboot).await?)
    }

    pub async fn set_auto_reboot(&self, enabled: bool) -> Result<()> {
        self.ack(Command::SetAutoReboot { enabled }).await
    }

    /// Host-monitoring thresholds: ping timeout (1-60 s), failed pings
    /// before acting (1-10), delay between pings (1-30 s) and reboot
    /// attempts (0-10, 0 = unlimited).
    pub async fn set_auto_reboot_timeouts(
        &self,
        timeout: u32,
        count: u32,
        ping_delay: u32,
        reboot_attempts: u32,
    ) -> Result<()> {
        self.ack(Command::AutoRebootTimeoutSet {
            timeout,
            count,
            ping_delay,
            reboot_attempts,
        })
        .await
    }

    // --- System ---

    /// Reboot the device. It drops the session; the connection reconnects
    /// once the device is back.
    pub async fn reboot(&self) -> Result<()> {
        warn!("Rebooting device");
        self.ack(Command::Reboot).await?;
        *self.outlet_count.write().await = None;
        Ok(())
    }

    /// Collect everything the device reports.
    ///
    /// Metering and UPS queries answered with `#Error` are treated as
    /// unsupported by this model rather than failing the collection.
    pub async fn device_info(&self) -> Result<DeviceInfo> {
        debug!("Collecting device information");
        let system = self.system_info().await?;
        let mut outlets = self.outlets().await?;
        let mut capabilities = DeviceCapabilities::empty();

        if let Some(first) = outlets.first().map(|o| o.index) {
            match unsupported_as_none(self.outlet_power(first).await)? {
                Some(power) => {
                    capabilities |= DeviceCapabilities::OUTLET_METERING;
                    outlets[0].power = Some(power);
                    for outlet in outlets.iter_mut().skip(1) {
                        outlet.power = unsupported_as_none(self.outlet_power(outlet.index).await)?;
                    }
                }
                None => debug!("Model does not meter outlets"),
            }
        }

        let power_status = unsupported_as_none(self.power_status().await)?;
        if power_status.is_some() {
            capabilities |= DeviceCapabilities::POWER_METERING;
        }

        let ups_connected = unsupported_as_none(self.ups_connected().await)?.unwrap_or(false);
        let ups_status = if ups_connected {
            unsupported_as_none(self.ups_status().await)?
        } else {
            None
        };
        if ups_status.is_some() {
            capabilities |= DeviceCapabilities::UPS;
        }

        let auto_reboot_enabled = unsupported_as_none(self.auto_reboot().await)?.unwrap_or(false);

        Ok(DeviceInfo {
            system,
            outlets,
            power_status,
            ups_status,
            ups_connected,
            auto_reboot_enabled,
            capabilities,
            collected_at: Utc::now(),
        })
    }

    /// Wait until the connection is ready, e.g. after [`WattBox::reboot`].
    pub async fn wait_ready(&self, wait: Duration) -> Result<()> {
        self.conn.ensure_ready(wait).await
    }
}

/// Map a `#Error` answer to `None`; other errors still fail.
fn unsupported_as_none<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(WattBoxError::Device { command }) => {
            debug!("{} not supported", command);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_as_none() {
        let unsupported: Result<u32> = Err(WattBoxError::Device {
            command: "?UPSStatus".into(),
        });
        assert!(unsupported_as_none(unsupported).unwrap().is_none());
        assert_eq!(unsupported_as_none(Ok(5)).unwrap(), Some(5));
        assert!(unsupported_as_none::<u32>(Err(WattBoxError::Closed)).is_err());
    }
}
