// MIT License - Copyright (c) 2026 Peter Wright
// WattBox device models

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::WattBoxError;

/// Outlet control action for `!OutletSet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutletAction {
    On,
    Off,
    Toggle,
    /// Power-cycle the outlet (off, wait, on).
    Reset,
}

impl OutletAction {
    /// The wire string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
            Self::Toggle => "TOGGLE",
            Self::Reset => "RESET",
        }
    }
}

impl fmt::Display for OutletAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutletAction {
    type Err = WattBoxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ON" => Ok(Self::On),
            "OFF" => Ok(Self::Off),
            "TOGGLE" => Ok(Self::Toggle),
            "RESET" => Ok(Self::Reset),
            other => Err(WattBoxError::InvalidArgument(format!(
                "unknown outlet action: {}",
                other
            ))),
        }
    }
}

/// Outlet operating mode for `!OutletModeSet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OutletMode {
    Enabled,
    Disabled,
    ResetOnly,
}

impl OutletMode {
    pub fn value(&self) -> u8 {
        match self {
            Self::Enabled => 0,
            Self::Disabled => 1,
            Self::ResetOnly => 2,
        }
    }

    pub fn from_value(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Enabled),
            1 => Some(Self::Disabled),
            2 => Some(Self::ResetOnly),
            _ => None,
        }
    }
}

/// How host-monitoring timeouts combine when deciding to reboot an outlet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RebootOperation {
    /// Any selected host timing out triggers a reboot.
    Or,
    /// All selected hosts must time out.
    And,
}

impl RebootOperation {
    pub fn value(&self) -> u8 {
        match self {
            Self::Or => 0,
            Self::And => 1,
        }
    }
}

/// Power readings for a single outlet (`?OutletPowerStatus=n`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OutletPower {
    pub outlet: u32,
    pub power_watts: f64,
    pub current_amps: f64,
    pub voltage_volts: f64,
}

/// A single outlet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutletInfo {
    /// 1-based outlet index.
    pub index: u32,
    pub name: String,
    /// True when the outlet is powered.
    pub status: bool,
    pub power: Option<OutletPower>,
}

impl OutletInfo {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            name: format!("Outlet {}", index),
            status: false,
            power: None,
        }
    }
}

/// System-wide power readings (`?PowerStatus`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PowerStatus {
    pub current_amps: f64,
    pub power_watts: f64,
    pub voltage_volts: f64,
    pub safe_voltage: bool,
}

/// UPS readings (`?UPSStatus`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpsStatus {
    /// Battery charge, percent.
    pub battery_charge: u8,
    /// Battery load, percent.
    pub battery_load: u8,
    /// "Good" or "Bad".
    pub battery_health: String,
    pub power_lost: bool,
    /// Estimated runtime, minutes.
    pub battery_runtime: u32,
    pub alarm_enabled: bool,
    pub alarm_muted: bool,
}

impl UpsStatus {
    pub fn is_battery_good(&self) -> bool {
        self.battery_health.eq_ignore_ascii_case("good")
    }
}

/// Identity of the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemInfo {
    pub firmware: String,
    pub hostname: String,
    pub service_tag: String,
    pub model: String,
    pub outlet_count: u32,
}

bitflags! {
    /// Optional features detected while collecting device information.
    ///
    /// Not every model meters power or has a UPS port; a `#Error` answer to
    /// the corresponding query clears the flag instead of failing the
    /// whole collection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct DeviceCapabilities: u8 {
        /// `?PowerStatus` is answered
        const POWER_METERING  = 1 << 0;
        /// `?OutletPowerStatus=n` is answered
        const OUTLET_METERING = 1 << 1;
        /// A UPS is attached and `?UPSStatus` is answered
        const UPS             = 1 << 2;
    }
}

/// Complete device snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub system: SystemInfo,
    pub outlets: Vec<OutletInfo>,
    pub power_status: Option<PowerStatus>,
    pub ups_status: Option<UpsStatus>,
    pub ups_connected: bool,
    pub auto_reboot_enabled: bool,
    pub capabilities: DeviceCapabilities,
    pub collected_at: DateTime<Utc>,
}

/// An asynchronous `~Name=fields` notification from the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnsolicitedMessage {
    pub name: String,
    pub fields: Vec<String>,
    pub received_at: DateTime<Utc>,
}

impl UnsolicitedMessage {
    pub fn new(name: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            name: name.into(),
            fields,
            received_at: Utc::now(),
        }
    }

    /// Outlet states carried by an `~OutletStatus` notification.
    pub fn outlet_states(&self) -> Option<Vec<bool>> {
        if self.name != "OutletStatus" {
            return None;
        }
        crate::protocol::parse_outlet_status(&self.fields).ok()
    }
}

impl fmt::Display for UnsolicitedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "~{}={}", self.name, self.fields.join(","))
    }
}
