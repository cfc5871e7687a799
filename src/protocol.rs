// MIT License - Copyright (c) 2026 Peter Wright
// WattBox Integration Protocol v2.4 command catalogue

use std::time::Duration;

use crate::codec::{self, CommandKind};
use crate::constants::{EXIT_COMMAND, MAX_DELAY_SECS, MAX_OUTLET_NAME_LEN};
use crate::error::{Result, WattBoxError};
use crate::models::{
    OutletAction, OutletMode, OutletPower, PowerStatus, RebootOperation, UpsStatus,
};

/// Commands that can be sent to a WattBox.
///
/// Queries (`?Name`) are answered with `?Name=fields`; controls (`!Name=..`)
/// are answered with `OK`. Either may be answered with `#Error`.
///
/// A handful of controls make the device drop the session once accepted
/// (see [`Command::closes_session`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `?Firmware`: firmware version string.
    Firmware,
    /// `?Hostname`
    Hostname,
    /// `?ServiceTag`: serial number.
    ServiceTag,
    /// `?Model`: e.g. `WB-800VPS-IPVM-18`.
    Model,
    /// `?OutletCount`
    OutletCount,
    /// `?OutletStatus`: one `0|1` per outlet.
    OutletStatus,
    /// `?OutletName`: braced list of names.
    OutletNames,
    /// `?OutletPowerStatus=<n>`: `outlet,watts,amps,volts`.
    /// Only answered by models with per-outlet metering.
    OutletPowerStatus { outlet: u32 },
    /// `?PowerStatus`: `amps,watts,volts,safe`.
    PowerStatus,
    /// `?AutoReboot`: `0|1`.
    AutoReboot,
    /// `?UPSStatus`: seven fields, see [`parse_ups_status`].
    UpsStatus,
    /// `?UPSConnection`: `0|1`.
    UpsConnection,
    /// `!OutletSet=<n>,<ACTION>[,<delay>]`. Outlet `0` with `RESET` resets all.
    OutletSet {
        outlet: u32,
        action: OutletAction,
        delay: Option<u32>,
    },
    /// `!OutletNameSet=<n>,<name>`
    OutletNameSet { outlet: u32, name: String },
    /// `!OutletNameSetAll={name1},{name2},...`
    OutletNameSetAll { names: Vec<String> },
    /// `!OutletPowerOnDelaySet=<n>,<delay>` (1-600 s).
    OutletPowerOnDelaySet { outlet: u32, delay: u32 },
    /// `!OutletModeSet=<n>,<mode>`
    OutletModeSet { outlet: u32, mode: OutletMode },
    /// `!OutletRebootSet=<op>,<op>,...`: one operation per outlet.
    OutletRebootSet { operations: Vec<RebootOperation> },
    /// `!AutoReboot=<0|1>`
    SetAutoReboot { enabled: bool },
    /// `!AutoRebootTimeoutSet=<timeout>,<count>,<ping_delay>,<reboot_attempts>`
    AutoRebootTimeoutSet {
        timeout: u32,
        count: u32,
        ping_delay: u32,
        reboot_attempts: u32,
    },
    /// `!AccountSet=<user>,<password>`: the device ends the session afterwards.
    AccountSet { username: String, password: String },
    /// `!SetTelnet=<0|1>`
    SetTelnet { enabled: bool },
    /// `!WebServerSet=<0|1>`
    WebServerSet { enabled: bool },
    /// `!SetSDDP=<0|1>`
    SetSddp { enabled: bool },
    /// `!FirmwareUpdate=<url>`: the device ends the session afterwards.
    FirmwareUpdate { url: String },
    /// `!Reboot`: the device ends the session afterwards.
    Reboot,
    /// `!Exit`: end the session.
    Exit,
    /// Any command not listed above.
    Raw {
        kind: CommandKind,
        name: String,
        params: Vec<String>,
    },
}

impl Command {
    /// Build an arbitrary query.
    pub fn query(name: impl Into<String>, params: Vec<String>) -> Self {
        Command::Raw {
            kind: CommandKind::Query,
            name: name.into(),
            params,
        }
    }

    /// Build an arbitrary control command.
    pub fn control(name: impl Into<String>, params: Vec<String>) -> Self {
        Command::Raw {
            kind: CommandKind::Control,
            name: name.into(),
            params,
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Firmware
            | Command::Hostname
            | Command::ServiceTag
            | Command::Model
            | Command::OutletCount
            | Command::OutletStatus
            | Command::OutletNames
            | Command::OutletPowerStatus { .. }
            | Command::PowerStatus
            | Command::AutoReboot
            | Command::UpsStatus
            | Command::UpsConnection => CommandKind::Query,
            Command::Raw { kind, .. } => *kind,
            _ => CommandKind::Control,
        }
    }

    /// The command name as it appears on the wire (without sigil).
    pub fn name(&self) -> &str {
        match self {
            Command::Firmware => "Firmware",
            Command::Hostname => "Hostname",
            Command::ServiceTag => "ServiceTag",
            Command::Model => "Model",
            Command::OutletCount => "OutletCount",
            Command::OutletStatus => "OutletStatus",
            Command::OutletNames => "OutletName",
            Command::OutletPowerStatus { .. } => "OutletPowerStatus",
            Command::PowerStatus => "PowerStatus",
            Command::AutoReboot | Command::SetAutoReboot { .. } => "AutoReboot",
            Command::UpsStatus => "UPSStatus",
            Command::UpsConnection => "UPSConnection",
            Command::OutletSet { .. } => "OutletSet",
            Command::OutletNameSet { .. } => "OutletNameSet",
            Command::OutletNameSetAll { .. } => "OutletNameSetAll",
            Command::OutletPowerOnDelaySet { .. } => "OutletPowerOnDelaySet",
            Command::OutletModeSet { .. } => "OutletModeSet",
            Command::OutletRebootSet { .. } => "OutletRebootSet",
            Command::AutoRebootTimeoutSet { .. } => "AutoRebootTimeoutSet",
            Command::AccountSet { .. } => "AccountSet",
            Command::SetTelnet { .. } => "SetTelnet",
            Command::WebServerSet { .. } => "WebServerSet",
            Command::SetSddp { .. } => "SetSDDP",
            Command::FirmwareUpdate { .. } => "FirmwareUpdate",
            Command::Reboot => "Reboot",
            Command::Exit => EXIT_COMMAND,
            Command::Raw { name, .. } => name,
        }
    }

    /// Wire parameters, in order.
    pub fn params(&self) -> Vec<String> {
        match self {
            Command::OutletPowerStatus { outlet } => vec![outlet.to_string()],
            Command::OutletSet {
                outlet,
                action,
                delay,
            } => {
                let mut p = vec![outlet.to_string(), action.as_str().to_string()];
                if let Some(d) = delay {
                    p.push(d.to_string());
                }
                p
            }
            Command::OutletNameSet { outlet, name } => vec![outlet.to_string(), name.clone()],
            Command::OutletNameSetAll { names } => {
                names.iter().map(|n| format!("{{{}}}", n)).collect()
            }
            Command::OutletPowerOnDelaySet { outlet, delay } => {
                vec![outlet.to_string(), delay.to_string()]
            }
            Command::OutletModeSet { outlet, mode } => {
                vec![outlet.to_string(), mode.value().to_string()]
            }
            Command::OutletRebootSet { operations } => {
                operations.iter().map(|op| op.value().to_string()).collect()
            }
            Command::SetAutoReboot { enabled }
            | Command::SetTelnet { enabled }
            | Command::WebServerSet { enabled }
            | Command::SetSddp { enabled } => vec![flag(*enabled)],
            Command::AutoRebootTimeoutSet {
                timeout,
                count,
                ping_delay,
                reboot_attempts,
            } => vec![
                timeout.to_string(),
                count.to_string(),
                ping_delay.to_string(),
                reboot_attempts.to_string(),
            ],
            Command::AccountSet { username, password } => {
                vec![username.clone(), password.clone()]
            }
            Command::FirmwareUpdate { url } => vec![url.clone()],
            Command::Raw { params, .. } => params.clone(),
            _ => Vec::new(),
        }
    }

    /// Check parameter ranges that the device would otherwise reject with
    /// a bare `#Error`.
    pub fn validate(&self) -> Result<()> {
        match self {
            Command::OutletSet { action, delay, outlet } => {
                if *outlet == 0 && *action != OutletAction::Reset {
                    return Err(invalid(format!(
                        "outlet 0 (all outlets) only supports RESET, got {}",
                        action
                    )));
                }
                if let Some(d) = delay {
                    validate_delay(*d)?;
                }
            }
            Command::OutletPowerOnDelaySet { delay, outlet } => {
                validate_outlet_index(*outlet)?;
                validate_delay(*delay)?;
            }
            Command::OutletNameSet { name, outlet } => {
                validate_outlet_index(*outlet)?;
                validate_outlet_name(name)?;
            }
            Command::OutletNameSetAll { names } => {
                for name in names {
                    validate_outlet_name(name)?;
                }
            }
            Command::OutletModeSet { outlet, .. } | Command::OutletPowerStatus { outlet } => {
                validate_outlet_index(*outlet)?;
            }
            Command::AutoRebootTimeoutSet {
                timeout,
                count,
                ping_delay,
                reboot_attempts,
            } => validate_timeout_settings(*timeout, *count, *ping_delay, *reboot_attempts)?,
            Command::AccountSet { username, password } => {
                if username.is_empty() || password.is_empty() {
                    return Err(invalid("username and password must not be empty"));
                }
                if username.contains(',') || password.contains(',') {
                    return Err(invalid("credentials must not contain ','"));
                }
            }
            Command::FirmwareUpdate { url } => {
                if url.trim().is_empty() {
                    return Err(invalid("firmware URL must not be empty"));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Validate and encode to the `\n`-terminated wire line.
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.validate()?;
        codec::encode(self.kind(), self.name(), &self.params())
    }

    /// Convert the command to its wire string representation (no terminator).
    pub fn to_wire_string(&self) -> String {
        let mut s = String::new();
        s.push(self.kind().sigil());
        s.push_str(self.name());
        let params = self.params();
        if !params.is_empty() {
            s.push('=');
            s.push_str(&params.join(","));
        }
        s
    }

    /// Whether the device terminates the session after accepting this command.
    pub fn closes_session(&self) -> bool {
        matches!(
            self,
            Command::Reboot
                | Command::FirmwareUpdate { .. }
                | Command::AccountSet { .. }
                | Command::Exit
        )
    }

    /// A longer timeout for commands the device is slow to acknowledge.
    pub fn default_timeout(&self) -> Option<Duration> {
        match self {
            Command::Reboot => Some(Duration::from_secs(60)),
            Command::FirmwareUpdate { .. } => Some(Duration::from_secs(300)),
            Command::AccountSet { .. } => Some(Duration::from_secs(15)),
            _ => None,
        }
    }
}

/// Result of a successfully executed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `OK` for a control command.
    Ack,
    /// Fields of a `?Name=...` response.
    Values(Vec<String>),
}

impl Reply {
    pub fn into_values(self) -> Vec<String> {
        match self {
            Reply::Ack => Vec::new(),
            Reply::Values(v) => v,
        }
    }
}

fn flag(enabled: bool) -> String {
    String::from(if enabled { "1" } else { "0" })
}

fn invalid(msg: impl Into<String>) -> WattBoxError {
    WattBoxError::InvalidArgument(msg.into())
}

fn bad_response(details: impl Into<String>) -> WattBoxError {
    WattBoxError::InvalidResponse {
        details: details.into(),
    }
}

pub fn validate_outlet_index(outlet: u32) -> Result<()> {
    if outlet == 0 {
        return Err(invalid("outlet numbers start at 1"));
    }
    Ok(())
}

/// Check an outlet number against the device's outlet count.
pub fn validate_outlet_number(outlet: u32, outlet_count: u32) -> Result<()> {
    if outlet == 0 || outlet > outlet_count {
        return Err(invalid(format!(
            "outlet {} out of range 1-{}",
            outlet, outlet_count
        )));
    }
    Ok(())
}

pub fn validate_delay(delay: u32) -> Result<()> {
    if !(1..=MAX_DELAY_SECS).contains(&delay) {
        return Err(invalid(format!(
            "delay {} out of range 1-{} seconds",
            delay, MAX_DELAY_SECS
        )));
    }
    Ok(())
}

pub fn validate_timeout_settings(
    timeout: u32,
    count: u32,
    ping_delay: u32,
    reboot_attempts: u32,
) -> Result<()> {
    let checks = [
        ("timeout", timeout, 1..=60),
        ("count", count, 1..=10),
        ("ping delay", ping_delay, 1..=30),
        ("reboot attempts", reboot_attempts, 0..=10),
    ];
    for (what, value, range) in checks {
        if !range.contains(&value) {
            return Err(invalid(format!(
                "{} {} out of range {}-{}",
                what,
                value,
                range.start(),
                range.end()
            )));
        }
    }
    Ok(())
}

fn validate_outlet_name(name: &str) -> Result<()> {
    if name.contains(['{', '}', ',', '\r', '\n']) {
        return Err(invalid(format!(
            "outlet name {:?} contains reserved characters",
            name
        )));
    }
    if name.chars().count() > MAX_OUTLET_NAME_LEN {
        return Err(invalid(format!(
            "outlet name longer than {} characters",
            MAX_OUTLET_NAME_LEN
        )));
    }
    Ok(())
}

/// Strip characters the protocol reserves and truncate to the device limit.
pub fn sanitize_outlet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '{' | '}' | ',' | '\r' | '\n'))
        .take(MAX_OUTLET_NAME_LEN)
        .collect();
    cleaned.trim().to_string()
}

/// Parse the single value of a response, e.g. `?Model=WB-800` → `WB-800`.
pub fn parse_single(fields: &[String]) -> Result<String> {
    match fields {
        [value] => Ok(value.clone()),
        [] => Err(bad_response("empty response")),
        _ => Ok(fields.join(",")),
    }
}

pub fn parse_flag(fields: &[String]) -> Result<bool> {
    match parse_single(fields)?.as_str() {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(bad_response(format!("expected 0 or 1, got {:?}", other))),
    }
}

pub fn parse_count(fields: &[String]) -> Result<u32> {
    let value = parse_single(fields)?;
    value
        .parse()
        .map_err(|_| bad_response(format!("expected a count, got {:?}", value)))
}

/// `?OutletStatus=0,1,1,0` → one bool per outlet, in outlet order.
pub fn parse_outlet_status(fields: &[String]) -> Result<Vec<bool>> {
    fields
        .iter()
        .filter(|f| !f.is_empty())
        .map(|f| match f.as_str() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(bad_response(format!("invalid outlet state {:?}", other))),
        })
        .collect()
}

/// `?OutletPowerStatus=1,1.01,0.02,116.50` → watts, amps, volts for one outlet.
pub fn parse_outlet_power(fields: &[String]) -> Result<OutletPower> {
    let [outlet, watts, amps, volts] = fields else {
        return Err(bad_response(format!(
            "OutletPowerStatus expects 4 fields, got {}",
            fields.len()
        )));
    };
    Ok(OutletPower {
        outlet: parse_num(outlet, "outlet")?,
        power_watts: parse_num(watts, "watts")?,
        current_amps: parse_num(amps, "amps")?,
        voltage_volts: parse_num(volts, "volts")?,
    })
}

/// `?PowerStatus=60.00,600.00,110.00,1` → amps, watts, volts, safe-voltage.
pub fn parse_power_status(fields: &[String]) -> Result<PowerStatus> {
    let [amps, watts, volts, safe] = fields else {
        return Err(bad_response(format!(
            "PowerStatus expects 4 fields, got {}",
            fields.len()
        )));
    };
    Ok(PowerStatus {
        current_amps: parse_num(amps, "amps")?,
        power_watts: parse_num(watts, "watts")?,
        voltage_volts: parse_num(volts, "volts")?,
        safe_voltage: parse_num::<u8>(safe, "safe voltage")? == 1,
    })
}

/// `?UPSStatus=50,0,Good,False,25,True,False` → charge, load, health,
/// power lost, runtime (minutes), alarm enabled, alarm muted.
pub fn parse_ups_status(fields: &[String]) -> Result<UpsStatus> {
    let [charge, load, health, lost, runtime, alarm, muted] = fields else {
        return Err(bad_response(format!(
            "UPSStatus expects 7 fields, got {}",
            fields.len()
        )));
    };
    Ok(UpsStatus {
        battery_charge: parse_num(charge, "battery charge")?,
        battery_load: parse_num(load, "battery load")?,
        battery_health: health.clone(),
        power_lost: parse_bool_word(lost),
        battery_runtime: parse_num(runtime, "battery runtime")?,
        alarm_enabled: parse_bool_word(alarm),
        alarm_muted: parse_bool_word(muted),
    })
}

fn parse_num<T: std::str::FromStr>(value: &str, what: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| bad_response(format!("invalid {}: {:?}", what, value)))
}

fn parse_bool_word(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(s: &str) -> Vec<String> {
        s.split(',').map(String::from).collect()
    }

    #[test]
    fn test_command_wire_strings() {
        assert_eq!(Command::Firmware.to_wire_string(), "?Firmware");
        assert_eq!(Command::UpsStatus.to_wire_string(), "?UPSStatus");
        assert_eq!(
            Command::OutletPowerStatus { outlet: 3 }.to_wire_string(),
            "?OutletPowerStatus=3"
        );
        assert_eq!(
            Command::OutletSet {
                outlet: 5,
                action: OutletAction::Reset,
                delay: Some(10),
            }
            .to_wire_string(),
            "!OutletSet=5,RESET,10"
        );
        assert_eq!(
            Command::OutletSet {
                outlet: 1,
                action: OutletAction::On,
                delay: None,
            }
            .to_wire_string(),
            "!OutletSet=1,ON"
        );
        assert_eq!(
            Command::SetAutoReboot { enabled: true }.to_wire_string(),
            "!AutoReboot=1"
        );
        assert_eq!(Command::SetSddp { enabled: false }.to_wire_string(), "!SetSDDP=0");
        assert_eq!(Command::Reboot.to_wire_string(), "!Reboot");
        assert_eq!(Command::Exit.to_wire_string(), "!Exit");
    }

    #[test]
    fn test_outlet_name_set_all_wire_format() {
        let cmd = Command::OutletNameSetAll {
            names: vec!["Outlet 1".into(), "Outlet 2".into()],
        };
        assert_eq!(cmd.to_wire_string(), "!OutletNameSetAll={Outlet 1},{Outlet 2}");
        assert_eq!(cmd.encode().unwrap(), b"!OutletNameSetAll={Outlet 1},{Outlet 2}\n");
    }

    #[test]
    fn test_reboot_set_and_timeouts_wire_format() {
        let cmd = Command::OutletRebootSet {
            operations: vec![RebootOperation::Or, RebootOperation::And],
        };
        assert_eq!(cmd.to_wire_string(), "!OutletRebootSet=0,1");
        let cmd = Command::AutoRebootTimeoutSet {
            timeout: 30,
            count: 3,
            ping_delay: 10,
            reboot_attempts: 0,
        };
        assert_eq!(cmd.to_wire_string(), "!AutoRebootTimeoutSet=30,3,10,0");
        assert!(cmd.validate().is_ok());
    }

    #[test]
    fn test_kind_of_raw_and_typed() {
        assert_eq!(Command::Model.kind(), CommandKind::Query);
        assert_eq!(Command::Exit.kind(), CommandKind::Control);
        let raw = Command::query("OutletStatus", vec![]);
        assert_eq!(raw.kind(), CommandKind::Query);
        assert_eq!(raw.encode().unwrap(), b"?OutletStatus\n");
    }

    #[test]
    fn test_validation() {
        let too_long = Command::OutletSet {
            outlet: 1,
            action: OutletAction::Reset,
            delay: Some(601),
        };
        assert!(matches!(too_long.encode(), Err(WattBoxError::InvalidArgument(_))));

        let all_on = Command::OutletSet {
            outlet: 0,
            action: OutletAction::On,
            delay: None,
        };
        assert!(all_on.validate().is_err());

        let reset_all = Command::OutletSet {
            outlet: 0,
            action: OutletAction::Reset,
            delay: None,
        };
        assert!(reset_all.validate().is_ok());

        assert!(validate_timeout_settings(61, 1, 1, 0).is_err());
        assert!(validate_timeout_settings(1, 1, 1, 11).is_err());
        assert!(validate_outlet_number(9, 8).is_err());
        assert!(validate_outlet_number(8, 8).is_ok());
        assert!(
            Command::OutletNameSet {
                outlet: 1,
                name: "a,b".into()
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn test_closes_session() {
        assert!(Command::Reboot.closes_session());
        assert!(
            Command::FirmwareUpdate {
                url: "http://fw".into()
            }
            .closes_session()
        );
        assert!(!Command::OutletStatus.closes_session());
        assert_eq!(Command::Reboot.default_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(Command::Model.default_timeout(), None);
    }

    #[test]
    fn test_sanitize_outlet_name() {
        assert_eq!(sanitize_outlet_name("{TV}, Living\r\n"), "TV Living");
        let long = "x".repeat(40);
        assert_eq!(sanitize_outlet_name(&long).len(), MAX_OUTLET_NAME_LEN);
    }

    #[test]
    fn test_parse_outlet_status() {
        assert_eq!(
            parse_outlet_status(&fields("0,1,1,0")).unwrap(),
            vec![false, true, true, false]
        );
        assert!(parse_outlet_status(&fields("0,2")).is_err());
    }

    #[test]
    fn test_parse_power_status() {
        let ps = parse_power_status(&fields("60.00,600.00,110.00,1")).unwrap();
        assert_eq!(ps.current_amps, 60.0);
        assert_eq!(ps.power_watts, 600.0);
        assert_eq!(ps.voltage_volts, 110.0);
        assert!(ps.safe_voltage);
        assert!(parse_power_status(&fields("1,2,3")).is_err());
    }

    #[test]
    fn test_parse_outlet_power() {
        let op = parse_outlet_power(&fields("1,1.01,0.02,116.50")).unwrap();
        assert_eq!(op.outlet, 1);
        assert_eq!(op.power_watts, 1.01);
        assert_eq!(op.current_amps, 0.02);
        assert_eq!(op.voltage_volts, 116.5);
    }

    #[test]
    fn test_parse_ups_status() {
        let ups = parse_ups_status(&fields("50,0,Good,False,25,True,False")).unwrap();
        assert_eq!(ups.battery_charge, 50);
        assert_eq!(ups.battery_load, 0);
        assert!(ups.is_battery_good());
        assert!(!ups.power_lost);
        assert_eq!(ups.battery_runtime, 25);
        assert!(ups.alarm_enabled);
        assert!(!ups.alarm_muted);
        assert!(parse_ups_status(&fields("50,0,Good")).is_err());
    }

    #[test]
    fn test_parse_scalars() {
        assert_eq!(parse_count(&fields("18")).unwrap(), 18);
        assert!(parse_count(&fields("many")).is_err());
        assert!(parse_flag(&fields("1")).unwrap());
        assert!(parse_flag(&fields("x")).is_err());
        assert_eq!(parse_single(&fields("WB-800VPS-IPVM-18")).unwrap(), "WB-800VPS-IPVM-18");
        assert!(parse_single(&[]).is_err());
    }
}
