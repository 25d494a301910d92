// Configuration file parser

//! Configuration file parsing and validation
//!
//! This module loads the TOML settings file and validates it into an
//! immutable [`Settings`] value: interface names safe for shell use, dotted
//! quad addresses, a DHCP range inside the access point's `/24`, and SSID and
//! passphrase lengths hostapd accepts.

use crate::command::validate_name;
use crate::error::{Error, Result};
use crate::types::Settings;
use serde::Deserialize;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration: ambient options plus the validated access point settings
#[derive(Debug, Clone)]
pub struct Config {
    pub general: GeneralConfig,
    pub settings: Settings,
}

/// General configuration options
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Upper bound for one `service`/`systemctl`/`whereis` call
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Upper bound for one `apt` call
    #[serde(default = "default_package_timeout")]
    pub package_timeout_secs: u64,
    /// Directory holding the phase record and its lock
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            command_timeout_secs: default_command_timeout(),
            package_timeout_secs: default_package_timeout(),
            state_dir: default_state_dir(),
        }
    }
}

impl GeneralConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn package_timeout(&self) -> Duration {
        Duration::from_secs(self.package_timeout_secs)
    }
}

/// On-disk layout of the configuration file
#[derive(Debug, Deserialize, Clone)]
struct ConfigFile {
    #[serde(default)]
    general: GeneralConfig,
    network_interfaces: InterfaceSection,
    access_point: AccessPointSection,
}

#[derive(Debug, Deserialize, Clone)]
struct InterfaceSection {
    ethernet_interface: String,
    wifi_interface: String,
    wifi_driver: String,
}

#[derive(Debug, Deserialize, Clone)]
struct AccessPointSection {
    ssid: String,
    passphrase: String,
    ip_address: String,
    dhcp_range_lower: String,
    dhcp_range_upper: String,
}

// Default values for configuration
fn default_log_level() -> String {
    "info".to_string()
}

fn default_command_timeout() -> u64 {
    30
}

fn default_package_timeout() -> u64 {
    900 // apt upgrade on a Raspberry Pi can take a while
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Load configuration from TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| Error::ConfigLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    parse_config(&contents).map_err(|e| match e {
        Error::ConfigLoad { reason, .. } => Error::ConfigLoad {
            path: path.to_path_buf(),
            reason,
        },
        other => other,
    })
}

/// Parse and validate configuration text
pub fn parse_config(contents: &str) -> Result<Config> {
    let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::ConfigLoad {
        path: PathBuf::new(),
        reason: e.to_string(),
    })?;

    validate_general(&file.general)?;
    let settings = validate_settings(&file.network_interfaces, &file.access_point)?;

    Ok(Config {
        general: file.general,
        settings,
    })
}

fn validate_general(general: &GeneralConfig) -> Result<()> {
    if general.command_timeout_secs == 0 {
        return Err(invalid("command_timeout_secs", "must be > 0"));
    }
    if general.package_timeout_secs == 0 {
        return Err(invalid("package_timeout_secs", "must be > 0"));
    }
    if general.state_dir.as_os_str().is_empty() {
        return Err(invalid("state_dir", "cannot be empty"));
    }
    Ok(())
}

/// Validate configuration values
fn validate_settings(
    interfaces: &InterfaceSection,
    access_point: &AccessPointSection,
) -> Result<Settings> {
    validate_name(&interfaces.ethernet_interface, "ethernet_interface")?;
    validate_name(&interfaces.wifi_interface, "wifi_interface")?;
    validate_name(&interfaces.wifi_driver, "wifi_driver")?;

    // hostapd limits: SSID 1..=32 octets, WPA passphrase 8..=63 printable ASCII
    let ssid = &access_point.ssid;
    if ssid.is_empty() || ssid.len() > 32 {
        return Err(invalid(
            "ssid",
            &format!("must be 1 to 32 bytes, got {}", ssid.len()),
        ));
    }
    if ssid.chars().any(char::is_control) {
        return Err(invalid("ssid", "cannot contain control characters"));
    }

    let passphrase = &access_point.passphrase;
    if !(8..=63).contains(&passphrase.len()) {
        return Err(invalid(
            "passphrase",
            &format!("must be 8 to 63 characters, got {}", passphrase.len()),
        ));
    }
    if !passphrase.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err(invalid("passphrase", "must be printable ASCII"));
    }

    let ip_address = parse_ipv4(&access_point.ip_address, "ip_address")?;
    let low = parse_ipv4(&access_point.dhcp_range_lower, "dhcp_range_lower")?;
    let high = parse_ipv4(&access_point.dhcp_range_upper, "dhcp_range_upper")?;

    if u32::from(low) > u32::from(high) {
        return Err(invalid(
            "dhcp_range_lower",
            &format!("{} is above dhcp_range_upper {}", low, high),
        ));
    }

    // Stanzas are rendered with a fixed /24 netmask
    for (field, addr) in [("dhcp_range_lower", low), ("dhcp_range_upper", high)] {
        if !same_slash24(ip_address, addr) {
            return Err(invalid(
                field,
                &format!("{} is outside {}/24", addr, ip_address),
            ));
        }
    }

    if (u32::from(low)..=u32::from(high)).contains(&u32::from(ip_address)) {
        return Err(invalid(
            "ip_address",
            &format!("{} lies inside the DHCP range {}-{}", ip_address, low, high),
        ));
    }

    Ok(Settings {
        ethernet_interface: interfaces.ethernet_interface.clone(),
        wifi_interface: interfaces.wifi_interface.clone(),
        wifi_driver: interfaces.wifi_driver.clone(),
        ssid: ssid.clone(),
        passphrase: passphrase.clone(),
        ip_address,
        dhcp_range_lower: low,
        dhcp_range_upper: high,
    })
}

/// Parse a dotted quad, rejecting anything else (CIDR suffixes, quotes, hostnames)
pub fn parse_ipv4(value: &str, field: &'static str) -> Result<Ipv4Addr> {
    value
        .parse::<Ipv4Addr>()
        .map_err(|_| invalid(field, &format!("'{}' is not a dotted-quad IPv4 address", value)))
}

fn same_slash24(a: Ipv4Addr, b: Ipv4Addr) -> bool {
    const MASK: u32 = !0u32 << 8;
    u32::from(a) & MASK == u32::from(b) & MASK
}

fn invalid(field: &'static str, reason: &str) -> Error {
    Error::InvalidSettings {
        field,
        reason: reason.to_string(),
    }
}
