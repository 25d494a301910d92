// Shared types between components

//! Shared data structures
//!
//! Validated settings, the persisted activation phase, the managed daemons
//! and their classified status.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Validated access point settings, built once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub ethernet_interface: String,
    pub wifi_interface: String,
    pub wifi_driver: String,
    pub ssid: String,
    pub passphrase: String,
    pub ip_address: Ipv4Addr,
    pub dhcp_range_lower: Ipv4Addr,
    pub dhcp_range_upper: Ipv4Addr,
}

/// Activation phase persisted across process restarts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationPhase {
    Idle,     // Nothing touched (or everything restored)
    Prepared, // Static IP configured, dhcpcd restarted
    Active,   // hostapd and dnsmasq serving
}

impl ActivationPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivationPhase::Idle => "idle",
            ActivationPhase::Prepared => "prepared",
            ActivationPhase::Active => "active",
        }
    }
}

impl fmt::Display for ActivationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivationPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "idle" => Ok(ActivationPhase::Idle),
            "prepared" => Ok(ActivationPhase::Prepared),
            "active" => Ok(ActivationPhase::Active),
            other => Err(format!("unknown phase '{}'", other)),
        }
    }
}

/// The three daemons this tool drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Dhcpcd,
    Dnsmasq,
    Hostapd,
}

impl Service {
    /// Status reporting order
    pub const ALL: [Service; 3] = [Service::Hostapd, Service::Dnsmasq, Service::Dhcpcd];

    /// Unit name understood by `service` and `systemctl`
    pub fn unit_name(self) -> &'static str {
        match self {
            Service::Dhcpcd => "dhcpcd",
            Service::Dnsmasq => "dnsmasq",
            Service::Hostapd => "hostapd",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.unit_name())
    }
}

/// Daemon state as reported by the service manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Running,
    Failed,
    Stopped,
    Unknown, // Unrecognised output, not an error
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ServiceStatus::Running => "active (running)",
            ServiceStatus::Failed => "failed",
            ServiceStatus::Stopped => "inactive (dead)",
            ServiceStatus::Unknown => "unknown status",
        };
        f.write_str(text)
    }
}
