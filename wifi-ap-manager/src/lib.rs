// WiFi Access Point Manager Library
// Shared modules for the CLI and tests

#![warn(missing_docs)]

//! WiFi Access Point Manager Library
//!
//! This library turns a Debian host into a wireless access point with DHCP
//! by configuring and restarting dhcpcd, hostapd and dnsmasq in a fixed
//! order, and restores the original network configuration on deactivation.
//!
//! # Main Components
//!
//! - [`config`]: Configuration file parsing and validation
//! - [`file_store`]: Backup and restore of modified system files
//! - [`daemon`]: Daemon lifecycle control and status classification
//! - [`config_writer`]: Rendering of dhcpcd, dnsmasq and hostapd configuration
//! - [`state_machine`]: Activation phases and their ordering
//! - [`phase_store`]: Durable phase record and instance lock
//! - [`dependencies`]: Required package detection and installation
//! - [`command`]: External command execution with timeouts
//! - [`types`]: Shared data structures

pub mod command;
pub mod config;
pub mod config_writer;
pub mod daemon;
pub mod dependencies;
pub mod error;
pub mod file_store;
pub mod phase_store;
pub mod state_machine;
pub mod types;

pub use error::{Error, Result};
