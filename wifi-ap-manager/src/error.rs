// Error kinds shared by every component

//! Library error type
//!
//! Structural errors (privilege, phase, configuration) and file I/O errors
//! abort the current command. Daemon command errors are produced here too but
//! the orchestrator only logs them.

use crate::types::ActivationPhase;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong while managing the access point
#[derive(Debug, Error)]
pub enum Error {
    /// Settings file missing, unreadable or not valid TOML
    #[error("failed to load configuration from {}: {reason}", .path.display())]
    ConfigLoad { path: PathBuf, reason: String },

    /// Settings parsed but a value is unusable
    #[error("invalid setting `{field}`: {reason}")]
    InvalidSettings { field: &'static str, reason: String },

    /// Not running as root
    #[error("please run this program with root privileges")]
    Privilege,

    /// Requested operation is not legal from the persisted phase
    #[error("cannot {operation} while the access point is {phase}: {hint}")]
    IllegalPhaseTransition {
        operation: &'static str,
        phase: ActivationPhase,
        hint: &'static str,
    },

    /// Phase was reached on a different interface than the one requested
    #[error("cannot {operation} on {requested}: the access point was prepared on {prepared}; run `deactivate-all` first")]
    InterfaceMismatch {
        operation: &'static str,
        prepared: String,
        requested: String,
    },

    /// Another instance is mutating the system right now
    #[error("another instance holds the phase lock {}", .0.display())]
    PhaseLocked(PathBuf),

    /// Phase file exists but cannot be interpreted
    #[error("phase record {} is unusable ({reason}); run `deactivate-all` to recover", .path.display())]
    CorruptPhaseRecord { path: PathBuf, reason: String },

    /// Backup, restore or config write failed
    #[error("file operation on {} failed: {source}", .path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// External command could not be started at all
    #[error("failed to execute `{command}`: {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// External command ran but reported failure
    #[error("`{command}` exited with {status}: {output}")]
    DaemonCommandFailure {
        command: String,
        status: String,
        output: String,
    },

    /// External command did not finish in time and was killed
    #[error("`{command}` timed out after {}s", .timeout.as_secs())]
    DaemonCommandTimeout { command: String, timeout: Duration },

    /// Required daemon packages are not installed
    #[error("required packages missing: {}", .0.join(", "))]
    DependencyMissing(Vec<String>),
}

impl Error {
    /// Wrap an I/O error with the path it happened on
    pub fn file_io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Error::FileIo {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// True for errors the orchestrator is allowed to swallow
    pub fn is_daemon_command_error(&self) -> bool {
        matches!(
            self,
            Error::CommandSpawn { .. }
                | Error::DaemonCommandFailure { .. }
                | Error::DaemonCommandTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_illegal_transition_message() {
        let err = Error::IllegalPhaseTransition {
            operation: "activate",
            phase: ActivationPhase::Idle,
            hint: "run `prepare` first",
        };
        assert_eq!(
            err.to_string(),
            "cannot activate while the access point is idle: run `prepare` first"
        );
    }

    #[test]
    fn test_timeout_is_distinct_from_failure() {
        let timeout = Error::DaemonCommandTimeout {
            command: "service dhcpcd restart".to_string(),
            timeout: Duration::from_secs(30),
        };
        let failure = Error::DaemonCommandFailure {
            command: "service dhcpcd restart".to_string(),
            status: "exit status: 1".to_string(),
            output: String::new(),
        };
        assert!(timeout.to_string().contains("timed out after 30s"));
        assert!(failure.to_string().contains("exited with exit status: 1"));
        assert!(timeout.is_daemon_command_error());
        assert!(failure.is_daemon_command_error());
    }

    #[test]
    fn test_structural_errors_are_not_swallowable() {
        assert!(!Error::Privilege.is_daemon_command_error());
        assert!(!Error::file_io("/etc/dhcpcd.conf", io::Error::other("disk full"))
            .is_daemon_command_error());
        assert!(!Error::DependencyMissing(vec!["hostapd".to_string()]).is_daemon_command_error());
    }

    #[test]
    fn test_interface_mismatch_names_both_interfaces() {
        let err = Error::InterfaceMismatch {
            operation: "activate",
            prepared: "eth0".to_string(),
            requested: "wlan0".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("on wlan0"));
        assert!(message.contains("prepared on eth0"));
        assert!(!err.is_daemon_command_error());
    }

    #[test]
    fn test_dependency_missing_lists_packages() {
        let err = Error::DependencyMissing(vec!["hostapd".to_string(), "dnsmasq".to_string()]);
        assert_eq!(err.to_string(), "required packages missing: hostapd, dnsmasq");
    }
}
