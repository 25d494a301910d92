//! Backup and restore of the system files this tool modifies
//!
//! Every managed file gets at most one `<path>_original` copy, taken before
//! the first mutation and consumed by the restore. A file that did not exist
//! yet gets an empty `<path>_absent` marker instead, and restoring it deletes
//! whatever this tool wrote there. Copies go through a temporary file and a
//! rename so a crash never leaves a truncated backup that would later be
//! mistaken for the user's original configuration.

use crate::error::{Error, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Suffix appended to a live path to form its backup path
pub const BACKUP_SUFFIX: &str = "_original";

/// Suffix of the marker recording that a live file did not exist
pub const ABSENT_SUFFIX: &str = "_absent";

/// Files only this tool creates. Never backed up, deleted on restore.
pub const EPHEMERAL_FILES: [&str; 1] = ["/etc/sysctl.d/routed-ap.conf"];

/// System configuration files touched during activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagedFile {
    DhcpConfig,
    DnsDhcpConfig,
    ApDaemonConfig,
    ApDaemonEnvLink,
    ApDaemonInitScript,
}

impl ManagedFile {
    pub const ALL: [ManagedFile; 5] = [
        ManagedFile::DhcpConfig,
        ManagedFile::DnsDhcpConfig,
        ManagedFile::ApDaemonConfig,
        ManagedFile::ApDaemonEnvLink,
        ManagedFile::ApDaemonInitScript,
    ];

    /// Absolute path on a real system
    pub fn system_path(self) -> &'static str {
        match self {
            ManagedFile::DhcpConfig => "/etc/dhcpcd.conf",
            ManagedFile::DnsDhcpConfig => "/etc/dnsmasq.conf",
            ManagedFile::ApDaemonConfig => "/etc/hostapd/hostapd.conf",
            ManagedFile::ApDaemonEnvLink => "/etc/default/hostapd",
            ManagedFile::ApDaemonInitScript => "/etc/init.d/hostapd",
        }
    }

    pub fn role(self) -> &'static str {
        match self {
            ManagedFile::DhcpConfig => "dhcp_config",
            ManagedFile::DnsDhcpConfig => "dns_dhcp_config",
            ManagedFile::ApDaemonConfig => "ap_daemon_config",
            ManagedFile::ApDaemonEnvLink => "ap_daemon_env_link",
            ManagedFile::ApDaemonInitScript => "ap_daemon_init_script",
        }
    }
}

/// What [`ConfigFileStore::backup`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupOutcome {
    Created,
    AlreadyPresent,
    /// Live file did not exist; an absent marker was recorded
    RecordedAbsent,
}

/// Owns backup/restore of every [`ManagedFile`]
///
/// Paths resolve below `root`, which is `/` in production.
#[derive(Debug, Clone)]
pub struct ConfigFileStore {
    root: PathBuf,
}

impl ConfigFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store operating on the real filesystem
    pub fn system() -> Self {
        Self::new("/")
    }

    /// Map an absolute system path below the store root
    pub fn resolve(&self, system_path: &str) -> PathBuf {
        self.root.join(system_path.trim_start_matches('/'))
    }

    pub fn live_path(&self, file: ManagedFile) -> PathBuf {
        self.resolve(file.system_path())
    }

    pub fn backup_path(&self, file: ManagedFile) -> PathBuf {
        self.resolve(&format!("{}{}", file.system_path(), BACKUP_SUFFIX))
    }

    pub fn absent_path(&self, file: ManagedFile) -> PathBuf {
        self.resolve(&format!("{}{}", file.system_path(), ABSENT_SUFFIX))
    }

    pub fn has_backup(&self, file: ManagedFile) -> bool {
        self.backup_path(file).exists()
    }

    /// True if `file` did not exist before this tool first touched it
    pub fn has_absent_marker(&self, file: ManagedFile) -> bool {
        self.absent_path(file).exists()
    }

    /// Save the original state of `file` unless it was already recorded
    pub fn backup(&self, file: ManagedFile) -> Result<BackupOutcome> {
        let live = self.live_path(file);
        let backup = self.backup_path(file);
        let absent = self.absent_path(file);

        if backup.exists() || absent.exists() {
            log::info!("Original state of {} already recorded", live.display());
            return Ok(BackupOutcome::AlreadyPresent);
        }

        if !live.exists() {
            if let Some(parent) = absent.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::file_io(parent, e))?;
            }
            fs::write(&absent, b"").map_err(|e| Error::file_io(&absent, e))?;
            log::info!(
                "File {} not found, it will be removed on restore",
                live.display()
            );
            return Ok(BackupOutcome::RecordedAbsent);
        }

        copy_atomically(&live, &backup)?;
        log::info!(
            "Created backup of {} named {}",
            live.display(),
            backup.display()
        );
        Ok(BackupOutcome::Created)
    }

    /// Put `file` back into its recorded original state and drop the record
    ///
    /// A backed-up file gets its original bytes back; a file recorded as
    /// absent is deleted. Returns false when there was nothing to restore.
    pub fn restore(&self, file: ManagedFile) -> Result<bool> {
        let live = self.live_path(file);
        let backup = self.backup_path(file);
        let absent = self.absent_path(file);

        if backup.exists() {
            copy_atomically(&backup, &live)?;
            remove_if_exists(&backup)?;
            remove_if_exists(&absent)?;
            log::info!("Restored {} from backup", live.display());
            return Ok(true);
        }

        if absent.exists() {
            if remove_if_exists(&live)? {
                log::info!("Deleted {}, it did not exist originally", live.display());
            }
            remove_if_exists(&absent)?;
            return Ok(true);
        }

        log::debug!("No backup for {}, nothing to restore", live.display());
        Ok(false)
    }

    pub fn backup_all(&self) -> Result<()> {
        for file in ManagedFile::ALL {
            self.backup(file)?;
        }
        Ok(())
    }

    /// Restore every managed file, then delete the ephemeral files this tool creates
    pub fn restore_all(&self) -> Result<()> {
        for file in ManagedFile::ALL {
            self.restore(file)?;
        }

        for ephemeral in EPHEMERAL_FILES {
            let path = self.resolve(ephemeral);
            if remove_if_exists(&path)? {
                log::info!("Deleted {}", path.display());
            }
        }
        Ok(())
    }
}

/// Copy `src` over `dst` via a sibling temp file and rename
fn copy_atomically(src: &Path, dst: &Path) -> Result<()> {
    let file_name = dst
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dst.with_file_name(format!(".{}.tmp.{}", file_name, std::process::id()));

    if let Err(e) = fs::copy(src, &tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(Error::file_io(src, e));
    }
    fs::rename(&tmp, dst).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        Error::file_io(dst, e)
    })
}

/// Remove a file, treating "not found" as success. Returns whether a file was removed.
pub(crate) fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::file_io(path, e)),
    }
}
