// Phase record persistence

//! Durable activation phase
//!
//! The phase lives in one small `KEY=VALUE` file that is replaced atomically
//! (temp file, fsync, rename), so a crash mid-write leaves either the old or
//! the new phase, never a mix. An exclusive `flock` on a sibling lock file
//! keeps two instances from mutating the system at the same time.

use crate::error::{Error, Result};
use crate::file_store::remove_if_exists;
use crate::types::ActivationPhase;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::time::SystemTime;

pub const PHASE_FILE: &str = ".ap_phase";
const LOCK_FILE: &str = ".ap_phase.lock";

// Marker pair written by earlier releases
const LEGACY_PREPARED_MARKER: &str = ".ap_is_prepared_marker";
const LEGACY_RUNNING_MARKER: &str = ".ap_is_running_marker";

/// Persisted phase plus the interface the phase was reached on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseRecord {
    pub phase: ActivationPhase,
    /// `None` for idle and for records left by the legacy markers
    pub interface: Option<String>,
}

impl PhaseRecord {
    fn idle() -> Self {
        Self {
            phase: ActivationPhase::Idle,
            interface: None,
        }
    }
}

/// Reads and writes the phase record in a state directory
#[derive(Debug, Clone)]
pub struct PhaseStore {
    dir: PathBuf,
}

/// Held for the duration of a mutating command; released on drop
#[derive(Debug)]
pub struct PhaseLock {
    _lock: Flock<File>,
}

impl PhaseStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(PHASE_FILE)
    }

    /// Current phase. A missing record means [`ActivationPhase::Idle`].
    pub fn load(&self) -> Result<ActivationPhase> {
        self.load_record().map(|record| record.phase)
    }

    /// Current phase and the interface it applies to
    pub fn load_record(&self) -> Result<PhaseRecord> {
        let path = self.path();
        match fs::read_to_string(&path) {
            Ok(content) => parse_record(&content).map_err(|reason| Error::CorruptPhaseRecord {
                path: path.clone(),
                reason,
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => self.load_legacy(),
            Err(e) => Err(Error::CorruptPhaseRecord {
                path,
                reason: e.to_string(),
            }),
        }
    }

    fn load_legacy(&self) -> Result<PhaseRecord> {
        let prepared = self.dir.join(LEGACY_PREPARED_MARKER).exists();
        let running = self.dir.join(LEGACY_RUNNING_MARKER).exists();

        let phase = match (prepared, running) {
            (false, false) => ActivationPhase::Idle,
            (true, false) => ActivationPhase::Prepared,
            (true, true) => ActivationPhase::Active,
            (false, true) => {
                return Err(Error::CorruptPhaseRecord {
                    path: self.dir.join(LEGACY_RUNNING_MARKER),
                    reason: "running marker without prepared marker".to_string(),
                })
            }
        };
        Ok(PhaseRecord {
            phase,
            interface: None,
        })
    }

    /// Persist `phase` reached on `interface`, replacing the previous record atomically
    pub fn store(&self, phase: ActivationPhase, interface: &str) -> Result<()> {
        let path = self.path();
        let tmp = self
            .dir
            .join(format!("{}.tmp.{}", PHASE_FILE, std::process::id()));

        // Get current timestamp
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let content = format!(
            "PHASE={}\nINTERFACE={}\nTIMESTAMP={}\n",
            phase, interface, timestamp
        );

        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp);
            return Err(Error::file_io(&tmp, e));
        }
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            Error::file_io(&path, e)
        })?;

        log::debug!(
            "Persisted phase {} on {} to {}",
            phase,
            interface,
            path.display()
        );
        Ok(())
    }

    /// Forget the phase (back to idle), including legacy markers
    pub fn clear(&self) -> Result<()> {
        for name in [PHASE_FILE, LEGACY_PREPARED_MARKER, LEGACY_RUNNING_MARKER] {
            remove_if_exists(&self.dir.join(name))?;
        }
        Ok(())
    }

    /// Take the exclusive lock, failing fast if another instance holds it
    pub fn lock(&self) -> Result<PhaseLock> {
        let path = self.dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| Error::file_io(&path, e))?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => Ok(PhaseLock { _lock: lock }),
            Err((_, Errno::EWOULDBLOCK)) => Err(Error::PhaseLocked(path)),
            Err((_, errno)) => Err(Error::file_io(&path, errno.into())),
        }
    }
}

fn parse_record(content: &str) -> std::result::Result<PhaseRecord, String> {
    let value = |key: &str| {
        content
            .lines()
            .find_map(|line| line.strip_prefix(key))
            .map(str::trim)
    };

    let phase: ActivationPhase = value("PHASE=")
        .ok_or_else(|| "no PHASE entry".to_string())?
        .parse()?;
    if phase == ActivationPhase::Idle {
        return Ok(PhaseRecord::idle());
    }

    // Records written before the interface was tracked have no INTERFACE line
    let interface = value("INTERFACE=")
        .filter(|name| !name.is_empty())
        .map(String::from);
    Ok(PhaseRecord { phase, interface })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_record_is_idle() {
        let dir = TempDir::new().unwrap();
        let store = PhaseStore::new(dir.path());
        assert_eq!(store.load().unwrap(), ActivationPhase::Idle);
    }

    #[test]
    fn test_store_then_load() {
        let dir = TempDir::new().unwrap();
        let store = PhaseStore::new(dir.path());

        store.store(ActivationPhase::Prepared, "wlan0").unwrap();
        assert_eq!(store.load().unwrap(), ActivationPhase::Prepared);

        store.store(ActivationPhase::Active, "wlan0").unwrap();
        assert_eq!(store.load().unwrap(), ActivationPhase::Active);

        let content = fs::read_to_string(store.path()).unwrap();
        assert!(content.starts_with("PHASE=active\nINTERFACE=wlan0\nTIMESTAMP="));
    }

    #[test]
    fn test_record_carries_interface() {
        let dir = TempDir::new().unwrap();
        let store = PhaseStore::new(dir.path());
        assert_eq!(store.load_record().unwrap(), PhaseRecord::idle());

        store.store(ActivationPhase::Prepared, "eth0").unwrap();
        assert_eq!(
            store.load_record().unwrap(),
            PhaseRecord {
                phase: ActivationPhase::Prepared,
                interface: Some("eth0".to_string()),
            }
        );
    }

    #[test]
    fn test_record_without_interface_line() {
        let dir = TempDir::new().unwrap();
        let store = PhaseStore::new(dir.path());
        fs::write(store.path(), "PHASE=prepared\nTIMESTAMP=1700000000\n").unwrap();
        assert_eq!(
            store.load_record().unwrap(),
            PhaseRecord {
                phase: ActivationPhase::Prepared,
                interface: None,
            }
        );
    }

    #[test]
    fn test_store_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = PhaseStore::new(dir.path());
        store.store(ActivationPhase::Prepared, "wlan0").unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![PHASE_FILE.to_string()]);
    }

    #[test]
    fn test_corrupt_record() {
        let dir = TempDir::new().unwrap();
        let store = PhaseStore::new(dir.path());

        fs::write(store.path(), "PHASE=halfway\n").unwrap();
        assert!(matches!(
            store.load(),
            Err(Error::CorruptPhaseRecord { .. })
        ));

        fs::write(store.path(), "").unwrap();
        assert!(matches!(
            store.load(),
            Err(Error::CorruptPhaseRecord { .. })
        ));
    }

    #[test]
    fn test_clear_returns_to_idle() {
        let dir = TempDir::new().unwrap();
        let store = PhaseStore::new(dir.path());

        store.store(ActivationPhase::Active, "wlan0").unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), ActivationPhase::Idle);

        // Clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_legacy_markers() {
        let dir = TempDir::new().unwrap();
        let store = PhaseStore::new(dir.path());
        let prepared = dir.path().join(LEGACY_PREPARED_MARKER);
        let running = dir.path().join(LEGACY_RUNNING_MARKER);

        fs::write(&prepared, "").unwrap();
        assert_eq!(store.load().unwrap(), ActivationPhase::Prepared);

        fs::write(&running, "").unwrap();
        assert_eq!(store.load().unwrap(), ActivationPhase::Active);
        assert_eq!(store.load_record().unwrap().interface, None);

        fs::remove_file(&prepared).unwrap();
        assert!(matches!(
            store.load(),
            Err(Error::CorruptPhaseRecord { .. })
        ));

        store.clear().unwrap();
        assert!(!running.exists());
        assert_eq!(store.load().unwrap(), ActivationPhase::Idle);
    }

    #[test]
    fn test_phase_file_wins_over_legacy_markers() {
        let dir = TempDir::new().unwrap();
        let store = PhaseStore::new(dir.path());
        fs::write(dir.path().join(LEGACY_PREPARED_MARKER), "").unwrap();
        store.store(ActivationPhase::Active, "wlan0").unwrap();
        assert_eq!(store.load().unwrap(), ActivationPhase::Active);
    }

    #[test]
    fn test_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let store = PhaseStore::new(dir.path());

        let first = store.lock().unwrap();
        assert!(matches!(store.lock(), Err(Error::PhaseLocked(_))));

        drop(first);
        assert!(store.lock().is_ok());
    }
}
