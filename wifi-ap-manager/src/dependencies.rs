//! Required package detection and installation
//!
//! Presence is checked with `whereis <binary>`; installation goes through
//! `apt` and only happens when explicitly requested.

use crate::command::{render_command, CommandRunner};
use crate::error::{Error, Result};

/// A Debian package and the binary that proves it is installed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    pub package: &'static str,
    pub binary: &'static str,
}

pub const REQUIRED: [Dependency; 3] = [
    Dependency {
        package: "hostapd",
        binary: "hostapd",
    },
    Dependency {
        package: "dnsmasq",
        binary: "dnsmasq",
    },
    Dependency {
        package: "dhcpcd5",
        binary: "dhcpcd",
    },
];

/// True if `whereis` listed at least one location for `binary`
///
/// `whereis` prints `name:` even when nothing was found, so an empty-output
/// check is not enough.
pub fn whereis_found(output: &str, binary: &str) -> bool {
    let prefix = format!("{}:", binary);
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix(prefix.as_str()))
        .any(|locations| !locations.trim().is_empty())
}

pub struct DependencyChecker<R> {
    runner: R,
}

impl<R: CommandRunner> DependencyChecker<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    pub async fn is_installed(&self, dependency: &Dependency) -> Result<bool> {
        let output = self.runner.run("whereis", &[dependency.binary]).await?;
        Ok(output.success() && whereis_found(&output.stdout, dependency.binary))
    }

    /// Packages whose binary could not be located
    pub async fn missing(&self) -> Result<Vec<&'static str>> {
        let mut missing = Vec::new();
        for dependency in &REQUIRED {
            if !self.is_installed(dependency).await? {
                log::info!("Dependency {} missing", dependency.package);
                missing.push(dependency.package);
            }
        }
        Ok(missing)
    }

    /// Fail with [`Error::DependencyMissing`] unless everything is installed
    pub async fn check(&self) -> Result<()> {
        let missing = self.missing().await?;
        if missing.is_empty() {
            log::info!("All dependencies are installed");
            Ok(())
        } else {
            Err(Error::DependencyMissing(
                missing.into_iter().map(String::from).collect(),
            ))
        }
    }

    /// Install every missing package. Returns the packages that were installed.
    pub async fn install_missing(&self) -> Result<Vec<&'static str>> {
        let missing = self.missing().await?;
        if missing.is_empty() {
            log::info!("All dependencies were installed already");
            return Ok(missing);
        }

        log::info!("Updating package lists");
        let refresh: [&[&str]; 2] = [&["update"], &["upgrade", "-y"]];
        for args in refresh {
            let output = self.runner.run("apt", args).await?;
            if !output.success() {
                log::warn!(
                    "`{}` failed: {}",
                    render_command("apt", args),
                    output.combined().trim()
                );
            }
        }

        for &package in &missing {
            log::info!("Installing dependency {}", package);
            let args = ["install", "-y", package];
            self.runner
                .run("apt", &args)
                .await?
                .into_checked(render_command("apt", &args))?;
        }
        Ok(missing)
    }
}
