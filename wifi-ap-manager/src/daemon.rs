// Daemon lifecycle controller

//! Daemon lifecycle control and status classification
//!
//! Wraps `service` and `systemctl` for dhcpcd, dnsmasq and hostapd. Lifecycle
//! verbs report failure to the caller, which logs and moves on: these daemons
//! are often already in the requested state and redundant stop/start calls
//! are expected to fail harmlessly.

use crate::command::{render_command, CommandRunner};
use crate::error::Result;
use crate::types::{Service, ServiceStatus};
use std::fmt;

const RUNNING_MARKER: &str = "Active: active (running)";
const FAILED_MARKER: &str = "Active: failed";
const STOPPED_MARKER: &str = "Active: inactive (dead)";

/// Lifecycle operations on a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleVerb {
    Start,
    Stop,
    Restart,
    Enable,
    Unmask,
}

impl LifecycleVerb {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleVerb::Start => "start",
            LifecycleVerb::Stop => "stop",
            LifecycleVerb::Restart => "restart",
            LifecycleVerb::Enable => "enable",
            LifecycleVerb::Unmask => "unmask",
        }
    }
}

impl fmt::Display for LifecycleVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a service manager status report
///
/// Matches known substrings in priority order; anything unfamiliar is
/// [`ServiceStatus::Unknown`].
pub fn classify_status(output: &str) -> ServiceStatus {
    if output.contains(RUNNING_MARKER) {
        ServiceStatus::Running
    } else if output.contains(FAILED_MARKER) {
        ServiceStatus::Failed
    } else if output.contains(STOPPED_MARKER) {
        ServiceStatus::Stopped
    } else {
        ServiceStatus::Unknown
    }
}

/// The system's service manager as seen by the orchestrator
#[allow(async_fn_in_trait)]
pub trait ServiceManager {
    /// Issue one lifecycle command
    async fn lifecycle(&self, service: Service, verb: LifecycleVerb) -> Result<()>;

    /// Query and classify the unit's status
    async fn status(&self, service: Service) -> ServiceStatus;

    async fn start(&self, service: Service) -> Result<()> {
        self.lifecycle(service, LifecycleVerb::Start).await
    }

    async fn stop(&self, service: Service) -> Result<()> {
        self.lifecycle(service, LifecycleVerb::Stop).await
    }

    async fn restart(&self, service: Service) -> Result<()> {
        self.lifecycle(service, LifecycleVerb::Restart).await
    }

    async fn enable(&self, service: Service) -> Result<()> {
        self.lifecycle(service, LifecycleVerb::Enable).await
    }

    async fn unmask(&self, service: Service) -> Result<()> {
        self.lifecycle(service, LifecycleVerb::Unmask).await
    }
}

/// Query every managed daemon and log one line per service
pub async fn report_statuses<S: ServiceManager>(manager: &S) -> Vec<(Service, ServiceStatus)> {
    log::info!("Checking daemon statuses");
    let mut statuses = Vec::with_capacity(Service::ALL.len());
    for service in Service::ALL {
        let status = manager.status(service).await;
        match status {
            ServiceStatus::Running | ServiceStatus::Stopped => {
                log::info!("{}: {}", service, status)
            }
            ServiceStatus::Failed | ServiceStatus::Unknown => {
                log::warn!("{}: {}", service, status)
            }
        }
        statuses.push((service, status));
    }
    statuses
}

/// [`ServiceManager`] backed by `service` and `systemctl`
pub struct DaemonController<R> {
    runner: R,
}

impl<R: CommandRunner> DaemonController<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Program and arguments for a lifecycle verb
    ///
    /// Restarts go through `service` (works for both SysV scripts and systemd
    /// units on Debian); the rest need `systemctl`.
    fn lifecycle_command(service: Service, verb: LifecycleVerb) -> (&'static str, [&'static str; 2]) {
        match verb {
            LifecycleVerb::Restart => ("service", [service.unit_name(), verb.as_str()]),
            _ => ("systemctl", [verb.as_str(), service.unit_name()]),
        }
    }
}

impl<R: CommandRunner> ServiceManager for DaemonController<R> {
    async fn lifecycle(&self, service: Service, verb: LifecycleVerb) -> Result<()> {
        let (program, args) = Self::lifecycle_command(service, verb);
        log::info!("{} {}", verb, service);

        let output = self.runner.run(program, &args).await?;
        output.into_checked(render_command(program, &args))?;
        Ok(())
    }

    async fn status(&self, service: Service) -> ServiceStatus {
        let args = [service.unit_name(), "status"];
        // `service ... status` exits non-zero for stopped units, only the text matters
        match self.runner.run("service", &args).await {
            Ok(output) => classify_status(&output.combined()),
            Err(e) => {
                log::warn!("Failed to query status of {}: {}", service, e);
                ServiceStatus::Unknown
            }
        }
    }
}
