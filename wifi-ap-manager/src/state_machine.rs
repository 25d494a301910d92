// Activation state machine

//! Activation state machine
//!
//! Sequences file backups, configuration writes and daemon commands through
//! `Idle -> Prepared -> Active` and back. The transition table is a pure
//! function ([`check_transition`]); the orchestrator persists the new phase
//! only after the side effects of a step went through, so an interrupted run
//! leaves the previous phase in place and `deactivate` can always roll back.

use crate::config_writer::{AccessPointConfig, ConfigWriter, DhcpRangeStanza, StaticIpStanza};
use crate::daemon::{report_statuses, LifecycleVerb, ServiceManager};
use crate::error::{Error, Result};
use crate::file_store::ConfigFileStore;
use crate::phase_store::{PhaseRecord, PhaseStore};
use crate::types::{ActivationPhase, Service, ServiceStatus, Settings};

/// Operations a caller can request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseRequest {
    /// Configure the static IP and restart dhcpcd
    Prepare,
    /// Bring up hostapd, then dnsmasq
    Activate,
    /// Prepare and activate in one run
    ActivateAll,
    /// Serve DHCP on the ethernet interface (no access point)
    DhcpAtEthernet,
    /// Stop everything and restore the original configuration
    Deactivate,
}

impl PhaseRequest {
    fn name(self) -> &'static str {
        match self {
            PhaseRequest::Prepare => "prepare",
            PhaseRequest::Activate => "activate",
            PhaseRequest::ActivateAll => "activate all",
            PhaseRequest::DhcpAtEthernet => "serve DHCP on ethernet",
            PhaseRequest::Deactivate => "deactivate",
        }
    }
}

/// Outcome of checking a request against the current phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Run the step
    Proceed,
    /// Already in the requested phase, nothing to do
    NoOp,
}

/// Reject a request for `interface` when the phase was reached on another one
fn check_interface(record: &PhaseRecord, request: PhaseRequest, interface: &str) -> Result<()> {
    match record.interface.as_deref() {
        Some(prepared) if prepared != interface => Err(Error::InterfaceMismatch {
            operation: request.name(),
            prepared: prepared.to_string(),
            requested: interface.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Decide whether `request` is legal from `phase`
pub fn check_transition(phase: ActivationPhase, request: PhaseRequest) -> Result<Transition> {
    use ActivationPhase::{Active, Idle, Prepared};

    let reject = |hint: &'static str| -> Result<Transition> {
        Err(Error::IllegalPhaseTransition {
            operation: request.name(),
            phase,
            hint,
        })
    };

    match (phase, request) {
        // Deactivation is always allowed
        (_, PhaseRequest::Deactivate) => Ok(Transition::Proceed),

        (Idle, PhaseRequest::Prepare)
        | (Idle, PhaseRequest::ActivateAll)
        | (Idle, PhaseRequest::DhcpAtEthernet)
        | (Prepared, PhaseRequest::Activate) => Ok(Transition::Proceed),

        (Active, PhaseRequest::Activate) => Ok(Transition::NoOp),

        (Idle, PhaseRequest::Activate) => reject("run `prepare` first"),

        // Re-running prepare would append the static IP stanza again
        (Prepared, PhaseRequest::Prepare) => {
            reject("already prepared, run `activate` to launch the access point")
        }
        (Prepared, PhaseRequest::ActivateAll) | (Prepared, PhaseRequest::DhcpAtEthernet) => {
            reject("already prepared, run `activate` or `deactivate-all`")
        }
        (Active, PhaseRequest::Prepare)
        | (Active, PhaseRequest::ActivateAll)
        | (Active, PhaseRequest::DhcpAtEthernet) => reject("already active, run `deactivate-all` first"),
    }
}

/// Orchestrates the three daemons through the activation phases
pub struct ActivationStateMachine<S> {
    settings: Settings,
    files: ConfigFileStore,
    phases: PhaseStore,
    services: S,
}

impl<S: ServiceManager> ActivationStateMachine<S> {
    pub fn new(settings: Settings, files: ConfigFileStore, phases: PhaseStore, services: S) -> Self {
        Self {
            settings,
            files,
            phases,
            services,
        }
    }

    /// Persisted phase
    pub fn phase(&self) -> Result<ActivationPhase> {
        self.phases.load()
    }

    fn check(&self, request: PhaseRequest) -> Result<()> {
        let phase = self.phases.load()?;
        log::debug!("Phase: {}, Request: {:?}", phase, request);
        check_transition(phase, request)?;
        Ok(())
    }

    /// Back up, stop the servers, set the static IP and restart dhcpcd
    pub async fn prepare(&self, interface: &str) -> Result<()> {
        self.check(PhaseRequest::Prepare)?;
        self.run_prepare(interface).await?;
        self.phases.store(ActivationPhase::Prepared, interface)?;
        log::info!("dhcpcd is prepared, now run `activate` to launch the access point");
        Ok(())
    }

    /// Start hostapd on `interface`, then serve DHCP on it
    ///
    /// `interface` must be the one `prepare` configured.
    pub async fn activate(&self, interface: &str) -> Result<()> {
        let record = self.phases.load_record()?;
        log::debug!("Phase: {:?}, Request: {:?}", record, PhaseRequest::Activate);
        let transition = check_transition(record.phase, PhaseRequest::Activate)?;
        check_interface(&record, PhaseRequest::Activate, interface)?;

        if transition == Transition::NoOp {
            log::info!("Access point is already active");
            return Ok(());
        }
        self.run_activate(interface).await?;
        self.phases.store(ActivationPhase::Active, interface)?;
        log::info!("Access point is active on {}", interface);
        Ok(())
    }

    /// `prepare` followed by `activate` in one run
    pub async fn activate_all(&self, interface: &str) -> Result<()> {
        self.check(PhaseRequest::ActivateAll)?;
        self.run_prepare(interface).await?;
        self.phases.store(ActivationPhase::Prepared, interface)?;
        self.run_activate(interface).await?;
        self.phases.store(ActivationPhase::Active, interface)?;
        log::info!("Access point is active on {}", interface);
        Ok(())
    }

    /// Static IP and DHCP server on the ethernet interface, without hostapd
    pub async fn dhcp_at_ethernet(&self) -> Result<()> {
        self.check(PhaseRequest::DhcpAtEthernet)?;
        let interface = self.settings.ethernet_interface.clone();

        self.run_prepare(&interface).await?;
        self.phases.store(ActivationPhase::Prepared, &interface)?;
        self.serve_dhcp(&interface).await?;
        self.phases.store(ActivationPhase::Active, &interface)?;
        log::info!("DHCP server is running on {}", interface);
        Ok(())
    }

    /// Stop all daemons and restore every file, from any phase
    ///
    /// Missing backups, missing markers and already-stopped daemons are
    /// tolerated. Only a failed restore of an existing backup is an error.
    pub async fn deactivate(&self) -> Result<()> {
        match self.phases.load() {
            Ok(phase) => log::info!("Deactivating (phase was {})", phase),
            Err(e) => log::warn!("Deactivating from unknown phase: {}", e),
        }

        for service in [Service::Dhcpcd, Service::Dnsmasq, Service::Hostapd] {
            self.lifecycle(service, LifecycleVerb::Stop).await?;
        }

        self.files.restore_all()?;
        self.phases.clear()?;
        log::info!("Access point deactivated, original configuration restored");
        Ok(())
    }

    /// Query and log the status of every daemon
    pub async fn report_statuses(&self) -> Vec<(Service, ServiceStatus)> {
        report_statuses(&self.services).await
    }

    async fn run_prepare(&self, interface: &str) -> Result<()> {
        log::info!("Preparing dhcpcd on {}", interface);
        self.files.backup_all()?;

        // Clear any stale claim on the interface
        self.lifecycle(Service::Dnsmasq, LifecycleVerb::Stop).await?;
        self.lifecycle(Service::Hostapd, LifecycleVerb::Stop).await?;

        ConfigWriter::new(&self.files).write_static_ip(&StaticIpStanza {
            interface,
            address: self.settings.ip_address,
        })?;
        self.lifecycle(Service::Dhcpcd, LifecycleVerb::Restart).await?;

        self.report_statuses().await;
        Ok(())
    }

    async fn run_activate(&self, interface: &str) -> Result<()> {
        // hostapd must own the interface before dnsmasq offers leases on it
        ConfigWriter::new(&self.files).write_access_point(&AccessPointConfig {
            interface,
            driver: &self.settings.wifi_driver,
            ssid: &self.settings.ssid,
            passphrase: &self.settings.passphrase,
        })?;
        self.lifecycle(Service::Hostapd, LifecycleVerb::Unmask).await?;
        self.lifecycle(Service::Hostapd, LifecycleVerb::Enable).await?;
        self.lifecycle(Service::Hostapd, LifecycleVerb::Start).await?;

        self.serve_dhcp(interface).await
    }

    async fn serve_dhcp(&self, interface: &str) -> Result<()> {
        ConfigWriter::new(&self.files).write_dhcp_range(&DhcpRangeStanza {
            interface,
            low: self.settings.dhcp_range_lower,
            high: self.settings.dhcp_range_upper,
        })?;
        self.lifecycle(Service::Dnsmasq, LifecycleVerb::Restart).await
    }

    /// Issue a lifecycle command, logging daemon command failures instead of propagating them
    async fn lifecycle(&self, service: Service, verb: LifecycleVerb) -> Result<()> {
        match self.services.lifecycle(service, verb).await {
            Err(e) if e.is_daemon_command_error() => {
                log::warn!("{} {} failed (continuing): {}", verb, service, e);
                Ok(())
            }
            other => other,
        }
    }
}
