// WiFi Access Point Manager CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::future::Future;
use std::path::PathBuf;
use tokio::signal;
use tokio::signal::unix::SignalKind;
use wifi_ap_manager::{
    command::SystemRunner,
    config::{load_config, Config},
    daemon::{report_statuses, DaemonController},
    dependencies::DependencyChecker,
    error::Error,
    file_store::ConfigFileStore,
    phase_store::PhaseStore,
    state_machine::ActivationStateMachine,
};

#[derive(Parser)]
#[command(name = "wifi-ap-manager")]
#[command(
    about = "Turn this host into a WiFi access point with DHCP, and restore it afterwards",
    long_about = None
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    /// Set the static IP and restart dhcpcd (slow). Run `activate` afterwards.
    Prepare,
    /// Start hostapd and dnsmasq. Requires a prior `prepare`.
    Activate,
    /// Prepare and activate in a single run
    ActivateAll,
    /// Stop dhcpcd, dnsmasq and hostapd and restore their original configuration
    DeactivateAll,
    /// Check that hostapd, dnsmasq and dhcpcd are installed
    CheckDependencies,
    /// Install missing dependencies with apt
    InstallDependencies,
    /// Show the status of dhcpcd, dnsmasq and hostapd
    CheckDaemonStatus,
    /// Serve DHCP on the ethernet interface instead of running an access point
    DhcpAtEthernetInterface,
}

impl Command {
    /// Commands that modify system files or daemon state
    fn is_mutating(self) -> bool {
        !matches!(
            self,
            Command::CheckDependencies | Command::CheckDaemonStatus
        )
    }
}

/// Run `operation`, aborting on SIGINT/SIGTERM
///
/// The phase record is only written after a step completes, so an aborted
/// step leaves the previous phase in place.
async fn run_interruptible<F>(operation: F) -> Result<()>
where
    F: Future<Output = wifi_ap_manager::Result<()>>,
{
    let mut sigterm =
        signal::unix::signal(SignalKind::terminate()).context("Failed to set up SIGTERM handler")?;

    tokio::select! {
        result = operation => result.map_err(Into::into),
        _ = signal::ctrl_c() => {
            log::warn!("Received SIGINT");
            anyhow::bail!("Interrupted; phase unchanged, run `deactivate-all` to roll back partial changes")
        }
        _ = sigterm.recv() => {
            log::warn!("Received SIGTERM");
            anyhow::bail!("Terminated; phase unchanged, run `deactivate-all` to roll back partial changes")
        }
    }
}

/// Run `operation` to the end, logging SIGINT/SIGTERM instead of dying on them
///
/// Children run in their own process group, so a terminal Ctrl-C reaches
/// only this process.
async fn run_to_completion<T, F>(operation: F) -> Result<T>
where
    F: Future<Output = wifi_ap_manager::Result<T>>,
{
    let mut sigint =
        signal::unix::signal(SignalKind::interrupt()).context("Failed to set up SIGINT handler")?;
    let mut sigterm =
        signal::unix::signal(SignalKind::terminate()).context("Failed to set up SIGTERM handler")?;

    tokio::pin!(operation);
    loop {
        tokio::select! {
            result = &mut operation => return result.map_err(Into::into),
            _ = sigint.recv() => log::warn!("Received SIGINT, finishing the current operation first"),
            _ = sigterm.recv() => log::warn!("Received SIGTERM, finishing the current operation first"),
        }
    }
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    if !nix::unistd::Uid::effective().is_root() {
        return Err(Error::Privilege.into());
    }

    // Load configuration
    let config = load_config(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.general.log_level),
    )
    .init();

    // One control flow: every external command is awaited in sequence
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args.command, config))
}

async fn async_main(command: Command, config: Config) -> Result<()> {
    log::debug!("Running {:?}", command);

    let phases = PhaseStore::new(&config.general.state_dir);
    let _lock = if command.is_mutating() {
        Some(phases.lock().context("Failed to acquire phase lock")?)
    } else {
        None
    };

    let runner = SystemRunner::new(config.general.command_timeout());
    let wifi = config.settings.wifi_interface.clone();

    match command {
        Command::CheckDependencies => {
            let checker = DependencyChecker::new(runner);
            checker.check().await?;
            println!("All dependencies are installed.");
        }

        Command::InstallDependencies => {
            let checker =
                DependencyChecker::new(SystemRunner::new(config.general.package_timeout()));
            // Aborting apt mid-install leaves dpkg locked
            let installed = run_to_completion(checker.install_missing())
                .await
                .context("Dependency installation failed")?;
            if installed.is_empty() {
                println!("All dependencies were installed already.");
            } else {
                println!("Installed: {}", installed.join(", "));
            }
        }

        Command::CheckDaemonStatus => {
            let controller = DaemonController::new(runner);
            for (service, status) in report_statuses(&controller).await {
                println!("{}: {}", service, status);
            }
        }

        Command::Prepare
        | Command::Activate
        | Command::ActivateAll
        | Command::DeactivateAll
        | Command::DhcpAtEthernetInterface => {
            let machine = ActivationStateMachine::new(
                config.settings,
                ConfigFileStore::system(),
                phases,
                DaemonController::new(runner),
            );

            match command {
                Command::Prepare => run_interruptible(machine.prepare(&wifi)).await?,
                Command::Activate => run_interruptible(machine.activate(&wifi)).await?,
                Command::ActivateAll => run_interruptible(machine.activate_all(&wifi)).await?,
                Command::DhcpAtEthernetInterface => {
                    run_interruptible(machine.dhcp_at_ethernet()).await?
                }
                // Deactivation is the rollback path, signals must not cut it short
                _ => run_to_completion(machine.deactivate()).await?,
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::{raise, Signal};
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_to_completion_outlives_signals() {
        let operation = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, Error>("restored")
        };
        let signals = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            raise(Signal::SIGINT).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            raise(Signal::SIGTERM).unwrap();
        };

        let (result, ()) = tokio::join!(run_to_completion(operation), signals);
        assert_eq!(result.unwrap(), "restored");
    }

    #[tokio::test]
    async fn test_run_to_completion_propagates_errors() {
        let result = run_to_completion(async { Err::<(), _>(Error::Privilege) }).await;
        assert!(result.unwrap_err().to_string().contains("root privileges"));
    }

    #[test]
    fn test_read_only_commands_skip_lock() {
        assert!(!Command::CheckDaemonStatus.is_mutating());
        assert!(!Command::CheckDependencies.is_mutating());
        assert!(Command::DeactivateAll.is_mutating());
        assert!(Command::InstallDependencies.is_mutating());
    }
}
