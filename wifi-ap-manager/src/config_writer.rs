//! Daemon configuration rendering and writing
//!
//! Each daemon fragment is a small record with its own renderer. dhcpcd and
//! dnsmasq fragments are appended to the live file (which may carry unrelated
//! settings) at most once; hostapd files are rewritten whole.

use crate::error::{Error, Result};
use crate::file_store::{ConfigFileStore, ManagedFile};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::net::Ipv4Addr;

/// Line in the hostapd init script that ships without a value
pub const DAEMON_CONF_MARKER: &str = "DAEMON_CONF=";

/// Channel the access point beacons on
pub const AP_CHANNEL: u8 = 7;

/// dhcpcd stanza binding a static address to an interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticIpStanza<'a> {
    pub interface: &'a str,
    pub address: Ipv4Addr,
}

impl StaticIpStanza<'_> {
    /// `nohook wpa_supplicant` keeps dhcpcd from fighting hostapd over the link
    pub fn render(&self) -> String {
        format!(
            "interface {}\n    static ip_address={}/24\n    nohook wpa_supplicant\n",
            self.interface, self.address
        )
    }
}

/// dnsmasq stanza serving a lease range on one interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpRangeStanza<'a> {
    pub interface: &'a str,
    pub low: Ipv4Addr,
    pub high: Ipv4Addr,
}

impl DhcpRangeStanza<'_> {
    /// dnsmasq must be authoritative on an isolated AP or clients wait for
    /// a server that does not exist
    pub fn render(&self) -> String {
        format!(
            "interface={}\ndhcp-authoritative\ndhcp-range={},{},255.255.255.0,24h\n",
            self.interface, self.low, self.high
        )
    }
}

/// hostapd WPA2-PSK access point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPointConfig<'a> {
    pub interface: &'a str,
    pub driver: &'a str,
    pub ssid: &'a str,
    pub passphrase: &'a str,
}

impl AccessPointConfig<'_> {
    pub fn render(&self) -> String {
        let entries: [(&str, String); 14] = [
            ("interface", self.interface.to_string()),
            ("driver", self.driver.to_string()),
            ("ssid", self.ssid.to_string()),
            ("hw_mode", "g".to_string()),
            ("channel", AP_CHANNEL.to_string()),
            ("wmm_enabled", "0".to_string()),
            ("macaddr_acl", "0".to_string()),
            ("auth_algs", "1".to_string()),
            ("ignore_broadcast_ssid", "0".to_string()),
            ("wpa", "2".to_string()),
            ("wpa_passphrase", self.passphrase.to_string()),
            ("wpa_key_mgmt", "WPA-PSK".to_string()),
            ("wpa_pairwise", "TKIP".to_string()),
            ("rsn_pairwise", "CCMP".to_string()),
        ];

        entries
            .iter()
            .map(|(key, value)| format!("{}={}\n", key, value))
            .collect()
    }
}

/// Content of `/etc/default/hostapd` pointing at the generated config
pub fn render_env_link(conf_path: &str) -> String {
    format!("DAEMON_CONF=\"{}\"\n", conf_path)
}

/// Fill the unset `DAEMON_CONF=` line(s) of the hostapd init script
///
/// Lines that already carry a value no longer match, so applying the patch a
/// second time returns the input unchanged.
pub fn patch_init_script(script: &str, conf_path: &str) -> String {
    let mut patched = String::with_capacity(script.len() + conf_path.len());

    for line in script.split_inclusive('\n') {
        let body = line.trim_end_matches(['\n', '\r']);
        let ending = &line[body.len()..];

        if body.trim() == DAEMON_CONF_MARKER {
            let indent = &body[..body.len() - body.trim_start().len()];
            patched.push_str(indent);
            patched.push_str(DAEMON_CONF_MARKER);
            patched.push_str(conf_path);
            patched.push_str(ending);
        } else {
            patched.push_str(line);
        }
    }

    patched
}

/// Append `stanza` to `existing` unless it is already there
///
/// Returns `None` when nothing needs to be written, otherwise the exact bytes
/// to append (with a separating newline if the file does not end in one).
pub fn append_once(existing: &str, stanza: &str) -> Option<String> {
    if existing.contains(stanza) {
        return None;
    }
    let mut addition = String::new();
    if !existing.is_empty() && !existing.ends_with('\n') {
        addition.push('\n');
    }
    addition.push_str(stanza);
    Some(addition)
}

/// Writes daemon configuration into the files managed by a [`ConfigFileStore`]
pub struct ConfigWriter<'a> {
    store: &'a ConfigFileStore,
}

impl<'a> ConfigWriter<'a> {
    pub fn new(store: &'a ConfigFileStore) -> Self {
        Self { store }
    }

    /// Append the static-IP stanza to dhcpcd.conf. Returns false if already present.
    pub fn write_static_ip(&self, stanza: &StaticIpStanza<'_>) -> Result<bool> {
        self.append(ManagedFile::DhcpConfig, &stanza.render())
    }

    /// Append the DHCP-range stanza to dnsmasq.conf. Returns false if already present.
    pub fn write_dhcp_range(&self, stanza: &DhcpRangeStanza<'_>) -> Result<bool> {
        self.append(ManagedFile::DnsDhcpConfig, &stanza.render())
    }

    /// Write hostapd.conf, point the environment file at it and patch the init script
    pub fn write_access_point(&self, config: &AccessPointConfig<'_>) -> Result<()> {
        let conf_path = ManagedFile::ApDaemonConfig.system_path();

        self.replace(ManagedFile::ApDaemonConfig, &config.render())?;
        self.replace(ManagedFile::ApDaemonEnvLink, &render_env_link(conf_path))?;

        let init_script = self.store.live_path(ManagedFile::ApDaemonInitScript);
        match fs::read_to_string(&init_script) {
            Ok(script) => {
                let patched = patch_init_script(&script, conf_path);
                if patched == script {
                    log::debug!("{} already references {}", init_script.display(), conf_path);
                } else {
                    self.replace(ManagedFile::ApDaemonInitScript, &patched)?;
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::warn!(
                    "{} not found, skipping init script patch",
                    init_script.display()
                );
            }
            Err(e) => return Err(Error::file_io(&init_script, e)),
        }
        Ok(())
    }

    fn append(&self, file: ManagedFile, stanza: &str) -> Result<bool> {
        let path = self.store.live_path(file);
        let existing = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(Error::file_io(&path, e)),
        };

        let Some(addition) = append_once(&existing, stanza) else {
            log::info!("{} already contains the stanza, not appending", path.display());
            return Ok(false);
        };

        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::file_io(&path, e))?;
        handle
            .write_all(addition.as_bytes())
            .map_err(|e| Error::file_io(&path, e))?;

        log::info!("Appended {} stanza to {}", file.role(), path.display());
        Ok(true)
    }

    fn replace(&self, file: ManagedFile, content: &str) -> Result<()> {
        let path = self.store.live_path(file);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::file_io(parent, e))?;
        }
        fs::write(&path, content).map_err(|e| Error::file_io(&path, e))?;
        log::info!("Wrote {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DEBIAN_INIT_SCRIPT: &str = "#!/bin/sh\n\
        ### BEGIN INIT INFO\n\
        # Provides:\t\thostapd\n\
        ### END INIT INFO\n\
        PATH=/sbin:/bin:/usr/sbin:/usr/bin\n\
        DAEMON_SBIN=/usr/sbin/hostapd\n\
        DAEMON_DEFS=/etc/default/hostapd\n\
        DAEMON_CONF=\n\
        NAME=hostapd\n";

    fn ap_config() -> AccessPointConfig<'static> {
        AccessPointConfig {
            interface: "wlan0",
            driver: "nl80211",
            ssid: "testnet",
            passphrase: "testpass1234",
        }
    }

    #[test]
    fn test_render_static_ip() {
        let stanza = StaticIpStanza {
            interface: "wlan0",
            address: Ipv4Addr::new(192, 168, 52, 1),
        };
        assert_eq!(
            stanza.render(),
            "interface wlan0\n    static ip_address=192.168.52.1/24\n    nohook wpa_supplicant\n"
        );
    }

    #[test]
    fn test_render_dhcp_range() {
        let stanza = DhcpRangeStanza {
            interface: "wlan0",
            low: Ipv4Addr::new(192, 168, 52, 2),
            high: Ipv4Addr::new(192, 168, 52, 20),
        };
        let text = stanza.render();
        assert!(text.starts_with("interface=wlan0\n"));
        assert!(text.contains("\ndhcp-authoritative\n"));
        assert!(text.contains("dhcp-range=192.168.52.2,192.168.52.20,255.255.255.0,24h"));
    }

    #[test]
    fn test_render_access_point() {
        let text = ap_config().render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "interface=wlan0");
        assert_eq!(lines[1], "driver=nl80211");
        assert!(lines.contains(&"ssid=testnet"));
        assert!(lines.contains(&"wpa_passphrase=testpass1234"));
        assert!(lines.contains(&"channel=7"));
        assert!(lines.contains(&"ignore_broadcast_ssid=0"));
        assert!(lines.contains(&"auth_algs=1"));
        assert!(lines.contains(&"wpa=2"));
        assert!(lines.contains(&"wpa_key_mgmt=WPA-PSK"));
        assert!(lines.contains(&"rsn_pairwise=CCMP"));
        assert!(lines.contains(&"wpa_pairwise=TKIP"));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_env_link() {
        assert_eq!(
            render_env_link("/etc/hostapd/hostapd.conf"),
            "DAEMON_CONF=\"/etc/hostapd/hostapd.conf\"\n"
        );
    }

    #[test]
    fn test_patch_init_script_fills_marker() {
        let patched = patch_init_script(DEBIAN_INIT_SCRIPT, "/etc/hostapd/hostapd.conf");
        assert!(patched.contains("\nDAEMON_CONF=/etc/hostapd/hostapd.conf\n"));
        assert!(!patched.contains("\nDAEMON_CONF=\n"));
        assert!(patched.contains("DAEMON_DEFS=/etc/default/hostapd\n"));
        assert_eq!(patched.lines().count(), DEBIAN_INIT_SCRIPT.lines().count());
    }

    #[test]
    fn test_patch_init_script_is_idempotent() {
        let once = patch_init_script(DEBIAN_INIT_SCRIPT, "/etc/hostapd/hostapd.conf");
        let twice = patch_init_script(&once, "/etc/hostapd/hostapd.conf");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_patch_init_script_keeps_indent_and_crlf() {
        let script = "if true; then\r\n    DAEMON_CONF=\r\nfi";
        assert_eq!(
            patch_init_script(script, "/x.conf"),
            "if true; then\r\n    DAEMON_CONF=/x.conf\r\nfi"
        );
    }

    #[test]
    fn test_patch_init_script_leaves_configured_value() {
        let script = "DAEMON_CONF=/somewhere/else.conf\n";
        assert_eq!(patch_init_script(script, "/etc/hostapd/hostapd.conf"), script);
    }

    #[test]
    fn test_append_once() {
        assert_eq!(append_once("", "a\n"), Some("a\n".to_string()));
        assert_eq!(append_once("x=1", "a\n"), Some("\na\n".to_string()));
        assert_eq!(append_once("x=1\n", "a\n"), Some("a\n".to_string()));
        assert_eq!(append_once("x=1\na\n", "a\n"), None);
    }

    #[test]
    fn test_write_static_ip_appends_once() {
        let dir = TempDir::new().unwrap();
        let store = ConfigFileStore::new(dir.path());
        let path = store.live_path(ManagedFile::DhcpConfig);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "hostname\nclientid").unwrap();

        let writer = ConfigWriter::new(&store);
        let stanza = StaticIpStanza {
            interface: "wlan0",
            address: Ipv4Addr::new(10, 0, 0, 1),
        };
        assert!(writer.write_static_ip(&stanza).unwrap());
        assert!(!writer.write_static_ip(&stanza).unwrap());

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("hostname\nclientid\ninterface wlan0\n"));
        assert_eq!(content.matches("static ip_address=10.0.0.1/24").count(), 1);
    }

    #[test]
    fn test_write_dhcp_range_creates_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = ConfigFileStore::new(dir.path());
        fs::create_dir_all(dir.path().join("etc")).unwrap();

        let writer = ConfigWriter::new(&store);
        let stanza = DhcpRangeStanza {
            interface: "eth0",
            low: Ipv4Addr::new(10, 0, 0, 2),
            high: Ipv4Addr::new(10, 0, 0, 9),
        };
        assert!(writer.write_dhcp_range(&stanza).unwrap());
        assert_eq!(
            fs::read_to_string(store.live_path(ManagedFile::DnsDhcpConfig)).unwrap(),
            stanza.render()
        );
    }

    #[test]
    fn test_write_access_point_all_files() {
        let dir = TempDir::new().unwrap();
        let store = ConfigFileStore::new(dir.path());
        let init = store.live_path(ManagedFile::ApDaemonInitScript);
        fs::create_dir_all(init.parent().unwrap()).unwrap();
        fs::write(&init, DEBIAN_INIT_SCRIPT).unwrap();

        let writer = ConfigWriter::new(&store);
        writer.write_access_point(&ap_config()).unwrap();
        writer.write_access_point(&ap_config()).unwrap();

        let conf = fs::read_to_string(store.live_path(ManagedFile::ApDaemonConfig)).unwrap();
        assert_eq!(conf, ap_config().render());

        let env = fs::read_to_string(store.live_path(ManagedFile::ApDaemonEnvLink)).unwrap();
        assert_eq!(env, "DAEMON_CONF=\"/etc/hostapd/hostapd.conf\"\n");

        let script = fs::read_to_string(&init).unwrap();
        assert_eq!(
            script.matches("DAEMON_CONF=/etc/hostapd/hostapd.conf").count(),
            1
        );
    }

    #[test]
    fn test_write_access_point_without_init_script() {
        let dir = TempDir::new().unwrap();
        let store = ConfigFileStore::new(dir.path());
        let writer = ConfigWriter::new(&store);

        writer.write_access_point(&ap_config()).unwrap();

        assert!(store.live_path(ManagedFile::ApDaemonConfig).exists());
        assert!(!store.live_path(ManagedFile::ApDaemonInitScript).exists());
    }
}
