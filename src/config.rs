//! The RON file that describes one acquisition: which device, where to find
//! it, and how much history to keep.
//!
//! ```ron
//! (
//!     device: SyncStation((slots: [(slot: 0), (slot: 6, emg: false)])),
//!     window_secs: 2.0,
//! )
//! ```

use crate::error::{Error, Result};
use crate::family::{
    NovecentoConfig, ProbeConfig, QuattrocentoConfig, SessantaquattroConfig, SyncStationConfig,
};
use crate::handshake::{Handshake, ProbeSettings};
use crate::plan::AcquisitionPlan;
use crate::transport::Link;
use log::info;
use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Which side opens the TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The host dials the device
    Client,
    /// The host listens and the device dials in
    Listener,
}

/// One of the supported device families and its settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceConfig {
    /// Quattrocento amplifier
    Quattrocento(QuattrocentoConfig),
    /// Novecento amplifier
    Novecento(NovecentoConfig),
    /// SyncStation hub and its probes
    SyncStation(SyncStationConfig),
    /// Sessantaquattro+ amplifier
    Sessantaquattro(SessantaquattroConfig),
    /// Muovi, Muovi+, Quattro+ or Due+
    Probe(ProbeConfig),
}

impl DeviceConfig {
    /// Whether the host dials or listens.
    pub fn role(&self) -> Role {
        match self {
            DeviceConfig::Quattrocento(_)
            | DeviceConfig::Novecento(_)
            | DeviceConfig::SyncStation(_) => Role::Client,
            DeviceConfig::Sessantaquattro(_) | DeviceConfig::Probe(_) => Role::Listener,
        }
    }

    /// Device address for clients, bind address for listeners.
    pub fn default_address(&self) -> &'static str {
        match self {
            DeviceConfig::Quattrocento(_) => QuattrocentoConfig::DEFAULT_ADDRESS,
            DeviceConfig::Novecento(_) => NovecentoConfig::DEFAULT_ADDRESS,
            DeviceConfig::SyncStation(_) => SyncStationConfig::DEFAULT_ADDRESS,
            DeviceConfig::Sessantaquattro(_) => SessantaquattroConfig::DEFAULT_ADDRESS,
            DeviceConfig::Probe(probe) => probe.kind.default_address(),
        }
    }

    /// The frame layout depends on what the device reports about its probes.
    pub fn needs_probe_settings(&self) -> bool {
        matches!(self, DeviceConfig::Novecento(_))
    }

    /// Build the plan. `probes` is only consulted by families that need it
    /// and must be present for them.
    pub fn plan(&self, probes: Option<&ProbeSettings>) -> Result<AcquisitionPlan> {
        match self {
            DeviceConfig::Quattrocento(config) => config.plan(),
            DeviceConfig::Novecento(config) => {
                let probes = probes.ok_or_else(|| {
                    Error::invalid("Novecento needs the probe settings before it can stream")
                })?;
                config.plan(probes)
            }
            DeviceConfig::SyncStation(config) => config.plan(),
            DeviceConfig::Sessantaquattro(config) => config.plan(),
            DeviceConfig::Probe(config) => config.plan(),
        }
    }
}

fn default_window_secs() -> f64 {
    5.0
}

fn default_read_timeout_ms() -> u64 {
    100
}

/// Top level of a configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Which device to talk to
    pub device: DeviceConfig,
    /// Overrides the family's default address
    #[serde(default)]
    pub address: Option<String>,
    /// Seconds of history kept per group
    #[serde(default = "default_window_secs")]
    pub window_secs: f64,
    /// Longest a single receive waits before the loop checks for a stop
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Overrides the block length, in frames
    #[serde(default)]
    pub frames_per_block: Option<usize>,
}

impl AcquisitionConfig {
    /// Defaults for everything but the device.
    pub fn new(device: DeviceConfig) -> Self {
        Self {
            device,
            address: None,
            window_secs: default_window_secs(),
            read_timeout_ms: default_read_timeout_ms(),
            frames_per_block: None,
        }
    }

    /// Read and validate a configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        text.parse()
    }

    /// The configuration as pretty RON.
    pub fn to_ron(&self) -> Result<String> {
        ron::ser::to_string_pretty(self, PrettyConfig::default())
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Address to dial or bind.
    pub fn address(&self) -> &str {
        self.address
            .as_deref()
            .unwrap_or_else(|| self.device.default_address())
    }

    /// Seconds of history as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_secs_f64(self.window_secs)
    }

    /// Read timeout as a duration.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// The device's plan with the block length override applied.
    pub fn plan(&self, probes: Option<&ProbeSettings>) -> Result<AcquisitionPlan> {
        let plan = self.device.plan(probes)?;
        Ok(match self.frames_per_block {
            Some(frames) => plan.with_frames_per_block(frames),
            None => plan,
        })
    }

    /// Open the link the way the device expects, run whatever handshake the
    /// family needs and build the plan.
    pub fn open(&self) -> Result<(Link, AcquisitionPlan)> {
        let timeout = Some(self.read_timeout());
        let mut link = match self.device.role() {
            Role::Client => Link::connect(self.address(), timeout)?,
            Role::Listener => Link::accept(self.address(), timeout)?,
        };

        let probes = if self.device.needs_probe_settings() {
            // The handshake waits for whole answers, not poll intervals.
            link.set_read_timeout(None)?;
            let mut handshake = Handshake::new(&mut link)?;
            handshake.firmware_version()?;
            Some(handshake.probe_settings()?)
        } else {
            None
        };

        let plan = self.plan(probes.as_ref())?;
        info!(
            "Plan: {} groups, {} bytes per block",
            plan.group_specs().len(),
            plan.block_size()
        );
        Ok((link, plan))
    }

    fn validate(self) -> Result<Self> {
        if !(self.window_secs.is_finite() && self.window_secs > 0.0) {
            return Err(Error::Config(format!(
                "window_secs must be positive, got {}",
                self.window_secs
            )));
        }
        if self.read_timeout_ms == 0 {
            return Err(Error::Config("read_timeout_ms must be at least 1".into()));
        }
        Ok(self)
    }
}

impl FromStr for AcquisitionConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ron::from_str::<Self>(s)?.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::ProbeKind;
    use crate::handshake::Request;
    use crate::simulator::Simulator;
    use std::io::Write;

    #[test]
    fn minimal_file_uses_defaults() {
        let config: AcquisitionConfig =
            "(device: Probe((kind: DuePlus, mode: 0, emg: true)))".parse().unwrap();
        assert_eq!(config.window(), Duration::from_secs(5));
        assert_eq!(config.read_timeout(), Duration::from_millis(100));
        assert_eq!(config.address(), "0.0.0.0:54321");
        assert_eq!(config.device.role(), Role::Listener);
        let plan = config.plan(None).unwrap();
        assert_eq!(plan.block_size(), 8 * 2 * 125);
    }

    #[test]
    fn overrides() {
        let text = r#"(
            device: SyncStation((slots: [(slot: 0), (slot: 6, emg: false)])),
            address: Some("127.0.0.1:5000"),
            window_secs: 0.5,
            frames_per_block: Some(10),
        )"#;
        let config: AcquisitionConfig = text.parse().unwrap();
        assert_eq!(config.address(), "127.0.0.1:5000");
        assert_eq!(config.device.role(), Role::Client);
        let plan = config.plan(None).unwrap();
        assert_eq!(plan.frames_per_block, 10);
        assert_eq!(plan.block_size(), (38 * 2 + 8 * 3 + 12) * 10);
    }

    #[test]
    fn novecento_needs_probes() {
        let config = AcquisitionConfig::new(DeviceConfig::Novecento(NovecentoConfig::default()));
        assert!(config.device.needs_probe_settings());
        assert!(matches!(
            config.plan(None),
            Err(Error::InvalidConfiguration(_))
        ));
        let probes = ProbeSettings::new([3, 0, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        assert!(config.plan(Some(&probes)).is_ok());
    }

    #[test]
    fn bad_files() {
        assert!(matches!(
            "(device: Nonsense(()))".parse::<AcquisitionConfig>(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            "(device: Probe((kind: Muovi, mode: 0, emg: true)), window_secs: 0.0)"
                .parse::<AcquisitionConfig>(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            AcquisitionConfig::from_path("/definitely/not/here.ron"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn file_round_trip() {
        let config = AcquisitionConfig {
            frames_per_block: Some(32),
            ..AcquisitionConfig::new(DeviceConfig::Probe(ProbeConfig {
                kind: ProbeKind::MuoviPlus,
                mode: 2,
                emg: false,
            }))
        };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_ron().unwrap().as_bytes()).unwrap();
        let loaded = AcquisitionConfig::from_path(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn open_sizes_novecento_from_the_handshake() {
        let mut config = AcquisitionConfig::new(DeviceConfig::Novecento(NovecentoConfig::default()));
        let probes = ProbeSettings::new([5, 0, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        let expected = config.plan(Some(&probes)).unwrap();
        let sim = Simulator::builder(expected.clone())
            .probes(probes)
            .listen("127.0.0.1:0")
            .unwrap();
        config.address = sim.local_addr().map(|a| a.to_string());

        let (link, plan) = config.open().unwrap();
        assert_eq!(plan, expected);
        let names: Vec<_> = plan.group_specs().into_iter().map(|g| g.name).collect();
        assert_eq!(names, vec!["IN 1", "AUX", "Accessory"]);
        assert_eq!(plan.group_specs()[0].channels, 70);
        assert_eq!(
            sim.received(),
            vec![
                Request::FirmwareVersion.frame().as_bytes().to_vec(),
                Request::ProbeSettings.frame().as_bytes().to_vec(),
            ]
        );

        drop(link);
        sim.join().unwrap();
    }
}
