//! Radio device selection.
//!
//! Supplies the `<phys/>` and `<ifname/>` substitutions for the daemon
//! config. Either fixed from configuration ([`StaticDeviceSelector`]) or
//! discovered from `iw dev` ([`IwDeviceSelector`]).

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use super::process::ProcessTable;
use super::prompt::OperatorPrompt;
use super::template::{Substitutions, TOKEN_IFNAME, TOKEN_PHYS};
use crate::BoxFuture;

/// Drivers that keep their own monitor interface instead of a `wlanNmon` one.
const OWN_INTERFACE_DRIVERS: [&str; 2] = ["8188eu", "rtl88XXau"];

/// Errors from device discovery.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to run `iw dev`: {0}")]
    Discovery(#[from] std::io::Error),

    #[error("no unconnected wireless device available")]
    NoDevice,

    #[error("device selection aborted by operator")]
    Aborted,

    #[error("phy#{phys} uses driver {driver} but has {count} interfaces, expected exactly one")]
    AmbiguousInterface {
        phys: u32,
        driver: String,
        count: usize,
    },
}

/// Produces the device substitutions for the daemon config.
pub trait DeviceSelector: Send + Sync {
    fn select(&self) -> BoxFuture<'_, Result<Substitutions, DeviceError>>;
}

/// A wireless physical device as listed by `iw dev`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhysicalDevice {
    pub index: u32,
    pub interfaces: Vec<String>,
    /// Associated to a network (has an `ssid`); such devices are not used.
    pub connected: bool,
    pub driver: String,
}

impl PhysicalDevice {
    fn describe(&self) -> String {
        format!(
            "phys={} {} driver={}",
            self.index,
            self.interfaces.join(", "),
            if self.driver.is_empty() { "?" } else { &self.driver }
        )
    }

    /// Monitor interface the daemon should use on this device.
    pub fn monitor_interface(&self) -> Result<String, DeviceError> {
        match OWN_INTERFACE_DRIVERS.iter().find(|d| self.driver.contains(*d)) {
            Some(driver) => match self.interfaces.as_slice() {
                [only] => Ok(only.clone()),
                other => Err(DeviceError::AmbiguousInterface {
                    phys: self.index,
                    driver: driver.to_string(),
                    count: other.len(),
                }),
            },
            None => Ok(format!("wlan{}mon", self.index)),
        }
    }
}

/// Fixed selection from the `[device]` config section.
pub struct StaticDeviceSelector {
    phys: u32,
    ifname: String,
}

impl StaticDeviceSelector {
    pub fn new(phys: u32, ifname: Option<String>) -> Self {
        Self {
            ifname: ifname.unwrap_or_else(|| format!("wlan{phys}mon")),
            phys,
        }
    }
}

impl DeviceSelector for StaticDeviceSelector {
    fn select(&self) -> BoxFuture<'_, Result<Substitutions, DeviceError>> {
        Box::pin(async move { Ok(substitutions(self.phys, &self.ifname)) })
    }
}

/// Discovers devices with `iw dev` and sysfs.
pub struct IwDeviceSelector {
    prompt: Arc<dyn OperatorPrompt>,
    processes: Arc<dyn ProcessTable>,
    sysfs_net: PathBuf,
}

impl IwDeviceSelector {
    pub fn new(prompt: Arc<dyn OperatorPrompt>, processes: Arc<dyn ProcessTable>) -> Self {
        Self {
            prompt,
            processes,
            sysfs_net: PathBuf::from("/sys/class/net"),
        }
    }

    async fn discover(&self) -> Result<Vec<PhysicalDevice>, DeviceError> {
        let output = tokio::process::Command::new("iw")
            .arg("dev")
            .output()
            .await?;
        let mut devices = parse_iw_dev(&String::from_utf8_lossy(&output.stdout));
        for device in &mut devices {
            for ifname in &device.interfaces {
                if let Some(driver) = self.read_driver(ifname).await {
                    device.driver = driver;
                }
            }
        }
        Ok(devices)
    }

    /// Driver module names bound to `ifname`, space separated.
    async fn read_driver(&self, ifname: &str) -> Option<String> {
        let dir = self
            .sysfs_net
            .join(ifname)
            .join("device/driver/module/drivers");
        let mut entries = tokio::fs::read_dir(dir).await.ok()?;
        let mut names = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Some(names.join(" "))
    }

    async fn warn_if_network_manager(&self) {
        let Ok(processes) = self.processes.list().await else {
            return;
        };
        if processes
            .iter()
            .any(|p| p.command.to_lowercase().contains("networkman"))
        {
            warn!(
                "NetworkManager is running; monitor mode may stop working unless it ignores the selected device"
            );
        }
    }
}

impl DeviceSelector for IwDeviceSelector {
    fn select(&self) -> BoxFuture<'_, Result<Substitutions, DeviceError>> {
        Box::pin(async move {
            let devices = self.discover().await?;
            let device = choose_device(devices, self.prompt.as_ref()).await?;
            let ifname = device.monitor_interface()?;
            info!(phys = device.index, ifname = %ifname, driver = %device.driver, "Selected radio device");
            self.warn_if_network_manager().await;
            Ok(substitutions(device.index, &ifname))
        })
    }
}

/// Pick among the unconnected devices, asking only when there is a choice.
pub async fn choose_device(
    devices: Vec<PhysicalDevice>,
    prompt: &dyn OperatorPrompt,
) -> Result<PhysicalDevice, DeviceError> {
    let mut available: Vec<_> = devices.into_iter().filter(|d| !d.connected).collect();
    match available.len() {
        0 => Err(DeviceError::NoDevice),
        1 => {
            info!("Selecting only available device");
            Ok(available.remove(0))
        }
        _ => {
            let options = available.iter().map(PhysicalDevice::describe).collect();
            let index = prompt
                .choose("Device index?".to_string(), options)
                .await
                .filter(|index| *index < available.len())
                .ok_or(DeviceError::Aborted)?;
            Ok(available.remove(index))
        }
    }
}

/// Parse `iw dev` output into physical devices.
///
/// ```text
/// phy#1
///         Interface wlan1mon
///                 ifindex 5
///                 ssid home      <- marks the device as connected
/// ```
pub fn parse_iw_dev(output: &str) -> Vec<PhysicalDevice> {
    let mut devices = Vec::new();
    let mut current: Option<PhysicalDevice> = None;

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let depth = line.chars().take_while(|c| *c == '\t').count();
        match depth {
            0 => {
                if let Some(done) = current.take() {
                    devices.push(done);
                }
                current = line
                    .split_once('#')
                    .and_then(|(_, idx)| idx.trim().parse().ok())
                    .map(|index| PhysicalDevice {
                        index,
                        ..PhysicalDevice::default()
                    });
            }
            1 => {
                if let (Some(device), Some(name)) = (current.as_mut(), line.split_whitespace().last()) {
                    if line.trim_start().starts_with("Interface") {
                        device.interfaces.push(name.to_string());
                    }
                }
            }
            _ => {
                if let Some(device) = current.as_mut() {
                    if line.trim_start().starts_with("ssid") {
                        device.connected = true;
                    }
                }
            }
        }
    }
    if let Some(done) = current {
        devices.push(done);
    }
    devices
}

fn substitutions(phys: u32, ifname: &str) -> Substitutions {
    Substitutions::from([
        (TOKEN_PHYS.to_string(), phys.to_string()),
        (TOKEN_IFNAME.to_string(), ifname.to_string()),
    ])
}
