//! Display resource manager
//!
//! Owns every discovered DRM device, the hotplug monitor and the
//! configured/initial target resolutions. All queries and mode changes
//! go to the primary device.

use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};

use crate::config::Config;
use crate::drm::entities::PlaneProperty;
use crate::drm::hotplug::HotplugEvent;
use crate::drm::kms::PlaneType;
use crate::drm::Device;
use crate::error::{DisplayError, Result};
use crate::geometry::{Rect, Resolution};

#[cfg(target_os = "linux")]
use crate::drm::hotplug::{enumerate_cards, HotplugMonitor};

/// Resolution window of one CRTC after setup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrtcBounds {
    pub crtc: u32,
    pub min: Resolution,
    pub max: Resolution,
    pub connectors: Vec<u32>,
}

/// Sent to subscribers after a device was re-evaluated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyChange {
    /// Device node path
    pub device: String,
    /// CRTCs driving at least one connector
    pub crtcs: Vec<CrtcBounds>,
}

pub struct ResourceManager {
    // Stopped before the devices are released
    #[cfg(target_os = "linux")]
    monitor: Option<HotplugMonitor>,
    events: Receiver<HotplugEvent>,
    sender: Sender<HotplugEvent>,
    subscribers: Vec<Sender<TopologyChange>>,
    devices: BTreeMap<String, Device>,
    primary: Option<String>,
    initial: Resolution,
    configured: Resolution,
}

impl ResourceManager {
    /// Discover all DRM cards, activate the primary one at `initial`
    /// and optionally start watching udev for hotplug events.
    ///
    /// Fails only when the primary device cannot scan out at all.
    pub fn new(initial: Resolution, watch_hotplug: bool) -> Result<Self> {
        let devices: Vec<Device> = card_nodes().iter().map(|path| Device::open(path)).collect();
        let mut manager = Self::from_devices(initial, devices)?;
        if watch_hotplug {
            manager.start_monitor();
        }
        Ok(manager)
    }

    #[cfg(target_os = "linux")]
    fn start_monitor(&mut self) {
        match HotplugMonitor::new(self.sender.clone()) {
            Ok(monitor) => self.monitor = Some(monitor),
            Err(e) => warn!("Hotplug monitor not available: {:#}", e),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn start_monitor(&mut self) {
        warn!("Hotplug monitoring requires udev (Linux only)");
    }

    #[cfg(target_os = "linux")]
    fn poll_monitor(&mut self) {
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.poll();
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn poll_monitor(&mut self) {}

    /// Build a manager over already discovered devices.
    ///
    /// The first device by path becomes primary whether or not it is
    /// usable. Its CRTCs are bound and activated at `initial`.
    pub fn from_devices(initial: Resolution, devices: Vec<Device>) -> Result<Self> {
        let (sender, events) = channel();
        let devices: BTreeMap<String, Device> = devices
            .into_iter()
            .map(|dev| (dev.path().to_string(), dev))
            .collect();
        let primary = devices.keys().next().cloned();

        let mut manager = Self {
            #[cfg(target_os = "linux")]
            monitor: None,
            events,
            sender,
            subscribers: Vec::new(),
            devices,
            primary,
            initial,
            configured: initial,
        };
        manager.activate_primary()?;
        Ok(manager)
    }

    fn activate_primary(&mut self) -> Result<()> {
        let Some(path) = self.primary.clone() else {
            warn!("No DRM card found");
            return Ok(());
        };
        let initial = self.initial;
        let Some(device) = self.devices.get_mut(&path).filter(|d| d.is_usable()) else {
            error!("Primary DRM device {} is not usable", path);
            return Ok(());
        };

        device.setup(initial)?;

        let crtcs: Vec<(u32, Resolution)> = device
            .crtcs()
            .iter()
            .filter(|c| !c.connectors().is_empty())
            .map(|c| (c.id(), c.max()))
            .collect();
        for (crtc, max) in crtcs {
            debug!("Set active mode {} for CRTC {}", max, crtc);
            if let Err(e) = device.set_active_mode(crtc, max, 0) {
                warn!("Initial mode for CRTC {} not applied: {}", crtc, e);
            }
        }
        info!("Primary DRM device: {}", path);
        Ok(())
    }

    /// Sender for injecting hotplug events
    pub fn hotplug_sender(&self) -> Sender<HotplugEvent> {
        self.sender.clone()
    }

    /// Receive a [`TopologyChange`] after every handled hotplug event
    pub fn subscribe(&mut self) -> Receiver<TopologyChange> {
        let (tx, rx) = channel();
        self.subscribers.push(tx);
        rx
    }

    /// Poll the monitor and handle all queued hotplug events.
    ///
    /// Returns the number of events that named a known device.
    pub fn dispatch(&mut self) -> usize {
        self.poll_monitor();

        let mut handled = 0;
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    if self.handle_hotplug(&event) {
                        handled += 1;
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        handled
    }

    /// Re-derive CRTC bounds of the named device and notify subscribers.
    ///
    /// The initial resolution is re-applied when a mode change moved away
    /// from it. Events for unknown nodes are ignored.
    pub fn handle_hotplug(&mut self, event: &HotplugEvent) -> bool {
        let target = if self.configured != self.initial {
            self.initial
        } else {
            self.configured
        };

        let Some(device) = self.devices.get_mut(&event.devnode) else {
            warn!(
                "Cannot handle new DRM device detected {} ({:?})",
                event.devnode, event.action
            );
            return false;
        };

        info!("Hotplug {:?} on {}, target {}", event.action, event.devnode, target);
        if let Err(e) = device.setup(target) {
            error!("Failed to set up {} after hotplug: {}", event.devnode, e);
        }

        let change = TopologyChange {
            device: event.devnode.clone(),
            crtcs: device
                .crtcs()
                .iter()
                .filter(|c| !c.connectors().is_empty())
                .map(|c| CrtcBounds {
                    crtc: c.id(),
                    min: c.min(),
                    max: c.max(),
                    connectors: c.connectors().iter().copied().collect(),
                })
                .collect(),
        };
        self.notify(change);
        true
    }

    fn notify(&mut self, change: TopologyChange) {
        self.subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }

    /// Primary device, whatever its state
    pub fn primary_device(&self) -> Option<&Device> {
        self.primary.as_ref().and_then(|p| self.devices.get(p))
    }

    pub fn device(&self, path: &str) -> Option<&Device> {
        self.devices.get(path)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    fn primary(&self) -> Result<&Device> {
        self.primary_device()
            .filter(|d| d.is_usable())
            .ok_or(DisplayError::NoDevice)
    }

    fn primary_mut(&mut self) -> Result<&mut Device> {
        let path = self.primary.as_ref().ok_or(DisplayError::NoDevice)?;
        self.devices
            .get_mut(path)
            .filter(|d| d.is_usable())
            .ok_or(DisplayError::NoDevice)
    }

    pub fn initial_mode(&self) -> Resolution {
        self.initial
    }

    /// Resolution of the last successful mode change
    pub fn configured_mode(&self) -> Resolution {
        self.configured
    }

    /// Activate `size` on display path `path` (n-th plugged connector).
    ///
    /// `vrefresh` 0 accepts any refresh rate. On failure neither the
    /// CRTC bounds nor the configured resolution change.
    pub fn change_mode(&mut self, size: Resolution, path: u8, vrefresh: u32) -> Result<()> {
        let device = self.primary_mut()?;

        let Some(connector) = device.connector_for_path(path) else {
            let err = DisplayError::NoDisplayPath {
                path,
                plugged: device.plugged_connectors().count(),
            };
            error!("{}", err);
            return Err(err);
        };
        let crtc = connector
            .crtc_id()
            .ok_or(DisplayError::NoCrtcForConnector {
                connector: connector.id(),
            })?;

        device.set_active_mode(crtc, size, vrefresh)?;
        device.set_crtc_max(crtc, size);
        self.configured = size;
        info!("Display path {} now {} on CRTC {}", path, size, crtc);
        Ok(())
    }

    /// Usable planes of the primary device (cursor planes never appear)
    pub fn planes(&self) -> Vec<u32> {
        self.primary().map(|d| d.active_planes()).unwrap_or_default()
    }

    /// First usable plane, target of global properties such as z-order
    pub fn plane_base(&self) -> Option<u32> {
        self.planes().first().copied()
    }

    pub fn plane_type(&self, plane: u32) -> Result<PlaneType> {
        self.primary()?
            .plane(plane)
            .map(|p| p.plane_type())
            .ok_or(DisplayError::UnknownPlane(plane))
    }

    pub fn set_plane(&self, plane: u32, fb: u32, dst: Rect, src: Rect) -> Result<()> {
        self.primary()?.set_plane(plane, fb, dst, src)
    }

    pub fn set_plane_properties(&self, property: PlaneProperty, plane: u32, value: u64) -> Result<()> {
        self.primary()?.set_plane_property(property, plane, value)
    }

    /// (min, max) resolution of a CRTC
    pub fn mode_range(&self, crtc: u32) -> Option<(Resolution, Resolution)> {
        self.primary().ok()?.mode_range(crtc)
    }

    pub fn plugged_connector_count(&self) -> usize {
        self.primary()
            .map(|d| d.plugged_connectors().count())
            .unwrap_or(0)
    }

    /// Distinct sizes supported by connector `index` (in list order)
    pub fn supported_modes(&self, index: usize) -> Vec<Resolution> {
        self.primary()
            .ok()
            .and_then(|d| d.connectors().get(index))
            .map(|c| c.supported_modes())
            .unwrap_or_default()
    }

    /// [`Self::supported_modes`] limited to the configured window
    pub fn supported_resolutions(&self, index: usize, config: &Config) -> Vec<Resolution> {
        self.supported_modes(index)
            .into_iter()
            .filter(|&size| config.is_valid_mode(size))
            .collect()
    }

    pub fn crtc_for_plane(&self, plane: u32) -> Option<u32> {
        self.primary().ok()?.find_crtc_for_plane(plane)
    }

    pub fn connector_for_plane(&self, plane: u32) -> Option<u32> {
        self.primary().ok()?.find_connector_for_plane(plane)
    }
}

#[cfg(target_os = "linux")]
fn card_nodes() -> Vec<String> {
    enumerate_cards().unwrap_or_else(|e| {
        error!("Failed to enumerate DRM devices: {:#}", e);
        Vec::new()
    })
}

#[cfg(not(target_os = "linux"))]
fn card_nodes() -> Vec<String> {
    use crate::drm::hotplug::is_card_node;

    let mut cards: Vec<String> = std::fs::read_dir("/dev/dri")
        .map(|dir| {
            dir.filter_map(|entry| entry.ok())
                .map(|entry| entry.path().to_string_lossy().into_owned())
                .filter(|node| is_card_node(node))
                .collect()
        })
        .unwrap_or_default();
    cards.sort();
    cards
}
