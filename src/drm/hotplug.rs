//! DRM hotplug detection
//!
//! Watches udev for DRM card events (monitor plug/unplug, card add/remove)
//! and forwards them as [`HotplugEvent`]s over a channel. The manager
//! drains the channel from its own loop.

use crate::constants::CARD_NODE_PATTERN;

/// udev action reported for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugAction {
    Add,
    Remove,
    /// Connector state changed (connect/disconnect/mode change)
    Change,
}

impl HotplugAction {
    pub fn from_udev(action: &str) -> Option<Self> {
        match action {
            "add" => Some(Self::Add),
            "remove" => Some(Self::Remove),
            "change" => Some(Self::Change),
            _ => None,
        }
    }
}

/// Hotplug event for one device node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotplugEvent {
    /// Device node path, e.g. "/dev/dri/card0"
    pub devnode: String,
    pub action: HotplugAction,
}

impl HotplugEvent {
    pub fn new(devnode: impl Into<String>, action: HotplugAction) -> Self {
        Self {
            devnode: devnode.into(),
            action,
        }
    }
}

/// True for primary card nodes ("/dev/dri/card0"), false for render nodes
pub fn is_card_node(devnode: &str) -> bool {
    devnode
        .rsplit('/')
        .next()
        .map(|name| name.starts_with(CARD_NODE_PATTERN))
        .unwrap_or(false)
}

#[cfg(target_os = "linux")]
pub use self::udev_monitor::{enumerate_cards, HotplugMonitor};

#[cfg(target_os = "linux")]
mod udev_monitor {
    use anyhow::{Context, Result};
    use log::{debug, info, warn};
    use std::sync::mpsc::Sender;

    use super::{is_card_node, HotplugAction, HotplugEvent};
    use crate::constants::DRM_SUBSYSTEM;

    /// udev-based hotplug monitor for the DRM subsystem
    pub struct HotplugMonitor {
        socket: udev::MonitorSocket,
        tx: Sender<HotplugEvent>,
    }

    impl HotplugMonitor {
        /// Create a monitor that sends events to `tx`
        pub fn new(tx: Sender<HotplugEvent>) -> Result<Self> {
            let socket = udev::MonitorBuilder::new()
                .context("Failed to create udev monitor builder")?
                .match_subsystem(DRM_SUBSYSTEM)
                .context("Failed to match drm subsystem")?
                .listen()
                .context("Failed to start udev monitor")?;

            info!("DRM hotplug monitor initialized");
            Ok(Self { socket, tx })
        }

        /// Forward pending events (non-blocking).
        ///
        /// Returns the number of events sent. Change events are only
        /// forwarded when udev flags them with HOTPLUG=1.
        pub fn poll(&mut self) -> usize {
            let mut sent = 0;
            for event in self.socket.iter() {
                let Some(devnode) = event.devnode().map(|p| p.to_string_lossy().into_owned())
                else {
                    continue;
                };
                if !is_card_node(&devnode) {
                    continue;
                }
                let Some(action) = event
                    .action()
                    .and_then(|a| a.to_str())
                    .and_then(HotplugAction::from_udev)
                else {
                    continue;
                };
                if action == HotplugAction::Change
                    && event.property_value("HOTPLUG").map(|v| v != "1").unwrap_or(true)
                {
                    continue;
                }

                debug!("DRM hotplug event: {:?} {}", action, devnode);
                if self.tx.send(HotplugEvent::new(devnode, action)).is_err() {
                    warn!("Hotplug receiver dropped");
                    break;
                }
                sent += 1;
            }
            sent
        }
    }

    /// Device nodes of all DRM cards known to udev, sorted
    pub fn enumerate_cards() -> Result<Vec<String>> {
        let mut enumerator = udev::Enumerator::new().context("Failed to create udev enumerator")?;
        enumerator
            .match_subsystem(DRM_SUBSYSTEM)
            .context("Failed to match drm subsystem")?;

        let mut cards: Vec<String> = enumerator
            .scan_devices()
            .context("Failed to scan DRM devices")?
            .filter_map(|dev| dev.devnode().map(|p| p.to_string_lossy().into_owned()))
            .filter(|node| is_card_node(node))
            .collect();
        cards.sort();
        debug!("DRM cards: {:?}", cards);
        Ok(cards)
    }
}
