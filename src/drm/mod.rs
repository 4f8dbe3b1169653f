//! DRM/KMS resource management

pub mod card;
pub mod device;
pub mod entities;
#[cfg(test)]
pub(crate) mod fake;
pub mod hotplug;
pub mod kms;
pub mod scanout;

pub use card::Card;
pub use device::Device;
pub use entities::{Connector, Crtc, CrtcState, Edid, Encoder, Plane, PlaneProperty};
pub use hotplug::{HotplugAction, HotplugEvent};
#[cfg(target_os = "linux")]
pub use hotplug::{enumerate_cards, HotplugMonitor};
pub use kms::{KmsDevice, ModeInfo, PlaneType};
pub use scanout::ScanoutFb;
