//! kmsres - display resource manager for Linux DRM/KMS
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            ResourceManager               │
//! │   change_mode / planes / set_plane ...   │
//! ├──────────────────────────────────────────┤
//! │  Device (primary)   ←  HotplugMonitor    │
//! │  connectors / encoders / CRTCs / planes  │
//! │                  ↓                       │
//! │  KmsDevice (Card over /dev/dri/card*)    │
//! └──────────────────────────────────────────┘
//! ```

pub mod config;
pub mod constants;
pub mod drm;
pub mod error;
pub mod geometry;
pub mod manager;

pub use crate::config::Config;
pub use crate::drm::{CrtcState, Device, HotplugAction, HotplugEvent, PlaneProperty, PlaneType};
pub use crate::error::{DisplayError, Result};
pub use crate::geometry::{is_supported_output_height, FixedRect, Rect, Resolution};
pub use crate::manager::{CrtcBounds, ResourceManager, TopologyChange};
