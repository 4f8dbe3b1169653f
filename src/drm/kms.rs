//! Kernel mode-setting interface
//!
//! The subset of KMS calls the resource manager needs, expressed over
//! plain object ids. [`super::card::Card`] implements it on top of an
//! opened `/dev/dri/card*` node; tests substitute an in-memory device.
//!
//! All calls are synchronous and report kernel failures as `io::Error`.

use std::io;

use crate::geometry::{FixedRect, Rect, Resolution};

/// Object ids of one consistent resource query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSnapshot {
    /// CRTC ids; the position of an id is its bit in possible-CRTC masks
    pub crtcs: Vec<u32>,
    pub connectors: Vec<u32>,
    pub encoders: Vec<u32>,
    pub planes: Vec<u32>,
}

/// Connection state reported for a connector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Unknown,
}

/// A display timing supported by a connector
#[derive(Debug, Clone)]
pub struct ModeInfo {
    /// Kernel mode name, usually "<width>x<height>"
    pub name: String,
    pub size: Resolution,
    pub vrefresh: u32,
    pub preferred: bool,
    /// Kernel mode descriptor, present for modes read from hardware
    pub(crate) raw: Option<::drm::control::Mode>,
}

impl ModeInfo {
    /// Mode without a kernel descriptor
    pub fn new(width: u32, height: u32, vrefresh: u32) -> Self {
        Self {
            name: format!("{}x{}", width, height),
            size: Resolution::new(width, height),
            vrefresh,
            preferred: false,
            raw: None,
        }
    }
}

// The kernel descriptor is derived data; two modes are equal when
// their reported properties are.
impl PartialEq for ModeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.size == other.size
            && self.vrefresh == other.vrefresh
            && self.preferred == other.preferred
    }
}

impl Eq for ModeInfo {}

/// Connector as reported by the kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorInfo {
    pub id: u32,
    /// Interface name and index, e.g. "HDMI-A-1"
    pub name: String,
    pub state: ConnectionState,
    /// Encoder currently driving the connector
    pub current_encoder: Option<u32>,
    /// Encoders able to drive the connector
    pub encoders: Vec<u32>,
    /// Supported modes in kernel order (may contain duplicates)
    pub modes: Vec<ModeInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInfo {
    pub id: u32,
    /// CRTC the encoder is currently attached to
    pub crtc: Option<u32>,
    /// Bitmask of CRTC indices the encoder can drive
    pub possible_crtcs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrtcInfo {
    pub id: u32,
    pub framebuffer: Option<u32>,
    pub mode: Option<ModeInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneInfo {
    pub id: u32,
    /// Bitmask of CRTC indices the plane can be bound to
    pub possible_crtcs: u32,
    pub crtc: Option<u32>,
    pub framebuffer: Option<u32>,
}

/// Plane classification from the "type" property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaneType {
    Primary,
    Overlay,
    Cursor,
    /// No "type" property or an unrecognised value
    None,
}

impl PlaneType {
    /// Map the kernel enum name of the "type" property
    pub fn from_enum_name(name: &str) -> Self {
        match name {
            "Primary" => PlaneType::Primary,
            "Overlay" => PlaneType::Overlay,
            "Cursor" => PlaneType::Cursor,
            _ => PlaneType::None,
        }
    }
}

/// Handle of a dumb buffer allocated through [`KmsDevice`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DumbBufferId(pub u32);

/// Synchronous kernel mode-setting calls
pub trait KmsDevice {
    /// Device node this handle was opened from
    fn path(&self) -> &str;

    fn resources(&self) -> io::Result<ResourceSnapshot>;

    /// Read a connector. With `probe` the driver re-detects the display
    /// and rebuilds its mode list; without it the last probed state is
    /// returned.
    fn connector(&self, id: u32, probe: bool) -> io::Result<ConnectorInfo>;
    fn encoder(&self, id: u32) -> io::Result<EncoderInfo>;
    fn crtc(&self, id: u32) -> io::Result<CrtcInfo>;
    fn plane(&self, id: u32) -> io::Result<PlaneInfo>;

    /// Classify a plane from its property enumeration
    fn plane_type(&self, id: u32) -> io::Result<PlaneType>;

    /// Raw EDID blob of a connector, if the display reports one
    fn connector_edid(&self, id: u32) -> io::Result<Option<Vec<u8>>>;

    /// Whether the driver supports dumb buffers
    fn has_dumb_buffers(&self) -> io::Result<bool>;

    fn create_dumb_buffer(&self, size: Resolution) -> io::Result<DumbBufferId>;
    fn destroy_dumb_buffer(&self, buffer: DumbBufferId) -> io::Result<()>;

    /// Register a dumb buffer as a framebuffer, returning its id
    fn add_framebuffer(&self, buffer: DumbBufferId) -> io::Result<u32>;
    fn remove_framebuffer(&self, fb: u32) -> io::Result<()>;

    /// Mode-set: scan out `fb` on `crtc` driving `connectors` with `mode`
    fn set_crtc(&self, crtc: u32, fb: u32, connectors: &[u32], mode: &ModeInfo) -> io::Result<()>;

    /// Bind `plane` to `crtc` showing `src` of `fb` at `dst`
    fn set_plane(&self, plane: u32, crtc: u32, fb: u32, dst: Rect, src: FixedRect) -> io::Result<()>;

    /// Set a plane property to an opaque 64-bit value
    fn set_plane_property(&self, plane: u32, property: u32, value: u64) -> io::Result<()>;
}

/// Lowest set bit of a possible-CRTC mask (first fit)
pub fn first_crtc_index(mask: u32) -> Option<u32> {
    if mask == 0 {
        None
    } else {
        Some(mask.trailing_zeros())
    }
}
