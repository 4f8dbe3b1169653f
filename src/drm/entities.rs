//! Typed views over kernel display objects
//!
//! Connector, CRTC, encoder and plane wrappers holding the ids and
//! capability data reported at discovery plus the association state the
//! resource manager maintains on top of them.

use log::{debug, warn};
use std::collections::BTreeSet;
use std::io;
use std::rc::Rc;

use super::kms::{
    ConnectionState, ConnectorInfo, EncoderInfo, KmsDevice, ModeInfo, PlaneInfo, PlaneType,
};
use super::scanout::ScanoutFb;
use crate::constants::{PLANE_PROP_FB, PLANE_PROP_SCALING, PLANE_PROP_Z_ORDER};
use crate::geometry::Resolution;

/// Vendor plane properties understood by the display driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneProperty {
    /// Framebuffer id shown by the plane (0 detaches)
    Framebuffer,
    /// Packed z-order of all planes
    ZOrder,
    /// Address of the scaling parameters
    Scaling,
}

impl PlaneProperty {
    pub fn key(self) -> u32 {
        match self {
            PlaneProperty::Framebuffer => PLANE_PROP_FB,
            PlaneProperty::ZOrder => PLANE_PROP_Z_ORDER,
            PlaneProperty::Scaling => PLANE_PROP_SCALING,
        }
    }
}

/// Opaque EDID blob reported by a display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edid(Vec<u8>);

impl Edid {
    const HEADER: [u8; 8] = [0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];

    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// True when the blob holds at least a base block with a valid header
    pub fn has_valid_header(&self) -> bool {
        self.0.len() >= 128 && self.0[0..8] == Self::HEADER
    }
}

/// Physical display output
pub struct Connector {
    kms: Rc<dyn KmsDevice>,
    info: ConnectorInfo,
    /// CRTC driving this connector (0 = unbound)
    crtc_id: u32,
}

impl Connector {
    pub fn new(kms: Rc<dyn KmsDevice>, info: ConnectorInfo) -> Self {
        Self {
            kms,
            info,
            crtc_id: 0,
        }
    }

    pub fn id(&self) -> u32 {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn current_encoder(&self) -> Option<u32> {
        self.info.current_encoder
    }

    pub fn encoders(&self) -> &[u32] {
        &self.info.encoders
    }

    /// Supported modes in kernel order
    pub fn modes(&self) -> &[ModeInfo] {
        &self.info.modes
    }

    /// CRTC bound by the last setup, if any
    pub fn crtc_id(&self) -> Option<u32> {
        (self.crtc_id != 0).then_some(self.crtc_id)
    }

    pub(crate) fn set_crtc_id(&mut self, crtc_id: u32) {
        self.crtc_id = crtc_id;
    }

    /// Query the plug state from the kernel (never cached)
    pub fn is_plugged(&self) -> bool {
        match self.kms.connector(self.info.id, false) {
            Ok(info) => info.state == ConnectionState::Connected,
            Err(e) => {
                warn!("Failed to query connector {} state: {}", self.info.id, e);
                false
            }
        }
    }

    /// Re-probe the display and re-read encoders and modes
    pub fn refresh(&mut self) -> io::Result<()> {
        let info = self.kms.connector(self.info.id, true)?;
        debug!(
            "Connector {} refreshed: {} modes",
            self.info.id,
            info.modes.len()
        );
        self.info = info;
        Ok(())
    }

    /// Find the mode named "<width>x<height>".
    ///
    /// A `vrefresh` of 0 accepts any refresh rate.
    pub fn mode(&self, size: Resolution, vrefresh: u32) -> Option<&ModeInfo> {
        let name = size.mode_name();
        self.info
            .modes
            .iter()
            .find(|m| m.name == name && (vrefresh == 0 || m.vrefresh == vrefresh))
    }

    pub fn is_mode_supported(&self, size: Resolution, vrefresh: u32) -> bool {
        self.mode(size, vrefresh).is_some()
    }

    /// Supported sizes, one entry per (width, height)
    pub fn supported_modes(&self) -> Vec<Resolution> {
        let mut sizes: Vec<Resolution> = Vec::with_capacity(self.info.modes.len());
        for mode in &self.info.modes {
            if !sizes.contains(&mode.size) {
                sizes.push(mode.size);
            }
        }
        sizes
    }

    /// Smallest and largest supported size by pixel count.
    ///
    /// Both are zero when the connector reports no modes.
    pub fn mode_range(&self) -> (Resolution, Resolution) {
        let min = self.info.modes.iter().map(|m| m.size).min_by_key(|s| s.area());
        let max = self.info.modes.iter().map(|m| m.size).max_by_key(|s| s.area());
        (min.unwrap_or_default(), max.unwrap_or_default())
    }

    pub fn edid(&self) -> Option<Edid> {
        match self.kms.connector_edid(self.info.id) {
            Ok(blob) => blob.map(Edid::new),
            Err(e) => {
                debug!("No EDID for connector {}: {}", self.info.id, e);
                None
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Encoder {
    info: EncoderInfo,
}

impl Encoder {
    pub fn new(info: EncoderInfo) -> Self {
        Self { info }
    }

    pub fn id(&self) -> u32 {
        self.info.id
    }

    pub fn possible_crtcs(&self) -> u32 {
        self.info.possible_crtcs
    }
}

/// Mode-set progress of a CRTC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrtcState {
    /// No connectors bound
    Idle,
    /// Connectors bound, no scanout buffer
    Bound,
    /// Scanout buffer allocated and mode applied
    Active,
    /// Scanout buffer allocated but the kernel rejected the mode-set.
    /// The buffer is kept.
    ModesetFailed,
}

/// Scanout timing engine
pub struct Crtc {
    id: u32,
    /// Bit position in possible-CRTC masks
    index: u32,
    connectors: BTreeSet<u32>,
    pub(crate) min: Resolution,
    pub(crate) max: Resolution,
    pub(crate) scanout: Option<ScanoutFb>,
    pub(crate) modeset_ok: bool,
}

impl Crtc {
    pub fn new(id: u32, index: u32) -> Self {
        Self {
            id,
            index,
            connectors: BTreeSet::new(),
            min: Resolution::default(),
            max: Resolution::default(),
            scanout: None,
            modeset_ok: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Bit of this CRTC in possible-CRTC masks
    pub fn mask_bit(&self) -> u32 {
        1u32.checked_shl(self.index).unwrap_or(0)
    }

    pub fn connectors(&self) -> &BTreeSet<u32> {
        &self.connectors
    }

    /// Drive exactly `connector` from now on
    pub(crate) fn bind_connector(&mut self, connector: u32) {
        self.connectors.clear();
        self.connectors.insert(connector);
    }

    pub fn min(&self) -> Resolution {
        self.min
    }

    pub fn max(&self) -> Resolution {
        self.max
    }

    pub fn scanout(&self) -> Option<&ScanoutFb> {
        self.scanout.as_ref()
    }

    pub fn state(&self) -> CrtcState {
        match (&self.scanout, self.connectors.is_empty()) {
            (_, true) => CrtcState::Idle,
            (None, false) => CrtcState::Bound,
            (Some(_), false) if self.modeset_ok => CrtcState::Active,
            (Some(_), false) => CrtcState::ModesetFailed,
        }
    }
}

/// Hardware primary or overlay surface
#[derive(Debug, Clone)]
pub struct Plane {
    info: PlaneInfo,
    plane_type: PlaneType,
}

impl Plane {
    pub fn new(info: PlaneInfo, plane_type: PlaneType) -> Self {
        Self { info, plane_type }
    }

    pub fn id(&self) -> u32 {
        self.info.id
    }

    pub fn possible_crtcs(&self) -> u32 {
        self.info.possible_crtcs
    }

    pub fn plane_type(&self) -> PlaneType {
        self.plane_type
    }

    /// Whether the plane may be bound to the CRTC at `index`
    pub fn supports_crtc_index(&self, index: u32) -> bool {
        1u32.checked_shl(index)
            .map(|bit| self.info.possible_crtcs & bit != 0)
            .unwrap_or(false)
    }
}
