//! DRM device management
//!
//! A [`Device`] owns one opened card and the connector, encoder, CRTC
//! and plane lists read from it, and implements topology lookups and
//! mode-setting on top of them.

use log::{debug, error, info, warn};
use std::io;
use std::rc::Rc;

use super::card::Card;
use super::entities::{Connector, Crtc, Encoder, Plane, PlaneProperty};
use super::kms::{first_crtc_index, KmsDevice, ModeInfo, PlaneType};
use super::scanout::ScanoutFb;
use crate::error::{DisplayError, Result};
use crate::geometry::{FixedRect, Rect, Resolution};

/// One DRM device and its display objects
pub struct Device {
    path: String,
    // Declared in reverse discovery order so they are released that way
    planes: Vec<Plane>,
    encoders: Vec<Encoder>,
    connectors: Vec<Connector>,
    crtcs: Vec<Crtc>,
    kms: Option<Rc<dyn KmsDevice>>,
    /// Why the device is unusable, if it is
    failure: Option<DisplayError>,
    dumb_checked: bool,
}

impl Device {
    /// Open a card node and discover its resources.
    ///
    /// Failures are logged and yield an unusable device.
    pub fn open(path: &str) -> Self {
        match Card::open(path) {
            Ok(card) => Self::discover(Rc::new(card)),
            Err(source) => {
                error!("Failed to open {}: {}", path, source);
                Self::failed(DisplayError::DeviceUnavailable {
                    path: path.to_string(),
                    source,
                })
            }
        }
    }

    /// Device that could not be opened or queried
    pub fn unusable(path: &str) -> Self {
        Self {
            path: path.to_string(),
            planes: Vec::new(),
            encoders: Vec::new(),
            connectors: Vec::new(),
            crtcs: Vec::new(),
            kms: None,
            failure: None,
            dumb_checked: false,
        }
    }

    fn failed(failure: DisplayError) -> Self {
        let path = match &failure {
            DisplayError::DeviceUnavailable { path, .. } | DisplayError::Discovery { path, .. } => {
                path.as_str()
            }
            _ => "",
        };
        let mut device = Self::unusable(path);
        device.failure = Some(failure);
        device
    }

    /// Build the object lists from one resource snapshot.
    ///
    /// Objects the kernel fails to describe are logged and skipped.
    /// Cursor planes are never kept.
    pub fn discover(kms: Rc<dyn KmsDevice>) -> Self {
        let path = kms.path().to_string();
        let resources = match kms.resources() {
            Ok(res) => res,
            Err(source) => {
                error!("Failed to get DRM resources for {}: {}", path, source);
                return Self::failed(DisplayError::Discovery { path, source });
            }
        };

        let mut crtcs = Vec::with_capacity(resources.crtcs.len());
        for (index, &id) in resources.crtcs.iter().enumerate() {
            match kms.crtc(id) {
                Ok(_) => crtcs.push(Crtc::new(id, index as u32)),
                Err(e) => warn!("Skipping CRTC {}: {}", id, e),
            }
        }

        let mut connectors = Vec::with_capacity(resources.connectors.len());
        for &id in &resources.connectors {
            match kms.connector(id, true) {
                Ok(info) => connectors.push(Connector::new(Rc::clone(&kms), info)),
                Err(e) => warn!("Skipping connector {}: {}", id, e),
            }
        }

        let mut encoders = Vec::with_capacity(resources.encoders.len());
        for &id in &resources.encoders {
            match kms.encoder(id) {
                Ok(info) => encoders.push(Encoder::new(info)),
                Err(e) => warn!("Skipping encoder {}: {}", id, e),
            }
        }

        let mut planes = Vec::with_capacity(resources.planes.len());
        for &id in &resources.planes {
            let info = match kms.plane(id) {
                Ok(info) => info,
                Err(e) => {
                    warn!("Skipping plane {}: {}", id, e);
                    continue;
                }
            };
            let plane_type = kms.plane_type(id).unwrap_or_else(|e| {
                warn!("Failed to read type of plane {}: {}", id, e);
                PlaneType::None
            });
            if plane_type == PlaneType::Cursor {
                debug!("Ignoring cursor plane {}", id);
                continue;
            }
            planes.push(Plane::new(info, plane_type));
        }

        info!(
            "{}: {} connectors, {} encoders, {} CRTCs, {} planes",
            path,
            connectors.len(),
            encoders.len(),
            crtcs.len(),
            planes.len()
        );

        Self {
            path,
            planes,
            encoders,
            connectors,
            crtcs,
            kms: Some(kms),
            failure: None,
            dumb_checked: false,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the device was opened and its resources read
    pub fn is_usable(&self) -> bool {
        self.kms.is_some()
    }

    /// Open or discovery failure of an unusable device
    pub fn failure(&self) -> Option<&DisplayError> {
        self.failure.as_ref()
    }

    fn kms(&self) -> Result<&Rc<dyn KmsDevice>> {
        self.kms.as_ref().ok_or(DisplayError::NoDevice)
    }

    pub fn connectors(&self) -> &[Connector] {
        &self.connectors
    }

    pub fn encoders(&self) -> &[Encoder] {
        &self.encoders
    }

    pub fn crtcs(&self) -> &[Crtc] {
        &self.crtcs
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn crtc(&self, crtc_id: u32) -> Option<&Crtc> {
        self.crtcs.iter().find(|c| c.id() == crtc_id)
    }

    pub fn plane(&self, plane_id: u32) -> Option<&Plane> {
        self.planes.iter().find(|p| p.id() == plane_id)
    }

    /// Plugged connectors in list order
    pub fn plugged_connectors(&self) -> impl Iterator<Item = &Connector> {
        self.connectors.iter().filter(|c| c.is_plugged())
    }

    /// Connector serving display path `path` (n-th plugged connector)
    pub fn connector_for_path(&self, path: u8) -> Option<&Connector> {
        self.plugged_connectors().nth(path as usize)
    }

    /// Find a CRTC able to drive `connector`.
    ///
    /// The CRTC behind the connector's current encoder wins; otherwise
    /// the first CRTC allowed by any of its encoders.
    pub fn find_crtc_for_connector(&self, connector: &Connector) -> Option<u32> {
        let kms = self.kms.as_ref()?;

        if let Some(encoder_id) = connector.current_encoder() {
            match kms.encoder(encoder_id) {
                Ok(encoder) => {
                    if let Some(crtc) = encoder.crtc {
                        return Some(crtc);
                    }
                }
                Err(e) => debug!("Current encoder {} not found: {}", encoder_id, e),
            }
        }

        for &encoder_id in connector.encoders() {
            let possible = match self.encoders.iter().find(|e| e.id() == encoder_id) {
                Some(encoder) => encoder.possible_crtcs(),
                None => match kms.encoder(encoder_id) {
                    Ok(encoder) => encoder.possible_crtcs,
                    Err(e) => {
                        debug!(
                            "Encoder {} of connector {} not found: {}",
                            encoder_id,
                            connector.id(),
                            e
                        );
                        continue;
                    }
                },
            };

            if let Some(crtc) = self.crtcs.iter().find(|c| possible & c.mask_bit() != 0) {
                return Some(crtc.id());
            }
        }

        None
    }

    /// CRTC a plane is assigned to: the lowest index in its mask
    pub fn find_crtc_for_plane(&self, plane_id: u32) -> Option<u32> {
        let plane = self.plane(plane_id)?;
        let index = first_crtc_index(plane.possible_crtcs())?;
        self.crtcs
            .iter()
            .find(|c| c.index() == index)
            .map(|c| c.id())
    }

    /// Connector bound to the CRTC of a plane
    pub fn find_connector_for_plane(&self, plane_id: u32) -> Option<u32> {
        let crtc_id = self.find_crtc_for_plane(plane_id)?;
        self.connectors
            .iter()
            .find(|c| c.crtc_id() == Some(crtc_id))
            .map(|c| c.id())
    }

    /// Fail fatally when the driver cannot allocate dumb buffers.
    /// Checked once per device.
    fn check_dumb_buffers(&mut self) -> Result<()> {
        if self.dumb_checked {
            return Ok(());
        }
        let kms = self.kms()?;
        let supported = kms.has_dumb_buffers().unwrap_or_else(|e| {
            error!("Failed to query dumb buffer capability of {}: {}", self.path, e);
            false
        });
        if !supported {
            return Err(DisplayError::NoDumbBuffers(self.path.clone()));
        }
        self.dumb_checked = true;
        Ok(())
    }

    /// Bind every plugged connector to a CRTC and derive per-CRTC
    /// resolution bounds for `target`.
    ///
    /// The max bound is the connector's largest mode when that is
    /// smaller than `target` in either dimension, `target` otherwise.
    pub fn setup(&mut self, target: Resolution) -> Result<()> {
        self.check_dumb_buffers()?;

        for i in 0..self.connectors.len() {
            if !self.connectors[i].is_plugged() {
                continue;
            }
            if let Err(e) = self.connectors[i].refresh() {
                warn!(
                    "Failed to refresh connector {}: {}",
                    self.connectors[i].id(),
                    e
                );
            }

            let Some(crtc_id) = self.find_crtc_for_connector(&self.connectors[i]) else {
                error!(
                    "{}",
                    DisplayError::NoCrtcForConnector {
                        connector: self.connectors[i].id()
                    }
                );
                continue;
            };

            let connector = &mut self.connectors[i];
            connector.set_crtc_id(crtc_id);
            let (min, max) = connector.mode_range();
            let connector_id = connector.id();

            if let Some(crtc) = self.crtcs.iter_mut().find(|c| c.id() == crtc_id) {
                crtc.bind_connector(connector_id);
                crtc.max = if (max.width < target.width || max.height < target.height)
                    && !max.is_empty()
                {
                    max
                } else {
                    target
                };
                crtc.min = min;
                debug!(
                    "Connector {} -> CRTC {}: min {}, max {}",
                    connector_id, crtc_id, crtc.min, crtc.max
                );
            }
        }
        Ok(())
    }

    /// Resolution bounds of a CRTC as derived by [`Device::setup`]
    pub fn mode_range(&self, crtc_id: u32) -> Option<(Resolution, Resolution)> {
        self.crtc(crtc_id).map(|c| (c.min(), c.max()))
    }

    /// Scan out a `size` framebuffer on a CRTC.
    ///
    /// Every plugged connector bound to the CRTC must support the
    /// "<width>x<height>" mode (`vrefresh` 0 = any rate). Validation
    /// failures leave the CRTC untouched. The previous framebuffer is
    /// released before a new one is created. A mode-set rejected by the
    /// kernel is reported, but the new framebuffer stays allocated.
    pub fn set_active_mode(&mut self, crtc_id: u32, size: Resolution, vrefresh: u32) -> Result<()> {
        let kms = Rc::clone(self.kms()?);
        debug!("setActiveMode to {} on CRTC {}", size, crtc_id);

        let crtc_pos = self
            .crtcs
            .iter()
            .position(|c| c.id() == crtc_id)
            .ok_or(DisplayError::UnknownCrtc(crtc_id))?;

        let connector_ids: Vec<u32> = self.crtcs[crtc_pos].connectors().iter().copied().collect();
        if connector_ids.is_empty() {
            info!("No connectors set for CRTC {}", crtc_id);
            return Err(DisplayError::NoConnectors(crtc_id));
        }

        let mut mode: Option<ModeInfo> = None;
        for &connector_id in &connector_ids {
            let Some(connector) = self.connectors.iter().find(|c| c.id() == connector_id) else {
                warn!("Connector {} of CRTC {} is gone", connector_id, crtc_id);
                continue;
            };
            if !connector.is_plugged() {
                debug!("Ignoring unused connector {}", connector_id);
                continue;
            }
            match connector.mode(size, vrefresh) {
                Some(found) => {
                    if mode.is_none() {
                        mode = Some(found.clone());
                    }
                }
                None => {
                    let err = DisplayError::ModeUnsupported {
                        mode: size,
                        connector: connector_id,
                    };
                    error!("{}", err);
                    return Err(err);
                }
            }
        }

        let Some(mode) = mode else {
            let err = DisplayError::NoUsableMode(crtc_id);
            error!("{}", err);
            return Err(err);
        };

        let crtc = &mut self.crtcs[crtc_pos];
        let reuse = crtc.scanout.as_ref().map(|fb| fb.size() == size).unwrap_or(false);
        if !reuse {
            // Release the old framebuffer before allocating the new one
            crtc.scanout = None;
            crtc.modeset_ok = false;
            crtc.scanout = Some(ScanoutFb::create(&kms, size)?);
        }
        let fb_id = crtc.scanout.as_ref().map(|fb| fb.fb_id()).unwrap_or(0);

        debug!(
            "CRTC {}: scanout fb {}, connectors {:?}",
            crtc_id, fb_id, connector_ids
        );
        match kms.set_crtc(crtc_id, fb_id, &connector_ids, &mode) {
            Ok(()) => {
                crtc.modeset_ok = true;
                info!("CRTC {}: mode {} @ {}Hz", crtc_id, mode.name, mode.vrefresh);
                Ok(())
            }
            Err(source) => {
                crtc.modeset_ok = false;
                error!("Failed to set mode {} on CRTC {}: {}", mode.name, crtc_id, source);
                Err(DisplayError::ModeSet {
                    crtc: crtc_id,
                    source,
                })
            }
        }
    }

    /// Update a CRTC's max bound after a successful mode change
    pub(crate) fn set_crtc_max(&mut self, crtc_id: u32, max: Resolution) {
        if let Some(crtc) = self.crtcs.iter_mut().find(|c| c.id() == crtc_id) {
            crtc.max = max;
        }
    }

    /// Show `src` of framebuffer `fb_id` at `dst` on a plane.
    ///
    /// The plane is bound to the CRTC of the first connector that has
    /// one. Source coordinates are converted to 16.16 fixed point and
    /// rejected when they do not fit.
    pub fn set_plane(&self, plane_id: u32, fb_id: u32, dst: Rect, src: Rect) -> Result<()> {
        let kms = self.kms()?;
        debug!(
            "Applying set plane to output {:?} for source {:?}, plane {}",
            dst, src, plane_id
        );

        let crtc_id = self
            .connectors
            .iter()
            .filter_map(|c| c.crtc_id())
            .find(|&id| self.crtc(id).is_some())
            .ok_or(DisplayError::NoBoundCrtc)?;

        let fixed = FixedRect::from_pixels(src).ok_or_else(|| {
            error!("Source {:?} of plane {} out of 16.16 range", src, plane_id);
            DisplayError::SetPlane {
                plane: plane_id,
                crtc: crtc_id,
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("source rectangle {:?} out of range", src),
                ),
            }
        })?;

        kms.set_plane(plane_id, crtc_id, fb_id, dst, fixed)
            .map_err(|source| {
                error!("Failed to set plane {} on CRTC {}: {}", plane_id, crtc_id, source);
                DisplayError::SetPlane {
                    plane: plane_id,
                    crtc: crtc_id,
                    source,
                }
            })
    }

    /// Set a vendor plane property to an opaque value
    pub fn set_plane_property(&self, property: PlaneProperty, plane_id: u32, value: u64) -> Result<()> {
        let kms = self.kms()?;
        debug!(
            "property {:?}, plane {}, value {}",
            property, plane_id, value
        );
        kms.set_plane_property(plane_id, property.key(), value)
            .map_err(|source| {
                error!(
                    "Failed to set property {:?} on plane {}: {}",
                    property, plane_id, source
                );
                DisplayError::SetProperty {
                    plane: plane_id,
                    property: property.key(),
                    source,
                }
            })
    }

    /// Planes reachable from CRTCs that drive at least one connector
    pub fn active_planes(&self) -> Vec<u32> {
        let mut planes = Vec::new();
        for crtc in self.crtcs.iter().filter(|c| !c.connectors().is_empty()) {
            for plane in self.planes.iter().filter(|p| p.supports_crtc_index(crtc.index())) {
                if !planes.contains(&plane.id()) {
                    debug!("Plane {} usable on CRTC {}", plane.id(), crtc.id());
                    planes.push(plane.id());
                }
            }
        }
        planes
    }
}
