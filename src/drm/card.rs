//! DRM card access
//!
//! Opens a DRM device (/dev/dri/card*) and implements [`KmsDevice`]
//! on top of the `drm` crate.

use drm::buffer::DrmFourcc;
use drm::control::dumbbuffer::DumbBuffer;
use drm::control::{
    connector, crtc, encoder, framebuffer, plane, property, Device as ControlDevice, Mode,
    ModeTypeFlags, RawResourceHandle, ResourceHandles,
};
use drm::Device as BasicDevice;
use log::{debug, info, trace, warn};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::{AsFd, BorrowedFd};
use std::path::Path;

use super::kms::{
    ConnectionState, ConnectorInfo, CrtcInfo, DumbBufferId, EncoderInfo, KmsDevice, ModeInfo,
    PlaneInfo, PlaneType, ResourceSnapshot,
};
use crate::constants::{EDID_PROPERTY, PLANE_TYPE_PROPERTY, SCANOUT_BPP, SCANOUT_DEPTH};
use crate::geometry::{FixedRect, Rect, Resolution};

/// Opened DRM card
pub struct Card {
    file: File,
    path: String,
    resources: ResourceHandles,
    /// Dumb buffers allocated through this card, by id
    buffers: RefCell<HashMap<u32, DumbBuffer>>,
    next_buffer: Cell<u32>,
}

// Trait implementations required by drm crate
impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl BasicDevice for Card {}
impl ControlDevice for Card {}

impl Card {
    /// Open DRM device
    ///
    /// # Arguments
    /// * `path` - Device path (e.g., "/dev/dri/card0")
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        info!("Opening DRM device: {}", path.display());

        let file = OpenOptions::new().read(true).write(true).open(path)?;

        // Create temporary device wrapper to get resources
        struct TempDevice<'a>(&'a File);
        impl AsFd for TempDevice<'_> {
            fn as_fd(&self) -> BorrowedFd<'_> {
                self.0.as_fd()
            }
        }
        impl BasicDevice for TempDevice<'_> {}
        impl ControlDevice for TempDevice<'_> {}

        let resources = TempDevice(&file).resource_handles()?;

        info!(
            "DRM resources: connectors={}, crtcs={}, encoders={}, framebuffers={}",
            resources.connectors().len(),
            resources.crtcs().len(),
            resources.encoders().len(),
            resources.framebuffers().len()
        );

        Ok(Self {
            file,
            path: path.display().to_string(),
            resources,
            buffers: RefCell::new(HashMap::new()),
            next_buffer: Cell::new(1),
        })
    }

    /// Convert the CRTC filter of an encoder or plane to a bitmask of
    /// CRTC indices.
    fn crtc_mask(&self, filter: drm::control::CrtcListFilter) -> u32 {
        let all = self.resources.crtcs();
        self.resources
            .filter_crtcs(filter)
            .iter()
            .filter_map(|handle| all.iter().position(|c| c == handle))
            .filter(|&index| index < 32)
            .fold(0, |mask, index| mask | (1 << index))
    }

    /// Find a property of an object by name, returning its value
    fn find_property<H: drm::control::ResourceHandle>(
        &self,
        handle: H,
        name: &str,
    ) -> io::Result<Option<(property::Handle, property::RawValue)>> {
        let props = self.get_properties(handle)?;
        let (ids, values) = props.as_props_and_values();
        for (&id, &value) in ids.iter().zip(values.iter()) {
            let Ok(info) = self.get_property(id) else {
                continue;
            };
            if info.name().to_str().map(|n| n == name).unwrap_or(false) {
                return Ok(Some((id, value)));
            }
        }
        Ok(None)
    }
}

fn object<H: From<RawResourceHandle>>(id: u32) -> io::Result<H> {
    drm::control::from_u32(id).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("invalid object id {}", id))
    })
}

fn mode_info(mode: &Mode) -> ModeInfo {
    let (width, height) = mode.size();
    ModeInfo {
        name: mode.name().to_string_lossy().into_owned(),
        size: Resolution::new(width as u32, height as u32),
        vrefresh: mode.vrefresh(),
        preferred: mode.mode_type().contains(ModeTypeFlags::PREFERRED),
        raw: Some(*mode),
    }
}

impl KmsDevice for Card {
    fn path(&self) -> &str {
        &self.path
    }

    fn resources(&self) -> io::Result<ResourceSnapshot> {
        let resources = self.resource_handles()?;
        let planes = self.plane_handles()?;
        Ok(ResourceSnapshot {
            crtcs: resources.crtcs().iter().map(|&h| u32::from(h)).collect(),
            connectors: resources.connectors().iter().map(|&h| u32::from(h)).collect(),
            encoders: resources.encoders().iter().map(|&h| u32::from(h)).collect(),
            planes: planes.iter().map(|&h| u32::from(h)).collect(),
        })
    }

    fn connector(&self, id: u32, probe: bool) -> io::Result<ConnectorInfo> {
        let info = self.get_connector(object::<connector::Handle>(id)?, probe)?;
        let state = match info.state() {
            connector::State::Connected => ConnectionState::Connected,
            connector::State::Disconnected => ConnectionState::Disconnected,
            connector::State::Unknown => ConnectionState::Unknown,
        };
        Ok(ConnectorInfo {
            id,
            name: format!("{:?}-{}", info.interface(), info.interface_id()),
            state,
            current_encoder: info.current_encoder().map(u32::from),
            encoders: info.encoders().iter().map(|&h| u32::from(h)).collect(),
            modes: info.modes().iter().map(mode_info).collect(),
        })
    }

    fn encoder(&self, id: u32) -> io::Result<EncoderInfo> {
        let info = self.get_encoder(object::<encoder::Handle>(id)?)?;
        Ok(EncoderInfo {
            id,
            crtc: info.crtc().map(u32::from),
            possible_crtcs: self.crtc_mask(info.possible_crtcs()),
        })
    }

    fn crtc(&self, id: u32) -> io::Result<CrtcInfo> {
        let info = self.get_crtc(object::<crtc::Handle>(id)?)?;
        Ok(CrtcInfo {
            id,
            framebuffer: info.framebuffer().map(u32::from),
            mode: info.mode().as_ref().map(mode_info),
        })
    }

    fn plane(&self, id: u32) -> io::Result<PlaneInfo> {
        let info = self.get_plane(object::<plane::Handle>(id)?)?;
        Ok(PlaneInfo {
            id,
            possible_crtcs: self.crtc_mask(info.possible_crtcs()),
            crtc: info.crtc().map(u32::from),
            framebuffer: info.framebuffer().map(u32::from),
        })
    }

    fn plane_type(&self, id: u32) -> io::Result<PlaneType> {
        let handle = object::<plane::Handle>(id)?;
        let Some((prop, value)) = self.find_property(handle, PLANE_TYPE_PROPERTY)? else {
            debug!("Plane {} has no type property", id);
            return Ok(PlaneType::None);
        };
        let info = self.get_property(prop)?;
        let plane_type = match info.value_type().convert_value(value) {
            property::Value::Enum(Some(val)) => {
                PlaneType::from_enum_name(&val.name().to_string_lossy())
            }
            _ => PlaneType::None,
        };
        trace!("Type of plane {}: {:?}", id, plane_type);
        Ok(plane_type)
    }

    fn connector_edid(&self, id: u32) -> io::Result<Option<Vec<u8>>> {
        let handle = object::<connector::Handle>(id)?;
        match self.find_property(handle, EDID_PROPERTY)? {
            Some((_, 0)) | None => Ok(None),
            Some((_, blob)) => self.get_property_blob(blob).map(Some),
        }
    }

    fn has_dumb_buffers(&self) -> io::Result<bool> {
        Ok(self.get_driver_capability(drm::DriverCapability::DumbBuffer)? != 0)
    }

    fn create_dumb_buffer(&self, size: Resolution) -> io::Result<DumbBufferId> {
        let buffer = ControlDevice::create_dumb_buffer(
            self,
            (size.width, size.height),
            DrmFourcc::Xrgb8888,
            SCANOUT_BPP,
        )?;
        let id = self.next_buffer.get();
        self.next_buffer.set(id.wrapping_add(1).max(1));
        self.buffers.borrow_mut().insert(id, buffer);
        debug!("Dumb buffer {} created: {}", id, size);
        Ok(DumbBufferId(id))
    }

    fn destroy_dumb_buffer(&self, buffer: DumbBufferId) -> io::Result<()> {
        let db = self.buffers.borrow_mut().remove(&buffer.0).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("unknown dumb buffer {}", buffer.0),
            )
        })?;
        ControlDevice::destroy_dumb_buffer(self, db)
    }

    fn add_framebuffer(&self, buffer: DumbBufferId) -> io::Result<u32> {
        let buffers = self.buffers.borrow();
        let db = buffers.get(&buffer.0).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("unknown dumb buffer {}", buffer.0),
            )
        })?;
        let fb = ControlDevice::add_framebuffer(self, db, SCANOUT_DEPTH, SCANOUT_BPP)?;
        Ok(u32::from(fb))
    }

    fn remove_framebuffer(&self, fb: u32) -> io::Result<()> {
        self.destroy_framebuffer(object::<framebuffer::Handle>(fb)?)
    }

    fn set_crtc(&self, crtc: u32, fb: u32, connectors: &[u32], mode: &ModeInfo) -> io::Result<()> {
        let raw = mode.raw.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("mode {} has no kernel descriptor", mode.name),
            )
        })?;
        let connectors = connectors
            .iter()
            .map(|&id| object::<connector::Handle>(id))
            .collect::<io::Result<Vec<_>>>()?;
        ControlDevice::set_crtc(
            self,
            object::<crtc::Handle>(crtc)?,
            Some(object::<framebuffer::Handle>(fb)?),
            (0, 0),
            &connectors,
            Some(raw),
        )
    }

    fn set_plane(&self, plane: u32, crtc: u32, fb: u32, dst: Rect, src: FixedRect) -> io::Result<()> {
        let fb = if fb == 0 {
            None
        } else {
            Some(object::<framebuffer::Handle>(fb)?)
        };
        ControlDevice::set_plane(
            self,
            object::<plane::Handle>(plane)?,
            object::<crtc::Handle>(crtc)?,
            fb,
            0,
            (dst.x, dst.y, dst.width, dst.height),
            (src.x, src.y, src.width, src.height),
        )
    }

    fn set_plane_property(&self, plane: u32, property: u32, value: u64) -> io::Result<()> {
        self.set_property(
            object::<plane::Handle>(plane)?,
            object::<property::Handle>(property)?,
            value,
        )
    }
}

impl Drop for Card {
    fn drop(&mut self) {
        // Buffers still tracked here were never released by their owner
        let leftover: Vec<_> = self.buffers.get_mut().drain().collect();
        for (id, db) in leftover {
            debug!("Releasing leftover dumb buffer {}", id);
            if let Err(e) = ControlDevice::destroy_dumb_buffer(&*self, db) {
                warn!("Failed to destroy dumb buffer {}: {}", id, e);
            }
        }
    }
}
