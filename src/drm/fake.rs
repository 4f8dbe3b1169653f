//! In-memory KMS device for tests
//!
//! Records buffer, framebuffer and mode-set traffic so tests can check
//! resource ownership without hardware.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;

use super::kms::{
    ConnectionState, ConnectorInfo, CrtcInfo, DumbBufferId, EncoderInfo, KmsDevice, ModeInfo,
    PlaneInfo, PlaneType, ResourceSnapshot,
};
use crate::geometry::{FixedRect, Rect, Resolution};

#[derive(Debug, Clone)]
pub struct FakeConnector {
    info: ConnectorInfo,
}

impl FakeConnector {
    pub fn plugged(id: u32) -> Self {
        Self {
            info: ConnectorInfo {
                id,
                name: format!("HDMIA-{}", id),
                state: ConnectionState::Connected,
                current_encoder: None,
                encoders: Vec::new(),
                modes: Vec::new(),
            },
        }
    }

    pub fn unplugged(id: u32) -> Self {
        let mut conn = Self::plugged(id);
        conn.info.state = ConnectionState::Disconnected;
        conn
    }

    pub fn modes(mut self, modes: &[(u32, u32, u32)]) -> Self {
        self.info.modes = modes
            .iter()
            .map(|&(w, h, hz)| ModeInfo::new(w, h, hz))
            .collect();
        self
    }

    pub fn encoders(mut self, encoders: &[u32]) -> Self {
        self.info.encoders = encoders.to_vec();
        self
    }

    pub fn current_encoder(mut self, encoder: u32) -> Self {
        self.info.current_encoder = Some(encoder);
        self
    }
}

/// Mode-set call as seen by the fake kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeSet {
    pub crtc: u32,
    pub fb: u32,
    pub connectors: Vec<u32>,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneSet {
    pub plane: u32,
    pub crtc: u32,
    pub fb: u32,
    pub dst: Rect,
    pub src: FixedRect,
}

#[derive(Default)]
pub struct FakeKmsBuilder {
    path: Option<String>,
    crtcs: Vec<u32>,
    encoders: Vec<EncoderInfo>,
    connectors: Vec<FakeConnector>,
    planes: Vec<(PlaneInfo, PlaneType)>,
    no_dumb_buffers: bool,
}

impl FakeKmsBuilder {
    pub fn path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    pub fn crtc(mut self, id: u32) -> Self {
        self.crtcs.push(id);
        self
    }

    pub fn encoder(mut self, id: u32, possible_crtcs: u32) -> Self {
        self.encoders.push(EncoderInfo {
            id,
            crtc: None,
            possible_crtcs,
        });
        self
    }

    /// Encoder already attached to `crtc`
    pub fn attached_encoder(mut self, id: u32, possible_crtcs: u32, crtc: u32) -> Self {
        self.encoders.push(EncoderInfo {
            id,
            crtc: Some(crtc),
            possible_crtcs,
        });
        self
    }

    pub fn connector(mut self, connector: FakeConnector) -> Self {
        self.connectors.push(connector);
        self
    }

    pub fn plane(mut self, id: u32, possible_crtcs: u32, plane_type: PlaneType) -> Self {
        self.planes.push((
            PlaneInfo {
                id,
                possible_crtcs,
                crtc: None,
                framebuffer: None,
            },
            plane_type,
        ));
        self
    }

    pub fn without_dumb_buffers(mut self) -> Self {
        self.no_dumb_buffers = true;
        self
    }

    pub fn build(self) -> FakeKms {
        let connectors: Vec<ConnectorInfo> = self.connectors.into_iter().map(|c| c.info).collect();
        FakeKms {
            path: self.path.unwrap_or_else(|| "/dev/dri/card0".to_string()),
            crtcs: self.crtcs,
            encoders: self.encoders,
            probed_modes: RefCell::new(
                connectors
                    .iter()
                    .map(|c| (c.id, c.modes.clone()))
                    .collect(),
            ),
            connectors: RefCell::new(connectors),
            probes: RefCell::new(Vec::new()),
            failing_objects: RefCell::new(HashSet::new()),
            planes: self.planes,
            dumb_buffers: !self.no_dumb_buffers,
            buffers: RefCell::new(HashMap::new()),
            framebuffers: RefCell::new(BTreeMap::new()),
            next_id: Cell::new(100),
            max_live_framebuffers: Cell::new(0),
            modesets: RefCell::new(Vec::new()),
            plane_sets: RefCell::new(Vec::new()),
            properties: RefCell::new(Vec::new()),
            fail_resources: Cell::new(false),
            fail_create_buffer: Cell::new(false),
            fail_add_framebuffer: Cell::new(false),
            fail_set_crtc: Cell::new(false),
            fail_set_plane: Cell::new(false),
            fail_set_property: Cell::new(false),
        }
    }
}

pub struct FakeKms {
    path: String,
    crtcs: Vec<u32>,
    encoders: Vec<EncoderInfo>,
    /// Current hardware state of each connector
    connectors: RefCell<Vec<ConnectorInfo>>,
    /// Mode lists as of the last probe
    probed_modes: RefCell<HashMap<u32, Vec<ModeInfo>>>,
    probes: RefCell<Vec<u32>>,
    failing_objects: RefCell<HashSet<u32>>,
    planes: Vec<(PlaneInfo, PlaneType)>,
    dumb_buffers: bool,
    buffers: RefCell<HashMap<u32, Resolution>>,
    framebuffers: RefCell<BTreeMap<u32, DumbBufferId>>,
    next_id: Cell<u32>,
    max_live_framebuffers: Cell<usize>,
    modesets: RefCell<Vec<ModeSet>>,
    plane_sets: RefCell<Vec<PlaneSet>>,
    properties: RefCell<Vec<(u32, u32, u64)>>,
    fail_resources: Cell<bool>,
    fail_create_buffer: Cell<bool>,
    fail_add_framebuffer: Cell<bool>,
    fail_set_crtc: Cell<bool>,
    fail_set_plane: Cell<bool>,
    fail_set_property: Cell<bool>,
}

fn not_found(what: &str, id: u32) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{} {} not found", what, id))
}

fn rejected(call: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, format!("{} rejected", call))
}

impl FakeKms {
    pub fn builder() -> FakeKmsBuilder {
        FakeKmsBuilder::default()
    }

    fn next_id(&self) -> u32 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    pub fn set_plugged(&self, connector: u32, plugged: bool) {
        if let Some(c) = self.connectors.borrow_mut().iter_mut().find(|c| c.id == connector) {
            c.state = if plugged {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            };
        }
    }

    /// Change what the display reports. Visible only after a probe.
    pub fn set_modes(&self, connector: u32, modes: &[(u32, u32, u32)]) {
        if let Some(c) = self.connectors.borrow_mut().iter_mut().find(|c| c.id == connector) {
            c.modes = modes
                .iter()
                .map(|&(w, h, hz)| ModeInfo::new(w, h, hz))
                .collect();
        }
    }

    /// Make every query of a connector, encoder, CRTC or plane fail
    pub fn fail_object(&self, id: u32) {
        self.failing_objects.borrow_mut().insert(id);
    }

    fn check_object(&self, what: &str, id: u32) -> io::Result<()> {
        if self.failing_objects.borrow().contains(&id) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} {} query failed", what, id),
            ));
        }
        Ok(())
    }

    /// Connectors probed so far, in call order
    pub fn probes(&self) -> Vec<u32> {
        self.probes.borrow().clone()
    }

    pub fn fail_resources(&self, fail: bool) {
        self.fail_resources.set(fail);
    }

    pub fn fail_create_buffer(&self, fail: bool) {
        self.fail_create_buffer.set(fail);
    }

    pub fn fail_add_framebuffer(&self, fail: bool) {
        self.fail_add_framebuffer.set(fail);
    }

    pub fn fail_set_crtc(&self, fail: bool) {
        self.fail_set_crtc.set(fail);
    }

    pub fn fail_set_plane(&self, fail: bool) {
        self.fail_set_plane.set(fail);
    }

    pub fn fail_set_property(&self, fail: bool) {
        self.fail_set_property.set(fail);
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.borrow().len()
    }

    pub fn live_framebuffers(&self) -> Vec<u32> {
        self.framebuffers.borrow().keys().copied().collect()
    }

    /// Highest number of simultaneously registered framebuffers
    pub fn max_live_framebuffers(&self) -> usize {
        self.max_live_framebuffers.get()
    }

    pub fn modesets(&self) -> Vec<ModeSet> {
        self.modesets.borrow().clone()
    }

    pub fn plane_sets(&self) -> Vec<PlaneSet> {
        self.plane_sets.borrow().clone()
    }

    pub fn properties(&self) -> Vec<(u32, u32, u64)> {
        self.properties.borrow().clone()
    }
}

impl KmsDevice for FakeKms {
    fn path(&self) -> &str {
        &self.path
    }

    fn resources(&self) -> io::Result<ResourceSnapshot> {
        if self.fail_resources.get() {
            return Err(rejected("GETRESOURCES"));
        }
        Ok(ResourceSnapshot {
            crtcs: self.crtcs.clone(),
            connectors: self.connectors.borrow().iter().map(|c| c.id).collect(),
            encoders: self.encoders.iter().map(|e| e.id).collect(),
            planes: self.planes.iter().map(|(p, _)| p.id).collect(),
        })
    }

    fn connector(&self, id: u32, probe: bool) -> io::Result<ConnectorInfo> {
        self.check_object("connector", id)?;
        let mut info = self
            .connectors
            .borrow()
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| not_found("connector", id))?;
        let mut probed = self.probed_modes.borrow_mut();
        if probe {
            self.probes.borrow_mut().push(id);
            probed.insert(id, info.modes.clone());
        } else {
            info.modes = probed.get(&id).cloned().unwrap_or_default();
        }
        Ok(info)
    }

    fn encoder(&self, id: u32) -> io::Result<EncoderInfo> {
        self.check_object("encoder", id)?;
        self.encoders
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| not_found("encoder", id))
    }

    fn crtc(&self, id: u32) -> io::Result<CrtcInfo> {
        self.check_object("crtc", id)?;
        if !self.crtcs.contains(&id) {
            return Err(not_found("crtc", id));
        }
        let last = self.modesets.borrow().iter().rev().find(|m| m.crtc == id).cloned();
        Ok(CrtcInfo {
            id,
            framebuffer: last.as_ref().map(|m| m.fb),
            mode: None,
        })
    }

    fn plane(&self, id: u32) -> io::Result<PlaneInfo> {
        self.check_object("plane", id)?;
        self.planes
            .iter()
            .find(|(p, _)| p.id == id)
            .map(|(p, _)| p.clone())
            .ok_or_else(|| not_found("plane", id))
    }

    fn plane_type(&self, id: u32) -> io::Result<PlaneType> {
        self.planes
            .iter()
            .find(|(p, _)| p.id == id)
            .map(|(_, t)| *t)
            .ok_or_else(|| not_found("plane", id))
    }

    fn connector_edid(&self, id: u32) -> io::Result<Option<Vec<u8>>> {
        self.connector(id, false).map(|_| None)
    }

    fn has_dumb_buffers(&self) -> io::Result<bool> {
        Ok(self.dumb_buffers)
    }

    fn create_dumb_buffer(&self, size: Resolution) -> io::Result<DumbBufferId> {
        if self.fail_create_buffer.get() {
            return Err(rejected("CREATE_DUMB"));
        }
        let id = self.next_id();
        self.buffers.borrow_mut().insert(id, size);
        Ok(DumbBufferId(id))
    }

    fn destroy_dumb_buffer(&self, buffer: DumbBufferId) -> io::Result<()> {
        self.buffers
            .borrow_mut()
            .remove(&buffer.0)
            .map(|_| ())
            .ok_or_else(|| not_found("dumb buffer", buffer.0))
    }

    fn add_framebuffer(&self, buffer: DumbBufferId) -> io::Result<u32> {
        if self.fail_add_framebuffer.get() {
            return Err(rejected("ADDFB"));
        }
        if !self.buffers.borrow().contains_key(&buffer.0) {
            return Err(not_found("dumb buffer", buffer.0));
        }
        let fb = self.next_id();
        let mut fbs = self.framebuffers.borrow_mut();
        fbs.insert(fb, buffer);
        self.max_live_framebuffers
            .set(self.max_live_framebuffers.get().max(fbs.len()));
        Ok(fb)
    }

    fn remove_framebuffer(&self, fb: u32) -> io::Result<()> {
        self.framebuffers
            .borrow_mut()
            .remove(&fb)
            .map(|_| ())
            .ok_or_else(|| not_found("framebuffer", fb))
    }

    fn set_crtc(&self, crtc: u32, fb: u32, connectors: &[u32], mode: &ModeInfo) -> io::Result<()> {
        if self.fail_set_crtc.get() {
            return Err(rejected("SETCRTC"));
        }
        if !self.framebuffers.borrow().contains_key(&fb) {
            return Err(not_found("framebuffer", fb));
        }
        self.modesets.borrow_mut().push(ModeSet {
            crtc,
            fb,
            connectors: connectors.to_vec(),
            mode: mode.name.clone(),
        });
        Ok(())
    }

    fn set_plane(&self, plane: u32, crtc: u32, fb: u32, dst: Rect, src: FixedRect) -> io::Result<()> {
        if self.fail_set_plane.get() {
            return Err(rejected("SETPLANE"));
        }
        self.plane_sets.borrow_mut().push(PlaneSet {
            plane,
            crtc,
            fb,
            dst,
            src,
        });
        Ok(())
    }

    fn set_plane_property(&self, plane: u32, property: u32, value: u64) -> io::Result<()> {
        if self.fail_set_property.get() {
            return Err(rejected("OBJ_SETPROPERTY"));
        }
        self.properties.borrow_mut().push((plane, property, value));
        Ok(())
    }
}
