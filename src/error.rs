//! Error types for display resource management

use std::io;
use thiserror::Error;

use crate::geometry::Resolution;

/// Failures reported by the resource manager.
///
/// Everything except [`DisplayError::NoDumbBuffers`] is recoverable: the
/// operation is aborted, state is left as it was and the caller decides
/// whether to retry.
#[derive(Debug, Error)]
pub enum DisplayError {
    // Discovery
    #[error("cannot open DRM device {path}")]
    DeviceUnavailable {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to get DRM resources for {path}")]
    Discovery {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("no usable DRM device")]
    NoDevice,

    // Topology
    #[error("no valid CRTC for connector {connector}")]
    NoCrtcForConnector { connector: u32 },
    #[error("no display path {path} (plugged connectors: {plugged})")]
    NoDisplayPath { path: u8, plugged: usize },
    #[error("unknown CRTC {0}")]
    UnknownCrtc(u32),
    #[error("unknown plane {0}")]
    UnknownPlane(u32),
    #[error("no connectors set for CRTC {0}")]
    NoConnectors(u32),
    #[error("no connector is bound to a CRTC")]
    NoBoundCrtc,

    // Mode validation
    #[error("mode {mode} is not supported by connector {connector}")]
    ModeUnsupported { mode: Resolution, connector: u32 },
    #[error("no valid mode object or connector not connected for CRTC {0}")]
    NoUsableMode(u32),

    // Buffers and hardware
    #[error("failed to create scanout buffer ({size})")]
    BufferAllocation {
        size: Resolution,
        #[source]
        source: io::Error,
    },
    #[error("failed to add framebuffer ({size})")]
    Framebuffer {
        size: Resolution,
        #[source]
        source: io::Error,
    },
    #[error("failed to set mode on CRTC {crtc}")]
    ModeSet {
        crtc: u32,
        #[source]
        source: io::Error,
    },
    #[error("failed to set plane {plane} on CRTC {crtc}")]
    SetPlane {
        plane: u32,
        crtc: u32,
        #[source]
        source: io::Error,
    },
    #[error("failed to set property {property:#x} on plane {plane}")]
    SetProperty {
        plane: u32,
        property: u32,
        #[source]
        source: io::Error,
    },

    // Fatal
    #[error("DRM device {0} does not support dumb buffers")]
    NoDumbBuffers(String),
}

pub type Result<T, E = DisplayError> = std::result::Result<T, E>;
