//! Global constants for kmsres
//!
//! Consolidates pixel format, plane property and timing constants
//! to eliminate magic numbers throughout the codebase.

// ============================================================================
// Scanout Buffer Constants
// ============================================================================

/// Bits per pixel of scanout dumb buffers (XRGB8888)
pub const SCANOUT_BPP: u32 = 32;

/// Color depth of scanout framebuffers (XRGB8888 ignores the X channel)
pub const SCANOUT_DEPTH: u32 = 24;

// ============================================================================
// Plane Constants
// ============================================================================

/// Shift converting an integer source coordinate to 16.16 fixed point
pub const FIXED_POINT_SHIFT: u32 = 16;

/// Vendor plane property: bind a framebuffer id to the plane
pub const PLANE_PROP_FB: u32 = 0xff01;

/// Vendor plane property: packed z-order of all planes
pub const PLANE_PROP_Z_ORDER: u32 = 0xff02;

/// Vendor plane property: pointer to scaling parameters
pub const PLANE_PROP_SCALING: u32 = 0xff03;

/// Name of the plane property carrying the plane classification
pub const PLANE_TYPE_PROPERTY: &str = "type";

/// Name of the connector property carrying the EDID blob
pub const EDID_PROPERTY: &str = "EDID";

// ============================================================================
// Output Geometry Policy
// ============================================================================

/// Output heights strictly between these bounds break the scaler on
/// some targets. Height 1 is a special marker used by callers.
pub const MIN_UNSUPPORTED_OUTPUT_HEIGHT: u32 = 1;
pub const MAX_UNSUPPORTED_OUTPUT_HEIGHT: u32 = 12;

// ============================================================================
// Hotplug / Device Constants
// ============================================================================

/// Default hotplug poll interval in milliseconds
pub const HOTPLUG_POLL_INTERVAL_MS: u64 = 100;

/// Device node name fragment identifying primary DRM nodes
pub const CARD_NODE_PATTERN: &str = "card";

/// udev subsystem of DRM devices
pub const DRM_SUBSYSTEM: &str = "drm";
