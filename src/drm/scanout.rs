//! Scanout framebuffer management
//!
//! A scanout framebuffer is a dumb buffer registered as a framebuffer.
//! Both are released in `Drop`: framebuffer id first, then the buffer.

use log::{debug, error, warn};
use std::rc::Rc;

use super::kms::{DumbBufferId, KmsDevice};
use crate::error::{DisplayError, Result};
use crate::geometry::Resolution;

/// Dumb buffer owned until dropped
struct DumbAllocation {
    kms: Rc<dyn KmsDevice>,
    id: DumbBufferId,
}

impl Drop for DumbAllocation {
    fn drop(&mut self) {
        if let Err(e) = self.kms.destroy_dumb_buffer(self.id) {
            warn!("Failed to destroy dumb buffer {}: {}", self.id.0, e);
        }
    }
}

/// Dumb buffer plus registered framebuffer id, owned by one CRTC
pub struct ScanoutFb {
    fb_id: u32,
    size: Resolution,
    // Dropped after `Drop::drop` removed the framebuffer id
    buffer: DumbAllocation,
}

impl ScanoutFb {
    /// Allocate a buffer of `size` and register it as a framebuffer
    pub fn create(kms: &Rc<dyn KmsDevice>, size: Resolution) -> Result<Self> {
        let id = kms.create_dumb_buffer(size).map_err(|source| {
            error!("Failed to create frame buffer ({}): {}", size, source);
            DisplayError::BufferAllocation { size, source }
        })?;
        let buffer = DumbAllocation {
            kms: Rc::clone(kms),
            id,
        };

        // On failure `buffer` is dropped, releasing the dumb buffer
        let fb_id = kms.add_framebuffer(buffer.id).map_err(|source| {
            error!("Failed to add fb ({}): {}", size, source);
            DisplayError::Framebuffer { size, source }
        })?;

        debug!("Scanout framebuffer created: id={}, {}", fb_id, size);
        Ok(Self {
            fb_id,
            size,
            buffer,
        })
    }

    pub fn fb_id(&self) -> u32 {
        self.fb_id
    }

    pub fn size(&self) -> Resolution {
        self.size
    }

    pub fn buffer(&self) -> DumbBufferId {
        self.buffer.id
    }
}

impl Drop for ScanoutFb {
    fn drop(&mut self) {
        if let Err(e) = self.buffer.kms.remove_framebuffer(self.fb_id) {
            warn!("Failed to remove framebuffer {}: {}", self.fb_id, e);
        }
        debug!("Scanout framebuffer {} released", self.fb_id);
    }
}
