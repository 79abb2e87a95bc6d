// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Zero-copy import of source dmabuf memory into device framebuffers.

use crate::device::{FramebufferDesc, ModeDevice};
use crate::errors::DisplayError;
use crate::source::SourceBuffer;
use std::{
    collections::HashMap,
    fmt,
    os::fd::{AsFd, AsRawFd},
    sync::Arc,
};
use tracing::debug;

/// A device-side framebuffer wrapping imported GEM handles.
///
/// The buffer owns its handles exclusively: dropping it closes every distinct
/// handle once and then tears down the framebuffer registration, always
/// against the device that created it. Failing to do so would leak kernel
/// memory for the lifetime of the process.
pub struct DisplayBuffer<D: ModeDevice> {
    dev: Arc<D>,
    id: u32,
    handles: Vec<u32>,
}

impl<D: ModeDevice> DisplayBuffer<D> {
    /// Imports every plane of `source` and registers the result as one
    /// framebuffer with format `fourcc`.
    ///
    /// A dmabuf fd appearing more than once in the source buffer (planes
    /// sharing one allocation) is translated a single time; the cache is
    /// scoped to this import call, keyed by the raw fd number.
    pub fn import(
        dev: &Arc<D>,
        source: &SourceBuffer,
        fourcc: u32,
    ) -> Result<Self, DisplayError> {
        let mut imported: HashMap<i32, u32> = HashMap::new();
        let mut desc = FramebufferDesc {
            width: source.width,
            height: source.height,
            fourcc,
            plane_count: source.planes.len().min(4),
            handles: [0; 4],
            pitches: [0; 4],
            offsets: [0; 4],
        };

        let close_all = |handles: &HashMap<i32, u32>| {
            for handle in handles.values() {
                dev.close_handle(*handle);
            }
        };

        for (index, plane) in source.planes.iter().take(4).enumerate() {
            let raw = plane.fd.as_raw_fd();
            let handle = match imported.get(&raw) {
                Some(handle) => *handle,
                None => {
                    let handle = match dev.import_dmabuf(plane.fd.as_fd()) {
                        Ok(handle) => handle,
                        Err(err) => {
                            close_all(&imported);
                            return Err(DisplayError::Import(err));
                        }
                    };
                    imported.insert(raw, handle);
                    handle
                }
            };

            desc.handles[index] = handle;
            desc.pitches[index] = plane.pitch;
            desc.offsets[index] = plane.offset;
        }

        let id = match dev.add_framebuffer(&desc) {
            Ok(id) => id,
            Err(err) => {
                close_all(&imported);
                return Err(DisplayError::Import(err));
            }
        };

        debug!(
            fb = id,
            cookie = source.cookie,
            planes = desc.plane_count,
            "imported source buffer"
        );

        Ok(Self {
            dev: dev.clone(),
            id,
            handles: imported.into_values().collect(),
        })
    }

    /// Kernel framebuffer id, the value committed to a plane's FB_ID.
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl<D: ModeDevice> Drop for DisplayBuffer<D> {
    fn drop(&mut self) {
        // Handles are released before the framebuffer registration itself is
        // torn down, mirroring the kernel's expected teardown order.
        for handle in &self.handles {
            self.dev.close_handle(*handle);
        }
        self.dev.remove_framebuffer(self.id);
        debug!(fb = self.id, "framebuffer released");
    }
}

impl<D: ModeDevice> fmt::Display for DisplayBuffer<D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "fb:{} handles:{:?}", self.id, self.handles)
    }
}

impl<D: ModeDevice> fmt::Debug for DisplayBuffer<D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DisplayBuffer")
            .field("id", &self.id)
            .field("handles", &self.handles)
            .finish()
    }
}
