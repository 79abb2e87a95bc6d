// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Error types for the display pipeline.

use drm_fourcc::DrmFourcc;
use std::io;
use thiserror::Error;

/// Errors raised at the kernel device boundary.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Opening the card node failed.
    #[error("failed to open DRM/KMS device {path}: {source}")]
    Open { path: String, source: io::Error },

    /// The device rejected the atomic client capability.
    #[error("failed to enable atomic mode-setting: {0}")]
    AtomicCap(#[source] io::Error),

    /// A resource enumeration or property fetch call failed.
    #[error("{op} failed: {source}")]
    Ioctl {
        op: &'static str,
        source: io::Error,
    },

    /// The kernel rejected an atomic commit.
    #[error("atomic commit rejected: {0}")]
    Commit(#[source] io::Error),
}

impl DeviceError {
    /// True when the failure stems from missing DRM master privileges,
    /// typically because another process (a compositor) owns the display.
    pub fn is_permission(&self) -> bool {
        let source = match self {
            DeviceError::Open { source, .. } => source,
            DeviceError::AtomicCap(source) => source,
            DeviceError::Ioctl { source, .. } => source,
            DeviceError::Commit(source) => source,
        };
        matches!(source.kind(), io::ErrorKind::PermissionDenied)
            || matches!(source.raw_os_error(), Some(libc::EPERM | libc::EACCES))
    }
}

/// Errors raised by the display pipeline proper.
///
/// Discovery and pipeline selection failures are fatal to startup; import and
/// commit failures are per-frame and leave the pipeline running.
#[derive(Debug, Error)]
pub enum DisplayError {
    /// Resource discovery aborted; no partial graph is published.
    #[error("display resource discovery failed: {0}")]
    Discovery(#[source] DeviceError),

    /// A plane exposes no usable "type" property.
    #[error("plane {plane} has no usable type property")]
    PlaneType { plane: u32 },

    /// No connector is connected.
    #[error("no connected connector available")]
    NoConnector,

    /// The requested connector name does not exist on this device.
    #[error("connector \"{0}\" not found")]
    ConnectorNotFound(String),

    /// No connector/CRTC/plane path supports the format or its opaque
    /// sibling.
    #[error("no compatible connector/CRTC/plane pipeline for format {format}")]
    NoPipeline { format: DrmFourcc },

    /// dmabuf import or framebuffer registration failed; skip the frame.
    #[error("framebuffer import failed: {0}")]
    Import(#[source] DeviceError),

    /// The kernel rejected a commit; the frame is dropped and the slot
    /// bookkeeping is rolled back.
    #[error("atomic commit failed: {0}")]
    Commit(#[source] DeviceError),

    /// A property name did not resolve against the object; the request is
    /// permanently poisoned.
    #[error("object {object} has no property \"{name}\"")]
    UnknownProperty { object: u32, name: String },

    /// The request was poisoned by an earlier failure.
    #[error("atomic request is invalid")]
    InvalidRequest,

    /// submit() was called before configure().
    #[error("display pipeline is not configured")]
    NotConfigured,

    /// The frame references a source buffer that was never mapped.
    #[error("unknown source buffer cookie {0}")]
    UnknownBuffer(u64),
}
