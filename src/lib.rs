// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # kmscam Display Pipeline Library
//!
//! This library drives a DRM/KMS display directly from camera-produced
//! dmabuf frames with zero copies: buffers are imported into device
//! framebuffers once, and each frame is shown by an atomic page-flip commit.
//!
//! ## Features
//!
//! - **Resource discovery**: the device's connectors, CRTCs, encoders,
//!   planes, and properties are assembled into one cross-referenced graph.
//! - **Atomic mode-setting**: property changes are accumulated per frame and
//!   submitted as a single indivisible commit, with completions delivered
//!   asynchronously on the device fd.
//! - **Triple buffering**: at most three frames are in flight (pending,
//!   queued, active); excess frames are dropped rather than ever blocking
//!   the capture path.
//! - **Zero-copy import**: camera dmabuf fds are translated to device GEM
//!   handles and registered as framebuffers, never copied.
//!
//! ## Example
//!
//! ```no_run
//! use kmscam::{device::DrmDevice, sink::KmsSink};
//! use drm_fourcc::DrmFourcc;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dev = Arc::new(DrmDevice::open("/dev/dri/card0")?);
//! let (released, _reuse) = kanal::unbounded();
//!
//! let sink = KmsSink::new(dev, released)?;
//! sink.configure(DrmFourcc::Xrgb8888, (1920, 1080), None)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Requirements
//!
//! - **Linux**: kernel 4.20+ with DRM atomic mode-setting and dmabuf
//!   support
//! - **Permissions**: DRM master access on the card node (no compositor
//!   holding the display)
//!
//! ## Safety
//!
//! The ioctl surface is wrapped by the `drm` crate; the remaining `unsafe`
//! code is limited to `poll(2)`/self-pipe handling in the event loop and
//! dmabuf memory mapping in the test-pattern source.

pub mod device;
pub mod errors;
pub mod events;
pub mod framebuffer;
pub mod graph;
pub mod request;
pub mod sink;
pub mod source;
