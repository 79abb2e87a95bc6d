// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! KMS display sink: pipeline selection and the triple-buffer frame
//! scheduler.
//!
//! Two independent execution contexts call into the sink: the producer's
//! frame-delivery thread ([`KmsSink::submit`]) and the process event loop
//! ([`KmsSink::process_events`], invoked when the device fd becomes
//! readable). All slot state is guarded by one mutex scoped tightly around
//! each transition; the mutex is never held across the kernel commit call so
//! neither path can stall the other behind an ioctl.

use crate::device::{CommitFlags, DisplayMode, ModeDevice};
use crate::errors::DisplayError;
use crate::framebuffer::DisplayBuffer;
use crate::graph::{Connector, PlaneKind, ResourceGraph};
use crate::request::AtomicRequest;
use crate::source::{CaptureFrame, SourceBuffer};
use drm_fourcc::DrmFourcc;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tracing::{debug, error, info, trace, warn};

/// Outcome of a frame submission.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Submit {
    /// The frame was committed or parked for the next flip.
    Queued,
    /// The display queue was full; the producer keeps the buffer. Crude
    /// rate adaptation: the capture path is never blocked.
    Dropped,
}

/// The resolved connector/CRTC/plane path and output timing.
#[derive(Clone)]
struct Pipeline {
    connector: u32,
    crtc: u32,
    plane: u32,
    format: DrmFourcc,
    mode: DisplayMode,
    src_width: u32,
    src_height: u32,
}

/// One frame occupying a scheduler slot: the framebuffer id (borrowed from
/// the import cache) and the producer's completion token.
#[derive(Copy, Clone)]
struct SlotFrame {
    token: u64,
    fb: u32,
}

/// The three pipeline stages. At most one frame each; `queued` is the single
/// commit allowed in flight.
#[derive(Default)]
struct Slots {
    pending: Option<SlotFrame>,
    queued: Option<SlotFrame>,
    active: Option<SlotFrame>,
}

/// Displays captured frames on a KMS plane with at most three frames in
/// flight (pending, queued, active).
pub struct KmsSink<D: ModeDevice> {
    dev: Arc<D>,
    graph: ResourceGraph,
    config: Mutex<Option<Pipeline>>,
    mode_blob: Mutex<Option<u64>>,
    buffers: Mutex<HashMap<u64, DisplayBuffer<D>>>,
    slots: Mutex<Slots>,
    released: kanal::Sender<u64>,
}

impl<D: ModeDevice> KmsSink<D> {
    /// Discovers the device's resource graph and prepares an unconfigured
    /// sink. Tokens of frames leaving the display are sent on `released`.
    pub fn new(dev: Arc<D>, released: kanal::Sender<u64>) -> Result<Self, DisplayError> {
        let graph = ResourceGraph::discover(dev.as_ref())?;
        Ok(Self {
            dev,
            graph,
            config: Mutex::new(None),
            mode_blob: Mutex::new(None),
            buffers: Mutex::new(HashMap::new()),
            slots: Mutex::new(Slots::default()),
            released,
        })
    }

    /// The discovered resource graph.
    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    /// Resolves the display path for `format` and picks an output mode.
    ///
    /// `connector` selects an output by name (e.g. `HDMI-A-1`); when unset,
    /// the first connected connector in discovery order is used. If no
    /// primary plane takes `format`, its opaque (alpha-stripped) sibling is
    /// tried before giving up.
    pub fn configure(
        &self,
        format: DrmFourcc,
        size: (u32, u32),
        connector: Option<&str>,
    ) -> Result<(), DisplayError> {
        let connector = self.find_connector(connector)?;

        let (crtc, plane, format) = match self.select_pipeline(connector, format as u32) {
            Some((crtc, plane)) => (crtc, plane, format),
            None => {
                let opaque =
                    opaque_format(format).ok_or(DisplayError::NoPipeline { format })?;
                debug!("no plane takes {format}, trying opaque variant {opaque}");
                let (crtc, plane) = self
                    .select_pipeline(connector, opaque as u32)
                    .ok_or(DisplayError::NoPipeline { format })?;
                (crtc, plane, opaque)
            }
        };

        let mode = select_mode(connector, size).ok_or(DisplayError::NoPipeline { format })?;

        info!(
            "using connector {} ({}), CRTC {}, plane {}, mode {}x{}@{}",
            connector.name, connector.id, crtc, plane, mode.width, mode.height, mode.refresh
        );

        *self.config.lock().unwrap() = Some(Pipeline {
            connector: connector.id,
            crtc,
            plane,
            format,
            mode,
            src_width: size.0,
            src_height: size.1,
        });
        Ok(())
    }

    /// Imports a producer buffer ahead of streaming. Calling this twice for
    /// the same cookie is a no-op; the cached framebuffer is reused.
    ///
    /// Failure is per-buffer: the caller logs, skips the buffer, and keeps
    /// streaming with the rest.
    pub fn map_buffer(&self, source: &SourceBuffer) -> Result<(), DisplayError> {
        let format = self.pipeline()?.format;

        let mut buffers = self.buffers.lock().unwrap();
        if buffers.contains_key(&source.cookie) {
            return Ok(());
        }

        let buffer = DisplayBuffer::import(&self.dev, source, format as u32)?;
        buffers.insert(source.cookie, buffer);
        Ok(())
    }

    /// Accepts one captured frame for display.
    ///
    /// The first frame of a session carries the one-time enable step
    /// (connector/CRTC binding, mode, and plane geometry). When a commit is
    /// already in flight the frame is parked in the pending slot; when even
    /// that is occupied the frame is dropped and backpressure reported. A
    /// kernel rejection rolls the queued slot back and returns the error;
    /// the producer keeps the buffer either way.
    pub fn submit(&self, frame: CaptureFrame) -> Result<Submit, DisplayError> {
        let pipeline = self.pipeline()?;
        let fb = self
            .buffers
            .lock()
            .unwrap()
            .get(&frame.cookie)
            .map(|b| b.id())
            .ok_or(DisplayError::UnknownBuffer(frame.cookie))?;

        let enable;
        {
            let mut slots = self.slots.lock().unwrap();
            if slots.pending.is_some() {
                trace!(token = frame.token, "display queue full, dropping frame");
                return Ok(Submit::Dropped);
            }
            if slots.queued.is_some() {
                slots.pending = Some(SlotFrame {
                    token: frame.token,
                    fb,
                });
                return Ok(Submit::Queued);
            }
            enable = slots.active.is_none();
            slots.queued = Some(SlotFrame {
                token: frame.token,
                fb,
            });
        }

        // Committed outside the lock so the completion path is never stalled
        // behind the ioctl.
        if let Err(err) = self.commit_frame(&pipeline, fb, enable) {
            let mut slots = self.slots.lock().unwrap();
            if slots.queued.map(|q| q.token) == Some(frame.token) {
                slots.queued = None;
            }
            drop(slots);
            self.log_commit_failure(&err);
            return Err(err);
        }
        Ok(Submit::Queued)
    }

    /// Advances the pipeline on a hardware page-flip completion.
    ///
    /// A completion with no commit in flight, or for a CRTC other than the
    /// configured one, indicates kernel/driver/state-machine
    /// desynchronization; it is logged loudly and discarded.
    pub fn handle_completion(&self, crtc: u32) {
        let Ok(pipeline) = self.pipeline() else {
            error!("page-flip completion on unconfigured pipeline");
            return;
        };

        let released;
        let promoted;
        {
            let mut slots = self.slots.lock().unwrap();
            let Some(queued) = slots.queued else {
                error!("page-flip completion with no request in flight (CRTC {crtc})");
                return;
            };
            if crtc != pipeline.crtc {
                error!(
                    "page-flip completion for CRTC {crtc}, expected {}",
                    pipeline.crtc
                );
                return;
            }

            // The queued frame is now on screen; the previous one leaves.
            released = slots.active.replace(queued);
            slots.queued = None;

            promoted = slots.pending.take();
            if let Some(next) = promoted {
                slots.queued = Some(next);
            }
        }

        if let Some(prev) = released {
            trace!(token = prev.token, "frame released");
            if self.released.send(prev.token).is_err() {
                warn!("buffer release receiver is gone");
            }
        }

        if let Some(next) = promoted {
            if let Err(err) = self.commit_frame(&pipeline, next.fb, false) {
                let mut slots = self.slots.lock().unwrap();
                if slots.queued.map(|q| q.token) == Some(next.token) {
                    slots.queued = None;
                }
                drop(slots);
                self.log_commit_failure(&err);
                // The frame is dropped; hand its buffer straight back.
                let _ = self.released.send(next.token);
            }
        }
    }

    /// Drains completion events from the device. Wired to the event loop as
    /// the device fd's readability callback.
    pub fn process_events(&self) {
        match self.dev.read_events() {
            Ok(events) => {
                for event in events {
                    self.handle_completion(event.crtc);
                }
            }
            Err(err) => warn!("failed to read display events: {err}"),
        }
    }

    /// Disables the plane and CRTC synchronously, then releases every cached
    /// framebuffer and clears all three slots regardless of prior state.
    /// A subsequent configure/submit runs the one-time enable step again.
    pub fn stop(&self) -> Result<(), DisplayError> {
        let pipeline = self.pipeline()?;

        let result = (|| {
            let mut request = AtomicRequest::new(&self.graph);
            request.add_property(pipeline.connector, "CRTC_ID", 0)?;
            request.add_property(pipeline.crtc, "MODE_ID", 0)?;
            request.add_property(pipeline.crtc, "ACTIVE", 0)?;
            request.add_property(pipeline.plane, "CRTC_ID", 0)?;
            request.add_property(pipeline.plane, "FB_ID", 0)?;
            request.commit(self.dev.as_ref(), CommitFlags::modeset())
        })();

        if let Some(blob) = self.mode_blob.lock().unwrap().take() {
            self.dev.destroy_mode_blob(blob);
        }
        *self.slots.lock().unwrap() = Slots::default();
        self.buffers.lock().unwrap().clear();

        if let Err(err) = &result {
            self.log_commit_failure(err);
        } else {
            debug!("display pipeline disabled");
        }
        result
    }

    fn pipeline(&self) -> Result<Pipeline, DisplayError> {
        self.config
            .lock()
            .unwrap()
            .clone()
            .ok_or(DisplayError::NotConfigured)
    }

    fn find_connector(&self, name: Option<&str>) -> Result<&Connector, DisplayError> {
        match name {
            Some(name) => self
                .graph
                .connectors()
                .iter()
                .filter_map(|id| self.graph.connector(*id))
                .find(|c| c.name == name)
                .ok_or_else(|| DisplayError::ConnectorNotFound(name.to_string())),
            None => self
                .graph
                .connectors()
                .iter()
                .filter_map(|id| self.graph.connector(*id))
                .find(|c| c.status == crate::device::ConnectorStatus::Connected)
                .ok_or(DisplayError::NoConnector),
        }
    }

    /// First primary plane supporting `fourcc` along any
    /// connector→encoder→CRTC path, in discovery order. No scoring.
    fn select_pipeline(&self, connector: &Connector, fourcc: u32) -> Option<(u32, u32)> {
        for encoder in connector
            .encoders
            .iter()
            .filter_map(|id| self.graph.encoder(*id))
        {
            for crtc in encoder.crtcs.iter().filter_map(|id| self.graph.crtc(*id)) {
                for plane in crtc.planes.iter().filter_map(|id| self.graph.plane(*id)) {
                    if plane.kind != PlaneKind::Primary {
                        continue;
                    }
                    if plane.supports_format(fourcc) {
                        return Some((crtc.id, plane.id));
                    }
                }
            }
        }
        None
    }

    fn mode_blob(&self, pipeline: &Pipeline) -> Result<u64, DisplayError> {
        let mut blob = self.mode_blob.lock().unwrap();
        match *blob {
            Some(id) => Ok(id),
            None => {
                let id = self
                    .dev
                    .create_mode_blob(pipeline.connector, &pipeline.mode)
                    .map_err(DisplayError::Commit)?;
                *blob = Some(id);
                Ok(id)
            }
        }
    }

    fn commit_frame(
        &self,
        pipeline: &Pipeline,
        fb: u32,
        enable: bool,
    ) -> Result<(), DisplayError> {
        let mut request = AtomicRequest::new(&self.graph);
        request.add_property(pipeline.plane, "FB_ID", fb as u64)?;

        let flags = if enable {
            let blob = self.mode_blob(pipeline)?;
            request.add_property(pipeline.connector, "CRTC_ID", pipeline.crtc as u64)?;
            request.add_property(pipeline.crtc, "MODE_ID", blob)?;
            request.add_property(pipeline.crtc, "ACTIVE", 1)?;
            request.add_property(pipeline.plane, "CRTC_ID", pipeline.crtc as u64)?;
            request.add_property(pipeline.plane, "SRC_X", 0)?;
            request.add_property(pipeline.plane, "SRC_Y", 0)?;
            // SRC_* are 16.16 fixed point.
            request.add_property(pipeline.plane, "SRC_W", (pipeline.src_width as u64) << 16)?;
            request.add_property(pipeline.plane, "SRC_H", (pipeline.src_height as u64) << 16)?;
            request.add_property(pipeline.plane, "CRTC_X", 0)?;
            request.add_property(pipeline.plane, "CRTC_Y", 0)?;
            request.add_property(pipeline.plane, "CRTC_W", pipeline.mode.width as u64)?;
            request.add_property(pipeline.plane, "CRTC_H", pipeline.mode.height as u64)?;
            debug!(fb, "enabling display pipeline");
            CommitFlags::flip_modeset()
        } else {
            CommitFlags::flip()
        };

        request.commit(self.dev.as_ref(), flags)
    }

    fn log_commit_failure(&self, err: &DisplayError) {
        if let DisplayError::Commit(dev_err) = err {
            if dev_err.is_permission() {
                error!(
                    "atomic commit lacked DRM master privileges; stop the running \
                     compositor or launch from a free virtual terminal"
                );
                return;
            }
        }
        error!("{err}");
    }
}

/// The non-alpha-carrying sibling of an alpha format.
fn opaque_format(format: DrmFourcc) -> Option<DrmFourcc> {
    match format {
        DrmFourcc::Argb8888 => Some(DrmFourcc::Xrgb8888),
        DrmFourcc::Abgr8888 => Some(DrmFourcc::Xbgr8888),
        DrmFourcc::Rgba8888 => Some(DrmFourcc::Rgbx8888),
        DrmFourcc::Bgra8888 => Some(DrmFourcc::Bgrx8888),
        DrmFourcc::Argb2101010 => Some(DrmFourcc::Xrgb2101010),
        DrmFourcc::Abgr2101010 => Some(DrmFourcc::Xbgr2101010),
        _ => None,
    }
}

/// Exact size match first, then the connector's preferred mode, then the
/// first advertised mode.
fn select_mode(connector: &Connector, size: (u32, u32)) -> Option<DisplayMode> {
    connector
        .modes
        .iter()
        .find(|m| (m.width, m.height) == size)
        .or_else(|| connector.modes.iter().find(|m| m.preferred))
        .or_else(|| connector.modes.first())
        .cloned()
}
