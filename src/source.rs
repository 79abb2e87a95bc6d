// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Capture-side boundary types and a self-contained test-pattern producer.
//!
//! The real capture session lives outside this crate; the display pipeline
//! only ever sees [`SourceBuffer`] descriptions ahead of streaming and
//! [`CaptureFrame`] tokens per completed request. [`PatternSource`] is a
//! stand-in producer that allocates its buffers from a DMA heap and paints a
//! moving color-bar pattern, so the full pipeline can run on any KMS machine
//! without camera hardware.

use crate::device::ModeDevice;
use crate::sink::{KmsSink, Submit};
use dma_heap::{Heap, HeapKind};
use drm_fourcc::DrmFourcc;
use std::{
    collections::VecDeque,
    error::Error,
    ffi::c_void,
    os::fd::{AsRawFd, OwnedFd},
    ptr::null_mut,
    slice::from_raw_parts_mut,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, info, trace, warn};

/// One plane of a source buffer.
///
/// The fd is reference counted so that multi-plane formats backed by a
/// single allocation can repeat the same descriptor across planes.
#[derive(Clone)]
pub struct SourcePlane {
    pub fd: Arc<OwnedFd>,
    pub offset: u32,
    pub pitch: u32,
}

/// A producer-owned frame buffer, identified by a stable cookie.
pub struct SourceBuffer {
    pub cookie: u64,
    pub width: u32,
    pub height: u32,
    pub format: DrmFourcc,
    pub planes: Vec<SourcePlane>,
}

/// One completed capture request: which mapped buffer holds the frame, and
/// the opaque token handed back to the producer once the frame leaves the
/// display.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CaptureFrame {
    pub cookie: u64,
    pub token: u64,
}

/// Paints one frame of a moving color-bar pattern into a 32-bit XRGB/ARGB
/// plane. `phase` shifts the bars one step per frame.
pub fn fill_bars(pix: &mut [u8], width: u32, height: u32, pitch: u32, phase: usize) {
    const BARS: [[u8; 4]; 8] = [
        [0xeb, 0xeb, 0xeb, 0xff], // white
        [0x10, 0xeb, 0xeb, 0xff], // yellow
        [0xeb, 0xeb, 0x10, 0xff], // cyan
        [0x10, 0xeb, 0x10, 0xff], // green
        [0xeb, 0x10, 0xeb, 0xff], // magenta
        [0x10, 0x10, 0xeb, 0xff], // red
        [0xeb, 0x10, 0x10, 0xff], // blue
        [0x10, 0x10, 0x10, 0xff], // black
    ];

    let bar_width = (width as usize / BARS.len()).max(1);
    for y in 0..height as usize {
        let row = &mut pix[y * pitch as usize..];
        for x in 0..width as usize {
            let bar = ((x / bar_width) + phase) % BARS.len();
            row[x * 4..x * 4 + 4].copy_from_slice(&BARS[bar]);
        }
    }
}

/// CPU-writable view of a dmabuf plane, unmapped on drop.
struct MappedPlane {
    mmap: *mut u8,
    len: usize,
}

impl MappedPlane {
    fn new(fd: &OwnedFd, len: usize) -> Result<Self, Box<dyn Error>> {
        let mmap = unsafe {
            libc::mmap(
                null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if mmap == libc::MAP_FAILED {
            return Err(Box::new(std::io::Error::last_os_error()));
        }
        Ok(Self {
            mmap: mmap as *mut u8,
            len,
        })
    }

    fn as_slice_mut(&mut self) -> &mut [u8] {
        unsafe { from_raw_parts_mut(self.mmap, self.len) }
    }
}

impl Drop for MappedPlane {
    fn drop(&mut self) {
        if unsafe { libc::munmap(self.mmap.cast::<c_void>(), self.len) } != 0 {
            warn!("unmap failed!");
        }
    }
}

// The mapping is owned exclusively and only touched from the producer
// thread it moves to.
unsafe impl Send for MappedPlane {}

fn update_fps(prev: &mut Instant, history: &mut [i64], index: &mut usize) -> i64 {
    let now = Instant::now();

    let elapsed = now.duration_since(*prev);
    *prev = now;

    history[*index] = 1e9 as i64 / elapsed.as_nanos().max(1) as i64;
    *index = (*index + 1) % history.len();

    (history.iter().sum::<i64>() as f64 / history.len() as f64).round() as i64
}

/// Test-pattern frame producer backed by DMA heap allocations.
pub struct PatternSource {
    buffers: Vec<SourceBuffer>,
    maps: Vec<MappedPlane>,
    released: kanal::Receiver<u64>,
}

impl PatternSource {
    /// Allocates `count` single-plane 32-bit buffers from the CMA heap,
    /// falling back to the system heap where no CMA heap is exposed.
    ///
    /// `released` is the sink's buffer-release channel; every token received
    /// on it returns the corresponding buffer to the free list.
    pub fn new(
        width: u32,
        height: u32,
        format: DrmFourcc,
        count: usize,
        released: kanal::Receiver<u64>,
    ) -> Result<Self, Box<dyn Error>> {
        if !matches!(format, DrmFourcc::Xrgb8888 | DrmFourcc::Argb8888) {
            return Err(format!("pattern source cannot paint {format}").into());
        }

        let heap = match Heap::new(HeapKind::Cma) {
            Ok(heap) => heap,
            Err(err) => {
                debug!("no CMA heap ({err}), falling back to system heap");
                Heap::new(HeapKind::System)?
            }
        };

        let pitch = width * 4;
        let size = pitch as usize * height as usize;
        let mut buffers = Vec::with_capacity(count);
        let mut maps = Vec::with_capacity(count);

        for cookie in 0..count as u64 {
            let fd = heap.allocate(size)?;
            maps.push(MappedPlane::new(&fd, size)?);
            buffers.push(SourceBuffer {
                cookie,
                width,
                height,
                format,
                planes: vec![SourcePlane {
                    fd: Arc::new(fd),
                    offset: 0,
                    pitch,
                }],
            });
        }

        info!(
            width,
            height,
            count,
            "allocated {}KB of pattern buffers",
            size * count / 1024
        );
        Ok(Self {
            buffers,
            maps,
            released,
        })
    }

    /// Buffer descriptions for ahead-of-streaming import.
    pub fn buffers(&self) -> &[SourceBuffer] {
        &self.buffers
    }

    /// Produces frames at `fps` until `running` clears, submitting each to
    /// the sink and recycling buffers from the release channel. This is the
    /// capture-completion path: it runs on its own thread, concurrently with
    /// the display-completion path inside the event loop.
    pub fn run<D: ModeDevice>(mut self, sink: Arc<KmsSink<D>>, running: Arc<AtomicBool>, fps: u32) {
        let interval = Duration::from_secs(1) / fps.max(1);
        let mut free: VecDeque<u64> = self.buffers.iter().map(|b| b.cookie).collect();
        let mut phase = 0usize;

        let mut prev = Instant::now();
        let mut history = vec![0i64; 30];
        let mut history_index = 0;

        while running.load(Ordering::Relaxed) {
            while let Ok(Some(token)) = self.released.try_recv() {
                free.push_back(token);
            }

            let Some(cookie) = free.pop_front() else {
                // All buffers are on the display side; wait for a release.
                thread::sleep(interval);
                continue;
            };

            let buffer = &self.buffers[cookie as usize];
            fill_bars(
                self.maps[cookie as usize].as_slice_mut(),
                buffer.width,
                buffer.height,
                buffer.planes[0].pitch,
                phase,
            );
            phase = phase.wrapping_add(1);

            match sink.submit(CaptureFrame {
                cookie,
                token: cookie,
            }) {
                Ok(Submit::Queued) => {
                    let fps = update_fps(&mut prev, &mut history, &mut history_index);
                    trace!(cookie, fps, "frame submitted");
                }
                Ok(Submit::Dropped) => {
                    trace!(cookie, "display backpressure, frame dropped");
                    free.push_back(cookie);
                }
                Err(err) => {
                    warn!("frame {cookie} not displayed: {err}");
                    free.push_back(cookie);
                }
            }

            thread::sleep(interval);
        }
        debug!("pattern source stopped");
    }
}
