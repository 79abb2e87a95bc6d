// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Minimal single-threaded event loop.
//!
//! Display completions must be dispatched on one thread, in order, for the
//! frame scheduler's slot bookkeeping to stay deterministic, so the loop is a
//! plain `poll(2)` readiness dispatcher rather than an async runtime.
//! Cancellation is an owned [`Canceller`] handle backed by a self-pipe: its
//! `cancel` performs a single `write(2)`, which is async-signal-safe and so
//! usable straight from a Ctrl-C handler.

use std::{
    io,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::{debug, warn};

/// Cloneable handle that stops a running [`EventLoop`].
#[derive(Clone)]
pub struct Canceller {
    wake: Arc<OwnedFd>,
    cancelled: Arc<AtomicBool>,
}

impl Canceller {
    /// Requests loop termination. Safe to call from any thread, including
    /// signal-handling contexts.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let byte = [1u8];
        unsafe {
            libc::write(self.wake.as_raw_fd(), byte.as_ptr().cast(), 1);
        }
    }
}

struct Source {
    fd: RawFd,
    callback: Box<dyn FnMut()>,
}

/// Poll-based readiness dispatcher for the process's event sources.
pub struct EventLoop {
    sources: Vec<Source>,
    wake_rx: OwnedFd,
    canceller: Canceller,
}

impl EventLoop {
    pub fn new() -> io::Result<Self> {
        let mut fds = [0; 2];
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let (wake_rx, wake_tx) =
            unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

        Ok(Self {
            sources: Vec::new(),
            wake_rx,
            canceller: Canceller {
                wake: Arc::new(wake_tx),
                cancelled: Arc::new(AtomicBool::new(false)),
            },
        })
    }

    /// Handle used to stop the loop from another thread or a signal path.
    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    /// Registers a callback invoked whenever `fd` becomes readable. The
    /// caller keeps ownership of the fd and must keep it open for the life
    /// of the loop.
    pub fn add_fd(&mut self, fd: RawFd, callback: impl FnMut() + 'static) {
        self.sources.push(Source {
            fd,
            callback: Box::new(callback),
        });
    }

    /// Dispatches readiness callbacks until cancelled.
    pub fn run(&mut self) -> io::Result<()> {
        debug!(sources = self.sources.len(), "event loop running");

        loop {
            if self.canceller.cancelled.load(Ordering::Acquire) {
                break;
            }

            let mut pollfds: Vec<libc::pollfd> = Vec::with_capacity(self.sources.len() + 1);
            pollfds.push(libc::pollfd {
                fd: self.wake_rx.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            });
            for source in &self.sources {
                pollfds.push(libc::pollfd {
                    fd: source.fd,
                    events: libc::POLLIN,
                    revents: 0,
                });
            }

            let ret = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as _, -1) };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }

            if pollfds[0].revents & libc::POLLIN != 0 {
                self.drain_wake_pipe();
                continue;
            }

            for (source, pollfd) in self.sources.iter_mut().zip(&pollfds[1..]) {
                if pollfd.revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) != 0 {
                    (source.callback)();
                }
            }
        }

        debug!("event loop stopped");
        Ok(())
    }

    fn drain_wake_pipe(&self) {
        let mut buf = [0u8; 16];
        loop {
            let n = unsafe {
                libc::read(self.wake_rx.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len())
            };
            if n <= 0 {
                if n < 0 {
                    let err = io::Error::last_os_error();
                    if err.kind() != io::ErrorKind::WouldBlock {
                        warn!("wake pipe read failed: {err}");
                    }
                }
                break;
            }
        }
    }
}
