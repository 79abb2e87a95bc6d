// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use args::Args;
use clap::Parser;
use kmscam::{
    device::DrmDevice,
    events::EventLoop,
    sink::KmsSink,
    source::PatternSource,
};
use std::{
    error::Error,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod args;

fn init_tracing(verbose: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(if verbose { "debug" } else { "info" })
        });

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true));

    match tracing_journald::layer() {
        Ok(journald) => registry.with(journald).init(),
        Err(_) => registry.init(),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(args.verbose);

    info!("kmscam display preview");

    let size = (args.size[0], args.size[1]);
    let dev = Arc::new(DrmDevice::open(&args.card)?);

    // Tokens of frames leaving the display flow back to the producer here.
    let (released_tx, released_rx) = kanal::unbounded();

    let sink = KmsSink::new(dev.clone(), released_tx)?;
    sink.configure(args.format, size, args.connector.as_deref())?;

    let source = PatternSource::new(size.0, size.1, args.format, args.buffers, released_rx)?;
    for buffer in source.buffers() {
        if let Err(err) = sink.map_buffer(buffer) {
            warn!("skipping buffer {}: {err}", buffer.cookie);
        }
    }

    let sink = Arc::new(sink);
    let mut event_loop = EventLoop::new()?;

    let canceller = event_loop.canceller();
    ctrlc::set_handler(move || canceller.cancel())?;

    {
        let sink = sink.clone();
        event_loop.add_fd(dev.raw_fd(), move || sink.process_events());
    }

    let running = Arc::new(AtomicBool::new(true));
    let producer = thread::spawn({
        let sink = sink.clone();
        let running = running.clone();
        let fps = args.fps;
        move || source.run(sink, running, fps)
    });

    event_loop.run()?;

    running.store(false, Ordering::Relaxed);
    if producer.join().is_err() {
        warn!("frame producer panicked");
    }
    sink.stop()?;

    Ok(())
}
