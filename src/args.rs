// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use drm_fourcc::DrmFourcc;

/// Command-line arguments for the kmscam preview binary.
///
/// Arguments can be specified via command line or environment variables.
///
/// # Example
///
/// ```bash
/// # Via command line
/// kmscam --card /dev/dri/card1 --connector HDMI-A-1
///
/// # Via environment variables
/// export CARD=/dev/dri/card1
/// export CONNECTOR=HDMI-A-1
/// kmscam
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// DRM/KMS card node to display on
    #[arg(short, long, env = "CARD", default_value = "/dev/dri/card0")]
    pub card: String,

    /// Connector to drive (e.g. HDMI-A-1); first connected connector when
    /// unset
    #[arg(long, env = "CONNECTOR")]
    pub connector: Option<String>,

    /// Frame resolution in pixels (width height)
    #[arg(
        short,
        long,
        env = "SIZE",
        default_value = "1920 1080",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub size: Vec<u32>,

    /// Framebuffer fourcc code (e.g. XR24, AR24)
    #[arg(long, env = "FORMAT", default_value = "XR24", value_parser = parse_fourcc)]
    pub format: DrmFourcc,

    /// Number of frame buffers to allocate
    #[arg(long, env = "BUFFERS", default_value = "4")]
    pub buffers: usize,

    /// Pattern generator frame rate
    #[arg(long, env = "FPS", default_value = "60")]
    pub fps: u32,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_fourcc(s: &str) -> Result<DrmFourcc, String> {
    let bytes: [u8; 4] = s
        .as_bytes()
        .try_into()
        .map_err(|_| format!("\"{s}\" is not a four character code"))?;
    DrmFourcc::try_from(u32::from_le_bytes(bytes)).map_err(|e| e.to_string())
}
