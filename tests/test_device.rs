// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use kmscam::device::DrmDevice;
use kmscam::graph::ResourceGraph;
use serial_test::serial;
use std::{error::Error, sync::Arc};

#[test]
#[serial]
#[ignore = "hardware test is disabled by default (run with --include-ignored to enable)"]
fn test_discover_card0() -> Result<(), Box<dyn Error>> {
    let dev = Arc::new(DrmDevice::open("/dev/dri/card0")?);
    let graph = ResourceGraph::discover(dev.as_ref())?;

    assert!(!graph.crtcs().is_empty());
    assert!(!graph.planes().is_empty());

    for id in graph.connectors() {
        let connector = graph.connector(*id).unwrap();
        println!(
            "connector {} {} status {:?} modes {}",
            connector.id,
            connector.name,
            connector.status,
            connector.modes.len()
        );
    }

    Ok(())
}
