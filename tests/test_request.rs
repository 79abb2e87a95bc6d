// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use drm_fourcc::DrmFourcc;
use kmscam::device::CommitFlags;
use kmscam::errors::DisplayError;
use kmscam::graph::ResourceGraph;
use kmscam::request::AtomicRequest;
use std::error::Error;

mod common;

#[test]
fn test_accumulates_resolved_properties() -> Result<(), Box<dyn Error>> {
    let dev = common::single_pipeline(&[DrmFourcc::Xrgb8888]);
    let graph = ResourceGraph::discover(&dev)?;

    let mut request = AtomicRequest::new(&graph);
    request.add_property(common::PLANE, "FB_ID", 1234)?;
    request.add_property(common::CONNECTOR, "CRTC_ID", common::CRTC as u64)?;
    assert_eq!(request.len(), 2);

    request.commit(&dev, CommitFlags::flip())?;

    let commits = dev.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(
        commits[0].value(common::PLANE, common::PROP_PLANE_FB_ID),
        Some(1234)
    );
    assert_eq!(
        commits[0].value(common::CONNECTOR, common::PROP_CONNECTOR_CRTC_ID),
        Some(common::CRTC as u64)
    );
    assert!(!commits[0].flags.allow_modeset);
    assert!(commits[0].flags.flip_event);
    Ok(())
}

#[test]
fn test_unknown_property_poisons_request() -> Result<(), Box<dyn Error>> {
    let dev = common::single_pipeline(&[DrmFourcc::Xrgb8888]);
    let graph = ResourceGraph::discover(&dev)?;

    let mut request = AtomicRequest::new(&graph);
    request.add_property(common::PLANE, "FB_ID", 1)?;

    let err = request
        .add_property(common::PLANE, "ROTATION", 0)
        .expect_err("unknown property must fail");
    assert!(matches!(err, DisplayError::UnknownProperty { .. }));

    // Every further add returns the invalid-request error.
    let err = request
        .add_property(common::PLANE, "FB_ID", 2)
        .expect_err("poisoned request must stay poisoned");
    assert!(matches!(err, DisplayError::InvalidRequest));

    // Committing a poisoned request performs no device call.
    let err = request
        .commit(&dev, CommitFlags::flip())
        .expect_err("poisoned commit must fail");
    assert!(matches!(err, DisplayError::InvalidRequest));
    assert!(dev.commits().is_empty());
    Ok(())
}

#[test]
fn test_commit_error_propagates() -> Result<(), Box<dyn Error>> {
    let dev = common::single_pipeline(&[DrmFourcc::Xrgb8888]);
    let graph = ResourceGraph::discover(&dev)?;

    dev.fail_next_commit(std::io::ErrorKind::InvalidInput);

    let mut request = AtomicRequest::new(&graph);
    request.add_property(common::PLANE, "FB_ID", 1)?;
    let err = request
        .commit(&dev, CommitFlags::flip())
        .expect_err("rejected commit must fail");
    assert!(matches!(err, DisplayError::Commit(_)));
    assert!(dev.commits().is_empty());
    Ok(())
}
