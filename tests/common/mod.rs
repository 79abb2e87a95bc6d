// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! In-memory stand-in for the kernel device boundary, recording every call
//! the display pipeline makes.

#![allow(dead_code)]

use drm_fourcc::DrmFourcc;
use kmscam::device::{
    CommitFlags, ConnectorRecord, ConnectorStatus, CrtcRecord, DisplayMode, EncoderRecord,
    FlipEvent, FramebufferDesc, ModeDevice, PlaneRecord, PropertyKind, PropertyRecord,
};
use kmscam::errors::DeviceError;
use std::{
    collections::{HashMap, VecDeque},
    io,
    os::fd::{AsRawFd, BorrowedFd},
    sync::Mutex,
};

pub const CONNECTOR: u32 = 30;
pub const CRTC: u32 = 1;
pub const ENCODER: u32 = 20;
pub const PLANE: u32 = 40;
pub const OVERLAY_PLANE: u32 = 39;

pub const PROP_CONNECTOR_CRTC_ID: u32 = 101;
pub const PROP_CRTC_ACTIVE: u32 = 201;
pub const PROP_CRTC_MODE_ID: u32 = 202;
pub const PROP_PLANE_TYPE: u32 = 300;
pub const PROP_PLANE_FB_ID: u32 = 301;
pub const PROP_PLANE_CRTC_ID: u32 = 302;
pub const PROP_PLANE_SRC_X: u32 = 303;
pub const PROP_PLANE_SRC_Y: u32 = 304;
pub const PROP_PLANE_SRC_W: u32 = 305;
pub const PROP_PLANE_SRC_H: u32 = 306;
pub const PROP_PLANE_CRTC_X: u32 = 307;
pub const PROP_PLANE_CRTC_Y: u32 = 308;
pub const PROP_PLANE_CRTC_W: u32 = 309;
pub const PROP_PLANE_CRTC_H: u32 = 310;

const PLANE_TYPE_OVERLAY: u64 = 0;
const PLANE_TYPE_PRIMARY: u64 = 1;

#[derive(Clone, Debug)]
pub struct CommitRecord {
    pub flags: CommitFlags,
    pub props: Vec<(u32, u32, u64)>,
}

impl CommitRecord {
    pub fn value(&self, object: u32, property: u32) -> Option<u64> {
        self.props
            .iter()
            .find(|(o, p, _)| (*o, *p) == (object, property))
            .map(|(_, _, v)| *v)
    }
}

#[derive(Default)]
pub struct State {
    pub connectors: Vec<ConnectorRecord>,
    pub crtcs: Vec<CrtcRecord>,
    pub encoders: Vec<EncoderRecord>,
    pub planes: Vec<PlaneRecord>,
    pub properties: HashMap<u32, PropertyRecord>,
    pub fail_enumeration: bool,

    pub commits: Vec<CommitRecord>,
    pub fail_commits: VecDeque<io::Error>,

    pub imported_fds: Vec<i32>,
    pub fail_imports: VecDeque<io::Error>,
    pub next_handle: u32,
    pub closed_handles: Vec<u32>,

    pub framebuffers: Vec<FramebufferDesc>,
    pub next_fb: u32,
    pub removed_fbs: Vec<u32>,

    pub next_blob: u64,
    pub destroyed_blobs: Vec<u64>,

    pub events: VecDeque<FlipEvent>,
}

pub struct FakeDevice {
    pub state: Mutex<State>,
}

fn enumeration_error() -> DeviceError {
    DeviceError::Ioctl {
        op: "resource enumeration",
        source: io::Error::new(io::ErrorKind::Other, "injected failure"),
    }
}

impl FakeDevice {
    pub fn new(state: State) -> Self {
        Self {
            state: Mutex::new(State {
                next_handle: 500,
                next_fb: 1000,
                next_blob: 7000,
                ..state
            }),
        }
    }

    pub fn commits(&self) -> Vec<CommitRecord> {
        self.state.lock().unwrap().commits.clone()
    }

    pub fn fail_next_commit(&self, kind: io::ErrorKind) {
        self.state
            .lock()
            .unwrap()
            .fail_commits
            .push_back(io::Error::new(kind, "injected commit failure"));
    }

    pub fn push_flip(&self, crtc: u32) {
        self.state
            .lock()
            .unwrap()
            .events
            .push_back(FlipEvent { crtc, sequence: 0 });
    }

    pub fn fail_next_import(&self, kind: io::ErrorKind) {
        self.state
            .lock()
            .unwrap()
            .fail_imports
            .push_back(io::Error::new(kind, "injected import failure"));
    }
}

/// A single-plane 1920x1080 source buffer backed by a placeholder fd.
pub fn source_buffer(cookie: u64) -> kmscam::source::SourceBuffer {
    use std::sync::Arc;

    let fd: std::os::fd::OwnedFd = std::fs::File::open("/dev/null").unwrap().into();
    kmscam::source::SourceBuffer {
        cookie,
        width: 1920,
        height: 1080,
        format: DrmFourcc::Xrgb8888,
        planes: vec![kmscam::source::SourcePlane {
            fd: Arc::new(fd),
            offset: 0,
            pitch: 1920 * 4,
        }],
    }
}

impl ModeDevice for FakeDevice {
    fn connectors(&self) -> Result<Vec<ConnectorRecord>, DeviceError> {
        let state = self.state.lock().unwrap();
        if state.fail_enumeration {
            return Err(enumeration_error());
        }
        Ok(state.connectors.clone())
    }

    fn crtcs(&self) -> Result<Vec<CrtcRecord>, DeviceError> {
        let state = self.state.lock().unwrap();
        if state.fail_enumeration {
            return Err(enumeration_error());
        }
        Ok(state.crtcs.clone())
    }

    fn encoders(&self) -> Result<Vec<EncoderRecord>, DeviceError> {
        Ok(self.state.lock().unwrap().encoders.clone())
    }

    fn planes(&self) -> Result<Vec<PlaneRecord>, DeviceError> {
        Ok(self.state.lock().unwrap().planes.clone())
    }

    fn property(&self, id: u32) -> Result<PropertyRecord, DeviceError> {
        self.state
            .lock()
            .unwrap()
            .properties
            .get(&id)
            .cloned()
            .ok_or(DeviceError::Ioctl {
                op: "property fetch",
                source: io::Error::new(io::ErrorKind::NotFound, "unknown property"),
            })
    }

    fn import_dmabuf(&self, fd: BorrowedFd<'_>) -> Result<u32, DeviceError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.fail_imports.pop_front() {
            return Err(DeviceError::Ioctl {
                op: "dmabuf import",
                source: err,
            });
        }
        state.imported_fds.push(fd.as_raw_fd());
        state.next_handle += 1;
        Ok(state.next_handle)
    }

    fn close_handle(&self, handle: u32) {
        self.state.lock().unwrap().closed_handles.push(handle);
    }

    fn add_framebuffer(&self, desc: &FramebufferDesc) -> Result<u32, DeviceError> {
        let mut state = self.state.lock().unwrap();
        state.framebuffers.push(desc.clone());
        state.next_fb += 1;
        Ok(state.next_fb)
    }

    fn remove_framebuffer(&self, id: u32) {
        self.state.lock().unwrap().removed_fbs.push(id);
    }

    fn create_mode_blob(&self, _connector: u32, _mode: &DisplayMode) -> Result<u64, DeviceError> {
        let mut state = self.state.lock().unwrap();
        state.next_blob += 1;
        Ok(state.next_blob)
    }

    fn destroy_mode_blob(&self, blob: u64) {
        self.state.lock().unwrap().destroyed_blobs.push(blob);
    }

    fn atomic_commit(
        &self,
        flags: CommitFlags,
        props: &[(u32, u32, u64)],
    ) -> Result<(), DeviceError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.fail_commits.pop_front() {
            return Err(DeviceError::Commit(err));
        }
        state.commits.push(CommitRecord {
            flags,
            props: props.to_vec(),
        });
        Ok(())
    }

    fn read_events(&self) -> Result<Vec<FlipEvent>, DeviceError> {
        Ok(self.state.lock().unwrap().events.drain(..).collect())
    }
}

fn property(id: u32, name: &str, kind: PropertyKind) -> (u32, PropertyRecord) {
    (
        id,
        PropertyRecord {
            id,
            name: name.to_string(),
            kind,
        },
    )
}

pub fn plane_props() -> Vec<(u32, u64)> {
    vec![
        (PROP_PLANE_TYPE, PLANE_TYPE_PRIMARY),
        (PROP_PLANE_FB_ID, 0),
        (PROP_PLANE_CRTC_ID, 0),
        (PROP_PLANE_SRC_X, 0),
        (PROP_PLANE_SRC_Y, 0),
        (PROP_PLANE_SRC_W, 0),
        (PROP_PLANE_SRC_H, 0),
        (PROP_PLANE_CRTC_X, 0),
        (PROP_PLANE_CRTC_Y, 0),
        (PROP_PLANE_CRTC_W, 0),
        (PROP_PLANE_CRTC_H, 0),
    ]
}

/// One connected HDMI connector, one CRTC at index 0, one encoder, and one
/// primary plane supporting `formats`.
pub fn single_pipeline(formats: &[DrmFourcc]) -> FakeDevice {
    let properties = HashMap::from([
        property(PROP_CONNECTOR_CRTC_ID, "CRTC_ID", PropertyKind::Object),
        property(PROP_CRTC_ACTIVE, "ACTIVE", PropertyKind::Boolean),
        property(PROP_CRTC_MODE_ID, "MODE_ID", PropertyKind::Blob),
        property(PROP_PLANE_TYPE, "type", PropertyKind::Enum),
        property(PROP_PLANE_FB_ID, "FB_ID", PropertyKind::Object),
        property(PROP_PLANE_CRTC_ID, "CRTC_ID", PropertyKind::Object),
        property(PROP_PLANE_SRC_X, "SRC_X", PropertyKind::Range),
        property(PROP_PLANE_SRC_Y, "SRC_Y", PropertyKind::Range),
        property(PROP_PLANE_SRC_W, "SRC_W", PropertyKind::Range),
        property(PROP_PLANE_SRC_H, "SRC_H", PropertyKind::Range),
        property(PROP_PLANE_CRTC_X, "CRTC_X", PropertyKind::SignedRange),
        property(PROP_PLANE_CRTC_Y, "CRTC_Y", PropertyKind::SignedRange),
        property(PROP_PLANE_CRTC_W, "CRTC_W", PropertyKind::Range),
        property(PROP_PLANE_CRTC_H, "CRTC_H", PropertyKind::Range),
    ]);

    FakeDevice::new(State {
        connectors: vec![ConnectorRecord {
            id: CONNECTOR,
            interface: "HDMI-A",
            interface_id: 1,
            status: ConnectorStatus::Connected,
            encoders: vec![ENCODER],
            modes: vec![
                DisplayMode {
                    index: 0,
                    width: 1920,
                    height: 1080,
                    refresh: 60,
                    name: "1920x1080".to_string(),
                    preferred: true,
                },
                DisplayMode {
                    index: 1,
                    width: 1280,
                    height: 720,
                    refresh: 60,
                    name: "1280x720".to_string(),
                    preferred: false,
                },
            ],
            props: vec![(PROP_CONNECTOR_CRTC_ID, 0)],
        }],
        crtcs: vec![CrtcRecord {
            id: CRTC,
            props: vec![(PROP_CRTC_ACTIVE, 0), (PROP_CRTC_MODE_ID, 0)],
        }],
        encoders: vec![EncoderRecord {
            id: ENCODER,
            possible_crtcs: 0b1,
            props: vec![],
        }],
        planes: vec![PlaneRecord {
            id: PLANE,
            possible_crtcs: 0b1,
            formats: formats.iter().map(|f| *f as u32).collect(),
            props: plane_props(),
        }],
        properties,
        ..State::default()
    })
}

/// Puts an overlay plane ahead of the primary in discovery order.
pub fn add_overlay_plane(dev: &FakeDevice, formats: &[DrmFourcc]) {
    let mut state = dev.state.lock().unwrap();
    let mut props = plane_props();
    props[0] = (PROP_PLANE_TYPE, PLANE_TYPE_OVERLAY);
    state.planes.insert(
        0,
        PlaneRecord {
            id: OVERLAY_PLANE,
            possible_crtcs: 0b1,
            formats: formats.iter().map(|f| *f as u32).collect(),
            props,
        },
    );
}
