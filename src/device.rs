// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Kernel device boundary for the DRM/KMS display pipeline.
//!
//! [`ModeDevice`] abstracts the ioctl surface the pipeline needs so that the
//! resource graph, pipeline selection, and the frame scheduler can be
//! exercised against a fake device in tests. [`DrmDevice`] is the production
//! implementation on top of the `drm` crate.

use crate::errors::DeviceError;
use drm::control::{
    atomic::AtomicModeReq, property, AtomicCommitFlags, Device as ControlDevice, Event,
    ModeTypeFlags, RawResourceHandle,
};
use drm::{ClientCapability, Device};
use drm_fourcc::{DrmFourcc, DrmModifier};
use std::{
    collections::HashMap,
    fs::OpenOptions,
    io,
    num::NonZeroU32,
    os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd},
    sync::Mutex,
};
use tracing::{debug, warn};

/// Connector link status as reported by the kernel.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectorStatus {
    Connected,
    Disconnected,
    Unknown,
}

/// Broad classification of a mode-object property.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PropertyKind {
    Boolean,
    Range,
    SignedRange,
    Enum,
    Bitmask,
    Blob,
    Object,
    Unknown,
}

/// One display timing mode advertised by a connector.
///
/// `index` is the mode's position in the kernel's mode array for the
/// connector, which is how the device rebuilds the kernel mode record when a
/// mode blob is created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayMode {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub refresh: u32,
    pub name: String,
    pub preferred: bool,
}

/// Raw connector record: identity, status, reachable encoders, modes, and
/// the (property id, current value) pairs fetched at enumeration time.
#[derive(Clone, Debug)]
pub struct ConnectorRecord {
    pub id: u32,
    pub interface: &'static str,
    pub interface_id: u32,
    pub status: ConnectorStatus,
    pub encoders: Vec<u32>,
    pub modes: Vec<DisplayMode>,
    pub props: Vec<(u32, u64)>,
}

#[derive(Clone, Debug)]
pub struct CrtcRecord {
    pub id: u32,
    pub props: Vec<(u32, u64)>,
}

#[derive(Clone, Debug)]
pub struct EncoderRecord {
    pub id: u32,
    /// Bitmask over CRTC positional indices.
    pub possible_crtcs: u32,
    pub props: Vec<(u32, u64)>,
}

#[derive(Clone, Debug)]
pub struct PlaneRecord {
    pub id: u32,
    /// Bitmask over CRTC positional indices.
    pub possible_crtcs: u32,
    /// Supported pixel formats as raw fourcc codes.
    pub formats: Vec<u32>,
    pub props: Vec<(u32, u64)>,
}

#[derive(Clone, Debug)]
pub struct PropertyRecord {
    pub id: u32,
    pub name: String,
    pub kind: PropertyKind,
}

/// Geometry and handles for one framebuffer registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramebufferDesc {
    pub width: u32,
    pub height: u32,
    pub fourcc: u32,
    pub plane_count: usize,
    pub handles: [u32; 4],
    pub pitches: [u32; 4],
    pub offsets: [u32; 4],
}

/// A decoded page-flip completion record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FlipEvent {
    pub crtc: u32,
    pub sequence: u32,
}

/// Commit submission flags.
///
/// `allow_modeset` permits a full mode-set; `flip_event` requests a
/// nonblocking commit whose completion is delivered later as a page-flip
/// event on the device fd.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CommitFlags {
    pub allow_modeset: bool,
    pub flip_event: bool,
}

impl CommitFlags {
    /// Blocking commit that may perform a mode-set (enable/teardown).
    pub fn modeset() -> Self {
        CommitFlags {
            allow_modeset: true,
            flip_event: false,
        }
    }

    /// Nonblocking page-flip with deferred completion.
    pub fn flip() -> Self {
        CommitFlags {
            allow_modeset: false,
            flip_event: true,
        }
    }

    /// Nonblocking page-flip that also performs the one-time enable.
    pub fn flip_modeset() -> Self {
        CommitFlags {
            allow_modeset: true,
            flip_event: true,
        }
    }
}

/// The ioctl surface used by the display pipeline.
///
/// Enumeration results are plain records consumed read-only; all mutation
/// goes through the atomic commit call.
pub trait ModeDevice: Send + Sync {
    fn connectors(&self) -> Result<Vec<ConnectorRecord>, DeviceError>;
    fn crtcs(&self) -> Result<Vec<CrtcRecord>, DeviceError>;
    fn encoders(&self) -> Result<Vec<EncoderRecord>, DeviceError>;
    fn planes(&self) -> Result<Vec<PlaneRecord>, DeviceError>;
    fn property(&self, id: u32) -> Result<PropertyRecord, DeviceError>;

    /// Translate a dmabuf fd into a device-local GEM handle.
    fn import_dmabuf(&self, fd: BorrowedFd<'_>) -> Result<u32, DeviceError>;
    /// Release a GEM handle obtained from [`ModeDevice::import_dmabuf`].
    fn close_handle(&self, handle: u32);

    fn add_framebuffer(&self, desc: &FramebufferDesc) -> Result<u32, DeviceError>;
    fn remove_framebuffer(&self, id: u32);

    fn create_mode_blob(&self, connector: u32, mode: &DisplayMode) -> Result<u64, DeviceError>;
    fn destroy_mode_blob(&self, blob: u64);

    /// Submit a batch of (object id, property id, value) triples as one
    /// indivisible state change.
    fn atomic_commit(
        &self,
        flags: CommitFlags,
        props: &[(u32, u32, u64)],
    ) -> Result<(), DeviceError>;

    /// Drain and decode pending completion events from the device fd.
    fn read_events(&self) -> Result<Vec<FlipEvent>, DeviceError>;
}

/// Card node wrapper carrying the `drm` crate device traits.
struct Card(OwnedFd);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl Device for Card {}
impl ControlDevice for Card {}

/// Production [`ModeDevice`] backed by an open DRM/KMS card node.
pub struct DrmDevice {
    card: Card,
    path: String,
    /// Kernel mode records per connector, kept so a chosen [`DisplayMode`]
    /// can be turned back into a mode blob.
    modes: Mutex<HashMap<u32, Vec<drm::control::Mode>>>,
}

fn raw<T: Into<RawResourceHandle>>(handle: T) -> u32 {
    handle.into().get()
}

fn ioctl_err(op: &'static str) -> impl FnOnce(io::Error) -> DeviceError {
    move |source| DeviceError::Ioctl { op, source }
}

fn interface_name(interface: drm::control::connector::Interface) -> &'static str {
    use drm::control::connector::Interface;
    match interface {
        Interface::VGA => "VGA",
        Interface::DVII => "DVI-I",
        Interface::DVID => "DVI-D",
        Interface::DVIA => "DVI-A",
        Interface::Composite => "Composite",
        Interface::SVideo => "S-Video",
        Interface::LVDS => "LVDS",
        Interface::Component => "Component",
        Interface::NinePinDIN => "9-Pin-DIN",
        Interface::DisplayPort => "DP",
        Interface::HDMIA => "HDMI-A",
        Interface::HDMIB => "HDMI-B",
        Interface::TV => "TV",
        Interface::EmbeddedDisplayPort => "eDP",
        Interface::Virtual => "Virtual",
        Interface::DSI => "DSI",
        Interface::DPI => "DPI",
        _ => "Unknown",
    }
}

impl DrmDevice {
    /// Opens the card node read-write and enables the atomic API, which also
    /// enables the universal planes API.
    pub fn open(path: &str) -> Result<Self, DeviceError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| DeviceError::Open {
                path: path.to_string(),
                source,
            })?;
        let card = Card(file.into());

        card.set_client_capability(ClientCapability::Atomic, true)
            .map_err(DeviceError::AtomicCap)?;
        debug!(path, "opened DRM/KMS device with atomic capability");

        Ok(Self {
            card,
            path: path.to_string(),
            modes: Mutex::new(HashMap::new()),
        })
    }

    /// Card node path this device was opened from.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw fd for event-loop registration.
    pub fn raw_fd(&self) -> RawFd {
        self.card.0.as_raw_fd()
    }

    fn object_props(
        &self,
        handle: impl drm::control::ResourceHandle,
    ) -> Result<Vec<(u32, u64)>, DeviceError> {
        let set = self
            .card
            .get_properties(handle)
            .map_err(ioctl_err("object property fetch"))?;
        let (ids, values) = set.as_props_and_values();
        Ok(ids
            .iter()
            .zip(values.iter())
            .map(|(id, value)| (raw(*id), *value))
            .collect())
    }

    /// Reconstruct the possible-CRTC bitmask from the crate-level CRTC list
    /// filter, using each CRTC's positional index in the resource list.
    fn crtc_mask(
        &self,
        resources: &drm::control::ResourceHandles,
        filter: drm::control::CrtcListFilter,
    ) -> u32 {
        let allowed = resources.filter_crtcs(filter);
        let mut mask = 0;
        for (index, crtc) in resources.crtcs().iter().enumerate() {
            if allowed.contains(crtc) {
                mask |= 1 << index;
            }
        }
        mask
    }
}

impl ModeDevice for DrmDevice {
    fn connectors(&self) -> Result<Vec<ConnectorRecord>, DeviceError> {
        let resources = self
            .card
            .resource_handles()
            .map_err(ioctl_err("resource enumeration"))?;

        let mut records = Vec::with_capacity(resources.connectors().len());
        for handle in resources.connectors() {
            let info = self
                .card
                .get_connector(*handle, false)
                .map_err(ioctl_err("connector fetch"))?;

            let status = match info.state() {
                drm::control::connector::State::Connected => ConnectorStatus::Connected,
                drm::control::connector::State::Disconnected => ConnectorStatus::Disconnected,
                drm::control::connector::State::Unknown => ConnectorStatus::Unknown,
            };

            let modes = info
                .modes()
                .iter()
                .enumerate()
                .map(|(index, mode)| DisplayMode {
                    index,
                    width: mode.size().0 as u32,
                    height: mode.size().1 as u32,
                    refresh: mode.vrefresh(),
                    name: mode.name().to_string_lossy().into_owned(),
                    preferred: mode.mode_type().contains(ModeTypeFlags::PREFERRED),
                })
                .collect();
            self.modes
                .lock()
                .unwrap()
                .insert(raw(*handle), info.modes().to_vec());

            records.push(ConnectorRecord {
                id: raw(*handle),
                interface: interface_name(info.interface()),
                interface_id: info.interface_id(),
                status,
                encoders: info.encoders().iter().map(|e| raw(*e)).collect(),
                modes,
                props: self.object_props(*handle)?,
            });
        }
        Ok(records)
    }

    fn crtcs(&self) -> Result<Vec<CrtcRecord>, DeviceError> {
        let resources = self
            .card
            .resource_handles()
            .map_err(ioctl_err("resource enumeration"))?;

        resources
            .crtcs()
            .iter()
            .map(|handle| {
                Ok(CrtcRecord {
                    id: raw(*handle),
                    props: self.object_props(*handle)?,
                })
            })
            .collect()
    }

    fn encoders(&self) -> Result<Vec<EncoderRecord>, DeviceError> {
        let resources = self
            .card
            .resource_handles()
            .map_err(ioctl_err("resource enumeration"))?;

        let mut records = Vec::with_capacity(resources.encoders().len());
        for handle in resources.encoders() {
            let info = self
                .card
                .get_encoder(*handle)
                .map_err(ioctl_err("encoder fetch"))?;
            records.push(EncoderRecord {
                id: raw(*handle),
                possible_crtcs: self.crtc_mask(&resources, info.possible_crtcs()),
                props: self.object_props(*handle)?,
            });
        }
        Ok(records)
    }

    fn planes(&self) -> Result<Vec<PlaneRecord>, DeviceError> {
        let resources = self
            .card
            .resource_handles()
            .map_err(ioctl_err("resource enumeration"))?;
        let planes = self
            .card
            .plane_handles()
            .map_err(ioctl_err("plane enumeration"))?;

        let mut records = Vec::with_capacity(planes.len());
        for handle in planes {
            let info = self
                .card
                .get_plane(handle)
                .map_err(ioctl_err("plane fetch"))?;
            records.push(PlaneRecord {
                id: raw(handle),
                possible_crtcs: self.crtc_mask(&resources, info.possible_crtcs()),
                formats: info.formats().to_vec(),
                props: self.object_props(handle)?,
            });
        }
        Ok(records)
    }

    fn property(&self, id: u32) -> Result<PropertyRecord, DeviceError> {
        let id_nz = NonZeroU32::new(id).ok_or_else(|| DeviceError::Ioctl {
            op: "property fetch",
            source: io::Error::new(io::ErrorKind::InvalidInput, "zero property id"),
        })?;
        let handle = property::Handle::from(id_nz);
        let info = self
            .card
            .get_property(handle)
            .map_err(ioctl_err("property fetch"))?;

        let kind = match info.value_type() {
            property::ValueType::Boolean => PropertyKind::Boolean,
            property::ValueType::UnsignedRange(..) => PropertyKind::Range,
            property::ValueType::SignedRange(..) => PropertyKind::SignedRange,
            property::ValueType::Enum(_) => PropertyKind::Enum,
            property::ValueType::Bitmask => PropertyKind::Bitmask,
            property::ValueType::Blob => PropertyKind::Blob,
            property::ValueType::Object => PropertyKind::Object,
            _ => PropertyKind::Unknown,
        };

        Ok(PropertyRecord {
            id,
            name: info.name().to_string_lossy().into_owned(),
            kind,
        })
    }

    fn import_dmabuf(&self, fd: BorrowedFd<'_>) -> Result<u32, DeviceError> {
        self.card
            .prime_fd_to_buffer(fd)
            .map(raw)
            .map_err(ioctl_err("dmabuf import"))
    }

    fn close_handle(&self, handle: u32) {
        let Some(handle) = NonZeroU32::new(handle) else {
            return;
        };
        if let Err(err) = self.card.close_buffer(drm::buffer::Handle::from(handle)) {
            warn!("failed to close GEM handle {handle}: {err}");
        }
    }

    fn add_framebuffer(&self, desc: &FramebufferDesc) -> Result<u32, DeviceError> {
        struct Planar<'a>(&'a FramebufferDesc);

        impl drm::buffer::PlanarBuffer for Planar<'_> {
            fn size(&self) -> (u32, u32) {
                (self.0.width, self.0.height)
            }

            fn format(&self) -> DrmFourcc {
                DrmFourcc::try_from(self.0.fourcc).unwrap_or(DrmFourcc::Xrgb8888)
            }

            fn modifier(&self) -> Option<DrmModifier> {
                None
            }

            fn pitches(&self) -> [u32; 4] {
                self.0.pitches
            }

            fn handles(&self) -> [Option<drm::buffer::Handle>; 4] {
                let mut handles = [None; 4];
                for (slot, handle) in handles.iter_mut().zip(self.0.handles) {
                    *slot = NonZeroU32::new(handle).map(drm::buffer::Handle::from);
                }
                handles
            }

            fn offsets(&self) -> [u32; 4] {
                self.0.offsets
            }
        }

        self.card
            .add_planar_framebuffer(&Planar(desc), drm::control::FbCmd2Flags::empty())
            .map(raw)
            .map_err(ioctl_err("framebuffer registration"))
    }

    fn remove_framebuffer(&self, id: u32) {
        let Some(id) = NonZeroU32::new(id) else {
            return;
        };
        let handle = drm::control::framebuffer::Handle::from(id);
        if let Err(err) = self.card.destroy_framebuffer(handle) {
            warn!("failed to remove framebuffer {id}: {err}");
        }
    }

    fn create_mode_blob(&self, connector: u32, mode: &DisplayMode) -> Result<u64, DeviceError> {
        let kernel_mode = {
            let modes = self.modes.lock().unwrap();
            modes
                .get(&connector)
                .and_then(|list| list.get(mode.index))
                .copied()
                .ok_or_else(|| DeviceError::Ioctl {
                    op: "mode blob creation",
                    source: io::Error::new(io::ErrorKind::NotFound, "mode not enumerated"),
                })?
        };

        match self
            .card
            .create_property_blob(&kernel_mode)
            .map_err(ioctl_err("mode blob creation"))?
        {
            property::Value::Blob(id) => Ok(id),
            other => Err(DeviceError::Ioctl {
                op: "mode blob creation",
                source: io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unexpected blob value {other:?}"),
                ),
            }),
        }
    }

    fn destroy_mode_blob(&self, blob: u64) {
        if let Err(err) = self.card.destroy_property_blob(blob) {
            warn!("failed to destroy mode blob {blob}: {err}");
        }
    }

    fn atomic_commit(
        &self,
        flags: CommitFlags,
        props: &[(u32, u32, u64)],
    ) -> Result<(), DeviceError> {
        let mut request = AtomicModeReq::new();
        for (object, prop, value) in props {
            let (Some(object), Some(prop)) = (NonZeroU32::new(*object), NonZeroU32::new(*prop))
            else {
                return Err(DeviceError::Commit(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "zero object or property id",
                )));
            };
            request.add_raw_property(object, prop.into(), *value);
        }

        let mut drm_flags = AtomicCommitFlags::empty();
        if flags.allow_modeset {
            drm_flags |= AtomicCommitFlags::ALLOW_MODESET;
        }
        if flags.flip_event {
            drm_flags |= AtomicCommitFlags::PAGE_FLIP_EVENT | AtomicCommitFlags::NONBLOCK;
        }

        self.card
            .atomic_commit(drm_flags, request)
            .map_err(DeviceError::Commit)
    }

    fn read_events(&self) -> Result<Vec<FlipEvent>, DeviceError> {
        let events = self
            .card
            .receive_events()
            .map_err(ioctl_err("event decode"))?;

        Ok(events
            .filter_map(|event| match event {
                Event::PageFlip(flip) => Some(FlipEvent {
                    crtc: raw(flip.crtc),
                    sequence: flip.frame,
                }),
                _ => None,
            })
            .collect())
    }
}
