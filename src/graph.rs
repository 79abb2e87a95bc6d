// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! In-memory graph of the display device's mode-setting objects.
//!
//! Discovery is an explicit multi-phase protocol: raw enumeration first, then
//! cross-linking of non-owning references, then property materialization, and
//! finally per-type setup over the fully linked graph. A failure in any phase
//! aborts the whole discovery; no partial graph is ever published.
//!
//! All objects live in one owning table keyed by their kernel object id.
//! Cross-references (connector to encoder, encoder to CRTC, CRTC to plane)
//! are stored as id lists and resolved through the table, never as shared
//! ownership.

use crate::device::{ConnectorStatus, DisplayMode, ModeDevice, PropertyKind};
use crate::errors::DisplayError;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

const PLANE_TYPE_OVERLAY: u64 = 0;
const PLANE_TYPE_PRIMARY: u64 = 1;
const PLANE_TYPE_CURSOR: u64 = 2;

/// Hardware compositing role of a plane, resolved from its "type" property.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PlaneKind {
    Overlay,
    Primary,
    Cursor,
}

/// A display output port.
#[derive(Clone, Debug)]
pub struct Connector {
    pub id: u32,
    /// Human readable name, e.g. `HDMI-A-1`.
    pub name: String,
    pub status: ConnectorStatus,
    pub modes: Vec<DisplayMode>,
    /// Encoders reachable from this connector, in kernel order.
    pub encoders: Vec<u32>,
    props: Vec<(u32, u64)>,
}

/// A scan-out pipeline stage.
#[derive(Clone, Debug)]
pub struct Crtc {
    pub id: u32,
    /// Positional index used for possible-CRTC bitmask tests.
    pub index: usize,
    /// Planes this CRTC can drive, in discovery order.
    pub planes: Vec<u32>,
    props: Vec<(u32, u64)>,
}

#[derive(Clone, Debug)]
pub struct Encoder {
    pub id: u32,
    /// CRTCs this encoder can drive, in discovery order.
    pub crtcs: Vec<u32>,
    props: Vec<(u32, u64)>,
}

#[derive(Clone, Debug)]
pub struct Plane {
    pub id: u32,
    pub kind: PlaneKind,
    /// Supported pixel formats as raw fourcc codes.
    pub formats: Vec<u32>,
    pub crtcs: Vec<u32>,
    props: Vec<(u32, u64)>,
}

#[derive(Clone, Debug)]
pub struct Property {
    pub id: u32,
    pub name: String,
    pub kind: PropertyKind,
}

/// A kernel-addressable mode object.
#[derive(Clone, Debug)]
pub enum Object {
    Connector(Connector),
    Crtc(Crtc),
    Encoder(Encoder),
    Plane(Plane),
    Property(Property),
}

impl Object {
    pub fn id(&self) -> u32 {
        match self {
            Object::Connector(o) => o.id,
            Object::Crtc(o) => o.id,
            Object::Encoder(o) => o.id,
            Object::Plane(o) => o.id,
            Object::Property(o) => o.id,
        }
    }

    /// The (property id, current value) pairs fetched at discovery time.
    /// Properties themselves carry none.
    pub fn props(&self) -> &[(u32, u64)] {
        match self {
            Object::Connector(o) => &o.props,
            Object::Crtc(o) => &o.props,
            Object::Encoder(o) => &o.props,
            Object::Plane(o) => &o.props,
            Object::Property(_) => &[],
        }
    }
}

/// Immutable, cross-referenced inventory of the device's mode objects.
pub struct ResourceGraph {
    objects: HashMap<u32, Object>,
    connectors: Vec<u32>,
    crtcs: Vec<u32>,
    encoders: Vec<u32>,
    planes: Vec<u32>,
}

impl ResourceGraph {
    /// Enumerates the device and assembles the full graph.
    pub fn discover(dev: &impl ModeDevice) -> Result<Self, DisplayError> {
        // Phase 1: raw enumeration. CRTCs first so their positional indices
        // exist before any bitmask is interpreted.
        let crtcs = dev.crtcs().map_err(DisplayError::Discovery)?;
        let encoders = dev.encoders().map_err(DisplayError::Discovery)?;
        let connectors = dev.connectors().map_err(DisplayError::Discovery)?;
        let planes = dev.planes().map_err(DisplayError::Discovery)?;

        let mut graph = ResourceGraph {
            objects: HashMap::new(),
            connectors: Vec::with_capacity(connectors.len()),
            crtcs: Vec::with_capacity(crtcs.len()),
            encoders: Vec::with_capacity(encoders.len()),
            planes: Vec::with_capacity(planes.len()),
        };

        for (index, record) in crtcs.iter().enumerate() {
            graph.crtcs.push(record.id);
            graph.objects.insert(
                record.id,
                Object::Crtc(Crtc {
                    id: record.id,
                    index,
                    planes: Vec::new(),
                    props: record.props.clone(),
                }),
            );
        }

        // Phase 2: cross-link non-owning references through bitmask and list
        // membership.
        for record in &encoders {
            let crtcs = mask_to_ids(record.possible_crtcs, &graph.crtcs);
            graph.encoders.push(record.id);
            graph.objects.insert(
                record.id,
                Object::Encoder(Encoder {
                    id: record.id,
                    crtcs,
                    props: record.props.clone(),
                }),
            );
        }

        for record in &connectors {
            let mut reachable = Vec::with_capacity(record.encoders.len());
            for encoder in &record.encoders {
                if graph.encoders.contains(encoder) {
                    reachable.push(*encoder);
                } else {
                    warn!("connector {}: encoder {} not found", record.id, encoder);
                }
            }

            graph.connectors.push(record.id);
            graph.objects.insert(
                record.id,
                Object::Connector(Connector {
                    id: record.id,
                    name: format!("{}-{}", record.interface, record.interface_id),
                    status: record.status,
                    modes: record.modes.clone(),
                    encoders: reachable,
                    props: record.props.clone(),
                }),
            );
        }

        for record in &planes {
            let crtcs = mask_to_ids(record.possible_crtcs, &graph.crtcs);
            for crtc in &crtcs {
                if let Some(Object::Crtc(crtc)) = graph.objects.get_mut(crtc) {
                    crtc.planes.push(record.id);
                }
            }

            graph.planes.push(record.id);
            graph.objects.insert(
                record.id,
                // Plane type is unresolved until the delayed setup phase.
                Object::Plane(Plane {
                    id: record.id,
                    kind: PlaneKind::Overlay,
                    formats: record.formats.clone(),
                    crtcs,
                    props: record.props.clone(),
                }),
            );
        }

        // Phase 3: materialize every distinct property referenced by any
        // object, exactly once.
        let mut referenced = BTreeSet::new();
        for object in graph.objects.values() {
            for (id, _) in object.props() {
                referenced.insert(*id);
            }
        }

        for id in referenced {
            let record = dev.property(id).map_err(DisplayError::Discovery)?;
            graph.objects.insert(
                id,
                Object::Property(Property {
                    id,
                    name: record.name,
                    kind: record.kind,
                }),
            );
        }

        // Phase 4: per-type setup over the fully linked graph.
        graph.setup_planes()?;

        debug!(
            connectors = graph.connectors.len(),
            crtcs = graph.crtcs.len(),
            encoders = graph.encoders.len(),
            planes = graph.planes.len(),
            "display resource graph assembled"
        );
        Ok(graph)
    }

    /// Resolve each plane's compositing role from its "type" property. A
    /// plane without a recognizable type aborts discovery.
    fn setup_planes(&mut self) -> Result<(), DisplayError> {
        let plane_ids = self.planes.clone();
        for id in plane_ids {
            let value = self
                .property_value(id, "type")
                .ok_or(DisplayError::PlaneType { plane: id })?;
            let kind = match value {
                PLANE_TYPE_OVERLAY => PlaneKind::Overlay,
                PLANE_TYPE_PRIMARY => PlaneKind::Primary,
                PLANE_TYPE_CURSOR => PlaneKind::Cursor,
                _ => return Err(DisplayError::PlaneType { plane: id }),
            };
            if let Some(Object::Plane(plane)) = self.objects.get_mut(&id) {
                plane.kind = kind;
            }
        }
        Ok(())
    }

    /// O(1) lookup by kernel object id.
    pub fn object(&self, id: u32) -> Option<&Object> {
        self.objects.get(&id)
    }

    /// Resolve a property by name against an object's property list, by
    /// back-reference through the object table.
    pub fn property_id(&self, object: u32, name: &str) -> Option<u32> {
        self.object(object)?.props().iter().find_map(|(id, _)| {
            match self.objects.get(id) {
                Some(Object::Property(p)) if p.name == name => Some(*id),
                _ => None,
            }
        })
    }

    /// Current value of a named property on an object, as fetched at
    /// discovery time.
    pub fn property_value(&self, object: u32, name: &str) -> Option<u64> {
        self.object(object)?.props().iter().find_map(|(id, value)| {
            match self.objects.get(id) {
                Some(Object::Property(p)) if p.name == name => Some(*value),
                _ => None,
            }
        })
    }

    pub fn connector(&self, id: u32) -> Option<&Connector> {
        match self.object(id) {
            Some(Object::Connector(c)) => Some(c),
            _ => None,
        }
    }

    pub fn crtc(&self, id: u32) -> Option<&Crtc> {
        match self.object(id) {
            Some(Object::Crtc(c)) => Some(c),
            _ => None,
        }
    }

    pub fn encoder(&self, id: u32) -> Option<&Encoder> {
        match self.object(id) {
            Some(Object::Encoder(e)) => Some(e),
            _ => None,
        }
    }

    pub fn plane(&self, id: u32) -> Option<&Plane> {
        match self.object(id) {
            Some(Object::Plane(p)) => Some(p),
            _ => None,
        }
    }

    /// Connector ids in discovery order.
    pub fn connectors(&self) -> &[u32] {
        &self.connectors
    }

    /// Plane ids in discovery order.
    pub fn planes(&self) -> &[u32] {
        &self.planes
    }

    /// CRTC ids in discovery order.
    pub fn crtcs(&self) -> &[u32] {
        &self.crtcs
    }
}

impl Plane {
    pub fn supports_format(&self, fourcc: u32) -> bool {
        self.formats.contains(&fourcc)
    }
}

fn mask_to_ids(mask: u32, crtcs_in_order: &[u32]) -> Vec<u32> {
    crtcs_in_order
        .iter()
        .enumerate()
        .filter(|(index, _)| mask & (1 << index) != 0)
        .map(|(_, id)| *id)
        .collect()
}
