// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Accumulation and submission of atomic property changes.

use crate::device::{CommitFlags, ModeDevice};
use crate::errors::DisplayError;
use crate::graph::ResourceGraph;
use tracing::trace;

/// A single-use batch of (object, property, value) changes.
///
/// Property names are resolved against the resource graph when added. The
/// first failed resolution poisons the request permanently: every later add
/// and the final commit return the invalid-request error without touching the
/// device. Committing consumes the request, so it can never be submitted
/// twice.
pub struct AtomicRequest<'g> {
    graph: &'g ResourceGraph,
    props: Vec<(u32, u32, u64)>,
    poisoned: bool,
}

impl<'g> AtomicRequest<'g> {
    pub fn new(graph: &'g ResourceGraph) -> Self {
        Self {
            graph,
            props: Vec::new(),
            poisoned: false,
        }
    }

    /// Resolves `name` against the object's property list and appends the
    /// change to the batch.
    pub fn add_property(
        &mut self,
        object: u32,
        name: &str,
        value: u64,
    ) -> Result<(), DisplayError> {
        if self.poisoned {
            return Err(DisplayError::InvalidRequest);
        }

        match self.graph.property_id(object, name) {
            Some(property) => {
                trace!(object, name, value, "queued property change");
                self.props.push((object, property, value));
                Ok(())
            }
            None => {
                self.poisoned = true;
                Err(DisplayError::UnknownProperty {
                    object,
                    name: name.to_string(),
                })
            }
        }
    }

    /// Number of accumulated changes.
    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    /// Submits the batch as one indivisible state change.
    pub fn commit<D: ModeDevice>(self, dev: &D, flags: CommitFlags) -> Result<(), DisplayError> {
        if self.poisoned {
            return Err(DisplayError::InvalidRequest);
        }

        dev.atomic_commit(flags, &self.props)
            .map_err(DisplayError::Commit)
    }
}
