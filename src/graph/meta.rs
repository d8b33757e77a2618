//! Typed per-node metadata side-table.
//!
//! Passes communicate shape and scale information exclusively through
//! this table, keyed by node id. Modelling it as an explicit side-table
//! (rather than attributes injected onto nodes) keeps ownership and
//! lifetime of annotations unambiguous across passes.

use std::collections::HashMap;

use crate::error::{QuantError, Result};
use crate::graph::ir::NodeId;

/// The annotation categories a pass can require or produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetaKey {
    /// Output tensor shape.
    Shape,
    /// Step sizes of the node's inputs.
    EpsIn,
    /// Step size of the node's output.
    EpsOut,
}

/// Annotations attached to one node.
#[derive(Clone, Debug, Default)]
pub struct NodeMeta {
    /// Output shape, if annotated.
    pub shape: Option<Vec<usize>>,
    /// Input step sizes, one per argument edge.
    pub eps_in: Option<Vec<f32>>,
    /// Output step size.
    pub eps_out: Option<f32>,
}

/// Side-table of node annotations.
#[derive(Clone, Debug, Default)]
pub struct MetaTable {
    entries: HashMap<NodeId, NodeMeta>,
}

impl MetaTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Annotations for a node, if any.
    pub fn get(&self, id: NodeId) -> Option<&NodeMeta> {
        self.entries.get(&id)
    }

    /// Mutable annotation slot for a node, created on demand.
    pub fn entry(&mut self, id: NodeId) -> &mut NodeMeta {
        self.entries.entry(id).or_default()
    }

    /// Number of annotated nodes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no node is annotated.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Require the output step size of a node.
    ///
    /// `producer` names the pass that would have written the annotation;
    /// it appears in the error so the missing pipeline stage is obvious.
    pub fn require_eps_out(&self, id: NodeId, producer: &'static str) -> Result<f32> {
        self.get(id)
            .and_then(|m| m.eps_out)
            .ok_or(QuantError::MissingMetadata {
                node: id,
                key: MetaKey::EpsOut,
                producer,
            })
    }

    /// Require the output shape of a node.
    pub fn require_shape(&self, id: NodeId, producer: &'static str) -> Result<Vec<usize>> {
        self.get(id)
            .and_then(|m| m.shape.clone())
            .ok_or(QuantError::MissingMetadata {
                node: id,
                key: MetaKey::Shape,
                producer,
            })
    }
}
