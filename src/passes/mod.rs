//! Graph rewrite passes.
//!
//! A pass owns the graph exclusively while it runs; pipelines execute
//! passes strictly sequentially, in declared order, and validate at
//! construction time that every pass's metadata requirements are
//! produced by an earlier pass.

pub mod annotate;
pub mod harmonize;
pub mod integerize;
pub mod optree;
pub mod wrapped;


use tracing::debug;

use crate::error::{QuantError, Result};
use crate::graph::{Graph, MetaKey, MetaTable};

pub use annotate::AnnotatePass;
pub use harmonize::{
    AddTreeReplacePass, ConcatTreeReplacePass, HarmonizePass, InsertActivationsBetweenLinearsPass,
    MulTreeReplacePass,
};
pub use integerize::{IntegerizePass, LayerNormDisassemblePass, RequantMergePass};
pub use optree::{discover_trees, OpTree, TreeReplacePass, TreeSpec};
pub use wrapped::apply_to_wrapped;

/// A single graph transformation.
pub trait GraphPass {
    /// Pass name, used in diagnostics and pipeline validation.
    fn name(&self) -> &'static str;

    /// Metadata this pass reads. The pipeline refuses construction if no
    /// earlier pass produces them.
    fn requires(&self) -> &'static [MetaKey] {
        &[]
    }

    /// Metadata this pass writes.
    fn produces(&self) -> &'static [MetaKey] {
        &[]
    }

    /// Apply the transformation.
    fn run(&self, graph: &mut Graph, meta: &mut MetaTable) -> Result<()>;
}

/// A fixed, ordered sequence of passes.
pub struct Pipeline {
    passes: Vec<Box<dyn GraphPass>>,
}

impl Pipeline {
    /// Build a pipeline, validating metadata dependencies up front.
    ///
    /// A pass whose `requires()` names a key that no earlier pass
    /// `produces()` is an ordering bug; catching it here turns a runtime
    /// `MissingMetadata` failure into a construction-time error.
    pub fn new(passes: Vec<Box<dyn GraphPass>>) -> Result<Self> {
        let mut available: Vec<MetaKey> = Vec::new();
        for pass in &passes {
            for &key in pass.requires() {
                if !available.contains(&key) {
                    return Err(QuantError::PipelineOrder {
                        pass: pass.name(),
                        key,
                    });
                }
            }
            for &key in pass.produces() {
                if !available.contains(&key) {
                    available.push(key);
                }
            }
        }
        Ok(Self { passes })
    }

    /// Names of the contained passes, in order.
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run every pass to completion, in order. The first failure aborts
    /// the whole pipeline; there is no partial-success mode.
    pub fn run(&self, graph: &mut Graph, meta: &mut MetaTable) -> Result<()> {
        for pass in &self.passes {
            debug!(pass = pass.name(), nodes = graph.len(), "running pass");
            pass.run(graph, meta)?;
        }
        Ok(())
    }
}
