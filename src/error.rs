//! Error types for quantization and graph editing.

use crate::graph::MetaKey;

/// Crate-wide error type.
///
/// Construction-time misconfiguration, numeric domain violations and
/// missing pass metadata are distinct variants so callers can tell a bad
/// config apart from a bad pipeline. Invariant violations inside tree
/// discovery are assertions, not errors: they signal a bug, never a
/// recoverable condition.
#[derive(Debug, thiserror::Error)]
pub enum QuantError {
    /// Invalid configuration value, rejected at construction.
    #[error("invalid {param}: {reason}")]
    Config {
        /// Name of the offending parameter.
        param: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// Quantization step size must be strictly positive.
    #[error("non-positive quantization step {eps} (check n_levels / clip range upstream)")]
    NonPositiveEps {
        /// The offending step size.
        eps: f32,
    },

    /// A clip range with `hi <= lo` where a non-degenerate range is required.
    #[error("degenerate clip range [{lo}, {hi}]")]
    EmptyRange {
        /// Lower clip bound.
        lo: f32,
        /// Upper clip bound.
        hi: f32,
    },

    /// A pass needed node metadata that no earlier pass wrote.
    #[error("node {node} is missing {key:?} metadata; run the '{producer}' pass first")]
    MissingMetadata {
        /// Node the metadata was requested for.
        node: usize,
        /// Which annotation was missing.
        key: MetaKey,
        /// The pass that would have produced it.
        producer: &'static str,
    },

    /// Pipeline construction found a pass whose requirements are never met.
    #[error("pass '{pass}' requires {key:?} metadata but no earlier pass produces it")]
    PipelineOrder {
        /// The pass with the unsatisfied requirement.
        pass: &'static str,
        /// The metadata key nobody produces.
        key: MetaKey,
    },

    /// Referenced a module name not present in the graph's module table.
    #[error("graph has no module named '{0}'")]
    UnknownModule(String),

    /// Tried to register a module under a name already in use.
    #[error("module name '{0}' is already taken")]
    DuplicateModule(String),

    /// Tried to erase a node that still has consumers.
    #[error("node {0} still has users and cannot be erased")]
    NodeInUse(usize),

    /// The graph has no output node to traverse from.
    #[error("graph has no output node")]
    NoOutput,

    /// A quantized module was used in a context requiring started state.
    #[error("module '{0}' is still collecting statistics; start it before integerizing")]
    NotStarted(String),

    /// Tensor shapes incompatible with the requested operation.
    #[error("shape mismatch in {op}: {lhs:?} vs {rhs:?}")]
    ShapeMismatch {
        /// Operation that failed.
        op: &'static str,
        /// Left-hand shape.
        lhs: Vec<usize>,
        /// Right-hand shape.
        rhs: Vec<usize>,
    },

    /// Graph execution received the wrong number of inputs.
    #[error("graph expects {expected} inputs, got {got}")]
    InputArity {
        /// Declared input count.
        expected: usize,
        /// Provided input count.
        got: usize,
    },
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, QuantError>;
