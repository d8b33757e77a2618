//! Graph intermediate representation and execution.

mod execute;
mod ir;
mod meta;
mod module;

#[cfg(test)]
mod tests;

pub use ir::{Graph, Node, NodeId, NodeOp, OpKind, OpTarget};
pub use meta::{MetaKey, MetaTable, NodeMeta};
pub use module::{GraphModule, ModuleKind, Wrapped};
