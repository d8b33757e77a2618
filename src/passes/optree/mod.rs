//! Operation-tree discovery and replacement.

mod discover;
mod replace;
mod tree;

#[cfg(test)]
mod tests;

pub use discover::{discover_trees, TreeSpec};
pub use replace::{ReplacementFn, TreeReplacePass};
pub use tree::OpTree;
