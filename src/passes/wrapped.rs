//! Recursion into wrapped submodules.
//!
//! Opaque wrapped modules (attention blocks and the like) hide an inner
//! graph from outer pattern matching. Rather than per-architecture
//! unwrap/rewrap glue, a single combinator applies any pass to every
//! wrapped module's inner graph, carrying shape and epsilon metadata in
//! through the recursion and back out.

use crate::error::Result;
use crate::graph::{Graph, GraphModule, MetaTable, NodeId, NodeOp};
use crate::passes::annotate::AnnotatePass;
use crate::passes::GraphPass;

/// Apply `pass` to the inner graph of every wrapped module in `graph`.
///
/// For each wrapped module the combinator:
/// 1. derives the inner graph's input shapes and epsilons from the outer
///    call site's metadata and re-annotates the inner graph,
/// 2. runs the pass on the inner graph with its own metadata table,
/// 3. reinstalls the inner graph and propagates its output epsilon back
///    onto the outer call node.
pub fn apply_to_wrapped(pass: &dyn GraphPass, graph: &mut Graph, meta: &mut MetaTable) -> Result<()> {
    let names: Vec<String> = graph.module_names().map(str::to_string).collect();
    for name in names {
        if !matches!(graph.module(&name)?, GraphModule::Wrapped(_)) {
            continue;
        }

        let call = find_call(graph, &name);
        let boundary = call.and_then(|c| {
            let args = graph.node(c).args.clone();
            let shapes: Option<Vec<Vec<usize>>> = args
                .iter()
                .map(|&a| meta.get(a).and_then(|m| m.shape.clone()))
                .collect();
            let eps: Option<Vec<f32>> = args
                .iter()
                .map(|&a| meta.get(a).and_then(|m| m.eps_out))
                .collect();
            Some((shapes?, eps?))
        });

        let mut inner = {
            let GraphModule::Wrapped(w) = graph.module_mut(&name)? else {
                unreachable!("checked above");
            };
            std::mem::take(&mut w.graph)
        };

        let mut inner_meta = MetaTable::new();
        if let Some((shapes, eps)) = boundary {
            AnnotatePass::new(shapes, eps).run(&mut inner, &mut inner_meta)?;
        }
        pass.run(&mut inner, &mut inner_meta)?;

        let inner_out_eps = inner
            .output()
            .and_then(|o| inner_meta.get(o))
            .and_then(|m| m.eps_out);

        let GraphModule::Wrapped(w) = graph.module_mut(&name)? else {
            unreachable!("checked above");
        };
        w.graph = inner;

        if let (Some(call), Some(eps)) = (call, inner_out_eps) {
            meta.entry(call).eps_out = Some(eps);
        }
    }
    Ok(())
}

fn find_call(graph: &Graph, name: &str) -> Option<NodeId> {
    graph
        .order_ids()
        .into_iter()
        .find(|&id| matches!(&graph.node(id).op, NodeOp::CallModule(n) if n == name))
}
