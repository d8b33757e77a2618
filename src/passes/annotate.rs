//! Shape and epsilon annotation.
//!
//! Propagates tensor shapes and quantization step sizes from the graph
//! inputs through every node, writing the metadata side-table later
//! passes read. This is the sole channel by which passes communicate
//! numeric scale information.

use crate::error::{QuantError, Result};
use crate::graph::{Graph, GraphModule, MetaKey, MetaTable, NodeId, NodeOp, OpTarget};
use crate::passes::GraphPass;

/// Annotates every node with `shape`, `eps_in` and `eps_out`.
pub struct AnnotatePass {
    input_shapes: Vec<Vec<usize>>,
    input_eps: Vec<f32>,
}

impl AnnotatePass {
    /// Build with the declared shapes and step sizes of the graph inputs.
    pub fn new(input_shapes: Vec<Vec<usize>>, input_eps: Vec<f32>) -> Self {
        Self {
            input_shapes,
            input_eps,
        }
    }

    fn annotate_node(
        &self,
        graph: &Graph,
        meta: &mut MetaTable,
        id: NodeId,
    ) -> Result<(Vec<usize>, f32)> {
        let node = graph.node(id);
        let args = node.args.clone();

        let arg_shapes: Vec<Vec<usize>> = args
            .iter()
            .map(|&a| meta.require_shape(a, Self::NAME))
            .collect::<Result<_>>()?;
        let arg_eps: Vec<f32> = args
            .iter()
            .map(|&a| meta.require_eps_out(a, Self::NAME))
            .collect::<Result<_>>()?;

        let (shape, eps_out) = match &node.op {
            NodeOp::Input { index } => {
                let shape =
                    self.input_shapes
                        .get(*index)
                        .cloned()
                        .ok_or(QuantError::InputArity {
                            expected: *index + 1,
                            got: self.input_shapes.len(),
                        })?;
                let eps = *self.input_eps.get(*index).ok_or(QuantError::InputArity {
                    expected: *index + 1,
                    got: self.input_eps.len(),
                })?;
                (shape, eps)
            }
            NodeOp::Call(target) => annotate_call(*target, &arg_shapes, &arg_eps)?,
            NodeOp::CallModule(name) => {
                annotate_module(graph.module(name)?, &arg_shapes, &arg_eps)?
            }
        };

        let entry = meta.entry(id);
        entry.shape = Some(shape.clone());
        entry.eps_in = Some(arg_eps);
        entry.eps_out = Some(eps_out);
        Ok((shape, eps_out))
    }

    const NAME: &'static str = "annotate";
}

impl GraphPass for AnnotatePass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn produces(&self) -> &'static [MetaKey] {
        &[MetaKey::Shape, MetaKey::EpsIn, MetaKey::EpsOut]
    }

    fn run(&self, graph: &mut Graph, meta: &mut MetaTable) -> Result<()> {
        for id in graph.order_ids() {
            self.annotate_node(graph, meta, id)?;
        }
        Ok(())
    }
}

fn annotate_call(
    target: OpTarget,
    shapes: &[Vec<usize>],
    eps: &[f32],
) -> Result<(Vec<usize>, f32)> {
    let first = shapes.first().cloned().ok_or(QuantError::InputArity {
        expected: 1,
        got: 0,
    })?;
    match target {
        OpTarget::Add | OpTarget::Mul => {
            for s in shapes {
                if *s != first {
                    return Err(QuantError::ShapeMismatch {
                        op: "elementwise",
                        lhs: first,
                        rhs: s.clone(),
                    });
                }
            }
            let e = match target {
                OpTarget::Mul => eps.iter().product(),
                _ => eps[0],
            };
            Ok((first, e))
        }
        OpTarget::Relu => Ok((first, eps[0])),
        OpTarget::Matmul => {
            let b = shapes.get(1).cloned().unwrap_or_default();
            if first.len() != 2 || b.len() != 2 || first[1] != b[0] {
                return Err(QuantError::ShapeMismatch {
                    op: "matmul",
                    lhs: first,
                    rhs: b,
                });
            }
            Ok((vec![first[0], b[1]], eps[0] * eps[1]))
        }
        OpTarget::Concat { dim } => {
            let mut shape = first.clone();
            if dim >= shape.len() {
                return Err(QuantError::ShapeMismatch {
                    op: "concat",
                    lhs: first,
                    rhs: vec![dim],
                });
            }
            shape[dim] = shapes.iter().map(|s| s[dim]).sum();
            Ok((shape, eps[0]))
        }
        OpTarget::Stack { dim } => {
            let mut shape = first.clone();
            shape.insert(dim.min(shape.len()), shapes.len());
            Ok((shape, eps[0]))
        }
    }
}

fn annotate_module(
    module: &GraphModule,
    shapes: &[Vec<usize>],
    eps: &[f32],
) -> Result<(Vec<usize>, f32)> {
    let first = shapes.first().cloned().ok_or(QuantError::InputArity {
        expected: 1,
        got: 0,
    })?;
    let first_eps = eps.first().copied().unwrap_or(1.0);
    match module {
        GraphModule::Act(act) => Ok((first, act.eps())),
        GraphModule::Add(add) => Ok((first, add.act_out().eps())),
        GraphModule::Concat(cat) => {
            let mut shape = first.clone();
            if cat.stack() {
                shape.insert(cat.dim().min(shape.len()), shapes.len());
            } else if cat.dim() < shape.len() {
                shape[cat.dim()] = shapes.iter().map(|s| s[cat.dim()]).sum();
            }
            let e = cat.acts().first().map(|a| a.eps()).unwrap_or(first_eps);
            Ok((shape, e))
        }
        GraphModule::Matmul(mm) => {
            let b = shapes.get(1).cloned().unwrap_or_default();
            if first.len() != 2 || b.len() != 2 {
                return Err(QuantError::ShapeMismatch {
                    op: "matmul",
                    lhs: first,
                    rhs: b,
                });
            }
            let eps_b = eps.get(1).copied().unwrap_or(1.0);
            Ok((vec![first[0], b[1]], mm.eps_out(first_eps, eps_b)))
        }
        GraphModule::LinOp(op) => {
            let shape = linop_out_shape(op, &first)?;
            Ok((shape, op.eps_out(first_eps)[0]))
        }
        GraphModule::Linear(l) => {
            let mut shape = first.clone();
            *shape.last_mut().ok_or(QuantError::ShapeMismatch {
                op: "linear",
                lhs: first.clone(),
                rhs: vec![],
            })? = l.out_features();
            Ok((shape, first_eps))
        }
        GraphModule::Conv1d(_) | GraphModule::Conv2d(_) | GraphModule::BatchNorm(_) => {
            // unquantized float modules do not change the step size they
            // are handed; exact conv output shapes are only needed once
            // the operator is quantization-wrapped
            Ok((first, first_eps))
        }
        GraphModule::Requant(r) => Ok((first, first_eps * r.mul() as f32 / r.div() as f32)),
        GraphModule::LayerNorm(ln) => {
            let n = ln.n_levels() as f32;
            Ok((first, ln.maxval() / (n / 2.0 - 1.0)))
        }
        GraphModule::IntLayerNorm(_) => Ok((first, 1.0)),
        GraphModule::Normalize(_) | GraphModule::Affine(_) => Ok((first, first_eps)),
        GraphModule::Wrapped(w) => Ok((first, w.tracker.eps())),
    }
}

fn linop_out_shape(op: &crate::quant::linop::QuantLinearOp, input: &[usize]) -> Result<Vec<usize>> {
    use crate::quant::linop::LinOpKind;
    match op.kind() {
        LinOpKind::Linear(l) => {
            let mut shape = input.to_vec();
            *shape.last_mut().ok_or(QuantError::ShapeMismatch {
                op: "linear",
                lhs: input.to_vec(),
                rhs: vec![],
            })? = l.out_features();
            Ok(shape)
        }
        LinOpKind::Conv1d(c) => {
            if input.len() != 3 {
                return Err(QuantError::ShapeMismatch {
                    op: "conv1d",
                    lhs: input.to_vec(),
                    rhs: c.weight.shape().to_vec(),
                });
            }
            let k = c.weight.shape()[2];
            let span = c.dilation * (k - 1) + 1;
            let out_len = (input[2] + 2 * c.padding).saturating_sub(span) / c.stride + 1;
            Ok(vec![input[0], c.out_channels(), out_len])
        }
        LinOpKind::Conv2d(c) => {
            if input.len() != 4 {
                return Err(QuantError::ShapeMismatch {
                    op: "conv2d",
                    lhs: input.to_vec(),
                    rhs: c.weight.shape().to_vec(),
                });
            }
            let (kh, kw) = (c.weight.shape()[2], c.weight.shape()[3]);
            let span_h = c.dilation.0 * (kh - 1) + 1;
            let span_w = c.dilation.1 * (kw - 1) + 1;
            let out_h = (input[2] + 2 * c.padding.0).saturating_sub(span_h) / c.stride.0 + 1;
            let out_w = (input[3] + 2 * c.padding.1).saturating_sub(span_w) / c.stride.1 + 1;
            Ok(vec![input[0], c.out_channels(), out_h, out_w])
        }
    }
}
