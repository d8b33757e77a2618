//! Ordered graph interpretation.

use std::collections::HashMap;

use ndarray::{ArrayD, Axis};

use crate::error::{QuantError, Result};
use crate::graph::ir::{Graph, NodeId, NodeOp, OpTarget};

impl Graph {
    /// Execute the graph on the given inputs and return the output value.
    ///
    /// Evaluation follows the execution order; module calls may mutate
    /// module state (statistics collection), which is why execution takes
    /// the graph mutably. Single-threaded by design.
    pub fn forward(&mut self, inputs: &[ArrayD<f32>]) -> Result<ArrayD<f32>> {
        if inputs.len() != self.inputs().len() {
            return Err(QuantError::InputArity {
                expected: self.inputs().len(),
                got: inputs.len(),
            });
        }
        let out = self.output().ok_or(QuantError::NoOutput)?;
        let mut values: HashMap<NodeId, ArrayD<f32>> = HashMap::new();

        for id in self.order_ids() {
            let (op, args) = {
                let node = self.node(id);
                (node.op.clone(), node.args.clone())
            };
            let value = match op {
                NodeOp::Input { index } => inputs[index].clone(),
                NodeOp::Call(target) => {
                    let operands = gather(&values, &args)?;
                    eval_call(target, &operands)?
                }
                NodeOp::CallModule(name) => {
                    let operands = gather(&values, &args)?;
                    self.module_mut(&name)?.forward(&operands)?
                }
            };
            values.insert(id, value);
        }

        values.remove(&out).ok_or(QuantError::NoOutput)
    }
}

fn gather(values: &HashMap<NodeId, ArrayD<f32>>, args: &[NodeId]) -> Result<Vec<ArrayD<f32>>> {
    args.iter()
        .map(|&a| values.get(&a).cloned().ok_or(QuantError::NodeInUse(a)))
        .collect()
}

fn eval_call(target: OpTarget, operands: &[ArrayD<f32>]) -> Result<ArrayD<f32>> {
    let need = |n: usize| -> Result<()> {
        if operands.len() < n {
            return Err(QuantError::InputArity {
                expected: n,
                got: operands.len(),
            });
        }
        Ok(())
    };
    match target {
        OpTarget::Add => {
            need(1)?;
            let mut acc = operands[0].clone();
            for rhs in &operands[1..] {
                if rhs.raw_dim() != acc.raw_dim() {
                    return Err(QuantError::ShapeMismatch {
                        op: "add",
                        lhs: acc.shape().to_vec(),
                        rhs: rhs.shape().to_vec(),
                    });
                }
                acc += rhs;
            }
            Ok(acc)
        }
        OpTarget::Mul => {
            need(1)?;
            let mut acc = operands[0].clone();
            for rhs in &operands[1..] {
                if rhs.raw_dim() != acc.raw_dim() {
                    return Err(QuantError::ShapeMismatch {
                        op: "mul",
                        lhs: acc.shape().to_vec(),
                        rhs: rhs.shape().to_vec(),
                    });
                }
                acc *= rhs;
            }
            Ok(acc)
        }
        OpTarget::Matmul => {
            need(2)?;
            crate::quant::composite::QuantMatmul::new().forward(&operands[0], &operands[1])
        }
        OpTarget::Relu => {
            need(1)?;
            Ok(operands[0].mapv(|v| v.max(0.0)))
        }
        OpTarget::Concat { dim } => {
            need(1)?;
            let views: Vec<_> = operands.iter().map(ArrayD::view).collect();
            ndarray::concatenate(Axis(dim), &views).map_err(|_| QuantError::ShapeMismatch {
                op: "concat",
                lhs: operands[0].shape().to_vec(),
                rhs: operands
                    .last()
                    .map(|o| o.shape().to_vec())
                    .unwrap_or_default(),
            })
        }
        OpTarget::Stack { dim } => {
            need(1)?;
            let expanded: Vec<ArrayD<f32>> = operands
                .iter()
                .map(|o| o.clone().insert_axis(Axis(dim)))
                .collect();
            let views: Vec<_> = expanded.iter().map(ArrayD::view).collect();
            ndarray::concatenate(Axis(dim), &views).map_err(|_| QuantError::ShapeMismatch {
                op: "stack",
                lhs: operands[0].shape().to_vec(),
                rhs: operands
                    .last()
                    .map(|o| o.shape().to_vec())
                    .unwrap_or_default(),
            })
        }
    }
}
