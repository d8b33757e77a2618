//! End-to-end integerization: a fake-quantized model and its integer
//! counterpart must agree to within one output quantization step.

use approx::assert_abs_diff_eq;
use cuantizar::prelude::*;
use ndarray::{arr2, ArrayD};

fn tensor(values: &[f32], shape: &[usize]) -> ArrayD<f32> {
    ArrayD::from_shape_vec(shape.to_vec(), values.to_vec()).unwrap()
}

/// input -> quantized linear -> quantized relu activation
fn build_linear_act_graph() -> Graph {
    let mut g = Graph::new();
    let x = g.add_input();

    let linear = Linear::new(arr2(&[[0.5, 0.0], [0.0, 0.5]]), None);
    let lin = QuantLinearOp::from_linear(linear, WeightQuantConfig::default()).unwrap();
    g.add_module("lin", GraphModule::LinOp(lin)).unwrap();

    let act = QuantAct::new(ActConfig::unsigned(256)).unwrap();
    g.add_module("act", GraphModule::Act(act)).unwrap();

    let l = g.add_call_module("lin", vec![x]).unwrap();
    let a = g.add_call_module("act", vec![l]).unwrap();
    g.set_output(a);
    g
}

#[test]
fn fake_and_integer_graphs_agree_on_linear_act() {
    let mut g = build_linear_act_graph();

    // warm-up: the activation collects statistics, the linear operator
    // still runs in plain float
    let warmup = tensor(&[2.0, 1.0, 0.5, 2.0], &[2, 2]);
    g.forward(&[warmup]).unwrap();

    // the external controller starts both modules
    let GraphModule::LinOp(lin) = g.module_mut("lin").unwrap() else {
        unreachable!()
    };
    lin.start();
    let GraphModule::Act(act) = g.module_mut("act").unwrap() else {
        unreachable!()
    };
    act.start();
    let eps_out = act.eps();

    // fake-quantized reference
    let eps_in = 1.0 / 128.0;
    let x = tensor(&[0.25, 0.5, 1.0, 0.0625], &[2, 2]);
    let mut fake = g.clone();
    let y_fake = fake.forward(&[x.clone()]).unwrap();

    // integerize
    let mut meta = MetaTable::new();
    let pipeline = Pipeline::new(vec![
        Box::new(AnnotatePass::new(vec![vec![2, 2]], vec![eps_in])),
        Box::new(IntegerizePass::new(Convention::ScaleFirst)),
        Box::new(RequantMergePass),
    ])
    .unwrap();
    pipeline.run(&mut g, &mut meta).unwrap();

    // the activation is now a requant operator
    assert_eq!(g.module("act").unwrap().kind(), ModuleKind::Requant);
    let GraphModule::LinOp(lin) = g.module("lin").unwrap() else {
        unreachable!()
    };
    assert!(lin.integerized());

    // run on integers and rescale
    let q_in = x.mapv(|v| (v / eps_in).round());
    let q_out = g.forward(&[q_in]).unwrap();
    for (f, q) in y_fake.iter().zip(q_out.iter()) {
        assert_abs_diff_eq!(*f, q * eps_out, epsilon = eps_out * 1.01);
    }
}

#[test]
fn residual_add_integerizes_consistently() {
    // x -> act1 ->(+) -> out, with the raw input on the second branch,
    // using a fused quantized adder
    let mut g = Graph::new();
    let x = g.add_input();

    let mut act1 = QuantAct::new(ActConfig::unsigned(256)).unwrap();
    act1.start_from_bounds(0.0, 255.0);
    g.add_module("act1", GraphModule::Act(act1)).unwrap();

    let mut add = QuantAdd::new(2, ActConfig::unsigned(256), false).unwrap();
    add.acts_mut()[0].start_from_bounds(0.0, 255.0);
    add.acts_mut()[1].start_from_bounds(0.0, 255.0);
    add.act_out_mut().start_from_bounds(0.0, 255.0);
    add.reassign_epsilons();
    g.add_module("res_add", GraphModule::Add(add)).unwrap();

    let a1 = g.add_call_module("act1", vec![x]).unwrap();
    let sum = g.add_call_module("res_add", vec![a1, x]).unwrap();
    g.set_output(sum);

    let input = tensor(&[3.0, 40.0, 120.0, 200.0], &[4]);
    let mut fake = g.clone();
    let y_fake = fake.forward(&[input.clone()]).unwrap();

    let mut meta = MetaTable::new();
    let pipeline = Pipeline::new(vec![
        Box::new(AnnotatePass::new(vec![vec![4]], vec![1.0])),
        Box::new(IntegerizePass::new(Convention::ScaleFirst)),
        Box::new(RequantMergePass),
    ])
    .unwrap();
    pipeline.run(&mut g, &mut meta).unwrap();

    // unit epsilons end to end: the integer graph reproduces the fake
    // graph exactly
    let y_int = g.forward(&[input]).unwrap();
    for (f, i) in y_fake.iter().zip(y_int.iter()) {
        assert_abs_diff_eq!(*f, *i);
    }
}

#[test]
fn harmonize_then_integerize_pipeline() {
    // raw float graph with a bare add; harmonization fuses it, the
    // controller starts every quantizer, integerization converts it
    let mut g = Graph::new();
    let a = g.add_input();
    let b = g.add_input();
    let sum = g.add_call(OpTarget::Add, vec![a, b]);
    g.set_output(sum);

    let mut cfg = ActConfig::unsigned(256);
    cfg.learn_clip = false;
    HarmonizePass::new(cfg, false)
        .unwrap()
        .run(&mut g, &mut MetaTable::new())
        .unwrap();

    // warm-up through the fused adder, then start all its quantizers
    g.forward(&[tensor(&[100.0, 30.0], &[2]), tensor(&[20.0, 50.0], &[2])])
        .unwrap();
    let fused: Vec<String> = g.module_names().map(str::to_string).collect();
    for name in &fused {
        if let GraphModule::Add(add) = g.module_mut(name).unwrap() {
            add.start_all();
            add.reassign_epsilons();
        }
    }

    let mut meta = MetaTable::new();
    Pipeline::new(vec![
        Box::new(AnnotatePass::new(vec![vec![2], vec![2]], vec![0.5, 0.5])),
        Box::new(IntegerizePass::new(Convention::ScaleFirst)),
    ])
    .unwrap()
    .run(&mut g, &mut meta)
    .unwrap();

    // only integer-arithmetic nodes remain: requants and a plain add
    for name in g.module_names() {
        assert_eq!(g.module(name).unwrap().kind(), ModuleKind::Requant);
    }
    let y = g.forward(&[tensor(&[100.0, 30.0], &[2]), tensor(&[20.0, 50.0], &[2])]);
    assert!(y.is_ok());
}
