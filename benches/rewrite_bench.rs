use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use std::path::Path;
use vxc::call::{build_native_module_call, BuildContext};
use vxc::config::CompileSettings;
use vxc::diag::Diagnostic;
use vxc::graph::ProgramGraph;
use vxc::id::{ModuleId, OutputPortId};
use vxc::registry::Registry;
use vxc::rewrite::optimize;
use vxc::rule::RuleSet;
use vxc::types::{PrimitiveType, ProgramDataType};

// Synthetic scenarios over the integration-test fixture modules and rules.

const ADD: ModuleId = ModuleId(1);
const NEG: ModuleId = ModuleId(3);

fn fixture(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn load() -> (Registry, RuleSet) {
    let mut registry = Registry::new();
    registry
        .load_manifest(&fixture("modules.json"))
        .expect("benchmark modules must load");
    let rules = RuleSet::load(&registry, &fixture("rules.json")).expect("benchmark rules must load");
    (registry, rules)
}

fn float() -> ProgramDataType {
    ProgramDataType::variable(PrimitiveType::Float, 1)
}

fn call(graph: &mut ProgramGraph, cx: &mut BuildContext<'_>, module: ModuleId, args: &[OutputPortId]) -> OutputPortId {
    let node = build_native_module_call(graph, cx, module, 1, args, None).expect("benchmark call must build");
    graph.output_port(node, 0)
}

/// x → neg × length → out. Collapses to length % 2 negations.
fn neg_chain(registry: &Registry, length: usize) -> ProgramGraph {
    let settings = CompileSettings::default();
    let mut diags: Vec<Diagnostic> = Vec::new();
    let mut cx = BuildContext::new(registry, &settings, &mut diags);
    let mut graph = ProgramGraph::new();
    let x = graph.add_graph_input("x", float(), None);
    let mut port = graph.output_port(x, 0);
    for _ in 0..length {
        port = call(&mut graph, &mut cx, NEG, &[port]);
    }
    let out = graph.add_graph_output("out", float(), port, None).expect("output type");
    graph.surface.outputs.push(out);
    graph
}

/// acc = add(acc, neg(x_k)) repeated; every add becomes a sub.
fn add_neg_ladder(registry: &Registry, rungs: usize) -> ProgramGraph {
    let settings = CompileSettings::default();
    let mut diags: Vec<Diagnostic> = Vec::new();
    let mut cx = BuildContext::new(registry, &settings, &mut diags);
    let mut graph = ProgramGraph::new();
    let x = graph.add_graph_input("x", float(), None);
    let x = graph.output_port(x, 0);
    let mut acc = x;
    for _ in 0..rungs {
        let n = call(&mut graph, &mut cx, NEG, &[x]);
        acc = call(&mut graph, &mut cx, ADD, &[acc, n]);
    }
    let out = graph.add_graph_output("out", float(), acc, None).expect("output type");
    graph.surface.outputs.push(out);
    graph
}

fn bench_rewrite_scaling(c: &mut Criterion) {
    let (registry, rules) = load();
    let settings = CompileSettings::default();

    let mut group = c.benchmark_group("rewrite/neg_chain");
    for length in [64usize, 256, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(length), &length, |b, &length| {
            b.iter_batched(
                || neg_chain(&registry, length),
                |mut graph| {
                    let mut diags: Vec<Diagnostic> = Vec::new();
                    let mut cx = BuildContext::new(&registry, &settings, &mut diags);
                    let report = optimize(&mut graph, &mut cx, black_box(&rules)).expect("fixpoint");
                    black_box(report);
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();

    let mut group = c.benchmark_group("rewrite/add_neg_ladder");
    for rungs in [32usize, 128, 512] {
        group.bench_with_input(BenchmarkId::from_parameter(rungs), &rungs, |b, &rungs| {
            b.iter_batched(
                || add_neg_ladder(&registry, rungs),
                |mut graph| {
                    let mut diags: Vec<Diagnostic> = Vec::new();
                    let mut cx = BuildContext::new(&registry, &settings, &mut diags);
                    let report = optimize(&mut graph, &mut cx, black_box(&rules)).expect("fixpoint");
                    black_box(report);
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_fixpoint_sweep(c: &mut Criterion) {
    let (registry, rules) = load();
    let settings = CompileSettings::default();

    // Already optimized: measures one matching sweep with no rewrites.
    let mut graph = add_neg_ladder(&registry, 512);
    {
        let mut diags: Vec<Diagnostic> = Vec::new();
        let mut cx = BuildContext::new(&registry, &settings, &mut diags);
        optimize(&mut graph, &mut cx, &rules).expect("fixpoint");
    }

    let mut group = c.benchmark_group("rewrite/fixpoint_sweep");
    group.bench_function("ladder_512", |b| {
        b.iter_batched(
            || graph.clone(),
            |mut graph| {
                let mut diags: Vec<Diagnostic> = Vec::new();
                let mut cx = BuildContext::new(&registry, &settings, &mut diags);
                let report = optimize(&mut graph, &mut cx, &rules).expect("fixpoint");
                assert_eq!(report.rewrites, 0);
                black_box(report);
            },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_rewrite_scaling, bench_fixpoint_sweep);
criterion_main!(benches);
