// Snapshot tests of graph and DOT rendering after optimization.
//
// Snapshots are inline (`insta`); run `cargo insta review` after
// intentional output changes.

mod common;

use vxc::call::BuildContext;
use vxc::config::CompileSettings;
use vxc::diag::Diagnostic;
use vxc::dot::emit_dot;
use vxc::graph::ProgramGraph;
use vxc::rewrite::optimize;

fn optimized_fixture() -> ProgramGraph {
    let registry = common::registry();
    let rules = common::rules(&registry);
    let (mut graph, diags) = common::graph(&registry, "graph.json");
    assert!(diags.is_empty(), "{:?}", diags);

    let settings = CompileSettings::default();
    let mut sink: Vec<Diagnostic> = Vec::new();
    let mut cx = BuildContext::new(&registry, &settings, &mut sink);
    let report = optimize(&mut graph, &mut cx, &rules).unwrap();
    assert_eq!(report.rewrites, 3);
    assert_eq!(report.removed_nodes, 6);
    graph.compute_total_latency();
    graph
}

#[test]
fn loaded_graph_display() {
    let registry = common::registry();
    let (mut graph, _) = common::graph(&registry, "graph.json");
    graph.compute_total_latency();
    insta::assert_snapshot!(graph.to_string().trim_end(), @r"
    ProgramGraph (13 nodes, latency 8)
      n0: input 'x' -> o0 float@1
      n1: input 'y' -> o1 float@1
      n2: neg@1 (o1) -> o2 float@1
      n3: add@1 (o0, o2) -> o3 float@1
      n4: neg@1 (o3) -> o4 float@1
      n5: neg@1 (o4) -> o5 float@1
      n6: delay8@1 (o5) -> o6 float@1 lat=8
      n7: output 'bus' (o6)
      n8: input 'bus' -> o7 float@1
      n9: const 1.0f -> o8 float const
      n10: mul@1 (o7, o8) -> o9 float@1
      n11: meter@1 (o9)
      n12: output 'out' (o9)
    ");
}

#[test]
fn optimized_graph_display() {
    let graph = optimized_fixture();
    insta::assert_snapshot!(graph.to_string().trim_end(), @r"
    ProgramGraph (8 nodes, latency 8)
      n0: input 'x' -> o0 float@1
      n1: input 'y' -> o1 float@1
      n6: delay8@1 (o10) -> o6 float@1 lat=8
      n7: output 'bus' (o6)
      n8: input 'bus' -> o7 float@1
      n11: meter@1 (o7)
      n12: output 'out' (o7)
      n13: sub@1 (o0, o1) -> o10 float@1
    ");
}

#[test]
fn optimized_graph_dot() {
    let graph = optimized_fixture();
    insta::assert_snapshot!(emit_dot(&graph).trim_end(), @r#"
    digraph program {
        rankdir=LR;
        node [fontname="Helvetica", fontsize=10];
        edge [fontname="Helvetica", fontsize=9];

        subgraph cluster_voice {
            label="voice";
            style=rounded;
            color=gray50;
            n0 [label="in x", shape=invhouse];
            n1 [label="in y", shape=invhouse];
            n6 [label="delay8@1 (+8)", shape=box];
            n7 [label="out bus", shape=house];
            n13 [label="sub@1", shape=box];
        }

        subgraph cluster_effect {
            label="effect";
            style=rounded;
            color=gray50;
            n8 [label="in bus", shape=invhouse];
            n12 [label="out out", shape=house];
        }

        n11 [label="meter@1", shape=box, peripheries=2];

        n13 -> n6 [label="float@1", headlabel="0"];
        n6 -> n7 [label="float@1 +8", headlabel="0"];
        n8 -> n11 [label="float@1", headlabel="0"];
        n8 -> n12 [label="float@1", headlabel="0"];
        n0 -> n13 [label="float@1", headlabel="0"];
        n1 -> n13 [label="float@1", headlabel="1"];
    }
    "#);
}
