// dot.rs — Graphviz DOT output for program graphs
//
// Renders a ProgramGraph in DOT format, with the voice and effect halves
// as separate clusters and one edge per connected input port.
//
// Preconditions: `graph` passes `ProgramGraph::verify`.
// Postconditions: returns a valid DOT string; node and edge order follow
//                 node ids, so output is deterministic.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::collections::BTreeSet;
use std::fmt::{self, Write};

use crate::graph::{NodeKind, ProcessorNode, ProgramGraph};
use crate::id::NodeId;

/// Emit the program graph as a Graphviz DOT string.
pub fn emit_dot(graph: &ProgramGraph) -> String {
    let mut buf = String::new();
    // Writing into a String cannot fail.
    let _ = write_graph(&mut buf, graph);
    buf
}

fn write_graph(buf: &mut String, graph: &ProgramGraph) -> fmt::Result {
    writeln!(buf, "digraph program {{")?;
    writeln!(buf, "    rankdir=LR;")?;
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];")?;
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];")?;

    let voice = graph.voice_nodes();
    let effect: BTreeSet<NodeId> = graph.effect_nodes().difference(&voice).copied().collect();
    let loose: Vec<&ProcessorNode> = graph
        .nodes()
        .filter(|n| !voice.contains(&n.id()) && !effect.contains(&n.id()))
        .collect();

    write_cluster(buf, graph, "voice", &voice)?;
    write_cluster(buf, graph, "effect", &effect)?;
    if !loose.is_empty() {
        writeln!(buf)?;
        for node in loose {
            writeln!(buf, "    {}", node_decl(node))?;
        }
    }

    writeln!(buf)?;
    for node in graph.nodes() {
        for (slot, input) in node.inputs().iter().enumerate() {
            let Some(source) = graph.source_of(*input) else {
                continue;
            };
            let port = graph.output(source);
            let style = if port.data_type().is_constant() {
                ", style=dashed"
            } else {
                ""
            };
            let latency = if port.latency() > 0 {
                format!(" +{}", port.latency())
            } else {
                String::new()
            };
            writeln!(
                buf,
                "    {} -> {} [label=\"{}{}\", headlabel=\"{}\"{}];",
                dot_node_id(port.node()),
                dot_node_id(node.id()),
                port.data_type(),
                latency,
                slot,
                style
            )?;
        }
    }

    writeln!(buf, "}}")
}

fn write_cluster(buf: &mut String, graph: &ProgramGraph, name: &str, members: &BTreeSet<NodeId>) -> fmt::Result {
    if members.is_empty() {
        return Ok(());
    }
    writeln!(buf)?;
    writeln!(buf, "    subgraph cluster_{name} {{")?;
    writeln!(buf, "        label=\"{name}\";")?;
    writeln!(buf, "        style=rounded;")?;
    writeln!(buf, "        color=gray50;")?;
    for id in members {
        writeln!(buf, "        {}", node_decl(graph.node(*id)))?;
    }
    writeln!(buf, "    }}")
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn dot_node_id(node: NodeId) -> String {
    format!("n{}", node.0)
}

/// Escape a label for use inside a double-quoted DOT string.
fn escape(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

fn node_label(kind: &NodeKind) -> String {
    match kind {
        NodeKind::GraphInput { name, .. } => format!("in {name}"),
        NodeKind::GraphOutput { name, .. } => format!("out {name}"),
        NodeKind::Constant { value } => match value {
            crate::types::ConstantValue::Float(v) => format!("{v:?}"),
            crate::types::ConstantValue::Double(v) => format!("{v:?}d"),
            crate::types::ConstantValue::Int(v) => v.to_string(),
            crate::types::ConstantValue::Bool(v) => v.to_string(),
            crate::types::ConstantValue::String(v) => format!("{v:?}"),
        },
        NodeKind::Array { element_type } => format!("{element_type}[]"),
        NodeKind::Struct { fields } => format!("{{{}}}", fields.join(", ")),
        NodeKind::NativeModuleCall {
            signature,
            upsample_factor,
            latency,
        } => {
            if *latency > 0 {
                format!("{}@{} (+{})", signature.name, upsample_factor, latency)
            } else {
                format!("{}@{}", signature.name, upsample_factor)
            }
        }
    }
}

fn node_attrs(kind: &NodeKind) -> &'static str {
    match kind {
        NodeKind::GraphInput { .. } => "shape=invhouse",
        NodeKind::GraphOutput { .. } => "shape=house",
        NodeKind::Constant { .. } => "shape=plaintext",
        NodeKind::Array { .. } | NodeKind::Struct { .. } => "shape=record",
        NodeKind::NativeModuleCall { signature, .. } if signature.side_effects => "shape=box, peripheries=2",
        NodeKind::NativeModuleCall { .. } => "shape=box",
    }
}

fn node_decl(node: &ProcessorNode) -> String {
    format!(
        "{} [label=\"{}\", {}];",
        dot_node_id(node.id()),
        escape(&node_label(node.kind())),
        node_attrs(node.kind())
    )
}

// ── Tests ───────────────────────────────────────────────────────────────────
