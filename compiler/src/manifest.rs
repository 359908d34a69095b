// manifest.rs — Declarative graph description
//
// Loads a lowered program graph from JSON and replays it through the same
// construction API the builder uses, so every node is validated exactly as
// if it had been lowered from source.
//
// Port references are `"name"` (first output) or `"name.N"` (N-th output).
// Nodes are listed in dependency order; a boundary entry closes a voice
// channel and opens the matching effect-side input under the same name.
//
// Preconditions: referenced modules are registered.
// Postconditions: the returned graph satisfies the port invariants and
//                 its surface lists every declared input, output and
//                 boundary channel in declaration order.
// Failure modes: malformed JSON, unknown or duplicate names, argument
//                count mismatches → `ManifestError`; construction
//                failures → `ManifestError::Build`.
// Side effects: prepare hooks run once per call entry.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::call::{build_native_module_call, BuildContext};
use crate::diag::{codes, Diagnostic, SourceLocation};
use crate::error::BuildError;
use crate::graph::ProgramGraph;
use crate::id::{NodeId, OutputPortId};
use crate::types::{ConstantValue, DataTypeError, PrimitiveType, ProgramDataType};

// ── Format ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphManifest {
    #[serde(default)]
    pub inputs: Vec<ChannelEntry>,
    #[serde(default)]
    pub nodes: Vec<NodeEntry>,
    #[serde(default)]
    pub outputs: Vec<SinkEntry>,
    #[serde(default)]
    pub voice_active: Option<String>,
    #[serde(default)]
    pub effect_active: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeEntry {
    pub primitive: PrimitiveType,
    #[serde(default = "default_factor")]
    pub upsample_factor: u32,
    #[serde(default)]
    pub is_array: bool,
}

fn default_factor() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: TypeEntry,
    #[serde(default)]
    pub location: Option<SourceLocation>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SinkEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: TypeEntry,
    pub source: String,
    #[serde(default)]
    pub location: Option<SourceLocation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldEntry {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeEntry {
    Constant {
        name: String,
        value: ConstantValue,
        #[serde(default)]
        location: Option<SourceLocation>,
    },
    Array {
        name: String,
        element_type: PrimitiveType,
        elements: Vec<String>,
        #[serde(default)]
        location: Option<SourceLocation>,
    },
    Struct {
        name: String,
        fields: Vec<FieldEntry>,
        #[serde(default)]
        location: Option<SourceLocation>,
    },
    Call {
        name: String,
        module: String,
        #[serde(default = "default_factor")]
        upsample_factor: u32,
        arguments: Vec<String>,
        #[serde(default)]
        location: Option<SourceLocation>,
    },
    /// Voice-to-effect channel.
    Boundary {
        name: String,
        #[serde(rename = "type")]
        data_type: TypeEntry,
        source: String,
        #[serde(default)]
        location: Option<SourceLocation>,
    },
}

impl NodeEntry {
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            NodeEntry::Constant { location, .. }
            | NodeEntry::Array { location, .. }
            | NodeEntry::Struct { location, .. }
            | NodeEntry::Call { location, .. }
            | NodeEntry::Boundary { location, .. } => location.as_ref(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            NodeEntry::Constant { name, .. }
            | NodeEntry::Array { name, .. }
            | NodeEntry::Struct { name, .. }
            | NodeEntry::Call { name, .. }
            | NodeEntry::Boundary { name, .. } => name,
        }
    }
}

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("{origin}: {source}")]
    Parse {
        origin: String,
        source: serde_json::Error,
    },
    #[error("duplicate name '{name}'")]
    DuplicateName { name: String },
    #[error("'{node}': unknown reference '{reference}'")]
    UnknownReference { node: String, reference: String },
    #[error("'{node}': '{reference}' names output {slot} but the node has {count}")]
    NoSuchOutput {
        node: String,
        reference: String,
        slot: usize,
        count: usize,
    },
    #[error("'{node}': unknown module '{module}'")]
    UnknownModule { node: String, module: String },
    #[error("'{node}': '{module}' takes {expected} argument(s), {found} given")]
    ArgumentCount {
        node: String,
        module: String,
        expected: usize,
        found: usize,
    },
    #[error("'{name}': {source}")]
    InvalidType { name: String, source: DataTypeError },
    #[error("'{node}': {source}")]
    Build {
        node: String,
        location: Option<SourceLocation>,
        source: BuildError,
    },
}

impl ManifestError {
    /// The construction error behind this failure, if any.
    pub fn build_error(&self) -> Option<&BuildError> {
        match self {
            ManifestError::Build { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Construction failures keep their own diagnostic code; everything
    /// else is reported as a rejected description.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            ManifestError::Build { location, source, .. } => {
                let mut d = source.to_diagnostic(location.clone());
                d.message = self.to_string();
                d
            }
            _ => Diagnostic::error(None, self.to_string()).with_code(codes::E0201),
        }
    }
}

// ── Loading ─────────────────────────────────────────────────────────────────

impl GraphManifest {
    pub fn from_json(text: &str, origin: &str) -> Result<Self, ManifestError> {
        serde_json::from_str(text).map_err(|e| ManifestError::Parse {
            origin: origin.to_string(),
            source: e,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|e| ManifestError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json(&text, &path.display().to_string())
    }

    /// Replay the description through the construction API.
    pub fn build(&self, cx: &mut BuildContext<'_>) -> Result<ProgramGraph, ManifestError> {
        let mut loader = Loader {
            graph: ProgramGraph::new(),
            names: HashMap::new(),
        };

        for input in &self.inputs {
            let dt = signal_type(&input.name, &input.data_type)?;
            let node = loader.graph.add_graph_input(&input.name, dt, input.location.clone());
            loader.bind(&input.name, node)?;
            loader.graph.surface.inputs.push(node);
        }

        for entry in &self.nodes {
            loader.node(entry, cx)?;
        }

        for output in &self.outputs {
            let node = loader.sink(&output.name, &output.data_type, &output.source, output.location.clone())?;
            loader.graph.surface.outputs.push(node);
        }
        let active = TypeEntry {
            primitive: PrimitiveType::Bool,
            upsample_factor: 1,
            is_array: false,
        };
        if let Some(source) = &self.voice_active {
            let node = loader.sink("voice_active", &active, source, None)?;
            loader.graph.surface.voice_active = Some(node);
        }
        if let Some(source) = &self.effect_active {
            let node = loader.sink("effect_active", &active, source, None)?;
            loader.graph.surface.effect_active = Some(node);
        }

        let graph = loader.graph;
        tracing::debug!(
            nodes = graph.node_count(),
            inputs = graph.surface.inputs.len(),
            outputs = graph.surface.outputs.len(),
            "loaded graph manifest"
        );
        Ok(graph)
    }
}

fn signal_type(name: &str, entry: &TypeEntry) -> Result<ProgramDataType, ManifestError> {
    ProgramDataType::new(Some(entry.primitive), Some(entry.upsample_factor), entry.is_array).map_err(|e| {
        ManifestError::InvalidType {
            name: name.to_string(),
            source: e,
        }
    })
}

struct Loader {
    graph: ProgramGraph,
    names: HashMap<String, NodeId>,
}

impl Loader {
    fn bind(&mut self, name: &str, node: NodeId) -> Result<(), ManifestError> {
        if self.names.insert(name.to_string(), node).is_some() {
            return Err(ManifestError::DuplicateName {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn port(&self, node: &str, reference: &str) -> Result<OutputPortId, ManifestError> {
        let (base, slot) = match reference.rsplit_once('.') {
            Some((base, n)) if self.names.contains_key(base) => match n.parse::<usize>() {
                Ok(slot) => (base, slot),
                Err(_) => (reference, 0),
            },
            _ => (reference, 0),
        };
        let id = *self.names.get(base).ok_or_else(|| ManifestError::UnknownReference {
            node: node.to_string(),
            reference: reference.to_string(),
        })?;
        let outputs = self.graph.node(id).outputs();
        outputs.get(slot).copied().ok_or_else(|| ManifestError::NoSuchOutput {
            node: node.to_string(),
            reference: reference.to_string(),
            slot,
            count: outputs.len(),
        })
    }

    fn ports(&self, node: &str, references: &[String]) -> Result<Vec<OutputPortId>, ManifestError> {
        references.iter().map(|r| self.port(node, r)).collect()
    }

    fn sink(
        &mut self,
        name: &str,
        data_type: &TypeEntry,
        source: &str,
        location: Option<SourceLocation>,
    ) -> Result<NodeId, ManifestError> {
        let dt = signal_type(name, data_type)?;
        let source = self.port(name, source)?;
        self.graph
            .add_graph_output(name, dt, source, location.clone())
            .map_err(|e| ManifestError::Build {
                node: name.to_string(),
                location,
                source: e,
            })
    }

    fn node(&mut self, entry: &NodeEntry, cx: &mut BuildContext<'_>) -> Result<(), ManifestError> {
        let name = entry.name();
        let built = |source: BuildError| ManifestError::Build {
            node: name.to_string(),
            location: entry.location().cloned(),
            source,
        };
        let node = match entry {
            NodeEntry::Constant { value, location, .. } => self.graph.add_constant(value.clone(), location.clone()),
            NodeEntry::Array {
                element_type,
                elements,
                location,
                ..
            } => {
                let ports = self.ports(name, elements)?;
                self.graph
                    .add_array(*element_type, &ports, location.clone())
                    .map_err(built)?
            }
            NodeEntry::Struct { fields, location, .. } => {
                let fields = fields
                    .iter()
                    .map(|f| Ok((f.name.clone(), self.port(name, &f.value)?)))
                    .collect::<Result<Vec<_>, ManifestError>>()?;
                self.graph.add_struct(&fields, location.clone()).map_err(built)?
            }
            NodeEntry::Call {
                module,
                upsample_factor,
                arguments,
                location,
                ..
            } => {
                let signature = cx
                    .registry
                    .lookup_name(module)
                    .ok_or_else(|| ManifestError::UnknownModule {
                        node: name.to_string(),
                        module: module.clone(),
                    })?;
                if signature.in_count() != arguments.len() {
                    return Err(ManifestError::ArgumentCount {
                        node: name.to_string(),
                        module: module.clone(),
                        expected: signature.in_count(),
                        found: arguments.len(),
                    });
                }
                if *upsample_factor == 0 {
                    return Err(ManifestError::InvalidType {
                        name: name.to_string(),
                        source: DataTypeError::ZeroUpsampleFactor,
                    });
                }
                let id = signature.id;
                let ports = self.ports(name, arguments)?;
                build_native_module_call(&mut self.graph, cx, id, *upsample_factor, &ports, location.clone())
                    .map_err(built)?
            }
            NodeEntry::Boundary {
                data_type,
                source,
                location,
                ..
            } => {
                let sink = self.sink(name, data_type, source, location.clone())?;
                self.graph.surface.voice_to_effect_outputs.push(sink);
                let dt = signal_type(name, data_type)?;
                let input = self.graph.add_graph_input(name, dt, location.clone());
                self.graph.surface.voice_to_effect_inputs.push(input);
                input
            }
        };
        self.bind(name, node)
    }
}

/// Read, parse and build a graph manifest file.
pub fn load_graph(path: &Path, cx: &mut BuildContext<'_>) -> Result<ProgramGraph, ManifestError> {
    GraphManifest::load(path)?.build(cx)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompileSettings;
    use crate::diag::DiagnosticSink;
    use crate::fixtures::*;
    use crate::graph::NodeKind;

    fn build(text: &str) -> Result<ProgramGraph, ManifestError> {
        let registry = standard_registry();
        let settings = CompileSettings::default();
        let mut sink = DiagnosticSink::new();
        let mut cx = BuildContext::new(&registry, &settings, &mut sink);
        GraphManifest::from_json(text, "test.json")?.build(&mut cx)
    }

    const VOICE_AND_EFFECT: &str = r#"{
        "inputs": [{"name": "in", "type": {"primitive": "float"}}],
        "nodes": [
            {"kind": "call", "name": "d", "module": "delay8", "arguments": ["in"]},
            {"kind": "boundary", "name": "bus", "type": {"primitive": "float"}, "source": "d"},
            {"kind": "constant", "name": "gain", "value": {"float": 0.5}},
            {"kind": "call", "name": "amp", "module": "mul", "arguments": ["bus", "gain"]},
            {"kind": "call", "name": "wet", "module": "delay9", "arguments": ["amp"],
             "location": {"file": "fx.vx", "line": 3, "column": 5}}
        ],
        "outputs": [{"name": "out", "type": {"primitive": "float"}, "source": "wet"}]
    }"#;

    #[test]
    fn builds_voice_and_effect_graphs() {
        let mut g = build(VOICE_AND_EFFECT).unwrap();
        assert!(g.verify().is_empty());
        assert_eq!(g.surface.inputs.len(), 1);
        assert_eq!(g.surface.voice_to_effect_outputs.len(), 1);
        assert_eq!(g.surface.voice_to_effect_inputs.len(), 1);
        assert_eq!(g.compute_total_latency(), 17);

        let voice = g.voice_nodes();
        let effect = g.effect_nodes();
        assert_eq!(voice.len(), 3, "input, delay, boundary sink");
        assert_eq!(effect.len(), 5, "boundary source, gain, amp, wet, out");
        assert!(voice.is_disjoint(&effect));
    }

    #[test]
    fn call_locations_are_kept() {
        let g = build(VOICE_AND_EFFECT).unwrap();
        let wet = g
            .nodes()
            .find(|n| matches!(n.kind(), NodeKind::NativeModuleCall { signature, .. } if signature.name == "delay9"))
            .unwrap();
        assert_eq!(wet.location(), Some(&SourceLocation::new("fx.vx", 3, 5)));
    }

    #[test]
    fn indexed_references_select_outputs() {
        let g = build(
            r#"{
                "inputs": [{"name": "x", "type": {"primitive": "float"}}],
                "nodes": [{"kind": "call", "name": "s", "module": "split", "arguments": ["x"]}],
                "outputs": [
                    {"name": "lo", "type": {"primitive": "float"}, "source": "s"},
                    {"name": "hi", "type": {"primitive": "float"}, "source": "s.1"}
                ]
            }"#,
        )
        .unwrap();
        let hi = g.surface.outputs[1];
        let src = g.source_of(g.node(hi).inputs()[0]).unwrap();
        assert_eq!(g.node(g.output(src).node()).outputs()[1], src);
    }

    #[test]
    fn reference_errors() {
        let err = build(
            r#"{"inputs": [{"name": "x", "type": {"primitive": "float"}}],
                "outputs": [{"name": "o", "type": {"primitive": "float"}, "source": "y"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::UnknownReference { ref reference, .. } if reference == "y"));

        let err = build(
            r#"{"inputs": [{"name": "x", "type": {"primitive": "float"}}],
                "outputs": [{"name": "o", "type": {"primitive": "float"}, "source": "x.1"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::NoSuchOutput { slot: 1, count: 1, .. }));

        let err = build(
            r#"{"inputs": [{"name": "x", "type": {"primitive": "float"}},
                           {"name": "x", "type": {"primitive": "float"}}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::DuplicateName { .. }));
    }

    #[test]
    fn call_errors() {
        let err = build(
            r#"{"inputs": [{"name": "x", "type": {"primitive": "float"}}],
                "nodes": [{"kind": "call", "name": "c", "module": "nope", "arguments": ["x"]}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::UnknownModule { .. }));

        let err = build(
            r#"{"inputs": [{"name": "x", "type": {"primitive": "float"}}],
                "nodes": [{"kind": "call", "name": "c", "module": "add", "arguments": ["x"]}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::ArgumentCount { expected: 2, found: 1, .. }));

        let err = build(
            r#"{"inputs": [{"name": "x", "type": {"primitive": "float", "upsample_factor": 2}}],
                "nodes": [{"kind": "call", "name": "c", "module": "neg", "arguments": ["x"]}]}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err.build_error(),
            Some(BuildError::UpsampleFactorMismatch { expected: 1, found: 2, .. })
        ));
    }

    #[test]
    fn errors_become_coded_diagnostics() {
        let err = build(
            r#"{"inputs": [{"name": "x", "type": {"primitive": "float", "upsample_factor": 2}}],
                "nodes": [{"kind": "call", "name": "c", "module": "neg", "arguments": ["x"],
                           "location": {"file": "v.vx", "line": 7, "column": 1}}]}"#,
        )
        .unwrap_err();
        let d = err.to_diagnostic();
        assert_eq!(d.code, Some(codes::E0302));
        assert_eq!(d.location, Some(SourceLocation::new("v.vx", 7, 1)));
        assert!(d.message.starts_with("'c': "), "{}", d.message);

        let err = build(r#"{"outputs": [{"name": "o", "type": {"primitive": "float"}, "source": "nope"}]}"#)
            .unwrap_err();
        assert_eq!(err.to_diagnostic().code, Some(codes::E0201));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            build(r#"{"inputs": [], "extra": 1}"#),
            Err(ManifestError::Parse { .. })
        ));
    }
}
