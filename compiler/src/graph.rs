// graph.rs — Program graph: processor nodes, ports, and connectivity
//
// The program graph is an arena of processor nodes and their ports,
// addressed by stable integer ids. Each node exclusively owns its ports.
// An output port keeps the set of input ports it feeds; an input port
// refers to at most one output port. The two directions are kept in sync
// by `set_connection`, the only place that links or unlinks ports.
//
// Preconditions: nodes are created in dependency order (sources first).
// Postconditions: for every output `o` and input `i`,
//                 `i.connection == Some(o)` iff `o.connections` contains `i`.
// Failure modes: inconsistent element/field/output types → `BuildError`;
//                linkage invariant violations → panic (upstream bug).
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use crate::diag::SourceLocation;
use crate::error::BuildError;
use crate::id::{IdAllocator, InputPortId, NodeId, OutputPortId};
use crate::registry::{MarshaledValue, NativeModuleSignature};
use crate::types::{ConstantValue, PrimitiveType, ProgramDataType};

// ── Ports ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OutputPort {
    id: OutputPortId,
    node: NodeId,
    data_type: ProgramDataType,
    /// In samples, measured in this port's own upsample-factor domain.
    latency: u32,
    connections: BTreeSet<InputPortId>,
}

impl OutputPort {
    pub fn id(&self) -> OutputPortId {
        self.id
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn data_type(&self) -> ProgramDataType {
        self.data_type
    }

    pub fn latency(&self) -> u32 {
        self.latency
    }

    pub fn connections(&self) -> &BTreeSet<InputPortId> {
        &self.connections
    }

    fn add_connection(&mut self, input: InputPortId) {
        assert!(
            self.connections.insert(input),
            "{} is already connected to {}",
            input,
            self.id
        );
    }

    fn remove_connection(&mut self, input: InputPortId) {
        assert!(
            self.connections.remove(&input),
            "{} is not connected to {}",
            input,
            self.id
        );
    }
}

#[derive(Debug, Clone)]
pub struct InputPort {
    id: InputPortId,
    node: NodeId,
    connection: Option<OutputPortId>,
}

impl InputPort {
    pub fn id(&self) -> InputPortId {
        self.id
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn connection(&self) -> Option<OutputPortId> {
        self.connection
    }
}

// ── Nodes ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Entry point of a graph: program input channels or the effect side
    /// of a voice-to-effect boundary.
    GraphInput {
        name: String,
        data_type: ProgramDataType,
    },
    /// Sink of a graph.
    GraphOutput {
        name: String,
        data_type: ProgramDataType,
    },
    Constant {
        value: ConstantValue,
    },
    Array {
        element_type: PrimitiveType,
    },
    Struct {
        fields: Vec<String>,
    },
    NativeModuleCall {
        signature: Rc<NativeModuleSignature>,
        upsample_factor: u32,
        /// Common input latency plus the module's own contribution, in the
        /// call's upsample-factor domain.
        latency: u32,
    },
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::GraphInput { .. } => "input",
            NodeKind::GraphOutput { .. } => "output",
            NodeKind::Constant { .. } => "const",
            NodeKind::Array { .. } => "array",
            NodeKind::Struct { .. } => "struct",
            NodeKind::NativeModuleCall { .. } => "call",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessorNode {
    id: NodeId,
    kind: NodeKind,
    inputs: Vec<InputPortId>,
    outputs: Vec<OutputPortId>,
    location: Option<SourceLocation>,
}

impl ProcessorNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn inputs(&self) -> &[InputPortId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputPortId] {
        &self.outputs
    }

    pub fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }
}

// ── Graph surface ───────────────────────────────────────────────────────────

/// The externally visible shape of a compiled program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphSurface {
    /// Program input channels, in order.
    pub inputs: Vec<NodeId>,
    /// Program output channels, in order.
    pub outputs: Vec<NodeId>,
    pub voice_active: Option<NodeId>,
    pub effect_active: Option<NodeId>,
    /// Sinks of the voice graph feeding the effect graph.
    pub voice_to_effect_outputs: Vec<NodeId>,
    /// Sources of the effect graph fed by the voice graph.
    pub voice_to_effect_inputs: Vec<NodeId>,
    /// Aggregate latency in base-rate samples.
    pub latency: u32,
}

impl GraphSurface {
    pub fn voice_sinks(&self) -> Vec<NodeId> {
        let mut sinks = self.voice_to_effect_outputs.clone();
        sinks.extend(self.voice_active);
        sinks
    }

    pub fn effect_sinks(&self) -> Vec<NodeId> {
        let mut sinks = self.outputs.clone();
        sinks.extend(self.effect_active);
        sinks
    }

    /// Every node the surface refers to.
    pub fn pinned(&self) -> BTreeSet<NodeId> {
        self.inputs
            .iter()
            .chain(&self.outputs)
            .chain(&self.voice_to_effect_outputs)
            .chain(&self.voice_to_effect_inputs)
            .chain(self.voice_active.iter())
            .chain(self.effect_active.iter())
            .copied()
            .collect()
    }
}

// ── Program graph ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ProgramGraph {
    ids: IdAllocator,
    nodes: Vec<Option<ProcessorNode>>,
    input_ports: Vec<Option<InputPort>>,
    output_ports: Vec<Option<OutputPort>>,
    pub surface: GraphSurface,
}

impl ProgramGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn node(&self, id: NodeId) -> &ProcessorNode {
        self.try_node(id)
            .unwrap_or_else(|| panic!("{} is not a live node", id))
    }

    pub fn try_node(&self, id: NodeId) -> Option<&ProcessorNode> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.try_node(id).is_some()
    }

    pub fn output(&self, id: OutputPortId) -> &OutputPort {
        self.output_ports
            .get(id.index())
            .and_then(Option::as_ref)
            .unwrap_or_else(|| panic!("{} is not a live output port", id))
    }

    pub fn input(&self, id: InputPortId) -> &InputPort {
        self.input_ports
            .get(id.index())
            .and_then(Option::as_ref)
            .unwrap_or_else(|| panic!("{} is not a live input port", id))
    }

    fn output_mut(&mut self, id: OutputPortId) -> &mut OutputPort {
        self.output_ports
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("{} is not a live output port", id))
    }

    fn input_mut(&mut self, id: InputPortId) -> &mut InputPort {
        self.input_ports
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("{} is not a live input port", id))
    }

    fn output_is_live(&self, id: OutputPortId) -> bool {
        matches!(self.output_ports.get(id.index()), Some(Some(_)))
    }

    /// Live nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &ProcessorNode> {
        self.nodes.iter().filter_map(Option::as_ref)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes().map(|n| n.id).collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes().count()
    }

    /// Id the next allocated node will receive.
    pub fn next_node_id(&self) -> NodeId {
        NodeId(self.nodes.len() as u32)
    }

    /// Live native-module-call nodes in id order.
    pub fn call_nodes(&self) -> Vec<NodeId> {
        self.nodes()
            .filter(|n| matches!(n.kind, NodeKind::NativeModuleCall { .. }))
            .map(|n| n.id)
            .collect()
    }

    /// Output port `slot` of `node`.
    pub fn output_port(&self, node: NodeId, slot: usize) -> OutputPortId {
        let n = self.node(node);
        *n.outputs.get(slot).unwrap_or_else(|| {
            panic!("{} has no output slot {} ({} outputs)", node, slot, n.outputs.len())
        })
    }

    /// The output port an input is wired to.
    pub fn source_of(&self, input: InputPortId) -> Option<OutputPortId> {
        self.input(input).connection
    }

    // ── Connectivity ────────────────────────────────────────────────────

    /// Point `input` at `output`, unlinking it from any previous output.
    /// Passing `None` only unlinks.
    pub fn set_connection(&mut self, input: InputPortId, output: Option<OutputPortId>) {
        if let Some(next) = output {
            assert!(self.output_is_live(next), "{} is not a live output port", next);
        }
        let previous = self.input_mut(input).connection.take();
        if let Some(prev) = previous {
            self.output_mut(prev).remove_connection(input);
        }
        if let Some(next) = output {
            self.output_mut(next).add_connection(input);
            self.input_mut(input).connection = Some(next);
        }
    }

    /// Move every consumer of `from` over to `to`.
    pub fn redirect_consumers(&mut self, from: OutputPortId, to: OutputPortId) -> usize {
        if from == to {
            return 0;
        }
        let consumers: Vec<InputPortId> = self.output(from).connections.iter().copied().collect();
        for input in &consumers {
            self.set_connection(*input, Some(to));
        }
        consumers.len()
    }

    // ── Allocation ──────────────────────────────────────────────────────

    fn alloc_node(&mut self, kind: NodeKind, location: Option<SourceLocation>) -> NodeId {
        let id = self.ids.alloc_node();
        debug_assert_eq!(id.index(), self.nodes.len());
        self.nodes.push(Some(ProcessorNode {
            id,
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            location,
        }));
        id
    }

    fn node_mut(&mut self, id: NodeId) -> &mut ProcessorNode {
        self.nodes
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("{} is not a live node", id))
    }

    fn attach_output(&mut self, node: NodeId, data_type: ProgramDataType, latency: u32) -> OutputPortId {
        let id = self.ids.alloc_output();
        debug_assert_eq!(id.index(), self.output_ports.len());
        self.output_ports.push(Some(OutputPort {
            id,
            node,
            data_type,
            latency,
            connections: BTreeSet::new(),
        }));
        self.node_mut(node).outputs.push(id);
        id
    }

    fn attach_input(&mut self, node: NodeId, source: Option<OutputPortId>) -> InputPortId {
        let id = self.ids.alloc_input();
        debug_assert_eq!(id.index(), self.input_ports.len());
        self.input_ports.push(Some(InputPort {
            id,
            node,
            connection: None,
        }));
        self.node_mut(node).inputs.push(id);
        if source.is_some() {
            self.set_connection(id, source);
        }
        id
    }

    // ── Node constructors ───────────────────────────────────────────────

    pub fn add_graph_input(
        &mut self,
        name: impl Into<String>,
        data_type: ProgramDataType,
        location: Option<SourceLocation>,
    ) -> NodeId {
        let node = self.alloc_node(
            NodeKind::GraphInput {
                name: name.into(),
                data_type,
            },
            location,
        );
        self.attach_output(node, data_type, 0);
        node
    }

    /// Add a graph output fed by `source`. A constant source is accepted
    /// for any declared upsample factor.
    pub fn add_graph_output(
        &mut self,
        name: impl Into<String>,
        data_type: ProgramDataType,
        source: OutputPortId,
        location: Option<SourceLocation>,
    ) -> Result<NodeId, BuildError> {
        let name = name.into();
        let found = self.output(source).data_type;
        let compatible = found.primitive_type() == data_type.primitive_type()
            && found.is_array() == data_type.is_array()
            && (found.is_constant() || found.upsample_factor() == data_type.upsample_factor());
        if !compatible {
            return Err(BuildError::OutputTypeMismatch {
                name,
                expected: data_type.to_string(),
                found: found.to_string(),
            });
        }
        let node = self.alloc_node(NodeKind::GraphOutput { name, data_type }, location);
        self.attach_input(node, Some(source));
        Ok(node)
    }

    pub fn add_constant(&mut self, value: ConstantValue, location: Option<SourceLocation>) -> NodeId {
        let data_type = value.data_type();
        let node = self.alloc_node(NodeKind::Constant { value }, location);
        self.attach_output(node, data_type, 0);
        node
    }

    /// Add an array node. Elements must share `element_type`; variable
    /// elements must share one upsample factor, constant elements unify
    /// with any factor.
    pub fn add_array(
        &mut self,
        element_type: PrimitiveType,
        elements: &[OutputPortId],
        location: Option<SourceLocation>,
    ) -> Result<NodeId, BuildError> {
        let expected = ProgramDataType::constant(element_type);
        let mut factor: Option<u32> = None;
        let mut latency = 0;
        for (index, element) in elements.iter().enumerate() {
            let port = self.output(*element);
            let dt = port.data_type;
            if dt.primitive_type() != Some(element_type) || dt.is_array() {
                return Err(BuildError::ArrayElementType {
                    index,
                    expected: expected.to_string(),
                    found: dt.to_string(),
                });
            }
            if let Some(u) = dt.upsample_factor() {
                match factor {
                    Some(f) if f != u => {
                        return Err(BuildError::ArrayUpsampleFactor {
                            index,
                            expected: f,
                            found: u,
                        })
                    }
                    _ => factor = Some(u),
                }
                latency = latency.max(port.latency);
            }
        }

        let data_type = match factor {
            Some(u) => ProgramDataType::variable(element_type, u).into_array(),
            None => expected.into_array(),
        };
        let node = self.alloc_node(NodeKind::Array { element_type }, location);
        for element in elements {
            self.attach_input(node, Some(*element));
        }
        self.attach_output(node, data_type, latency);
        Ok(node)
    }

    /// Add a struct node. Field values must be compile-time constants.
    pub fn add_struct(
        &mut self,
        fields: &[(String, OutputPortId)],
        location: Option<SourceLocation>,
    ) -> Result<NodeId, BuildError> {
        let mut seen = BTreeSet::new();
        for (name, port) in fields {
            if !seen.insert(name.as_str()) {
                return Err(BuildError::DuplicateStructField {
                    field: name.clone(),
                });
            }
            if !self.output(*port).data_type.is_constant() {
                return Err(BuildError::NonConstantStructField {
                    field: name.clone(),
                });
            }
        }
        let node = self.alloc_node(
            NodeKind::Struct {
                fields: fields.iter().map(|(name, _)| name.clone()).collect(),
            },
            location,
        );
        for (_, port) in fields {
            self.attach_input(node, Some(*port));
        }
        self.attach_output(node, ProgramDataType::structure(), 0);
        Ok(node)
    }

    /// Insert a fully validated native-module-call node. Validation lives
    /// in `call::build_native_module_call`.
    pub(crate) fn insert_native_module_call(
        &mut self,
        signature: Rc<NativeModuleSignature>,
        upsample_factor: u32,
        latency: u32,
        arguments: &[OutputPortId],
        outputs: &[(ProgramDataType, u32)],
        location: Option<SourceLocation>,
    ) -> NodeId {
        let node = self.alloc_node(
            NodeKind::NativeModuleCall {
                signature,
                upsample_factor,
                latency,
            },
            location,
        );
        for argument in arguments {
            self.attach_input(node, Some(*argument));
        }
        for (data_type, port_latency) in outputs {
            self.attach_output(node, *data_type, *port_latency);
        }
        node
    }

    // ── Constant resolution ─────────────────────────────────────────────

    /// The literal behind `port` if it comes straight from a constant node.
    pub fn constant_literal(&self, port: OutputPortId) -> Option<&ConstantValue> {
        match &self.node(self.output(port).node).kind {
            NodeKind::Constant { value } => Some(value),
            _ => None,
        }
    }

    /// Compile-time value of `port`, resolved through constant, array and
    /// struct nodes. `None` if any part is not known at compile time.
    pub fn constant_value(&self, port: OutputPortId) -> Option<MarshaledValue> {
        let out = self.output(port);
        if !out.data_type.is_constant() {
            return None;
        }
        let node = self.node(out.node);
        match &node.kind {
            NodeKind::Constant { value } => Some(MarshaledValue::Scalar(value.clone())),
            NodeKind::Array { .. } => node
                .inputs
                .iter()
                .map(|i| self.source_of(*i).and_then(|o| self.constant_value(o)))
                .collect::<Option<Vec<_>>>()
                .map(MarshaledValue::Array),
            NodeKind::Struct { fields } => fields
                .iter()
                .zip(&node.inputs)
                .map(|(name, i)| {
                    self.source_of(*i)
                        .and_then(|o| self.constant_value(o))
                        .map(|v| (name.clone(), v))
                })
                .collect::<Option<Vec<_>>>()
                .map(MarshaledValue::Struct),
            NodeKind::GraphInput { .. }
            | NodeKind::GraphOutput { .. }
            | NodeKind::NativeModuleCall { .. } => None,
        }
    }

    // ── Traversal ───────────────────────────────────────────────────────

    /// Nodes feeding the inputs of `node`, in input order.
    pub fn sources(&self, node: NodeId) -> Vec<NodeId> {
        self.node(node)
            .inputs
            .iter()
            .filter_map(|i| self.source_of(*i))
            .map(|o| self.output(o).node)
            .collect()
    }

    /// Nodes consuming any output of `node`.
    pub fn consumers(&self, node: NodeId) -> BTreeSet<NodeId> {
        self.node(node)
            .outputs
            .iter()
            .flat_map(|o| self.output(*o).connections.iter())
            .map(|i| self.input(*i).node)
            .collect()
    }

    /// All nodes discoverable from `sinks` by following input→output links.
    pub fn reachable_from(&self, sinks: &[NodeId]) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<NodeId> = sinks.iter().copied().filter(|n| self.contains_node(*n)).collect();
        while let Some(node) = stack.pop() {
            if !seen.insert(node) {
                continue;
            }
            stack.extend(self.sources(node));
        }
        seen
    }

    pub fn voice_nodes(&self) -> BTreeSet<NodeId> {
        self.reachable_from(&self.surface.voice_sinks())
    }

    pub fn effect_nodes(&self) -> BTreeSet<NodeId> {
        self.reachable_from(&self.surface.effect_sinks())
    }

    // ── Removal ─────────────────────────────────────────────────────────

    /// Remove a node whose outputs feed nothing. Its inputs are unlinked.
    pub fn remove_node(&mut self, id: NodeId) {
        let node = self.node(id).clone();
        for output in &node.outputs {
            let port = self.output(*output);
            assert!(
                port.connections.is_empty(),
                "cannot remove {}: {} still feeds {} input(s)",
                id,
                output,
                port.connections.len()
            );
        }
        for input in &node.inputs {
            self.set_connection(*input, None);
            self.input_ports[input.index()] = None;
        }
        for output in &node.outputs {
            self.output_ports[output.index()] = None;
        }
        self.nodes[id.index()] = None;
    }

    fn is_collectable(&self, node: &ProcessorNode, pinned: &BTreeSet<NodeId>) -> bool {
        if pinned.contains(&node.id) {
            return false;
        }
        let has_side_effects = match &node.kind {
            NodeKind::GraphInput { .. } | NodeKind::GraphOutput { .. } => return false,
            NodeKind::NativeModuleCall { signature, .. } => signature.side_effects,
            NodeKind::Constant { .. } | NodeKind::Array { .. } | NodeKind::Struct { .. } => false,
        };
        !has_side_effects
            && node
                .outputs
                .iter()
                .all(|o| self.output(*o).connections.is_empty())
    }

    /// Remove every node whose outputs feed nothing and which carries no
    /// side effects, repeating until nothing else becomes dead. Returns
    /// the number of removed nodes.
    pub fn collect_garbage(&mut self) -> usize {
        let all = self.node_ids();
        self.collect_garbage_from(all)
    }

    /// Like `collect_garbage`, but only visits `seeds` and the sources of
    /// nodes removed along the way.
    pub fn collect_garbage_from(&mut self, seeds: impl IntoIterator<Item = NodeId>) -> usize {
        let pinned = self.surface.pinned();
        let mut worklist: BTreeSet<NodeId> = seeds.into_iter().collect();
        let mut removed = 0;
        while let Some(id) = worklist.pop_first() {
            let Some(node) = self.try_node(id) else {
                continue;
            };
            if !self.is_collectable(node, &pinned) {
                continue;
            }
            let sources = self.sources(id);
            self.remove_node(id);
            removed += 1;
            worklist.extend(sources);
        }
        if removed > 0 {
            tracing::debug!(removed, "collected dead nodes");
        }
        removed
    }

    // ── Latency ─────────────────────────────────────────────────────────

    /// Latency of `port` expressed in base-rate samples, rounded up.
    pub fn base_rate_latency(&self, port: OutputPortId) -> u32 {
        let out = self.output(port);
        match out.data_type.upsample_factor() {
            Some(u) => out.latency.div_ceil(u),
            None => 0,
        }
    }

    fn max_sink_latency(&self, sinks: &[NodeId]) -> u32 {
        sinks
            .iter()
            .filter_map(|n| self.try_node(*n))
            .flat_map(|n| n.inputs.iter())
            .filter_map(|i| self.source_of(*i))
            .map(|o| self.base_rate_latency(o))
            .max()
            .unwrap_or(0)
    }

    /// Voice latency at the voice-to-effect boundary plus effect latency at
    /// the program outputs. Stored on the surface and returned.
    pub fn compute_total_latency(&mut self) -> u32 {
        let voice = self.max_sink_latency(&self.surface.voice_to_effect_outputs);
        let effect = self.max_sink_latency(&self.surface.outputs);
        self.surface.latency = voice + effect;
        self.surface.latency
    }

    // ── Verification ────────────────────────────────────────────────────

    /// Check port ownership, bidirectional linkage and acyclicity.
    /// Returns one message per violation.
    pub fn verify(&self) -> Vec<String> {
        let mut violations = Vec::new();

        for node in self.nodes() {
            for i in &node.inputs {
                match self.input_ports.get(i.index()).and_then(Option::as_ref) {
                    Some(port) if port.node == node.id => {}
                    _ => violations.push(format!("{} lists foreign or dead input {}", node.id, i)),
                }
            }
            for o in &node.outputs {
                match self.output_ports.get(o.index()).and_then(Option::as_ref) {
                    Some(port) if port.node == node.id => {}
                    _ => violations.push(format!("{} lists foreign or dead output {}", node.id, o)),
                }
            }
        }

        for input in self.input_ports.iter().flatten() {
            if let Some(o) = input.connection {
                match self.output_ports.get(o.index()).and_then(Option::as_ref) {
                    Some(out) if out.connections.contains(&input.id) => {}
                    Some(_) => violations.push(format!("{} -> {} is not mirrored", input.id, o)),
                    None => violations.push(format!("{} points at dead output {}", input.id, o)),
                }
            }
        }
        for output in self.output_ports.iter().flatten() {
            for i in &output.connections {
                match self.input_ports.get(i.index()).and_then(Option::as_ref) {
                    Some(input) if input.connection == Some(output.id) => {}
                    _ => violations.push(format!("{} lists {} without a back-reference", output.id, i)),
                }
            }
        }

        if let Some(node) = self.find_cycle() {
            violations.push(format!("cycle through {}", node));
        }
        violations
    }

    fn find_cycle(&self) -> Option<NodeId> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }
        let mut marks: BTreeMap<NodeId, Mark> = BTreeMap::new();
        for root in self.node_ids() {
            if marks.contains_key(&root) {
                continue;
            }
            let mut stack = vec![(root, false)];
            while let Some((node, expanded)) = stack.pop() {
                if expanded {
                    marks.insert(node, Mark::Done);
                    continue;
                }
                match marks.get(&node) {
                    Some(Mark::Done) => continue,
                    Some(Mark::Visiting) => return Some(node),
                    None => {}
                }
                marks.insert(node, Mark::Visiting);
                stack.push((node, true));
                for src in self.sources(node) {
                    match marks.get(&src) {
                        Some(Mark::Visiting) => return Some(src),
                        Some(Mark::Done) => {}
                        None => stack.push((src, false)),
                    }
                }
            }
        }
        None
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

impl ProgramGraph {
    fn fmt_inputs(&self, f: &mut fmt::Formatter<'_>, node: &ProcessorNode) -> fmt::Result {
        write!(f, "(")?;
        for (k, i) in node.inputs.iter().enumerate() {
            if k > 0 {
                write!(f, ", ")?;
            }
            match self.source_of(*i) {
                Some(o) => write!(f, "{}", o)?,
                None => write!(f, "_")?,
            }
        }
        write!(f, ")")
    }

    fn fmt_outputs(&self, f: &mut fmt::Formatter<'_>, node: &ProcessorNode) -> fmt::Result {
        for (k, o) in node.outputs.iter().enumerate() {
            write!(f, "{}", if k == 0 { " -> " } else { ", " })?;
            let port = self.output(*o);
            write!(f, "{} {}", o, port.data_type)?;
            if port.latency > 0 {
                write!(f, " lat={}", port.latency)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for ProgramGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ProgramGraph ({} nodes, latency {})",
            self.node_count(),
            self.surface.latency
        )?;
        for node in self.nodes() {
            write!(f, "  {}: ", node.id)?;
            match &node.kind {
                NodeKind::GraphInput { name, .. } => write!(f, "input '{}'", name)?,
                NodeKind::GraphOutput { name, .. } => {
                    write!(f, "output '{}' ", name)?;
                    self.fmt_inputs(f, node)?;
                }
                NodeKind::Constant { value } => write!(f, "const {}", value)?,
                NodeKind::Array { .. } => {
                    write!(f, "array ")?;
                    self.fmt_inputs(f, node)?;
                }
                NodeKind::Struct { fields } => {
                    write!(f, "struct {{")?;
                    for (k, (name, i)) in fields.iter().zip(&node.inputs).enumerate() {
                        if k > 0 {
                            write!(f, ", ")?;
                        }
                        match self.source_of(*i) {
                            Some(o) => write!(f, "{}: {}", name, o)?,
                            None => write!(f, "{}: _", name)?,
                        }
                    }
                    write!(f, "}}")?;
                }
                NodeKind::NativeModuleCall {
                    signature,
                    upsample_factor,
                    ..
                } => {
                    write!(f, "{}@{} ", signature.name, upsample_factor)?;
                    self.fmt_inputs(f, node)?;
                }
            }
            self.fmt_outputs(f, node)?;
            writeln!(f)?;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
