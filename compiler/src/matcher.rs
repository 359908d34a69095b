// matcher.rs — Pattern matching against the live program graph
//
// Matches a pattern component against an output port, binding wildcard
// slots in depth-first, left-to-right order.
//
// Preconditions: the pattern comes from a validated `RuleSet`.
// Postconditions: on success, one binding per `Input` wildcard; on
//                 failure, no bindings survive.
// Failure modes: structurally invalid patterns (unbound slot reference,
//                misplaced output marker or list terminator) → panic.
// Side effects: none.

use crate::graph::{NodeKind, ProgramGraph};
use crate::id::OutputPortId;
use crate::rule::PatternComponent;

/// Ports bound to wildcard slots, indexed by slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    slots: Vec<OutputPortId>,
}

impl Bindings {
    pub fn get(&self, slot: usize) -> OutputPortId {
        *self
            .slots
            .get(slot)
            .unwrap_or_else(|| panic!("slot {} is not bound ({} bound)", slot, self.slots.len()))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn ports(&self) -> &[OutputPortId] {
        &self.slots
    }
}

/// Match `pattern` with `port` as its anchor.
pub fn match_pattern(graph: &ProgramGraph, pattern: &PatternComponent, port: OutputPortId) -> Option<Bindings> {
    let matcher = Matcher { graph };
    let mut bindings = Bindings::default();
    if matcher.component(pattern, port, &mut bindings) {
        Some(bindings)
    } else {
        None
    }
}

struct Matcher<'g> {
    graph: &'g ProgramGraph,
}

impl Matcher<'_> {
    fn component(&self, pattern: &PatternComponent, port: OutputPortId, b: &mut Bindings) -> bool {
        let mark = b.slots.len();
        let matched = self.component_inner(pattern, port, b);
        if !matched {
            b.slots.truncate(mark);
        }
        matched
    }

    fn component_inner(&self, pattern: &PatternComponent, port: OutputPortId, b: &mut Bindings) -> bool {
        match pattern {
            PatternComponent::NativeModuleCall {
                module,
                upsample_factor,
                return_parameter,
                children,
            } => {
                let node = self.graph.node(self.graph.output(port).node());
                let NodeKind::NativeModuleCall {
                    signature,
                    upsample_factor: call_factor,
                    ..
                } = node.kind()
                else {
                    return false;
                };
                if signature.id != *module || call_factor != upsample_factor {
                    return false;
                }
                let Some(anchor_slot) = signature.output_slot(*return_parameter) else {
                    return false;
                };
                if node.outputs()[anchor_slot] != port {
                    return false;
                }

                for (index, child) in children.iter().enumerate() {
                    if matches!(child, PatternComponent::EndOfList) {
                        break;
                    }
                    if index == *return_parameter {
                        assert!(
                            matches!(child, PatternComponent::Output),
                            "return position {} of pattern for '{}' holds {}",
                            index,
                            signature.name,
                            child
                        );
                        continue;
                    }
                    let candidate = if let Some(slot) = signature.input_slot(index) {
                        match self.graph.source_of(node.inputs()[slot]) {
                            Some(source) => source,
                            None => return false,
                        }
                    } else {
                        let slot = signature
                            .output_slot(index)
                            .unwrap_or_else(|| panic!("'{}' has no parameter {}", signature.name, index));
                        node.outputs()[slot]
                    };
                    if !self.component(child, candidate, b) {
                        return false;
                    }
                }
                true
            }
            PatternComponent::Constant { value } => self.graph.constant_literal(port) == Some(value),
            PatternComponent::Array { elements } => {
                let node = self.graph.node(self.graph.output(port).node());
                if !matches!(node.kind(), NodeKind::Array { .. }) || node.inputs().len() != elements.len() {
                    return false;
                }
                elements.iter().zip(node.inputs()).all(|(element, input)| {
                    match self.graph.source_of(*input) {
                        Some(source) => self.component(element, source, b),
                        None => false,
                    }
                })
            }
            PatternComponent::Input { must_be_constant } => {
                if *must_be_constant && !self.graph.output(port).data_type().is_constant() {
                    return false;
                }
                b.slots.push(port);
                true
            }
            PatternComponent::InputReference { slot } => {
                let bound = b.get(*slot);
                bound == port
                    || matches!(
                        (self.graph.constant_value(bound), self.graph.constant_value(port)),
                        (Some(x), Some(y)) if x == y
                    )
            }
            PatternComponent::Output => panic!("output marker matched outside its return position"),
            PatternComponent::EndOfList => panic!("end-of-list marker matched as a value"),
        }
    }
}
