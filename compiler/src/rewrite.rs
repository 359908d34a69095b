// rewrite.rs — Fixpoint rewrite driver
//
// Repeatedly matches rules against native-module-call sites and replaces
// matched anchors until no rule fires anywhere in the graph.
//
// Preconditions: `rules` was validated against the registry in `cx`.
// Postconditions: on success, no rule matches any consumed anchor, the
//                 bidirectional port invariant holds, and every replaced
//                 anchor kept its data type and latency.
// Failure modes: more than `max_rewrites` rewrites → `RewriteError`.
// Side effects: allocates replacement nodes, rewires consumers, removes
//               dead nodes; prepare hooks run for every attempted
//               replacement call.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::call::{build_native_module_call, BuildContext};
use crate::diag::{codes, Diagnostic, SourceLocation};
use crate::error::BuildError;
use crate::graph::{NodeKind, ProgramGraph};
use crate::id::{NodeId, OutputPortId};
use crate::matcher::{match_pattern, Bindings};
use crate::rule::{OptimizationRule, PatternComponent, RuleSet};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RewriteError {
    #[error("rewrite limit of {limit} reached before a fixpoint; rule '{rule}' would fire again at {node}")]
    RewriteLimitExceeded {
        limit: usize,
        rule: String,
        node: NodeId,
    },
}

impl RewriteError {
    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::error(None, self.to_string())
            .with_code(codes::E0401)
            .with_hint("the rule set may not terminate; raise max_rewrites or check for cyclic rules")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RewriteReport {
    pub rewrites: usize,
    pub removed_nodes: usize,
    /// Full passes over the graph, including the final one that found
    /// nothing to do.
    pub sweeps: usize,
    pub fired: BTreeMap<String, usize>,
}

impl fmt::Display for RewriteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rewrite(s), {} node(s) removed, {} sweep(s)",
            self.rewrites, self.removed_nodes, self.sweeps
        )?;
        for (rule, count) in &self.fired {
            write!(f, "\n  {}: {}", rule, count)?;
        }
        Ok(())
    }
}

/// Rewrite `graph` to a fixpoint of `rules`.
pub fn optimize(
    graph: &mut ProgramGraph,
    cx: &mut BuildContext<'_>,
    rules: &RuleSet,
) -> Result<RewriteReport, RewriteError> {
    let mut rewriter = Rewriter {
        rules,
        cx,
        report: RewriteReport::default(),
        warned: BTreeSet::new(),
    };
    rewriter.report.removed_nodes += graph.collect_garbage();
    if rules.is_empty() {
        return Ok(rewriter.report);
    }

    loop {
        rewriter.report.sweeps += 1;
        let mut changed = false;
        let mut worklist: BTreeSet<NodeId> = graph.call_nodes().into_iter().collect();
        while let Some(node) = worklist.pop_first() {
            if !graph.contains_node(node) {
                continue;
            }
            if let Some(requeue) = rewriter.rewrite_at(graph, node)? {
                changed = true;
                worklist.extend(requeue);
            }
        }
        if !changed {
            break;
        }
    }

    let report = rewriter.report;
    tracing::info!(
        rewrites = report.rewrites,
        removed = report.removed_nodes,
        sweeps = report.sweeps,
        "optimization reached fixpoint"
    );
    Ok(report)
}

struct Rewriter<'a, 'b> {
    rules: &'a RuleSet,
    cx: &'a mut BuildContext<'b>,
    report: RewriteReport,
    /// (rule, anchor) pairs already reported as unreplaceable.
    warned: BTreeSet<(String, OutputPortId)>,
}

impl Rewriter<'_, '_> {
    /// Try every rule rooted at `node`'s module, most specific first.
    /// Returns the nodes to revisit when a rewrite happened.
    fn rewrite_at(&mut self, graph: &mut ProgramGraph, node: NodeId) -> Result<Option<Vec<NodeId>>, RewriteError> {
        let site = graph.node(node);
        let NodeKind::NativeModuleCall { signature, .. } = site.kind() else {
            return Ok(None);
        };
        let signature = Rc::clone(signature);
        let location = site.location().cloned();

        let rules = self.rules;
        for rule in rules.rooted_at(signature.id) {
            let PatternComponent::NativeModuleCall {
                return_parameter, ..
            } = &rule.input_pattern
            else {
                continue;
            };
            let Some(slot) = signature.output_slot(*return_parameter) else {
                continue;
            };
            let anchor = graph.output_port(node, slot);
            if graph.output(anchor).connections().is_empty() {
                continue;
            }
            let Some(bindings) = match_pattern(graph, &rule.input_pattern, anchor) else {
                continue;
            };

            if self.report.rewrites >= self.cx.settings.max_rewrites {
                tracing::warn!(
                    limit = self.cx.settings.max_rewrites,
                    rule = %rule.name,
                    %node,
                    "rewrite limit reached"
                );
                return Err(RewriteError::RewriteLimitExceeded {
                    limit: self.cx.settings.max_rewrites,
                    rule: rule.name.clone(),
                    node,
                });
            }

            match self.replace(graph, rule, &bindings, anchor, location.clone()) {
                Some((result, watermark)) => {
                    return Ok(Some(self.commit(graph, rule, node, anchor, result, watermark)))
                }
                None => self.warn_unreplaceable(graph, rule, anchor, location.clone()),
            }
        }
        Ok(None)
    }

    /// Instantiate the first output alternative whose result keeps the
    /// anchor's data type and latency. Returns the result port and the
    /// first node id allocated for it. Nodes built by rejected
    /// alternatives are discarded.
    fn replace(
        &mut self,
        graph: &mut ProgramGraph,
        rule: &OptimizationRule,
        bindings: &Bindings,
        anchor: OutputPortId,
        location: Option<SourceLocation>,
    ) -> Option<(OutputPortId, NodeId)> {
        let expected_type = graph.output(anchor).data_type();
        let expected_latency = graph.output(anchor).latency();

        for (alternative, pattern) in rule.output_patterns.iter().enumerate() {
            let watermark = graph.next_node_id();
            let mut scratch: Vec<Diagnostic> = Vec::new();
            let built = {
                let mut cx = BuildContext::new(self.cx.registry, self.cx.settings, &mut scratch);
                instantiate(graph, &mut cx, pattern, bindings, location.clone())
            };
            match built {
                Ok(port)
                    if port != anchor
                        && graph.output(port).data_type() == expected_type
                        && graph.output(port).latency() == expected_latency =>
                {
                    for diagnostic in scratch {
                        self.cx.reporter.report(diagnostic);
                    }
                    return Some((port, watermark));
                }
                Ok(port) => tracing::debug!(
                    rule = %rule.name,
                    alternative,
                    found = %graph.output(port).data_type(),
                    latency = graph.output(port).latency(),
                    expected = %expected_type,
                    expected_latency,
                    "replacement does not preserve the anchor"
                ),
                Err(e) => tracing::debug!(rule = %rule.name, alternative, error = %e, "replacement failed to build"),
            }
            discard_from(graph, watermark);
        }
        None
    }

    fn commit(
        &mut self,
        graph: &mut ProgramGraph,
        rule: &OptimizationRule,
        node: NodeId,
        anchor: OutputPortId,
        result: OutputPortId,
        watermark: NodeId,
    ) -> Vec<NodeId> {
        let redirected = graph.redirect_consumers(anchor, result);
        self.report.rewrites += 1;
        *self.report.fired.entry(rule.name.clone()).or_default() += 1;
        tracing::debug!(rule = %rule.name, %node, %anchor, %result, redirected, "applied rewrite");

        self.report.removed_nodes += graph.collect_garbage_from([node]);

        let result_node = graph.output(result).node();
        let levels = match graph.node(result_node).kind() {
            NodeKind::NativeModuleCall { signature, .. } => self.rules.depths().depth(signature.id).max(1),
            _ => self.rules.depths().max_depth().max(1),
        };
        let mut requeue: BTreeSet<NodeId> = downstream(graph, result_node, levels);
        requeue.extend(
            allocated_since(graph, watermark)
                .filter(|n| matches!(graph.node(*n).kind(), NodeKind::NativeModuleCall { .. })),
        );
        requeue.into_iter().collect()
    }

    fn warn_unreplaceable(
        &mut self,
        graph: &ProgramGraph,
        rule: &OptimizationRule,
        anchor: OutputPortId,
        location: Option<SourceLocation>,
    ) {
        if !self.warned.insert((rule.name.clone(), anchor)) {
            return;
        }
        let port = graph.output(anchor);
        tracing::warn!(rule = %rule.name, %anchor, "no replacement preserves the anchor");
        self.cx.reporter.report(
            Diagnostic::warning(
                location,
                format!(
                    "rule '{}' matched at {} but no replacement preserves type {} and latency {}",
                    rule.name,
                    port.node(),
                    port.data_type(),
                    port.latency()
                ),
            )
            .with_code(codes::W0401),
        );
    }
}

/// Live nodes allocated at or after `watermark`, in id order.
fn allocated_since(graph: &ProgramGraph, watermark: NodeId) -> impl Iterator<Item = NodeId> + '_ {
    (watermark.0..graph.next_node_id().0)
        .map(NodeId)
        .filter(|n| graph.contains_node(*n))
}

/// Remove every node allocated at or after `watermark`, side effects or
/// not. Later nodes only consume earlier ones, so removal runs newest first.
fn discard_from(graph: &mut ProgramGraph, watermark: NodeId) {
    let fresh: Vec<NodeId> = allocated_since(graph, watermark).collect();
    if fresh.is_empty() {
        return;
    }
    for node in fresh.iter().rev() {
        graph.remove_node(*node);
    }
    tracing::debug!(discarded = fresh.len(), "discarded rejected replacement");
}

/// `from` plus every node up to `levels` consumer hops downstream.
fn downstream(graph: &ProgramGraph, from: NodeId, levels: usize) -> BTreeSet<NodeId> {
    let mut seen = BTreeSet::from([from]);
    let mut frontier = vec![from];
    for _ in 0..levels {
        let mut next = Vec::new();
        for node in frontier {
            for consumer in graph.consumers(node) {
                if seen.insert(consumer) {
                    next.push(consumer);
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    seen
}

/// Build the port an output pattern describes, reusing bound ports.
pub fn instantiate(
    graph: &mut ProgramGraph,
    cx: &mut BuildContext<'_>,
    pattern: &PatternComponent,
    bindings: &Bindings,
    location: Option<SourceLocation>,
) -> Result<OutputPortId, BuildError> {
    match pattern {
        PatternComponent::NativeModuleCall {
            module,
            upsample_factor,
            return_parameter,
            children,
        } => {
            let signature = Rc::clone(
                cx.registry
                    .lookup(*module)
                    .unwrap_or_else(|| panic!("native module {} is not registered", module)),
            );
            let mut arguments = Vec::with_capacity(signature.in_count());
            for (param, child) in signature.parameters.iter().zip(children) {
                if param.is_input() {
                    arguments.push(instantiate(graph, cx, child, bindings, location.clone())?);
                }
            }
            let node = build_native_module_call(graph, cx, *module, *upsample_factor, &arguments, location)?;
            let slot = signature
                .output_slot(*return_parameter)
                .unwrap_or_else(|| panic!("parameter {} of '{}' is not an output", return_parameter, signature.name));
            Ok(graph.output_port(node, slot))
        }
        PatternComponent::Constant { value } => {
            let node = graph.add_constant(value.clone(), location);
            Ok(graph.output_port(node, 0))
        }
        PatternComponent::Array { elements } => {
            let ports = elements
                .iter()
                .map(|e| instantiate(graph, cx, e, bindings, location.clone()))
                .collect::<Result<Vec<_>, _>>()?;
            let first = ports
                .first()
                .map(|p| graph.output(*p).data_type())
                .unwrap_or_else(|| panic!("empty array pattern cannot be instantiated"));
            let element_type = first.primitive_type().ok_or_else(|| BuildError::ArrayElementType {
                index: 0,
                expected: "a primitive value".to_string(),
                found: first.to_string(),
            })?;
            let node = graph.add_array(element_type, &ports, location)?;
            Ok(graph.output_port(node, 0))
        }
        PatternComponent::InputReference { slot } => Ok(bindings.get(*slot)),
        PatternComponent::Input { .. } | PatternComponent::Output | PatternComponent::EndOfList => {
            panic!("'{}' cannot be instantiated", pattern)
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
