// pass.rs — Pass descriptors: metadata, dependency resolution, artifact IDs
//
// Declares the compiler's passes over a lowered program graph, their
// dependency edges, and the artifacts they produce. Used by the pipeline
// runner to compute the minimal pass subset for each --emit target.
//
// Loading the module registry and rule set happens before the runner.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    LoadGraph,
    Optimize,
    Verify,
    Latency,
}

/// Machine-readable artifact identifiers. Each maps to a field of the
/// compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Graph,         // ProgramGraph
    RewriteReport, // RewriteReport
    Verified,      // marker: graph passed structural verification
    Latency,       // GraphSurface::latency
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// What invalidates this pass's output.
    pub invalidation_key: &'static str,
    /// Postconditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::LoadGraph => PassDescriptor {
            name: "load_graph",
            inputs: &[],
            outputs: &[ArtifactId::Graph],
            invalidation_key: "graph description + registry + settings",
            invariants: "every call built through the native-module-call builder",
        },
        PassId::Optimize => PassDescriptor {
            name: "optimize",
            inputs: &[PassId::LoadGraph],
            outputs: &[ArtifactId::Graph, ArtifactId::RewriteReport],
            invalidation_key: "graph + rules + settings",
            invariants: "no rule matches any consumed anchor, dead nodes removed",
        },
        PassId::Verify => PassDescriptor {
            name: "verify",
            inputs: &[PassId::Optimize],
            outputs: &[ArtifactId::Verified],
            invalidation_key: "graph",
            invariants: "ports owned by live nodes, links bidirectional, graph acyclic",
        },
        PassId::Latency => PassDescriptor {
            name: "latency",
            inputs: &[PassId::Verify],
            outputs: &[ArtifactId::Latency],
            invalidation_key: "graph",
            invariants: "surface latency = voice boundary latency + effect output latency",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order.
pub const ALL_PASSES: [PassId; 4] = [PassId::LoadGraph, PassId::Optimize, PassId::Verify, PassId::Latency];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_passes_latency_includes_all() {
        assert_eq!(required_passes(PassId::Latency), ALL_PASSES.to_vec());
    }

    #[test]
    fn required_passes_load_is_minimal() {
        assert_eq!(required_passes(PassId::LoadGraph), vec![PassId::LoadGraph]);
    }

    #[test]
    fn required_passes_optimize_skips_verify() {
        let passes = required_passes(PassId::Optimize);
        assert_eq!(passes, vec![PassId::LoadGraph, PassId::Optimize]);
        assert!(!passes.contains(&PassId::Verify));
    }

    #[test]
    fn all_descriptors_have_outputs() {
        for pass in &ALL_PASSES {
            let desc = descriptor(*pass);
            assert!(!desc.outputs.is_empty(), "pass {:?} has no outputs declared", pass);
        }
    }

    #[test]
    fn names_are_unique() {
        let names: HashSet<_> = ALL_PASSES.iter().map(|p| descriptor(*p).name).collect();
        assert_eq!(names.len(), ALL_PASSES.len());
    }

    #[test]
    fn dependency_edges_are_consistent() {
        for pass in &ALL_PASSES {
            let order = required_passes(*pass);
            let self_pos = order.iter().position(|p| p == pass).unwrap();
            for dep in descriptor(*pass).inputs {
                let dep_pos = order.iter().position(|p| p == dep).unwrap();
                assert!(
                    dep_pos < self_pos,
                    "{:?} depends on {:?} but it comes later in topological order",
                    pass,
                    dep
                );
            }
        }
    }
}
