// pipeline.rs — Compilation state and pass orchestration
//
// Holds the inputs and artifacts of one compilation unit and runs the
// minimal set of passes for a given terminal PassId.
//
// Preconditions: registry, rule set, settings and graph description are
//                loaded before calling run_pipeline.
// Postconditions: all artifacts for required passes are populated, or
//                 has_error is set.
// Failure modes: any pass emitting error-level diagnostics.
// Side effects: calls on_pass_complete after each pass for immediate display.

use std::fmt;
use std::time::{Duration, Instant};

use crate::call::BuildContext;
use crate::config::CompileSettings;
use crate::diag::{codes, DiagLevel, Diagnostic};
use crate::graph::ProgramGraph;
use crate::manifest::GraphManifest;
use crate::pass::{descriptor, required_passes, PassId};
use crate::registry::Registry;
use crate::rewrite::{optimize, RewriteReport};
use crate::rule::RuleSet;

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for hermetic builds and cache-key use.
///
/// `graph_hash`: SHA-256 of the raw graph description text.
/// `registry_fingerprint`: SHA-256 of `Registry::canonical_json()`.
/// `rules_fingerprint`: SHA-256 of `RuleSet::canonical_json()`.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub graph_hash: [u8; 32],
    pub registry_fingerprint: [u8; 32],
    pub rules_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    pub fn graph_hash_hex(&self) -> String {
        bytes_to_hex(&self.graph_hash)
    }

    pub fn registry_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.registry_fingerprint)
    }

    pub fn rules_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.rules_fingerprint)
    }

    /// Serialize provenance as a JSON string for `--emit build-info`.
    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"graph_hash\": \"{}\",\n  \"registry_fingerprint\": \"{}\",\n  \"rules_fingerprint\": \"{}\",\n  \"compiler_version\": \"{}\"\n}}\n",
            self.graph_hash_hex(),
            self.registry_fingerprint_hex(),
            self.rules_fingerprint_hex(),
            self.compiler_version,
        )
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(text: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute provenance from the graph description text, registry and rules.
///
/// Fingerprints use the compact canonical JSON forms so they are
/// independent of how the inputs were formatted on disk.
pub fn compute_provenance(source: &str, registry: &Registry, rules: &RuleSet) -> Provenance {
    Provenance {
        graph_hash: sha256(source),
        registry_fingerprint: sha256(&registry.canonical_json()),
        rules_fingerprint: sha256(&rules.canonical_json()),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Compilation state ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Run the rewrite driver. When false the optimize pass is skipped
    /// and the graph is verified as loaded.
    pub optimize: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions { optimize: true }
    }
}

/// Holds all compilation inputs, artifacts and accumulated diagnostics.
pub struct CompilationState {
    pub registry: Registry,
    pub rules: RuleSet,
    pub settings: CompileSettings,
    pub manifest: GraphManifest,
    pub graph: Option<ProgramGraph>,
    pub report: Option<RewriteReport>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(registry: Registry, rules: RuleSet, settings: CompileSettings, manifest: GraphManifest) -> Self {
        Self {
            registry,
            rules,
            settings,
            manifest,
            graph: None,
            report: None,
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    pub failing_pass: PassId,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed", descriptor(self.failing_pass).name)
    }
}

impl std::error::Error for PipelineError {}

// ── Pass bookkeeping ───────────────────────────────────────────────────────

fn has_error_diags(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}

/// Per-pass post-processing: callback, accumulate, timing, error check.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_error_diags(&diags);
    tracing::debug!(
        pass = descriptor(pass_id).name,
        diagnostics = diags.len(),
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "pass complete"
    );
    state.diagnostics.extend(diags);
    if is_err {
        state.has_error = true;
        return Err(PipelineError { failing_pass: pass_id });
    }
    Ok(())
}

fn loaded_graph(graph: &mut Option<ProgramGraph>, pass_id: PassId) -> &mut ProgramGraph {
    graph
        .as_mut()
        .unwrap_or_else(|| panic!("{} ran before load_graph", descriptor(pass_id).name))
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → log → error check.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    options: &PipelineOptions,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        let mut diags: Vec<Diagnostic> = Vec::new();
        match pass_id {
            PassId::LoadGraph => {
                let mut cx = BuildContext::new(&state.registry, &state.settings, &mut diags);
                match state.manifest.build(&mut cx) {
                    Ok(graph) => state.graph = Some(graph),
                    Err(e) => diags.push(e.to_diagnostic()),
                }
            }
            PassId::Optimize => {
                if !options.optimize {
                    tracing::debug!("optimization disabled, skipping rewrite driver");
                    continue;
                }
                let graph = loaded_graph(&mut state.graph, pass_id);
                let mut cx = BuildContext::new(&state.registry, &state.settings, &mut diags);
                match optimize(graph, &mut cx, &state.rules) {
                    Ok(report) => state.report = Some(report),
                    Err(e) => diags.push(e.to_diagnostic()),
                }
            }
            PassId::Verify => {
                let graph = loaded_graph(&mut state.graph, pass_id);
                for violation in graph.verify() {
                    diags.push(
                        Diagnostic::error(None, format!("graph verification failed: {}", violation))
                            .with_code(codes::E0402),
                    );
                }
            }
            PassId::Latency => {
                let graph = loaded_graph(&mut state.graph, pass_id);
                let latency = graph.compute_total_latency();
                tracing::info!(latency, "computed program latency");
            }
        }
        finish_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete)?;
    }
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────
