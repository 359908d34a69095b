// Shared helpers for integration tests: fixture paths and loaders.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use vxc::call::BuildContext;
use vxc::config::CompileSettings;
use vxc::diag::Diagnostic;
use vxc::graph::ProgramGraph;
use vxc::manifest::GraphManifest;
use vxc::registry::Registry;
use vxc::rule::RuleSet;

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

pub fn registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .load_manifest(&fixture("modules.json"))
        .unwrap_or_else(|e| panic!("failed to load modules.json: {}", e));
    registry
}

pub fn rules(registry: &Registry) -> RuleSet {
    RuleSet::load(registry, &fixture("rules.json")).unwrap_or_else(|e| panic!("failed to load rules.json: {}", e))
}

/// Build a fixture graph, returning it with any diagnostics the build reported.
pub fn graph(registry: &Registry, name: &str) -> (ProgramGraph, Vec<Diagnostic>) {
    let settings = CompileSettings::default();
    let mut diags: Vec<Diagnostic> = Vec::new();
    let manifest = GraphManifest::load(&fixture(name)).unwrap_or_else(|e| panic!("failed to load {}: {}", name, e));
    let graph = {
        let mut cx = BuildContext::new(registry, &settings, &mut diags);
        manifest
            .build(&mut cx)
            .unwrap_or_else(|e| panic!("failed to build {}: {}", name, e))
    };
    (graph, diags)
}
