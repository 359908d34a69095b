// vxc — voice/effect graph compiler, middle tier
//
// Library root. The program graph and the native-module-call builder form
// the construction layer; rules, matching and the rewrite driver form the
// optimizer; passes and the pipeline tie them to the command line.

pub mod call;
pub mod config;
pub mod depth;
pub mod diag;
pub mod dot;
pub mod error;
pub mod graph;
pub mod id;
pub mod manifest;
pub mod matcher;
pub mod pass;
pub mod pipeline;
pub mod registry;
pub mod rewrite;
pub mod rule;
pub mod rule_order;
pub mod types;

#[cfg(test)]
mod fixtures;
