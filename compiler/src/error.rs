//! Build-fatal errors raised while constructing graph nodes.

use crate::diag::{codes, Diagnostic, SourceLocation};

/// A construction step rejected its inputs. The current compilation unit
/// is aborted and no partial node is left behind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// Primitive type or array-ness of an argument differs from the
    /// declared parameter.
    #[error("argument {index} of '{module}': expected {expected}, found {found}")]
    ArgumentTypeMismatch {
        module: String,
        index: usize,
        expected: String,
        found: String,
    },

    #[error("argument {index} of '{module}' must be a compile-time constant")]
    ExpectedConstantArgument { module: String, index: usize },

    #[error(
        "argument {index} of '{module}': upsample factor {found} does not match required {expected}"
    )]
    UpsampleFactorMismatch {
        module: String,
        index: usize,
        expected: u32,
        found: u32,
    },

    /// Latency is not an exact multiple of the rate ratio.
    #[error(
        "argument {index} of '{module}': latency {latency} at upsample factor {factor} is not representable at call factor {call_factor}"
    )]
    MisalignedLatency {
        module: String,
        index: usize,
        latency: u32,
        factor: u32,
        call_factor: u32,
    },

    #[error(
        "inconsistent argument latencies for '{module}' at upsample factor {call_factor}: {first} vs {second}"
    )]
    InconsistentLatency {
        module: String,
        call_factor: u32,
        first: u32,
        second: u32,
    },

    #[error("prepare failed for '{module}' with {errors} error(s)")]
    PrepareFailed { module: String, errors: usize },

    #[error("array element {index}: expected {expected}, found {found}")]
    ArrayElementType {
        index: usize,
        expected: String,
        found: String,
    },

    #[error("array element {index}: upsample factor {found} conflicts with {expected}")]
    ArrayUpsampleFactor {
        index: usize,
        expected: u32,
        found: u32,
    },

    #[error("struct field '{field}' must be a compile-time constant")]
    NonConstantStructField { field: String },

    #[error("duplicate struct field '{field}'")]
    DuplicateStructField { field: String },

    #[error("graph output '{name}': expected {expected}, found {found}")]
    OutputTypeMismatch {
        name: String,
        expected: String,
        found: String,
    },
}

impl BuildError {
    pub fn to_diagnostic(&self, location: Option<SourceLocation>) -> Diagnostic {
        let code = match self {
            BuildError::PrepareFailed { .. } => codes::E0301,
            BuildError::MisalignedLatency { .. } | BuildError::InconsistentLatency { .. } => {
                codes::E0303
            }
            _ => codes::E0302,
        };
        Diagnostic::error(location, self.to_string()).with_code(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_errors_map_to_alignment_code() {
        let err = BuildError::InconsistentLatency {
            module: "mix".into(),
            call_factor: 2,
            first: 4,
            second: 5,
        };
        let d = err.to_diagnostic(None);
        assert_eq!(d.code, Some(codes::E0303));
        assert!(d.message.contains("4 vs 5"));
    }
}
