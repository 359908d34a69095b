// registry.rs — Native module registry
//
// Holds the signatures of externally supplied native modules together with
// their prepare hooks. Signatures come either from a JSON module manifest
// or from programmatic registration by the host. The compiler core only
// consumes the `prepare` hook; runtime hooks belong to later stages.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::diag::{Reporter, SourceLocation};
use crate::id::ModuleId;
use crate::types::{ConstantValue, ModuleDataType, PrimitiveType, RuntimeMutability};

// ── Signature types ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterDirection {
    In,
    Out,
}

/// A single declared parameter of a native module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleParameter {
    pub name: String,
    pub direction: ParameterDirection,
    #[serde(flatten)]
    pub data_type: ModuleDataType,
}

impl ModuleParameter {
    pub fn input(name: impl Into<String>, data_type: ModuleDataType) -> Self {
        ModuleParameter {
            name: name.into(),
            direction: ParameterDirection::In,
            data_type,
        }
    }

    pub fn output(name: impl Into<String>, data_type: ModuleDataType) -> Self {
        ModuleParameter {
            name: name.into(),
            direction: ParameterDirection::Out,
            data_type,
        }
    }

    pub fn is_input(&self) -> bool {
        self.direction == ParameterDirection::In
    }
}

/// Resolved signature of a native module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeModuleSignature {
    pub id: ModuleId,
    pub name: String,
    pub parameters: Vec<ModuleParameter>,
    /// Declaration index of the parameter that carries the call's value.
    #[serde(default)]
    pub return_parameter: Option<usize>,
    /// Calls to modules with side effects are never garbage collected.
    #[serde(default)]
    pub side_effects: bool,
}

impl NativeModuleSignature {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("module name is empty".to_string());
        }
        for (i, p) in self.parameters.iter().enumerate() {
            if p.data_type.upsample_factor == 0 {
                return Err(format!(
                    "parameter {} ('{}') has a zero upsample factor",
                    i, p.name
                ));
            }
            if !p.is_input()
                && p.data_type.primitive_type == PrimitiveType::String
                && p.data_type.runtime_mutability != RuntimeMutability::Constant
            {
                return Err(format!(
                    "string output parameter {} ('{}') must be constant",
                    i, p.name
                ));
            }
        }
        if let Some(ret) = self.return_parameter {
            match self.parameters.get(ret) {
                Some(p) if !p.is_input() => {}
                Some(p) => {
                    return Err(format!(
                        "return parameter {} ('{}') is not an out parameter",
                        ret, p.name
                    ))
                }
                None => {
                    return Err(format!(
                        "return parameter {} out of range ({} parameters)",
                        ret,
                        self.parameters.len()
                    ))
                }
            }
        }
        Ok(())
    }

    /// `in` parameters with their declaration indices.
    pub fn in_parameters(&self) -> impl Iterator<Item = (usize, &ModuleParameter)> {
        self.parameters.iter().enumerate().filter(|(_, p)| p.is_input())
    }

    /// `out` parameters with their declaration indices.
    pub fn out_parameters(&self) -> impl Iterator<Item = (usize, &ModuleParameter)> {
        self.parameters
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_input())
    }

    pub fn in_count(&self) -> usize {
        self.in_parameters().count()
    }

    pub fn out_count(&self) -> usize {
        self.out_parameters().count()
    }

    /// Position of declaration index `param` among the `in` parameters.
    pub fn input_slot(&self, param: usize) -> Option<usize> {
        self.in_parameters().position(|(i, _)| i == param)
    }

    /// Position of declaration index `param` among the `out` parameters.
    pub fn output_slot(&self, param: usize) -> Option<usize> {
        self.out_parameters().position(|(i, _)| i == param)
    }
}

impl fmt::Display for NativeModuleSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, p) in self.parameters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let dir = if p.is_input() { "in" } else { "out" };
            write!(f, "{} {}", dir, p.name)?;
        }
        write!(f, ")")
    }
}

// ── Prepare hook ────────────────────────────────────────────────────────────

/// Context handed to a module's prepare hook.
#[derive(Debug, Clone)]
pub struct PrepareContext {
    pub sample_rate: u32,
    pub input_channel_count: u32,
    pub output_channel_count: u32,
    pub upsample_factor: u32,
    /// Set when every argument and every output of the call is a
    /// compile-time constant.
    pub is_compile_time: bool,
    pub location: Option<SourceLocation>,
}

/// A constant argument value in the shape the hook consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum MarshaledValue {
    Scalar(ConstantValue),
    Array(Vec<MarshaledValue>),
    Struct(Vec<(String, MarshaledValue)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrepareArgument {
    pub parameter: String,
    /// `None` when the value is not known at compile time.
    pub value: Option<MarshaledValue>,
}

/// Lifecycle hooks of a native module consumed by the compiler core.
///
/// `prepare` returns the module's own latency contribution. Failure is
/// signalled by reporting one or more error diagnostics.
pub trait NativeModuleHooks {
    fn prepare(
        &self,
        context: &PrepareContext,
        arguments: &[PrepareArgument],
        reporter: &mut dyn Reporter,
    ) -> u32;
}

/// Hook for modules with a fixed latency and no preparation logic.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedLatency(pub u32);

impl NativeModuleHooks for FixedLatency {
    fn prepare(&self, _: &PrepareContext, _: &[PrepareArgument], _: &mut dyn Reporter) -> u32 {
        self.0
    }
}

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
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
    #[error("duplicate module '{name}': first defined in {first}, redefined in {second}")]
    DuplicateModule {
        name: String,
        first: String,
        second: String,
    },
    #[error("{origin}: invalid signature for module '{name}': {message}")]
    InvalidSignature {
        origin: String,
        name: String,
        message: String,
    },
}

// ── Manifest format ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModuleManifest {
    modules: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    #[serde(flatten)]
    signature: NativeModuleSignature,
    #[serde(default)]
    latency: u32,
}

// ── Registry ────────────────────────────────────────────────────────────────

struct RegisteredModule {
    signature: Rc<NativeModuleSignature>,
    hooks: Box<dyn NativeModuleHooks>,
    origin: String,
}

/// Native module registry, keyed by module identity.
pub struct Registry {
    modules: BTreeMap<ModuleId, RegisteredModule>,
    by_name: HashMap<String, ModuleId>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("modules", &self.by_name.len())
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            modules: BTreeMap::new(),
            by_name: HashMap::new(),
        }
    }

    /// Register a module supplied by the host.
    pub fn register(
        &mut self,
        signature: NativeModuleSignature,
        hooks: Box<dyn NativeModuleHooks>,
    ) -> Result<Rc<NativeModuleSignature>, RegistryError> {
        self.insert(signature, hooks, "<host>".to_string())
    }

    /// Load modules from a JSON manifest file. Returns the number loaded.
    pub fn load_manifest(&mut self, path: &Path) -> Result<usize, RegistryError> {
        let text = std::fs::read_to_string(path).map_err(|e| RegistryError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        self.load_manifest_str(&text, &path.display().to_string())
    }

    pub fn load_manifest_str(&mut self, text: &str, origin: &str) -> Result<usize, RegistryError> {
        let manifest: ModuleManifest =
            serde_json::from_str(text).map_err(|e| RegistryError::Parse {
                origin: origin.to_string(),
                source: e,
            })?;
        let count = manifest.modules.len();
        for entry in manifest.modules {
            self.insert(
                entry.signature,
                Box::new(FixedLatency(entry.latency)),
                origin.to_string(),
            )?;
        }
        tracing::debug!(origin, count, "loaded module manifest");
        Ok(count)
    }

    fn insert(
        &mut self,
        signature: NativeModuleSignature,
        hooks: Box<dyn NativeModuleHooks>,
        origin: String,
    ) -> Result<Rc<NativeModuleSignature>, RegistryError> {
        signature
            .validate()
            .map_err(|message| RegistryError::InvalidSignature {
                origin: origin.clone(),
                name: signature.name.clone(),
                message,
            })?;

        let clash = self
            .modules
            .get(&signature.id)
            .or_else(|| {
                self.by_name
                    .get(&signature.name)
                    .and_then(|id| self.modules.get(id))
            });
        if let Some(first) = clash {
            return Err(RegistryError::DuplicateModule {
                name: signature.name.clone(),
                first: first.origin.clone(),
                second: origin,
            });
        }

        let signature = Rc::new(signature);
        self.by_name.insert(signature.name.clone(), signature.id);
        self.modules.insert(
            signature.id,
            RegisteredModule {
                signature: Rc::clone(&signature),
                hooks,
                origin,
            },
        );
        Ok(signature)
    }

    pub fn lookup(&self, id: ModuleId) -> Option<&Rc<NativeModuleSignature>> {
        self.modules.get(&id).map(|m| &m.signature)
    }

    pub fn lookup_name(&self, name: &str) -> Option<&Rc<NativeModuleSignature>> {
        self.by_name.get(name).and_then(|id| self.lookup(*id))
    }

    pub fn hooks(&self, id: ModuleId) -> Option<&dyn NativeModuleHooks> {
        self.modules.get(&id).map(|m| m.hooks.as_ref())
    }

    /// Signatures in module-id order.
    pub fn modules(&self) -> impl Iterator<Item = &Rc<NativeModuleSignature>> {
        self.modules.values().map(|m| &m.signature)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Compact JSON of all signatures in module-id order. Stable across
    /// load order, so suitable as a fingerprint input.
    pub fn canonical_json(&self) -> String {
        let sigs: Vec<&NativeModuleSignature> =
            self.modules.values().map(|m| m.signature.as_ref()).collect();
        serde_json::to_string(&sigs).expect("module signatures always serialize to JSON")
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Diagnostic;

    fn float_var() -> ModuleDataType {
        ModuleDataType::new(RuntimeMutability::Variable, PrimitiveType::Float, 1, false)
    }

    fn add_signature(id: u128, name: &str) -> NativeModuleSignature {
        NativeModuleSignature {
            id: ModuleId(id),
            name: name.to_string(),
            parameters: vec![
                ModuleParameter::input("a", float_var()),
                ModuleParameter::input("b", float_var()),
                ModuleParameter::output("result", float_var()),
            ],
            return_parameter: Some(2),
            side_effects: false,
        }
    }

    const MANIFEST: &str = r#"{
        "modules": [
            {
                "id": "0000000000000000000000000000000a",
                "name": "delay",
                "parameters": [
                    {"name": "x", "direction": "in", "runtime_mutability": "variable", "primitive_type": "float"},
                    {"name": "samples", "direction": "in", "runtime_mutability": "constant", "primitive_type": "int"},
                    {"name": "result", "direction": "out", "runtime_mutability": "variable", "primitive_type": "float"}
                ],
                "return_parameter": 2,
                "latency": 3
            }
        ]
    }"#;

    #[test]
    fn parameter_slots() {
        let sig = add_signature(1, "add");
        assert_eq!(sig.in_count(), 2);
        assert_eq!(sig.out_count(), 1);
        assert_eq!(sig.input_slot(1), Some(1));
        assert_eq!(sig.output_slot(2), Some(0));
        assert_eq!(sig.output_slot(0), None);
    }

    #[test]
    fn load_manifest_with_fixed_latency() {
        let mut reg = Registry::new();
        let n = reg.load_manifest_str(MANIFEST, "mods.json").unwrap();
        assert_eq!(n, 1);
        let sig = reg.lookup_name("delay").expect("delay not found");
        assert_eq!(sig.id, ModuleId(10));
        assert_eq!(sig.parameters[1].data_type.runtime_mutability, RuntimeMutability::Constant);
        assert_eq!(sig.parameters[0].data_type.upsample_factor, 1);

        let hooks = reg.hooks(sig.id).unwrap();
        let ctx = PrepareContext {
            sample_rate: 48000,
            input_channel_count: 2,
            output_channel_count: 2,
            upsample_factor: 1,
            is_compile_time: false,
            location: None,
        };
        let mut diags: Vec<Diagnostic> = Vec::new();
        assert_eq!(hooks.prepare(&ctx, &[], &mut diags), 3);
        assert!(diags.is_empty());
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let mut reg = Registry::new();
        reg.register(add_signature(1, "add"), Box::new(FixedLatency(0)))
            .unwrap();
        let err = reg
            .register(add_signature(1, "add2"), Box::new(FixedLatency(0)))
            .unwrap_err();
        match err {
            RegistryError::DuplicateModule { name, .. } => assert_eq!(name, "add2"),
            other => panic!("expected DuplicateModule, got: {}", other),
        }
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut reg = Registry::new();
        reg.register(add_signature(1, "add"), Box::new(FixedLatency(0)))
            .unwrap();
        assert!(reg
            .register(add_signature(2, "add"), Box::new(FixedLatency(0)))
            .is_err());
    }

    #[test]
    fn return_parameter_must_be_out() {
        let mut sig = add_signature(1, "add");
        sig.return_parameter = Some(0);
        let mut reg = Registry::new();
        let err = reg.register(sig, Box::new(FixedLatency(0))).unwrap_err();
        assert!(
            err.to_string().contains("not an out parameter"),
            "got: {}",
            err
        );
    }

    #[test]
    fn canonical_json_ignores_registration_order() {
        let mut a = Registry::new();
        a.register(add_signature(2, "b"), Box::new(FixedLatency(0))).unwrap();
        a.register(add_signature(1, "a"), Box::new(FixedLatency(0))).unwrap();
        let mut b = Registry::new();
        b.register(add_signature(1, "a"), Box::new(FixedLatency(0))).unwrap();
        b.register(add_signature(2, "b"), Box::new(FixedLatency(0))).unwrap();
        assert_eq!(a.canonical_json(), b.canonical_json());
        assert!(!a.canonical_json().contains('\n'));
    }

    #[test]
    fn malformed_manifest_reports_origin() {
        let mut reg = Registry::new();
        let err = reg.load_manifest_str("{ not json", "broken.json").unwrap_err();
        assert!(err.to_string().starts_with("broken.json:"), "got: {}", err);
    }
}
