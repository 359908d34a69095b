// rule.rs — Optimization rule model
//
// Tree patterns describing the left- and right-hand sides of a rewrite,
// the rules built from them, and the validated rule set consumed by the
// rewrite driver.
//
// Pattern shape: a `NativeModuleCall` pattern carries one child per
// declared parameter of its module, in declaration order. Children at `in`
// positions describe the argument feeding that input. The child at the
// pattern's return position is the `Output` placeholder. Children at other
// `out` positions are `Input` wildcards that bind the sibling output port.
// In input patterns an `EndOfList` child ends the list early; positions
// after it are unconstrained.
//
// Preconditions: modules referenced by rules are registered.
// Postconditions: every rule in a `RuleSet` satisfies the shape above,
//                 references only bound slots, and its output patterns
//                 contain no wildcards outside sibling-output positions.
// Failure modes: malformed rules → `RuleError`.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::depth::DepthTracker;
use crate::id::ModuleId;
use crate::registry::{NativeModuleSignature, Registry};
use crate::rule_order::compare_rules;
use crate::types::ConstantValue;

// ── Patterns ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatternComponent {
    NativeModuleCall {
        module: ModuleId,
        upsample_factor: u32,
        /// Declaration index of the `out` parameter the match continues through.
        return_parameter: usize,
        children: Vec<PatternComponent>,
    },
    Constant {
        value: ConstantValue,
    },
    Array {
        elements: Vec<PatternComponent>,
    },
    /// Wildcard. Binds the next slot in depth-first, left-to-right order.
    Input {
        #[serde(default)]
        must_be_constant: bool,
    },
    InputReference {
        slot: usize,
    },
    Output,
    EndOfList,
}

impl PatternComponent {
    pub fn call(
        module: ModuleId,
        upsample_factor: u32,
        return_parameter: usize,
        children: Vec<PatternComponent>,
    ) -> Self {
        PatternComponent::NativeModuleCall {
            module,
            upsample_factor,
            return_parameter,
            children,
        }
    }

    pub fn constant(value: ConstantValue) -> Self {
        PatternComponent::Constant { value }
    }

    pub fn array(elements: Vec<PatternComponent>) -> Self {
        PatternComponent::Array { elements }
    }

    pub fn input() -> Self {
        PatternComponent::Input {
            must_be_constant: false,
        }
    }

    pub fn constant_input() -> Self {
        PatternComponent::Input {
            must_be_constant: true,
        }
    }

    pub fn reference(slot: usize) -> Self {
        PatternComponent::InputReference { slot }
    }

    /// Nesting levels of native-module-call patterns. Array patterns add
    /// no level.
    pub fn depth(&self) -> usize {
        match self {
            PatternComponent::NativeModuleCall { children, .. } => {
                1 + children.iter().map(PatternComponent::depth).max().unwrap_or(0)
            }
            PatternComponent::Array { elements } => {
                elements.iter().map(PatternComponent::depth).max().unwrap_or(0)
            }
            PatternComponent::Constant { .. }
            | PatternComponent::Input { .. }
            | PatternComponent::InputReference { .. }
            | PatternComponent::Output
            | PatternComponent::EndOfList => 0,
        }
    }

    /// Visit this component and all descendants in pre-order.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a PatternComponent)) {
        visit(self);
        match self {
            PatternComponent::NativeModuleCall { children, .. } => {
                children.iter().for_each(|c| c.walk(visit));
            }
            PatternComponent::Array { elements } => {
                elements.iter().for_each(|e| e.walk(visit));
            }
            PatternComponent::Constant { .. }
            | PatternComponent::Input { .. }
            | PatternComponent::InputReference { .. }
            | PatternComponent::Output
            | PatternComponent::EndOfList => {}
        }
    }

    /// Number of slots this pattern binds when matched.
    pub fn slot_count(&self) -> usize {
        let mut n = 0;
        self.walk(&mut |c| {
            if matches!(c, PatternComponent::Input { .. }) {
                n += 1;
            }
        });
        n
    }
}

impl fmt::Display for PatternComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternComponent::NativeModuleCall {
                module,
                upsample_factor,
                children,
                ..
            } => {
                write!(f, "{}@{}(", short_module(*module), upsample_factor)?;
                for (i, c) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", c)?;
                }
                write!(f, ")")
            }
            PatternComponent::Constant { value } => write!(f, "{}", value),
            PatternComponent::Array { elements } => {
                write!(f, "[")?;
                for (i, e) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, "]")
            }
            PatternComponent::Input { must_be_constant } => {
                write!(f, "{}", if *must_be_constant { "?const" } else { "?" })
            }
            PatternComponent::InputReference { slot } => write!(f, "${}", slot),
            PatternComponent::Output => write!(f, "out"),
            PatternComponent::EndOfList => write!(f, "..."),
        }
    }
}

fn short_module(module: ModuleId) -> String {
    format!("#{:x}", module.0)
}

// ── Rules ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationRule {
    pub name: String,
    pub input_pattern: PatternComponent,
    /// Alternatives, tried in order.
    pub output_patterns: Vec<PatternComponent>,
}

impl OptimizationRule {
    pub fn new(
        name: impl Into<String>,
        input_pattern: PatternComponent,
        output_patterns: Vec<PatternComponent>,
    ) -> Self {
        OptimizationRule {
            name: name.into(),
            input_pattern,
            output_patterns,
        }
    }

    /// Module at the root of the input pattern.
    pub fn root_module(&self) -> Option<ModuleId> {
        match &self.input_pattern {
            PatternComponent::NativeModuleCall { module, .. } => Some(*module),
            _ => None,
        }
    }
}

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
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
    #[error("duplicate rule '{name}'")]
    DuplicateRule { name: String },
    #[error("rule '{rule}' has no output patterns")]
    NoOutputPatterns { rule: String },
    #[error("rule '{rule}': input pattern root must be a native module call")]
    RootNotCall { rule: String },
    #[error("rule '{rule}': unknown module {module}")]
    UnknownModule { rule: String, module: ModuleId },
    #[error("rule '{rule}': pattern for '{module}' has zero upsample factor")]
    ZeroUpsampleFactor { rule: String, module: String },
    #[error("rule '{rule}': pattern for '{module}' has {found} children, module declares {expected} parameters")]
    ChildCount {
        rule: String,
        module: String,
        expected: usize,
        found: usize,
    },
    #[error("rule '{rule}': parameter {index} of '{module}' is not an out parameter")]
    InvalidReturnParameter {
        rule: String,
        module: String,
        index: usize,
    },
    #[error("rule '{rule}': misplaced output marker in pattern for '{module}' at position {index}")]
    MisplacedOutput {
        rule: String,
        module: String,
        index: usize,
    },
    #[error("rule '{rule}': '{found}' is not allowed here ({context})")]
    MisplacedComponent {
        rule: String,
        found: String,
        context: &'static str,
    },
    #[error("rule '{rule}': reference to slot {slot} before it is bound ({bound} bound)")]
    UnboundSlot {
        rule: String,
        slot: usize,
        bound: usize,
    },
}

// ── Validation ──────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    Input,
    Output,
}

struct Validator<'a> {
    registry: &'a Registry,
    rule: &'a str,
    side: Side,
    /// Slots bound so far (input side) or available (output side).
    bound: usize,
}

impl Validator<'_> {
    fn misplaced(&self, c: &PatternComponent, context: &'static str) -> RuleError {
        RuleError::MisplacedComponent {
            rule: self.rule.to_string(),
            found: c.to_string(),
            context,
        }
    }

    fn signature(&self, module: ModuleId) -> Result<&NativeModuleSignature, RuleError> {
        self.registry
            .lookup(module)
            .map(|s| s.as_ref())
            .ok_or_else(|| RuleError::UnknownModule {
                rule: self.rule.to_string(),
                module,
            })
    }

    /// Validate a component sitting at a value position (an argument, an
    /// array element, or a pattern root).
    fn value(&mut self, c: &PatternComponent) -> Result<(), RuleError> {
        match c {
            PatternComponent::NativeModuleCall {
                module,
                upsample_factor,
                return_parameter,
                children,
            } => self.call(*module, *upsample_factor, *return_parameter, children),
            PatternComponent::Constant { .. } => Ok(()),
            PatternComponent::Array { elements } => {
                if self.side == Side::Output && elements.is_empty() {
                    return Err(self.misplaced(c, "output arrays need at least one element"));
                }
                elements.iter().try_for_each(|e| self.value(e))
            }
            PatternComponent::Input { .. } => match self.side {
                Side::Input => {
                    self.bound += 1;
                    Ok(())
                }
                Side::Output => Err(self.misplaced(c, "wildcards cannot be instantiated")),
            },
            PatternComponent::InputReference { slot } => {
                if *slot < self.bound {
                    Ok(())
                } else {
                    Err(RuleError::UnboundSlot {
                        rule: self.rule.to_string(),
                        slot: *slot,
                        bound: self.bound,
                    })
                }
            }
            PatternComponent::Output => Err(self.misplaced(c, "output marker outside a call")),
            PatternComponent::EndOfList => Err(self.misplaced(c, "end of list outside a call")),
        }
    }

    fn call(
        &mut self,
        module: ModuleId,
        upsample_factor: u32,
        return_parameter: usize,
        children: &[PatternComponent],
    ) -> Result<(), RuleError> {
        let sig = self.signature(module)?;
        if upsample_factor == 0 {
            return Err(RuleError::ZeroUpsampleFactor {
                rule: self.rule.to_string(),
                module: sig.name.clone(),
            });
        }
        match sig.parameters.get(return_parameter) {
            Some(p) if !p.is_input() => {}
            _ => {
                return Err(RuleError::InvalidReturnParameter {
                    rule: self.rule.to_string(),
                    module: sig.name.clone(),
                    index: return_parameter,
                })
            }
        }

        let truncated = children
            .iter()
            .position(|c| matches!(c, PatternComponent::EndOfList));
        let listed = truncated.unwrap_or(children.len());
        let count_ok = match truncated {
            Some(at) => self.side == Side::Input && at + 1 == children.len() && at <= sig.parameters.len(),
            None => children.len() == sig.parameters.len(),
        };
        if !count_ok {
            return Err(RuleError::ChildCount {
                rule: self.rule.to_string(),
                module: sig.name.clone(),
                expected: sig.parameters.len(),
                found: children.len(),
            });
        }
        if return_parameter >= listed {
            return Err(RuleError::MisplacedOutput {
                rule: self.rule.to_string(),
                module: sig.name.clone(),
                index: return_parameter,
            });
        }

        let name = sig.name.clone();
        let directions: Vec<bool> = sig.parameters.iter().map(|p| p.is_input()).collect();
        for (index, child) in children[..listed].iter().enumerate() {
            let is_output_marker = matches!(child, PatternComponent::Output);
            if index == return_parameter || is_output_marker {
                if index != return_parameter || !is_output_marker {
                    return Err(RuleError::MisplacedOutput {
                        rule: self.rule.to_string(),
                        module: name,
                        index,
                    });
                }
                continue;
            }
            if directions[index] {
                self.value(child)?;
            } else {
                // Sibling output: only an unconstrained wildcard fits.
                match child {
                    PatternComponent::Input {
                        must_be_constant: false,
                    } => {
                        if self.side == Side::Input {
                            self.bound += 1;
                        }
                    }
                    other => return Err(self.misplaced(other, "sibling outputs take a plain wildcard")),
                }
            }
        }
        Ok(())
    }
}

fn validate_rule(registry: &Registry, rule: &OptimizationRule) -> Result<(), RuleError> {
    if !matches!(rule.input_pattern, PatternComponent::NativeModuleCall { .. }) {
        return Err(RuleError::RootNotCall {
            rule: rule.name.clone(),
        });
    }
    if rule.output_patterns.is_empty() {
        return Err(RuleError::NoOutputPatterns {
            rule: rule.name.clone(),
        });
    }
    let mut input = Validator {
        registry,
        rule: &rule.name,
        side: Side::Input,
        bound: 0,
    };
    input.value(&rule.input_pattern)?;
    for pattern in &rule.output_patterns {
        let mut output = Validator {
            registry,
            rule: &rule.name,
            side: Side::Output,
            bound: input.bound,
        };
        output.value(pattern)?;
    }
    Ok(())
}

// ── Rule set ────────────────────────────────────────────────────────────────

/// A validated, indexed collection of rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<OptimizationRule>,
    depths: DepthTracker,
    /// Rule indices per root module, sorted by `compare_rules`.
    by_root: BTreeMap<ModuleId, Vec<usize>>,
}

impl RuleSet {
    pub fn new(registry: &Registry, rules: Vec<OptimizationRule>) -> Result<Self, RuleError> {
        let mut names = BTreeSet::new();
        for rule in &rules {
            if !names.insert(rule.name.as_str()) {
                return Err(RuleError::DuplicateRule {
                    name: rule.name.clone(),
                });
            }
            validate_rule(registry, rule)?;
        }

        let mut by_root: BTreeMap<ModuleId, Vec<usize>> = BTreeMap::new();
        for (i, rule) in rules.iter().enumerate() {
            if let Some(module) = rule.root_module() {
                by_root.entry(module).or_default().push(i);
            }
        }
        for indices in by_root.values_mut() {
            indices.sort_by(|a, b| compare_rules(&rules[*a], &rules[*b]));
        }
        let depths = DepthTracker::new(&rules);
        tracing::debug!(rules = rules.len(), roots = by_root.len(), "built rule set");
        Ok(RuleSet {
            rules,
            depths,
            by_root,
        })
    }

    pub fn from_json(registry: &Registry, text: &str, origin: &str) -> Result<Self, RuleError> {
        let rules: Vec<OptimizationRule> =
            serde_json::from_str(text).map_err(|e| RuleError::Parse {
                origin: origin.to_string(),
                source: e,
            })?;
        Self::new(registry, rules)
    }

    pub fn load(registry: &Registry, path: &Path) -> Result<Self, RuleError> {
        let text = std::fs::read_to_string(path).map_err(|e| RuleError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json(registry, &text, &path.display().to_string())
    }

    /// Pretty JSON list of rules in their original order.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.rules).expect("rule patterns always serialize to JSON")
    }

    /// Compact JSON, used as a fingerprint input.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(&self.rules).expect("rule patterns always serialize to JSON")
    }

    pub fn rules(&self) -> &[OptimizationRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn depths(&self) -> &DepthTracker {
        &self.depths
    }

    /// Rules whose input pattern is rooted at `module`, most specific first.
    pub fn rooted_at(&self, module: ModuleId) -> impl Iterator<Item = &OptimizationRule> {
        self.by_root
            .get(&module)
            .into_iter()
            .flatten()
            .map(|i| &self.rules[*i])
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
