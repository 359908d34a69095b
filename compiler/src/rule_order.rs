// rule_order.rs — Deterministic rule precedence
//
// When several rules match the same site, the minimum under this order
// is applied. Keys, in priority order:
//   1. deeper input pattern first
//   2. more exact components (constants and calls) first
//   3. more constant-only wildcards first
//   4. name, ascending
// Rule names are unique within a rule set, so the order is total there.

use std::cmp::Ordering;

use crate::rule::{OptimizationRule, PatternComponent};

/// Ranking key of a rule's input pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Specificity {
    pub depth: usize,
    pub exact_components: usize,
    pub constant_inputs: usize,
}

impl Specificity {
    pub fn of(pattern: &PatternComponent) -> Self {
        let mut exact_components = 0;
        let mut constant_inputs = 0;
        pattern.walk(&mut |c| match c {
            PatternComponent::NativeModuleCall { .. } | PatternComponent::Constant { .. } => {
                exact_components += 1
            }
            PatternComponent::Input {
                must_be_constant: true,
            } => constant_inputs += 1,
            _ => {}
        });
        Specificity {
            depth: pattern.depth(),
            exact_components,
            constant_inputs,
        }
    }
}

pub fn compare_rules(a: &OptimizationRule, b: &OptimizationRule) -> Ordering {
    let ka = Specificity::of(&a.input_pattern);
    let kb = Specificity::of(&b.input_pattern);
    kb.depth
        .cmp(&ka.depth)
        .then(kb.exact_components.cmp(&ka.exact_components))
        .then(kb.constant_inputs.cmp(&ka.constant_inputs))
        .then_with(|| a.name.cmp(&b.name))
}

/// The rule that wins among `rules`, if any.
pub fn select<'a>(rules: impl IntoIterator<Item = &'a OptimizationRule>) -> Option<&'a OptimizationRule> {
    rules.into_iter().min_by(|a, b| compare_rules(a, b))
}
