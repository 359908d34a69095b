// depth.rs — Per-module pattern depth
//
// Records, for every native module appearing in any rule's input pattern,
// the deepest nesting level at which it occurs. The pattern root sits at
// level 0; the children of a call pattern sit one level deeper; array
// elements stay at the level of the array.
//
// The rewrite driver uses these levels to bound how far downstream a
// change can enable a new match.

use std::collections::BTreeMap;

use crate::id::ModuleId;
use crate::rule::{OptimizationRule, PatternComponent};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepthTracker {
    depths: BTreeMap<ModuleId, usize>,
}

impl DepthTracker {
    pub fn new<'a>(rules: impl IntoIterator<Item = &'a OptimizationRule>) -> Self {
        let mut tracker = DepthTracker::default();
        for rule in rules {
            tracker.record(&rule.input_pattern, 0);
        }
        tracker
    }

    fn record(&mut self, pattern: &PatternComponent, level: usize) {
        match pattern {
            PatternComponent::NativeModuleCall {
                module, children, ..
            } => {
                let entry = self.depths.entry(*module).or_insert(level);
                *entry = (*entry).max(level);
                for child in children {
                    self.record(child, level + 1);
                }
            }
            PatternComponent::Array { elements } => {
                for element in elements {
                    self.record(element, level);
                }
            }
            PatternComponent::Constant { .. }
            | PatternComponent::Input { .. }
            | PatternComponent::InputReference { .. }
            | PatternComponent::Output
            | PatternComponent::EndOfList => {}
        }
    }

    /// Deepest level at which `module` occurs; 0 when it never occurs.
    pub fn depth(&self, module: ModuleId) -> usize {
        self.depths.get(&module).copied().unwrap_or(0)
    }

    pub fn contains(&self, module: ModuleId) -> bool {
        self.depths.contains_key(&module)
    }

    /// Deepest level of any module.
    pub fn max_depth(&self) -> usize {
        self.depths.values().copied().max().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ModuleId, usize)> + '_ {
        self.depths.iter().map(|(m, d)| (*m, *d))
    }

    pub fn len(&self) -> usize {
        self.depths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depths.is_empty()
    }
}
