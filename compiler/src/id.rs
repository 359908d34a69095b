// id.rs — Stable identifiers for program-graph arenas and native modules
//
// Nodes and ports live in arenas inside `ProgramGraph` and are addressed by
// these integer ids. Ids are allocated in creation order and never reused,
// so a removed node's id stays dead for the lifetime of the graph.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identifier of a processor node within a `ProgramGraph`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Identifier of an input port within a `ProgramGraph`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputPortId(pub u32);

/// Identifier of an output port within a `ProgramGraph`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputPortId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl InputPortId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl OutputPortId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for InputPortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i{}", self.0)
    }
}

impl fmt::Display for OutputPortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "o{}", self.0)
    }
}

/// 128-bit identity of a native module, stable across builds.
///
/// Serialized as 32 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u128);

impl ModuleId {
    pub fn parse_hex(s: &str) -> Option<ModuleId> {
        let trimmed = s.trim();
        let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        if digits.is_empty() || digits.len() > 32 {
            return None;
        }
        u128::from_str_radix(digits, 16).ok().map(ModuleId)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl Serialize for ModuleId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ModuleId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ModuleId::parse_hex(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid module id '{}'", s)))
    }
}

/// Allocator for arena ids. Produces monotonically increasing ids in
/// allocation order, ensuring deterministic assignment.
#[derive(Debug, Default, Clone)]
pub struct IdAllocator {
    next_node: u32,
    next_input: u32,
    next_output: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_node(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }

    pub fn alloc_input(&mut self) -> InputPortId {
        let id = InputPortId(self.next_input);
        self.next_input += 1;
        id
    }

    pub fn alloc_output(&mut self) -> OutputPortId {
        let id = OutputPortId(self.next_output);
        self.next_output += 1;
        id
    }
}
