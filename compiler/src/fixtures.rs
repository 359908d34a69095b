// fixtures.rs — Shared unit-test fixtures
//
// A small registry of arithmetic and rate-changing modules plus helpers for
// building sources. Compiled only for unit tests.

use crate::graph::ProgramGraph;
use crate::id::{ModuleId, OutputPortId};
use crate::registry::{FixedLatency, ModuleParameter, NativeModuleSignature, Registry};
use crate::types::{ConstantValue, ModuleDataType, PrimitiveType, ProgramDataType, RuntimeMutability};

pub const ADD: ModuleId = ModuleId(0x1);
pub const MUL: ModuleId = ModuleId(0x2);
pub const NEG: ModuleId = ModuleId(0x3);
pub const SUB: ModuleId = ModuleId(0x4);
pub const MIX2X: ModuleId = ModuleId(0x5);
pub const DELAY8: ModuleId = ModuleId(0x6);
pub const DELAY9: ModuleId = ModuleId(0x7);
pub const INDEX: ModuleId = ModuleId(0x8);
pub const SCALE: ModuleId = ModuleId(0x9);
pub const SPLIT: ModuleId = ModuleId(0xa);
pub const PROBE: ModuleId = ModuleId(0xb);
pub const DOT: ModuleId = ModuleId(0xc);
pub const TAP: ModuleId = ModuleId(0xd);

pub fn float_var(relative_factor: u32) -> ModuleDataType {
    ModuleDataType::new(RuntimeMutability::Variable, PrimitiveType::Float, relative_factor, false)
}

fn float_dependent(relative_factor: u32) -> ModuleDataType {
    ModuleDataType::new(
        RuntimeMutability::DependentConstant,
        PrimitiveType::Float,
        relative_factor,
        false,
    )
}

fn signature(id: ModuleId, name: &str, parameters: Vec<ModuleParameter>) -> NativeModuleSignature {
    let return_parameter = parameters.iter().position(|p| !p.is_input());
    NativeModuleSignature {
        id,
        name: name.to_string(),
        parameters,
        return_parameter,
        side_effects: false,
    }
}

fn binary(id: ModuleId, name: &str, relative_factor: u32) -> NativeModuleSignature {
    signature(
        id,
        name,
        vec![
            ModuleParameter::input("a", float_var(relative_factor)),
            ModuleParameter::input("b", float_var(relative_factor)),
            ModuleParameter::output("result", float_var(relative_factor)),
        ],
    )
}

fn unary(id: ModuleId, name: &str) -> NativeModuleSignature {
    signature(
        id,
        name,
        vec![
            ModuleParameter::input("x", float_var(1)),
            ModuleParameter::output("result", float_var(1)),
        ],
    )
}

/// add, mul, sub: float binary at relative factor 1.
/// neg: float unary. mix2x: binary at relative factor 2.
/// delay8 / delay9: unary with fixed latency 8 / 9.
/// index: (float[] array, const int index) -> float.
/// scale: dependent-constant float at relative factor 2.
/// split: x -> (lo, hi), returning lo. probe: side-effecting sink.
/// dot: (float[], float[]) -> float. tap: side-effecting float pass-through.
pub fn standard_registry() -> Registry {
    let mut registry = Registry::new();
    let entries: Vec<(NativeModuleSignature, u32)> = vec![
        (binary(ADD, "add", 1), 0),
        (binary(MUL, "mul", 1), 0),
        (unary(NEG, "neg"), 0),
        (binary(SUB, "sub", 1), 0),
        (binary(MIX2X, "mix2x", 2), 0),
        (unary(DELAY8, "delay8"), 8),
        (unary(DELAY9, "delay9"), 9),
        (
            signature(
                INDEX,
                "index",
                vec![
                    ModuleParameter::input(
                        "array",
                        ModuleDataType::new(RuntimeMutability::Variable, PrimitiveType::Float, 1, true),
                    ),
                    ModuleParameter::input(
                        "index",
                        ModuleDataType::new(RuntimeMutability::Constant, PrimitiveType::Int, 1, false),
                    ),
                    ModuleParameter::output("result", float_var(1)),
                ],
            ),
            0,
        ),
        (
            signature(
                SCALE,
                "scale",
                vec![
                    ModuleParameter::input("x", float_dependent(2)),
                    ModuleParameter::output("y", float_dependent(2)),
                ],
            ),
            0,
        ),
        (
            signature(
                DOT,
                "dot",
                vec![
                    ModuleParameter::input(
                        "a",
                        ModuleDataType::new(RuntimeMutability::Variable, PrimitiveType::Float, 1, true),
                    ),
                    ModuleParameter::input(
                        "b",
                        ModuleDataType::new(RuntimeMutability::Variable, PrimitiveType::Float, 1, true),
                    ),
                    ModuleParameter::output("result", float_var(1)),
                ],
            ),
            0,
        ),
        (
            signature(
                SPLIT,
                "split",
                vec![
                    ModuleParameter::input("x", float_var(1)),
                    ModuleParameter::output("lo", float_var(1)),
                    ModuleParameter::output("hi", float_var(1)),
                ],
            ),
            0,
        ),
    ];
    for (sig, latency) in entries {
        registry
            .register(sig, Box::new(FixedLatency(latency)))
            .expect("fixture module registers");
    }
    let mut probe = signature(PROBE, "probe", vec![ModuleParameter::input("x", float_var(1))]);
    probe.side_effects = true;
    registry
        .register(probe, Box::new(FixedLatency(0)))
        .expect("fixture module registers");
    let mut tap = unary(TAP, "tap");
    tap.side_effects = true;
    registry
        .register(tap, Box::new(FixedLatency(0)))
        .expect("fixture module registers");
    registry
}

pub fn float_source(g: &mut ProgramGraph, name: &str, factor: u32) -> OutputPortId {
    let n = g.add_graph_input(name, ProgramDataType::variable(PrimitiveType::Float, factor), None);
    g.output_port(n, 0)
}

pub fn float_constant(g: &mut ProgramGraph, value: f32) -> OutputPortId {
    let n = g.add_constant(ConstantValue::Float(value), None);
    g.output_port(n, 0)
}

pub fn int_constant(g: &mut ProgramGraph, value: i32) -> OutputPortId {
    let n = g.add_constant(ConstantValue::Int(value), None);
    g.output_port(n, 0)
}
