// call.rs — Native-module-call construction
//
// Validates a call of a native module against its signature and inserts
// the resulting node into the program graph: argument compatibility,
// dependent-constant resolution, latency alignment across upsample
// factors, the module's prepare hook, and output port synthesis.
//
// Preconditions: argument ports are live; the module is registered.
// Postconditions: on success, one new node whose inputs are wired to the
//                 arguments; on failure, the graph is unchanged.
// Failure modes: argument count mismatch → panic (upstream bug);
//                type, rate or latency mismatch, prepare errors → `BuildError`.
// Side effects: invokes the module's prepare hook once per successful
//               validation; hook diagnostics go to the context's reporter.

use std::rc::Rc;

use crate::config::CompileSettings;
use crate::diag::{CountingReporter, Reporter, SourceLocation};
use crate::error::BuildError;
use crate::graph::{NodeKind, ProgramGraph};
use crate::id::{ModuleId, NodeId, OutputPortId};
use crate::registry::{NativeModuleSignature, PrepareArgument, PrepareContext, Registry};
use crate::types::{ProgramDataType, RuntimeMutability};

/// Collaborators shared by every construction step of one compilation unit.
pub struct BuildContext<'a> {
    pub registry: &'a Registry,
    pub settings: &'a CompileSettings,
    pub reporter: &'a mut dyn Reporter,
}

impl<'a> BuildContext<'a> {
    pub fn new(
        registry: &'a Registry,
        settings: &'a CompileSettings,
        reporter: &'a mut dyn Reporter,
    ) -> Self {
        BuildContext {
            registry,
            settings,
            reporter,
        }
    }
}

/// Outcome of validating a call before anything is allocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallPlan {
    /// Every argument bound to a dependent-constant parameter is constant.
    pub dependent_constants_constant: bool,
    /// Common argument latency in the call's upsample-factor domain.
    pub input_latency: u32,
}

/// Build a call of `module` at `upsample_factor` with one argument per
/// declared `in` parameter.
pub fn build_native_module_call(
    graph: &mut ProgramGraph,
    cx: &mut BuildContext<'_>,
    module: ModuleId,
    upsample_factor: u32,
    arguments: &[OutputPortId],
    location: Option<SourceLocation>,
) -> Result<NodeId, BuildError> {
    let signature = Rc::clone(
        cx.registry
            .lookup(module)
            .unwrap_or_else(|| panic!("native module {} is not registered", module)),
    );
    let plan = plan_call(graph, &signature, upsample_factor, arguments)?;

    let output_constness: Vec<bool> = signature
        .out_parameters()
        .map(|(_, p)| output_is_constant(p.data_type.runtime_mutability, &plan))
        .collect();
    let all_arguments_constant = arguments
        .iter()
        .all(|a| graph.output(*a).data_type().is_constant());

    let context = PrepareContext {
        sample_rate: cx.settings.sample_rate,
        input_channel_count: cx.settings.input_channel_count,
        output_channel_count: cx.settings.output_channel_count,
        upsample_factor,
        is_compile_time: all_arguments_constant && output_constness.iter().all(|c| *c),
        location: location.clone(),
    };
    let prepare_arguments: Vec<PrepareArgument> = signature
        .in_parameters()
        .zip(arguments)
        .map(|((_, p), a)| PrepareArgument {
            parameter: p.name.clone(),
            value: graph.constant_value(*a),
        })
        .collect();

    let hooks = cx
        .registry
        .hooks(module)
        .unwrap_or_else(|| panic!("native module {} has no hooks", module));
    let mut counting = CountingReporter::new(&mut *cx.reporter);
    let hook_latency = hooks.prepare(&context, &prepare_arguments, &mut counting);
    if counting.errors() > 0 {
        return Err(BuildError::PrepareFailed {
            module: signature.name.clone(),
            errors: counting.errors(),
        });
    }

    let latency = plan.input_latency + hook_latency;
    let outputs: Vec<(ProgramDataType, u32)> = signature
        .out_parameters()
        .zip(&output_constness)
        .map(|((_, p), constant)| {
            let dt = p.data_type;
            let (data_type, port_latency) = if *constant {
                (ProgramDataType::constant(dt.primitive_type), 0)
            } else {
                (
                    ProgramDataType::variable(dt.primitive_type, dt.upsample_factor * upsample_factor),
                    latency * dt.upsample_factor,
                )
            };
            if dt.is_array {
                (data_type.into_array(), port_latency)
            } else {
                (data_type, port_latency)
            }
        })
        .collect();

    let node = graph.insert_native_module_call(
        Rc::clone(&signature),
        upsample_factor,
        latency,
        arguments,
        &outputs,
        location,
    );
    tracing::debug!(
        module = %signature.name,
        node = %node,
        upsample_factor,
        latency,
        "built native module call"
    );
    Ok(node)
}

fn output_is_constant(mutability: RuntimeMutability, plan: &CallPlan) -> bool {
    match mutability {
        RuntimeMutability::Constant => true,
        RuntimeMutability::DependentConstant => plan.dependent_constants_constant,
        RuntimeMutability::Variable => false,
    }
}

/// Validate arguments against the signature without touching the graph.
pub fn plan_call(
    graph: &ProgramGraph,
    signature: &NativeModuleSignature,
    upsample_factor: u32,
    arguments: &[OutputPortId],
) -> Result<CallPlan, BuildError> {
    assert!(upsample_factor > 0, "call upsample factor must be positive");
    let in_count = signature.in_count();
    assert_eq!(
        arguments.len(),
        in_count,
        "'{}' declares {} in parameter(s) but received {} argument(s)",
        signature.name,
        in_count,
        arguments.len()
    );

    let mut dependent_constants_constant = true;
    for (index, ((_, param), argument)) in signature.in_parameters().zip(arguments).enumerate() {
        let found = graph.output(*argument).data_type();
        let declared = param.data_type;

        if found.primitive_type() != Some(declared.primitive_type)
            || found.is_array() != declared.is_array
        {
            let expected = ProgramDataType::constant(declared.primitive_type);
            let expected = if declared.is_array {
                expected.into_array()
            } else {
                expected
            };
            return Err(BuildError::ArgumentTypeMismatch {
                module: signature.name.clone(),
                index,
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }

        match (declared.runtime_mutability, found.upsample_factor()) {
            (_, None) => {}
            (RuntimeMutability::Constant, Some(_)) => {
                return Err(BuildError::ExpectedConstantArgument {
                    module: signature.name.clone(),
                    index,
                });
            }
            (RuntimeMutability::Variable | RuntimeMutability::DependentConstant, Some(u)) => {
                let expected = declared.upsample_factor * upsample_factor;
                if u != expected {
                    return Err(BuildError::UpsampleFactorMismatch {
                        module: signature.name.clone(),
                        index,
                        expected,
                        found: u,
                    });
                }
            }
        }

        if declared.runtime_mutability == RuntimeMutability::DependentConstant && !found.is_constant()
        {
            dependent_constants_constant = false;
        }
    }

    let input_latency = align_latencies(graph, signature, upsample_factor, arguments)?;
    Ok(CallPlan {
        dependent_constants_constant,
        input_latency,
    })
}

/// Bring every non-constant argument's latency into the call's domain and
/// require them to agree. Array arguments built from an array node are
/// checked per element.
fn align_latencies(
    graph: &ProgramGraph,
    signature: &NativeModuleSignature,
    upsample_factor: u32,
    arguments: &[OutputPortId],
) -> Result<u32, BuildError> {
    let mut common: Option<u32> = None;
    for (index, argument) in arguments.iter().enumerate() {
        let port = graph.output(*argument);
        if port.data_type().is_constant() {
            continue;
        }
        let node = graph.node(port.node());
        let ports: Vec<OutputPortId> = match node.kind() {
            NodeKind::Array { .. } => node
                .inputs()
                .iter()
                .filter_map(|i| graph.source_of(*i))
                .filter(|o| !graph.output(*o).data_type().is_constant())
                .collect(),
            _ => vec![*argument],
        };
        for p in ports {
            let out = graph.output(p);
            let factor = out.data_type().upsample_factor().unwrap_or(upsample_factor);
            let aligned = to_call_domain(out.latency(), factor, upsample_factor).ok_or_else(|| {
                BuildError::MisalignedLatency {
                    module: signature.name.clone(),
                    index,
                    latency: out.latency(),
                    factor,
                    call_factor: upsample_factor,
                }
            })?;
            match common {
                None => common = Some(aligned),
                Some(c) if c == aligned => {}
                Some(c) => {
                    return Err(BuildError::InconsistentLatency {
                        module: signature.name.clone(),
                        call_factor: upsample_factor,
                        first: c,
                        second: aligned,
                    })
                }
            }
        }
    }
    Ok(common.unwrap_or(0))
}

/// `latency / (factor / call_factor)`, if both divisions are exact.
fn to_call_domain(latency: u32, factor: u32, call_factor: u32) -> Option<u32> {
    if factor % call_factor != 0 {
        return None;
    }
    let ratio = factor / call_factor;
    if latency % ratio != 0 {
        return None;
    }
    Some(latency / ratio)
}

// ── Tests ───────────────────────────────────────────────────────────────────
