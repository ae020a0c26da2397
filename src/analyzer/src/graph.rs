//! Instruction-graph builder (spec §4.5): turns per-instruction PC/SP
//! effects into the reachable-from-entry instruction set, with call-return
//! edges folded in once callee return status is known.

use std::collections::{BTreeMap, BTreeSet};

use crate::cursor::FunctionBody;
use crate::decode::DecodedInstruction;
use crate::effects::{CallOverrides, pc};
use crate::error::{Error, Result};
use crate::model::{Address, FunctionInstruction, FunctionInstructions, Offset, PcEffectResolved, Region, Successor};

/// One instruction classified in isolation, before reachability or
/// callee-return information is folded in.
struct Classified {
    size: u32,
    stack_delta: i32,
    effect: Option<pc::PcEffect>,
}

/// Classifies every decoded instruction independently (cheap; no
/// reachability walk yet) so the whole-program fixed point can inspect
/// every function's call targets before any graph is finalized.
fn classify_all(
    function_name: &str,
    function_address: Address,
    decoded: &[DecodedInstruction],
    regions: &[Region],
    bytes: &[u8],
    overrides: &CallOverrides,
) -> Result<BTreeMap<Offset, Classified>> {
    let pairs: Vec<(Offset, crate::decode::Instruction)> =
        decoded.iter().map(|d| (d.offset, d.instruction)).collect();
    let body = FunctionBody::new(&pairs, bytes, regions);

    let mut out = BTreeMap::new();
    for decoded_instruction in decoded {
        let cursor = body
            .instruction_cursor(decoded_instruction.offset)
            .expect("offset taken from the same decoded list");
        let effect = pc::classify(cursor, function_address, overrides).map_err(|e| e.with_function(function_name))?;
        let stack_delta = crate::effects::sp::resolve(cursor).map_err(|e| e.with_function(function_name))?.unwrap_or(0);
        out.insert(
            decoded_instruction.offset,
            Classified { size: decoded_instruction.instruction.size().bytes(), stack_delta, effect },
        );
    }
    Ok(out)
}

/// The call-target addresses this function's instructions name, independent
/// of reachability — used purely to order the whole-program has-return
/// fixed point (spec §4.7's dependency-resolution strategy, applied one
/// stage earlier).
fn raw_call_targets(classified: &BTreeMap<Offset, Classified>) -> BTreeSet<Address> {
    classified
        .values()
        .filter_map(|c| match &c.effect {
            Some(pc::PcEffect::Call { targets }) => Some(targets.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

/// Decodes and classifies a function in isolation; returns the classified
/// map plus its raw (reachability-independent) call targets.
pub fn prepare(
    function_name: &str,
    function_address: Address,
    decoded: &[DecodedInstruction],
    regions: &[Region],
    bytes: &[u8],
    overrides: &CallOverrides,
) -> Result<PreparedFunction> {
    let classified = classify_all(function_name, function_address, decoded, regions, bytes, overrides)?;
    let call_targets = raw_call_targets(&classified);
    Ok(PreparedFunction { classified, call_targets })
}

pub struct PreparedFunction {
    classified: BTreeMap<Offset, Classified>,
    pub call_targets: BTreeSet<Address>,
}

/// The finished per-function graph: its reachable instruction set plus
/// whether it can return to its caller at all.
pub struct FunctionGraph {
    pub instructions: FunctionInstructions,
    pub has_return: bool,
}

/// Builds the reachable-from-offset-0 graph for one function (spec §4.5).
///
/// `has_return` must already contain an entry for every address in
/// `prepared.call_targets` that is itself a known function (the
/// whole-program fixed point in [`crate::program`] guarantees this before
/// calling); `known_functions` is the full program address set, used to
/// distinguish "callee hasn't returned" from "callee doesn't exist".
pub fn build(
    function_name: &str,
    prepared: &PreparedFunction,
    has_return: &BTreeMap<Address, bool>,
    known_functions: &BTreeSet<Address>,
) -> Result<FunctionGraph> {
    let classified = &prepared.classified;
    let mut visited: FunctionInstructions = BTreeMap::new();
    let mut worklist = vec![0u32];
    let mut seen = BTreeSet::from([0u32]);
    let mut any_return = false;

    while let Some(offset) = worklist.pop() {
        let Some(instruction) = classified.get(&offset) else {
            return Err(analysis_error(function_name, offset, "control flow reaches an offset with no decoded instruction"));
        };
        let next_offset = offset.checked_add(instruction.size);
        let next_exists = next_offset.is_some_and(|n| classified.contains_key(&n));
        let fallthrough = || if next_exists { Successor::Offset(next_offset.unwrap()) } else { Successor::EndOfFunction };

        let resolved = match &instruction.effect {
            None => PcEffectResolved::Flow { successors: BTreeSet::from([fallthrough()]) },
            Some(pc::PcEffect::Branch { conditional, targets }) => {
                let mut successors: BTreeSet<Successor> = targets.iter().copied().map(Successor::Offset).collect();
                if *conditional {
                    successors.insert(fallthrough());
                }
                PcEffectResolved::Flow { successors }
            }
            Some(pc::PcEffect::Call { targets }) => {
                for target in targets {
                    if !known_functions.contains(target) {
                        return Err(analysis_error(function_name, offset, &format!("call to missing function {target:#x}")));
                    }
                }
                let any_callee_returns = targets.iter().any(|t| has_return.get(t).copied().unwrap_or(true));
                let return_offset = if any_callee_returns {
                    if !next_exists {
                        return Err(analysis_error(
                            function_name,
                            offset,
                            "call that returns when no return-to offset is available",
                        ));
                    }
                    Some(fallthrough())
                } else {
                    None
                };
                PcEffectResolved::Call { targets: targets.clone(), return_offset }
            }
            Some(pc::PcEffect::Return) => {
                any_return = true;
                PcEffectResolved::Return
            }
            Some(pc::PcEffect::Invalid) => PcEffectResolved::Flow { successors: BTreeSet::new() },
        };

        if let PcEffectResolved::Flow { successors } = &resolved {
            if successors.contains(&Successor::EndOfFunction) {
                return Err(analysis_error(function_name, offset, "flow falls off the end of the function while reachable"));
            }
        }

        let to_visit: Vec<Offset> = match &resolved {
            PcEffectResolved::Flow { successors } => {
                successors.iter().filter_map(|s| if let Successor::Offset(o) = s { Some(*o) } else { None }).collect()
            }
            PcEffectResolved::Call { return_offset: Some(Successor::Offset(o)), .. } => vec![*o],
            PcEffectResolved::Call { .. } => vec![],
            PcEffectResolved::Return => vec![],
        };
        for successor in to_visit {
            if seen.insert(successor) {
                worklist.push(successor);
            }
        }

        visited.insert(offset, FunctionInstruction { offset, stack_delta: instruction.stack_delta, pc_effect: resolved });
    }

    Ok(FunctionGraph { instructions: visited, has_return: any_return })
}

fn analysis_error(function: &str, offset: Offset, message: &str) -> Error {
    Error::Analysis { function: function.to_string(), message: format!("{message} at offset {offset:#x}") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_region;
    use crate::model::{RegionKind};

    fn leaf_function() -> (Vec<DecodedInstruction>, Vec<Region>, Vec<u8>) {
        // PUSH {R4, LR}; MOVS R0, #0x2A; POP {R4, PC}
        let bytes = vec![0x10, 0xb5, 0x2a, 0x20, 0x10, 0xbd];
        let decoded = decode_region("foo", 0, &bytes).unwrap();
        let regions = vec![Region { kind: RegionKind::Code, start: 0, end: 6 }];
        (decoded, regions, bytes)
    }

    #[test]
    fn leaf_function_has_return_and_three_instructions() {
        let (decoded, regions, bytes) = leaf_function();
        let prepared = prepare("foo", 0x100, &decoded, &regions, &bytes, &CallOverrides::new()).unwrap();
        let has_return = BTreeMap::new();
        let known = BTreeSet::new();
        let graph = build("foo", &prepared, &has_return, &known).unwrap();
        assert!(graph.has_return);
        assert_eq!(graph.instructions.len(), 3);
    }

    #[test]
    fn non_returning_call_excludes_return_edge() {
        // main: PUSH {LR}; BL panic(+0); panic: B panic (self loop)
        let main_bytes = vec![0x00, 0xb5, 0x00, 0xf0, 0x00, 0xf8];
        let main_decoded = decode_region("main", 0, &main_bytes).unwrap();
        let main_regions = vec![Region { kind: RegionKind::Code, start: 0, end: 6 }];

        let panic_bytes = vec![0xfe, 0xe7]; // B #-4 (branch to self)
        let panic_decoded = decode_region("panic", 0, &panic_bytes).unwrap();
        let panic_regions = vec![Region { kind: RegionKind::Code, start: 0, end: 2 }];

        // BL encodes imm=0, so the callee sits right after the call: main is
        // at 0x200, PUSH is 2 bytes, BL is 4 bytes starting at offset 2, so
        // target = 0x200 + 2 + 4 + 0 = 0x206.
        let panic_address = 0x206u32;
        let main_address = 0x200u32;

        let panic_prepared = prepare("panic", panic_address, &panic_decoded, &panic_regions, &panic_bytes, &CallOverrides::new()).unwrap();
        let panic_graph = build("panic", &panic_prepared, &BTreeMap::new(), &BTreeSet::from([panic_address])).unwrap();
        assert!(!panic_graph.has_return);

        let main_prepared = prepare("main", main_address, &main_decoded, &main_regions, &main_bytes, &CallOverrides::new()).unwrap();
        let mut has_return = BTreeMap::new();
        has_return.insert(panic_address, panic_graph.has_return);
        let known = BTreeSet::from([main_address, panic_address]);
        let main_graph = build("main", &main_prepared, &has_return, &known).unwrap();

        let call_instruction = main_graph.instructions.get(&2).unwrap();
        match &call_instruction.pc_effect {
            PcEffectResolved::Call { return_offset, .. } => assert_eq!(*return_offset, None),
            other => panic!("unexpected effect: {other:?}"),
        }
    }
}
