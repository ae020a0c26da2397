//! Per-function stack analyzer (spec §4.6).
//!
//! The entry/return walks work in "growth" terms: the negation of the raw,
//! ISA-literal stack delta each instruction carries (push/sub-sp are ≤ 0 in
//! that raw convention, so growth = -delta is ≥ 0 for them). This is what
//! makes the entry walk accumulate pushes and the return walk accumulate
//! pops while stopping at each other's territory (spec §4.6, §8's
//! `own_stack_grow = Σ positive_deltas_on_entry_walk` is exactly this sum).

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::model::{Address, FunctionInstructions, Offset, PcEffectResolved, Successor};

pub struct StackAnalysis {
    pub stack_grow: u32,
    pub call_addresses: BTreeSet<Address>,
}

fn is_call(effect: &PcEffectResolved) -> bool {
    matches!(effect, PcEffectResolved::Call { .. })
}

fn successors_of(effect: &PcEffectResolved) -> Vec<Offset> {
    match effect {
        PcEffectResolved::Flow { successors } => {
            successors.iter().filter_map(|s| if let Successor::Offset(o) = s { Some(*o) } else { None }).collect()
        }
        PcEffectResolved::Call { return_offset: Some(Successor::Offset(o)), .. } => vec![*o],
        PcEffectResolved::Call { .. } => vec![],
        PcEffectResolved::Return => vec![],
    }
}

fn build_predecessors(instructions: &FunctionInstructions) -> BTreeMap<Offset, Vec<Offset>> {
    let mut predecessors: BTreeMap<Offset, Vec<Offset>> = BTreeMap::new();
    for (offset, instruction) in instructions {
        for successor in successors_of(&instruction.pc_effect) {
            predecessors.entry(successor).or_default().push(*offset);
        }
    }
    predecessors
}

fn walk_entry(instructions: &FunctionInstructions, predecessors: &BTreeMap<Offset, Vec<Offset>>) -> (i32, BTreeSet<Offset>) {
    let mut sum = 0i32;
    let mut visited = BTreeSet::new();
    let mut current = Some(0u32);

    while let Some(offset) = current {
        let Some(instruction) = instructions.get(&offset) else { break };
        if is_call(&instruction.pc_effect) {
            break;
        }
        let growth = -instruction.stack_delta;
        if growth < 0 {
            break;
        }
        let successors = successors_of(&instruction.pc_effect);
        if successors.len() != 1 {
            break;
        }
        let required_predecessors = if offset == 0 { 0 } else { 1 };
        if predecessors.get(&offset).map_or(0, Vec::len) != required_predecessors {
            break;
        }

        sum += growth;
        visited.insert(offset);
        current = Some(successors[0]);
    }

    (sum, visited)
}

fn walk_return(
    instructions: &FunctionInstructions,
    predecessors: &BTreeMap<Offset, Vec<Offset>>,
    return_offset: Offset,
) -> (i32, BTreeSet<Offset>) {
    let mut sum = 0i32;
    let mut visited = BTreeSet::new();
    let mut current = Some(return_offset);

    while let Some(offset) = current {
        let Some(instruction) = instructions.get(&offset) else { break };
        if is_call(&instruction.pc_effect) {
            break;
        }
        let growth = -instruction.stack_delta;
        if growth > 0 {
            break;
        }
        let successors = successors_of(&instruction.pc_effect);
        let required_successors = if offset == return_offset { 0 } else { 1 };
        if successors.len() != required_successors {
            break;
        }

        sum += growth;
        visited.insert(offset);

        let predecessors_here = predecessors.get(&offset).map(Vec::as_slice).unwrap_or(&[]);
        if predecessors_here.len() != 1 {
            break;
        }
        current = Some(predecessors_here[0]);
    }

    (sum, visited)
}

fn call_addresses(instructions: &FunctionInstructions) -> BTreeSet<Address> {
    instructions
        .values()
        .filter_map(|instruction| match &instruction.pc_effect {
            PcEffectResolved::Call { targets, .. } => Some(targets.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

/// Derives `stack_grow` for one function and validates conservation (spec
/// §4.6, rules 1-5).
pub fn analyze(function_name: &str, instructions: &FunctionInstructions) -> Result<StackAnalysis> {
    let predecessors = build_predecessors(instructions);
    let (entry_sum, mut visited) = walk_entry(instructions, &predecessors);

    if entry_sum % 4 != 0 {
        return Err(reject(function_name, &format!("entry-walk sum {entry_sum} is not a multiple of 4")));
    }

    let return_offsets: Vec<Offset> = instructions
        .iter()
        .filter(|(_, instruction)| matches!(instruction.pc_effect, PcEffectResolved::Return))
        .map(|(offset, _)| *offset)
        .collect();

    if !return_offsets.is_empty() {
        let mut canonical_return_sum: Option<i32> = None;
        for &return_offset in &return_offsets {
            let (sum, return_visited) = walk_return(instructions, &predecessors, return_offset);
            match canonical_return_sum {
                None => canonical_return_sum = Some(sum),
                Some(existing) if existing != sum => {
                    return Err(reject(function_name, "different return paths result in differing stack sizes"));
                }
                _ => {}
            }
            visited.extend(return_visited);
        }
        let return_sum = canonical_return_sum.expect("non-empty return_offsets");
        if entry_sum + return_sum != 0 {
            return Err(reject(function_name, "stack not returned to zero"));
        }
    }

    for (offset, instruction) in instructions {
        if instruction.stack_delta != 0 && !visited.contains(offset) {
            return Err(reject(
                function_name,
                &format!("function not analyzable: stack-affecting instruction at {offset:#x} outside entry/return walks"),
            ));
        }
    }

    Ok(StackAnalysis { stack_grow: entry_sum as u32, call_addresses: call_addresses(instructions) })
}

fn reject(function_name: &str, message: &str) -> Error {
    Error::Analysis { function: function_name.to_string(), message: message.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FunctionInstruction;

    fn flow(offset: Offset, delta: i32, next: Option<Offset>) -> (Offset, FunctionInstruction) {
        let successors = match next {
            Some(n) => BTreeSet::from([Successor::Offset(n)]),
            None => BTreeSet::new(),
        };
        (offset, FunctionInstruction { offset, stack_delta: delta, pc_effect: PcEffectResolved::Flow { successors } })
    }

    fn ret(offset: Offset, delta: i32) -> (Offset, FunctionInstruction) {
        (offset, FunctionInstruction { offset, stack_delta: delta, pc_effect: PcEffectResolved::Return })
    }

    #[test]
    fn leaf_function_balances_to_eight() {
        // PUSH {R4,LR} (-8); MOVS (0); POP {R4,PC} (+8, Return).
        let instructions: FunctionInstructions =
            BTreeMap::from([flow(0, -8, Some(2)), flow(2, 0, Some(4)), ret(4, 8)]);
        let analysis = analyze("foo", &instructions).unwrap();
        assert_eq!(analysis.stack_grow, 8);
    }

    #[test]
    fn mismatched_return_paths_are_rejected() {
        // Two POP sites at different offsets with different deltas, both
        // reachable only through a branch (so predecessor counts stay 1).
        let mut successors_at_0 = BTreeSet::new();
        successors_at_0.insert(Successor::Offset(2));
        successors_at_0.insert(Successor::Offset(4));
        let branch = (
            0,
            FunctionInstruction {
                offset: 0,
                stack_delta: 0,
                pc_effect: PcEffectResolved::Flow { successors: successors_at_0 },
            },
        );
        let instructions: FunctionInstructions = BTreeMap::from([branch, ret(2, 8), ret(4, 12)]);
        assert!(analyze("foo", &instructions).is_err());
    }

    #[test]
    fn stack_affecting_instruction_outside_walks_is_rejected() {
        // PUSH; unconditional branch to POP, with an extra PUSH sitting
        // between them that neither walk ever visits.
        let mut instructions = BTreeMap::new();
        instructions.insert(0, flow(0, -4, Some(2)).1);
        instructions.insert(2, FunctionInstruction {
            offset: 2,
            stack_delta: -4,
            pc_effect: PcEffectResolved::Flow { successors: BTreeSet::from([Successor::Offset(8)]) },
        });
        instructions.insert(8, ret(8, 4).1);
        assert!(analyze("foo", &instructions).is_err());
    }
}
