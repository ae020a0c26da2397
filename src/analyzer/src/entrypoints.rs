//! Entrypoint aggregator (spec §4.8): turns raw vector-table entries into
//! exception-frame-adjusted entrypoint costs, groups them by preemption
//! priority, and sums the worst-case nested stack total.
//!
//! Non-configurable exceptions (Reset, HardFault, NMI when enabled) always
//! contribute their own group to the total — they preempt unconditionally.
//! Configurable exceptions/interrupts compete for the chip's P preemption
//! levels: grouped by priority index (one active handler per level, so the
//! group cost is the worst member, not the sum), unknown-priority ones each
//! get their own group (any of them might preempt any other), and only the
//! top P by cost are assumed to nest at once.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::model::{Address, FunctionIndex, ProgramFunction};

/// Cortex-M0's two configurable priority bits: four preemption levels.
pub const PREEMPTION_LEVELS: usize = 4;
const EXCEPTION_FRAME_BYTES: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionClass {
    Reset,
    NonConfigurable,
    Configurable { priority_group: Option<u8> },
}

#[derive(Debug, Clone)]
pub struct RawEntrypoint {
    pub address: Address,
    pub name: String,
    pub class: ExceptionClass,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entrypoint {
    pub address: Address,
    pub name: String,
    pub stack_grow: u32,
}

#[derive(Debug, Clone)]
pub struct PriorityGroup {
    pub members: Vec<Entrypoint>,
    pub stack_grow: u32,
}

#[derive(Debug, Clone)]
pub struct EntrypointReport {
    pub groups: Vec<PriorityGroup>,
    pub stack_size: u32,
}

fn round_up_to_8(value: u32) -> u32 {
    value.div_ceil(8) * 8
}

fn lift(raw: &RawEntrypoint, functions: &FunctionIndex<ProgramFunction>) -> Result<Entrypoint> {
    let function = functions.get(raw.address).ok_or_else(|| Error::Analysis {
        function: raw.name.clone(),
        message: format!("entrypoint vector at {:#x} does not resolve to a known function", raw.address),
    })?;
    let exception_frame = if raw.class == ExceptionClass::Reset { 0 } else { EXCEPTION_FRAME_BYTES };
    let stack_grow = round_up_to_8(function.stack_grow_cumulative + exception_frame);
    Ok(Entrypoint { address: raw.address, name: raw.name.clone(), stack_grow })
}

/// Builds the priority-grouped report and whole-program stack total (spec
/// §4.8).
pub fn aggregate(raw_entrypoints: &[RawEntrypoint], functions: &FunctionIndex<ProgramFunction>) -> Result<EntrypointReport> {
    let mut base_groups: Vec<PriorityGroup> = Vec::new();
    let mut by_index: BTreeMap<u8, Vec<Entrypoint>> = BTreeMap::new();
    let mut unknown_priority: Vec<Entrypoint> = Vec::new();

    for raw in raw_entrypoints {
        let entrypoint = lift(raw, functions)?;
        match raw.class {
            ExceptionClass::Reset | ExceptionClass::NonConfigurable => {
                base_groups.push(PriorityGroup { stack_grow: entrypoint.stack_grow, members: vec![entrypoint] });
            }
            ExceptionClass::Configurable { priority_group: Some(index) } => {
                by_index.entry(index).or_default().push(entrypoint);
            }
            ExceptionClass::Configurable { priority_group: None } => {
                unknown_priority.push(entrypoint);
            }
        }
    }

    let mut configurable_groups: Vec<PriorityGroup> = by_index
        .into_values()
        .map(|members| {
            let stack_grow = members.iter().map(|m| m.stack_grow).max().unwrap_or(0);
            PriorityGroup { members, stack_grow }
        })
        .chain(unknown_priority.into_iter().map(|member| PriorityGroup { stack_grow: member.stack_grow, members: vec![member] }))
        .collect();

    configurable_groups.sort_by(|a, b| b.stack_grow.cmp(&a.stack_grow));
    configurable_groups.truncate(PREEMPTION_LEVELS);

    let stack_size = base_groups.iter().chain(configurable_groups.iter()).map(|g| g.stack_grow).sum();

    let mut groups = base_groups;
    groups.append(&mut configurable_groups);

    Ok(EntrypointReport { groups, stack_size })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn program_function(address: Address, cumulative: u32) -> ProgramFunction {
        ProgramFunction {
            address,
            names: BTreeSet::from([format!("fn_{address:#x}")]),
            stack_grow: cumulative,
            stack_grow_cumulative: cumulative,
            call_addresses: BTreeSet::new(),
        }
    }

    #[test]
    fn priority_aggregation_matches_worked_example() {
        let functions = FunctionIndex::<ProgramFunction>::new(vec![
            program_function(0x10, 64),
            program_function(0x20, 16),
            program_function(0x30, 40),
            program_function(0x40, 56),
            program_function(0x50, 80),
        ]);
        let raw = vec![
            RawEntrypoint { address: 0x10, name: "Reset".into(), class: ExceptionClass::Reset },
            RawEntrypoint { address: 0x20, name: "HardFault".into(), class: ExceptionClass::NonConfigurable },
            RawEntrypoint { address: 0x30, name: "I0".into(), class: ExceptionClass::Configurable { priority_group: Some(0) } },
            RawEntrypoint { address: 0x40, name: "I1".into(), class: ExceptionClass::Configurable { priority_group: Some(1) } },
            RawEntrypoint { address: 0x50, name: "I_unknown".into(), class: ExceptionClass::Configurable { priority_group: None } },
        ];

        let report = aggregate(&raw, &functions).unwrap();
        assert_eq!(report.stack_size, 384);
    }

    #[test]
    fn reset_entrypoint_skips_exception_frame() {
        let functions = FunctionIndex::<ProgramFunction>::new(vec![program_function(0x10, 64)]);
        let raw = vec![RawEntrypoint { address: 0x10, name: "Reset".into(), class: ExceptionClass::Reset }];
        let report = aggregate(&raw, &functions).unwrap();
        assert_eq!(report.stack_size, 64);
    }

    #[test]
    fn excess_configurable_groups_beyond_preemption_levels_are_dropped() {
        let functions = FunctionIndex::<ProgramFunction>::new(vec![
            program_function(0x10, 8),
            program_function(0x20, 16),
            program_function(0x30, 24),
            program_function(0x40, 32),
            program_function(0x50, 40),
        ]);
        let raw: Vec<RawEntrypoint> = [0x10u32, 0x20, 0x30, 0x40, 0x50]
            .into_iter()
            .map(|address| RawEntrypoint {
                address,
                name: format!("I_{address:#x}"),
                class: ExceptionClass::Configurable { priority_group: None },
            })
            .collect();
        let report = aggregate(&raw, &functions).unwrap();
        assert_eq!(report.groups.len(), PREEMPTION_LEVELS);
        // Smallest (stack_grow=40 rounded... ) is dropped; only top four kept.
        assert_eq!(report.stack_size, report.groups.iter().map(|g| g.stack_grow).sum::<u32>());
    }

    #[test]
    fn missing_function_for_vector_is_rejected() {
        let functions = FunctionIndex::<ProgramFunction>::new(vec![]);
        let raw = vec![RawEntrypoint { address: 0x10, name: "Reset".into(), class: ExceptionClass::Reset }];
        assert!(aggregate(&raw, &functions).is_err());
    }
}
