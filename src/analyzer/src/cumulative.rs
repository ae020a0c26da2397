//! Cumulative-stack solver (spec §4.7): folds callee worst-case stack usage
//! into each function's own `stack_grow` via the shared [`fixedpoint`]
//! driver, reporting any unresolved leftover as a call-graph cycle.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::fixedpoint;
use crate::model::{Address, AnalyzedFunction, FunctionIndex, ProgramFunction};

/// Computes `stack_grow_cumulative(f) = stack_grow(f) + max(cumulative(g)
/// for g in callees(f))` for every function, in dependency order.
pub fn resolve(functions: &FunctionIndex<AnalyzedFunction>) -> Result<FunctionIndex<ProgramFunction>> {
    let items: BTreeMap<Address, &AnalyzedFunction> = functions.by_address().iter().map(|(a, f)| (*a, *f)).collect();

    let (cumulative, cycle) = fixedpoint::resolve_by_dependency_order(
        &items,
        |_address, function| function.call_addresses.clone(),
        |_address, function, resolved| {
            let worst_callee = function.call_addresses.iter().filter_map(|callee| resolved.get(callee).copied()).max().unwrap_or(0);
            function.stack_grow + worst_callee
        },
    );

    if !cycle.is_empty() {
        let names = cycle.iter().filter_map(|address| items.get(address)).flat_map(|f| f.names.iter().cloned()).collect();
        return Err(Error::cycle(names));
    }

    let program_functions = items
        .into_iter()
        .map(|(address, function)| ProgramFunction {
            address,
            names: function.names.clone(),
            stack_grow: function.stack_grow,
            stack_grow_cumulative: cumulative[&address],
            call_addresses: function.call_addresses.clone(),
        })
        .collect();

    Ok(FunctionIndex::<ProgramFunction>::new(program_functions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn function(address: Address, name: &str, stack_grow: u32, calls: &[Address]) -> AnalyzedFunction {
        AnalyzedFunction {
            address,
            names: BTreeSet::from([name.to_string()]),
            stack_grow,
            call_addresses: calls.iter().copied().collect(),
        }
    }

    #[test]
    fn cumulative_folds_in_worst_callee() {
        let functions = FunctionIndex::<AnalyzedFunction>::new(vec![
            function(0x10, "leaf", 8, &[]),
            function(0x20, "other_leaf", 16, &[]),
            function(0x30, "caller", 8, &[0x10, 0x20]),
        ]);
        let resolved = resolve(&functions).unwrap();
        assert_eq!(resolved.get(0x30).unwrap().stack_grow_cumulative, 24);
        assert_eq!(resolved.get(0x10).unwrap().stack_grow_cumulative, 8);
    }

    #[test]
    fn direct_recursion_is_reported_as_a_cycle() {
        let functions = FunctionIndex::<AnalyzedFunction>::new(vec![function(0x10, "recurse", 8, &[0x10])]);
        let err = resolve(&functions).unwrap_err();
        assert!(matches!(err, Error::Cycle { .. }));
    }

    #[test]
    fn mutual_recursion_is_reported_as_a_cycle() {
        let functions = FunctionIndex::<AnalyzedFunction>::new(vec![
            function(0x10, "ping", 8, &[0x20]),
            function(0x20, "pong", 8, &[0x10]),
        ]);
        let err = resolve(&functions).unwrap_err();
        match err {
            Error::Cycle { names, .. } => {
                assert!(names.contains(&"ping".to_string()));
                assert!(names.contains(&"pong".to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
