//! Terminal rendering for the `summary` command: a function table, an
//! entrypoint priority tree, per-entrypoint call trees with hot-path
//! highlighting, and the final worst-case stack total.

use std::collections::BTreeSet;

use analyzer::entrypoints::EntrypointReport;
use analyzer::model::{Address, FunctionIndex, ProgramFunction};
use analyzer::program::ProgramReport;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;

pub fn print_summary(report: &ProgramReport) {
    print_function_table(&report.functions);
    println!();
    print_entrypoint_tree(&report.entrypoints);
    println!();
    print_call_trees(&report.entrypoints, &report.functions);
    println!();
    println!("worst-case stack size: {} bytes", report.entrypoints.stack_size);
}

fn print_function_table(functions: &FunctionIndex<ProgramFunction>) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["address", "name", "own", "cumulative", "calls"]);
    for function in functions.values() {
        let calls = function.call_addresses.iter().map(|a| format!("{a:#x}")).collect::<Vec<_>>().join(", ");
        table.add_row(vec![
            format!("{:#x}", function.address),
            function.names.iter().cloned().collect::<Vec<_>>().join(" / "),
            function.stack_grow.to_string(),
            function.stack_grow_cumulative.to_string(),
            calls,
        ]);
    }
    println!("{table}");
}

fn print_entrypoint_tree(report: &EntrypointReport) {
    println!("entrypoints (grouped by preemption priority, worst member per group):");
    for group in &report.groups {
        println!("  group — worst {} bytes", group.stack_grow);
        for member in &group.members {
            println!("    {} ({:#x}) — {} bytes", member.name, member.address, member.stack_grow);
        }
    }
}

fn print_call_trees(report: &EntrypointReport, functions: &FunctionIndex<ProgramFunction>) {
    println!("call trees (hot path marked with *):");
    for group in &report.groups {
        for member in &group.members {
            println!("{}:", member.name);
            if let Some(function) = functions.get(member.address) {
                print_call_tree(function, functions, &mut BTreeSet::new(), 1);
            }
        }
    }
}

/// Walks the call graph depth-first, marking at each node the callee whose
/// cumulative cost is largest — the path an entrypoint's worst case
/// actually follows. `visiting` guards against re-descending into a
/// function already on the current path; the program's call graph is
/// acyclic by construction ([`analyzer::cumulative`] rejects cycles
/// outright), so this is only a defensive bound, not a correctness
/// requirement.
fn print_call_tree(function: &ProgramFunction, functions: &FunctionIndex<ProgramFunction>, visiting: &mut BTreeSet<Address>, depth: usize) {
    if !visiting.insert(function.address) {
        return;
    }

    let hot_callee = function
        .call_addresses
        .iter()
        .filter_map(|address| functions.get(*address).map(|f| (*address, f.stack_grow_cumulative)))
        .max_by_key(|(_, cumulative)| *cumulative)
        .map(|(address, _)| address);

    for &callee_address in &function.call_addresses {
        let Some(callee) = functions.get(callee_address) else { continue };
        let marker = if Some(callee_address) == hot_callee { '*' } else { ' ' };
        let name = callee.names.iter().cloned().collect::<Vec<_>>().join(" / ");
        println!("{}{marker} {name} ({} bytes cumulative)", "  ".repeat(depth), callee.stack_grow_cumulative);
        print_call_tree(callee, functions, visiting, depth + 1);
    }

    visiting.remove(&function.address);
}
