//! Whole-program assembly (spec §4): ties the ELF adapter, decoder, graph
//! builder, stack analyzer, cumulative solver, and entrypoint aggregator
//! into a single [`analyze`] entry point.

use std::collections::BTreeMap;

use log::trace;

use crate::config::Config;
use crate::cumulative;
use crate::decode::{self, DecodedInstruction};
use crate::entrypoints::{self, EntrypointReport};
use crate::error::{Diagnostics, Error, Result};
use crate::fixedpoint;
use crate::graph::{self, PreparedFunction};
use crate::image;
use crate::model::{Address, AnalyzedFunction, FunctionIndex, ProgramFunction, RawFunction, RegionKind};
use crate::stack;

/// The finished analysis: every function's own and cumulative stack growth,
/// and the aggregated entrypoint worst-case total.
pub struct ProgramReport {
    pub functions: FunctionIndex<ProgramFunction>,
    pub entrypoints: EntrypointReport,
}

/// Runs the full pipeline over a parsed executable.
pub fn analyze(elf_bytes: &[u8], config: &Config) -> Result<ProgramReport> {
    let image::ParsedElf { functions: raw_functions, vector_table } = image::parse_functions(elf_bytes)?;
    let overrides = config.functions.instructions_effect.call_overrides.as_call_overrides();
    let raw_index = FunctionIndex::<RawFunction>::new(raw_functions);

    let program_functions = analyze_functions(&raw_index, &overrides)?;

    let raw_entrypoints = image::resolve_entrypoints(&vector_table, &raw_index, &config.entrypoints)?;
    let entrypoint_report = entrypoints::aggregate(&raw_entrypoints, &program_functions)?;
    log::debug!("worst-case stack size resolved to {} bytes across {} groups", entrypoint_report.stack_size, entrypoint_report.groups.len());

    Ok(ProgramReport { functions: program_functions, entrypoints: entrypoint_report })
}

/// Runs decode → graph → stack → cumulative over an already-parsed function
/// set, independent of where those functions came from (split out from
/// [`analyze`] so the chain can be exercised directly in tests without
/// synthesizing a whole ELF image).
fn analyze_functions(raw_index: &FunctionIndex<RawFunction>, overrides: &crate::effects::CallOverrides) -> Result<FunctionIndex<ProgramFunction>> {
    let known_functions: std::collections::BTreeSet<Address> = raw_index.by_address().keys().copied().collect();

    log::debug!("{} functions recovered from symbol table", raw_index.len());

    // Per spec §7, a whole-program pass reports every offending function in
    // one batch rather than bailing on the first; `diagnostics` accumulates
    // across both the decode/prepare loop below and the build/analyze loop
    // further down, and is only turned into a result once the whole function
    // set has been attempted.
    let mut diagnostics = Diagnostics::new();

    let mut prepared: BTreeMap<Address, (String, PreparedFunction)> = BTreeMap::new();
    for (address, function) in raw_index.by_address() {
        let name = function.primary_name().to_string();
        trace!("decoding {name} at {address:#x} ({} bytes)", function.size());
        let attempt = decode_function(&name, function)
            .and_then(|decoded| graph::prepare(&name, *address, &decoded, &function.regions, &function.bytes, overrides));
        match attempt {
            Ok(one) => {
                prepared.insert(*address, (name, one));
            }
            Err(e) => diagnostics.push(Some(&name), None, e.to_string()),
        }
    }

    // The has-return fixed point only needs `FunctionGraph::has_return`, not
    // the graph itself, but `build` can fail for reasons unrelated to
    // incompleteness of `resolved` (a bad branch target, say). Those
    // failures are genuine and must not be swallowed just because this
    // pass's resolver is infallible by construction; stash the first one
    // and fold it into `diagnostics` once the pass is done.
    let mut first_build_error: Option<Error> = None;
    let (has_return, cycle) = fixedpoint::resolve_by_dependency_order(
        &prepared,
        |_address, (_, p)| p.call_targets.clone(),
        |_address, (name, p), resolved| match graph::build(name, p, resolved, &known_functions) {
            Ok(graph) => graph.has_return,
            Err(e) => {
                first_build_error.get_or_insert(e);
                true
            }
        },
    );
    if let Some(e) = first_build_error {
        diagnostics.push(None, None, e.to_string());
    }
    if !cycle.is_empty() {
        let names = cycle.iter().filter_map(|a| prepared.get(a)).map(|(name, _)| name.clone()).collect();
        diagnostics.push(None, None, Error::cycle(names).to_string());
    }

    let mut analyzed = Vec::with_capacity(prepared.len());
    for (address, (name, p)) in &prepared {
        let function = raw_index.get(*address).expect("prepared from raw_index");
        let attempt: Result<AnalyzedFunction> = (|| {
            let graph = graph::build(name, p, &has_return, &known_functions)?;
            let analysis = stack::analyze(name, &graph.instructions)?;
            Ok(AnalyzedFunction {
                address: *address,
                names: function.names.clone(),
                stack_grow: analysis.stack_grow,
                call_addresses: analysis.call_addresses,
            })
        })();
        match attempt {
            Ok(analyzed_function) => analyzed.push(analyzed_function),
            Err(e) => diagnostics.push(Some(name), None, e.to_string()),
        }
    }

    diagnostics.into_result()?;

    let analyzed_index = FunctionIndex::<AnalyzedFunction>::new(analyzed);
    cumulative::resolve(&analyzed_index)
}

/// Decodes every CODE region of a function, in address order, into one
/// function-relative instruction stream (DATA regions carry no
/// instructions and are skipped).
fn decode_function(name: &str, function: &RawFunction) -> Result<Vec<DecodedInstruction>> {
    let mut out = Vec::new();
    for region in &function.regions {
        if region.kind != RegionKind::Code {
            continue;
        }
        let mut chunk = decode::decode_region(name, region.start, function.code_bytes(region))?;
        out.append(&mut chunk);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::effects::CallOverrides;
    use crate::model::{Region, RegionKind};

    fn raw_function(address: Address, name: &str, bytes: Vec<u8>) -> RawFunction {
        let size = bytes.len() as u32;
        RawFunction::new(address, BTreeSet::from([name.to_string()]), bytes, vec![Region { kind: RegionKind::Code, start: 0, end: size }]).unwrap()
    }

    #[test]
    fn caller_cumulative_folds_in_callee_stack() {
        // leaf: PUSH {R4,LR} (-8); MOVS R0,#0x2A; POP {R4,PC} (+8) -> stack_grow 8.
        let leaf_bytes = vec![0x10, 0xb5, 0x2a, 0x20, 0x10, 0xbd];

        // caller: PUSH {LR} (-4); BL leaf (imm=0, so leaf sits right after
        // this 6-byte prefix); POP {PC} (+4) -> stack_grow 4.
        let caller_bytes = vec![0x00, 0xb5, 0x00, 0xf0, 0x00, 0xf8, 0x00, 0xbd];

        let caller_address = 0x300u32;
        let leaf_address = caller_address + 6;

        let raw_index = FunctionIndex::<RawFunction>::new(vec![
            raw_function(caller_address, "caller", caller_bytes),
            raw_function(leaf_address, "leaf", leaf_bytes),
        ]);

        let resolved = analyze_functions(&raw_index, &CallOverrides::new()).unwrap();

        let leaf = resolved.get(leaf_address).unwrap();
        assert_eq!(leaf.stack_grow, 8);
        assert_eq!(leaf.stack_grow_cumulative, 8);

        let caller = resolved.get(caller_address).unwrap();
        assert_eq!(caller.stack_grow, 4);
        assert_eq!(caller.stack_grow_cumulative, 12);
        assert_eq!(caller.call_addresses, BTreeSet::from([leaf_address]));
    }

    #[test]
    fn call_to_unknown_function_is_rejected() {
        // PUSH {LR}; BL to an address with no matching function; POP {PC}.
        let bytes = vec![0x00, 0xb5, 0x00, 0xf0, 0x00, 0xf8, 0x00, 0xbd];
        let raw_index = FunctionIndex::<RawFunction>::new(vec![raw_function(0x300, "caller", bytes)]);
        assert!(analyze_functions(&raw_index, &CallOverrides::new()).is_err());
    }
}
