//! Data model shared across the pipeline (spec §3).
//!
//! Every type here is built once and never mutated after construction;
//! validation happens at the constructor, not scattered across call sites.

use std::collections::{BTreeMap, BTreeSet};

/// A non-negative, half-word-aligned address. The Thumb bit is always
/// cleared before a value is stored as an `Address`.
pub type Address = u32;

pub const fn clear_thumb_bit(address: u32) -> Address {
    address & !1
}

/// A function-relative byte offset into its own code/data regions.
pub type Offset = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RegionKind {
    Code,
    Data,
}

/// One contiguous span of a function's byte range, tagged CODE or DATA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub kind: RegionKind,
    pub start: Offset,
    pub end: Offset,
}

impl Region {
    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    pub fn contains(&self, offset: Offset) -> bool {
        (self.start..self.end).contains(&offset)
    }
}

/// A function as handed to the pipeline by the image adapter: address,
/// size, name set, bytes, and the gap-free CODE/DATA region sequence.
///
/// Invariant (validated in [`RawFunction::new`]): regions are contiguous,
/// start at 0, alternate CODE/DATA beginning with CODE, and their total
/// length equals `bytes.len()`.
#[derive(Debug, Clone)]
pub struct RawFunction {
    pub address: Address,
    pub names: BTreeSet<String>,
    pub bytes: Vec<u8>,
    pub regions: Vec<Region>,
}

impl RawFunction {
    pub fn new(address: Address, names: BTreeSet<String>, bytes: Vec<u8>, regions: Vec<Region>) -> Result<Self, String> {
        if names.is_empty() {
            return Err("function has no name".into());
        }
        if regions.is_empty() {
            return Err("function has no regions".into());
        }
        if regions[0].kind != RegionKind::Code {
            return Err("first region is not CODE".into());
        }
        let mut expected_start = 0u32;
        for window in regions.windows(2) {
            if window[0].kind == window[1].kind {
                return Err("adjacent regions have the same kind".into());
            }
        }
        for region in &regions {
            if region.start != expected_start {
                return Err(format!("region gap/overlap at offset {:#x}", region.start));
            }
            expected_start = region.end;
        }
        if expected_start as usize != bytes.len() {
            return Err(format!("regions cover {expected_start:#x} bytes, function is {:#x}", bytes.len()));
        }
        Ok(Self { address, names, bytes, regions })
    }

    pub fn size(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn primary_name(&self) -> &str {
        self.names.iter().next().expect("non-empty by construction")
    }

    pub fn code_bytes(&self, region: &Region) -> &[u8] {
        &self.bytes[region.start as usize..region.end as usize]
    }
}

/// A successor offset, or the sentinel for "falls off the end of the
/// function" (permitted only when unreachable, spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Successor {
    Offset(Offset),
    EndOfFunction,
}

/// The resolved PC-effect of one instruction, after the graph builder has
/// folded in reachability and (for calls) callee return status (spec §3,
/// §4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PcEffectResolved {
    Flow { successors: BTreeSet<Successor> },
    Call { targets: BTreeSet<Address>, return_offset: Option<Successor> },
    Return,
}

/// One instruction after PC/SP resolution: its offset, stack delta, and
/// resolved control-flow effect (spec §3).
#[derive(Debug, Clone)]
pub struct FunctionInstruction {
    pub offset: Offset,
    pub stack_delta: i32,
    pub pc_effect: PcEffectResolved,
}

/// The reachable-from-entry instruction set of one function, keyed by
/// offset (spec §3 "FunctionInstructions"): ordered, non-overlapping, every
/// non-sentinel successor offset present as a key.
pub type FunctionInstructions = BTreeMap<Offset, FunctionInstruction>;

/// A function after §4.6/§4.7 analysis: its own stack growth and the set of
/// addresses it calls. `stack_grow` is non-negative and a multiple of 4.
#[derive(Debug, Clone)]
pub struct AnalyzedFunction {
    pub address: Address,
    pub names: BTreeSet<String>,
    pub stack_grow: u32,
    pub call_addresses: BTreeSet<Address>,
}

/// A function with the whole-program cumulative bound folded in
/// (`stack_grow_cumulative = stack_grow + max(cumulative(callees), 0)`).
#[derive(Debug, Clone)]
pub struct ProgramFunction {
    pub address: Address,
    pub names: BTreeSet<String>,
    pub stack_grow: u32,
    pub stack_grow_cumulative: u32,
    pub call_addresses: BTreeSet<Address>,
}

/// Address-keyed and name-keyed lookup over a function set, built eagerly
/// at construction (spec §9 "Lazy derived indexes" redesign note: the
/// teacher's lazy-on-first-read fields become eager fields here since every
/// validation pass already performs a full scan).
#[derive(Debug)]
pub struct FunctionIndex<F> {
    by_address: BTreeMap<Address, F>,
    name_to_address: BTreeMap<String, Address>,
}

impl<F> FunctionIndex<F> {
    pub fn by_address(&self) -> &BTreeMap<Address, F> {
        &self.by_address
    }

    pub fn get(&self, address: Address) -> Option<&F> {
        self.by_address.get(&address)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&F> {
        self.name_to_address.get(name).and_then(|address| self.by_address.get(address))
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &F> {
        self.by_address.values()
    }
}

impl FunctionIndex<RawFunction> {
    pub fn new(functions: Vec<RawFunction>) -> Self {
        let mut by_address = BTreeMap::new();
        let mut name_to_address = BTreeMap::new();
        for function in functions {
            for name in &function.names {
                name_to_address.insert(name.clone(), function.address);
            }
            by_address.insert(function.address, function);
        }
        Self { by_address, name_to_address }
    }
}

impl FunctionIndex<AnalyzedFunction> {
    pub fn new(functions: Vec<AnalyzedFunction>) -> Self {
        let mut by_address = BTreeMap::new();
        let mut name_to_address = BTreeMap::new();
        for function in functions {
            for name in &function.names {
                name_to_address.insert(name.clone(), function.address);
            }
            by_address.insert(function.address, function);
        }
        Self { by_address, name_to_address }
    }
}

impl FunctionIndex<ProgramFunction> {
    pub fn new(functions: Vec<ProgramFunction>) -> Self {
        let mut by_address = BTreeMap::new();
        let mut name_to_address = BTreeMap::new();
        for function in functions {
            for name in &function.names {
                name_to_address.insert(name.clone(), function.address);
            }
            by_address.insert(function.address, function);
        }
        Self { by_address, name_to_address }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(kind: RegionKind, start: u32, end: u32) -> Region {
        Region { kind, start, end }
    }

    #[test]
    fn single_code_region_function_is_valid() {
        let f = RawFunction::new(
            0x100,
            BTreeSet::from(["foo".to_string()]),
            vec![0; 6],
            vec![region(RegionKind::Code, 0, 6)],
        );
        assert!(f.is_ok());
    }

    #[test]
    fn region_gap_is_rejected() {
        let f = RawFunction::new(
            0x100,
            BTreeSet::from(["foo".to_string()]),
            vec![0; 8],
            vec![region(RegionKind::Code, 0, 4), region(RegionKind::Data, 6, 8)],
        );
        assert!(f.is_err());
    }

    #[test]
    fn first_region_must_be_code() {
        let f = RawFunction::new(
            0x100,
            BTreeSet::from(["foo".to_string()]),
            vec![0; 4],
            vec![region(RegionKind::Data, 0, 4)],
        );
        assert!(f.is_err());
    }

    #[test]
    fn duplicate_names_accumulate_into_one_set() {
        let mut functions = FunctionIndex::<RawFunction>::new(vec![RawFunction::new(
            0x200,
            BTreeSet::from(["a".to_string(), "b".to_string()]),
            vec![0; 2],
            vec![region(RegionKind::Code, 0, 2)],
        )
        .unwrap()]);
        assert!(functions.get_by_name("a").is_some());
        assert!(functions.get_by_name("b").is_some());
        assert_eq!(functions.len(), 1);
        functions = FunctionIndex::<RawFunction>::new(vec![]);
        assert!(functions.is_empty());
    }
}
