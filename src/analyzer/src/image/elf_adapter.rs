//! Symbol-table-driven function extraction (spec §6).
//!
//! Function boundaries, names, and CODE/DATA regions all come from
//! `.symtab`: `STT_FUNC` symbols give addresses/sizes/names, and the
//! `$t`/`$d` ARM mapping symbols split each function's bytes into typed
//! regions. There is deliberately no disassembly-driven region inference —
//! the compiler already recorded the answer.

use std::collections::{BTreeMap, BTreeSet};

use elf::abi;
use elf::endian::AnyEndian;
use elf::ElfBytes;

use crate::demangle;
use crate::error::{Error, Result};
use crate::model::{Address, RawFunction, Region, RegionKind};

const EF_ARM_EABI_VER5: u32 = 0x0500_0000;
const EF_ARM_EABIMASK: u32 = 0xFF00_0000;

pub struct ParsedElf {
    pub functions: Vec<RawFunction>,
    pub vector_table: Vec<u8>,
}

/// Parses the whole executable: validates the format (spec §6's "Input
/// executable" expectations), then extracts functions and the vector table
/// section's raw bytes.
pub fn parse_functions(bytes: &[u8]) -> Result<ParsedElf> {
    validate_header(bytes)?;

    let elf = ElfBytes::<AnyEndian>::minimal_parse(bytes).map_err(|e| Error::InputFormat(format!("malformed ELF: {e}")))?;

    if elf.ehdr.e_type != abi::ET_EXEC {
        return Err(Error::InputFormat(format!("expected ET_EXEC, found e_type {:#x}", elf.ehdr.e_type)));
    }
    if elf.ehdr.e_machine != abi::EM_ARM {
        return Err(Error::InputFormat(format!("expected EM_ARM, found e_machine {:#x}", elf.ehdr.e_machine)));
    }
    if elf.ehdr.e_flags & EF_ARM_EABIMASK != EF_ARM_EABI_VER5 {
        return Err(Error::InputFormat(format!("expected EABI v5, found e_flags {:#010x}", elf.ehdr.e_flags)));
    }

    let (section_headers, string_table) =
        elf.section_headers_with_strtab().map_err(|e| Error::InputFormat(format!("missing section header string table: {e}")))?;
    let section_headers = section_headers.ok_or_else(|| Error::InputFormat("ELF has no section headers".into()))?;
    let string_table = string_table.ok_or_else(|| Error::InputFormat("ELF has no section header string table".into()))?;

    let vector_table = read_vector_table_section(&elf, &section_headers, &string_table)?;
    let (text, text_address) = read_text_section(&elf, &section_headers, &string_table)?;

    let (symbol_table, symbol_strings) = elf
        .symbol_table()
        .map_err(|e| Error::InputFormat(format!("malformed symbol table: {e}")))?
        .ok_or_else(|| {
            Error::InputFormat(
                "missing .symtab: this tool requires an unstripped executable (stripping doesn't affect the \
                 flashed binary; strip after analysis if desired)"
                    .into(),
            )
        })?;

    let mut mapping_symbols: BTreeMap<Address, RegionKind> = BTreeMap::new();
    let mut functions_by_address: BTreeMap<Address, (u64, BTreeSet<String>)> = BTreeMap::new();

    for symbol in symbol_table.iter() {
        let name = symbol_strings.get(symbol.st_name as usize).unwrap_or("");

        match name {
            "$t" | "$d" => {
                if symbol.st_symtype() != abi::STT_NOTYPE {
                    return Err(Error::InputFormat(format!("mapping symbol {name} at {:#x} is not STT_NOTYPE", symbol.st_value)));
                }
                if symbol.st_value % 2 != 0 {
                    return Err(Error::InputFormat(format!("unaligned mapping symbol {name} at {:#x}", symbol.st_value)));
                }
                let kind = if name == "$t" { RegionKind::Code } else { RegionKind::Data };
                if mapping_symbols.insert(symbol.st_value as Address, kind).is_some() {
                    return Err(Error::InputFormat(format!("duplicate code/data marker at {:#x}", symbol.st_value)));
                }
            }
            _ => {
                if symbol.st_symtype() != abi::STT_FUNC {
                    continue;
                }
                if symbol.st_value & 1 != 1 {
                    return Err(Error::InputFormat(format!("thumb bit not set for function `{name}` at {:#x}", symbol.st_value)));
                }
                let address = (symbol.st_value as Address) & !1;
                if symbol.st_size == 0 {
                    continue;
                }

                let demangled = demangle::demangle(name);
                match functions_by_address.get_mut(&address) {
                    Some((size, names)) => {
                        if *size != symbol.st_size {
                            return Err(Error::InputFormat(format!("size mismatch between symbols at {address:#x}")));
                        }
                        names.insert(demangled);
                    }
                    None => {
                        functions_by_address.insert(address, (symbol.st_size, BTreeSet::from([demangled])));
                    }
                }
            }
        }
    }

    let mut seen_names: BTreeSet<String> = BTreeSet::new();
    let mut functions = Vec::with_capacity(functions_by_address.len());
    let mut previous_end: Option<Address> = None;

    for (address, (size, names)) in &functions_by_address {
        if let Some(previous_end) = previous_end {
            if *address < previous_end {
                return Err(Error::InputFormat(format!("function at {address:#x} overlaps the previous function")));
            }
        }
        previous_end = Some(address + *size as Address);

        for name in names {
            if !seen_names.insert(name.clone()) {
                return Err(Error::InputFormat(format!("duplicate function name `{name}`")));
            }
        }

        if *address < text_address || (*address + *size as Address) as usize > text_address as usize + text.len() {
            return Err(Error::InputFormat(format!("function at {address:#x} falls outside `.text`")));
        }
        let start = (*address - text_address) as usize;
        let end = start + *size as usize;
        let function_bytes = text[start..end].to_vec();

        let regions = resolve_regions(*address, *size as u32, &mapping_symbols)?;
        let function = RawFunction::new(*address, names.clone(), function_bytes, regions)
            .map_err(|message| Error::InputFormat(format!("function at {address:#x}: {message}")))?;
        functions.push(function);
    }

    Ok(ParsedElf { functions, vector_table })
}

fn resolve_regions(address: Address, size: u32, mapping_symbols: &BTreeMap<Address, RegionKind>) -> Result<Vec<Region>> {
    let markers: Vec<(Address, RegionKind)> = mapping_symbols
        .range(address..address + size)
        .map(|(addr, kind)| (*addr - address, *kind))
        .collect();

    let markers = if markers.is_empty() {
        // GCC sometimes omits mapping symbols for trivial functions; treat
        // the whole function as CODE.
        vec![(0, RegionKind::Code)]
    } else if markers[0] != (0, RegionKind::Code) {
        return Err(Error::InputFormat(format!("function at {address:#x} does not start with a code marker")));
    } else {
        markers
    };

    let mut regions = Vec::with_capacity(markers.len());
    for window in markers.windows(2) {
        regions.push(Region { kind: window[0].1, start: window[0].0, end: window[1].0 });
    }
    if let Some(&(last_offset, last_kind)) = markers.last() {
        regions.push(Region { kind: last_kind, start: last_offset, end: size });
    }
    Ok(regions)
}

const VECTOR_TABLE_SECTION_NAMES: [&str; 4] = [".vector_table", ".isr_vector", ".intvec", "VECTORS"];

fn read_vector_table_section(
    elf: &ElfBytes<AnyEndian>,
    section_headers: &elf::section::SectionHeaderTable<AnyEndian>,
    string_table: &elf::string_table::StringTable,
) -> Result<Vec<u8>> {
    let mut matches = Vec::new();
    for shdr in section_headers.iter() {
        let name = string_table.get(shdr.sh_name as usize).unwrap_or("");
        if VECTOR_TABLE_SECTION_NAMES.contains(&name) {
            matches.push((name, shdr));
        }
    }
    match matches.len() {
        0 => Err(Error::InputFormat(format!("no vector table section found (tried {VECTOR_TABLE_SECTION_NAMES:?})"))),
        1 => {
            let (_, shdr) = matches[0];
            let (data, _) = elf.section_data(&shdr).map_err(|e| Error::InputFormat(format!("unreadable vector table section: {e}")))?;
            Ok(data.to_vec())
        }
        _ => {
            let names: Vec<&str> = matches.iter().map(|(n, _)| *n).collect();
            Err(Error::InputFormat(format!("multiple vector table sections found: {names:?}")))
        }
    }
}

fn read_text_section<'d>(
    elf: &ElfBytes<'d, AnyEndian>,
    section_headers: &elf::section::SectionHeaderTable<AnyEndian>,
    string_table: &elf::string_table::StringTable,
) -> Result<(&'d [u8], Address)> {
    for shdr in section_headers.iter() {
        if string_table.get(shdr.sh_name as usize).unwrap_or("") == ".text" {
            let (data, _) = elf.section_data(&shdr).map_err(|e| Error::InputFormat(format!("unreadable .text section: {e}")))?;
            return Ok((data, shdr.sh_addr as Address));
        }
    }
    Err(Error::InputFormat("section `.text` is missing".into()))
}

fn validate_header(bytes: &[u8]) -> Result<()> {
    const EI_CLASS: usize = 4;
    const EI_DATA: usize = 5;
    const ELFCLASS32: u8 = 1;
    const ELFDATA2LSB: u8 = 1;

    if bytes.len() < 16 || &bytes[0..4] != b"\x7fELF" {
        return Err(Error::InputFormat("not an ELF file".into()));
    }
    if bytes[EI_CLASS] != ELFCLASS32 {
        return Err(Error::InputFormat("expected 32-bit ELF class".into()));
    }
    if bytes[EI_DATA] != ELFDATA2LSB {
        return Err(Error::InputFormat("expected little-endian ELF data encoding".into()));
    }
    Ok(())
}
