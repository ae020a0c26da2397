//! PC-effect classification (spec §4.3), including the jump-table (§4.3.1)
//! and BLX (§4.3.2) resolvers.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::cursor::InstructionCursor;
use crate::decode::Instruction;
use crate::decode::instruction::{LoadStoreWidth, R_LR, R_PC};
use crate::error::{Error, Result};
use crate::model::{Address, Offset, clear_thumb_bit};

/// Targets of a BLX whose address literal can't be resolved by a register's
/// write-site, keyed by the absolute address of the BLX instruction.
pub type CallOverrides = BTreeMap<Address, BTreeSet<Address>>;

/// The classifier's verdict for one instruction. `None` (the function
/// return type, not a variant here) means ordinary fall-through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PcEffect {
    Branch { conditional: bool, targets: BTreeSet<Offset> },
    Call { targets: BTreeSet<Address> },
    Return,
    Invalid,
}

/// Classifies one instruction's effect on control flow.
///
/// `function_address` is the function's load address (for absolute-target
/// arithmetic); `overrides` supplies user-specified BLX targets keyed by
/// the BLX instruction's absolute address.
pub fn classify(cursor: InstructionCursor<'_, '_>, function_address: Address, overrides: &CallOverrides) -> Result<Option<PcEffect>> {
    let offset = cursor.offset();
    let instruction = cursor.instruction();

    match *instruction {
        Instruction::BCond { cond: _, imm } => {
            let target = offset_from_pc_relative(offset, imm);
            Ok(Some(PcEffect::Branch { conditional: true, targets: BTreeSet::from([target]) }))
        }
        Instruction::BUncond { imm } => {
            let target = offset_from_pc_relative(offset, imm);
            Ok(Some(PcEffect::Branch { conditional: false, targets: BTreeSet::from([target]) }))
        }
        Instruction::Bl { imm } => {
            let absolute = function_address.wrapping_add(offset).wrapping_add(4).wrapping_add(imm as u32);
            Ok(Some(PcEffect::Call { targets: BTreeSet::from([clear_thumb_bit(absolute)]) }))
        }
        Instruction::Bx { rm } => {
            if rm == R_LR {
                Ok(Some(PcEffect::Return))
            } else {
                Err(unsupported(cursor, "BX Rm where Rm is not LR (tail call or computed return)"))
            }
        }
        Instruction::MovHi { rd, rm } if rd == R_PC => {
            if rm == R_LR {
                Ok(Some(PcEffect::Return))
            } else {
                Err(unsupported(cursor, "MOV PC, Rm where Rm is not LR"))
            }
        }
        Instruction::Pop { pc: true, .. } => Ok(Some(PcEffect::Return)),
        Instruction::Udf { .. } => Ok(Some(PcEffect::Invalid)),
        Instruction::AddPcReg { rm } => resolve_jump_table(cursor, rm).map(Some),
        Instruction::Blx { rm } => resolve_blx(cursor, function_address, rm, overrides).map(Some),
        Instruction::AddSpPcReg { .. } => Err(unsupported(cursor, "ADD PC, SP")),
        _ => {
            if instruction.write_set().writes_pc() {
                crate::error::table_drift("instruction writes PC but is not a recognized PC-effect form", function_address + offset)
            }
            Ok(None)
        }
    }
}

fn offset_from_pc_relative(offset: Offset, imm: i32) -> Offset {
    ((offset as i64) + 4 + imm as i64) as Offset
}

fn unsupported(cursor: InstructionCursor<'_, '_>, message: &str) -> Error {
    Error::Resolution {
        function: String::new(),
        offset: cursor.offset(),
        message: format!(
            "{message}; this program may rely on RTOS multi-stack switching, dynamic stack allocation, or \
             tail-call optimization, none of which are supported"
        ),
    }
}

/// Inverts the canonical jump-table epilogue (spec §4.3.1):
/// `ADD Rn,PC; LDR{B|H} Rn,[Rn,#4]; LSLS Rn,Rn,#1; ADD PC,Rn`.
fn resolve_jump_table(cursor: InstructionCursor<'_, '_>, table_reg: u8) -> Result<PcEffect> {
    let lsls = cursor.previous().ok_or_else(|| resolution_error(cursor, "jump table: missing LSLS predecessor"))?;
    let ldr = lsls.previous().ok_or_else(|| resolution_error(cursor, "jump table: missing LDR predecessor"))?;
    let add = ldr.previous().ok_or_else(|| resolution_error(cursor, "jump table: missing ADD Rn,PC predecessor"))?;

    let Instruction::ShiftImm { op: crate::decode::instruction::Shift::Lsl, rd: lsl_rd, rm: lsl_rm, imm: 1 } =
        *lsls.instruction()
    else {
        return Err(resolution_error(cursor, "jump table: predecessor is not LSLS Rn, Rn, #1"));
    };
    if lsl_rd != table_reg || lsl_rm != table_reg {
        return Err(resolution_error(cursor, "jump table: LSLS does not operate on the table register"));
    }

    let (ldr_rt, ldr_rn, width) = match *ldr.instruction() {
        Instruction::LoadStoreImm { load: true, rt, rn, width, .. } if matches!(width, LoadStoreWidth::Byte | LoadStoreWidth::HalfWord) => {
            (rt, rn, width)
        }
        _ => return Err(resolution_error(cursor, "jump table: predecessor is not LDRB/LDRH Rn,[Rn,#4]")),
    };
    if ldr_rt != table_reg || ldr_rn != table_reg {
        return Err(resolution_error(cursor, "jump table: LDR does not operate on the table register"));
    }

    match *add.instruction() {
        Instruction::AddHi { rdn, rm } if rdn == table_reg && rm == R_PC => {}
        _ => return Err(resolution_error(cursor, "jump table: predecessor is not ADD Rn, PC")),
    }

    let data_cursor = add.body_data_region_at(ldr.end_offset()).ok_or_else(|| {
        resolution_error(cursor, "jump table: no DATA region immediately after the LDR instruction")
    })?;

    let mut targets = BTreeSet::new();
    let mut data_cursor = data_cursor;
    loop {
        let read = match width {
            LoadStoreWidth::Byte => data_cursor.read_u8().map(|(v, c)| (v as u32, c)),
            LoadStoreWidth::HalfWord => data_cursor.read_u16().map(|(v, c)| (v as u32, c)),
            _ => unreachable!(),
        };
        let Some((element, next)) = read else { break };
        if element != 0 {
            let target = (cursor.offset() as i64 + 4 + element as i64 * 2) as Offset;
            targets.insert(target);
        }
        data_cursor = next;
    }

    if targets.is_empty() {
        return Err(resolution_error(cursor, "jump table: no non-zero entries found"));
    }
    Ok(PcEffect::Branch { conditional: false, targets })
}

/// Resolves a `BLX Rm` computed call (spec §4.3.2).
fn resolve_blx(
    cursor: InstructionCursor<'_, '_>,
    function_address: Address,
    reg: u8,
    overrides: &CallOverrides,
) -> Result<PcEffect> {
    let mut targets = BTreeSet::new();

    if let Some(literal_target) = resolve_blx_literal(cursor, reg)? {
        targets.insert(literal_target);
    }

    let absolute = function_address + cursor.offset();
    if let Some(override_targets) = overrides.get(&absolute) {
        targets.extend(override_targets.iter().copied());
    }

    if targets.is_empty() {
        return Err(Error::Resolution {
            function: String::new(),
            offset: cursor.offset(),
            message: "BLX target could not be resolved statically; supply a call_overrides entry for this address"
                .to_string(),
        });
    }
    Ok(PcEffect::Call { targets })
}

fn resolve_blx_literal(cursor: InstructionCursor<'_, '_>, reg: u8) -> Result<Option<Address>> {
    let mut walk = cursor.previous();
    let writer = loop {
        let Some(candidate) = walk else {
            return Ok(None);
        };
        if candidate.instruction().write_set().contains(crate::decode::instruction::WriteSet::of(reg)) {
            break candidate;
        }
        walk = candidate.previous();
    };

    let Instruction::LdrLiteral { rt, imm } = *writer.instruction() else {
        return Ok(None);
    };
    if rt != reg {
        return Ok(None);
    }

    let data_offset = writer.offset() + 4 + imm as u32;
    let Some(data_cursor) = writer.body_data_region_at(data_offset) else {
        return Err(resolution_error(cursor, "BLX: literal pool offset is not inside a DATA region"));
    };
    let Some((value, _)) = data_cursor.read_u32() else {
        return Err(resolution_error(cursor, "BLX: literal pool read overruns its DATA region"));
    };
    if value & 1 == 0 {
        return Err(resolution_error(cursor, "BLX: literal target has the Thumb bit clear"));
    }
    Ok(Some(clear_thumb_bit(value)))
}

fn resolution_error(cursor: InstructionCursor<'_, '_>, message: &str) -> Error {
    Error::Resolution { function: String::new(), offset: cursor.offset(), message: message.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::FunctionBody;
    use crate::model::{Region, RegionKind};

    #[test]
    fn bcond_targets_pc_relative_offset() {
        let instructions = vec![(0, Instruction::BCond { cond: crate::decode::instruction::Condition::Eq, imm: 4 })];
        let bytes = vec![0u8; 2];
        let regions = vec![Region { kind: RegionKind::Code, start: 0, end: 2 }];
        let body = FunctionBody::new(&instructions, &bytes, &regions);
        let cursor = body.first_instruction_cursor().unwrap();
        let effect = classify(cursor, 0x100, &CallOverrides::new()).unwrap().unwrap();
        assert_eq!(effect, PcEffect::Branch { conditional: true, targets: BTreeSet::from([8]) });
    }

    #[test]
    fn bl_computes_absolute_callee() {
        let instructions = vec![(0, Instruction::Bl { imm: 0x100 })];
        let bytes = vec![0u8; 4];
        let regions = vec![Region { kind: RegionKind::Code, start: 0, end: 4 }];
        let body = FunctionBody::new(&instructions, &bytes, &regions);
        let cursor = body.first_instruction_cursor().unwrap();
        let effect = classify(cursor, 0x200, &CallOverrides::new()).unwrap().unwrap();
        assert_eq!(effect, PcEffect::Call { targets: BTreeSet::from([0x304]) });
    }

    #[test]
    fn bx_lr_is_return() {
        let instructions = vec![(0, Instruction::Bx { rm: R_LR })];
        let bytes = vec![0u8; 2];
        let regions = vec![Region { kind: RegionKind::Code, start: 0, end: 2 }];
        let body = FunctionBody::new(&instructions, &bytes, &regions);
        let cursor = body.first_instruction_cursor().unwrap();
        assert_eq!(classify(cursor, 0, &CallOverrides::new()).unwrap(), Some(PcEffect::Return));
    }

    #[test]
    fn bx_non_lr_is_rejected() {
        let instructions = vec![(0, Instruction::Bx { rm: 3 })];
        let bytes = vec![0u8; 2];
        let regions = vec![Region { kind: RegionKind::Code, start: 0, end: 2 }];
        let body = FunctionBody::new(&instructions, &bytes, &regions);
        let cursor = body.first_instruction_cursor().unwrap();
        assert!(classify(cursor, 0, &CallOverrides::new()).is_err());
    }
}
