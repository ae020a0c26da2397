//! SP-effect resolution (spec §4.4): the signed stack delta each instruction
//! produces, or rejection for the unsupported SP-affecting forms.

use crate::cursor::InstructionCursor;
use crate::decode::Instruction;
use crate::decode::instruction::R_SP;
use crate::error::{Error, Result};

/// Resolves the stack-pointer delta of one instruction. `None` means the
/// instruction does not affect SP.
pub fn resolve(cursor: InstructionCursor<'_, '_>) -> Result<Option<i32>> {
    let instruction = cursor.instruction();
    match *instruction {
        Instruction::AddSpImm { imm } => Ok(Some(imm as i32)),
        Instruction::SubSpImm { imm } => Ok(Some(-(imm as i32))),
        Instruction::Push { regs, lr } => {
            let count = regs.count_ones() + lr as u32;
            Ok(Some(-4 * count as i32))
        }
        Instruction::Pop { regs, pc } => {
            let count = regs.count_ones() + pc as u32;
            Ok(Some(4 * count as i32))
        }
        Instruction::AddSpReg { .. } => Err(unsupported(cursor, "ADD SP, Rm")),
        Instruction::MovSpReg { rd, .. } if rd == R_SP => Err(unsupported(cursor, "MOV SP, Rm")),
        Instruction::Msr { sysreg, .. } => match sysreg {
            crate::decode::instruction::SysReg::Msp
            | crate::decode::instruction::SysReg::Psp
            | crate::decode::instruction::SysReg::Control => Err(unsupported(cursor, "MSR MSP/PSP/CONTROL")),
            _ => Ok(None),
        },
        _ => {
            if instruction.write_set().writes_sp() {
                crate::error::table_drift("instruction writes SP but is not a recognized SP-effect form", cursor.offset());
            }
            Ok(None)
        }
    }
}

fn unsupported(cursor: InstructionCursor<'_, '_>, message: &str) -> Error {
    Error::UnsupportedSp {
        function: String::new(),
        offset: cursor.offset(),
        message: format!(
            "{message}; likely caused by RTOS multi-stack switching, dynamic stack allocation, or \
             stack-pointer switching, none of which are supported"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::FunctionBody;
    use crate::model::{Region, RegionKind};

    fn single_instruction(instruction: Instruction) -> (Vec<(u32, Instruction)>, Vec<u8>, Vec<Region>) {
        let size = instruction.size().bytes();
        (vec![(0, instruction)], vec![0; size as usize], vec![Region { kind: RegionKind::Code, start: 0, end: size }])
    }

    #[test]
    fn push_with_lr_subtracts_four_per_register() {
        let (instructions, bytes, regions) = single_instruction(Instruction::Push { regs: 0b0001_0000, lr: true });
        let body = FunctionBody::new(&instructions, &bytes, &regions);
        let cursor = body.first_instruction_cursor().unwrap();
        assert_eq!(resolve(cursor).unwrap(), Some(-8));
    }

    #[test]
    fn pop_with_pc_adds_four_per_register() {
        let (instructions, bytes, regions) = single_instruction(Instruction::Pop { regs: 0b0001_0000, pc: true });
        let body = FunctionBody::new(&instructions, &bytes, &regions);
        let cursor = body.first_instruction_cursor().unwrap();
        assert_eq!(resolve(cursor).unwrap(), Some(8));
    }

    #[test]
    fn mov_sp_reg_is_rejected() {
        let (instructions, bytes, regions) = single_instruction(Instruction::MovSpReg { rd: R_SP, rm: 3 });
        let body = FunctionBody::new(&instructions, &bytes, &regions);
        let cursor = body.first_instruction_cursor().unwrap();
        assert!(resolve(cursor).is_err());
    }

    #[test]
    fn ordinary_instruction_has_no_sp_effect() {
        let (instructions, bytes, regions) = single_instruction(Instruction::Nop);
        let body = FunctionBody::new(&instructions, &bytes, &regions);
        let cursor = body.first_instruction_cursor().unwrap();
        assert_eq!(resolve(cursor).unwrap(), None);
    }
}
