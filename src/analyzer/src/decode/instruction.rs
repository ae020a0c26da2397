//! The ARMv6-M Thumb instruction set as a single tagged variant (spec §9,
//! "Instruction hierarchy" design note): one enum, each arm carrying only
//! the operands it actually has. Shared behavior (size, write set) is
//! match-dispatched rather than expressed through a trait hierarchy.

use bitflags::bitflags;

/// A 4-bit register index, 0..=15. Low-register (3-bit) encodings are
/// widened to this on decode.
pub type Reg = u8;

pub const R_SP: Reg = 13;
pub const R_LR: Reg = 14;
pub const R_PC: Reg = 15;

bitflags! {
    /// The set of 4-bit registers an instruction writes. This is the only
    /// semantic summary later stages consume from the decoder (spec §4.1).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WriteSet: u16 {
        const R0 = 1 << 0;
        const R1 = 1 << 1;
        const R2 = 1 << 2;
        const R3 = 1 << 3;
        const R4 = 1 << 4;
        const R5 = 1 << 5;
        const R6 = 1 << 6;
        const R7 = 1 << 7;
        const R8 = 1 << 8;
        const R9 = 1 << 9;
        const R10 = 1 << 10;
        const R11 = 1 << 11;
        const R12 = 1 << 12;
        const SP = 1 << 13;
        const LR = 1 << 14;
        const PC = 1 << 15;
    }
}

impl WriteSet {
    pub fn of(reg: Reg) -> Self {
        Self::from_bits_truncate(1 << reg)
    }

    pub fn of_list(regs: impl IntoIterator<Item = Reg>) -> Self {
        regs.into_iter().fold(Self::empty(), |set, reg| set | Self::of(reg))
    }

    /// Register-list bitmask as used by LDM/STM/PUSH/POP, `bit i` = `Ri`.
    pub fn of_mask(mask: u16) -> Self {
        Self::from_bits_truncate(mask)
    }

    pub fn writes_pc(self) -> bool {
        self.contains(Self::PC)
    }

    pub fn writes_sp(self) -> bool {
        self.contains(Self::SP)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Eq,
    Ne,
    Cs,
    Cc,
    Mi,
    Pl,
    Vs,
    Vc,
    Hi,
    Ls,
    Ge,
    Lt,
    Gt,
    Le,
}

impl Condition {
    pub fn decode(bits: u8) -> Option<Self> {
        use Condition::*;
        Some(match bits {
            0b0000 => Eq,
            0b0001 => Ne,
            0b0010 => Cs,
            0b0011 => Cc,
            0b0100 => Mi,
            0b0101 => Pl,
            0b0110 => Vs,
            0b0111 => Vc,
            0b1000 => Hi,
            0b1001 => Ls,
            0b1010 => Ge,
            0b1011 => Lt,
            0b1100 => Gt,
            0b1101 => Le,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shift {
    Lsl,
    Lsr,
    Asr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    And,
    Eor,
    Lsl,
    Lsr,
    Asr,
    Adc,
    Sbc,
    Ror,
    Tst,
    Rsb,
    Cmp,
    Cmn,
    Orr,
    Mul,
    Bic,
    Mvn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStoreWidth {
    Word,
    HalfWord,
    Byte,
    SignedHalfWord,
    SignedByte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysReg {
    Apsr,
    Msp,
    Psp,
    Primask,
    Control,
    Other(u8),
}

/// The fixed encoded size of an instruction, in bytes: always 2 or 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Size {
    Half = 2,
    Word = 4,
}

impl Size {
    pub fn bytes(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    // --- arithmetic / logic / shift ---
    ShiftImm { op: Shift, rd: Reg, rm: Reg, imm: u8 },
    AddReg3 { rd: Reg, rn: Reg, rm: Reg },
    SubReg3 { rd: Reg, rn: Reg, rm: Reg },
    AddImm3 { rd: Reg, rn: Reg, imm: u8 },
    SubImm3 { rd: Reg, rn: Reg, imm: u8 },
    MovImm8 { rd: Reg, imm: u8 },
    CmpImm8 { rn: Reg, imm: u8 },
    AddImm8 { rdn: Reg, imm: u8 },
    SubImm8 { rdn: Reg, imm: u8 },
    DataProcessingReg { op: AluOp, rdn: Reg, rm: Reg },
    AddHi { rdn: Reg, rm: Reg },
    CmpHi { rn: Reg, rm: Reg },
    MovHi { rd: Reg, rm: Reg },

    // --- branches / calls / returns ---
    Bx { rm: Reg },
    Blx { rm: Reg },
    BCond { cond: Condition, imm: i32 },
    BUncond { imm: i32 },
    Bl { imm: i32 },
    AddPcReg { rm: Reg }, // ADD PC, Rm (T2, Rdn = PC) -- computed branch
    AddSpPcReg { rm: Reg }, // ADD PC, SP -- unsupported form (Rm = SP)

    // --- loads / stores ---
    LdrLiteral { rt: Reg, imm: u16 },
    LoadStoreReg { width: LoadStoreWidth, load: bool, rt: Reg, rn: Reg, rm: Reg },
    LoadStoreImm { width: LoadStoreWidth, load: bool, rt: Reg, rn: Reg, imm: u16 },
    LoadStoreSp { load: bool, rt: Reg, imm: u16 },
    Adr { rd: Reg, imm: u16 },
    AddSpImmToReg { rd: Reg, imm: u16 },
    Ldm { rn: Reg, regs: u16 },
    Stm { rn: Reg, regs: u16 },
    Push { regs: u16, lr: bool },
    Pop { regs: u16, pc: bool },

    // --- sp adjustment ---
    AddSpImm { imm: u16 },
    SubSpImm { imm: u16 },
    AddSpReg { rm: Reg }, // ADD SP, Rm -- unsupported SP-affecting form
    MovSpReg { rd: Reg, rm: Reg }, // MOV SP, Rm / MOV Rd, SP

    // --- misc ---
    Sxtb { rd: Reg, rm: Reg },
    Sxth { rd: Reg, rm: Reg },
    Uxtb { rd: Reg, rm: Reg },
    Uxth { rd: Reg, rm: Reg },
    Rev { rd: Reg, rm: Reg },
    Rev16 { rd: Reg, rm: Reg },
    Revsh { rd: Reg, rm: Reg },
    Cps { enable: bool },
    Nop,
    Yield,
    Wfe,
    Wfi,
    Sev,
    Svc { imm: u8 },
    Udf { imm: u16 },
    Bkpt { imm: u8 },
    Mrs { rd: Reg, sysreg: SysReg },
    Msr { sysreg: SysReg, rn: Reg },
    Dmb,
    Dsb,
    Isb,
}

impl Instruction {
    pub fn size(&self) -> Size {
        use Instruction::*;
        match self {
            Bl { .. } | Mrs { .. } | Msr { .. } | Dmb | Dsb | Isb => Size::Word,
            _ => Size::Half,
        }
    }

    /// The set of registers this instruction writes (spec §4.1, "the only
    /// semantic summary consumed by later stages").
    pub fn write_set(&self) -> WriteSet {
        use Instruction::*;
        match *self {
            ShiftImm { rd, .. } | AddReg3 { rd, .. } | SubReg3 { rd, .. } | AddImm3 { rd, .. } | SubImm3 { rd, .. } => {
                WriteSet::of(rd)
            }
            MovImm8 { rd, .. } => WriteSet::of(rd),
            CmpImm8 { .. } | CmpHi { .. } => WriteSet::empty(),
            AddImm8 { rdn, .. } | SubImm8 { rdn, .. } => WriteSet::of(rdn),
            DataProcessingReg { op, rdn, .. } => match op {
                AluOp::Tst | AluOp::Cmp | AluOp::Cmn => WriteSet::empty(),
                _ => WriteSet::of(rdn),
            },
            AddHi { rdn, .. } => WriteSet::of(rdn),
            MovHi { rd, .. } => WriteSet::of(rd),
            Bx { .. } => WriteSet::of(R_PC),
            Blx { rm: _ } => WriteSet::of(R_LR) | WriteSet::of(R_PC),
            BCond { .. } | BUncond { .. } => WriteSet::of(R_PC),
            Bl { .. } => WriteSet::of(R_LR) | WriteSet::of(R_PC),
            AddPcReg { .. } | AddSpPcReg { .. } => WriteSet::of(R_PC),
            LdrLiteral { rt, .. } => WriteSet::of(rt),
            LoadStoreReg { load, rt, .. } | LoadStoreImm { load, rt, .. } | LoadStoreSp { load, rt, .. } => {
                if load {
                    WriteSet::of(rt)
                } else {
                    WriteSet::empty()
                }
            }
            Adr { rd, .. } => WriteSet::of(rd),
            AddSpImmToReg { rd, .. } => WriteSet::of(rd),
            Ldm { regs, .. } => WriteSet::of_mask(regs),
            Stm { .. } => WriteSet::empty(),
            Push { .. } => WriteSet::empty(),
            Pop { regs, pc } => WriteSet::of_mask(regs) | if pc { WriteSet::of(R_PC) } else { WriteSet::empty() },
            AddSpImm { .. } | SubSpImm { .. } | AddSpReg { .. } => WriteSet::of(R_SP),
            MovSpReg { rd, .. } => WriteSet::of(rd),
            Sxtb { rd, .. } | Sxth { rd, .. } | Uxtb { rd, .. } | Uxth { rd, .. } => WriteSet::of(rd),
            Rev { rd, .. } | Rev16 { rd, .. } | Revsh { rd, .. } => WriteSet::of(rd),
            Cps { .. } | Nop | Yield | Wfe | Wfi | Sev | Svc { .. } | Udf { .. } | Bkpt { .. } | Dmb | Dsb | Isb => {
                WriteSet::empty()
            }
            Mrs { rd, .. } => WriteSet::of(rd),
            Msr { .. } => WriteSet::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_set_excludes_pc_for_ordinary_moves() {
        let insn = Instruction::MovImm8 { rd: 3, imm: 0x2a };
        assert_eq!(insn.write_set(), WriteSet::of(3));
        assert!(!insn.write_set().writes_pc());
    }

    #[test]
    fn pop_pc_writes_pc() {
        let insn = Instruction::Pop { regs: WriteSet::R4.bits(), pc: true };
        assert!(insn.write_set().writes_pc());
    }

    #[test]
    fn bl_writes_lr_and_pc() {
        let insn = Instruction::Bl { imm: 4 };
        assert_eq!(insn.write_set(), WriteSet::LR | WriteSet::PC);
        assert_eq!(insn.size().bytes(), 4);
    }

    #[test]
    fn compare_and_test_do_not_write() {
        assert_eq!(Instruction::CmpImm8 { rn: 0, imm: 1 }.write_set(), WriteSet::empty());
        assert_eq!(
            Instruction::DataProcessingReg { op: AluOp::Tst, rdn: 0, rm: 1 }.write_set(),
            WriteSet::empty()
        );
    }
}
