//! Thumb-32 decode table (ARMv6-M reference A5.3 subset).
//!
//! v6-M only allocates a handful of 32-bit encodings: `BL`, the barriers
//! `DMB`/`DSB`/`ISB`, and `MRS`/`MSR`. Everything else in the 32-bit space is
//! `Undefined` on this core.

use crate::error::DecodeErrorKind;

use super::instruction::{Instruction, SysReg};

type DecodeResult = Result<Instruction, DecodeErrorKind>;

fn bits(value: u32, hi: u32, lo: u32) -> u32 {
    let width = hi - lo + 1;
    (value >> lo) & ((1 << width) - 1)
}

fn sign_extend(value: i32, bits: u32) -> i32 {
    let shift = 32 - bits;
    (value << shift) >> shift
}

fn sysreg_from_sysm(sysm: u8) -> SysReg {
    match sysm {
        0 => SysReg::Apsr,
        8 => SysReg::Msp,
        9 => SysReg::Psp,
        16 => SysReg::Primask,
        20 => SysReg::Control,
        other => SysReg::Other(other),
    }
}

/// Decode a 32-bit instruction. `word` is `(half1 << 16) | half2`, i.e. the
/// first-encountered half-word occupies the upper 16 bits (spec §4.1).
pub fn decode(word: u32, half1: u16, half2: u16) -> DecodeResult {
    let op = bits(half1 as u32, 10, 4);
    let top5 = bits(half1 as u32, 15, 11);

    // BL T1: 11110 S imm10 | 11 J1 1 J2 imm11
    if top5 == 0b11110 && bits(half2 as u32, 15, 14) == 0b11 && bits(half2 as u32, 12, 12) == 1 {
        return decode_bl(half1, half2);
    }

    // Coprocessor/system instruction space used by MRS/MSR/barriers: the
    // first half-word is 1111 0011 1xxx xxxx.
    if half1 >> 9 == 0b1111001_11 {
        if half1 == 0xF3EF && bits(half2 as u32, 15, 12) == 0b1000 {
            let rd = bits(half2 as u32, 11, 8) as u8;
            let sysm = bits(half2 as u32, 7, 0) as u8;
            return Ok(Instruction::Mrs { rd, sysreg: sysreg_from_sysm(sysm) });
        }
        if (half1 & 0xFFF0) == 0xF380 && half2 & 0xFF00 == 0x8800 {
            let rn = (half1 & 0xF) as u8;
            let sysm = (half2 & 0xFF) as u8;
            return Ok(Instruction::Msr { sysreg: sysreg_from_sysm(sysm), rn });
        }
        if half1 == 0xF3BF {
            return match half2 & 0xFFF0 {
                0x8F40 => Ok(Instruction::Dsb),
                0x8F50 => Ok(Instruction::Dmb),
                0x8F60 => Ok(Instruction::Isb),
                _ => Err(DecodeErrorKind::Undefined),
            };
        }
    }

    let _ = (word, op);
    Err(DecodeErrorKind::Undefined)
}

fn decode_bl(half1: u16, half2: u16) -> DecodeResult {
    let s = bits(half1 as u32, 10, 10);
    let imm10 = bits(half1 as u32, 9, 0);
    let j1 = bits(half2 as u32, 13, 13);
    let j2 = bits(half2 as u32, 11, 11);
    let imm11 = bits(half2 as u32, 10, 0);

    let i1 = 1 - (j1 ^ s);
    let i2 = 1 - (j2 ^ s);
    let imm32 = (s << 24) | (i1 << 23) | (i2 << 22) | (imm10 << 12) | (imm11 << 1);
    let imm = sign_extend(imm32 as i32, 25);
    Ok(Instruction::Bl { imm })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_bl_forward() {
        // BL to pc+4+4 (imm = 4): S=0 imm10=0 J1=1 J2=1 imm11=0b00000000010
        let half1 = 0b11110_0_0000000000u16;
        let half2 = 0b11_1_1_1_00000000010u16;
        let word = ((half1 as u32) << 16) | half2 as u32;
        match decode(word, half1, half2).unwrap() {
            Instruction::Bl { imm } => assert_eq!(imm, 4),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn decodes_dmb_dsb_isb() {
        let half1 = 0xF3BFu16;
        assert_eq!(decode(0, half1, 0x8F40).unwrap(), Instruction::Dsb);
        assert_eq!(decode(0, half1, 0x8F50).unwrap(), Instruction::Dmb);
        assert_eq!(decode(0, half1, 0x8F60).unwrap(), Instruction::Isb);
    }

    #[test]
    fn decodes_mrs_msr() {
        let mrs = decode(0, 0xF3EF, 0x8009).unwrap();
        assert_eq!(mrs, Instruction::Mrs { rd: 0, sysreg: SysReg::Psp });

        let msr = decode(0, 0xF380 | 1, 0x8808).unwrap();
        assert_eq!(msr, Instruction::Msr { sysreg: SysReg::Msp, rn: 1 });
    }

    #[test]
    fn undefined_32bit_pattern_is_rejected() {
        assert!(decode(0, 0xE000, 0x0000).is_err());
    }
}
