//! Entry point for turning a function's CODE-region bytes into a typed
//! instruction stream (spec §4.1).

pub mod instruction;
mod thumb16;
mod thumb32;

pub use instruction::Instruction;

use crate::error::{DecodeErrorKind, Error, Result};
use crate::model::Offset;

/// One decoded instruction together with the function-relative offset of
/// its first byte.
#[derive(Debug, Clone)]
pub struct DecodedInstruction {
    pub offset: Offset,
    pub instruction: Instruction,
}

/// Decodes every instruction in `bytes` starting at relative offset 0.
///
/// Reports every offending opcode via `diagnostics` rather than stopping at
/// the first bad instruction (spec §7, "per-instruction errors ... are
/// batched"); returns `Err` only once the whole region has been scanned.
pub fn decode_region(function: &str, region_offset: Offset, bytes: &[u8]) -> Result<Vec<DecodedInstruction>> {
    let mut out = Vec::new();
    let mut diagnostics = crate::error::Diagnostics::new();
    let mut cursor = 0usize;

    while cursor < bytes.len() {
        let offset = region_offset + cursor as u32;
        let remaining = &bytes[cursor..];
        if remaining.len() < 2 {
            diagnostics.push(Some(function), Some(offset), "truncated instruction at end of code region");
            break;
        }
        let half1 = u16::from_le_bytes([remaining[0], remaining[1]]);
        let top5 = half1 >> 11;
        let is_32bit = matches!(top5, 0b11101 | 0b11110 | 0b11111);

        if !is_32bit {
            match thumb16::decode(half1) {
                Ok(instruction) => {
                    out.push(DecodedInstruction { offset, instruction });
                    cursor += 2;
                }
                Err(kind) => {
                    diagnostics.push(Some(function), Some(offset), format!("{kind} (opcode {:#06x})", half1));
                    cursor += 2;
                }
            }
            continue;
        }

        if remaining.len() < 4 {
            diagnostics.push(Some(function), Some(offset), format!("{} (opcode {:#06x})", DecodeErrorKind::Truncated, half1));
            break;
        }
        let half2 = u16::from_le_bytes([remaining[2], remaining[3]]);
        let word = ((half1 as u32) << 16) | half2 as u32;
        match thumb32::decode(word, half1, half2) {
            Ok(instruction) => {
                out.push(DecodedInstruction { offset, instruction });
                cursor += 4;
            }
            Err(kind) => {
                diagnostics.push(Some(function), Some(offset), format!("{kind} (opcode {word:#010x})"));
                cursor += 4;
            }
        }
    }

    diagnostics.into_result()?;

    let total: u32 = out.iter().map(|d| d.instruction.size().bytes()).sum();
    if total as usize != bytes.len() {
        return Err(Error::Analysis {
            function: function.to_string(),
            message: format!("decoded {total:#x} bytes, code region is {:#x}", bytes.len()),
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_leaf_function() {
        // PUSH {R4,LR}; MOVS R0,#0x2A; POP {R4,PC}
        let bytes: [u8; 6] = [0x10, 0xb5, 0x2a, 0x20, 0x10, 0xbd];
        let instructions = decode_region("foo", 0, &bytes).unwrap();
        assert_eq!(instructions.len(), 3);
        assert_eq!(instructions[0].offset, 0);
        assert_eq!(instructions[1].offset, 2);
        assert_eq!(instructions[2].offset, 4);
    }

    #[test]
    fn truncated_32bit_encoding_is_rejected() {
        let bytes: [u8; 2] = [0x00, 0xf0]; // BL prefix half-word with nothing after it
        assert!(decode_region("foo", 0, &bytes).is_err());
    }
}
