//! Error taxonomy for the analysis pipeline (spec §7).
//!
//! Each stage gets its own error enum so that call sites can match on the
//! specific failure; [`Diagnostics`] batches per-function/per-instruction
//! failures so a whole pass can report every offender instead of bailing on
//! the first.

use std::fmt;

use crate::model::Address;

/// One offending opcode, instruction, or function, batched with its
/// siblings before the stage that produced it fails as a whole (spec §7,
/// "Propagation").
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub function: Option<String>,
    pub offset: Option<u32>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.function, self.offset) {
            (Some(name), Some(offset)) => write!(f, "{name}+{offset:#x}: {}", self.message),
            (Some(name), None) => write!(f, "{name}: {}", self.message),
            (None, _) => write!(f, "{}", self.message),
        }
    }
}

/// Accumulates [`Diagnostic`]s across a batch (e.g. every function in the
/// image, or every instruction in one function) and converts to a result
/// only at the stage boundary.
#[derive(Debug, Default)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, function: Option<&str>, offset: Option<u32>, message: impl Into<String>) {
        self.0.push(Diagnostic { function: function.map(str::to_owned), offset, message: message.into() });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_result(self) -> Result<()> {
        if self.0.is_empty() { Ok(()) } else { Err(Error::batch(self.0)) }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("input format: {0}")]
    InputFormat(String),

    #[error("decode error at {function}+{offset:#x}: {kind} (opcode {opcode:#06x})")]
    Decode { function: String, offset: u32, opcode: u32, kind: DecodeErrorKind },

    #[error("unresolvable control flow at {function}+{offset:#x}: {message}")]
    Resolution { function: String, offset: u32, message: String },

    #[error("unsupported stack-pointer effect at {function}+{offset:#x}: {message}")]
    UnsupportedSp { function: String, offset: u32, message: String },

    #[error("function {function} failed analysis: {message}")]
    Analysis { function: String, message: String },

    #[error("call-graph cycle involving: {joined}")]
    Cycle { names: Vec<String>, joined: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{count} diagnostics:\n{joined}")]
    Batch { diagnostics: Vec<Diagnostic>, count: usize, joined: String },
}

impl Error {
    /// Fills in the function name on errors raised before the caller knew
    /// which function it was analyzing (the resolvers work purely in terms
    /// of offsets).
    pub fn with_function(self, name: &str) -> Self {
        match self {
            Error::Decode { function, offset, opcode, kind } if function.is_empty() => {
                Error::Decode { function: name.to_string(), offset, opcode, kind }
            }
            Error::Resolution { function, offset, message } if function.is_empty() => {
                Error::Resolution { function: name.to_string(), offset, message }
            }
            Error::UnsupportedSp { function, offset, message } if function.is_empty() => {
                Error::UnsupportedSp { function: name.to_string(), offset, message }
            }
            Error::Analysis { function, message } if function.is_empty() => {
                Error::Analysis { function: name.to_string(), message }
            }
            other => other,
        }
    }

    pub fn cycle(names: Vec<String>) -> Self {
        let joined = names.join(", ");
        Self::Cycle { names, joined }
    }

    pub fn batch(diagnostics: Vec<Diagnostic>) -> Self {
        let count = diagnostics.len();
        let joined = diagnostics.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n");
        Self::Batch { diagnostics, count, joined }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// Bit pattern not allocated in the ARMv6-M subset.
    Undefined,
    /// Pattern allocated but operands forbidden by the ARM reference.
    Unpredictable,
    /// A 32-bit encoding's second half-word was missing.
    Truncated,
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecodeErrorKind::Undefined => "undefined",
            DecodeErrorKind::Unpredictable => "unpredictable",
            DecodeErrorKind::Truncated => "truncated 32-bit encoding",
        };
        f.write_str(s)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Panics carrying the offending address, reserved for decoder/table-drift
/// invariant violations the spec calls out as bugs rather than user errors
/// (§4.3 "Any other instruction that writes PC...: panic").
pub fn table_drift(context: &str, address: Address) -> ! {
    panic!("decoder/effect table drift: {context} at {address:#x}")
}
