//! Per-instruction PC and SP effect resolution (spec §4.3, §4.4).

pub mod pc;
pub mod sp;

pub use pc::{CallOverrides, PcEffect};
