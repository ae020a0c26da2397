//! Worst-case stack-depth analysis for ARMv6-M (Cortex-M0/M0+) executables.
//!
//! The pipeline reads an unstripped ELF32 image, decodes each function's
//! Thumb instructions, resolves their PC/SP effects, walks each function's
//! entry and return paths to find its own stack growth, folds callee costs
//! in cumulatively, and aggregates the vector table's exception/interrupt
//! priorities into one worst-case stack size.

pub mod config;
pub mod cumulative;
pub mod cursor;
pub mod decode;
pub mod demangle;
pub mod effects;
pub mod entrypoints;
pub mod error;
pub mod fixedpoint;
pub mod graph;
pub mod image;
pub mod model;
pub mod program;
pub mod stack;

pub use config::Config;
pub use error::{Error, Result};
pub use program::{analyze, ProgramReport};
