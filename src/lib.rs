// Instruction set
pub mod isa;

// Parsing
mod lexer;
mod parser;
pub use parser::AsmParser;
mod air;
pub use air::{Air, AirStmt, Program, Target, MAX_OUTPUT};
mod symbol;
pub use symbol::{LabelRef, LabelTable, Span};

// Running
pub mod device;
mod runtime;
pub use runtime::{
    Batch, Flags, HaltHandle, Memory, RunConfig, RunEnvironment, RunState, MEMORY_SIZE,
};
mod features;
pub use features::Features;

mod error;
pub use error::{AsmError, AsmErrors, LoadError, RunError};

pub mod env;

/// Amount of lines to show as context, each side of focus line (line containing span).
pub const DIAGNOSTIC_CONTEXT_LINES: usize = 8;

/// Assemble `src` into a binary image, running both passes.
pub fn assemble(src: &str) -> Result<Vec<u8>, AsmErrors> {
    let air = AsmParser::new(src).parse()?;
    let program = air.backpatch()?;
    Ok(program.emit())
}
