use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

use crate::isa::Opcode;

// Assembler errors

/// A single assembly problem, tied to the line it was found on.
#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum AsmError {
    #[error("Invalid syntax for {opcode}, {expected} on line {line}.")]
    #[diagnostic(
        code(asm::syntax),
        help("check the operands allowed for this instruction")
    )]
    InvalidSyntax {
        opcode: Opcode,
        /// e.g. `expected ADD REG1 REG2`
        expected: String,
        line: usize,
        #[label("invalid instruction")]
        span: SourceSpan,
    },

    #[error("Invalid syntax, LABEL \"{label}\" must be by itself on line {line}.")]
    #[diagnostic(
        code(asm::label_position),
        help("move the instruction following the label onto its own line")
    )]
    LabelNotAlone {
        label: String,
        line: usize,
        #[label("label declaration")]
        span: SourceSpan,
    },

    #[error("Duplicate LABEL \"{label}\" on line {line}.")]
    #[diagnostic(
        code(asm::duplicate_label),
        help("labels may only be declared once per file")
    )]
    DuplicateLabel {
        label: String,
        line: usize,
        #[label("duplicate label")]
        span: SourceSpan,
    },

    #[error("Could not find LABEL for reference \"{label}\" on line {line}.")]
    #[diagnostic(code(asm::unresolved_label), help("declare the label on a line of its own, followed by `:`"))]
    UnresolvedLabel {
        label: String,
        line: usize,
        #[label("unknown label")]
        span: SourceSpan,
    },

    #[error("Data too large, max of {bits} bits on line {line}.")]
    #[diagnostic(
        code(asm::data_too_large),
        help("literals are sized by their digit count, drop leading zeros")
    )]
    DataTooLarge {
        bits: u8,
        line: usize,
        #[label("out-of-range literal")]
        span: SourceSpan,
    },

    #[error("Output would be {len} bytes, which is larger than the maximum output size of {max} bytes.")]
    #[diagnostic(code(asm::output_too_large))]
    OutputTooLarge { len: usize, max: usize },

    #[error("REG \"{reg}\" not allowed at start of instruction on line {line}.")]
    #[diagnostic(
        code(asm::misplaced_register),
        help("lines should start with an opcode, a label declaration or data")
    )]
    MisplacedRegister {
        reg: String,
        line: usize,
        #[label("unexpected register")]
        span: SourceSpan,
    },

    #[error("Unknown token \"{token}\", expected DATA on line {line}.")]
    #[diagnostic(
        code(asm::expected_data),
        help("data lines may only contain `0x` literals")
    )]
    ExpectedData {
        token: String,
        line: usize,
        #[label("not a literal")]
        span: SourceSpan,
    },

    #[error("Unknown token \"{token}\" on line {line}.")]
    #[diagnostic(
        code(asm::unknown_token),
        help("lines should start with an opcode, a label declaration or data")
    )]
    UnknownToken {
        token: String,
        line: usize,
        #[label("unknown token")]
        span: SourceSpan,
    },
}

impl AsmError {
    /// Source line the error refers to, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            AsmError::InvalidSyntax { line, .. }
            | AsmError::LabelNotAlone { line, .. }
            | AsmError::DuplicateLabel { line, .. }
            | AsmError::UnresolvedLabel { line, .. }
            | AsmError::DataTooLarge { line, .. }
            | AsmError::MisplacedRegister { line, .. }
            | AsmError::ExpectedData { line, .. }
            | AsmError::UnknownToken { line, .. } => Some(*line),
            AsmError::OutputTooLarge { .. } => None,
        }
    }
}

/// Every problem found in one assembly run, in source order.
#[derive(Debug, Error, Diagnostic)]
#[error("Assembly failed with {} error(s).", .errors.len())]
#[diagnostic(code(asm::failed), help("no binary was produced"))]
pub struct AsmErrors {
    #[source_code]
    src: String,
    #[related]
    errors: Vec<AsmError>,
}

impl AsmErrors {
    pub fn new(src: &str, errors: Vec<AsmError>) -> Self {
        AsmErrors {
            src: src.to_owned(),
            errors,
        }
    }

    pub fn errors(&self) -> &[AsmError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<AsmError> {
        self.errors
    }
}

// Emulator errors

#[derive(Debug, Error, Diagnostic, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    #[error("Binary image is {len} bytes, which does not fit in {max} bytes of memory.")]
    #[diagnostic(code(run::image_too_large))]
    ImageTooLarge { len: usize, max: usize },
}

#[derive(Debug, Error, Diagnostic, Clone, Copy, PartialEq, Eq)]
pub enum RunError {
    #[error("Unknown opcode 0x{opcode:02x} at address 0x{addr:04x}.")]
    #[diagnostic(
        code(run::unknown_opcode),
        help("disable the `strict` feature to execute unknown opcodes as NOP")
    )]
    UnknownOpcode { opcode: u8, addr: u16 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_line() {
        let err = AsmError::DuplicateLabel {
            label: "loop".into(),
            line: 7,
            span: (0, 4).into(),
        };
        assert_eq!(err.to_string(), "Duplicate LABEL \"loop\" on line 7.");
        assert_eq!(err.line(), Some(7));

        let err = AsmError::OutputTooLarge { len: 65537, max: 65536 };
        assert_eq!(
            err.to_string(),
            "Output would be 65537 bytes, which is larger than the maximum output size of 65536 bytes."
        );
        assert_eq!(err.line(), None);
    }

    #[test]
    fn aggregate_keeps_order() {
        let errs = AsmErrors::new(
            "x\ny",
            vec![
                AsmError::UnknownToken { token: "x".into(), line: 1, span: (0, 1).into() },
                AsmError::UnknownToken { token: "y".into(), line: 2, span: (2, 1).into() },
            ],
        );
        assert_eq!(errs.to_string(), "Assembly failed with 2 error(s).");
        let lines: Vec<_> = errs.errors().iter().filter_map(AsmError::line).collect();
        assert_eq!(lines, [1, 2]);
    }
}
