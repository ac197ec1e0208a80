use tracing::debug;

use crate::error::{AsmError, AsmErrors};
use crate::isa::{self, Opcode, Operands, INSTR_LEN};
use crate::symbol::{LabelRef, LabelTable};

/// Largest image that fits the 16-bit address space.
pub const MAX_OUTPUT: usize = 1 << 16;

/// 16-bit operand as written in the source, before label resolution.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Target {
    Value(u16),
    Label(LabelRef),
}

/// Single validated line of Consolite assembly.
///
/// `T` is the type of 16-bit operands: [`Target`] straight out of the parser, `u16` once
/// every label has been resolved.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum AirStmt<T = Target> {
    /// One 4-byte instruction
    Instr {
        line: usize,
        opcode: Opcode,
        operands: Operands<T>,
    },
    /// Raw bytes, padded with zeroes to keep following instructions aligned
    Data { line: usize, bytes: Vec<u8> },
}

impl<T> AirStmt<T> {
    /// Bytes this statement occupies in the image, including padding.
    pub fn byte_len(&self) -> usize {
        match self {
            AirStmt::Instr { .. } => INSTR_LEN,
            AirStmt::Data { bytes, .. } => bytes.len().next_multiple_of(INSTR_LEN),
        }
    }

    pub fn line(&self) -> usize {
        match self {
            AirStmt::Instr { line, .. } | AirStmt::Data { line, .. } => *line,
        }
    }
}

/// Assembly intermediate representation: validated statements plus the label table built
/// while laying them out.
#[derive(Debug)]
pub struct Air<'a> {
    /// Source the statements were parsed from, kept for diagnostics
    src: &'a str,
    ast: Vec<AirStmt>,
    labels: LabelTable,
    /// Running byte length of the laid out image
    len: usize,
}

impl<'a> Air<'a> {
    pub fn new(src: &'a str) -> Self {
        Air {
            src,
            ast: Vec::new(),
            labels: LabelTable::new(),
            len: 0,
        }
    }

    pub fn add_stmt(&mut self, stmt: AirStmt) {
        self.len += stmt.byte_len();
        self.ast.push(stmt)
    }

    /// Bind `name` to the current end of the image. `false` if already declared.
    pub fn declare_label(&mut self, name: &str) -> bool {
        self.labels.insert(name, self.len)
    }

    pub fn get(&self, idx: usize) -> &AirStmt {
        &self.ast[idx]
    }

    /// Number of statements
    pub fn len(&self) -> usize {
        self.ast.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ast.is_empty()
    }

    /// Size of the image these statements lay out to, in bytes
    pub fn byte_len(&self) -> usize {
        self.len
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    /// Resolve every label reference and check the image fits in memory.
    ///
    /// All unresolved references are reported together with an oversized image.
    pub fn backpatch(self) -> Result<Program, AsmErrors> {
        let mut errors = Vec::new();
        let mut stmts = Vec::with_capacity(self.ast.len());

        for stmt in self.ast {
            match stmt {
                AirStmt::Instr {
                    line,
                    opcode,
                    operands,
                } => match operands.try_map(|target| resolve(&self.labels, target)) {
                    Ok(operands) => stmts.push(AirStmt::Instr {
                        line,
                        opcode,
                        operands,
                    }),
                    Err(e) => errors.push(e),
                },
                AirStmt::Data { line, bytes } => stmts.push(AirStmt::Data { line, bytes }),
            }
        }

        if self.len > MAX_OUTPUT {
            errors.push(AsmError::OutputTooLarge {
                len: self.len,
                max: MAX_OUTPUT,
            });
        }

        if !errors.is_empty() {
            debug!(errors = errors.len(), "label resolution failed");
            return Err(AsmErrors::new(self.src, errors));
        }

        Ok(Program {
            stmts,
            labels: self.labels,
            len: self.len,
        })
    }
}

fn resolve(labels: &LabelTable, target: Target) -> Result<u16, AsmError> {
    match target {
        Target::Value(val) => Ok(val),
        Target::Label(label) => match labels.get(&label.name) {
            // Offsets past the address space keep only their low 16 bits
            Some(offs) => Ok((offs & 0xFFFF) as u16),
            None => Err(AsmError::UnresolvedLabel {
                label: label.name,
                line: label.line,
                span: label.span.into(),
            }),
        },
    }
}

/// Fully resolved program, ready for code generation.
#[derive(Debug)]
pub struct Program {
    stmts: Vec<AirStmt<u16>>,
    labels: LabelTable,
    len: usize,
}

impl Program {
    /// Generate the binary image.
    pub fn emit(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for stmt in &self.stmts {
            match stmt {
                AirStmt::Instr {
                    opcode, operands, ..
                } => out.extend_from_slice(&isa::encode(*opcode, operands)),
                AirStmt::Data { bytes, .. } => {
                    out.extend_from_slice(bytes);
                    out.resize(out.len().next_multiple_of(INSTR_LEN), 0);
                }
            }
        }
        debug_assert_eq!(out.len(), self.len);
        debug!(bytes = out.len(), labels = self.labels.len(), "emitted image");
        out
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    /// Size of the emitted image in bytes
    pub fn byte_len(&self) -> usize {
        self.len
    }
}
