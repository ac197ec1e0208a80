use tracing::debug;

use crate::{
    air::{Air, AirStmt, Target},
    error::{AsmError, AsmErrors},
    isa::{Format, Opcode, Operands},
    lexer::{tokenize_line, Token, TokenKind},
    symbol::{LabelRef, Span},
};

/// Transforms source text into AIR, one line at a time.
///
/// This is the first assembler pass: every line is tokenized, validated against the grammar of
/// its leading token and laid out, so labels know their final byte offset. Errors do not stop
/// the pass; all of them are reported together.
pub struct AsmParser<'a> {
    /// Reference to the source file
    src: &'a str,
    /// Assembly intermediate representation
    air: Air<'a>,
    errors: Vec<AsmError>,
}

impl<'a> AsmParser<'a> {
    pub fn new(src: &'a str) -> Self {
        AsmParser {
            src,
            air: Air::new(src),
            errors: Vec::new(),
        }
    }

    /// Create AIR out of the source
    pub fn parse(mut self) -> Result<Air<'a>, AsmErrors> {
        let mut line_offs = 0;
        for (idx, line) in self.src.split('\n').enumerate() {
            let toks = tokenize_line(line, line_offs);
            line_offs += line.len() + 1;
            if let Err(e) = self.parse_line(&toks, idx + 1) {
                self.errors.push(e);
            }
        }

        if self.errors.is_empty() {
            debug!(
                stmts = self.air.len(),
                bytes = self.air.byte_len(),
                labels = self.air.labels().len(),
                "parsed source"
            );
            Ok(self.air)
        } else {
            debug!(errors = self.errors.len(), "parsing failed");
            Err(AsmErrors::new(self.src, self.errors))
        }
    }

    fn parse_line(&mut self, toks: &[Token], line: usize) -> Result<(), AsmError> {
        let Some(first) = toks.first() else {
            return Ok(());
        };

        match &first.kind {
            TokenKind::Opcode(opcode) => {
                let operands = parse_operands(*opcode, toks, line)?;
                self.air.add_stmt(AirStmt::Instr {
                    line,
                    opcode: *opcode,
                    operands,
                });
            }
            TokenKind::Data(_) => {
                let mut bytes = Vec::new();
                for tok in toks {
                    match &tok.kind {
                        TokenKind::Data(data) => bytes.extend_from_slice(data),
                        _ => {
                            return Err(AsmError::ExpectedData {
                                token: tok.text.to_owned(),
                                line,
                                span: tok.span.into(),
                            })
                        }
                    }
                }
                self.air.add_stmt(AirStmt::Data { line, bytes });
            }
            TokenKind::LabelDecl => {
                let label = first.label_name();
                if toks.len() > 1 {
                    return Err(AsmError::LabelNotAlone {
                        label: label.to_owned(),
                        line,
                        span: first.span.into(),
                    });
                }
                if !self.air.declare_label(label) {
                    return Err(AsmError::DuplicateLabel {
                        label: label.to_owned(),
                        line,
                        span: first.span.into(),
                    });
                }
            }
            // Lines should not start with these tokens
            TokenKind::Reg(_) => {
                return Err(AsmError::MisplacedRegister {
                    reg: first.text.to_owned(),
                    line,
                    span: first.span.into(),
                })
            }
            TokenKind::LabelRef | TokenKind::Unknown => {
                return Err(AsmError::UnknownToken {
                    token: first.text.to_owned(),
                    line,
                    span: first.span.into(),
                })
            }
        }
        Ok(())
    }
}

/// Validate the operands following `opcode` against its fixed grammar.
fn parse_operands(opcode: Opcode, toks: &[Token], line: usize) -> Result<Operands<Target>, AsmError> {
    let invalid = || {
        let expected = match opcode.format() {
            Format::Bare => "must be by itself".to_owned(),
            format => format!("expected {opcode} {}", format.usage()),
        };
        AsmError::InvalidSyntax {
            opcode,
            expected,
            line,
            span: line_span(toks).into(),
        }
    };

    use TokenKind::{Data, LabelRef as Ref, Reg};
    let operands = match (opcode.format(), &toks[1..]) {
        (Format::Bare, []) => Operands::None,
        (Format::RegReg, [a, b]) => match (&a.kind, &b.kind) {
            (Reg(r1), Reg(r2)) => Operands::RegReg(*r1, *r2),
            _ => return Err(invalid()),
        },
        (Format::Reg, [a]) => match &a.kind {
            Reg(r) => Operands::Reg(*r),
            _ => return Err(invalid()),
        },
        (Format::RegImm, [a, b]) => match (&a.kind, &b.kind) {
            (Reg(r), Data(_) | Ref) => Operands::RegImm(*r, target(b, line)?),
            _ => return Err(invalid()),
        },
        (Format::Addr, [a]) => match &a.kind {
            Data(_) | Ref => Operands::Addr(target(a, line)?),
            _ => return Err(invalid()),
        },
        (Format::Byte, []) => Operands::Byte(0),
        (Format::Byte, [a]) => match &a.kind {
            Data(bytes) => match bytes.as_slice() {
                [byte] => Operands::Byte(*byte),
                _ => return Err(too_large(8, a, line)),
            },
            _ => return Err(invalid()),
        },
        _ => return Err(invalid()),
    };
    Ok(operands)
}

/// 16-bit operand: a literal of at most two bytes, or a label to resolve later.
fn target(tok: &Token, line: usize) -> Result<Target, AsmError> {
    match &tok.kind {
        TokenKind::Data(bytes) => match bytes.as_slice() {
            [lo] => Ok(Target::Value(*lo as u16)),
            [hi, lo] => Ok(Target::Value(u16::from_be_bytes([*hi, *lo]))),
            _ => Err(too_large(16, tok, line)),
        },
        _ => Ok(Target::Label(LabelRef {
            name: tok.label_name().to_owned(),
            line,
            span: tok.span,
        })),
    }
}

fn too_large(bits: u8, tok: &Token, line: usize) -> AsmError {
    AsmError::DataTooLarge {
        bits,
        line,
        span: tok.span.into(),
    }
}

/// Span covering every token of a line.
fn line_span(toks: &[Token]) -> Span {
    match (toks.first(), toks.last()) {
        (Some(first), Some(last)) => {
            let start = first.span.offs();
            Span::new(start, last.span.end() - start)
        }
        _ => Span::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Register;

    fn parse(src: &str) -> Result<Air<'_>, AsmErrors> {
        AsmParser::new(src).parse()
    }

    fn first_error(src: &str) -> AsmError {
        parse(src).err().expect("source should fail").into_errors().remove(0)
    }

    #[test]
    fn parse_add_basic() {
        let air = parse("ADD R2 R3").unwrap();
        assert_eq!(
            air.get(0),
            &AirStmt::Instr {
                line: 1,
                opcode: Opcode::Add,
                operands: Operands::RegReg(Register::R2, Register::R3),
            }
        );
        assert_eq!(air.byte_len(), 4);
    }

    #[test]
    fn parse_immediates() {
        let air = parse("MOVI A 0x1\nLOADI B 0x1234\nRET\nRET 0x02").unwrap();
        assert_eq!(
            air.get(0),
            &AirStmt::Instr {
                line: 1,
                opcode: Opcode::MovI,
                operands: Operands::RegImm(Register::R2, Target::Value(1)),
            }
        );
        assert_eq!(
            air.get(1),
            &AirStmt::Instr {
                line: 2,
                opcode: Opcode::LoadI,
                operands: Operands::RegImm(Register::R3, Target::Value(0x1234)),
            }
        );
        assert_eq!(
            air.get(2),
            &AirStmt::Instr { line: 3, opcode: Opcode::Ret, operands: Operands::Byte(0) }
        );
        assert_eq!(
            air.get(3),
            &AirStmt::Instr { line: 4, opcode: Opcode::Ret, operands: Operands::Byte(2) }
        );
    }

    #[test]
    fn labels_record_layout_offsets() {
        let air = parse(
            r#"
            start:
                NOP
            table:
                0x01 0x0203      ; 3 bytes, padded to 4
            after:
                JMPI start
            "#,
        )
        .unwrap();
        assert_eq!(air.labels().get("start"), Some(0));
        assert_eq!(air.labels().get("table"), Some(4));
        assert_eq!(air.labels().get("after"), Some(8));
        assert_eq!(air.byte_len(), 12);
        assert_eq!(air.get(1), &AirStmt::Data { line: 5, bytes: vec![0x01, 0x02, 0x03] });
    }

    #[test]
    fn label_refs_are_deferred() {
        let air = parse("JMPI later").unwrap();
        match air.get(0) {
            AirStmt::Instr { operands: Operands::Addr(Target::Label(label)), .. } => {
                assert_eq!(label.name, "later");
                assert_eq!(label.line, 1);
                assert_eq!(label.span, Span::new(5, 5));
            }
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn invalid_syntax_per_format() {
        #[rustfmt::skip]
        let cases = [
            ("NOP A", "Invalid syntax for NOP, must be by itself on line 1."),
            ("ADD A", "Invalid syntax for ADD, expected ADD REG1 REG2 on line 1."),
            ("ADD A 0x1", "Invalid syntax for ADD, expected ADD REG1 REG2 on line 1."),
            ("PUSH", "Invalid syntax for PUSH, expected PUSH REG on line 1."),
            ("MOVI 0x1 A", "Invalid syntax for MOVI, expected MOVI REG LABEL|DATA on line 1."),
            ("CALL A", "Invalid syntax for CALL, expected CALL LABEL|DATA on line 1."),
            ("JEQ a b", "Invalid syntax for JEQ, expected JEQ LABEL|DATA on line 1."),
            ("RET A", "Invalid syntax for RET, expected RET [DATA] on line 1."),
            ("RET 0x1 0x2", "Invalid syntax for RET, expected RET [DATA] on line 1."),
        ];
        for (src, expected) in cases {
            let err = first_error(src);
            assert!(matches!(err, AsmError::InvalidSyntax { .. }), "{src}");
            assert_eq!(err.to_string(), expected);
        }
    }

    #[test]
    fn operand_size_limits() {
        assert!(parse("MOVI A 0xFFFF").is_ok());
        assert!(parse("CALL 0x00FF").is_ok());
        assert_eq!(
            first_error("MOVI A 0x10000"),
            AsmError::DataTooLarge { bits: 16, line: 1, span: (7, 7).into() }
        );
        assert!(matches!(first_error("JMPI 0x123456"), AsmError::DataTooLarge { bits: 16, .. }));
        assert!(parse("RET 0xFF").is_ok());
        // Size is counted in bytes as written
        assert!(matches!(first_error("RET 0x0001"), AsmError::DataTooLarge { bits: 8, .. }));
    }

    #[test]
    fn line_start_errors() {
        assert!(matches!(first_error("A B"), AsmError::MisplacedRegister { .. }));
        assert!(matches!(first_error("foo"), AsmError::UnknownToken { .. }));
        assert!(matches!(first_error("add A B"), AsmError::UnknownToken { .. }));
        assert!(matches!(first_error("$$"), AsmError::UnknownToken { .. }));
        assert!(matches!(first_error("0x01 A"), AsmError::ExpectedData { .. }));
        assert!(matches!(first_error("here: NOP"), AsmError::LabelNotAlone { .. }));
    }

    #[test]
    fn duplicate_label() {
        let err = first_error("dup:\nNOP\ndup:");
        assert_eq!(
            err,
            AsmError::DuplicateLabel { label: "dup".into(), line: 3, span: (9, 4).into() }
        );
    }

    #[test]
    fn errors_are_aggregated() {
        let errs = parse("ADD A\nNOP\nfoo\nPUSH 0x1\nx:\nx:").unwrap_err();
        let lines: Vec<_> = errs.errors().iter().filter_map(AsmError::line).collect();
        assert_eq!(lines, [1, 3, 4, 6]);
    }

    #[test]
    fn blank_and_comment_lines_skipped() {
        let air = parse("\n   ; comment\n\r\nNOP ; trailing\n").unwrap();
        assert_eq!(air.len(), 1);
        assert_eq!(air.get(0).line(), 4);
    }
}
