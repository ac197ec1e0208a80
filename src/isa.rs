//! Instruction set shared by the assembler and the emulator.
//!
//! Every instruction is exactly 4 bytes. Byte 0 is always the opcode, the layout of the
//! remaining three depends on the opcode's [`Format`].

use std::fmt;
use std::str::FromStr;

use fxhash::FxHashMap;
use lazy_static::lazy_static;

/// Size of every encoded instruction in bytes.
pub const INSTR_LEN: usize = 4;

/// Every Consolite opcode with its numeric code.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0x00,
    Input = 0x01,
    Call = 0x02,
    Ret = 0x03,
    Load = 0x04,
    LoadI = 0x05,
    Mov = 0x06,
    MovI = 0x07,
    Push = 0x08,
    Pop = 0x09,
    Add = 0x0a,
    Sub = 0x0b,
    Mul = 0x0c,
    Div = 0x0d,
    And = 0x0e,
    Or = 0x0f,
    Xor = 0x10,
    Shl = 0x11,
    Shra = 0x12,
    Shrl = 0x13,
    Cmp = 0x14,
    Tst = 0x15,
    Color = 0x16,
    Pixel = 0x17,
    Stor = 0x18,
    StorI = 0x19,
    Time = 0x1a,
    TimerRst = 0x1b,
    Rnd = 0x1c,
    Jmp = 0x30,
    JmpI = 0x31,
    Jeq = 0x32,
    Jne = 0x33,
    Jg = 0x34,
    Jge = 0x35,
    Ja = 0x36,
    Jae = 0x37,
    Jl = 0x38,
    Jle = 0x39,
    Jb = 0x3a,
    Jbe = 0x3b,
    Jo = 0x3c,
    Jno = 0x3d,
    Js = 0x3e,
    Jns = 0x3f,
}

/// Mnemonic table, the single source for name lookups in both directions.
const MNEMONICS: [(&str, Opcode); 45] = [
    ("NOP", Opcode::Nop),
    ("INPUT", Opcode::Input),
    ("CALL", Opcode::Call),
    ("RET", Opcode::Ret),
    ("LOAD", Opcode::Load),
    ("LOADI", Opcode::LoadI),
    ("MOV", Opcode::Mov),
    ("MOVI", Opcode::MovI),
    ("PUSH", Opcode::Push),
    ("POP", Opcode::Pop),
    ("ADD", Opcode::Add),
    ("SUB", Opcode::Sub),
    ("MUL", Opcode::Mul),
    ("DIV", Opcode::Div),
    ("AND", Opcode::And),
    ("OR", Opcode::Or),
    ("XOR", Opcode::Xor),
    ("SHL", Opcode::Shl),
    ("SHRA", Opcode::Shra),
    ("SHRL", Opcode::Shrl),
    ("CMP", Opcode::Cmp),
    ("TST", Opcode::Tst),
    ("COLOR", Opcode::Color),
    ("PIXEL", Opcode::Pixel),
    ("STOR", Opcode::Stor),
    ("STORI", Opcode::StorI),
    ("TIME", Opcode::Time),
    ("TIMERST", Opcode::TimerRst),
    ("RND", Opcode::Rnd),
    ("JMP", Opcode::Jmp),
    ("JMPI", Opcode::JmpI),
    ("JEQ", Opcode::Jeq),
    ("JNE", Opcode::Jne),
    ("JG", Opcode::Jg),
    ("JGE", Opcode::Jge),
    ("JA", Opcode::Ja),
    ("JAE", Opcode::Jae),
    ("JL", Opcode::Jl),
    ("JLE", Opcode::Jle),
    ("JB", Opcode::Jb),
    ("JBE", Opcode::Jbe),
    ("JO", Opcode::Jo),
    ("JNO", Opcode::Jno),
    ("JS", Opcode::Js),
    ("JNS", Opcode::Jns),
];

/// Register alias table. Both naming schemes resolve to the same index.
const REGISTER_ALIASES: [(&str, Register); 32] = [
    ("SP", Register::R0),
    ("R0", Register::R0),
    ("FP", Register::R1),
    ("R1", Register::R1),
    ("A", Register::R2),
    ("R2", Register::R2),
    ("B", Register::R3),
    ("R3", Register::R3),
    ("C", Register::R4),
    ("R4", Register::R4),
    ("D", Register::R5),
    ("R5", Register::R5),
    ("E", Register::R6),
    ("R6", Register::R6),
    ("F", Register::R7),
    ("R7", Register::R7),
    ("G", Register::R8),
    ("R8", Register::R8),
    ("H", Register::R9),
    ("R9", Register::R9),
    ("I", Register::R10),
    ("R10", Register::R10),
    ("J", Register::R11),
    ("R11", Register::R11),
    ("K", Register::R12),
    ("R12", Register::R12),
    ("L", Register::R13),
    ("R13", Register::R13),
    ("M", Register::R14),
    ("R14", Register::R14),
    ("N", Register::R15),
    ("R15", Register::R15),
];

lazy_static! {
    static ref OPCODE_BY_NAME: FxHashMap<&'static str, Opcode> =
        MNEMONICS.iter().copied().collect();
    static ref OPCODE_BY_BYTE: [Option<Opcode>; 256] = {
        let mut table = [None; 256];
        for (_, op) in MNEMONICS {
            table[op as usize] = Some(op);
        }
        table
    };
    static ref REGISTER_BY_NAME: FxHashMap<&'static str, Register> =
        REGISTER_ALIASES.iter().copied().collect();
}

impl Opcode {
    /// Look up an opcode by its (case-sensitive) mnemonic.
    pub fn from_mnemonic(name: &str) -> Option<Opcode> {
        OPCODE_BY_NAME.get(name).copied()
    }

    /// Look up an opcode by its numeric code. Gaps in the table return `None`.
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        OPCODE_BY_BYTE[byte as usize]
    }

    pub fn mnemonic(self) -> &'static str {
        MNEMONICS
            .iter()
            .find(|(_, op)| *op == self)
            .map(|(name, _)| *name)
            .unwrap_or("???")
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Operand layout of this opcode.
    pub fn format(self) -> Format {
        use Opcode::*;
        match self {
            Nop | TimerRst => Format::Bare,
            Input | Load | Mov | Add | Sub | Mul | Div | And | Or | Xor | Shl | Shra | Shrl
            | Cmp | Tst | Pixel | Stor => Format::RegReg,
            Push | Pop | Color | Jmp | Time | Rnd => Format::Reg,
            LoadI | StorI | MovI => Format::RegImm,
            Call | JmpI | Jeq | Jne | Jg | Jge | Ja | Jae | Jl | Jle | Jb | Jbe | Jo | Jno
            | Js | Jns => Format::Addr,
            Ret => Format::Byte,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Operand layout categories. Byte 0 is the opcode in all of them.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Format {
    /// `0 0 0`
    Bare,
    /// `reg1 reg2 0`
    RegReg,
    /// `reg 0 0`
    Reg,
    /// `reg imm_hi imm_lo`
    RegImm,
    /// `addr_hi addr_lo 0`
    Addr,
    /// `imm 0 0`, operand may be omitted
    Byte,
}

impl Format {
    /// Operand syntax shown in diagnostics.
    pub fn usage(self) -> &'static str {
        match self {
            Format::Bare => "",
            Format::RegReg => "REG1 REG2",
            Format::Reg => "REG",
            Format::RegImm => "REG LABEL|DATA",
            Format::Addr => "LABEL|DATA",
            Format::Byte => "[DATA]",
        }
    }
}

/// The 16 general purpose registers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(u8)]
pub enum Register {
    /// Stack pointer by convention.
    R0 = 0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

impl Register {
    pub const SP: Register = Register::R0;

    const ALL: [Register; 16] = [
        Register::R0,
        Register::R1,
        Register::R2,
        Register::R3,
        Register::R4,
        Register::R5,
        Register::R6,
        Register::R7,
        Register::R8,
        Register::R9,
        Register::R10,
        Register::R11,
        Register::R12,
        Register::R13,
        Register::R14,
        Register::R15,
    ];

    /// Register selected by the low nibble of an operand byte.
    pub fn from_nibble(byte: u8) -> Register {
        Self::ALL[(byte & 0xF) as usize]
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl FromStr for Register {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        REGISTER_BY_NAME.get(s).copied().ok_or(())
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.index())
    }
}

/// Jump conditions, evaluated against the flags left by the previous instruction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Cond {
    Eq,
    Ne,
    G,
    Ge,
    A,
    Ae,
    L,
    Le,
    B,
    Be,
    O,
    No,
    S,
    Ns,
}

impl Cond {
    pub const ALL: [Cond; 14] = [
        Cond::Eq,
        Cond::Ne,
        Cond::G,
        Cond::Ge,
        Cond::A,
        Cond::Ae,
        Cond::L,
        Cond::Le,
        Cond::B,
        Cond::Be,
        Cond::O,
        Cond::No,
        Cond::S,
        Cond::Ns,
    ];
}

/// Arithmetic and logic operations. These are the only instructions that set flags.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AluOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
    Shl,
    Shra,
    Shrl,
    Cmp,
    Tst,
}

impl AluOp {
    /// `CMP` and `TST` only compute flags.
    pub fn writes_back(self) -> bool {
        !matches!(self, AluOp::Cmp | AluOp::Tst)
    }
}

/// Operand payload of an instruction, shaped by its [`Format`].
///
/// `T` is the type of 16-bit immediates and addresses. The assembler carries unresolved
/// label references in it until backpatching.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Operands<T = u16> {
    None,
    RegReg(Register, Register),
    Reg(Register),
    RegImm(Register, T),
    Addr(T),
    Byte(u8),
}

impl<T> Operands<T> {
    pub fn format(&self) -> Format {
        match self {
            Operands::None => Format::Bare,
            Operands::RegReg(..) => Format::RegReg,
            Operands::Reg(_) => Format::Reg,
            Operands::RegImm(..) => Format::RegImm,
            Operands::Addr(_) => Format::Addr,
            Operands::Byte(_) => Format::Byte,
        }
    }

    /// Replace every 16-bit immediate, stopping at the first failure.
    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<Operands<U>, E> {
        Ok(match self {
            Operands::None => Operands::None,
            Operands::RegReg(r1, r2) => Operands::RegReg(r1, r2),
            Operands::Reg(r) => Operands::Reg(r),
            Operands::RegImm(r, imm) => Operands::RegImm(r, f(imm)?),
            Operands::Addr(addr) => Operands::Addr(f(addr)?),
            Operands::Byte(imm) => Operands::Byte(imm),
        })
    }
}

/// Encode one instruction into its 4-byte form.
pub fn encode(opcode: Opcode, operands: &Operands) -> [u8; INSTR_LEN] {
    debug_assert_eq!(opcode.format(), operands.format());
    let op = opcode.code();
    match *operands {
        Operands::None => [op, 0, 0, 0],
        Operands::RegReg(r1, r2) => [op, r1 as u8, r2 as u8, 0],
        Operands::Reg(r) => [op, r as u8, 0, 0],
        Operands::RegImm(r, imm) => {
            let [hi, lo] = imm.to_be_bytes();
            [op, r as u8, hi, lo]
        }
        Operands::Addr(addr) => {
            let [hi, lo] = addr.to_be_bytes();
            [op, hi, lo, 0]
        }
        Operands::Byte(imm) => [op, imm, 0, 0],
    }
}

/// A decoded instruction, carrying only the operands its opcode consumes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Instr {
    Nop,
    /// Store the state of input-id `id` (0 or 1) into `dest`.
    Input { dest: Register, id: Register },
    Call { addr: u16 },
    /// Pop the return address, skipping `pop` extra bytes.
    Ret { pop: u8 },
    Load { dest: Register, addr: Register },
    LoadImm { dest: Register, addr: u16 },
    Mov { dest: Register, src: Register },
    MovImm { dest: Register, value: u16 },
    Push { src: Register },
    Pop { dest: Register },
    Alu { op: AluOp, dest: Register, src: Register },
    Color { src: Register },
    Pixel { x: Register, y: Register },
    Stor { src: Register, addr: Register },
    StorImm { src: Register, addr: u16 },
    Time { dest: Register },
    TimerRst,
    Rnd { dest: Register },
    Jmp { target: Register },
    JmpImm { addr: u16 },
    Jump { cond: Cond, addr: u16 },
    /// Opcode byte with no table entry.
    Unknown(u8),
}

impl Instr {
    pub fn decode(bytes: [u8; INSTR_LEN]) -> Instr {
        let r1 = Register::from_nibble(bytes[1]);
        let r2 = Register::from_nibble(bytes[2]);
        let addr = u16::from_be_bytes([bytes[1], bytes[2]]);
        let imm = u16::from_be_bytes([bytes[2], bytes[3]]);

        let Some(opcode) = Opcode::from_byte(bytes[0]) else {
            return Instr::Unknown(bytes[0]);
        };
        let alu = |op| Instr::Alu { op, dest: r1, src: r2 };
        let jump = |cond| Instr::Jump { cond, addr };

        match opcode {
            Opcode::Nop => Instr::Nop,
            Opcode::Input => Instr::Input { dest: r1, id: r2 },
            Opcode::Call => Instr::Call { addr },
            Opcode::Ret => Instr::Ret { pop: bytes[1] },
            Opcode::Load => Instr::Load { dest: r1, addr: r2 },
            Opcode::LoadI => Instr::LoadImm { dest: r1, addr: imm },
            Opcode::Mov => Instr::Mov { dest: r1, src: r2 },
            Opcode::MovI => Instr::MovImm { dest: r1, value: imm },
            Opcode::Push => Instr::Push { src: r1 },
            Opcode::Pop => Instr::Pop { dest: r1 },
            Opcode::Add => alu(AluOp::Add),
            Opcode::Sub => alu(AluOp::Sub),
            Opcode::Mul => alu(AluOp::Mul),
            Opcode::Div => alu(AluOp::Div),
            Opcode::And => alu(AluOp::And),
            Opcode::Or => alu(AluOp::Or),
            Opcode::Xor => alu(AluOp::Xor),
            Opcode::Shl => alu(AluOp::Shl),
            Opcode::Shra => alu(AluOp::Shra),
            Opcode::Shrl => alu(AluOp::Shrl),
            Opcode::Cmp => alu(AluOp::Cmp),
            Opcode::Tst => alu(AluOp::Tst),
            Opcode::Color => Instr::Color { src: r1 },
            Opcode::Pixel => Instr::Pixel { x: r1, y: r2 },
            Opcode::Stor => Instr::Stor { src: r1, addr: r2 },
            Opcode::StorI => Instr::StorImm { src: r1, addr: imm },
            Opcode::Time => Instr::Time { dest: r1 },
            Opcode::TimerRst => Instr::TimerRst,
            Opcode::Rnd => Instr::Rnd { dest: r1 },
            Opcode::Jmp => Instr::Jmp { target: r1 },
            Opcode::JmpI => Instr::JmpImm { addr },
            Opcode::Jeq => jump(Cond::Eq),
            Opcode::Jne => jump(Cond::Ne),
            Opcode::Jg => jump(Cond::G),
            Opcode::Jge => jump(Cond::Ge),
            Opcode::Ja => jump(Cond::A),
            Opcode::Jae => jump(Cond::Ae),
            Opcode::Jl => jump(Cond::L),
            Opcode::Jle => jump(Cond::Le),
            Opcode::Jb => jump(Cond::B),
            Opcode::Jbe => jump(Cond::Be),
            Opcode::Jo => jump(Cond::O),
            Opcode::Jno => jump(Cond::No),
            Opcode::Js => jump(Cond::S),
            Opcode::Jns => jump(Cond::Ns),
        }
    }
}
