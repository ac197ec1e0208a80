use crate::isa::AluOp;

/// Untruncated result of an arithmetic or logic operation.
///
/// Shift counts use the low five bits of `src`. Division by zero yields `0xFFFF`.
pub fn compute(op: AluOp, dest: u16, src: u16) -> i64 {
    let (d, s) = (dest as i64, src as i64);
    let shift = (src & 0x1F) as u32;
    match op {
        AluOp::Add => d + s,
        AluOp::Sub | AluOp::Cmp => d - s,
        AluOp::Mul => d * s,
        AluOp::Div => match src {
            0 => 0xFFFF,
            _ => d / s,
        },
        AluOp::And | AluOp::Tst => d & s,
        AluOp::Or => d | s,
        AluOp::Xor => d ^ s,
        AluOp::Shl => d << shift,
        // Arithmetic shift on the signed value, not a zero-filling one like SHRL.
        // Counts past 15 leave only sign bits
        AluOp::Shra => ((dest as i16) >> shift.min(15)) as u16 as i64,
        AluOp::Shrl => d >> shift,
    }
}
