use crate::isa::{AluOp, Cond};

const SIGN_BIT: i64 = 0x8000;

/// Condition flags. Recomputed by arithmetic instructions and cleared by all others, so they
/// only ever describe the previous instruction.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct Flags {
    pub overflow: bool,
    pub carry: bool,
    pub zero: bool,
    pub sign: bool,
}

impl Flags {
    /// Flags for an arithmetic or logic operation given its operands and untruncated result.
    pub fn from_result(op: AluOp, dest: u16, src: u16, result: i64) -> Flags {
        let d = dest as i64 & SIGN_BIT != 0;
        let s = src as i64 & SIGN_BIT != 0;
        let r = result & SIGN_BIT != 0;

        let overflow = match op {
            // Two operands of one sign giving the other
            AluOp::Add => (d && s && !r) || (!d && !s && r),
            // Negative minus positive giving positive, or positive minus negative giving negative
            AluOp::Sub | AluOp::Cmp => (d && !s && !r) || (!d && s && r),
            _ => false,
        };

        Flags {
            overflow,
            carry: !(0..=0xFFFF).contains(&result),
            zero: result & 0xFFFF == 0,
            sign: r,
        }
    }

    /// Whether a conditional jump on `cond` is taken.
    pub fn satisfies(self, cond: Cond) -> bool {
        let Flags {
            overflow,
            carry,
            zero,
            sign,
        } = self;
        match cond {
            Cond::Eq => zero,
            Cond::Ne => !zero,
            Cond::G => !zero && sign == overflow,
            Cond::Ge => sign == overflow,
            Cond::A => !carry && !zero,
            Cond::Ae => !carry,
            Cond::L => sign != overflow,
            Cond::Le => sign != overflow || zero,
            Cond::B => carry,
            Cond::Be => carry || zero,
            Cond::O => overflow,
            Cond::No => !overflow,
            Cond::S => sign,
            Cond::Ns => !sign,
        }
    }
}
