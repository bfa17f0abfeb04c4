//! Condition flags and the arithmetic that produces them.
//!
//! Everything in here is a pure function of the operands; the processor
//! decides where results and flags end up.

use std::fmt;

use crate::memory::Word;

const SIGN: Word = 0x8000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags {
    /// Result was zero
    pub zero: bool,
    /// Unsigned carry out of an addition, or borrow of a subtraction
    pub carry: bool,
    /// Signed overflow
    pub overflow: bool,
    /// Sign bit of the result
    pub negative: bool,
}

impl Flags {
    /// Zero and negative taken from `result`, carry and overflow cleared
    pub fn of(result: Word) -> Self {
        Self {
            zero: result == 0,
            carry: false,
            overflow: false,
            negative: result & SIGN != 0,
        }
    }

    /// Replaces zero and negative, keeps carry and overflow
    pub fn with_result(self, result: Word) -> Self {
        Self {
            carry: self.carry,
            overflow: self.overflow,
            ..Self::of(result)
        }
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |set: bool, c: char| if set { c } else { '-' };
        write!(
            f,
            "{}{}{}{}",
            flag(self.zero, 'Z'),
            flag(self.carry, 'C'),
            flag(self.overflow, 'V'),
            flag(self.negative, 'N')
        )
    }
}

/// Value and flags produced by an ALU operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub value: Word,
    pub flags: Flags,
}

/// Binary operations of the ALU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Alu {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
}

impl Alu {
    /// Combines `a` with `b`. Returns `None` on division by zero.
    pub fn apply(self, a: Word, b: Word) -> Option<Outcome> {
        Some(match self {
            Alu::Add => add(a, b),
            Alu::Sub => sub(a, b),
            Alu::Mul => mul(a, b),
            Alu::Div => div(a, b)?,
            Alu::And => logic(a & b),
            Alu::Or => logic(a | b),
            Alu::Xor => logic(a ^ b),
        })
    }
}

pub fn add(a: Word, b: Word) -> Outcome {
    let (value, carry) = a.overflowing_add(b);
    Outcome {
        value,
        flags: Flags {
            carry,
            overflow: (a ^ value) & (b ^ value) & SIGN != 0,
            ..Flags::of(value)
        },
    }
}

/// `a - b`; carry is set when `a < b` (unsigned borrow)
pub fn sub(a: Word, b: Word) -> Outcome {
    let (value, borrow) = a.overflowing_sub(b);
    Outcome {
        value,
        flags: Flags {
            carry: borrow,
            overflow: (a ^ b) & (a ^ value) & SIGN != 0,
            ..Flags::of(value)
        },
    }
}

/// Flags of `a - b` without keeping the difference
pub fn compare(a: Word, b: Word) -> Flags {
    sub(a, b).flags
}

/// Low 16 bits of the product. Carry when the unsigned product does not fit,
/// overflow when the signed one does not.
pub fn mul(a: Word, b: Word) -> Outcome {
    let wide = a as u32 * b as u32;
    let value = wide as Word;
    let signed = (a as i16 as i32) * (b as i16 as i32);
    Outcome {
        value,
        flags: Flags {
            carry: wide > Word::MAX as u32,
            overflow: signed < i16::MIN as i32 || signed > i16::MAX as i32,
            ..Flags::of(value)
        },
    }
}

/// Unsigned division
pub fn div(a: Word, b: Word) -> Option<Outcome> {
    let value = a.checked_div(b)?;
    Some(logic(value))
}

pub fn logic(value: Word) -> Outcome {
    Outcome {
        value,
        flags: Flags::of(value),
    }
}

/// Bitwise complement. Only zero and negative follow the result.
pub fn not(a: Word, flags: Flags) -> Outcome {
    let value = !a;
    Outcome {
        value,
        flags: flags.with_result(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::Result;

    const SAMPLES: &[Word] = &[0, 1, 2, 5, 0x7F, 0x7FFF, 0x8000, 0x8001, 0xFFFE, 0xFFFF];

    #[test]
    fn test_zero_and_negative_follow_result() -> Result<()> {
        for &a in SAMPLES {
            for &b in SAMPLES {
                for op in &[Alu::Add, Alu::Sub, Alu::Mul, Alu::Div, Alu::And, Alu::Or, Alu::Xor] {
                    if let Some(out) = op.apply(a, b) {
                        assert_eq!(out.flags.zero, out.value == 0, "{:?} {} {}", op, a, b);
                        assert_eq!(out.flags.negative, out.value & 0x8000 != 0);
                    }
                }
            }
        }

        Ok(())
    }

    #[test]
    fn test_carry_matches_unsigned_arithmetic() -> Result<()> {
        for &a in SAMPLES {
            for &b in SAMPLES {
                assert_eq!(add(a, b).flags.carry, a as u32 + b as u32 > 0xFFFF);
                assert_eq!(sub(a, b).flags.carry, a < b);
                assert_eq!(compare(a, b), sub(a, b).flags);
            }
        }

        Ok(())
    }

    #[test]
    fn test_add() -> Result<()> {
        let out = add(0xFFFF, 1);
        assert_eq!(out.value, 0);
        assert!(out.flags.zero && out.flags.carry && !out.flags.overflow);

        let out = add(0x7FFF, 1);
        assert_eq!(out.value, 0x8000);
        assert!(out.flags.overflow && out.flags.negative && !out.flags.carry);

        Ok(())
    }

    #[test]
    fn test_sub() -> Result<()> {
        let out = sub(1, 2);
        assert_eq!(out.value, 0xFFFF);
        assert!(out.flags.carry && out.flags.negative && !out.flags.overflow);

        let out = sub(0x8000, 1);
        assert_eq!(out.value, 0x7FFF);
        assert!(out.flags.overflow && !out.flags.carry);

        assert!(compare(20, 20).zero);
        assert!(compare(10, 20).carry);
        assert!(!compare(30, 20).carry);

        Ok(())
    }

    #[test]
    fn test_mul() -> Result<()> {
        let out = mul(0x100, 0x100);
        assert_eq!(out.value, 0);
        assert!(out.flags.carry && out.flags.zero);

        let out = mul(7, 6);
        assert_eq!(out.value, 42);
        assert_eq!(out.flags, Flags::of(42));

        // -1 * -1 fits signed but not unsigned
        let out = mul(0xFFFF, 0xFFFF);
        assert_eq!(out.value, 1);
        assert!(out.flags.carry && !out.flags.overflow);

        Ok(())
    }

    #[test]
    fn test_div() -> Result<()> {
        assert_eq!(div(42, 5).map(|out| out.value), Some(8));
        assert_eq!(div(42, 0), None);
        assert_eq!(Alu::Div.apply(1, 0), None);

        Ok(())
    }

    #[test]
    fn test_not_keeps_carry_and_overflow() -> Result<()> {
        let before = Flags {
            carry: true,
            overflow: true,
            ..Flags::default()
        };
        let out = not(0xFFFF, before);
        assert_eq!(out.value, 0);
        assert!(out.flags.zero && out.flags.carry && out.flags.overflow && !out.flags.negative);

        Ok(())
    }

    #[test]
    fn test_display() -> Result<()> {
        assert_eq!(Flags::of(0).to_string(), "Z---");
        assert_eq!(sub(1, 2).flags.to_string(), "-C-N");

        Ok(())
    }
}
