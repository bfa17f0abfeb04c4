//! Line level parsing of assembly source.
//!
//! ```text
//!     LDI R1, 1          ; register form, literal
//! LOOP: CMP R1, R4       ; label before an instruction
//!     LDRR R7, [R6]      ; register indirect
//!     STA [0x0200]       ; explicit direct address
//!     LDI #0b101         ; explicit immediate
//! DONE:
//!     HALT
//! ```

use std::borrow::Cow;
use std::error;
use std::fmt;

use crate::isa::Register;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyErrorKind {
    UnknownMnemonic,
    ArityMismatch { expected: usize, found: usize },
    DuplicateLabel,
    UndefinedLabel,
    InvalidLabel,
    InvalidNumber { radix: u32 },
    InvalidOperand,
    InvalidRegister,
    ModeNotAllowed,
    EncodingOverflow,
    ProgramTooLarge,
}

impl fmt::Display for AssemblyErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssemblyErrorKind::UnknownMnemonic => f.write_str("unknown mnemonic"),
            AssemblyErrorKind::ArityMismatch { expected, found } => write!(
                f,
                "expected {} operand(s), found {}",
                expected, found
            ),
            AssemblyErrorKind::DuplicateLabel => f.write_str("duplicate label"),
            AssemblyErrorKind::UndefinedLabel => f.write_str("undefined label"),
            AssemblyErrorKind::InvalidLabel => f.write_str("invalid label"),
            AssemblyErrorKind::InvalidNumber { radix } => {
                write!(f, "failed to parse number with radix `{}`", radix)
            }
            AssemblyErrorKind::InvalidOperand => f.write_str("invalid operand"),
            AssemblyErrorKind::InvalidRegister => f.write_str("invalid register"),
            AssemblyErrorKind::ModeNotAllowed => f.write_str("addressing mode not allowed"),
            AssemblyErrorKind::EncodingOverflow => f.write_str("operand does not fit a word"),
            AssemblyErrorKind::ProgramTooLarge => f.write_str("program exceeds the address space"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyError {
    kind: AssemblyErrorKind,
    context: Option<Cow<'static, str>>,
    line_nr: usize,
}

impl AssemblyError {
    pub(crate) fn new<C, S>(kind: AssemblyErrorKind, context: C, line_nr: usize) -> Self
    where
        C: Into<Option<S>>,
        S: Into<Cow<'static, str>>,
    {
        Self {
            kind,
            context: context.into().map(|inner| inner.into()),
            line_nr,
        }
    }

    pub fn kind(&self) -> AssemblyErrorKind {
        self.kind
    }

    /// 1-based source line
    pub fn line(&self) -> usize {
        self.line_nr
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }
}

impl fmt::Display for AssemblyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(context) = &self.context {
            write!(
                f,
                "error [ln: {}]: {} - {}",
                self.line_nr, self.kind, context
            )
        } else {
            write!(f, "error [ln: {}]: {}", self.line_nr, self.kind)
        }
    }
}

impl error::Error for AssemblyError {}

pub type Result<T, E = AssemblyError> = std::result::Result<T, E>;

/// A failure without a line number yet
pub(super) type Failure = (AssemblyErrorKind, String);

/// Parses a number in decimal or with a `0x`, `0b` or `0o` prefix. Fails
/// with the radix it tried.
macro_rules! parse_number {
    ( $ty:ty: $s:expr ) => {{
        let text: &str = $s;

        let (radix, offset) = match text.as_bytes() {
            [b'0', b'b', ..] | [b'0', b'B', ..] => (2, 2),
            [b'0', b'o', ..] | [b'0', b'O', ..] => (8, 2),
            [b'0', b'x', ..] | [b'0', b'X', ..] => (16, 2),
            _ => (10, 0),
        };

        // from_str_radix takes a sign, the syntax does not
        let digits = &text[offset..];
        if digits.starts_with(|c: char| c == '+' || c == '-') {
            Err(radix)
        } else {
            <$ty>::from_str_radix(digits, radix).map_err(|_| radix)
        }
    }};
}

/// An operand value before labels are resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Number(u32),
    Symbol(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Symbol(name) => f.write_str(name),
        }
    }
}

/// One operand as written in the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// `5`, `LOOP`
    Plain(Value),
    /// `#5`
    Immediate(Value),
    /// `[0x0200]`, `[RESULT]`
    Direct(Value),
    /// `R3`
    Register(Register),
    /// `[R3]`
    Indirect(Register),
}

/// One source line split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub line_nr: usize,
    pub label: Option<String>,
    pub mnemonic: Option<String>,
    pub operands: Vec<Operand>,
}

pub fn parse_number(text: &str) -> Result<u32, Failure> {
    parse_number!(u32: text).map_err(|radix| {
        (
            AssemblyErrorKind::InvalidNumber { radix },
            format!("`{}` is not a number", text),
        )
    })
}

/// Labels start with a letter or `_`, continue alphanumeric, and must not
/// look like a register.
pub fn is_label(name: &str) -> bool {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    valid && !looks_like_register(name)
}

fn looks_like_register(text: &str) -> bool {
    match text.strip_prefix('R').or_else(|| text.strip_prefix('r')) {
        Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

fn parse_register(text: &str) -> Result<Option<Register>, Failure> {
    if !looks_like_register(text) {
        return Ok(None);
    }

    text[1..]
        .parse::<u8>()
        .ok()
        .and_then(Register::new)
        .map(Some)
        .ok_or_else(|| {
            (
                AssemblyErrorKind::InvalidRegister,
                format!("`{}` is not one of R0..R{}", text, Register::COUNT - 1),
            )
        })
}

fn parse_value(text: &str) -> Result<Value, Failure> {
    if text.starts_with(|c: char| c.is_ascii_digit()) {
        parse_number(text).map(Value::Number)
    } else if is_label(text) {
        Ok(Value::Symbol(text.to_string()))
    } else {
        Err((
            AssemblyErrorKind::InvalidOperand,
            format!("`{}` is neither a number nor a label", text),
        ))
    }
}

pub fn parse_operand(text: &str) -> Result<Operand, Failure> {
    if let Some(rest) = text.strip_prefix('#') {
        return parse_value(rest.trim()).map(Operand::Immediate);
    }

    if let Some(rest) = text.strip_prefix('[') {
        let inner = rest
            .strip_suffix(']')
            .ok_or_else(|| {
                (
                    AssemblyErrorKind::InvalidOperand,
                    format!("unclosed bracket in `{}`", text),
                )
            })?
            .trim();

        return match parse_register(inner)? {
            Some(register) => Ok(Operand::Indirect(register)),
            None => parse_value(inner).map(Operand::Direct),
        };
    }

    match parse_register(text)? {
        Some(register) => Ok(Operand::Register(register)),
        None => parse_value(text).map(Operand::Plain),
    }
}

/// Splits on commas and whitespace, keeping bracketed operands together
fn split_operands(text: &str) -> Vec<String> {
    let mut operands = Vec::new();
    let mut current = String::new();
    let mut bracketed = false;

    for c in text.chars() {
        match c {
            '[' => {
                bracketed = true;
                current.push(c);
            }
            ']' => {
                bracketed = false;
                current.push(c);
            }
            c if !bracketed && (c == ',' || c.is_whitespace()) => {
                if !current.is_empty() {
                    operands.push(std::mem::take(&mut current));
                }
            }
            c if c.is_whitespace() => {}
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        operands.push(current);
    }

    operands
}

/// Parses one line of source. Blank lines and comments give an empty
/// statement.
pub fn parse_line(line: &str, line_nr: usize) -> Result<Statement> {
    let err = |(kind, context): Failure| AssemblyError::new(kind, context, line_nr);

    let code = line.split(';').next().unwrap_or_default().trim();
    let mut statement = Statement {
        line_nr,
        label: None,
        mnemonic: None,
        operands: Vec::new(),
    };

    let rest = match code.find(':') {
        Some(colon) => {
            let label = code[..colon].trim();
            if !is_label(label) {
                return Err(AssemblyError::new(
                    AssemblyErrorKind::InvalidLabel,
                    format!("`{}` is not a valid label name", label),
                    line_nr,
                ));
            }
            log::debug!("[{}] Found label `{}`", line_nr, label);
            statement.label = Some(label.to_string());
            code[colon + 1..].trim()
        }
        None => code,
    };

    if rest.is_empty() {
        return Ok(statement);
    }

    let (mnemonic, operands) = match rest.find(char::is_whitespace) {
        Some(split) => (&rest[..split], &rest[split..]),
        None => (rest, ""),
    };

    statement.mnemonic = Some(mnemonic.to_ascii_uppercase());
    statement.operands = split_operands(operands)
        .iter()
        .map(|operand| parse_operand(operand))
        .collect::<Result<_, _>>()
        .map_err(err)?;

    Ok(statement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::Result;

    fn r(index: u8) -> Register {
        Register::new(index).unwrap()
    }

    #[test]
    fn test_numbers() -> Result<()> {
        assert_eq!(parse_number("42"), Ok(42));
        assert_eq!(parse_number("0x0200"), Ok(0x0200));
        assert_eq!(parse_number("0b101"), Ok(5));
        assert_eq!(parse_number("0o17"), Ok(15));
        assert_eq!(
            parse_number("0xZZ").map_err(|(kind, _)| kind),
            Err(AssemblyErrorKind::InvalidNumber { radix: 16 })
        );
        assert!(parse_number("12a").is_err());
        assert_eq!(
            parse_number("0x+5").map_err(|(kind, _)| kind),
            Err(AssemblyErrorKind::InvalidNumber { radix: 16 })
        );
        assert_eq!(
            parse_number("0b-1").map_err(|(kind, _)| kind),
            Err(AssemblyErrorKind::InvalidNumber { radix: 2 })
        );
        assert!(parse_number("+5").is_err());

        Ok(())
    }

    #[test]
    fn test_operands() -> Result<()> {
        assert_eq!(parse_operand("5"), Ok(Operand::Plain(Value::Number(5))));
        assert_eq!(parse_operand("#0x10"), Ok(Operand::Immediate(Value::Number(16))));
        assert_eq!(
            parse_operand("[LOOP]"),
            Ok(Operand::Direct(Value::Symbol("LOOP".into())))
        );
        assert_eq!(parse_operand("r3"), Ok(Operand::Register(r(3))));
        assert_eq!(parse_operand("[ R6 ]"), Ok(Operand::Indirect(r(6))));
        assert_eq!(
            parse_operand("R8").map_err(|(kind, _)| kind),
            Err(AssemblyErrorKind::InvalidRegister)
        );
        assert_eq!(
            parse_operand("[0x10").map_err(|(kind, _)| kind),
            Err(AssemblyErrorKind::InvalidOperand)
        );
        assert_eq!(
            parse_operand("$5").map_err(|(kind, _)| kind),
            Err(AssemblyErrorKind::InvalidOperand)
        );

        Ok(())
    }

    #[test]
    fn test_labels() -> Result<()> {
        assert!(is_label("LOOP"));
        assert!(is_label("_end2"));
        assert!(is_label("RESULT"));
        assert!(!is_label("R1"));
        assert!(!is_label("2nd"));
        assert!(!is_label(""));

        Ok(())
    }

    #[test]
    fn test_line() -> Result<()> {
        let statement = parse_line("  loop: add r5, r4,1 ; step", 3)?;
        assert_eq!(statement.line_nr, 3);
        assert_eq!(statement.label.as_deref(), Some("loop"));
        assert_eq!(statement.mnemonic.as_deref(), Some("ADD"));
        assert_eq!(
            statement.operands,
            vec![
                Operand::Register(r(5)),
                Operand::Register(r(4)),
                Operand::Plain(Value::Number(1))
            ]
        );

        let statement = parse_line("LDRR R7 [ R6 ]", 1)?;
        assert_eq!(statement.operands, vec![Operand::Register(r(7)), Operand::Indirect(r(6))]);

        let statement = parse_line("   ; only a comment", 1)?;
        assert_eq!(statement.mnemonic, None);
        assert_eq!(statement.label, None);

        let statement = parse_line("DONE:", 1)?;
        assert_eq!(statement.label.as_deref(), Some("DONE"));
        assert_eq!(statement.mnemonic, None);

        Ok(())
    }

    #[test]
    fn test_line_errors() -> Result<()> {
        let err = parse_line("1st: HALT", 4).unwrap_err();
        assert_eq!(err.kind(), AssemblyErrorKind::InvalidLabel);
        assert_eq!(err.line(), 4);

        let err = parse_line("LDA 0xG", 2).unwrap_err();
        assert_eq!(err.kind(), AssemblyErrorKind::InvalidNumber { radix: 16 });
        assert_eq!(
            err.to_string(),
            "error [ln: 2]: failed to parse number with radix `16` - `0xG` is not a number"
        );

        Ok(())
    }
}
