//! Small, serializable expression language for derived and computed fields
//!
//! Vehicle tables need a handful of post-processing rules: combining bytes,
//! testing status bits, multiplying current by voltage, averaging cell
//! temperatures. [Expr] is a closed set of such operators. It can only read
//! response bytes and fields of the record being built, so tables remain
//! plain data that can be audited and stored as JSON.

use strum_macros::{Display, EnumString};

use crate::field::format_pattern;
use crate::record::DecodedRecord;

/// Binary operators supported by [Expr::Binary]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Display, EnumString)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[strum(serialize_all = "snake_case")]
pub enum BinaryOp {
    /// a + b
    Add,
    /// a - b
    Sub,
    /// a * b
    Mul,
    /// a / b. Division by zero gives no value
    Div,
    /// a << b (integer)
    Shl,
    /// a >> b (integer)
    Shr,
    /// a & b (integer)
    BitAnd,
    /// a | b (integer)
    BitOr,
    /// 1 if a == b else 0
    Eq,
    /// 1 if a != b else 0
    Ne,
    /// 1 if a > b else 0
    Gt,
    /// 1 if a < b else 0
    Lt,
}

impl BinaryOp {
    fn apply(self, a: f64, b: f64) -> Option<f64> {
        let flag = |c: bool| if c { 1.0 } else { 0.0 };
        Some(match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => {
                if b == 0.0 {
                    return None;
                }
                a / b
            }
            BinaryOp::Shl => (as_int(a)? << as_shift(b)?) as f64,
            BinaryOp::Shr => (as_int(a)? >> as_shift(b)?) as f64,
            BinaryOp::BitAnd => (as_int(a)? & as_int(b)?) as f64,
            BinaryOp::BitOr => (as_int(a)? | as_int(b)?) as f64,
            BinaryOp::Eq => flag(a == b),
            BinaryOp::Ne => flag(a != b),
            BinaryOp::Gt => flag(a > b),
            BinaryOp::Lt => flag(a < b),
        })
    }
}

fn as_int(v: f64) -> Option<i64> {
    if v.is_finite() { Some(v as i64) } else { None }
}

fn as_shift(v: f64) -> Option<u32> {
    let s = as_int(v)?;
    if (0..64).contains(&s) { Some(s as u32) } else { None }
}

/// Expression tree
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Expr {
    /// Literal
    Const(f64),
    /// Value of a field already in the record
    Field(String),
    /// Unsigned byte of the raw input
    Byte(usize),
    /// Signed byte of the raw input
    SignedByte(usize),
    /// Single bit of a raw byte, 1 or 0
    Bit {
        /// Byte index
        byte: usize,
        /// Bit number, 0 = LSB
        bit: u8,
    },
    /// Big endian unsigned combination of the listed raw bytes
    Word(Vec<usize>),
    /// Binary operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        lhs: Box<Expr>,
        /// Right operand
        rhs: Box<Expr>,
    },
    /// 1 if any operand is non zero, else 0
    Any(Vec<Expr>),
    /// 1 if the operand equals one of the listed values, else 0
    OneOf(Box<Expr>, Vec<f64>),
    /// Mean of the pattern fields `start..start+count` present in the record
    Mean {
        /// Name pattern with a `%d` placeholder
        pattern: String,
        /// First index
        start: usize,
        /// Number of fields
        count: usize,
    },
    /// Sum of the pattern fields up to the first value that is not positive, divided
    /// by the number of fields read including that value. Every field up to the stop
    /// must be present
    MeanUntilNonPositive {
        /// Name pattern with a `%d` placeholder
        pattern: String,
        /// First index
        start: usize,
        /// Maximum number of fields
        count: usize,
    },
}

/// Inputs an expression may read from
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalContext<'a> {
    /// Raw bytes (the field's own bytes or the whole response)
    pub raw: Option<&'a [u8]>,
    /// Record decoded so far
    pub record: Option<&'a DecodedRecord>,
}

impl<'a> EvalContext<'a> {
    /// Context over raw bytes only
    pub fn raw(raw: &'a [u8]) -> Self {
        Self {
            raw: Some(raw),
            record: None,
        }
    }

    /// Context over the record only
    pub fn record(record: &'a DecodedRecord) -> Self {
        Self {
            raw: None,
            record: Some(record),
        }
    }

    /// Context over both
    pub fn frame(raw: &'a [u8], record: &'a DecodedRecord) -> Self {
        Self {
            raw: Some(raw),
            record: Some(record),
        }
    }

    fn byte(&self, idx: usize) -> Option<u8> {
        self.raw.and_then(|r| r.get(idx).copied())
    }

    fn field(&self, name: &str) -> Option<f64> {
        self.record.and_then(|r| r.get(name))
    }
}

impl Expr {
    /// Reference to a record field
    pub fn field<T: Into<String>>(name: T) -> Self {
        Expr::Field(name.into())
    }

    /// Builds `lhs <op> rhs`
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// `a * b`
    pub fn product(a: Expr, b: Expr) -> Self {
        Self::binary(BinaryOp::Mul, a, b)
    }

    /// `a * b / 1000`, the usual current x voltage -> kW rule
    pub fn power_kw<A: Into<String>, B: Into<String>>(current: A, voltage: B) -> Self {
        Self::binary(
            BinaryOp::Div,
            Self::product(Expr::field(current), Expr::field(voltage)),
            Expr::Const(1000.0),
        )
    }

    /// 1 if `field & mask` is non zero
    pub fn mask_set<T: Into<String>>(field: T, mask: u32) -> Self {
        Self::binary(
            BinaryOp::Ne,
            Self::binary(BinaryOp::BitAnd, Expr::field(field), Expr::Const(mask as f64)),
            Expr::Const(0.0),
        )
    }

    /// 1 if `field == value`
    pub fn equals<T: Into<String>>(field: T, value: f64) -> Self {
        Self::binary(BinaryOp::Eq, Expr::field(field), Expr::Const(value))
    }

    /// Evaluates the expression. `None` means a referenced input is missing or the
    /// arithmetic is undefined
    pub fn eval(&self, ctx: &EvalContext<'_>) -> Option<f64> {
        match self {
            Expr::Const(v) => Some(*v),
            Expr::Field(name) => ctx.field(name),
            Expr::Byte(i) => ctx.byte(*i).map(f64::from),
            Expr::SignedByte(i) => ctx.byte(*i).map(|b| f64::from(b as i8)),
            Expr::Bit { byte, bit } => {
                let b = ctx.byte(*byte)?;
                if *bit > 7 {
                    return None;
                }
                Some(f64::from((b >> bit) & 1))
            }
            Expr::Word(bytes) => {
                if bytes.is_empty() || bytes.len() > 8 {
                    return None;
                }
                let mut v: u64 = 0;
                for i in bytes {
                    v = (v << 8) | u64::from(ctx.byte(*i)?);
                }
                Some(v as f64)
            }
            Expr::Binary { op, lhs, rhs } => op.apply(lhs.eval(ctx)?, rhs.eval(ctx)?),
            Expr::Any(items) => {
                let mut any = false;
                for e in items {
                    any |= e.eval(ctx)? != 0.0;
                }
                Some(if any { 1.0 } else { 0.0 })
            }
            Expr::OneOf(e, set) => {
                let v = e.eval(ctx)?;
                Some(if set.contains(&v) { 1.0 } else { 0.0 })
            }
            Expr::Mean {
                pattern,
                start,
                count,
            } => {
                let end = start.checked_add(*count)?;
                let values: Vec<f64> = (*start..end)
                    .filter_map(|i| ctx.field(&format_pattern(pattern, i)))
                    .collect();
                if values.is_empty() {
                    None
                } else {
                    Some(values.iter().sum::<f64>() / values.len() as f64)
                }
            }
            Expr::MeanUntilNonPositive {
                pattern,
                start,
                count,
            } => {
                let end = start.checked_add(*count)?;
                let mut sum = 0.0;
                let mut read = 0usize;
                for i in *start..end {
                    let v = ctx.field(&format_pattern(pattern, i))?;
                    read += 1;
                    if v <= 0.0 {
                        break;
                    }
                    sum += v;
                }
                if read == 0 {
                    None
                } else {
                    Some(sum / read as f64)
                }
            }
        }
    }

    /// Highest raw byte index read by this expression, if any
    pub fn max_byte_index(&self) -> Option<usize> {
        match self {
            Expr::Byte(i) | Expr::SignedByte(i) | Expr::Bit { byte: i, .. } => Some(*i),
            Expr::Word(bytes) => bytes.iter().copied().max(),
            Expr::Binary { lhs, rhs, .. } => lhs.max_byte_index().max(rhs.max_byte_index()),
            Expr::Any(items) => items.iter().filter_map(Expr::max_byte_index).max(),
            Expr::OneOf(e, _) => e.max_byte_index(),
            Expr::Const(_)
            | Expr::Field(_)
            | Expr::Mean { .. }
            | Expr::MeanUntilNonPositive { .. } => None,
        }
    }
}
