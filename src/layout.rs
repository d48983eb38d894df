//! Layout compiler
//!
//! Vehicle tables describe responses in one of two styles:
//! * explicit offsets - padding entries interleaved with fields, offsets accumulate
//! * Torque style positions - every field names its first byte with a letter code,
//!   padding is inferred from the gaps
//!
//! Both are compiled once at startup into a [CompiledLayout]: a flat table of
//! concrete field instances with fixed byte offsets per command. The only part
//! of a compiled layout that can change afterwards is the trailing padding of
//! autopad commands, which is learnt from the first response and then frozen.

use std::fmt::Write as _;
use std::sync::OnceLock;

use byteorder::{BigEndian, ByteOrder};

use crate::command::CommandSpec;
use crate::expr::{EvalContext, Expr};
use crate::field::{Derivation, FieldSpec, FieldWidth, OddWidthOrder};
use crate::position::position_to_index;

/// Largest payload an ISO-TP transfer can carry
pub const MAX_FRAME_LEN: usize = 4095;

/// Layout compiler result
pub type LayoutResult<T> = Result<T, LayoutError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
/// Errors in a vehicle table, reported at startup
pub enum LayoutError {
    /// Field width other than 1, 2, 3, 4 or 8 bytes
    #[error("Unsupported field width {0}")]
    UnsupportedWidth(u8),
    /// A repeated field uses the 3 byte width
    #[error("Repeated field '{0}' must use a power of two width")]
    RepeatedOddWidth(String),
    /// A field repeats zero times
    #[error("Field '{0}' has a repeat count of 0")]
    EmptyRepeat(String),
    /// A field or a whole response exceeds the largest ISO-TP payload
    #[error("'{0}' does not fit in a {MAX_FRAME_LEN} byte response", MAX_FRAME_LEN = MAX_FRAME_LEN)]
    FrameTooLarge(String),
    /// A repeated field's name has no `%d` placeholder
    #[error("Repeated field '{0}' has no index placeholder in its name")]
    MissingPlaceholder(String),
    /// A field carries decode attributes but no name
    #[error("Field without a name carries decode attributes")]
    UnnamedField,
    /// Invalid Torque position code
    #[error("Invalid byte position '{0}'")]
    BadPosition(String),
    /// A Torque style field starts inside the previous field
    #[error("Field '{field}' at position '{position}' overlaps the previous field by {} byte(s)", .gap.unsigned_abs())]
    OverlappingPosition {
        /// Offending field
        field: String,
        /// Its declared position
        position: String,
        /// Inferred gap (negative)
        gap: isize,
    },
    /// A command mixes Torque positions with explicitly placed fields
    #[error("Command {command} mixes positioned and unpositioned field '{field}'")]
    MixedAddressing {
        /// Command label
        command: String,
        /// First unpositioned field
        field: String,
    },
    /// A computed field has no record rule
    #[error("Computed field '{0}' needs a record derivation")]
    ComputedWithoutRule(String),
    /// A record rule was placed in a request command
    #[error("Field '{0}' uses a record derivation outside a computed block")]
    RecordRuleOutsideComputed(String),
    /// A request command has no request bytes
    #[error("Command {0} has no request bytes")]
    EmptyCommand(String),
    /// Incompatible command flags or field kinds
    #[error("Command {0} combines incompatible flags or field kinds")]
    ConflictingFlags(String),
}

/// Expected response length, reported on a length mismatch
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedLen {
    /// Exactly this many bytes
    Exactly(usize),
    /// At least this many bytes
    AtLeast(usize),
    /// Inclusive range
    Between(usize, usize),
}

impl std::fmt::Display for ExpectedLen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpectedLen::Exactly(n) => write!(f, "{n}"),
            ExpectedLen::AtLeast(n) => write!(f, "at least {n}"),
            ExpectedLen::Between(a, b) => write!(f, "{a} to {b}"),
        }
    }
}

/// How the bytes of a field instance turn into a raw number
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeRule {
    /// Big endian integer of a power of two width
    Int {
        /// Width
        width: FieldWidth,
        /// Two's complement
        signed: bool,
    },
    /// 3 byte value read as an 8 bit and a 16 bit part
    Combine24 {
        /// Which part comes first
        order: OddWidthOrder,
        /// Sign extend from 24 bits
        signed: bool,
    },
    /// Expression over the field's own bytes
    Raw(Expr),
}

/// One concrete value of a compiled frame
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInstance {
    /// Concrete name (patterns already expanded)
    pub name: String,
    /// Offset of the first byte in the response
    pub byte_offset: usize,
    /// Number of bytes
    pub byte_len: usize,
    /// Decode rule
    pub rule: DecodeRule,
    /// decoded = raw * scale + offset
    pub scale: f64,
    /// decoded = raw * scale + offset
    pub offset: f64,
}

impl FieldInstance {
    /// Decodes this field from a response whose length has already been checked
    pub fn decode(&self, frame: &[u8]) -> Option<f64> {
        let s = frame.get(self.byte_offset..self.byte_offset + self.byte_len)?;
        let raw = match &self.rule {
            DecodeRule::Int { width, signed } => read_int(s, *width, *signed),
            DecodeRule::Combine24 { order, signed } => combine24(s, *order, *signed),
            DecodeRule::Raw(expr) => expr.eval(&EvalContext::raw(s))?,
        };
        Some(raw * self.scale + self.offset)
    }
}

fn read_int(s: &[u8], width: FieldWidth, signed: bool) -> f64 {
    match (width, signed) {
        (FieldWidth::One, false) => f64::from(s[0]),
        (FieldWidth::One, true) => f64::from(s[0] as i8),
        (FieldWidth::Two, false) => f64::from(BigEndian::read_u16(s)),
        (FieldWidth::Two, true) => f64::from(BigEndian::read_i16(s)),
        (FieldWidth::Four, false) => f64::from(BigEndian::read_u32(s)),
        (FieldWidth::Four, true) => f64::from(BigEndian::read_i32(s)),
        (FieldWidth::Eight, false) => BigEndian::read_u64(s) as f64,
        (FieldWidth::Eight, true) => BigEndian::read_i64(s) as f64,
        // Never compiled to Int, handled by Combine24
        (FieldWidth::Three, _) => combine24(s, OddWidthOrder::HighByteFirst, signed),
    }
}

fn combine24(s: &[u8], order: OddWidthOrder, signed: bool) -> f64 {
    let (high, mid_low) = match order {
        OddWidthOrder::HighByteFirst => (s[0], BigEndian::read_u16(&s[1..3])),
        OddWidthOrder::LowWordFirst => (s[2], BigEndian::read_u16(&s[0..2])),
    };
    let v = (u32::from(high) << 16) | u32::from(mid_low);
    if signed && v & 0x80_0000 != 0 {
        f64::from(v as i32 - 0x100_0000)
    } else {
        f64::from(v)
    }
}

/// Fixed binary template of one response
#[derive(Debug)]
pub struct FrameLayout {
    fields: Vec<FieldInstance>,
    base_len: usize,
    autopad: bool,
    learned_pad: OnceLock<usize>,
}

impl FrameLayout {
    /// Field instances in offset order
    pub fn fields(&self) -> &[FieldInstance] {
        &self.fields
    }

    /// Length described by the table, without learnt padding
    pub fn base_len(&self) -> usize {
        self.base_len
    }

    /// True if trailing padding is learnt at runtime
    pub fn is_autopad(&self) -> bool {
        self.autopad
    }

    /// Learnt trailing padding, if learning already happened
    pub fn learned_padding(&self) -> Option<usize> {
        self.learned_pad.get().copied()
    }

    /// Total frame length, `None` while an autopad layout is still open ended
    pub fn expected_len(&self) -> Option<usize> {
        if self.autopad {
            self.learned_pad.get().map(|pad| self.base_len + pad)
        } else {
            Some(self.base_len)
        }
    }

    /// Checks a response length against the layout. The first response of an autopad
    /// layout fixes its trailing padding for the lifetime of the layout.
    pub(crate) fn accept_len(&self, actual: usize) -> Result<(), ExpectedLen> {
        if let Some(expected) = self.expected_len() {
            return if actual == expected {
                Ok(())
            } else {
                Err(ExpectedLen::Exactly(expected))
            };
        }
        if actual < self.base_len {
            return Err(ExpectedLen::AtLeast(self.base_len));
        }
        let mut learned_here = false;
        let pad = *self.learned_pad.get_or_init(|| {
            learned_here = true;
            actual - self.base_len
        });
        if learned_here {
            log::debug!(
                "Learnt {pad} byte(s) of trailing padding, frame length is now {}",
                self.base_len + pad
            );
        }
        // Another decode may have won the race with a different length
        let expected = self.base_len + pad;
        if actual == expected {
            Ok(())
        } else {
            Err(ExpectedLen::Exactly(expected))
        }
    }

    fn describe(&self) -> String {
        let mut s = String::new();
        for f in &self.fields {
            let _ = write!(s, "{}@{}+{} ", f.name, f.byte_offset, f.byte_len);
        }
        let _ = match self.expected_len() {
            Some(len) => write!(s, "(len {len})"),
            None => write!(s, "(len >= {}, autopad)", self.base_len),
        };
        s
    }
}

/// A named value evaluated from an expression (Torque formulas and computed fields)
#[derive(Debug, Clone, PartialEq)]
pub struct ExprField {
    /// Field name
    pub name: String,
    /// Rule
    pub expr: Expr,
    /// decoded = value * scale + offset
    pub scale: f64,
    /// decoded = value * scale + offset
    pub offset: f64,
}

impl ExprField {
    /// Evaluates the field in `ctx`
    pub fn eval(&self, ctx: &EvalContext<'_>) -> Option<f64> {
        self.expr.eval(ctx).map(|v| v * self.scale + self.offset)
    }
}

/// The single value of a simple command
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleField {
    /// Field name
    pub name: String,
    /// Two's complement
    pub signed: bool,
    /// decoded = raw * scale + offset
    pub scale: f64,
    /// decoded = raw * scale + offset
    pub offset: f64,
}

impl SimpleField {
    /// Decodes the value following `echo_len` echoed request bytes
    pub fn decode(&self, frame: &[u8], echo_len: usize) -> Result<f64, ExpectedLen> {
        let expected = ExpectedLen::Between(echo_len + 1, echo_len + 8);
        let payload = frame.get(echo_len..).ok_or(expected)?;
        let raw = match payload.len() {
            0 | 9.. => return Err(expected),
            n if self.signed => BigEndian::read_int(payload, n) as f64,
            n => BigEndian::read_uint(payload, n) as f64,
        };
        Ok(raw * self.scale + self.offset)
    }
}

/// Compiled form of a command
#[derive(Debug)]
pub enum CompiledKind {
    /// Fixed layout
    Frame(FrameLayout),
    /// Echo plus one variable width integer
    Simple(SimpleField),
    /// Torque formulas over the whole response
    Formula {
        /// Fields in evaluation order
        fields: Vec<ExprField>,
        /// Minimum response length
        min_len: usize,
    },
    /// Fields derived from the record
    Computed(Vec<ExprField>),
}

/// A command together with its compiled layout
#[derive(Debug)]
pub struct CompiledCommand {
    spec: CommandSpec,
    kind: CompiledKind,
}

impl CompiledCommand {
    /// The command as declared
    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    /// The compiled layout
    pub fn kind(&self) -> &CompiledKind {
        &self.kind
    }

    /// Names of every value this command produces, in decode order
    pub fn field_names(&self) -> Vec<&str> {
        match &self.kind {
            CompiledKind::Frame(l) => l.fields.iter().map(|f| f.name.as_str()).collect(),
            CompiledKind::Simple(s) => vec![s.name.as_str()],
            CompiledKind::Formula { fields, .. } | CompiledKind::Computed(fields) => {
                fields.iter().map(|f| f.name.as_str()).collect()
            }
        }
    }

    /// Human readable layout, used in diagnostics
    pub fn describe(&self) -> String {
        match &self.kind {
            CompiledKind::Frame(l) => l.describe(),
            CompiledKind::Simple(s) => format!("{} (simple)", s.name),
            CompiledKind::Formula { fields, min_len } => {
                format!("{} formula(s), len >= {min_len}", fields.len())
            }
            CompiledKind::Computed(fields) => format!("{} computed field(s)", fields.len()),
        }
    }

    fn compile(spec: &CommandSpec) -> LayoutResult<Self> {
        spec.validate()?;
        let kind = if spec.computed {
            CompiledKind::Computed(expr_fields(&spec.fields))
        } else if spec.simple {
            let f = &spec.fields[0];
            CompiledKind::Simple(SimpleField {
                name: f.expanded_names().remove(0),
                signed: f.signed,
                scale: f.scale,
                offset: f.offset,
            })
        } else if spec.uses_formulas() {
            let fields = expr_fields(&spec.fields);
            let min_len = fields
                .iter()
                .filter_map(|f| f.expr.max_byte_index())
                .max()
                .map_or(0, |i| i + 1);
            CompiledKind::Formula { fields, min_len }
        } else if spec.uses_positions() {
            CompiledKind::Frame(compile_positioned(&spec.fields)?)
        } else {
            CompiledKind::Frame(compile_explicit(&spec.fields, spec.autopad)?)
        };
        Ok(Self {
            spec: spec.clone(),
            kind,
        })
    }
}

fn expr_fields(fields: &[FieldSpec]) -> Vec<ExprField> {
    fields
        .iter()
        .filter_map(|f| {
            let expr = match &f.derive {
                Some(Derivation::Record(e)) | Some(Derivation::Frame(e)) => e.clone(),
                _ => return None,
            };
            Some(ExprField {
                name: f.expanded_names().into_iter().next()?,
                expr,
                scale: f.scale,
                offset: f.offset,
            })
        })
        .collect()
}

fn rule_for(f: &FieldSpec) -> DecodeRule {
    match (&f.derive, f.width) {
        (Some(Derivation::Raw(e)), _) => DecodeRule::Raw(e.clone()),
        (_, FieldWidth::Three) => DecodeRule::Combine24 {
            order: f.odd_order,
            signed: f.signed,
        },
        (_, width) => DecodeRule::Int {
            width,
            signed: f.signed,
        },
    }
}

fn expand_into(out: &mut Vec<FieldInstance>, f: &FieldSpec, base_offset: usize) {
    let width = f.width.bytes();
    let rule = rule_for(f);
    for (i, name) in f.expanded_names().into_iter().enumerate() {
        out.push(FieldInstance {
            name,
            byte_offset: base_offset + i * width,
            byte_len: width,
            rule: rule.clone(),
            scale: f.scale,
            offset: f.offset,
        });
    }
}

fn field_end(f: &FieldSpec, start: usize) -> LayoutResult<usize> {
    start
        .checked_add(f.byte_len())
        .filter(|end| *end <= MAX_FRAME_LEN)
        .ok_or_else(|| LayoutError::FrameTooLarge(f.name.clone().unwrap_or_else(|| "<padding>".into())))
}

fn compile_explicit(fields: &[FieldSpec], autopad: bool) -> LayoutResult<FrameLayout> {
    let mut instances = Vec::new();
    let mut offset = 0;
    for f in fields {
        let end = field_end(f, offset)?;
        if !f.is_padding() {
            expand_into(&mut instances, f, offset);
        }
        offset = end;
    }
    Ok(FrameLayout {
        fields: instances,
        base_len: offset,
        autopad,
        learned_pad: OnceLock::new(),
    })
}

fn compile_positioned(fields: &[FieldSpec]) -> LayoutResult<FrameLayout> {
    let mut placed = Vec::with_capacity(fields.len());
    for f in fields {
        let code = f.position.as_deref().unwrap_or_default();
        placed.push((position_to_index(code)?, f));
    }
    placed.sort_by_key(|(idx, _)| *idx);

    let mut instances = Vec::new();
    // One past the last byte of the previous field
    let mut next_free: usize = 0;
    for (idx, f) in placed {
        let gap = idx as isize - next_free as isize;
        if gap < 0 {
            return Err(LayoutError::OverlappingPosition {
                field: f.name.clone().unwrap_or_default(),
                position: f.position.clone().unwrap_or_default(),
                gap,
            });
        }
        let end = field_end(f, idx)?;
        expand_into(&mut instances, f, idx);
        next_free = end;
    }
    // Torque tables never describe the tail of the response
    Ok(FrameLayout {
        fields: instances,
        base_len: next_free,
        autopad: true,
        learned_pad: OnceLock::new(),
    })
}

/// The compiled form of a vehicle table. Built once, shared by every decode pass.
#[derive(Debug)]
pub struct CompiledLayout {
    commands: Vec<CompiledCommand>,
}

impl CompiledLayout {
    /// Validates and compiles a vehicle table
    pub fn compile(specs: &[CommandSpec]) -> LayoutResult<Self> {
        let commands = specs
            .iter()
            .map(CompiledCommand::compile)
            .collect::<LayoutResult<Vec<_>>>()?;
        for c in &commands {
            log::debug!("Compiled {}: {}", c.spec.label(), c.describe());
        }
        Ok(Self { commands })
    }

    /// Compiled commands in declaration order
    pub fn commands(&self) -> &[CompiledCommand] {
        &self.commands
    }

    /// Names of every value the layout can produce
    pub fn field_names(&self) -> Vec<&str> {
        self.commands.iter().flat_map(|c| c.field_names()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;

    fn frame(layout: &CompiledLayout, idx: usize) -> &FrameLayout {
        match layout.commands()[idx].kind() {
            CompiledKind::Frame(f) => f,
            other => panic!("not a frame layout: {other:?}"),
        }
    }

    #[test]
    fn explicit_offsets_accumulate() {
        let spec = CommandSpec::new(&[0x21, 0x01], 0x7EC, 0x7E4)
            .field(FieldSpec::padding(6))
            .field(FieldSpec::new("SOC_BMS", FieldWidth::One).scale(0.5))
            .field(FieldSpec::new("availableChargePower", FieldWidth::Two).scale(0.01))
            .field(FieldSpec::padding(1))
            .field(FieldSpec::new("dcBatteryCurrent", FieldWidth::Two).signed());
        let layout = CompiledLayout::compile(&[spec]).unwrap();
        let f = frame(&layout, 0);
        let offsets: Vec<(usize, usize)> =
            f.fields().iter().map(|i| (i.byte_offset, i.byte_len)).collect();
        assert_eq!(offsets, vec![(6, 1), (7, 2), (10, 2)]);
        assert_eq!(f.expected_len(), Some(12));
    }

    #[test]
    fn patterned_fields_expand_in_order() {
        let spec = CommandSpec::new(&[0x21, 0x02], 0x7EC, 0x7E4)
            .field(FieldSpec::padding(6))
            .field(FieldSpec::new("cell%02d", FieldWidth::One).repeat(1, 32).scale(0.02));
        let layout = CompiledLayout::compile(&[spec]).unwrap();
        let f = frame(&layout, 0);
        assert_eq!(f.fields().len(), 32);
        for (i, inst) in f.fields().iter().enumerate() {
            assert_eq!(inst.name, format!("cell{:02}", i + 1));
            assert_eq!(inst.byte_offset, 6 + i);
        }
        assert_eq!(f.expected_len(), Some(38));
    }

    #[test]
    fn positions_infer_padding() {
        let spec = CommandSpec::new(&[0x22, 0x01, 0x01], 0x7EC, 0x7E4)
            .field(FieldSpec::new("late", FieldWidth::One).at("k"))
            .field(FieldSpec::new("early", FieldWidth::One).at("e"));
        let layout = CompiledLayout::compile(&[spec]).unwrap();
        let f = frame(&layout, 0);
        assert_eq!(f.fields()[0].name, "early");
        assert_eq!(f.fields()[0].byte_offset, 6);
        assert_eq!(f.fields()[1].byte_offset, 12);
        // indices 7..=11 are the 5 byte gap
        assert_eq!(f.fields()[1].byte_offset - (f.fields()[0].byte_offset + 1), 5);
        assert!(f.is_autopad());
        assert_eq!(f.base_len(), 13);
    }

    #[test]
    fn overlapping_positions_fail() {
        let spec = CommandSpec::new(&[0x22, 0x01, 0x01], 0x7EC, 0x7E4)
            .field(FieldSpec::new("wide", FieldWidth::Two).at("e"))
            .field(FieldSpec::new("next", FieldWidth::One).at("f"));
        let err = CompiledLayout::compile(&[spec]).unwrap_err();
        assert_eq!(
            err,
            LayoutError::OverlappingPosition {
                field: "next".into(),
                position: "f".into(),
                gap: -1
            }
        );
    }

    #[test]
    fn three_byte_fields_combine() {
        let hi = FieldInstance {
            name: "odo".into(),
            byte_offset: 0,
            byte_len: 3,
            rule: DecodeRule::Combine24 {
                order: OddWidthOrder::HighByteFirst,
                signed: false,
            },
            scale: 1.0,
            offset: 0.0,
        };
        assert_eq!(hi.decode(&[0x01, 0x23, 0x45]), Some(74565.0));

        let lo = FieldInstance {
            rule: DecodeRule::Combine24 {
                order: OddWidthOrder::LowWordFirst,
                signed: false,
            },
            ..hi.clone()
        };
        assert_eq!(lo.decode(&[0x23, 0x45, 0x01]), Some(74565.0));

        let neg = FieldInstance {
            rule: DecodeRule::Combine24 {
                order: OddWidthOrder::HighByteFirst,
                signed: true,
            },
            ..hi
        };
        assert_eq!(neg.decode(&[0xFF, 0xFF, 0xFE]), Some(-2.0));
    }

    #[test]
    fn three_byte_rule_applies_to_both_styles() {
        let explicit = CommandSpec::new(&[0x22, 0xB0, 0x02], 0x7CE, 0x7C6)
            .field(FieldSpec::padding(9))
            .field(FieldSpec::new("odo", FieldWidth::Three));
        let positioned = CommandSpec::new(&[0x22, 0xB0, 0x02], 0x7CE, 0x7C6)
            .field(FieldSpec::new("odo", FieldWidth::Three).at("h"));
        let layout = CompiledLayout::compile(&[explicit, positioned]).unwrap();
        for idx in 0..2 {
            let inst = &frame(&layout, idx).fields()[0];
            assert_eq!(inst.byte_offset, 9);
            assert!(matches!(inst.rule, DecodeRule::Combine24 { .. }));
        }
    }

    #[test]
    fn scale_offset_and_signedness() {
        let spec = CommandSpec::new(&[0x21, 0x80], 0x7EE, 0x7E6)
            .field(FieldSpec::new("u8", FieldWidth::One))
            .field(FieldSpec::new("i8", FieldWidth::One).signed())
            .field(FieldSpec::new("temp", FieldWidth::One).scale(0.5).offset(-40.0))
            .field(FieldSpec::new("i16", FieldWidth::Two).signed().scale(0.1))
            .field(FieldSpec::new("u32", FieldWidth::Four))
            .field(FieldSpec::new("i64", FieldWidth::Eight).signed());
        let layout = CompiledLayout::compile(&[spec]).unwrap();
        let f = frame(&layout, 0);
        let raw = [
            0xFF, 0xFF, 0x64, 0xFF, 0x9C, 0x00, 0x01, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
            0xFF, 0xFF, 0xFE,
        ];
        let values: Vec<f64> = f.fields().iter().map(|i| i.decode(&raw).unwrap()).collect();
        assert_eq!(values[0], 255.0);
        assert_eq!(values[1], -1.0);
        assert_eq!(values[2], 10.0);
        assert!((values[3] - -10.0).abs() < 1e-9);
        assert_eq!(values[4], 65536.0);
        assert_eq!(values[5], -2.0);
    }

    #[test]
    fn raw_derivation_uses_field_bytes() {
        let spec = CommandSpec::new(&[0x22, 0x01, 0x00], 0x7BB, 0x7B3)
            .field(FieldSpec::padding(3))
            .field(
                FieldSpec::new("gear", FieldWidth::Two)
                    .with_derive(Derivation::Raw(Expr::Bit { byte: 1, bit: 3 })),
            );
        let layout = CompiledLayout::compile(&[spec]).unwrap();
        let inst = &frame(&layout, 0).fields()[0];
        assert_eq!(inst.decode(&[0x62, 0x01, 0x00, 0x00, 0x08]), Some(1.0));
    }

    #[test]
    fn autopad_learns_once() {
        let spec = CommandSpec::new(&[0x22, 0x43, 0xAF], 0x7EC, 0x7E4)
            .autopad()
            .field(FieldSpec::padding(3))
            .field(FieldSpec::new("SOC_BMS", FieldWidth::Two));
        let layout = CompiledLayout::compile(&[spec]).unwrap();
        let f = frame(&layout, 0);
        assert_eq!(f.expected_len(), None);
        assert_eq!(f.accept_len(4), Err(ExpectedLen::AtLeast(5)));
        assert_eq!(f.accept_len(8), Ok(()));
        assert_eq!(f.learned_padding(), Some(3));
        assert_eq!(f.accept_len(5), Err(ExpectedLen::Exactly(8)));
        assert_eq!(f.accept_len(8), Ok(()));
    }

    #[test]
    fn autopad_learning_is_race_free() {
        let spec = CommandSpec::new(&[0x22, 0x43, 0xAF], 0x7EC, 0x7E4)
            .autopad()
            .field(FieldSpec::new("v", FieldWidth::One));
        let layout = CompiledLayout::compile(&[spec]).unwrap();
        let f = frame(&layout, 0);
        let accepted = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| s.spawn(move || f.accept_len(1 + i % 2).is_ok()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });
        let pad = f.learned_padding().unwrap();
        assert!(pad == 0 || pad == 1);
        // Exactly the threads that saw the learnt length were accepted
        assert_eq!(accepted, 4);
    }

    #[test]
    fn simple_field_widths() {
        let s = SimpleField {
            name: "dcBatteryCurrent".into(),
            signed: true,
            scale: 1.0,
            offset: 0.0,
        };
        assert_eq!(s.decode(&[0x62, 0xD8, 0x16, 0xFF, 0xFE], 3), Ok(-2.0));
        assert_eq!(
            s.decode(&[0x62, 0xD8, 0x16], 3),
            Err(ExpectedLen::Between(4, 11))
        );
        let u = SimpleField { signed: false, ..s };
        assert_eq!(u.decode(&[0x62, 0x20, 0x06, 0x01, 0x23, 0x45], 3), Ok(74565.0));
    }

    #[test]
    fn invalid_tables_fail_at_compile_time() {
        let spec = CommandSpec::new(&[0x21, 0x01], 0x7EC, 0x7E4)
            .field(FieldSpec::new("bad%d", FieldWidth::Three).repeat(0, 4));
        assert!(matches!(
            CompiledLayout::compile(&[spec]),
            Err(LayoutError::RepeatedOddWidth(_))
        ));
        let spec = CommandSpec::new(&[0x21, 0x01], 0x7EC, 0x7E4)
            .field(FieldSpec::new("x", FieldWidth::One).at("a1"));
        assert!(matches!(
            CompiledLayout::compile(&[spec]),
            Err(LayoutError::BadPosition(_))
        ));
    }

    #[test]
    fn oversized_tables_fail_at_compile_time() {
        let commands = vec![
            CommandSpec::new(&[0x21, 0x01], 0x7EC, 0x7E4).field(
                FieldSpec::new("cell%d", FieldWidth::Two).repeat(1, usize::MAX),
            ),
        ];
        assert!(matches!(
            CompiledLayout::compile(&commands),
            Err(LayoutError::FrameTooLarge(_))
        ));

        // Each entry fits on its own, the sum does not
        let spec = CommandSpec::new(&[0x21, 0x01], 0x7EC, 0x7E4)
            .field(FieldSpec::padding(MAX_FRAME_LEN))
            .field(FieldSpec::new("SOC_BMS", FieldWidth::One));
        assert!(matches!(
            CompiledLayout::compile(&[spec]),
            Err(LayoutError::FrameTooLarge(name)) if name == "SOC_BMS"
        ));

        let spec = CommandSpec::new(&[0x22, 0x01, 0x01], 0x7EC, 0x7E4)
            .field(FieldSpec::new("cell%03d", FieldWidth::Eight).repeat(1, 511).at("zz"));
        assert!(matches!(
            CompiledLayout::compile(&[spec]),
            Err(LayoutError::FrameTooLarge(_))
        ));

        let spec = CommandSpec::new(&[0x22, 0x01, 0x01], 0x7EC, 0x7E4)
            .field(FieldSpec::new("cell%03d", FieldWidth::Eight).repeat(1, 400).at("zz"));
        assert!(CompiledLayout::compile(&[spec]).is_ok());
    }
}
