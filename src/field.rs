//! Field specifications: one named value inside a diagnostic response

use strum_macros::{Display, EnumString};

use crate::expr::Expr;
use crate::layout::{LayoutError, LayoutResult, MAX_FRAME_LEN};

/// Supported field widths in bytes
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub enum FieldWidth {
    /// 8 bit
    #[strum(serialize = "1")]
    One,
    /// 16 bit
    #[strum(serialize = "2")]
    Two,
    /// 24 bit. Only allowed on single (non repeated) fields, see [OddWidthOrder]
    #[strum(serialize = "3")]
    Three,
    /// 32 bit
    #[strum(serialize = "4")]
    Four,
    /// 64 bit
    #[strum(serialize = "8")]
    Eight,
}

impl FieldWidth {
    /// Number of bytes occupied by one value of this width
    pub const fn bytes(self) -> usize {
        match self {
            FieldWidth::One => 1,
            FieldWidth::Two => 2,
            FieldWidth::Three => 3,
            FieldWidth::Four => 4,
            FieldWidth::Eight => 8,
        }
    }

    /// True for the widths a repeating binary template can express
    pub const fn is_power_of_two(self) -> bool {
        !matches!(self, FieldWidth::Three)
    }
}

impl TryFrom<u8> for FieldWidth {
    type Error = LayoutError;

    fn try_from(width: u8) -> Result<Self, Self::Error> {
        match width {
            1 => Ok(FieldWidth::One),
            2 => Ok(FieldWidth::Two),
            3 => Ok(FieldWidth::Three),
            4 => Ok(FieldWidth::Four),
            8 => Ok(FieldWidth::Eight),
            w => Err(LayoutError::UnsupportedWidth(w)),
        }
    }
}

impl From<FieldWidth> for u8 {
    fn from(width: FieldWidth) -> Self {
        width.bytes() as u8
    }
}

/// How a 3 byte field is split into an 8 bit and a 16 bit read.
///
/// The order is a property of the vendor table, it is never inferred from the data.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OddWidthOrder {
    /// `[high][mid low]` - value is `high << 16 | mid_low`
    #[default]
    HighByteFirst,
    /// `[mid low][high]` - the 16 bit word comes first on the wire
    LowWordFirst,
}

/// Post-processing rule of a field. Replaces free-form closures so vehicle tables stay data.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Derivation {
    /// Evaluated on the field's own bytes ([Expr::Byte] indexes are relative to the field start)
    Raw(Expr),
    /// Evaluated on the full response and the record built so far (Torque formulas)
    Frame(Expr),
    /// Evaluated on the record built so far. Only valid inside computed commands
    Record(Expr),
}

/// One named value of a response, or anonymous padding
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldSpec {
    /// Field name. May contain one `%d` style placeholder for repeated fields.
    /// `None` marks padding
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub name: Option<String>,
    /// Width of a single value
    #[cfg_attr(feature = "serde", serde(default = "default_width"))]
    pub width: FieldWidth,
    /// Two's complement value
    #[cfg_attr(feature = "serde", serde(default))]
    pub signed: bool,
    /// decoded = raw * scale + offset
    #[cfg_attr(feature = "serde", serde(default = "default_scale"))]
    pub scale: f64,
    /// decoded = raw * scale + offset
    #[cfg_attr(feature = "serde", serde(default))]
    pub offset: f64,
    /// How many consecutive values this entry expands to
    #[cfg_attr(feature = "serde", serde(default = "default_repeat"))]
    pub repeat_count: usize,
    /// Index formatted into the name of the first expanded value
    #[cfg_attr(feature = "serde", serde(default))]
    pub repeat_start_index: usize,
    /// Torque style byte position (`a`..`zz`), used instead of explicit padding
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub position: Option<String>,
    /// Split order of 3 byte fields
    #[cfg_attr(feature = "serde", serde(default))]
    pub odd_order: OddWidthOrder,
    /// Optional post-processing rule
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub derive: Option<Derivation>,
}

#[cfg(feature = "serde")]
fn default_width() -> FieldWidth {
    FieldWidth::One
}

#[cfg(feature = "serde")]
fn default_scale() -> f64 {
    1.0
}

#[cfg(feature = "serde")]
fn default_repeat() -> usize {
    1
}

impl FieldSpec {
    /// Creates an unsigned, unscaled field
    pub fn new<T: Into<String>>(name: T, width: FieldWidth) -> Self {
        Self {
            name: Some(name.into()),
            width,
            signed: false,
            scale: 1.0,
            offset: 0.0,
            repeat_count: 1,
            repeat_start_index: 0,
            position: None,
            odd_order: OddWidthOrder::default(),
            derive: None,
        }
    }

    /// Creates `bytes` bytes of anonymous padding
    pub fn padding(bytes: usize) -> Self {
        Self {
            name: None,
            repeat_count: bytes,
            ..Self::new("", FieldWidth::One)
        }
    }

    /// Creates a zero width field computed from the record
    pub fn computed<T: Into<String>>(name: T, expr: Expr) -> Self {
        Self::new(name, FieldWidth::One).with_derive(Derivation::Record(expr))
    }

    /// Marks the field as signed
    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    /// Sets the scale factor
    pub fn scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Sets the additive offset
    pub fn offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }

    /// Expands the field into `count` values named from index `start` onwards
    pub fn repeat(mut self, start: usize, count: usize) -> Self {
        self.repeat_start_index = start;
        self.repeat_count = count;
        self
    }

    /// Places the field at a Torque style byte position
    pub fn at<T: Into<String>>(mut self, position: T) -> Self {
        self.position = Some(position.into());
        self
    }

    /// Sets the split order of a 3 byte field
    pub fn odd_order(mut self, order: OddWidthOrder) -> Self {
        self.odd_order = order;
        self
    }

    /// Attaches a derivation rule
    pub fn with_derive(mut self, derive: Derivation) -> Self {
        self.derive = Some(derive);
        self
    }

    /// True if this entry only advances the byte offset
    pub fn is_padding(&self) -> bool {
        self.name.is_none()
    }

    /// Total bytes covered by this entry. Saturates for entries that fail [Self::validate]
    pub fn byte_len(&self) -> usize {
        self.width.bytes().saturating_mul(self.repeat_count)
    }

    fn is_plain(&self) -> bool {
        !self.signed && self.scale == 1.0 && self.offset == 0.0 && self.derive.is_none()
    }

    /// Construction time checks. Called by the layout compiler, never while decoding
    pub fn validate(&self) -> LayoutResult<()> {
        let label = self.name.clone().unwrap_or_else(|| "<padding>".into());
        if self.repeat_count == 0 {
            return Err(LayoutError::EmptyRepeat(label));
        }
        if self.repeat_count > 1 && !self.width.is_power_of_two() {
            return Err(LayoutError::RepeatedOddWidth(label));
        }
        let fits = self
            .width
            .bytes()
            .checked_mul(self.repeat_count)
            .is_some_and(|len| len <= MAX_FRAME_LEN);
        if !fits {
            return Err(LayoutError::FrameTooLarge(label));
        }
        match &self.name {
            None if !self.is_plain() => Err(LayoutError::UnnamedField),
            Some(n) if n.is_empty() => Err(LayoutError::UnnamedField),
            Some(n) if self.repeat_count > 1 && !has_placeholder(n) => {
                Err(LayoutError::MissingPlaceholder(n.clone()))
            }
            _ => Ok(()),
        }
    }

    /// Concrete names of all values this entry expands to. Empty for padding
    pub fn expanded_names(&self) -> Vec<String> {
        match &self.name {
            None => Vec::new(),
            Some(n) if has_placeholder(n) => (0..self.repeat_count)
                .map(|i| format_pattern(n, self.repeat_start_index + i))
                .collect(),
            Some(n) => vec![n.clone()],
        }
    }
}

/// Returns true if `pattern` contains a `%d` / `%0Nd` placeholder
pub fn has_placeholder(pattern: &str) -> bool {
    find_placeholder(pattern).is_some()
}

// (start, end, zero padded width)
fn find_placeholder(pattern: &str) -> Option<(usize, usize, usize)> {
    let bytes = pattern.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j < bytes.len() && bytes[j] == b'd' {
                let width = pattern[i + 1..j].parse::<usize>().unwrap_or(0);
                return Some((i, j + 1, width));
            }
        }
        i += 1;
    }
    None
}

/// Formats `index` into the first placeholder of `pattern` (`cellVoltage%02d`, 7 -> `cellVoltage07`)
pub fn format_pattern(pattern: &str, index: usize) -> String {
    match find_placeholder(pattern) {
        Some((start, end, width)) => format!(
            "{}{:0width$}{}",
            &pattern[..start],
            index,
            &pattern[end..],
            width = width
        ),
        None => pattern.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_from_u8() {
        assert_eq!(FieldWidth::try_from(3).unwrap(), FieldWidth::Three);
        assert_eq!(FieldWidth::try_from(8).unwrap().bytes(), 8);
        assert!(matches!(
            FieldWidth::try_from(5),
            Err(LayoutError::UnsupportedWidth(5))
        ));
        assert_eq!("4".parse::<FieldWidth>().unwrap(), FieldWidth::Four);
        assert_eq!(FieldWidth::Two.to_string(), "2");
    }

    #[test]
    fn pattern_formatting() {
        assert_eq!(format_pattern("cell%02d", 1), "cell01");
        assert_eq!(format_pattern("cellVoltage%03d", 97), "cellVoltage097");
        assert_eq!(format_pattern("temp%d_max", 12), "temp12_max");
        assert_eq!(format_pattern("odo", 3), "odo");
        assert!(!has_placeholder("100%"));
    }

    #[test]
    fn expanded_names() {
        let f = FieldSpec::new("cell%02d", FieldWidth::One).repeat(1, 32);
        let names = f.expanded_names();
        assert_eq!(names.len(), 32);
        assert_eq!(names[0], "cell01");
        assert_eq!(names[31], "cell32");
        assert!(FieldSpec::padding(6).expanded_names().is_empty());
    }

    #[test]
    fn validation_rules() {
        assert!(FieldSpec::new("odo", FieldWidth::Three).validate().is_ok());
        assert!(matches!(
            FieldSpec::new("x%d", FieldWidth::Three).repeat(0, 2).validate(),
            Err(LayoutError::RepeatedOddWidth(_))
        ));
        assert!(matches!(
            FieldSpec::new("cell", FieldWidth::One).repeat(1, 4).validate(),
            Err(LayoutError::MissingPlaceholder(_))
        ));
        assert!(matches!(
            FieldSpec::padding(2).scale(0.5).validate(),
            Err(LayoutError::UnnamedField)
        ));
        assert!(matches!(
            FieldSpec::padding(0).validate(),
            Err(LayoutError::EmptyRepeat(_))
        ));
        assert!(FieldSpec::padding(11).validate().is_ok());
        assert_eq!(FieldSpec::padding(11).byte_len(), 11);
        let huge = FieldSpec::new("cell%d", FieldWidth::Two).repeat(1, usize::MAX);
        assert!(matches!(huge.validate(), Err(LayoutError::FrameTooLarge(_))));
        assert_eq!(huge.byte_len(), usize::MAX);
    }
}
