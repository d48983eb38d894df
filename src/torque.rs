//! Support for Torque PID definitions
//!
//! The Torque app describes extended PIDs as CSV lines:
//!
//! ```text
//! name;display name;command;formula;min;max;unit;tx id[;rx id]
//! ```
//!
//! Formulas address response bytes with letter positions (`a`..`zz`, see
//! [crate::position]) and support:
//! * `Signed(X)` - byte X as two's complement
//! * `Val{name}` - a value decoded earlier in the pass
//! * `INT16(A:B)`, `INT24(A:B:C)`, `INT32(A:B:C:D)` - big endian combination
//! * `{X:n}` - bit n of byte X
//! * numbers, `+ - * /`, `<` / `>` (shifts), `&`, `|` and parentheses
//!
//! Formulas are compiled to [Expr] trees, so a Torque file produces an ordinary
//! vehicle table.

use std::collections::BTreeMap;

use crate::{
    command::CommandSpec,
    expr::{BinaryOp, Expr},
    field::{Derivation, FieldSpec, FieldWidth},
    layout::LayoutError,
    position::position_to_index,
};

/// Formula parse error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormulaError {
    /// Unexpected character
    #[error("Unexpected '{found}' at offset {offset}")]
    Unexpected {
        /// Byte offset in the formula
        offset: usize,
        /// Offending character
        found: char,
    },
    /// The formula ended in the middle of an expression
    #[error("Formula ended unexpectedly")]
    UnexpectedEnd,
    /// Invalid letter position
    #[error("Invalid byte position")]
    Position(
        #[from]
        #[source]
        LayoutError,
    ),
    /// `INTnn` with an unsupported width
    #[error("Invalid INT width {0}")]
    IntWidth(u32),
    /// `INTnn` with the wrong number of positions
    #[error("INT{bits} takes {want} byte position(s), found {found}")]
    IntArity {
        /// Declared width
        bits: u32,
        /// Expected number of positions
        want: usize,
        /// Number of positions found
        found: usize,
    },
    /// Invalid `Val{}` reference
    #[error("Invalid field reference '{0}'")]
    BadName(String),
    /// Bit number above 7
    #[error("Bit number {0} out of range")]
    BadBit(u32),
}

/// Torque CSV error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CsvError {
    /// Not enough columns
    #[error("Line {line}: expected at least 8 columns, found {found}")]
    Columns {
        /// Line number (1 based)
        line: usize,
        /// Number of columns found
        found: usize,
    },
    /// Invalid command bytes or CAN ID
    #[error("Line {line}: invalid hex value '{value}'")]
    Hex {
        /// Line number (1 based)
        line: usize,
        /// Offending value
        value: String,
    },
    /// Invalid formula
    #[error("Line {line}: invalid formula")]
    Formula {
        /// Line number (1 based)
        line: usize,
        /// Parse error
        #[source]
        source: FormulaError,
    },
}

/// Parses a Torque formula
pub fn parse_formula(formula: &str) -> Result<Expr, FormulaError> {
    let mut p = Parser {
        src: formula,
        pos: 0,
    };
    let expr = p.parse_or()?;
    p.skip_ws();
    match p.peek() {
        None => Ok(expr),
        Some(c) => Err(p.unexpected(c)),
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn rest(&self) -> &str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        self.take_while(char::is_whitespace);
    }

    fn unexpected(&self, found: char) -> FormulaError {
        FormulaError::Unexpected {
            offset: self.pos,
            found,
        }
    }

    fn expect(&mut self, want: char) -> Result<(), FormulaError> {
        self.skip_ws();
        match self.peek() {
            Some(c) if c == want => {
                self.pos += c.len_utf8();
                Ok(())
            }
            Some(c) => Err(self.unexpected(c)),
            None => Err(FormulaError::UnexpectedEnd),
        }
    }

    fn take_while<F: Fn(char) -> bool>(&mut self, f: F) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !f(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.src[start..self.pos]
    }

    fn starts_with_keyword(&self, kw: &str) -> bool {
        self.rest()
            .get(..kw.len())
            .is_some_and(|s| s.eq_ignore_ascii_case(kw))
    }

    fn binary_level<F>(&mut self, ops: &[(char, BinaryOp)], mut next: F) -> Result<Expr, FormulaError>
    where
        F: FnMut(&mut Self) -> Result<Expr, FormulaError>,
    {
        let mut lhs = next(self)?;
        loop {
            self.skip_ws();
            let Some(c) = self.peek() else {
                return Ok(lhs);
            };
            let Some((_, op)) = ops.iter().find(|(sym, _)| *sym == c) else {
                return Ok(lhs);
            };
            self.pos += 1;
            let rhs = next(self)?;
            lhs = Expr::binary(*op, lhs, rhs);
        }
    }

    fn parse_or(&mut self) -> Result<Expr, FormulaError> {
        self.binary_level(&[('|', BinaryOp::BitOr)], Self::parse_and)
    }

    fn parse_and(&mut self) -> Result<Expr, FormulaError> {
        self.binary_level(&[('&', BinaryOp::BitAnd)], Self::parse_shift)
    }

    fn parse_shift(&mut self) -> Result<Expr, FormulaError> {
        let ops = [('<', BinaryOp::Shl), ('>', BinaryOp::Shr)];
        self.binary_level(&ops, Self::parse_sum)
    }

    fn parse_sum(&mut self) -> Result<Expr, FormulaError> {
        let ops = [('+', BinaryOp::Add), ('-', BinaryOp::Sub)];
        self.binary_level(&ops, Self::parse_product)
    }

    fn parse_product(&mut self) -> Result<Expr, FormulaError> {
        let ops = [('*', BinaryOp::Mul), ('/', BinaryOp::Div)];
        self.binary_level(&ops, Self::parse_unary)
    }

    fn parse_unary(&mut self) -> Result<Expr, FormulaError> {
        self.skip_ws();
        if self.peek() == Some('-') {
            self.pos += 1;
            let operand = self.parse_unary()?;
            return Ok(Expr::binary(BinaryOp::Sub, Expr::Const(0.0), operand));
        }
        self.parse_atom()
    }

    fn position(&mut self) -> Result<usize, FormulaError> {
        self.skip_ws();
        let code = self.take_while(|c| c.is_ascii_alphabetic());
        if code.is_empty() {
            return match self.peek() {
                Some(c) => Err(self.unexpected(c)),
                None => Err(FormulaError::UnexpectedEnd),
            };
        }
        Ok(position_to_index(code)?)
    }

    fn number(&mut self) -> Result<u32, FormulaError> {
        self.skip_ws();
        let digits = self.take_while(|c| c.is_ascii_digit());
        digits.parse().map_err(|_| FormulaError::UnexpectedEnd)
    }

    fn parse_atom(&mut self) -> Result<Expr, FormulaError> {
        self.skip_ws();
        let Some(c) = self.peek() else {
            return Err(FormulaError::UnexpectedEnd);
        };
        match c {
            '(' => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.expect(')')?;
                Ok(inner)
            }
            '0'..='9' | '.' => {
                let start = self.pos;
                let text = self.take_while(|c| c.is_ascii_digit() || c == '.');
                text.parse::<f64>().map(Expr::Const).map_err(|_| FormulaError::Unexpected {
                    offset: start,
                    found: c,
                })
            }
            '{' => {
                self.pos += 1;
                let byte = self.position()?;
                self.expect(':')?;
                let bit = self.number()?;
                self.expect('}')?;
                if bit > 7 {
                    return Err(FormulaError::BadBit(bit));
                }
                Ok(Expr::Bit {
                    byte,
                    bit: bit as u8,
                })
            }
            _ if self.starts_with_keyword("signed") => {
                self.pos += "signed".len();
                self.expect('(')?;
                let byte = self.position()?;
                self.expect(')')?;
                Ok(Expr::SignedByte(byte))
            }
            _ if self.starts_with_keyword("val") && self.rest()[3..].trim_start().starts_with('{') => {
                self.pos += "val".len();
                self.expect('{')?;
                let name = self.take_while(|c| c != '}').trim().to_string();
                self.expect('}')?;
                let valid = !name.is_empty()
                    && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ');
                if !valid {
                    return Err(FormulaError::BadName(name));
                }
                Ok(Expr::Field(name))
            }
            _ if self.starts_with_keyword("int")
                && self.rest()[3..].starts_with(|c: char| c.is_ascii_digit()) =>
            {
                self.pos += "int".len();
                let bits = self.number()?;
                if bits == 0 || bits % 8 != 0 || bits > 64 {
                    return Err(FormulaError::IntWidth(bits));
                }
                self.expect('(')?;
                let mut bytes = vec![self.position()?];
                loop {
                    self.skip_ws();
                    match self.peek() {
                        Some(':') => {
                            self.pos += 1;
                            bytes.push(self.position()?);
                        }
                        _ => break,
                    }
                }
                self.expect(')')?;
                let want = (bits / 8) as usize;
                if bytes.len() != want {
                    return Err(FormulaError::IntArity {
                        bits,
                        want,
                        found: bytes.len(),
                    });
                }
                Ok(Expr::Word(bytes))
            }
            c if c.is_ascii_alphabetic() => Ok(Expr::Byte(self.position()?)),
            c => Err(self.unexpected(c)),
        }
    }
}

fn split_columns(line: &str) -> Vec<&str> {
    line.split([';', ',']).map(str::trim).collect()
}

/// Highest 29 bit CAN identifier
const MAX_CAN_ID: u32 = 0x1FFF_FFFF;

fn parse_hex_id(line: usize, value: &str) -> Result<u32, CsvError> {
    let digits = value.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16)
        .ok()
        .filter(|id| *id <= MAX_CAN_ID)
        .ok_or_else(|| CsvError::Hex {
            line,
            value: value.to_string(),
        })
}

/// Parses a Torque CSV file into a vehicle table.
///
/// PIDs sharing a transmit ID and request bytes are grouped into one command,
/// in order of first appearance. The receive ID defaults to the transmit ID + 8.
/// Empty lines and lines starting with `#` are ignored.
pub fn load_csv(text: &str) -> Result<Vec<CommandSpec>, CsvError> {
    let mut commands: Vec<CommandSpec> = Vec::new();
    let mut index: BTreeMap<(u32, Vec<u8>), usize> = BTreeMap::new();

    for (i, raw_line) in text.lines().enumerate() {
        let line = i + 1;
        let trimmed = raw_line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let cols = split_columns(trimmed);
        if cols.len() < 8 {
            return Err(CsvError::Columns {
                line,
                found: cols.len(),
            });
        }
        let name = cols[0];
        let command = hex::decode(cols[2]).map_err(|_| CsvError::Hex {
            line,
            value: cols[2].to_string(),
        })?;
        let expr = parse_formula(cols[3]).map_err(|source| CsvError::Formula { line, source })?;
        let tx_id = parse_hex_id(line, cols[7])?;
        let rx_id = match cols.get(8).filter(|s| !s.is_empty()) {
            Some(rx) => parse_hex_id(line, rx)?,
            None => tx_id.checked_add(8).ok_or_else(|| CsvError::Hex {
                line,
                value: cols[7].to_string(),
            })?,
        };

        let field = FieldSpec::new(name, FieldWidth::One).with_derive(Derivation::Frame(expr));
        let key = (tx_id, command);
        match index.get(&key) {
            Some(&idx) => commands[idx].fields.push(field),
            None => {
                index.insert(key.clone(), commands.len());
                commands.push(CommandSpec::new(&key.1, rx_id, tx_id).field(field));
            }
        }
    }
    log::debug!("Loaded {} Torque command(s)", commands.len());
    Ok(commands)
}
