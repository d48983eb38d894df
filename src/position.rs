//! Torque style byte positions
//!
//! Some vehicle tables (and the Torque app's PID files) name response bytes
//! with letters instead of offsets. The two echo bytes of the positive
//! response come first, so `a` is byte 2, `z` byte 27, `aa` byte 28 and so on.

use crate::layout::{LayoutError, LayoutResult};

const FIRST_LETTER_INDEX: usize = 2;

/// Converts a position code (`a`..`z`, `aa`..`zz`, case insensitive) to a zero based byte index
pub fn position_to_index(code: &str) -> LayoutResult<usize> {
    let letters = code
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() {
                Ok(c as usize - 'a' as usize)
            } else {
                Err(LayoutError::BadPosition(code.to_string()))
            }
        })
        .collect::<LayoutResult<Vec<usize>>>()?;

    match letters.as_slice() {
        [single] => Ok(single + FIRST_LETTER_INDEX),
        [first, second] => Ok(26 * (first + 1) + second + FIRST_LETTER_INDEX),
        _ => Err(LayoutError::BadPosition(code.to_string())),
    }
}

/// Inverse of [position_to_index]. Returns `None` for the echo bytes and for indexes past `zz`
pub fn index_to_position(index: usize) -> Option<String> {
    let n = index.checked_sub(FIRST_LETTER_INDEX)?;
    let letter = |v: usize| char::from(b'a' + v as u8);
    match n {
        0..=25 => Some(letter(n).to_string()),
        26..=701 => Some(format!("{}{}", letter(n / 26 - 1), letter(n % 26))),
        _ => None,
    }
}
