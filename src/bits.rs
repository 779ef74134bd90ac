// Small numeric helpers shared by the tokenizer, the encoders and the
// simulator. The parsing rules here are the SPIM-compatible ones: hex and
// octal literals always denote a 32-bit bit pattern and are never
// sign-extended from a shorter width.

/// Parse an integer literal: decimal (optionally signed), `0x`/`0X` hex,
/// leading-zero octal, or a character literal already quoted with `'`.
/// The result is the 32-bit bit pattern the literal denotes.
pub fn parse_int(literal: &str) -> Option<i32> {
    if literal.starts_with('\'') {
        return char_literal_value(literal);
    }
    let (negative, body) = match literal.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, literal.strip_prefix('+').unwrap_or(literal)),
    };
    if body.is_empty() {
        return None;
    }
    if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        let value = u32::from_str_radix(hex, 16).ok()? as i32;
        return Some(if negative { value.wrapping_neg() } else { value });
    }
    if body.len() > 1 && body.starts_with('0') && body.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        let value = u32::from_str_radix(body, 8).ok()? as i32;
        return Some(if negative { value.wrapping_neg() } else { value });
    }
    if negative {
        literal.parse::<i64>().ok().and_then(|v| {
            if v >= i32::min_value() as i64 {
                Some(v as i32)
            } else {
                None
            }
        })
    } else {
        // Positive decimals up to 0xffffffff are accepted as bit patterns.
        body.parse::<i64>().ok().and_then(|v| {
            if v <= u32::max_value() as i64 {
                Some(v as u32 as i32)
            } else {
                None
            }
        })
    }
}

pub fn parse_real(literal: &str) -> Option<f64> {
    // Reject forms the integer parser should own outright.
    if literal.is_empty() {
        return None;
    }
    literal.parse::<f64>().ok()
}

/// Value of a character literal such as `'a'`, `'\n'` or `'\0'`.
/// Returns None for malformed literals.
pub fn char_literal_value(literal: &str) -> Option<i32> {
    let inner = literal.strip_prefix('\'')?.strip_suffix('\'')?;
    let mut chars = inner.chars();
    let value = match chars.next()? {
        '\\' => escape_value(chars.next()?)?,
        c => c as i32,
    };
    if chars.next().is_some() {
        return None;
    }
    Some(value)
}

/// C-style escape characters accepted in character and string literals.
pub fn escape_value(c: char) -> Option<i32> {
    match c {
        'n' => Some(10),
        't' => Some(9),
        'r' => Some(13),
        '\\' => Some(92),
        '\'' => Some(39),
        '"' => Some(34),
        'b' => Some(8),
        'f' => Some(12),
        '0' => Some(0),
        _ => None,
    }
}

pub fn lo_half(value: i32) -> i32 {
    value & 0xffff
}

pub fn hi_half(value: i32) -> i32 {
    (value as u32 >> 16) as i32
}

/// High half adjusted for pairing with a sign-extended low half, as used
/// when the low 16 bits land in a load/store displacement.
pub fn hi_half_adjusted(value: i32) -> i32 {
    ((value as u32).wrapping_add(0x8000) >> 16) as i32
}

pub fn sign_extend(value: i32, bits: u32) -> i32 {
    let shift = 32 - bits;
    (value << shift) >> shift
}

pub fn words_to_long(hi: i32, lo: i32) -> i64 {
    ((hi as i64) << 32) | (lo as u32 as i64)
}

pub fn long_to_words(value: i64) -> (i32, i32) {
    ((value >> 32) as i32, value as i32)
}

pub fn fits_signed_16(value: i32) -> bool {
    (-32768..=32767).contains(&value)
}

pub fn fits_unsigned_16(value: i32) -> bool {
    (0..=65535).contains(&value)
}

pub fn fits_5(value: i32) -> bool {
    (0..=31).contains(&value)
}

pub fn to_hex(value: i32) -> String {
    format!("0x{:08x}", value as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_is_a_bit_pattern() {
        assert_eq!(parse_int("0xffff"), Some(65535));
        assert_eq!(parse_int("0xffffffff"), Some(-1));
        assert_eq!(parse_int("0x80000000"), Some(i32::min_value()));
    }

    #[test]
    fn decimal_and_octal() {
        assert_eq!(parse_int("-8"), Some(-8));
        assert_eq!(parse_int("017"), Some(15));
        assert_eq!(parse_int("4294967295"), Some(-1));
        assert_eq!(parse_int("4294967296"), None);
        assert_eq!(parse_int("0"), Some(0));
    }

    #[test]
    fn char_literals() {
        assert_eq!(parse_int("'a'"), Some(97));
        assert_eq!(parse_int("'\\n'"), Some(10));
        assert_eq!(parse_int("'ab'"), None);
        assert_eq!(parse_int("'"), None);
    }

    #[test]
    fn halves() {
        assert_eq!(hi_half(0x10010000u32 as i32), 0x1001);
        assert_eq!(lo_half(0x10018004u32 as i32), 0x8004);
        assert_eq!(hi_half_adjusted(0x10018004u32 as i32), 0x1002);
        let (hi, lo) = long_to_words(-1);
        assert_eq!((hi, lo), (-1, -1));
        assert_eq!(words_to_long(hi, lo), -1);
    }

    #[test]
    fn sign_extension() {
        assert_eq!(sign_extend(0xffff, 16), -1);
        assert_eq!(sign_extend(0x7fff, 16), 32767);
    }
}
