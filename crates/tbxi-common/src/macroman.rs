//! Mac OS Roman text codec.
//!
//! Classic Mac OS resource and manifest text (node names, CodeLine
//! comments) is encoded in the Mac OS Roman code page, not Latin-1 or
//! UTF-8. Bytes 0x00-0x7F are ASCII; 0x80-0xFF map to a fixed table of
//! Latin, Greek and symbol characters. There's no crate for this exact
//! legacy table, so it's a `const` lookup here.

/// Index `n - 0x80` gives the Unicode scalar for Mac-Roman byte `n`.
const HIGH_TABLE: [char; 128] = [
    'Ä', 'Å', 'Ç', 'É', 'Ñ', 'Ö', 'Ü', 'á', 'à', 'â', 'ä', 'ã', 'å', 'ç', 'é', 'è', 'ê', 'ë', 'í',
    'ì', 'î', 'ï', 'ñ', 'ó', 'ò', 'ô', 'ö', 'õ', 'ú', 'ù', 'û', 'ü', '†', '°', '¢', '£', '§', '•',
    '¶', 'ß', '®', '©', '™', '´', '¨', '≠', 'Æ', 'Ø', '∞', '±', '≤', '≥', '¥', 'µ', '∂', '∑', '∏',
    'π', '∫', 'ª', 'º', 'Ω', 'æ', 'ø', '¿', '¡', '¬', '√', 'ƒ', '≈', '∆', '«', '»', '…', ' ', 'À',
    'Ã', 'Õ', 'Œ', 'œ', '–', '—', '“', '”', '‘', '’', '÷', '◊', 'ÿ', 'Ÿ', '⁄', '€', '‹', '›', 'ﬁ',
    'ﬂ', '‡', '·', '‚', '„', '‰', 'Â', 'Ê', 'Á', 'Ë', 'È', 'Í', 'Î', 'Ï', 'Ì', 'Ó', 'Ô', '\u{F8FF}',
    'Ò', 'Ú', 'Û', 'Ù', 'ı', 'ˆ', '˜', '¯', '˘', '˙', '˚', '¸', '˝', '˛', 'ˇ',
];

/// Decode a Mac OS Roman byte string into a Rust `String`.
pub fn decode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b < 0x80 {
                b as char
            } else {
                HIGH_TABLE[(b - 0x80) as usize]
            }
        })
        .collect()
}

/// Encode a Rust string into Mac OS Roman bytes.
///
/// Characters with no Mac-Roman representation are replaced with `?`
/// (0x3F), matching the lenient round trip the original manifest writer
/// relies on for names it never expects to be exotic.
pub fn encode(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| {
            if c.is_ascii() {
                c as u8
            } else {
                HIGH_TABLE
                    .iter()
                    .position(|&h| h == c)
                    .map(|idx| (idx + 0x80) as u8)
                    .unwrap_or(b'?')
            }
        })
        .collect()
}

/// Decode a fixed-width Pascal-ish byte field, trimming trailing NULs.
pub fn decode_fixed(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    decode(&bytes[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_round_trips() {
        assert_eq!(decode(b"Mac OS ROM"), "Mac OS ROM");
        assert_eq!(encode("Mac OS ROM"), b"Mac OS ROM");
    }

    #[test]
    fn high_byte_round_trips() {
        let encoded = encode("café");
        assert_eq!(decode(&encoded), "café");
    }

    #[test]
    fn decode_fixed_trims_at_nul() {
        let mut buf = [0u8; 8];
        buf[..3].copy_from_slice(b"ROM");
        assert_eq!(decode_fixed(&buf), "ROM");
    }
}
