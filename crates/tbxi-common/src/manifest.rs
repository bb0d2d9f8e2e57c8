//! Shared text conventions for the four manifest formats (Parcelfile,
//! Romfile, Configfile, Bootscript): shell-word tokenizing, `key=value`
//! pairs, and the integer/boolean literal grammar used in their values.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("malformed shell quoting: {0}")]
    Quoting(String),
    #[error("expected key=value, got {0:?}")]
    NotKeyValue(String),
    #[error("not a valid integer literal: {0:?}")]
    BadInteger(String),
}

/// Split a manifest line into shell words, honoring quoting the way
/// `shlex.split` does. Blank lines and `#`-comment lines yield no words.
pub fn split_line(line: &str) -> Result<Vec<String>, ManifestError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(Vec::new());
    }
    shell_words::split(trimmed).map_err(|e| ManifestError::Quoting(e.to_string()))
}

/// Quote a single word for manifest output, the way `shlex.quote` does.
pub fn quote_word(word: &str) -> String {
    shell_words::quote(word).into_owned()
}

/// Join words into a single quoted manifest line.
pub fn join_words<I, S>(words: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    shell_words::join(words)
}

/// Split a single manifest token on its first `=` into key/value.
pub fn split_key_value(token: &str) -> Result<(&str, &str), ManifestError> {
    token
        .split_once('=')
        .ok_or_else(|| ManifestError::NotKeyValue(token.to_string()))
}

/// Parse an integer literal in the manifest convention: a bare `0x`/`0X`
/// prefix is hex, `0b`/`0B` is binary, anything else is decimal. Negative
/// literals are accepted with a leading `-`.
pub fn parse_int_literal(text: &str) -> Result<i64, ManifestError> {
    let text = text.trim();
    let (neg, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = if let Some(hex) = unsigned
        .strip_prefix("0x")
        .or_else(|| unsigned.strip_prefix("0X"))
    {
        i64::from_str_radix(hex, 16)
    } else if let Some(bin) = unsigned
        .strip_prefix("0b")
        .or_else(|| unsigned.strip_prefix("0B"))
    {
        i64::from_str_radix(bin, 2)
    } else {
        unsigned.parse::<i64>()
    }
    .map_err(|_| ManifestError::BadInteger(text.to_string()))?;
    Ok(if neg { -value } else { value })
}

/// Parse an unsigned integer literal (same grammar, no sign accepted).
pub fn parse_uint_literal(text: &str) -> Result<u64, ManifestError> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else if let Some(bin) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
        u64::from_str_radix(bin, 2)
    } else {
        text.parse::<u64>()
    }
    .map_err(|_| ManifestError::BadInteger(text.to_string()))
}

/// Boolean literal convention shared by all manifest formats: an empty
/// string, `0`, `n`, `no`, or `false` (case-insensitive) is false;
/// anything else is true.
pub fn parse_bool_literal(text: &str) -> bool {
    !matches!(
        text.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "n" | "no" | "f" | "false"
    )
}

/// Render a boolean back into the manifest convention's canonical spelling.
pub fn render_bool_literal(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_line_skips_comments_and_blanks() {
        assert_eq!(split_line("# a comment").unwrap(), Vec::<String>::new());
        assert_eq!(split_line("   ").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn split_line_honors_quoting() {
        let words = split_line(r#"node "My Node" flags=0x10"#).unwrap();
        assert_eq!(words, vec!["node", "My Node", "flags=0x10"]);
    }

    #[test]
    fn split_key_value_splits_on_first_equals() {
        let (k, v) = split_key_value("path=a=b").unwrap();
        assert_eq!(k, "path");
        assert_eq!(v, "a=b");
    }

    #[test]
    fn int_literal_grammar() {
        assert_eq!(parse_int_literal("0x10").unwrap(), 16);
        assert_eq!(parse_int_literal("0b101").unwrap(), 5);
        assert_eq!(parse_int_literal("-42").unwrap(), -42);
        assert_eq!(parse_int_literal("42").unwrap(), 42);
        assert!(parse_int_literal("not a number").is_err());
    }

    #[test]
    fn bool_literal_grammar() {
        assert!(!parse_bool_literal(""));
        assert!(!parse_bool_literal("No"));
        assert!(!parse_bool_literal("FALSE"));
        assert!(parse_bool_literal("yes"));
        assert!(parse_bool_literal("1"));
    }
}
