//! `key: value` line parser for YAML-like status dumps.

/// One normalized key/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    /// Lower-cased, trimmed key.
    pub key: String,
    /// Trimmed value with one level of surrounding double quotes removed.
    pub value: String,
}

impl KvPair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Parse one line.
///
/// Accepted shape: optional indentation, an optional `-` list marker, a key
/// made of `[A-Za-z0-9_-]`, a colon, and the rest of the line as the value.
/// Anything else yields `None`.
pub fn parse(line: &str) -> Option<KvPair> {
    let mut s = line.trim_start();
    if let Some(rest) = s.strip_prefix('-') {
        s = rest.trim_start();
    }

    let key_len = s
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b'-')
        .count();
    if key_len == 0 {
        return None;
    }
    let (key, rest) = s.split_at(key_len);
    let value = rest.strip_prefix(':')?.trim();

    Some(KvPair {
        key: key.trim().to_ascii_lowercase(),
        value: unquote(value).to_string(),
    })
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}
