//! Wire decoder.
//!
//! Turns one ServerQuery line into a [`Record`]. The rules are deliberately
//! small and frozen:
//!
//! - the line is split on single spaces (empty tokens are skipped);
//! - a token without `=` is a bare flag;
//! - a token with `=` is split at the first `=`; a value containing `|` is
//!   split on `|` and every piece is decoded as its own record, so
//!   `a=1|a=2` yields `a: [{1: flag}, {a: 2}]`;
//! - any other value is an integer when its whole text is base-10 integer
//!   shaped with an optional sign, otherwise text.
//!
//! The decoder does not interpret backslash escapes. [`escape`] and
//! [`unescape`] are provided for building command arguments and for typed
//! views that want display text.

use serde::{Deserialize, Deserializer};

use crate::types::{Record, Value};

/// Decode one raw line into a record.
#[must_use]
pub fn decode(line: &str) -> Record {
    let mut record = Record::new();
    for token in line.split(' ').filter(|t| !t.is_empty()) {
        match token.split_once('=') {
            Some((key, raw)) => {
                record.insert(key, decode_value(raw));
            }
            None => {
                record.insert(token, Value::Flag);
            }
        }
    }
    record
}

fn decode_value(raw: &str) -> Value {
    if raw.contains('|') {
        return Value::List(raw.split('|').map(decode).collect());
    }

    if is_integer(raw) {
        // Integer-shaped but out of i64 range stays text.
        if let Ok(n) = raw.parse::<i64>() {
            return Value::Int(n);
        }
    }

    Value::Text(raw.to_string())
}

fn is_integer(raw: &str) -> bool {
    let digits = raw.strip_prefix(['+', '-']).unwrap_or(raw);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Escape text for use as a single command argument.
#[must_use]
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '/' => out.push_str("\\/"),
            ' ' => out.push_str("\\s"),
            '|' => out.push_str("\\p"),
            '\u{07}' => out.push_str("\\a"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{0b}' => out.push_str("\\v"),
            other => out.push(other),
        }
    }
    out
}

/// Reverse [`escape`]. Unknown escape sequences are kept verbatim.
#[must_use]
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('s') => out.push(' '),
            Some('p') => out.push('|'),
            Some('a') => out.push('\u{07}'),
            Some('b') => out.push('\u{08}'),
            Some('f') => out.push('\u{0c}'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('v') => out.push('\u{0b}'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Serde helper for text fields in typed views.
///
/// Accepts text, integers (the decoder turns `name=123` into an integer) and
/// flags, and unescapes the result.
pub(crate) fn text<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Int(i64),
        Text(String),
    }

    Ok(match Option::<Loose>::deserialize(deserializer)? {
        Some(Loose::Int(n)) => n.to_string(),
        Some(Loose::Text(s)) => unescape(&s),
        None => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn plain_fields() {
        assert_eq!(
            decode("a=1 b=2"),
            rec(&[("a", Value::Int(1)), ("b", Value::Int(2))])
        );
    }

    #[test]
    fn bare_flag() {
        assert_eq!(decode("flag"), rec(&[("flag", Value::Flag)]));
    }

    #[test]
    fn pipe_splits_within_a_value() {
        let decoded = decode("a=1|a=2");
        let list = decoded.list("a").expect("list");
        assert_eq!(list.len(), 2);
        assert!(list[0].has_flag("1"));
        assert_eq!(list[1].int("a"), Some(2));
    }

    #[test]
    fn list_style_reply_keeps_frozen_shape() {
        let decoded = decode("clid=1 client_nickname=alice|clid=2 client_nickname=bob");
        assert_eq!(decoded.int("clid"), Some(1));
        assert_eq!(decoded.text("client_nickname"), Some("bob"));

        let nick = decoded.list("client_nickname");
        assert!(nick.is_none(), "last key wins over the earlier list");
    }

    #[test]
    fn integer_shapes() {
        let decoded = decode("p=+5 n=-12 z=0 big=99999999999999999999 v=3.5 e= s=-");
        assert_eq!(decoded.int("p"), Some(5));
        assert_eq!(decoded.int("n"), Some(-12));
        assert_eq!(decoded.int("z"), Some(0));
        assert_eq!(decoded.text("big"), Some("99999999999999999999"));
        assert_eq!(decoded.text("v"), Some("3.5"));
        assert_eq!(decoded.text("e"), Some(""));
        assert_eq!(decoded.text("s"), Some("-"));
    }

    #[test]
    fn value_keeps_everything_after_first_equals() {
        let decoded = decode("client_unique_identifier=abc+def=");
        assert_eq!(decoded.text("client_unique_identifier"), Some("abc+def="));
    }

    #[test]
    fn repeated_spaces_and_empty_line() {
        assert_eq!(decode("a=1  b"), rec(&[("a", Value::Int(1)), ("b", Value::Flag)]));
        assert!(decode("").is_empty());
    }

    #[test]
    fn deterministic() {
        let line = "virtualserver_name=x virtualserver_port=9987 flag list=a|b=1";
        assert_eq!(decode(line), decode(line));
    }

    #[test]
    fn escape_and_unescape_cover_the_table() {
        let raw = "a b|c/d\\e\tf";
        let escaped = escape(raw);
        assert_eq!(escaped, "a\\sb\\pc\\/d\\\\e\\tf");
        assert_eq!(unescape(&escaped), raw);
        assert_eq!(unescape("keep\\q"), "keep\\q");
        assert_eq!(unescape("trailing\\"), "trailing\\");
    }
}
