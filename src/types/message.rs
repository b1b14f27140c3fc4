use serde::de::DeserializeOwned;

use crate::{
    decode::{decode, unescape},
    error::{Error, Result},
    types::Record,
};

/// Body of one response group: every line before the terminal `error` line.
///
/// Each body line is decoded on its own; order is preserved. An empty message
/// means the command produced only its status line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    lines: Vec<String>,
    records: Vec<Record>,
}

impl Message {
    /// Decode body lines.
    #[must_use]
    pub fn from_lines(lines: Vec<String>) -> Self {
        let records = lines.iter().map(|l| decode(l)).collect();
        Self { lines, records }
    }

    /// `true` if the group had no body.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Raw body lines as received.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// One decoded record per body line.
    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// First decoded record, the common case for single-line replies.
    #[must_use]
    pub fn first(&self) -> Option<&Record> {
        self.records.first()
    }

    /// Row view for list-style replies.
    ///
    /// Splits every raw body line on `|` first and decodes each entry as a
    /// record, so `clid=1 client_nickname=a|clid=2 client_nickname=b` becomes
    /// two rows. `records()` keeps the per-token rule instead.
    #[must_use]
    pub fn rows(&self) -> Vec<Record> {
        self.lines
            .iter()
            .flat_map(|line| line.split('|'))
            .map(decode)
            .collect()
    }

    /// Deserialize every row (see [`Message::rows`]) into `T`.
    pub fn deserialize_rows<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.rows().iter().map(Record::deserialize).collect()
    }
}

/// Terminal status line of a response group.
///
/// `id == 0` means success. Non-zero ids are ordinary data; use
/// [`Response::check`] to turn them into [`Error::Query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryError {
    /// Status id.
    pub id: i64,
    /// Status text, unescaped.
    pub msg: String,
    /// Additional detail some failures carry.
    pub extra_msg: Option<String>,
    /// Missing permission id for permission failures.
    pub failed_permid: Option<i64>,
}

impl QueryError {
    pub(crate) const KEYWORD: &'static str = "error";

    /// Decode an `error id=.. msg=..` line.
    pub fn from_line(line: &str) -> Result<Self> {
        let rest = match line.split_once(' ') {
            Some((Self::KEYWORD, rest)) => rest,
            _ if line == Self::KEYWORD => "",
            _ => return Err(Error::decode(format!("not an error line: {line:?}"))),
        };

        let record = decode(rest);
        let id = record
            .int("id")
            .ok_or_else(|| Error::decode(format!("error line without integer id: {line:?}")))?;
        let msg = text_field(&record, "msg")
            .ok_or_else(|| Error::decode(format!("error line without msg: {line:?}")))?;

        Ok(Self {
            id,
            msg,
            extra_msg: text_field(&record, "extra_msg"),
            failed_permid: record.int("failed_permid"),
        })
    }

    /// `true` for `id == 0`.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.id == 0
    }
}

fn text_field(record: &Record, key: &str) -> Option<String> {
    if let Some(text) = record.text(key) {
        return Some(unescape(text));
    }
    record.int(key).map(|n| n.to_string())
}

/// Everything one command produced: its body and its status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Body.
    pub message: Message,
    /// Status.
    pub error: QueryError,
}

impl Response {
    /// `true` when the status id is 0.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_ok()
    }

    /// Return the body, or [`Error::Query`] for a non-zero status id.
    pub fn check(self) -> Result<Message> {
        if self.error.is_ok() {
            Ok(self.message)
        } else {
            Err(Error::Query {
                id: self.error.id,
                msg: self.error.msg,
            })
        }
    }

    /// Split into `(message, error)`.
    #[must_use]
    pub fn into_parts(self) -> (Message, QueryError) {
        (self.message, self.error)
    }
}
