//! Frame resynchronizer.
//!
//! ServerQuery carries no correlation ids, so the filter keeps the logical
//! stream aligned with three blind rules, all of them configured explicitly:
//!
//! 1. terminal control sequences (`ESC [ <digits/;> <letter>`) are stripped;
//! 2. after a keep-alive probe the next `response_lines + echo_lines` raw lines
//!    are discarded unseen;
//! 3. a line ending in `<prompt><last><last>` (a terminal redrawing the text
//!    just sent) is dropped.
//!
//! A wrong count or prompt for a given server build desyncs command
//! boundaries; there is nothing on the wire to recover from that.

use std::{borrow::Cow, sync::LazyLock};

use regex::Regex;

static CONTROL_SEQUENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[;\d]*[A-Za-z]").expect("control sequence pattern"));

/// Remove terminal control sequences from a raw line.
#[must_use]
pub(crate) fn strip_control_codes(line: &str) -> Cow<'_, str> {
    CONTROL_SEQUENCE.replace_all(line, "")
}

/// Counting state of the filter.
#[derive(Debug, Clone)]
pub(crate) struct Resync {
    skip_per_probe: usize,
    prompt: String,
    skipping: usize,
}

impl Resync {
    pub(crate) fn new(response_lines: usize, echo_lines: usize, prompt: impl Into<String>) -> Self {
        Self {
            skip_per_probe: response_lines.saturating_add(echo_lines),
            prompt: prompt.into(),
            skipping: 0,
        }
    }

    /// A probe went out; its echo and reply must not reach the logical stream.
    pub(crate) fn probe_sent(&mut self) {
        self.skipping = self.skipping.saturating_add(self.skip_per_probe);
    }

    /// Lines still to be swallowed for earlier probes.
    #[cfg(test)]
    pub(crate) fn pending_skip(&self) -> usize {
        self.skipping
    }

    /// Classify one raw line. `Some` is a logical response line.
    pub(crate) fn accept(&mut self, raw: &str, last_sent: &str) -> Option<String> {
        if self.skipping > 0 {
            self.skipping -= 1;
            return None;
        }

        let line = strip_control_codes(raw);
        if self.is_self_echo(&line, last_sent) {
            return None;
        }
        Some(line.into_owned())
    }

    fn is_self_echo(&self, line: &str, last_sent: &str) -> bool {
        if last_sent.is_empty() {
            return false;
        }
        line.strip_suffix(last_sent)
            .and_then(|rest| rest.strip_suffix(last_sent))
            .is_some_and(|rest| rest.ends_with(self.prompt.as_str()))
    }
}
