//! Joins continuation lines (stack traces, wrapped messages) into one record.

use super::LineDecoder;
use crate::models::record::Record;
use regex::Regex;
use std::str::FromStr;

/// Which neighbour a matching line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultilineWhat {
    Previous,
    Next,
}

impl FromStr for MultilineWhat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "previous" => Ok(Self::Previous),
            "next" => Ok(Self::Next),
            other => Err(format!("expected `previous` or `next`, got `{}`", other)),
        }
    }
}

pub const DEFAULT_MAX_LINES: usize = 500;

/// Aggregates lines by pattern.
///
/// A line "matches" when `pattern` finds it (inverted by `negate`). With
/// `Previous`, a matching line is appended to the pending record; with `Next`,
/// a matching line is followed by the next one. A pending record is also cut
/// once it reaches `max_lines`.
#[derive(Debug, Clone)]
pub struct MultilineCodec {
    pattern: Regex,
    negate: bool,
    what: MultilineWhat,
    max_lines: usize,
    pending: Vec<String>,
}

impl MultilineCodec {
    pub fn new(pattern: Regex, negate: bool, what: MultilineWhat) -> Self {
        Self {
            pattern,
            negate,
            what,
            max_lines: DEFAULT_MAX_LINES,
            pending: Vec::new(),
        }
    }

    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = max_lines.max(1);
        self
    }

    fn emit_pending(&mut self, emit: &mut dyn FnMut(Record)) {
        if !self.pending.is_empty() {
            emit(Record::new(self.pending.join("\n")));
            self.pending.clear();
        }
    }
}

impl LineDecoder for MultilineCodec {
    fn decode(&mut self, line: &str, emit: &mut dyn FnMut(Record)) {
        let matched = self.pattern.is_match(line) != self.negate;
        match self.what {
            MultilineWhat::Previous => {
                if !matched {
                    self.emit_pending(emit);
                }
                self.pending.push(line.to_string());
            }
            MultilineWhat::Next => {
                self.pending.push(line.to_string());
                if !matched {
                    self.emit_pending(emit);
                }
            }
        }
        if self.pending.len() >= self.max_lines {
            self.emit_pending(emit);
        }
    }

    fn flush(&mut self, emit: &mut dyn FnMut(Record)) {
        self.emit_pending(emit);
    }

    fn reset(&mut self) {
        self.pending.clear();
    }
}
