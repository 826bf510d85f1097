//! Incremental JSON-RPC frame parser (spec §4.1).
//!
//! Turns a byte stream containing concatenated, possibly-interleaved JSON
//! values into a sequence of whole values, tolerating whitespace and junk
//! between values. Tracks string/escape state so that `}{` inside a string
//! does not split a frame.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("parse error: {0}")]
    Parse(String),
}

/// One outcome of pushing bytes through the parser.
#[derive(Debug, Clone)]
pub enum FrameEvent {
    /// A complete, successfully parsed JSON value.
    Value(serde_json::Value),
    /// A complete frame that failed to parse as JSON. Only produced in
    /// non-strict mode; in strict mode the same condition surfaces as an
    /// `Err` from `push`.
    Error { raw: Vec<u8>, message: String },
    /// The in-progress frame exceeded the configured byte budget. The
    /// parser has already reset; parsing resumes at the next value.
    BufferOverflow { budget: usize },
}

/// Incremental JSON value framer.
///
/// `push` is non-blocking, in-order, and never returns a partial value: a
/// `Value`/`Error` event is only emitted once `depth` has returned to zero.
pub struct FrameParser {
    byte_budget: usize,
    strict: bool,
    buf: Vec<u8>,
    depth: i64,
    in_string: bool,
    escaped: bool,
    collecting: bool,
}

impl FrameParser {
    /// `byte_budget` bounds the in-progress (not-yet-complete) frame only;
    /// it is not a total-stream limit.
    pub fn new(byte_budget: usize) -> Self {
        Self {
            byte_budget,
            strict: false,
            buf: Vec::new(),
            depth: 0,
            in_string: false,
            escaped: false,
            collecting: false,
        }
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Drop any in-progress frame and return to the outer (whitespace-
    /// skipping) state. Does not affect already-emitted events.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
        self.collecting = false;
    }

    /// Push a chunk of bytes, returning every value (or frame error)
    /// completed as a result. `push(a)` followed by `push(b)` yields the
    /// same sequence of events as a single `push(a ++ b)`.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<FrameEvent>, FrameError> {
        let mut events = Vec::new();

        for &byte in bytes {
            if !self.collecting {
                // Outer state: skip whitespace/junk until a value opens.
                if byte == b'{' || byte == b'[' {
                    self.collecting = true;
                    self.depth = 0;
                    self.buf.clear();
                } else {
                    continue;
                }
            }

            self.buf.push(byte);

            if self.buf.len() > self.byte_budget {
                let budget = self.byte_budget;
                self.reset();
                events.push(FrameEvent::BufferOverflow { budget });
                continue;
            }

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        let frame = std::mem::take(&mut self.buf);
                        self.collecting = false;
                        match serde_json::from_slice::<serde_json::Value>(&frame) {
                            Ok(value) => events.push(FrameEvent::Value(value)),
                            Err(e) => {
                                if self.strict {
                                    return Err(FrameError::Parse(e.to_string()));
                                }
                                events.push(FrameEvent::Error {
                                    raw: frame,
                                    message: e.to_string(),
                                });
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(events)
    }
}
