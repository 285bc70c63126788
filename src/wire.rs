//! Plate firmware line protocol.
//!
//! The firmware streams one JSON object per line over serial:
//!
//! ```text
//! {"w": 941873, "t": 18342177}     sample: raw counts, device µs clock
//! {"event": "rate", "hz": 1280}    sampling rate report
//! {"event": "zero"}                firmware auto-zero notice
//! ```
//!
//! `t` may be absent (treated as 0, "no clock"). `"type"` is accepted as an
//! alias of `"event"`. A line carrying `w` is a sample regardless of other keys.

use serde::Deserialize;

use crate::error::{Result, WireError};

/// A decoded firmware message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Sample { raw: i32, device_clock: u32 },
    Rate { hz: f64 },
    Zero,
    /// Event this decoder does not handle; ignored by the session.
    Unknown { event: String },
}

#[derive(Deserialize)]
struct LineFields {
    w: Option<f64>,
    t: Option<u32>,
    event: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    hz: Option<f64>,
}

impl Message {
    /// Decode one line (surrounding whitespace ignored).
    pub fn decode_line(line: &str) -> Result<Self> {
        let line = line.trim();
        if !line.starts_with('{') {
            return Err(WireError::NotJson { line: line.to_string() });
        }
        let fields: LineFields = serde_json::from_str(line).map_err(|source| WireError::Json {
            source,
            line: line.to_string(),
        })?;

        if let Some(w) = fields.w {
            // Some firmware builds print counts as floats.
            let rounded = w.round();
            if !(f64::from(i32::MIN)..=f64::from(i32::MAX)).contains(&rounded) {
                return Err(WireError::OutOfRange {
                    field: "w",
                    value: w,
                    line: line.to_string(),
                });
            }
            return Ok(Message::Sample {
                raw: rounded as i32,
                device_clock: fields.t.unwrap_or(0),
            });
        }

        let Some(event) = fields.event.or(fields.kind) else {
            return Err(WireError::MissingField {
                event: "sample".to_string(),
                field: "w",
                line: line.to_string(),
            });
        };
        match event.as_str() {
            "rate" => match fields.hz {
                Some(hz) => Ok(Message::Rate { hz }),
                None => Err(WireError::MissingField {
                    event,
                    field: "hz",
                    line: line.to_string(),
                }),
            },
            "zero" => Ok(Message::Zero),
            _ => Ok(Message::Unknown { event }),
        }
    }
}

// ---------------------------------------------------------------------------
// Line splitting
// ---------------------------------------------------------------------------

/// Reassembles newline-terminated lines from arbitrary read chunks.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
}

/// Longest partial line kept while waiting for a newline.
const MAX_PENDING: usize = 64 * 1024;

impl LineSplitter {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(256),
        }
    }

    /// Feed new bytes and extract any complete, non-empty lines (trimmed).
    ///
    /// Invalid UTF-8 is replaced rather than rejected; such lines fail to
    /// decode later and are dropped there.
    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(data);
        let mut lines = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let text = String::from_utf8_lossy(&self.buf[..pos]).trim().to_string();
            self.buf.drain(..=pos);
            if !text.is_empty() {
                lines.push(text);
            }
        }

        // A stream without newlines is noise.
        if self.buf.len() > MAX_PENDING {
            self.buf.clear();
        }
        lines
    }

    /// Bytes held back as an incomplete line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
