use thiserror::Error;

use crate::modes::ModeKind;

/// Errors arising from decoding transport lines into messages.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("line is not a JSON object{}", format_line_suffix(line))]
    NotJson { line: String },

    #[cfg(feature = "json")]
    #[error("malformed message: {source}{}", format_line_suffix(line))]
    Json {
        #[source]
        source: serde_json::Error,
        /// Offending line for debug context.
        line: String,
    },

    #[error("{event} event is missing field `{field}`{}", format_line_suffix(line))]
    MissingField {
        event: String,
        field: &'static str,
        line: String,
    },

    #[error("field `{field}` out of range: {value}{}", format_line_suffix(line))]
    OutOfRange {
        field: &'static str,
        value: f64,
        line: String,
    },
}

impl WireError {
    /// The offending line, as received.
    pub fn line(&self) -> &str {
        match self {
            Self::NotJson { line } | Self::MissingField { line, .. } | Self::OutOfRange { line, .. } => {
                line
            }
            #[cfg(feature = "json")]
            Self::Json { line, .. } => line,
        }
    }
}

/// Errors from the persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no stored jump with id {id}")]
    NotFound { id: u64 },

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Errors from mode control calls (`set_mass`, `set_start_velocity`, ...).
#[derive(Debug, Error, PartialEq)]
pub enum ControlError {
    #[error("{mode} mode does not support {capability}")]
    Unsupported {
        mode: ModeKind,
        capability: &'static str,
    },

    #[error("invalid {what}: {value}")]
    InvalidValue { what: &'static str, value: f64 },
}

/// Unrecognised mode name passed to [`ModeKind::from_str`](std::str::FromStr).
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown mode {0:?}")]
pub struct UnknownMode(pub String);

/// Format a line as a suffix like " | {\"w\": 12..." (empty if no text).
fn format_line_suffix(line: &str) -> String {
    if line.is_empty() {
        return String::new();
    }
    let limit = 48;
    let excerpt: String = line.chars().take(limit).collect();
    let ellipsis = if line.chars().count() > limit { "..." } else { "" };
    format!(" | {excerpt}{ellipsis}")
}

pub type Result<T> = std::result::Result<T, WireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_lines_are_truncated_in_messages() {
        let line = "x".repeat(100);
        let err = WireError::NotJson { line: line.clone() };
        let text = err.to_string();
        assert!(text.ends_with("..."));
        assert!(text.len() < line.len());
        assert_eq!(err.line(), line);
    }

    #[test]
    fn short_lines_are_kept_whole() {
        let err = WireError::NotJson { line: "hello".into() };
        assert_eq!(err.to_string(), "line is not a JSON object | hello");
    }

    #[test]
    fn control_error_names_mode() {
        let err = ControlError::Unsupported {
            mode: ModeKind::ContactTime,
            capability: "manual mass",
        };
        assert_eq!(err.to_string(), "Contact Time mode does not support manual mass");
    }
}
