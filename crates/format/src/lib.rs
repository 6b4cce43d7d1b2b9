//! # Histwatch Format
//!
//! Decoding of shell-history file dialects into normalized command strings.
//!
//! A dialect is chosen once at startup and applied to every raw line the
//! tailer produces. Decoding either yields a command, skips the line, or
//! fails hard when the configured dialect cannot make sense of the input.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FormatError>;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("unknown history dialect: {0} (expected \"plain\" or \"extended\")")]
    UnknownDialect(String),

    #[error("malformed extended history line (no `;` delimiter): {0:?}")]
    MalformedLine(String),
}

/// History file dialect, fixed for the lifetime of the process.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Dialect {
    /// One command per line; empty lines and `#` comments are skipped.
    Plain,
    /// `metadata;command` pairs; the command is everything after the first `;`.
    Extended,
}

impl Dialect {
    pub const fn as_str(self) -> &'static str {
        match self {
            Dialect::Plain => "plain",
            Dialect::Extended => "extended",
        }
    }

    /// Decode one raw history line.
    ///
    /// Returns `Ok(None)` for lines that carry no command. A line the
    /// configured dialect cannot parse at all is an error, not a skip.
    pub fn decode(self, line: &str) -> Result<Option<String>> {
        match self {
            Dialect::Plain => {
                if line.is_empty() || line.starts_with('#') {
                    return Ok(None);
                }
                Ok(Some(line.to_string()))
            }
            Dialect::Extended => {
                let Some((_meta, command)) = line.split_once(';') else {
                    return Err(FormatError::MalformedLine(line.to_string()));
                };
                if command.is_empty() {
                    return Ok(None);
                }
                Ok(Some(command.to_string()))
            }
        }
    }
}

impl std::str::FromStr for Dialect {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "plain" => Ok(Dialect::Plain),
            "extended" => Ok(Dialect::Extended),
            other => Err(FormatError::UnknownDialect(other.to_string())),
        }
    }
}
