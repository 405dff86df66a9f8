//! Error types.

use std::fmt;

use crate::callback::CallbackError;
use crate::host::{HostError, Value};

/// A host error with its structured prefix parsed out.
///
/// The host reports errors as text of the form
/// `Vim(<command>):E<code>: <message>`, sometimes without the command part
/// and sometimes as a bare message. When no code can be found, `code` is 0,
/// `command` is empty and `message` is the verbatim text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VimError {
    /// The host command that failed, if reported.
    pub command: String,
    /// The host's numeric error code, or 0.
    pub code: u32,
    /// The error message without the structured prefix.
    pub message: String,
    /// The raw host error.
    pub source: HostError,
}

impl VimError {
    /// Parse a raw host error.
    #[must_use]
    pub fn parse(source: HostError) -> Self {
        let text = source.to_string();
        let (command, rest) = if let Some(rest) = text.strip_prefix("Vim(") {
            match rest.split_once("):") {
                Some((command, rest)) => (command.to_string(), rest),
                None => (String::new(), text.as_str()),
            }
        } else if let Some(rest) = text.strip_prefix("Vim:") {
            (String::new(), rest)
        } else {
            (String::new(), text.as_str())
        };

        match parse_code(rest) {
            Some((code, message)) => Self {
                command,
                code,
                message: message.to_string(),
                source,
            },
            None => Self {
                command: String::new(),
                code: 0,
                message: text.clone(),
                source,
            },
        }
    }
}

/// Split `E<digits>: <message>` into its parts.
fn parse_code(text: &str) -> Option<(u32, &str)> {
    let rest = text.strip_prefix('E')?;
    let digits = rest.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let code = rest[..digits].parse().ok()?;
    let message = rest[digits..].strip_prefix(':')?;
    Some((code, message.trim_start()))
}

impl fmt::Display for VimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.command.is_empty()) {
            (0, _) => f.write_str(&self.message),
            (code, true) => write!(f, "E{code}: {}", self.message),
            (code, false) => write!(f, "Vim({}):E{code}: {}", self.command, self.message),
        }
    }
}

impl std::error::Error for VimError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl From<HostError> for VimError {
    fn from(source: HostError) -> Self {
        Self::parse(source)
    }
}

/// Errors that can occur in the binding layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A host call failed; the error text has been parsed.
    #[error(transparent)]
    Vim(#[from] VimError),

    /// A delegated host operation failed, passed through unmodified.
    #[error(transparent)]
    Host(HostError),

    /// An attribute write was attempted on a wrapper that does not allow it.
    #[error("attribute {attribute:?} is read-only for {wrapper}")]
    ReadOnly {
        /// The wrapper type.
        wrapper: &'static str,
        /// The attribute or key name.
        attribute: String,
    },

    /// The named option does not exist.
    #[error("no such option: {0}")]
    NoSuchOption(String),

    /// The named option is not a comma or flag list.
    #[error("option {0:?} is not a list-style option")]
    NotAListOption(String),

    /// The window behind a proxy has been closed.
    #[error("window is no longer valid")]
    DeadWindow,

    /// No callback is registered with this identifier.
    #[error("no callback registered with uid {0}")]
    UnknownCallback(String),

    /// The host returned a value of an unexpected shape.
    #[error("unexpected host value for {context}: {value}")]
    UnexpectedValue {
        /// What was being read.
        context: &'static str,
        /// The value received.
        value: Value,
    },

    /// A callback failed.
    #[error(transparent)]
    Callback(#[from] CallbackError),

    /// A configuration document could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl From<HostError> for Error {
    fn from(source: HostError) -> Self {
        Self::Vim(VimError::parse(source))
    }
}

impl Error {
    /// Build an [`Error::UnexpectedValue`].
    pub(crate) fn unexpected(context: &'static str, value: Value) -> Self {
        Self::UnexpectedValue { context, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_form() {
        let err = VimError::parse(HostError::Vim(
            "Vim(buffer):E86: Buffer 99 does not exist".to_string(),
        ));
        assert_eq!(err.command, "buffer");
        assert_eq!(err.code, 86);
        assert_eq!(err.message, "Buffer 99 does not exist");
        assert_eq!(err.to_string(), "Vim(buffer):E86: Buffer 99 does not exist");
    }

    #[test]
    fn test_parse_without_command() {
        let err = VimError::parse(HostError::Vim("Vim:E492: Not an editor command".to_string()));
        assert_eq!(err.command, "");
        assert_eq!(err.code, 492);
        assert_eq!(err.message, "Not an editor command");

        let err = VimError::parse(HostError::Vim("E121: Undefined variable: x".to_string()));
        assert_eq!(err.code, 121);
        assert_eq!(err.message, "Undefined variable: x");
    }

    #[test]
    fn test_parse_bare_message() {
        let err = VimError::parse(HostError::Vim("something odd happened".to_string()));
        assert_eq!(err.command, "");
        assert_eq!(err.code, 0);
        assert_eq!(err.message, "something odd happened");
        assert_eq!(err.to_string(), "something odd happened");
    }

    #[test]
    fn test_parse_non_vim_host_error() {
        let err = VimError::parse(HostError::NoSuchKey("tabstop".to_string()));
        assert_eq!(err.code, 0);
        assert_eq!(err.message, "no such key: tabstop");
        assert_eq!(err.source, HostError::NoSuchKey("tabstop".to_string()));
    }

    #[test]
    fn test_host_error_converts_to_parsed() {
        let err: Error = HostError::Vim("E37: No write since last change".to_string()).into();
        match err {
            Error::Vim(vim) => assert_eq!(vim.code, 37),
            other => panic!("expected Vim error, got {other:?}"),
        }
    }
}
