//! Decoding of buffer change hunks.
//!
//! The host reports buffer changes as hunks with a 1-based start line
//! `lnum`, a 1-based exclusive `end`, a signed line delta `added` and a
//! 1-based column `col`. These are classified by the sign of `added` into
//! [`ChangeOp`] values with 0-based line numbers.

use std::collections::BTreeMap;

use crate::error::Error;
use crate::host::Value;

/// A single decoded buffer change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOp {
    /// Lines were inserted before `start`.
    Insert {
        /// First affected line (0-based).
        start: usize,
        /// End of the affected range (0-based, exclusive).
        end: usize,
        /// Number of lines inserted.
        count: usize,
    },
    /// Lines were deleted.
    Delete {
        /// First affected line (0-based).
        start: usize,
        /// End of the affected range (0-based, exclusive).
        end: usize,
        /// Number of lines deleted.
        count: usize,
    },
    /// Lines were changed in place.
    Modify {
        /// First affected line (0-based).
        start: usize,
        /// End of the affected range (0-based, exclusive).
        end: usize,
        /// Always 0 for in-place changes.
        count: usize,
        /// First changed column (0-based).
        col: usize,
    },
}

impl ChangeOp {
    /// Classify a hunk by the sign of `added`.
    ///
    /// `lnum`, `end` and `col` are the host's 1-based values.
    #[must_use]
    pub fn decode(lnum: i64, end: i64, added: i64, col: i64) -> Self {
        let start = to_zero_based(lnum);
        let end = to_zero_based(end);
        let count = added.unsigned_abs() as usize;
        match added.signum() {
            1 => Self::Insert { start, end, count },
            -1 => Self::Delete { start, end, count },
            _ => Self::Modify {
                start,
                end,
                count,
                col: to_zero_based(col),
            },
        }
    }

    /// Decode one hunk dictionary as the host delivers it.
    ///
    /// # Errors
    ///
    /// Returns an error if a field is missing or not a number.
    pub fn decode_hunk(hunk: &Value) -> Result<Self, Error> {
        let field = |name: &str| {
            hunk.get(name)
                .and_then(Value::as_int)
                .ok_or_else(|| Error::unexpected("buffer change hunk", hunk.clone()))
        };
        Ok(Self::decode(
            field("lnum")?,
            field("end")?,
            field("added")?,
            field("col")?,
        ))
    }

    /// Decode every hunk in a host list.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a list of hunks.
    pub fn decode_all(hunks: &Value) -> Result<Vec<Self>, Error> {
        match hunks {
            Value::List(items) => items.iter().map(Self::decode_hunk).collect(),
            other => Err(Error::unexpected("buffer change list", other.clone())),
        }
    }

    /// First affected line (0-based).
    #[must_use]
    pub const fn start(&self) -> usize {
        match self {
            Self::Insert { start, .. } | Self::Delete { start, .. } | Self::Modify { start, .. } => {
                *start
            }
        }
    }

    /// End of the affected range (0-based, exclusive).
    #[must_use]
    pub const fn end(&self) -> usize {
        match self {
            Self::Insert { end, .. } | Self::Delete { end, .. } | Self::Modify { end, .. } => *end,
        }
    }

    /// Number of lines inserted or deleted.
    #[must_use]
    pub const fn count(&self) -> usize {
        match self {
            Self::Insert { count, .. } | Self::Delete { count, .. } | Self::Modify { count, .. } => {
                *count
            }
        }
    }

    /// The operation's name: `insert`, `delete` or `modify`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Delete { .. } => "delete",
            Self::Modify { .. } => "modify",
        }
    }

    /// Marshal as a host dictionary.
    #[must_use]
    pub fn to_host(&self) -> Value {
        let mut fields = BTreeMap::from([
            ("name".to_string(), Value::from(self.name())),
            ("start".to_string(), Value::Int(self.start() as i64)),
            ("end".to_string(), Value::Int(self.end() as i64)),
            ("count".to_string(), Value::Int(self.count() as i64)),
        ]);
        if let Self::Modify { col, .. } = self {
            fields.insert("col".to_string(), Value::Int(*col as i64));
        }
        Value::Dict(fields)
    }
}

fn to_zero_based(n: i64) -> usize {
    usize::try_from(n - 1).unwrap_or(0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insertion() {
        assert_eq!(
            ChangeOp::decode(5, 5, 3, 1),
            ChangeOp::Insert {
                start: 4,
                end: 4,
                count: 3
            }
        );
    }

    #[test]
    fn test_deletion() {
        assert_eq!(
            ChangeOp::decode(5, 8, -3, 1),
            ChangeOp::Delete {
                start: 4,
                end: 7,
                count: 3
            }
        );
    }

    #[test]
    fn test_modification() {
        let op = ChangeOp::decode(5, 6, 0, 4);
        assert_eq!(
            op,
            ChangeOp::Modify {
                start: 4,
                end: 5,
                count: 0,
                col: 3
            }
        );
        assert_eq!(op.name(), "modify");
    }

    #[test]
    fn test_decode_host_hunks() {
        let hunks = Value::from(json!([
            {"lnum": 1, "end": 1, "added": 2, "col": 1},
            {"lnum": 3, "end": 4, "added": 0, "col": 7},
        ]));
        let ops = ChangeOp::decode_all(&hunks).unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].count(), 2);
        assert_eq!(ops[1].start(), 2);
    }

    #[test]
    fn test_malformed_hunk_is_an_error() {
        let hunk = Value::from(json!({"lnum": 1, "end": 2}));
        assert!(ChangeOp::decode_hunk(&hunk).is_err());
    }
}
