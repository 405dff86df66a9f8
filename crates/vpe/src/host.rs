//! The host boundary.
//!
//! Everything this crate knows about the embedding editor goes through the
//! [`Host`] trait. The trait mirrors the small set of primitives the editor's
//! scripting interface offers: calling a host function, evaluating an
//! expression, running a command, and poking at the host's native objects
//! (buffers, windows, tab pages, option and variable tables, lists and
//! dictionaries).
//!
//! Host objects are named by [`NativeRef`]. A `NativeRef` never owns the
//! object it names; the host can close a window or wipe a buffer at any time,
//! after which operations on the reference fail or report it as invalid.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// Errors raised by the host at the call boundary.
///
/// These are the raw failures. Most of the crate converts them into a parsed
/// [`VimError`](crate::VimError) before handing them to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// A host-side error, carrying the host's own message text.
    #[error("{0}")]
    Vim(String),

    /// A table or dictionary lookup found no such key.
    #[error("no such key: {0}")]
    NoSuchKey(String),

    /// The native object has no attribute with this name.
    #[error("no such attribute: {0}")]
    NoSuchAttribute(String),

    /// A sequence index was out of range.
    #[error("index out of range: {0}")]
    IndexOutOfRange(i64),

    /// The native object no longer exists.
    #[error("attempt to refer to deleted {0}")]
    Invalid(&'static str),
}

/// The scope of an option or variable table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Global options or `g:` variables.
    Global,
    /// Buffer-local options or `b:` variables, by buffer number.
    Buffer(i64),
    /// Window-local options or `w:` variables, by window position.
    Window {
        /// Tab page number (1-based).
        tab: i64,
        /// Window number within the tab page (1-based).
        number: i64,
    },
    /// Tab page `t:` variables, by tab page handle.
    TabPage(u64),
    /// The host's own read-only `v:` variables.
    Vim,
}

/// A reference to a host-native object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NativeRef {
    /// A buffer, by buffer number.
    Buffer(i64),
    /// A window, by its current position. Positions are not stable across
    /// window rearrangement.
    Window {
        /// Tab page number (1-based).
        tab: i64,
        /// Window number within the tab page (1-based).
        number: i64,
    },
    /// A tab page, by opaque host handle.
    TabPage(u64),
    /// An option table.
    Options(Scope),
    /// A variable table.
    Vars(Scope),
    /// A host list, by opaque handle.
    List(u64),
    /// A host dictionary, by opaque handle.
    Dict(u64),
}

/// The kind of a [`NativeRef`], used to pick a wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeKind {
    /// See [`NativeRef::Buffer`].
    Buffer,
    /// See [`NativeRef::Window`].
    Window,
    /// See [`NativeRef::TabPage`].
    TabPage,
    /// See [`NativeRef::Options`].
    Options,
    /// See [`NativeRef::Vars`].
    Vars,
    /// See [`NativeRef::List`].
    List,
    /// See [`NativeRef::Dict`].
    Dict,
}

impl NativeRef {
    /// The kind of object this reference names.
    #[must_use]
    pub const fn kind(&self) -> NativeKind {
        match self {
            Self::Buffer(_) => NativeKind::Buffer,
            Self::Window { .. } => NativeKind::Window,
            Self::TabPage(_) => NativeKind::TabPage,
            Self::Options(_) => NativeKind::Options,
            Self::Vars(_) => NativeKind::Vars,
            Self::List(_) => NativeKind::List,
            Self::Dict(_) => NativeKind::Dict,
        }
    }
}

/// Which "current" object to query or change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Current {
    /// The buffer shown in the current window.
    Buffer,
    /// The current window.
    Window,
    /// The current tab page.
    TabPage,
}

/// A value as the host represents it.
///
/// Host text frequently arrives as raw bytes that are not guaranteed to be
/// valid UTF-8, hence the separate [`Value::Bytes`] variant.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// The host's "none" value.
    #[default]
    Nil,
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A float.
    Float(f64),
    /// Text.
    Str(String),
    /// Raw bytes, typically undecoded text.
    Bytes(Vec<u8>),
    /// A list passed by value.
    List(Vec<Value>),
    /// A dictionary passed by value.
    Dict(BTreeMap<String, Value>),
    /// A reference to a native host object.
    Native(NativeRef),
}

impl Value {
    /// Interpret the value as an integer, the way the host coerces numbers.
    ///
    /// Text that parses as a decimal integer is accepted, because the host's
    /// expression layer does not reliably keep numbers and strings apart.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Str(s) => s.trim().parse().ok(),
            Self::Bytes(b) => std::str::from_utf8(b).ok()?.trim().parse().ok(),
            _ => None,
        }
    }

    /// Interpret the value as text. Bytes are decoded lossily.
    #[must_use]
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Str(s) => Some(s.clone()),
            Self::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
            Self::Int(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Host truthiness: non-zero numbers and non-empty text.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Nil => false,
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Bytes(b) => !b.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Dict(items) => !items.is_empty(),
            Self::Native(_) => true,
        }
    }

    /// Look up a key when this is a dictionary.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Dict(items) => items.get(key),
            _ => None,
        }
    }

    /// Take the items out of a list value.
    #[must_use]
    pub fn into_list(self) -> Option<Vec<Value>> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Render this value as a host expression literal.
    ///
    /// Native references other than buffers and tab pages have no literal
    /// form and render as the host's none value.
    #[must_use]
    pub fn to_literal(&self) -> String {
        match self {
            Self::Nil => "v:none".to_string(),
            Self::Bool(true) => "v:true".to_string(),
            Self::Bool(false) => "v:false".to_string(),
            Self::Int(n) => n.to_string(),
            Self::Float(f) => float_literal(*f),
            Self::Str(s) => quote(s),
            Self::Bytes(b) => quote(&String::from_utf8_lossy(b)),
            Self::List(items) => {
                let items: Vec<String> = items.iter().map(Self::to_literal).collect();
                format!("[{}]", items.join(", "))
            }
            Self::Dict(items) => {
                let items: Vec<String> = items
                    .iter()
                    .map(|(k, v)| format!("{}: {}", quote(k), v.to_literal()))
                    .collect();
                format!("{{{}}}", items.join(", "))
            }
            Self::Native(NativeRef::Buffer(n)) => n.to_string(),
            Self::Native(NativeRef::TabPage(h)) => h.to_string(),
            Self::Native(_) => "v:none".to_string(),
        }
    }
}

/// A float literal the host parses back to `f`. The host has no literal for
/// NaN or the infinities, and needs a `.` before any exponent.
fn float_literal(f: f64) -> String {
    if f.is_nan() {
        return "str2float('nan')".to_string();
    }
    if f.is_infinite() {
        let sign = if f < 0.0 { "-" } else { "" };
        return format!("str2float('{sign}inf')");
    }
    let text = format!("{f:?}");
    match text.split_once('e') {
        Some((mantissa, exponent)) if !mantissa.contains('.') => {
            format!("{mantissa}.0e{exponent}")
        }
        _ => text,
    }
}

/// Single-quote text for the host, doubling embedded quotes.
fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_literal())
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Nil,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map_or_else(|| Self::Float(n.as_f64().unwrap_or_default()), Self::Int),
            serde_json::Value::String(s) => Self::Str(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Dict(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl From<NativeRef> for Value {
    fn from(native: NativeRef) -> Self {
        Self::Native(native)
    }
}

/// The editor's scripting interface, as seen from this crate.
///
/// Implementations are driven from a single thread: the host invokes the
/// crate synchronously, one event at a time, and the crate calls back into
/// the host synchronously.
pub trait Host {
    /// Invoke a host function by name.
    fn call(&self, function: &str, args: &[Value]) -> Result<Value, HostError>;

    /// Evaluate a host expression.
    fn eval(&self, expr: &str) -> Result<Value, HostError>;

    /// Execute a host command.
    fn command(&self, command: &str) -> Result<(), HostError>;

    /// Read a named attribute of a native object.
    fn get(&self, object: &NativeRef, name: &str) -> Result<Value, HostError>;

    /// Write a named attribute of a native object.
    fn set(&self, object: &NativeRef, name: &str, value: Value) -> Result<(), HostError>;

    /// Whether the native object still exists.
    fn valid(&self, object: &NativeRef) -> bool;

    /// Number of items in a sequence or table.
    fn length(&self, object: &NativeRef) -> Result<usize, HostError>;

    /// Read one item of a sequence (integer key) or table (text key).
    fn item(&self, object: &NativeRef, key: &Value) -> Result<Value, HostError>;

    /// Write one item of a sequence or table.
    fn set_item(&self, object: &NativeRef, key: &Value, value: Value) -> Result<(), HostError>;

    /// Delete one item of a sequence or table.
    fn del_item(&self, object: &NativeRef, key: &Value) -> Result<(), HostError>;

    /// The keys of a table.
    fn keys(&self, object: &NativeRef) -> Result<Vec<Value>, HostError>;

    /// Replace a slice of a sequence, with the host's slice-assignment
    /// semantics. An empty `range` inserts; empty `values` deletes.
    fn splice(
        &self,
        object: &NativeRef,
        range: Range<usize>,
        values: Vec<Value>,
    ) -> Result<(), HostError>;

    /// The current buffer, window or tab page.
    fn current(&self, kind: Current) -> Result<NativeRef, HostError>;

    /// Make a buffer, window or tab page current.
    fn set_current(&self, target: &NativeRef) -> Result<(), HostError>;
}

impl<H: Host + ?Sized> Host for Rc<H> {
    fn call(&self, function: &str, args: &[Value]) -> Result<Value, HostError> {
        (**self).call(function, args)
    }

    fn eval(&self, expr: &str) -> Result<Value, HostError> {
        (**self).eval(expr)
    }

    fn command(&self, command: &str) -> Result<(), HostError> {
        (**self).command(command)
    }

    fn get(&self, object: &NativeRef, name: &str) -> Result<Value, HostError> {
        (**self).get(object, name)
    }

    fn set(&self, object: &NativeRef, name: &str, value: Value) -> Result<(), HostError> {
        (**self).set(object, name, value)
    }

    fn valid(&self, object: &NativeRef) -> bool {
        (**self).valid(object)
    }

    fn length(&self, object: &NativeRef) -> Result<usize, HostError> {
        (**self).length(object)
    }

    fn item(&self, object: &NativeRef, key: &Value) -> Result<Value, HostError> {
        (**self).item(object, key)
    }

    fn set_item(&self, object: &NativeRef, key: &Value, value: Value) -> Result<(), HostError> {
        (**self).set_item(object, key, value)
    }

    fn del_item(&self, object: &NativeRef, key: &Value) -> Result<(), HostError> {
        (**self).del_item(object, key)
    }

    fn keys(&self, object: &NativeRef) -> Result<Vec<Value>, HostError> {
        (**self).keys(object)
    }

    fn splice(
        &self,
        object: &NativeRef,
        range: Range<usize>,
        values: Vec<Value>,
    ) -> Result<(), HostError> {
        (**self).splice(object, range, values)
    }

    fn current(&self, kind: Current) -> Result<NativeRef, HostError> {
        (**self).current(kind)
    }

    fn set_current(&self, target: &NativeRef) -> Result<(), HostError> {
        (**self).set_current(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_as_int_coerces_numeric_text() {
        assert_eq!(Value::from("42").as_int(), Some(42));
        assert_eq!(Value::Bytes(b" 7".to_vec()).as_int(), Some(7));
        assert_eq!(Value::Bool(true).as_int(), Some(1));
        assert_eq!(Value::from("abc").as_int(), None);
    }

    #[test]
    fn test_literal_quotes_text() {
        assert_eq!(Value::from("it's").to_literal(), "'it''s'");
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::from("a")]).to_literal(),
            "[1, 'a']"
        );
    }

    #[test]
    fn test_float_literals_parse_in_host() {
        assert_eq!(Value::Float(2.5).to_literal(), "2.5");
        assert_eq!(Value::Float(1e20).to_literal(), "1.0e20");
        assert_eq!(Value::Float(1.5e300).to_literal(), "1.5e300");
        assert_eq!(Value::Float(f64::NAN).to_literal(), "str2float('nan')");
        assert_eq!(Value::Float(f64::INFINITY).to_literal(), "str2float('inf')");
        assert_eq!(
            Value::Float(f64::NEG_INFINITY).to_literal(),
            "str2float('-inf')"
        );
    }

    #[test]
    fn test_from_json() {
        let value = Value::from(json!({"uid": "3", "args": [1, 2.5, null]}));
        assert_eq!(value.get("uid"), Some(&Value::from("3")));
        assert_eq!(
            value.get("args"),
            Some(&Value::List(vec![
                Value::Int(1),
                Value::Float(2.5),
                Value::Nil
            ]))
        );
    }

    #[test]
    fn test_native_kind() {
        assert_eq!(NativeRef::Buffer(1).kind(), NativeKind::Buffer);
        assert_eq!(
            NativeRef::Options(Scope::Global).kind(),
            NativeKind::Options
        );
    }
}
