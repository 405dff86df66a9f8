//! Values as seen by binding-layer code.
//!
//! An [`Object`] is either decoded host data (numbers, text, plain lists and
//! dictionaries) or a proxy for a host-native object. Values coming from the
//! host go through [`Session::wrap_or_decode`]; values going back go through
//! [`Object::to_host`].

use std::collections::BTreeMap;

use crate::buffer::Buffer;
use crate::changes::ChangeOp;
use crate::command::CommandInfo;
use crate::error::Error;
use crate::host::{NativeRef, Value};
use crate::mapping::MappingInfo;
use crate::options::{ListOption, Options, Variables};
use crate::proxy::{DictProxy, ListProxy};
use crate::session::Session;
use crate::tabpage::TabPage;
use crate::window::Window;

/// A value handed to binding-layer code.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Object {
    /// No value.
    #[default]
    None,
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A float.
    Float(f64),
    /// Decoded text.
    Text(String),
    /// Bytes that are not valid UTF-8.
    Bytes(Vec<u8>),
    /// A decoded list.
    List(Vec<Object>),
    /// A decoded dictionary.
    Dict(BTreeMap<String, Object>),
    /// A buffer proxy.
    Buffer(Buffer),
    /// A window proxy.
    Window(Window),
    /// A tab page proxy.
    TabPage(TabPage),
    /// An option table.
    Options(Options),
    /// A variable table.
    Variables(Variables),
    /// A proxy for a host list.
    HostList(ListProxy),
    /// A proxy for a host dictionary.
    HostDict(DictProxy),
    /// The value of a comma or flag list option.
    ListOption(ListOption),
    /// Key mapping info passed to mapping callbacks.
    Mapping(MappingInfo),
    /// Command info passed to user command callbacks.
    Command(CommandInfo),
    /// Decoded buffer changes passed to listeners.
    Changes(Vec<ChangeOp>),
}

impl Object {
    /// The text, if this is text or a list option value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::ListOption(opt) => Some(opt.as_str()),
            _ => None,
        }
    }

    /// The integer, if this is an integer or boolean.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// The boolean, following host truthiness for integers.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(n) => Some(*n != 0),
            _ => None,
        }
    }

    /// The buffer proxy, if this is one.
    #[must_use]
    pub fn as_buffer(&self) -> Option<&Buffer> {
        match self {
            Self::Buffer(b) => Some(b),
            _ => None,
        }
    }

    /// The window proxy, if this is one.
    #[must_use]
    pub fn as_window(&self) -> Option<&Window> {
        match self {
            Self::Window(w) => Some(w),
            _ => None,
        }
    }

    /// The list items, if this is a decoded list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Object]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Whether this is [`Object::None`].
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Marshal into a host-compatible value.
    ///
    /// Proxies turn back into the native references they wrap, except
    /// windows, which become their stable window ID since their native
    /// position can change. Info records become dictionaries.
    #[must_use]
    pub fn to_host(&self) -> Value {
        match self {
            Self::None => Value::Nil,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(n) => Value::Int(*n),
            Self::Float(f) => Value::Float(*f),
            Self::Text(s) => Value::Str(s.clone()),
            Self::Bytes(b) => Value::Bytes(b.clone()),
            Self::List(items) => Value::List(items.iter().map(Self::to_host).collect()),
            Self::Dict(items) => Value::Dict(
                items
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_host()))
                    .collect(),
            ),
            Self::Buffer(b) => Value::Native(NativeRef::Buffer(b.number())),
            Self::Window(w) => Value::Int(w.id()),
            Self::TabPage(t) => Value::Native(NativeRef::TabPage(t.handle())),
            Self::Options(o) => Value::Native(NativeRef::Options(o.scope())),
            Self::Variables(v) => Value::Native(NativeRef::Vars(v.scope())),
            Self::HostList(l) => Value::Native(l.native()),
            Self::HostDict(d) => Value::Native(d.native()),
            Self::ListOption(opt) => Value::Str(opt.as_str().to_string()),
            Self::Mapping(info) => info.to_host(),
            Self::Command(info) => info.to_host(),
            Self::Changes(ops) => Value::List(ops.iter().map(ChangeOp::to_host).collect()),
        }
    }
}

impl From<&str> for Object {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Object {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Object {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for Object {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Object {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<Vec<Object>> for Object {
    fn from(items: Vec<Object>) -> Self {
        Self::List(items)
    }
}

impl From<Buffer> for Object {
    fn from(buffer: Buffer) -> Self {
        Self::Buffer(buffer)
    }
}

impl From<Window> for Object {
    fn from(window: Window) -> Self {
        Self::Window(window)
    }
}

/// Decode host bytes as text, keeping the raw bytes if they are not UTF-8.
pub(crate) fn decode_bytes(bytes: Vec<u8>) -> Object {
    match String::from_utf8(bytes) {
        Ok(text) => Object::Text(text),
        Err(err) => Object::Bytes(err.into_bytes()),
    }
}

/// Decode a dictionary key or table key to text.
pub(crate) fn decode_key(key: Value) -> String {
    match key {
        Value::Str(s) => s,
        Value::Bytes(b) => String::from_utf8_lossy(&b).into_owned(),
        other => other.to_literal(),
    }
}

impl Session {
    /// Wrap or decode a value coming from the host.
    ///
    /// Native references are wrapped by the proxy registered for their kind,
    /// going through the identity caches for buffers, windows and tab pages.
    /// Bytes are decoded as text when they are valid UTF-8. Plain lists and
    /// dictionaries are decoded recursively; everything else passes through.
    ///
    /// # Errors
    ///
    /// Returns an error if wrapping needs a host query that fails (windows
    /// compute their stable identity when first wrapped).
    pub fn wrap_or_decode(&self, value: Value) -> Result<Object, Error> {
        Ok(match value {
            Value::Nil => Object::None,
            Value::Bool(b) => Object::Bool(b),
            Value::Int(n) => Object::Int(n),
            Value::Float(f) => Object::Float(f),
            Value::Str(s) => Object::Text(s),
            Value::Bytes(b) => decode_bytes(b),
            Value::List(items) => Object::List(
                items
                    .into_iter()
                    .map(|item| self.wrap_or_decode(item))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Dict(items) => Object::Dict(
                items
                    .into_iter()
                    .map(|(k, v)| Ok((k, self.wrap_or_decode(v)?)))
                    .collect::<Result<_, Error>>()?,
            ),
            Value::Native(native) => self.wrap_native(native)?,
        })
    }

    /// Wrap a native reference in the proxy for its kind.
    fn wrap_native(&self, native: NativeRef) -> Result<Object, Error> {
        Ok(match native {
            NativeRef::Buffer(number) => Object::Buffer(self.wrap_buffer(number)),
            NativeRef::Window { tab, number } => Object::Window(self.wrap_window(tab, number)?),
            NativeRef::TabPage(handle) => Object::TabPage(self.wrap_tabpage(handle)),
            NativeRef::Options(scope) => Object::Options(Options::for_scope(scope)),
            NativeRef::Vars(scope) => Object::Variables(Variables::for_scope(scope)),
            NativeRef::List(_) => Object::HostList(ListProxy::new(native)),
            NativeRef::Dict(_) => Object::HostDict(DictProxy::new(native)),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fake::FakeHost;

    #[test]
    fn test_decode_invalid_utf8_keeps_bytes() {
        assert_eq!(decode_bytes(b"abc".to_vec()), Object::from("abc"));
        assert_eq!(
            decode_bytes(vec![0xff, 0xfe]),
            Object::Bytes(vec![0xff, 0xfe])
        );
    }

    #[test]
    fn test_wrap_decodes_nested_containers() {
        let session = Session::new(FakeHost::new());
        let value = Value::List(vec![
            Value::Bytes(b"one".to_vec()),
            Value::Dict(BTreeMap::from([(
                "buf".to_string(),
                Value::Native(NativeRef::Buffer(1)),
            )])),
        ]);
        let object = session.wrap_or_decode(value).unwrap();
        let items = object.as_list().unwrap();
        assert_eq!(items[0], Object::from("one"));
        match &items[1] {
            Object::Dict(d) => assert_eq!(d["buf"].as_buffer().map(Buffer::number), Some(1)),
            other => panic!("expected dict, got {other:?}"),
        }
    }

    #[test]
    fn test_wrap_native_tables() {
        let session = Session::new(FakeHost::new());
        let object = session
            .wrap_or_decode(Value::Native(NativeRef::Options(crate::Scope::Buffer(1))))
            .unwrap();
        assert!(matches!(object, Object::Options(_)));
        let object = session
            .wrap_or_decode(Value::Native(NativeRef::List(9)))
            .unwrap();
        assert!(matches!(object, Object::HostList(_)));
    }

    #[test]
    fn test_to_host_round_trips_proxies() {
        let session = Session::new(FakeHost::new());
        let buffer = session.wrap_buffer(1);
        assert_eq!(
            Object::Buffer(buffer).to_host(),
            Value::Native(NativeRef::Buffer(1))
        );
        assert_eq!(Object::None.to_host(), Value::Nil);
    }
}
