//! Delegation of attribute and item access onto host-native objects.
//!
//! Proxies keep no copy of host state. Every read goes to the host and the
//! result is passed through [`Session::wrap_or_decode`]; every write is
//! forwarded to the host. Attribute writes are only allowed for the names a
//! wrapper type lists in [`Delegating::WRITABLE`], since most host attributes
//! are managed by the host itself.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ops::Range;

use crate::error::Error;
use crate::host::{HostError, NativeRef, Value};
use crate::object::{Object, decode_key};
use crate::session::Session;

/// Attribute delegation onto a wrapped host object.
pub trait Delegating {
    /// Wrapper name used in error messages.
    const WRAPPER: &'static str;

    /// Attribute names that may be written through this wrapper.
    const WRITABLE: &'static [&'static str];

    /// Resolve the host object currently behind this proxy.
    ///
    /// # Errors
    ///
    /// Returns an error if the host object can no longer be found.
    fn native(&self, session: &Session) -> Result<NativeRef, Error>;

    /// Proxy-local values, consulted before the host on reads.
    fn locals(&self) -> Option<&LocalStore> {
        None
    }

    /// Read an attribute of the wrapped object.
    ///
    /// Values stored in [`locals`](Self::locals) shadow host attributes.
    /// Host failures, including "no such attribute", are passed through
    /// unmodified as [`Error::Host`].
    ///
    /// # Errors
    ///
    /// Returns the host's error if the attribute cannot be read.
    fn get(&self, session: &Session, name: &str) -> Result<Object, Error> {
        if let Some(value) = self.locals().and_then(|locals| locals.get(name)) {
            return Ok(value);
        }
        let native = self.native(session)?;
        let value = session.host().get(&native, name).map_err(Error::Host)?;
        session.wrap_or_decode(value)
    }

    /// Write an attribute of the wrapped object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadOnly`] if `name` is not in
    /// [`WRITABLE`](Self::WRITABLE), or the host's error if the write fails.
    fn set(&self, session: &Session, name: &str, value: Object) -> Result<(), Error> {
        if !Self::WRITABLE.contains(&name) {
            return Err(Error::ReadOnly {
                wrapper: Self::WRAPPER,
                attribute: name.to_string(),
            });
        }
        let native = self.native(session)?;
        session
            .host()
            .set(&native, name, value.to_host())
            .map_err(Error::Host)
    }
}

/// Values kept on a proxy rather than on the host object.
///
/// Since a host object is always represented by the same proxy, anything
/// stored here lives as long as the host object does.
#[derive(Debug, Default)]
pub struct LocalStore {
    values: RefCell<BTreeMap<String, Object>>,
}

impl LocalStore {
    /// Look up a stored value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Object> {
        self.values.borrow().get(name).cloned()
    }

    /// Store a value, returning the one it replaces.
    pub fn insert(&self, name: impl Into<String>, value: Object) -> Option<Object> {
        self.values.borrow_mut().insert(name.into(), value)
    }

    /// Remove a stored value.
    pub fn remove(&self, name: &str) -> Option<Object> {
        self.values.borrow_mut().remove(name)
    }

    /// Whether a value is stored under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.borrow().contains_key(name)
    }
}

/// Map a possibly negative index onto `0..len`.
pub(crate) fn resolve_index(len: usize, index: isize) -> Result<usize, Error> {
    let resolved = if index < 0 {
        len.checked_sub(index.unsigned_abs())
    } else {
        Some(index.unsigned_abs())
    };
    match resolved {
        Some(i) if i < len => Ok(i),
        _ => Err(Error::Host(HostError::IndexOutOfRange(index as i64))),
    }
}

/// Clamp a range onto `0..len`, the way slice assignment does.
pub(crate) fn clamp_range(range: Range<usize>, len: usize) -> Range<usize> {
    let end = range.end.min(len);
    range.start.min(end)..end
}

/// A proxy for a host list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListProxy {
    native: NativeRef,
}

impl ListProxy {
    pub(crate) const fn new(native: NativeRef) -> Self {
        Self { native }
    }

    /// The wrapped native reference.
    #[must_use]
    pub const fn native(&self) -> NativeRef {
        self.native
    }

    /// Number of items.
    ///
    /// # Errors
    ///
    /// Returns an error if the host list is gone.
    pub fn len(&self, session: &Session) -> Result<usize, Error> {
        Ok(session.host().length(&self.native)?)
    }

    /// Whether the list is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the host list is gone.
    pub fn is_empty(&self, session: &Session) -> Result<bool, Error> {
        Ok(self.len(session)? == 0)
    }

    /// Read one item. Negative indices count from the end.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of range.
    pub fn get(&self, session: &Session, index: isize) -> Result<Object, Error> {
        let i = resolve_index(self.len(session)?, index)?;
        let value = session.host().item(&self.native, &Value::Int(i as i64))?;
        session.wrap_or_decode(value)
    }

    /// Read every item, wrapping each one.
    ///
    /// # Errors
    ///
    /// Returns an error if the host list is gone.
    pub fn to_vec(&self, session: &Session) -> Result<Vec<Object>, Error> {
        let len = self.len(session)?;
        self.slice(session, 0..len)
    }

    /// Read a slice of items.
    ///
    /// # Errors
    ///
    /// Returns an error if the host list is gone.
    pub fn slice(&self, session: &Session, range: Range<usize>) -> Result<Vec<Object>, Error> {
        let range = clamp_range(range, self.len(session)?);
        range
            .map(|i| {
                let value = session.host().item(&self.native, &Value::Int(i as i64))?;
                session.wrap_or_decode(value)
            })
            .collect()
    }

    /// Replace one item.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of range.
    pub fn set(&self, session: &Session, index: isize, value: Object) -> Result<(), Error> {
        let i = resolve_index(self.len(session)?, index)?;
        session
            .host()
            .set_item(&self.native, &Value::Int(i as i64), value.to_host())?;
        Ok(())
    }

    /// Delete one item.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of range.
    pub fn delete(&self, session: &Session, index: isize) -> Result<(), Error> {
        let i = resolve_index(self.len(session)?, index)?;
        session.host().splice(&self.native, i..i + 1, Vec::new())?;
        Ok(())
    }

    /// Insert an item before `index`. Indices past the end append.
    ///
    /// # Errors
    ///
    /// Returns an error if the host list is gone.
    pub fn insert(&self, session: &Session, index: usize, value: Object) -> Result<(), Error> {
        let i = index.min(self.len(session)?);
        session
            .host()
            .splice(&self.native, i..i, vec![value.to_host()])?;
        Ok(())
    }

    /// Append an item.
    ///
    /// # Errors
    ///
    /// Returns an error if the host list is gone.
    pub fn append(&self, session: &Session, value: Object) -> Result<(), Error> {
        self.insert(session, usize::MAX, value)
    }

    /// Replace a slice with new items.
    ///
    /// # Errors
    ///
    /// Returns an error if the host list is gone.
    pub fn set_slice(
        &self,
        session: &Session,
        range: Range<usize>,
        values: Vec<Object>,
    ) -> Result<(), Error> {
        let range = clamp_range(range, self.len(session)?);
        let values = values.iter().map(Object::to_host).collect();
        session.host().splice(&self.native, range, values)?;
        Ok(())
    }
}

/// A proxy for a host dictionary.
///
/// Keys are always decoded to text; values go through
/// [`Session::wrap_or_decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DictProxy {
    native: NativeRef,
}

impl DictProxy {
    pub(crate) const fn new(native: NativeRef) -> Self {
        Self { native }
    }

    /// The wrapped native reference.
    #[must_use]
    pub const fn native(&self) -> NativeRef {
        self.native
    }

    /// Number of entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the host dictionary is gone.
    pub fn len(&self, session: &Session) -> Result<usize, Error> {
        Ok(session.host().length(&self.native)?)
    }

    /// Whether the dictionary is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the host dictionary is gone.
    pub fn is_empty(&self, session: &Session) -> Result<bool, Error> {
        Ok(self.len(session)? == 0)
    }

    /// The keys, decoded to text.
    ///
    /// # Errors
    ///
    /// Returns an error if the host dictionary is gone.
    pub fn keys(&self, session: &Session) -> Result<Vec<String>, Error> {
        Ok(session
            .host()
            .keys(&self.native)?
            .into_iter()
            .map(decode_key)
            .collect())
    }

    /// The values, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the host dictionary is gone.
    pub fn values(&self, session: &Session) -> Result<Vec<Object>, Error> {
        Ok(self.items(session)?.into_iter().map(|(_, v)| v).collect())
    }

    /// The entries, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the host dictionary is gone.
    pub fn items(&self, session: &Session) -> Result<Vec<(String, Object)>, Error> {
        self.keys(session)?
            .into_iter()
            .map(|key| {
                let value = session.host().item(&self.native, &Value::Str(key.clone()))?;
                Ok((key, session.wrap_or_decode(value)?))
            })
            .collect()
    }

    /// Look up a key, returning `None` if it is absent.
    ///
    /// # Errors
    ///
    /// Returns an error for host failures other than a missing key.
    pub fn get(&self, session: &Session, key: &str) -> Result<Option<Object>, Error> {
        match session.host().item(&self.native, &Value::from(key)) {
            Ok(value) => Ok(Some(session.wrap_or_decode(value)?)),
            Err(HostError::NoSuchKey(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Whether a key is present.
    ///
    /// # Errors
    ///
    /// Returns an error for host failures other than a missing key.
    pub fn contains(&self, session: &Session, key: &str) -> Result<bool, Error> {
        Ok(self.keys(session)?.iter().any(|k| k == key))
    }

    /// Set a key.
    ///
    /// # Errors
    ///
    /// Returns an error if the host rejects the write.
    pub fn set(&self, session: &Session, key: &str, value: Object) -> Result<(), Error> {
        session
            .host()
            .set_item(&self.native, &Value::from(key), value.to_host())?;
        Ok(())
    }

    /// Remove a key and return its value, or `None` if it was absent.
    ///
    /// # Errors
    ///
    /// Returns an error for host failures other than a missing key.
    pub fn pop(&self, session: &Session, key: &str) -> Result<Option<Object>, Error> {
        let Some(value) = self.get(session, key)? else {
            return Ok(None);
        };
        session.host().del_item(&self.native, &Value::from(key))?;
        Ok(Some(value))
    }

    /// Remove and return an arbitrary entry, or `None` if empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the host dictionary is gone.
    pub fn popitem(&self, session: &Session) -> Result<Option<(String, Object)>, Error> {
        let Some(key) = self.keys(session)?.pop() else {
            return Ok(None);
        };
        Ok(self.pop(session, &key)?.map(|value| (key, value)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fake::FakeHost;
    use std::rc::Rc;

    #[test]
    fn test_resolve_index() {
        assert_eq!(resolve_index(3, 0).unwrap(), 0);
        assert_eq!(resolve_index(3, -1).unwrap(), 2);
        assert!(resolve_index(3, 3).is_err());
        assert!(resolve_index(3, -4).is_err());
    }

    #[test]
    fn test_clamp_range() {
        assert_eq!(clamp_range(1..10, 4), 1..4);
        assert_eq!(clamp_range(6..10, 4), 4..4);
    }

    #[test]
    fn test_list_proxy_mutation() {
        let host = Rc::new(FakeHost::new());
        let handle = host.add_list(vec![Value::Int(1), Value::Bytes(b"two".to_vec())]);
        let session = Session::new(Rc::clone(&host));
        let list = ListProxy::new(handle);

        assert_eq!(list.len(&session).unwrap(), 2);
        assert_eq!(list.get(&session, -1).unwrap(), Object::from("two"));

        list.append(&session, Object::Int(3)).unwrap();
        list.insert(&session, 0, Object::Int(0)).unwrap();
        list.delete(&session, 2).unwrap();
        list.set(&session, 1, Object::Int(10)).unwrap();
        assert_eq!(
            list.to_vec(&session).unwrap(),
            vec![Object::Int(0), Object::Int(10), Object::Int(3)]
        );
    }

    #[test]
    fn test_dict_proxy_access() {
        let host = Rc::new(FakeHost::new());
        let handle = host.add_dict(vec![
            ("a".to_string(), Value::Int(1)),
            ("b".to_string(), Value::Bytes(b"bee".to_vec())),
        ]);
        let session = Session::new(Rc::clone(&host));
        let dict = DictProxy::new(handle);

        assert_eq!(dict.keys(&session).unwrap(), vec!["a", "b"]);
        assert_eq!(dict.get(&session, "b").unwrap(), Some(Object::from("bee")));
        assert_eq!(dict.get(&session, "zz").unwrap(), None);
        assert!(dict.contains(&session, "a").unwrap());

        assert_eq!(dict.pop(&session, "a").unwrap(), Some(Object::Int(1)));
        assert_eq!(dict.pop(&session, "a").unwrap(), None);
        assert_eq!(
            dict.popitem(&session).unwrap(),
            Some(("b".to_string(), Object::from("bee")))
        );
        assert!(dict.is_empty(&session).unwrap());
    }
}
