//! Buffer proxies.

use std::fmt;
use std::ops::Range;
use std::rc::Rc;

use crate::error::Error;
use crate::host::{NativeRef, Scope, Value};
use crate::object::Object;
use crate::options::{Options, Variables};
use crate::proxy::{Delegating, LocalStore, clamp_range, resolve_index};
use crate::session::Session;

/// A proxy for a host buffer.
///
/// Buffers are identified by buffer number, which the host never reuses, and
/// are always obtained through the session so that a buffer has exactly one
/// proxy. Cloning a `Buffer` clones the handle, not the proxy; two clones
/// compare equal.
///
/// The buffer contents behave as a sequence of lines. All access goes to the
/// host, so reading from a buffer that has been wiped fails with the host's
/// own error.
#[derive(Clone)]
pub struct Buffer(Rc<BufferInner>);

struct BufferInner {
    number: i64,
    locals: LocalStore,
}

impl Buffer {
    pub(crate) fn new(number: i64) -> Self {
        Self(Rc::new(BufferInner {
            number,
            locals: LocalStore::default(),
        }))
    }

    /// The host buffer number.
    #[must_use]
    pub fn number(&self) -> i64 {
        self.0.number
    }

    fn native_ref(&self) -> NativeRef {
        NativeRef::Buffer(self.0.number)
    }

    /// Whether the host buffer still exists.
    #[must_use]
    pub fn valid(&self, session: &Session) -> bool {
        session.host().valid(&self.native_ref())
    }

    /// The buffer's full file name, empty for an unnamed buffer.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the buffer is gone.
    pub fn name(&self, session: &Session) -> Result<String, Error> {
        match self.get(session, "name")? {
            Object::Text(name) => Ok(name),
            Object::None => Ok(String::new()),
            other => Err(Error::unexpected("buffer name", other.to_host())),
        }
    }

    /// Rename the buffer.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the buffer is gone.
    pub fn set_name(&self, session: &Session, name: &str) -> Result<(), Error> {
        self.set(session, "name", Object::from(name))
    }

    /// The buffer's local options.
    #[must_use]
    pub fn options(&self) -> Options {
        Options::for_scope(Scope::Buffer(self.0.number))
    }

    /// The buffer's `b:` variables.
    #[must_use]
    pub fn vars(&self) -> Variables {
        Variables::for_scope(Scope::Buffer(self.0.number))
    }

    /// Values stored on this proxy.
    #[must_use]
    pub fn store(&self) -> &LocalStore {
        &self.0.locals
    }

    /// Number of lines. An empty buffer has one empty line.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the buffer is gone.
    pub fn len(&self, session: &Session) -> Result<usize, Error> {
        Ok(session.host().length(&self.native_ref())?)
    }

    /// Whether the buffer has no lines at all.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the buffer is gone.
    pub fn is_empty(&self, session: &Session) -> Result<bool, Error> {
        Ok(self.len(session)? == 0)
    }

    /// Read one line. Negative indices count from the end.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of range or the buffer is gone.
    pub fn line(&self, session: &Session, index: isize) -> Result<String, Error> {
        let i = resolve_index(self.len(session)?, index)?;
        self.read_line(session, i)
    }

    fn read_line(&self, session: &Session, index: usize) -> Result<String, Error> {
        let value = session
            .host()
            .item(&self.native_ref(), &Value::Int(index as i64))?;
        value
            .to_text()
            .ok_or_else(|| Error::unexpected("buffer line", value))
    }

    /// Read a range of lines, clamped to the buffer.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the buffer is gone.
    pub fn lines_in(&self, session: &Session, range: Range<usize>) -> Result<Vec<String>, Error> {
        clamp_range(range, self.len(session)?)
            .map(|i| self.read_line(session, i))
            .collect()
    }

    /// Read every line.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the buffer is gone.
    pub fn lines(&self, session: &Session) -> Result<Vec<String>, Error> {
        self.lines_in(session, 0..usize::MAX)
    }

    /// Replace one line.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of range or the buffer is not
    /// modifiable.
    pub fn set_line(&self, session: &Session, index: isize, text: &str) -> Result<(), Error> {
        let i = resolve_index(self.len(session)?, index)?;
        session
            .host()
            .set_item(&self.native_ref(), &Value::Int(i as i64), Value::from(text))?;
        Ok(())
    }

    /// Replace a range of lines with new ones, using slice assignment.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the buffer is gone or not modifiable.
    pub fn set_lines<S: AsRef<str>>(
        &self,
        session: &Session,
        range: Range<usize>,
        lines: &[S],
    ) -> Result<(), Error> {
        let range = clamp_range(range, self.len(session)?);
        let lines = lines.iter().map(|l| Value::from(l.as_ref())).collect();
        session.host().splice(&self.native_ref(), range, lines)?;
        Ok(())
    }

    /// Append lines at the end of the buffer.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the buffer is gone or not modifiable.
    pub fn append<S: AsRef<str>>(&self, session: &Session, lines: &[S]) -> Result<(), Error> {
        let len = self.len(session)?;
        self.set_lines(session, len..len, lines)
    }

    /// Delete a range of lines.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the buffer is gone or not modifiable.
    pub fn delete_lines(&self, session: &Session, range: Range<usize>) -> Result<(), Error> {
        self.set_lines::<&str>(session, range, &[])
    }

    /// Whether this is the buffer in the current window.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the current buffer cannot be queried.
    pub fn is_current(&self, session: &Session) -> Result<bool, Error> {
        Ok(session.host().current(crate::host::Current::Buffer)? == self.native_ref())
    }
}

impl Delegating for Buffer {
    const WRAPPER: &'static str = "Buffer";
    const WRITABLE: &'static [&'static str] = &["name"];

    fn native(&self, _session: &Session) -> Result<NativeRef, Error> {
        Ok(self.native_ref())
    }

    fn locals(&self) -> Option<&LocalStore> {
        Some(&self.0.locals)
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("number", &self.0.number)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fake::FakeHost;

    #[test]
    fn test_line_access() {
        let session = Session::new(FakeHost::with_lines(&["one", "two", "three"]));
        let buffer = session.current_buffer().unwrap();
        assert_eq!(buffer.len(&session).unwrap(), 3);
        assert_eq!(buffer.line(&session, -1).unwrap(), "three");
        assert_eq!(buffer.lines_in(&session, 1..10).unwrap(), vec!["two", "three"]);
    }

    #[test]
    fn test_line_mutation_goes_to_host() {
        let session = Session::new(FakeHost::with_lines(&["a", "b", "c"]));
        let buffer = session.current_buffer().unwrap();
        buffer.set_line(&session, 0, "A").unwrap();
        buffer.set_lines(&session, 1..2, &["x", "y"]).unwrap();
        buffer.append(&session, &["end"]).unwrap();
        buffer.delete_lines(&session, 3..4).unwrap();
        assert_eq!(buffer.lines(&session).unwrap(), vec!["A", "x", "y", "end"]);
    }

    #[test]
    fn test_only_name_is_writable() {
        let session = Session::new(FakeHost::new());
        let buffer = session.current_buffer().unwrap();
        buffer.set_name(&session, "/tmp/x.txt").unwrap();
        assert_eq!(buffer.name(&session).unwrap(), "/tmp/x.txt");

        let err = buffer.set(&session, "number", Object::Int(9)).unwrap_err();
        assert!(matches!(
            err,
            Error::ReadOnly { wrapper: "Buffer", ref attribute } if attribute == "number"
        ));
    }

    #[test]
    fn test_locals_shadow_host_attributes() {
        let session = Session::new(FakeHost::new());
        let buffer = session.current_buffer().unwrap();
        buffer.store().insert("name", Object::from("shadowed"));
        assert_eq!(buffer.get(&session, "name").unwrap(), Object::from("shadowed"));
    }

    #[test]
    fn test_unknown_attribute_surfaces_host_error() {
        let session = Session::new(FakeHost::new());
        let buffer = session.current_buffer().unwrap();
        let err = buffer.get(&session, "no_such_thing").unwrap_err();
        assert!(matches!(err, Error::Host(crate::HostError::NoSuchAttribute(_))));
    }
}
