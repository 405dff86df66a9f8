//! Window proxies.
//!
//! The host names windows by position (tab page number, window number), and
//! positions shift whenever windows are opened, closed or moved. A [`Window`]
//! is therefore keyed by the host's stable window ID, looked up once when the
//! window is first wrapped, and re-resolves its current position from that ID
//! on every access.

use std::fmt;
use std::rc::Rc;

use crate::buffer::Buffer;
use crate::error::Error;
use crate::host::{Current, NativeRef, Scope, Value};
use crate::object::Object;
use crate::options::{Options, Variables};
use crate::proxy::{Delegating, LocalStore};
use crate::session::Session;

/// A proxy for a host window.
///
/// Once the window is closed the proxy is dead: [`valid`](Self::valid) is
/// false from then on, reading the `valid` attribute yields `false`, and
/// every other access fails with [`Error::DeadWindow`].
#[derive(Clone)]
pub struct Window(Rc<WindowInner>);

struct WindowInner {
    id: i64,
    locals: LocalStore,
}

impl Window {
    pub(crate) fn new(id: i64) -> Self {
        Self(Rc::new(WindowInner {
            id,
            locals: LocalStore::default(),
        }))
    }

    /// The host's stable window ID.
    #[must_use]
    pub fn id(&self) -> i64 {
        self.0.id
    }

    /// Find the window's current position, or `None` if it has been closed.
    #[must_use]
    pub fn resolve(&self, session: &Session) -> Option<NativeRef> {
        let found = session
            .host()
            .call("win_id2tabwin", &[Value::Int(self.0.id)])
            .ok()?
            .into_list()?;
        match found.as_slice() {
            [tab, number] => match (tab.as_int()?, number.as_int()?) {
                (0, _) | (_, 0) => None,
                (tab, number) => Some(NativeRef::Window { tab, number }),
            },
            _ => None,
        }
    }

    /// Whether the window is still open.
    #[must_use]
    pub fn valid(&self, session: &Session) -> bool {
        self.resolve(session).is_some()
    }

    /// The window's number within its tab page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeadWindow`] if the window has been closed.
    pub fn number(&self, session: &Session) -> Result<i64, Error> {
        match self.native(session)? {
            NativeRef::Window { number, .. } => Ok(number),
            _ => Err(Error::DeadWindow),
        }
    }

    /// The buffer shown in the window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeadWindow`] if the window has been closed.
    pub fn buffer(&self, session: &Session) -> Result<Buffer, Error> {
        match self.get(session, "buffer")? {
            Object::Buffer(buffer) => Ok(buffer),
            other => Err(Error::unexpected("window buffer", other.to_host())),
        }
    }

    /// The cursor position as (1-based line, 0-based column).
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeadWindow`] if the window has been closed.
    pub fn cursor(&self, session: &Session) -> Result<(i64, i64), Error> {
        let value = self.get(session, "cursor")?;
        match value.as_list() {
            Some([line, col]) => match (line.as_int(), col.as_int()) {
                (Some(line), Some(col)) => Ok((line, col)),
                _ => Err(Error::unexpected("window cursor", value.to_host())),
            },
            _ => Err(Error::unexpected("window cursor", value.to_host())),
        }
    }

    /// Move the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeadWindow`] if the window has been closed, or the
    /// host's error for an invalid position.
    pub fn set_cursor(&self, session: &Session, line: i64, col: i64) -> Result<(), Error> {
        self.set(
            session,
            "cursor",
            Object::List(vec![Object::Int(line), Object::Int(col)]),
        )
    }

    /// The window's local options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeadWindow`] if the window has been closed.
    pub fn options(&self, session: &Session) -> Result<Options, Error> {
        Ok(Options::for_scope(self.scope(session)?))
    }

    /// The window's `w:` variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeadWindow`] if the window has been closed.
    pub fn vars(&self, session: &Session) -> Result<Variables, Error> {
        Ok(Variables::for_scope(self.scope(session)?))
    }

    fn scope(&self, session: &Session) -> Result<Scope, Error> {
        match self.native(session)? {
            NativeRef::Window { tab, number } => Ok(Scope::Window { tab, number }),
            _ => Err(Error::DeadWindow),
        }
    }

    /// Values stored on this proxy.
    #[must_use]
    pub fn store(&self) -> &LocalStore {
        &self.0.locals
    }

    /// Make this the current window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeadWindow`] if the window has been closed.
    pub fn goto(&self, session: &Session) -> Result<(), Error> {
        let native = self.native(session)?;
        session.host().set_current(&native)?;
        Ok(())
    }

    /// Whether this is the current window.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the current window cannot be queried.
    pub fn is_current(&self, session: &Session) -> Result<bool, Error> {
        let current = session.host().current(Current::Window)?;
        Ok(self.resolve(session) == Some(current))
    }
}

impl Delegating for Window {
    const WRAPPER: &'static str = "Window";
    const WRITABLE: &'static [&'static str] = &["cursor", "height", "width"];

    fn native(&self, session: &Session) -> Result<NativeRef, Error> {
        self.resolve(session).ok_or(Error::DeadWindow)
    }

    fn locals(&self) -> Option<&LocalStore> {
        Some(&self.0.locals)
    }

    fn get(&self, session: &Session, name: &str) -> Result<Object, Error> {
        if let Some(value) = self.0.locals.get(name) {
            return Ok(value);
        }
        let Some(native) = self.resolve(session) else {
            return if name == "valid" {
                Ok(Object::Bool(false))
            } else {
                Err(Error::DeadWindow)
            };
        };
        let value = session.host().get(&native, name).map_err(Error::Host)?;
        session.wrap_or_decode(value)
    }
}

impl PartialEq for Window {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.0.id)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Wrap the window at a native position.
    ///
    /// The host is asked for the window's stable ID, which is then used as
    /// the identity key. Entries for closed windows are pruned whenever a new
    /// window is wrapped.
    ///
    /// # Errors
    ///
    /// Returns an error if the host has no window at that position.
    pub fn wrap_window(&self, tab: i64, number: i64) -> Result<Window, Error> {
        let value = self
            .host()
            .call("win_getid", &[Value::Int(number), Value::Int(tab)])?;
        match value.as_int() {
            Some(id) if id > 0 => Ok(self.wrap_window_id(id)),
            _ => Err(Error::unexpected("window id", value)),
        }
    }

    /// Wrap a window by its stable ID.
    pub fn wrap_window_id(&self, id: i64) -> Window {
        if let Some(window) = self.windows.borrow().get_known(&id) {
            return window;
        }
        let mut windows = self.windows.borrow_mut();
        let pruned = windows.prune(|w| w.valid(self));
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned closed windows from identity cache");
        }
        windows.get_or_insert_with(id, || Window::new(id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fake::FakeHost;

    #[test]
    fn test_window_follows_rearrangement() {
        let host = Rc::new(FakeHost::new());
        let session = Session::new(Rc::clone(&host));
        let first = session.current_window().unwrap();
        assert_eq!(first.number(&session).unwrap(), 1);

        // Splitting above pushes the original window to position 2.
        host.split_window();
        assert_eq!(first.number(&session).unwrap(), 2);
        assert_eq!(session.wrap_window(1, 2).unwrap(), first);
    }

    #[test]
    fn test_dead_window_reports_invalid() {
        let host = Rc::new(FakeHost::new());
        let session = Session::new(Rc::clone(&host));
        let id = host.split_window();
        let window = session.wrap_window_id(id);
        assert!(window.valid(&session));

        host.close_window(id);
        assert!(!window.valid(&session));
        assert_eq!(window.get(&session, "valid").unwrap(), Object::Bool(false));
        assert!(matches!(window.cursor(&session), Err(Error::DeadWindow)));
        assert!(matches!(window.options(&session), Err(Error::DeadWindow)));
    }

    #[test]
    fn test_cursor_round_trip() {
        let session = Session::new(FakeHost::with_lines(&["a", "b", "c"]));
        let window = session.current_window().unwrap();
        window.set_cursor(&session, 3, 0).unwrap();
        assert_eq!(window.cursor(&session).unwrap(), (3, 0));
        assert!(window.set(&session, "buffer", Object::None).is_err());
    }
}
