//! Temporary state changes that are undone at the end of a scope.
//!
//! [`TemporaryState`] records the prior value of every key it touches and
//! writes those values back when dropped, whether the scope is left normally,
//! through `?` or by a panic. Only the first touch of a key is recorded, so
//! repeated writes still restore the original value.
//!
//! ```rust,ignore
//! {
//!     let _editable = session.temp_modifiable(&buffer)?;
//!     buffer.set_lines(&session, 0..1, &["generated"])?;
//! } // modifiable and readonly are restored here
//! ```

use std::collections::HashMap;
use std::fmt;

use crate::buffer::Buffer;
use crate::error::Error;
use crate::host::{NativeRef, Value};
use crate::object::Object;
use crate::options::{Options, Variables};
use crate::proxy::Delegating;
use crate::session::Session;
use crate::tabpage::TabPage;
use crate::window::Window;

/// Something with named values that can be read and written.
pub trait StateTarget {
    /// Read a named value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be read.
    fn read(&self, session: &Session, name: &str) -> Result<Object, Error>;

    /// Write a named value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be written.
    fn write(&self, session: &Session, name: &str, value: Object) -> Result<(), Error>;
}

impl StateTarget for Options {
    fn read(&self, session: &Session, name: &str) -> Result<Object, Error> {
        self.get(session, name)
    }

    fn write(&self, session: &Session, name: &str, value: Object) -> Result<(), Error> {
        self.set(session, name, value)
    }
}

/// Missing variables read as [`Object::None`]; writing `None` removes the
/// variable again.
impl StateTarget for Variables {
    fn read(&self, session: &Session, name: &str) -> Result<Object, Error> {
        Ok(self.get(session, name)?.unwrap_or_default())
    }

    fn write(&self, session: &Session, name: &str, value: Object) -> Result<(), Error> {
        if value.is_none() {
            self.remove(session, name)
        } else {
            self.set(session, name, value)
        }
    }
}

macro_rules! delegating_state_target {
    ($($proxy:ty),*) => {
        $(
            impl StateTarget for $proxy {
                fn read(&self, session: &Session, name: &str) -> Result<Object, Error> {
                    self.get(session, name)
                }

                fn write(&self, session: &Session, name: &str, value: Object) -> Result<(), Error> {
                    self.set(session, name, value)
                }
            }
        )*
    };
}

delegating_state_target!(Buffer, Window, TabPage);

/// A set of temporary changes to a [`StateTarget`].
pub struct TemporaryState<'s, T: StateTarget> {
    session: &'s Session,
    target: T,
    saved: HashMap<String, Object>,
}

impl<T: StateTarget + fmt::Debug> fmt::Debug for TemporaryState<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemporaryState")
            .field("target", &self.target)
            .field("saved", &self.saved)
            .finish_non_exhaustive()
    }
}

impl<'s, T: StateTarget> TemporaryState<'s, T> {
    /// Start tracking changes to `target`.
    pub fn new(session: &'s Session, target: T) -> Self {
        Self {
            session,
            target,
            saved: HashMap::new(),
        }
    }

    /// Start tracking changes and apply `presets`.
    ///
    /// # Errors
    ///
    /// Returns the first failed read or write. Presets already applied are
    /// restored before returning.
    pub fn with_presets<'a>(
        session: &'s Session,
        target: T,
        presets: impl IntoIterator<Item = (&'a str, Object)>,
    ) -> Result<Self, Error> {
        let mut state = Self::new(session, target);
        for (name, value) in presets {
            state.set(name, value)?;
        }
        Ok(state)
    }

    /// The target being changed.
    pub fn target(&self) -> &T {
        &self.target
    }

    /// Write `value`, recording the prior value on first touch.
    ///
    /// # Errors
    ///
    /// Returns an error if the prior value cannot be read or the new value
    /// cannot be written.
    pub fn set(&mut self, name: &str, value: impl Into<Object>) -> Result<(), Error> {
        self.save(&[name])?;
        self.target.write(self.session, name, value.into())
    }

    /// Read the current value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be read.
    pub fn get(&self, name: &str) -> Result<Object, Error> {
        self.target.read(self.session, name)
    }

    /// Record the current values of `names` so they are restored too, even
    /// if they are changed by something other than [`set`](Self::set).
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be read.
    pub fn save(&mut self, names: &[&str]) -> Result<(), Error> {
        for &name in names {
            if !self.saved.contains_key(name) {
                let prior = self.target.read(self.session, name)?;
                self.saved.insert(name.to_string(), prior);
            }
        }
        Ok(())
    }

    /// Whether `name` will be restored.
    #[must_use]
    pub fn is_saved(&self, name: &str) -> bool {
        self.saved.contains_key(name)
    }

    /// Restore every recorded value now, reporting the first failure.
    ///
    /// Every value is written back even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns the first failed write.
    pub fn restore(mut self) -> Result<(), Error> {
        self.restore_saved()
    }

    fn restore_saved(&mut self) -> Result<(), Error> {
        let mut first_error = None;
        for (name, prior) in self.saved.drain() {
            if let Err(err) = self.target.write(self.session, &name, prior) {
                tracing::warn!(name = %name, error = %err, "Failed to restore temporary state");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl<T: StateTarget> Drop for TemporaryState<'_, T> {
    fn drop(&mut self) {
        // Failures were already logged.
        let _ = self.restore_saved();
    }
}

/// Keeps another window current until dropped.
#[derive(Debug)]
pub struct ActiveWindow<'s> {
    session: &'s Session,
    window: Window,
    previous: Option<Window>,
    view: Value,
    _quiet: Option<TemporaryState<'s, Options>>,
}

impl ActiveWindow<'_> {
    /// The window made current.
    #[must_use]
    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Whether a switch actually happened.
    #[must_use]
    pub fn switched(&self) -> bool {
        self.previous.is_some()
    }
}

impl Drop for ActiveWindow<'_> {
    fn drop(&mut self) {
        if let Some(previous) = &self.previous
            && let Err(err) = previous.goto(self.session)
        {
            tracing::warn!(window = previous.id(), error = %err, "Failed to return to window");
            return;
        }
        restore_view(self.session, &self.view);
    }
}

/// Shows another buffer in the current window until dropped.
#[derive(Debug)]
pub struct ActiveBuffer<'s> {
    session: &'s Session,
    buffer: Buffer,
    previous: Option<Buffer>,
    view: Value,
    _quiet: Option<TemporaryState<'s, Options>>,
}

impl ActiveBuffer<'_> {
    /// The buffer made current.
    #[must_use]
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Whether a switch actually happened.
    #[must_use]
    pub fn switched(&self) -> bool {
        self.previous.is_some()
    }
}

impl Drop for ActiveBuffer<'_> {
    fn drop(&mut self) {
        if let Some(previous) = &self.previous
            && let Err(err) = self
                .session
                .host()
                .set_current(&NativeRef::Buffer(previous.number()))
        {
            tracing::warn!(buffer = previous.number(), error = %err, "Failed to return to buffer");
            return;
        }
        restore_view(self.session, &self.view);
    }
}

fn restore_view(session: &Session, view: &Value) {
    if let Err(err) = session.host().call("winrestview", std::slice::from_ref(view)) {
        tracing::warn!(error = %err, "Failed to restore window view");
    }
}

impl Session {
    /// Make `buffer` modifiable and not read-only until the guard is dropped.
    ///
    /// # Errors
    ///
    /// Returns the host's error if either option cannot be changed.
    pub fn temp_modifiable(&self, buffer: &Buffer) -> Result<TemporaryState<'_, Options>, Error> {
        TemporaryState::with_presets(
            self,
            buffer.options(),
            [("modifiable", Object::Bool(true)), ("readonly", Object::Bool(false))],
        )
    }

    /// Make `window` current until the guard is dropped.
    ///
    /// Autocommands are suppressed while switching. If `window` is already
    /// current nothing is switched, but the view is still restored on drop.
    ///
    /// # Errors
    ///
    /// Returns an error if the window is closed or the host refuses the
    /// switch.
    pub fn temp_active_window(&self, window: &Window) -> Result<ActiveWindow<'_>, Error> {
        let view = self.host().call("winsaveview", &[])?;
        let current = self.current_window()?;
        if current == *window {
            return Ok(ActiveWindow {
                session: self,
                window: window.clone(),
                previous: None,
                view,
                _quiet: None,
            });
        }
        let quiet = self.suppress_events()?;
        window.goto(self)?;
        tracing::trace!(from = current.id(), to = window.id(), "Switched window");
        Ok(ActiveWindow {
            session: self,
            window: window.clone(),
            previous: Some(current),
            view,
            _quiet: Some(quiet),
        })
    }

    /// Show `buffer` in the current window until the guard is dropped.
    ///
    /// Autocommands are suppressed while switching. If `buffer` is already
    /// current nothing is switched, but the view is still restored on drop.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the switch fails.
    pub fn temp_active_buffer(&self, buffer: &Buffer) -> Result<ActiveBuffer<'_>, Error> {
        let view = self.host().call("winsaveview", &[])?;
        let current = self.current_buffer()?;
        if current == *buffer {
            return Ok(ActiveBuffer {
                session: self,
                buffer: buffer.clone(),
                previous: None,
                view,
                _quiet: None,
            });
        }
        let quiet = self.suppress_events()?;
        self.host()
            .set_current(&NativeRef::Buffer(buffer.number()))?;
        tracing::trace!(from = current.number(), to = buffer.number(), "Switched buffer");
        Ok(ActiveBuffer {
            session: self,
            buffer: buffer.clone(),
            previous: Some(current),
            view,
            _quiet: Some(quiet),
        })
    }

    /// Run `f` with buffer `number` current, then switch back. Returns
    /// `None` without running `f` if the buffer no longer exists.
    pub(crate) fn with_buffer<T>(
        &self,
        number: i64,
        f: impl FnOnce(&Session) -> Result<T, Error>,
    ) -> Result<Option<T>, Error> {
        let buffer = self.wrap_buffer(number);
        if !buffer.valid(self) {
            return Ok(None);
        }
        let _active = self.temp_active_buffer(&buffer)?;
        f(self).map(Some)
    }

    fn suppress_events(&self) -> Result<TemporaryState<'_, Options>, Error> {
        TemporaryState::with_presets(self, self.options(), [("eventignore", Object::from("all"))])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fake::FakeHost;
    use std::rc::Rc;

    #[test]
    fn test_presets_restored_on_drop() {
        let session = Session::new(FakeHost::new());
        let vars = session.vars();
        vars.set(&session, "a", 1_i64).unwrap();
        {
            let mut state =
                TemporaryState::with_presets(&session, vars, [("a", Object::Int(5))])
                    .unwrap();
            assert_eq!(state.get("a").unwrap(), Object::Int(5));
            state.set("a", 6_i64).unwrap();
            state.set("b", "new").unwrap();
        }
        assert_eq!(vars.get(&session, "a").unwrap(), Some(Object::Int(1)));
        assert_eq!(vars.get(&session, "b").unwrap(), None);
    }

    #[test]
    fn test_save_covers_outside_changes() {
        let session = Session::new(FakeHost::new());
        let vars = session.vars();
        vars.set(&session, "x", "before").unwrap();
        let mut state = TemporaryState::new(&session, vars);
        state.save(&["x"]).unwrap();
        vars.set(&session, "x", "changed elsewhere").unwrap();
        assert!(state.is_saved("x"));
        state.restore().unwrap();
        assert_eq!(
            vars.get(&session, "x").unwrap(),
            Some(Object::from("before"))
        );
    }

    #[test]
    fn test_restore_happens_on_error_path() {
        fn fails(session: &Session, vars: Variables) -> Result<(), Error> {
            let _state = TemporaryState::with_presets(session, vars, [("n", Object::Int(2))])?;
            Err(Error::DeadWindow)
        }
        let session = Session::new(FakeHost::new());
        let vars = session.vars();
        vars.set(&session, "n", 1_i64).unwrap();
        assert!(fails(&session, vars).is_err());
        assert_eq!(vars.get(&session, "n").unwrap(), Some(Object::Int(1)));
    }

    #[test]
    fn test_temp_modifiable() {
        let session = Session::new(FakeHost::with_lines(&["x"]));
        let buffer = session.current_buffer().unwrap();
        let options = buffer.options();
        options.set(&session, "modifiable", false).unwrap();
        options.set(&session, "readonly", true).unwrap();
        {
            let _guard = session.temp_modifiable(&buffer).unwrap();
            assert_eq!(
                options.get(&session, "modifiable").unwrap(),
                Object::Bool(true)
            );
            buffer.set_line(&session, 0, "edited").unwrap();
        }
        assert_eq!(
            options.get(&session, "modifiable").unwrap(),
            Object::Bool(false)
        );
        assert_eq!(options.get(&session, "readonly").unwrap(), Object::Bool(true));
    }

    #[test]
    fn test_active_window_switches_and_returns() {
        let host = Rc::new(FakeHost::with_lines(&["a", "b", "c"]));
        let session = Session::new(Rc::clone(&host));
        let original = session.current_window().unwrap();
        original.set_cursor(&session, 2, 0).unwrap();
        let other_id = host.split_window();
        let other = session.wrap_window_id(other_id);
        original.goto(&session).unwrap();

        {
            let guard = session.temp_active_window(&other).unwrap();
            assert!(guard.switched());
            assert!(other.is_current(&session).unwrap());
            assert_eq!(
                session.options().get(&session, "eventignore").unwrap().as_text(),
                Some("all")
            );
        }
        assert!(original.is_current(&session).unwrap());
        assert_eq!(original.cursor(&session).unwrap(), (2, 0));
        assert_eq!(
            session.options().get(&session, "eventignore").unwrap().as_text(),
            Some("")
        );
    }

    #[test]
    fn test_active_window_noop_keeps_events() {
        let session = Session::new(FakeHost::new());
        let current = session.current_window().unwrap();
        let guard = session.temp_active_window(&current).unwrap();
        assert!(!guard.switched());
        assert_eq!(
            session.options().get(&session, "eventignore").unwrap().as_text(),
            Some("")
        );
    }

    #[test]
    fn test_active_buffer_switches_and_returns() {
        let host = Rc::new(FakeHost::with_lines(&["main"]));
        let session = Session::new(Rc::clone(&host));
        let original = session.current_buffer().unwrap();
        let scratch = session.wrap_buffer(host.add_buffer(&["scratch"]));
        {
            let guard = session.temp_active_buffer(&scratch).unwrap();
            assert!(guard.switched());
            assert_eq!(session.current_buffer().unwrap(), scratch);
        }
        assert_eq!(session.current_buffer().unwrap(), original);
    }
}
