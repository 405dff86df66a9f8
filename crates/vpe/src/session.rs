//! The binding session.
//!
//! A [`Session`] owns everything the binding layer keeps between host
//! events: the host handle, the callback registry, the identity caches for
//! buffers, windows and tab pages, the deferred-work queue and the
//! diagnostic log. Every proxy operation takes the session explicitly.
//!
//! # Example
//!
//! ```rust,ignore
//! use vpe::{Session, SessionConfig};
//!
//! let session = Session::builder(host)
//!     .with_config(SessionConfig::new().with_log_maxlen(1000))
//!     .build();
//! session.install()?;
//! ```

use std::cell::RefCell;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::buffer::Buffer;
use crate::defer::Deferred;
use crate::error::Error;
use crate::host::{Current, Host, NativeRef, Scope, Value};
use crate::identity::IdentityCache;
use crate::log::{Appended, Log};
use crate::options::{Options, Variables};
use crate::registry::CallbackRegistry;
use crate::tabpage::TabPage;
use crate::window::Window;

/// Session configuration.
///
/// Deserializes from JSON with every field optional:
///
/// ```rust,ignore
/// let config = SessionConfig::from_json(r#"{"log_maxlen": 200}"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum number of lines kept in the diagnostic log.
    pub log_maxlen: usize,
    /// Global variable the trampolines store `{uid, args}` in.
    pub args_slot: String,
    /// Host function the trampolines call to re-enter the crate.
    pub dispatch_function: String,
    /// Whether [`Session::install`] redefines trampolines that already
    /// exist.
    pub redefine_trampolines: bool,
    /// Name of the buffer [`Session::create_log_buffer`] creates.
    pub log_buffer_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            log_maxlen: 500,
            args_slot: "g:_vpe_args_".to_string(),
            dispatch_function: "VPE_Dispatch".to_string(),
            redefine_trampolines: true,
            log_buffer_name: "[VPE log]".to_string(),
        }
    }
}

impl SessionConfig {
    /// Create a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON configuration document. Missing fields take their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the diagnostic log line limit.
    #[must_use]
    pub const fn with_log_maxlen(mut self, maxlen: usize) -> Self {
        self.log_maxlen = maxlen;
        self
    }

    /// Set the trampoline argument slot variable.
    #[must_use]
    pub fn with_args_slot(mut self, slot: impl Into<String>) -> Self {
        self.args_slot = slot.into();
        self
    }

    /// Set the host dispatch function name.
    #[must_use]
    pub fn with_dispatch_function(mut self, name: impl Into<String>) -> Self {
        self.dispatch_function = name.into();
        self
    }

    /// Set whether existing trampolines are redefined.
    #[must_use]
    pub const fn with_redefine_trampolines(mut self, redefine: bool) -> Self {
        self.redefine_trampolines = redefine;
        self
    }

    /// Set the log buffer name.
    #[must_use]
    pub fn with_log_buffer_name(mut self, name: impl Into<String>) -> Self {
        self.log_buffer_name = name.into();
        self
    }
}

/// Builder for [`Session`].
pub struct SessionBuilder {
    host: Box<dyn Host>,
    config: SessionConfig,
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("host", &"<host>")
            .field("config", &self.config)
            .finish()
    }
}

impl SessionBuilder {
    /// Start building a session over `host`.
    #[must_use]
    pub fn new(host: impl Host + 'static) -> Self {
        Self {
            host: Box::new(host),
            config: SessionConfig::default(),
        }
    }

    /// Use `config`.
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the session.
    #[must_use]
    pub fn build(self) -> Session {
        let log = Log::new(self.config.log_maxlen);
        Session {
            host: self.host,
            config: self.config,
            registry: RefCell::default(),
            buffers: RefCell::default(),
            windows: RefCell::default(),
            tabpages: RefCell::default(),
            deferred: RefCell::default(),
            log: RefCell::new(log),
            log_display: RefCell::new(None),
        }
    }
}

/// The binding context shared by every proxy and callback.
pub struct Session {
    host: Box<dyn Host>,
    config: SessionConfig,
    pub(crate) registry: RefCell<CallbackRegistry>,
    buffers: RefCell<IdentityCache<i64, Buffer>>,
    pub(crate) windows: RefCell<IdentityCache<i64, Window>>,
    pub(crate) tabpages: RefCell<IdentityCache<u64, TabPage>>,
    pub(crate) deferred: RefCell<Deferred>,
    log: RefCell<Log>,
    log_display: RefCell<Option<Buffer>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("callbacks", &self.registry.borrow().len())
            .field("buffers", &self.buffers.borrow().len())
            .field("windows", &self.windows.borrow().len())
            .field("tabpages", &self.tabpages.borrow().len())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session over `host` with the default configuration.
    #[must_use]
    pub fn new(host: impl Host + 'static) -> Self {
        SessionBuilder::new(host).build()
    }

    /// Start building a session over `host`.
    #[must_use]
    pub fn builder(host: impl Host + 'static) -> SessionBuilder {
        SessionBuilder::new(host)
    }

    /// The host.
    #[must_use]
    pub fn host(&self) -> &dyn Host {
        self.host.as_ref()
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The global option table.
    #[must_use]
    pub fn options(&self) -> Options {
        Options::for_scope(Scope::Global)
    }

    /// The `g:` variables.
    #[must_use]
    pub fn vars(&self) -> Variables {
        Variables::for_scope(Scope::Global)
    }

    /// The read-only `v:` variables.
    #[must_use]
    pub fn vvars(&self) -> Variables {
        Variables::for_scope(Scope::Vim)
    }

    /// Wrap a buffer by number. The same number always yields the same
    /// proxy.
    pub fn wrap_buffer(&self, number: i64) -> Buffer {
        self.buffers
            .borrow_mut()
            .get_or_insert_with(number, || Buffer::new(number))
    }

    /// The buffer in the current window.
    ///
    /// # Errors
    ///
    /// Returns the host's error if it cannot report the current buffer.
    pub fn current_buffer(&self) -> Result<Buffer, Error> {
        match self.host().current(Current::Buffer)? {
            NativeRef::Buffer(number) => Ok(self.wrap_buffer(number)),
            other => Err(Error::unexpected("current buffer", Value::Native(other))),
        }
    }

    /// The current window.
    ///
    /// # Errors
    ///
    /// Returns the host's error if it cannot report the current window.
    pub fn current_window(&self) -> Result<Window, Error> {
        match self.host().current(Current::Window)? {
            NativeRef::Window { tab, number } => self.wrap_window(tab, number),
            other => Err(Error::unexpected("current window", Value::Native(other))),
        }
    }

    /// The current tab page.
    ///
    /// # Errors
    ///
    /// Returns the host's error if it cannot report the current tab page.
    pub fn current_tabpage(&self) -> Result<TabPage, Error> {
        match self.host().current(Current::TabPage)? {
            NativeRef::TabPage(handle) => Ok(self.wrap_tabpage(handle)),
            other => Err(Error::unexpected("current tab page", Value::Native(other))),
        }
    }

    /// Add a message to the diagnostic log, and to the log buffer if one is
    /// displayed.
    pub fn log_message(&self, text: &str) {
        tracing::debug!(message = text, "Diagnostic log");
        let appended = self.log.borrow_mut().push(text);
        if let Err(err) = self.mirror_log(&appended) {
            tracing::warn!(error = %err, "Failed to update log buffer");
        }
    }

    /// The diagnostic log's lines, oldest first.
    #[must_use]
    pub fn log_lines(&self) -> Vec<String> {
        self.log.borrow().lines()
    }

    /// Empty the diagnostic log and the log buffer.
    pub fn clear_log(&self) {
        self.log.borrow_mut().clear();
        let display = self.log_display.borrow().clone();
        if let Some(buffer) = display {
            let cleared = self
                .temp_modifiable(&buffer)
                .and_then(|_editable| buffer.delete_lines(self, 0..usize::MAX));
            if let Err(err) = cleared {
                tracing::warn!(error = %err, "Failed to clear log buffer");
            }
        }
    }

    /// Change the diagnostic log line limit.
    pub fn set_log_maxlen(&self, maxlen: usize) {
        let trimmed = self.log.borrow_mut().set_maxlen(maxlen);
        let appended = Appended {
            lines: Vec::new(),
            trimmed,
        };
        if let Err(err) = self.mirror_log(&appended) {
            tracing::warn!(error = %err, "Failed to trim log buffer");
        }
    }

    /// Create a scratch buffer that mirrors the diagnostic log from now on.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the buffer cannot be created.
    pub fn create_log_buffer(&self) -> Result<Buffer, Error> {
        let name = Value::from(self.config.log_buffer_name.as_str());
        let added = self.host().call("bufadd", &[name])?;
        let Some(number) = added.as_int() else {
            return Err(Error::unexpected("log buffer number", added));
        };
        self.host().call("bufload", &[Value::Int(number)])?;

        let buffer = self.wrap_buffer(number);
        let options = buffer.options();
        options.set(self, "buftype", "nofile")?;
        options.set(self, "bufhidden", "hide")?;
        options.set(self, "swapfile", false)?;
        {
            let _editable = self.temp_modifiable(&buffer)?;
            let lines = self.log_lines();
            buffer.set_lines(self, 0..usize::MAX, &lines)?;
        }
        options.set(self, "modifiable", false)?;

        tracing::debug!(buffer = number, "Created log buffer");
        *self.log_display.borrow_mut() = Some(buffer.clone());
        Ok(buffer)
    }

    /// The buffer mirroring the diagnostic log, if any.
    #[must_use]
    pub fn log_buffer(&self) -> Option<Buffer> {
        self.log_display.borrow().clone()
    }

    fn mirror_log(&self, appended: &Appended) -> Result<(), Error> {
        let display = self.log_display.borrow().clone();
        let Some(buffer) = display else {
            return Ok(());
        };
        if !buffer.valid(self) {
            *self.log_display.borrow_mut() = None;
            return Ok(());
        }

        let _editable = self.temp_modifiable(&buffer)?;
        let len = buffer.len(self)?;
        if appended.trimmed > 0 {
            // A message can push out part of itself, so rewrite from the log.
            let lines = self.log_lines();
            return buffer.set_lines(self, 0..len, &lines);
        }
        if appended.lines.is_empty() {
            return Ok(());
        }
        if len == 0 || (len == 1 && buffer.line(self, 0)?.is_empty()) {
            buffer.set_lines(self, 0..len, &appended.lines)
        } else {
            buffer.append(self, &appended.lines)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Object;
    use crate::fake::FakeHost;
    use std::rc::Rc;

    #[test]
    fn test_config_from_json_uses_defaults() {
        let config = SessionConfig::from_json(r#"{"log_maxlen": 20}"#).unwrap();
        assert_eq!(config.log_maxlen, 20);
        assert_eq!(config.args_slot, "g:_vpe_args_");
        assert!(config.redefine_trampolines);

        assert!(matches!(
            SessionConfig::from_json("{not json"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_builder_applies_config() {
        let session = Session::builder(FakeHost::new())
            .with_config(SessionConfig::new().with_args_slot("g:slot"))
            .build();
        assert_eq!(session.config().args_slot, "g:slot");
    }

    #[test]
    fn test_current_objects_are_identity_cached() {
        let session = Session::new(FakeHost::new());
        assert_eq!(session.current_buffer().unwrap(), session.wrap_buffer(1));
        assert_eq!(
            session.current_window().unwrap(),
            session.current_window().unwrap()
        );
        assert_eq!(
            session.current_tabpage().unwrap(),
            session.current_tabpage().unwrap()
        );
    }

    #[test]
    fn test_log_buffer_mirrors_and_trims() {
        let host = Rc::new(FakeHost::new());
        let session = Session::builder(Rc::clone(&host))
            .with_config(SessionConfig::new().with_log_maxlen(3))
            .build();
        session.log_message("before");
        let buffer = session.create_log_buffer().unwrap();
        assert_eq!(buffer.lines(&session).unwrap(), session.log_lines());
        assert_eq!(
            buffer.options().get(&session, "modifiable").unwrap(),
            Object::Bool(false)
        );

        session.log_message("one\ntwo");
        session.log_message("three");
        assert_eq!(session.log_lines().len(), 3);
        assert_eq!(buffer.lines(&session).unwrap(), session.log_lines());
        assert!(buffer.line(&session, 0).unwrap().ends_with(": one"));

        session.clear_log();
        assert!(session.log_lines().is_empty());
        assert_eq!(buffer.lines(&session).unwrap(), vec![String::new()]);
    }
}
