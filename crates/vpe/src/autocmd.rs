//! Autocommands that call Rust callbacks.

use std::collections::BTreeMap;

use crate::callback::{CallbackId, CallbackKind, CallbackOptions, TargetRef};
use crate::error::Error;
use crate::host::Value;
use crate::session::Session;

/// Options for [`AutoCmdGroup::add`].
#[derive(Debug)]
pub struct AutocmdOptions {
    /// File or buffer pattern; defaults to the current buffer.
    pub pat: String,
    /// Remove the autocommand after it first fires.
    pub once: bool,
    /// Allow the callback to trigger further autocommands.
    pub nested: bool,
    /// Pass the event name as the `event` keyword argument.
    pub pass_event: bool,
    /// Fixed arguments and lifetime options.
    pub callback: CallbackOptions,
}

impl Default for AutocmdOptions {
    fn default() -> Self {
        Self {
            pat: "<buffer>".to_string(),
            once: false,
            nested: false,
            pass_event: false,
            callback: CallbackOptions::default(),
        }
    }
}

impl AutocmdOptions {
    /// Default options: current buffer, fire repeatedly.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the file or buffer pattern.
    #[must_use]
    pub fn with_pattern(mut self, pat: impl Into<String>) -> Self {
        self.pat = pat.into();
        self
    }

    /// Remove the autocommand after it first fires.
    #[must_use]
    pub const fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Allow nested autocommands.
    #[must_use]
    pub const fn nested(mut self) -> Self {
        self.nested = true;
        self
    }

    /// Pass the event name to the callback.
    #[must_use]
    pub const fn pass_event(mut self) -> Self {
        self.pass_event = true;
        self
    }

    /// Set fixed arguments and lifetime options.
    #[must_use]
    pub fn with_callback(mut self, callback: CallbackOptions) -> Self {
        self.callback = callback;
        self
    }
}

/// An open autocommand group.
///
/// Opening the group issues `augroup <name>`; dropping it issues
/// `augroup END`. Autocommands added while it is open belong to the group.
#[derive(Debug)]
pub struct AutoCmdGroup<'s> {
    session: &'s Session,
    name: String,
}

impl Session {
    /// Open an autocommand group, optionally deleting its existing
    /// autocommands.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the group cannot be opened.
    pub fn autocmd_group(&self, name: &str, clear: bool) -> Result<AutoCmdGroup<'_>, Error> {
        self.host().command(&format!("augroup {name}"))?;
        let group = AutoCmdGroup {
            session: self,
            name: name.to_string(),
        };
        if clear {
            group.delete_all()?;
        }
        Ok(group)
    }
}

impl AutoCmdGroup<'_> {
    /// The group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Delete every autocommand in the group.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the command fails.
    pub fn delete_all(&self) -> Result<(), Error> {
        self.session.host().command("autocmd!")?;
        Ok(())
    }

    /// Add an autocommand for `event` that calls `target`.
    ///
    /// The autocommand is deleted when the callback is removed, or the first
    /// time it fires after a weakly held target has been dropped. Only this
    /// callback's entry is deleted; other autocommands for the same event and
    /// pattern are left alone.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the autocommand cannot be defined.
    pub fn add(
        &self,
        event: &str,
        target: impl Into<TargetRef>,
        options: AutocmdOptions,
    ) -> Result<CallbackId, Error> {
        let AutocmdOptions {
            pat,
            once,
            nested,
            pass_event,
            mut callback,
        } = options;
        callback.once |= once;
        let session = self.session;
        let buffer = if pat == "<buffer>" {
            Some(session.current_buffer()?.number())
        } else {
            None
        };
        let kind = CallbackKind::Autocmd {
            event: event.to_string(),
            pass_event,
        };
        let id = session.register_kind(target.into(), callback, kind, None);

        let mut command = format!("autocmd {} {event} {pat} ", self.name);
        if once {
            command.push_str("++once ");
        }
        if nested {
            command.push_str("++nested ");
        }
        let cmd = format!("call {}", id.as_invocation());
        command.push_str(&cmd);
        if let Err(err) = session.host().command(&command) {
            session.discard(id);
            return Err(err.into());
        }

        let mut entry = BTreeMap::from([
            ("group".to_string(), Value::from(self.name.as_str())),
            ("event".to_string(), Value::from(event)),
            ("cmd".to_string(), Value::from(cmd)),
        ]);
        match buffer {
            Some(number) => entry.insert("bufnr".to_string(), Value::Int(number)),
            None => entry.insert("pattern".to_string(), Value::from(pat)),
        };
        let remove = Value::List(vec![Value::Dict(entry)]);
        session.add_cleanup(id, move |session| {
            if let Err(err) = session.host().call("autocmd_delete", &[remove]) {
                tracing::debug!(uid = id.get(), error = %err, "Autocommand cleanup failed");
            }
        });
        tracing::debug!(uid = id.get(), group = %self.name, event, "Added autocommand");
        Ok(id)
    }

    /// Close the group. Equivalent to dropping it.
    pub fn close(self) {}
}

impl Drop for AutoCmdGroup<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.session.host().command("augroup END") {
            tracing::warn!(group = %self.name, error = %err, "Failed to close autocommand group");
        }
    }
}
