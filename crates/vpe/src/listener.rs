//! Buffer change listeners.
//!
//! A listener is told about changes to one buffer. The host batches changes
//! and delivers them as `(bufnr, start, end, added, changes)`, where `start`
//! and `end` are 1-based and `changes` is a list of hunks. The callback
//! receives the [`Buffer`], 0-based `start` and `end`, `added`, then
//! optionally the decoded [`ChangeOp`]s and the raw hunk list, then any
//! fixed arguments.

use crate::buffer::Buffer;
use crate::callback::{CallbackId, CallbackKind, CallbackOptions, TargetRef};
use crate::changes::ChangeOp;
use crate::error::Error;
use crate::host::Value;
use crate::object::Object;
use crate::session::Session;

/// Options for [`Buffer::add_listener`].
#[derive(Debug)]
pub struct ListenerOptions {
    /// Pass the decoded change operations.
    pub ops: bool,
    /// Pass the host's raw hunk list.
    pub raw_changes: bool,
    /// Fixed arguments and lifetime options.
    pub callback: CallbackOptions,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            ops: true,
            raw_changes: false,
            callback: CallbackOptions::default(),
        }
    }
}

impl ListenerOptions {
    /// Default options: decoded operations only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether decoded operations are passed.
    #[must_use]
    pub const fn with_ops(mut self, ops: bool) -> Self {
        self.ops = ops;
        self
    }

    /// Set whether the raw hunk list is passed.
    #[must_use]
    pub const fn with_raw_changes(mut self, raw: bool) -> Self {
        self.raw_changes = raw;
        self
    }

    /// Set fixed arguments and lifetime options.
    #[must_use]
    pub fn with_callback(mut self, callback: CallbackOptions) -> Self {
        self.callback = callback;
        self
    }
}

/// A registered buffer listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Listener {
    id: CallbackId,
    listener_id: i64,
    buffer: i64,
}

impl Listener {
    /// The callback behind this listener.
    #[must_use]
    pub const fn id(&self) -> CallbackId {
        self.id
    }

    /// The host's listener identifier.
    #[must_use]
    pub const fn listener_id(&self) -> i64 {
        self.listener_id
    }

    /// The number of the buffer listened to.
    #[must_use]
    pub const fn buffer(&self) -> i64 {
        self.buffer
    }

    /// Stop listening. Returns whether the listener was still active.
    pub fn stop(&self, session: &Session) -> bool {
        session.remove(self.id)
    }
}

impl Buffer {
    /// Call `target` whenever this buffer changes.
    ///
    /// Pending changes are flushed first so the listener only sees changes
    /// made after it is added.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the listener cannot be added.
    pub fn add_listener(
        &self,
        session: &Session,
        target: impl Into<TargetRef>,
        options: ListenerOptions,
    ) -> Result<Listener, Error> {
        let number = self.number();
        session
            .host()
            .call("listener_flush", &[Value::Int(number)])?;

        let kind = CallbackKind::Listener {
            buffer: number,
            ops: options.ops,
            raw_changes: options.raw_changes,
        };
        let id = session.register_kind(target.into(), options.callback, kind, None);
        let added = session
            .host()
            .eval(&format!("listener_add({}, {number})", id.as_funcref()));
        let listener_id = match added.map(|v| v.as_int()) {
            Ok(Some(lid)) if lid > 0 => lid,
            Ok(other) => {
                session.discard(id);
                return Err(Error::unexpected(
                    "listener id",
                    other.map_or(Value::Nil, Value::Int),
                ));
            }
            Err(err) => {
                session.discard(id);
                return Err(err.into());
            }
        };

        session.add_cleanup(id, move |session| {
            if let Err(err) = session
                .host()
                .call("listener_remove", &[Value::Int(listener_id)])
            {
                tracing::debug!(listener_id, error = %err, "Listener cleanup failed");
            }
        });
        tracing::debug!(uid = id.get(), listener_id, buffer = number, "Added buffer listener");
        Ok(Listener {
            id,
            listener_id,
            buffer: number,
        })
    }
}

/// Arguments for a listener callback.
pub(crate) fn unmarshal(
    session: &Session,
    buffer: i64,
    ops: bool,
    raw_changes: bool,
    fixed: Vec<Object>,
    host_args: Vec<Value>,
) -> Result<Vec<Object>, Error> {
    let [_, start, end, added, changes, ..] = host_args.as_slice() else {
        return Err(Error::unexpected("listener arguments", Value::List(host_args)));
    };
    let line = |v: &Value, what| {
        v.as_int()
            .ok_or_else(|| Error::unexpected(what, v.clone()))
    };
    let start = line(start, "listener start")?;
    let end = line(end, "listener end")?;
    let added = line(added, "listener added")?;

    let mut positional = vec![
        Object::Buffer(session.wrap_buffer(buffer)),
        Object::Int(start - 1),
        Object::Int(end - 1),
        Object::Int(added),
    ];
    if ops {
        positional.push(Object::Changes(ChangeOp::decode_all(changes)?));
    }
    if raw_changes {
        positional.push(session.wrap_or_decode(changes.clone())?);
    }
    positional.extend(fixed);
    Ok(positional)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::callback::target;
    use crate::fake::FakeHost;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_listener_receives_decoded_changes() {
        let host = Rc::new(FakeHost::with_lines(&["a", "b", "c"]));
        let session = Session::new(Rc::clone(&host));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let t = target(move |_, args| {
            sink.borrow_mut().push(args);
            Ok(Object::None)
        });
        let buffer = session.current_buffer().unwrap();
        let listener = buffer
            .add_listener(&session, &t, ListenerOptions::new().with_raw_changes(true))
            .unwrap();
        assert_eq!(listener.buffer(), buffer.number());

        host.fire_listener(
            &session,
            listener.listener_id(),
            2,
            3,
            0,
            Value::from(json!([{"lnum": 2, "end": 3, "added": 0, "col": 1}])),
        );

        let seen = seen.borrow();
        let args = &seen[0];
        assert_eq!(args.get(0), Some(&Object::Buffer(buffer.clone())));
        assert_eq!(args.get(1), Some(&Object::Int(1)));
        assert_eq!(args.get(2), Some(&Object::Int(2)));
        assert_eq!(args.get(3), Some(&Object::Int(0)));
        assert_eq!(
            args.changes(),
            Some(
                &[ChangeOp::Modify {
                    start: 1,
                    end: 2,
                    count: 0,
                    col: 0
                }][..]
            )
        );
        assert!(matches!(args.get(5), Some(Object::List(hunks)) if hunks.len() == 1));
    }

    #[test]
    fn test_stop_removes_host_listener() {
        let host = Rc::new(FakeHost::with_lines(&["a"]));
        let session = Session::new(Rc::clone(&host));
        let t = target(|_, _| Ok(Object::None));
        let listener = session
            .current_buffer()
            .unwrap()
            .add_listener(&session, &t, ListenerOptions::new())
            .unwrap();
        assert!(host.has_listener(listener.listener_id()));
        assert!(listener.stop(&session));
        assert!(!host.has_listener(listener.listener_id()));
        assert!(!listener.stop(&session));
    }

    #[test]
    fn test_dead_listener_removed_on_next_change() {
        let host = Rc::new(FakeHost::with_lines(&["a"]));
        let session = Session::new(Rc::clone(&host));
        let t = target(|_, _| Ok(Object::None));
        let listener = session
            .current_buffer()
            .unwrap()
            .add_listener(&session, &t, ListenerOptions::new())
            .unwrap();
        drop(t);
        host.fire_listener(&session, listener.listener_id(), 1, 2, 1, Value::List(vec![]));
        assert!(!host.has_listener(listener.listener_id()));
        assert!(!session.is_registered(listener.id()));
    }

    #[test]
    fn test_pending_changes_flushed_before_adding() {
        let host = Rc::new(FakeHost::with_lines(&["a"]));
        let session = Session::new(Rc::clone(&host));
        let t = target(|_, _| Ok(Object::None));
        session
            .current_buffer()
            .unwrap()
            .add_listener(&session, &t, ListenerOptions::new())
            .unwrap();
        let calls = host.calls();
        let flush = calls.iter().position(|c| c == "listener_flush").unwrap();
        let add = calls
            .iter()
            .position(|c| c.starts_with("listener_add("))
            .unwrap();
        assert!(flush < add);
    }
}
