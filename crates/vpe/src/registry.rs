//! The callback registry and the dispatch protocol.
//!
//! The host reaches Rust callbacks through three trampoline functions, one
//! per call shape, defined in the host's own script language by
//! [`Session::install`]. Each trampoline stores the callback identifier and
//! its arguments in a global variable slot and then calls the host-provided
//! dispatch function, which re-enters the crate through
//! [`Session::invoke`]. Identifiers always cross the boundary as text.
//!
//! Dispatch never lets a failure escape to the host. A missing or dead
//! callback yields the shape's neutral value; a failing or panicking
//! callback is logged and yields the shape's failure value.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use crate::callback::{
    Args, Callback, CallbackError, CallbackId, CallbackKind, CallbackOptions, Cleanup, Target,
    TargetRef,
};
use crate::error::Error;
use crate::host::Value;
use crate::idpool::IntIdentifierPool;
use crate::object::Object;
use crate::session::{Session, SessionConfig};

/// Trampoline used by autocommands, timers, listeners and plain callbacks.
pub const GENERIC_TRAMPOLINE: &str = "VPE_Call";

/// Trampoline used by key mappings.
pub const MAPPING_TRAMPOLINE: &str = "VPE_MappingCall";

/// Trampoline used by user commands.
pub const COMMAND_TRAMPOLINE: &str = "VPE_CmdCall";

/// The host calling convention a trampoline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallShape {
    /// Positional host arguments, any return value.
    Generic,
    /// No host arguments; the return value is inserted text for insert and
    /// command-line mode mappings.
    Mapping,
    /// The user command fields followed by the parsed command arguments.
    Command,
}

impl CallShape {
    /// Every call shape.
    pub const ALL: [Self; 3] = [Self::Generic, Self::Mapping, Self::Command];

    /// The name passed to the dispatch function.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Mapping => "mapping",
            Self::Command => "command",
        }
    }

    /// Parse a shape name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|shape| shape.name() == name)
    }

    /// The trampoline function for this shape.
    #[must_use]
    pub const fn trampoline(self) -> &'static str {
        match self {
            Self::Generic => GENERIC_TRAMPOLINE,
            Self::Mapping => MAPPING_TRAMPOLINE,
            Self::Command => COMMAND_TRAMPOLINE,
        }
    }

    /// The value returned for a missing or dead callback.
    #[must_use]
    pub fn neutral(self) -> Value {
        match self {
            Self::Generic | Self::Command => Value::Int(0),
            Self::Mapping => Value::Str(String::new()),
        }
    }

    /// The value returned when a callback fails.
    #[must_use]
    pub fn failure(self) -> Value {
        match self {
            Self::Generic | Self::Command => Value::Int(-1),
            Self::Mapping => Value::Str(String::new()),
        }
    }

    /// The host script defining this shape's trampoline.
    fn definition(self, config: &SessionConfig) -> String {
        let (params, args) = match self {
            Self::Generic => ("uid, ...", "a:000".to_string()),
            Self::Mapping => ("uid", "[]".to_string()),
            Self::Command => (
                "uid, line1, line2, range, count, bang, mods, reg, ...",
                "[a:line1, a:line2, a:range, a:count, a:bang, a:mods, a:reg, a:000]".to_string(),
            ),
        };
        format!(
            "function! {name}({params})\n\
             \x20   let {slot} = {{'uid': a:uid, 'args': {args}}}\n\
             \x20   return {dispatch}('{shape}')\n\
             endfunction",
            name = self.trampoline(),
            slot = config.args_slot,
            dispatch = config.dispatch_function,
            shape = self.name(),
        )
    }
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the registry knows about an identifier at invocation time.
pub(crate) enum Resolution {
    /// Never registered, or already removed.
    Missing,
    /// The weakly held target has been dropped. The entry has been removed
    /// and its cleanup action is handed back to be run.
    Dead(Option<Cleanup>),
    /// The target is alive.
    Live(Invocation),
}

/// Everything needed to run a live callback once the registry is no longer
/// borrowed.
pub(crate) struct Invocation {
    pub(crate) target: Rc<Target>,
    pub(crate) args: Vec<Object>,
    pub(crate) kwargs: BTreeMap<String, Object>,
    pub(crate) kind: CallbackKind,
    /// The cleanup action, when this was the final permitted firing.
    pub(crate) retired: Option<Option<Cleanup>>,
}

/// The map from identifiers to registered callbacks.
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    callbacks: HashMap<u64, Callback>,
    ids: IntIdentifierPool,
}

impl CallbackRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered callbacks, live or dead.
    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Whether no callbacks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: CallbackId) -> bool {
        self.callbacks.contains_key(&id.0)
    }

    /// The registered identifiers, in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<CallbackId> {
        let mut ids: Vec<CallbackId> = self.callbacks.keys().map(|uid| CallbackId(*uid)).collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn allocate(&mut self) -> u64 {
        self.ids.alloc()
    }

    pub(crate) fn insert(&mut self, callback: Callback) {
        self.callbacks.insert(callback.uid, callback);
    }

    /// Remove a callback and free its identifier.
    pub(crate) fn remove(&mut self, uid: u64) -> Option<Callback> {
        let callback = self.callbacks.remove(&uid)?;
        self.ids.free(uid);
        Some(callback)
    }

    /// Add a cleanup action, run after any existing one.
    pub(crate) fn add_cleanup(&mut self, uid: u64, then: Cleanup) -> bool {
        let Some(callback) = self.callbacks.get_mut(&uid) else {
            return false;
        };
        let chained: Cleanup = match callback.cleanup.take() {
            Some(first) => Box::new(move |session: &Session| {
                first(session);
                then(session);
            }),
            None => then,
        };
        callback.cleanup = Some(chained);
        true
    }

    /// Identifiers of callbacks whose kind matches `predicate`.
    pub(crate) fn find(&self, predicate: impl Fn(&CallbackKind) -> bool) -> Vec<u64> {
        self.callbacks
            .values()
            .filter(|callback| predicate(&callback.kind))
            .map(|callback| callback.uid)
            .collect()
    }

    /// Look up a callback for invocation, updating its firing count.
    pub(crate) fn resolve(&mut self, uid: u64) -> Resolution {
        let Some(callback) = self.callbacks.get_mut(&uid) else {
            return Resolution::Missing;
        };
        let Some(target) = callback.target.upgrade() else {
            let cleanup = self.remove(uid).and_then(|mut callback| callback.cleanup.take());
            return Resolution::Dead(cleanup);
        };
        let final_firing = match callback.fires_left.as_mut() {
            Some(n) if *n <= 1 => true,
            Some(n) => {
                *n -= 1;
                false
            }
            None => false,
        };
        let mut invocation = Invocation {
            target,
            args: callback.args.clone(),
            kwargs: callback.kwargs.clone(),
            kind: callback.kind.clone(),
            retired: None,
        };
        if final_firing {
            invocation.retired =
                Some(self.remove(uid).and_then(|mut callback| callback.cleanup.take()));
        }
        Resolution::Live(invocation)
    }
}

impl Session {
    /// Define the trampoline functions in the host.
    ///
    /// Unless [`SessionConfig::redefine_trampolines`] is set, trampolines
    /// that already exist are left alone.
    ///
    /// # Errors
    ///
    /// Returns the host's error if a definition is rejected.
    pub fn install(&self) -> Result<(), Error> {
        for shape in CallShape::ALL {
            if !self.config().redefine_trampolines {
                let exists = self
                    .host()
                    .eval(&format!("exists('*{}')", shape.trampoline()))?;
                if exists.is_truthy() {
                    continue;
                }
            }
            self.host().command(&shape.definition(self.config()))?;
            tracing::debug!(shape = %shape, trampoline = shape.trampoline(), "Installed trampoline");
        }
        Ok(())
    }

    /// Register a plain callback.
    ///
    /// Passing `&Rc<Target>` registers it weakly; passing the `Rc<Target>`
    /// itself hands ownership to the registry. The host can reach the
    /// callback through [`CallbackId::as_funcref`] or
    /// [`CallbackId::as_invocation`].
    pub fn register(&self, target: impl Into<TargetRef>, options: CallbackOptions) -> CallbackId {
        self.register_kind(target.into(), options, CallbackKind::Plain, None)
    }

    /// Register a callback of a given kind. `fires` overrides the firing
    /// limit implied by `options.once`.
    pub(crate) fn register_kind(
        &self,
        target: TargetRef,
        options: CallbackOptions,
        kind: CallbackKind,
        fires: Option<Option<u32>>,
    ) -> CallbackId {
        let mut registry = self.registry.borrow_mut();
        let uid = registry.allocate();
        let mut callback = Callback::new(uid, target, options, kind);
        if let Some(fires) = fires {
            callback = callback.with_fires(fires);
        }
        tracing::debug!(uid, kind = ?callback.kind, "Registered callback");
        registry.insert(callback);
        CallbackId(uid)
    }

    /// Add a cleanup action to a registered callback, run after any existing
    /// one.
    pub(crate) fn add_cleanup(&self, id: CallbackId, cleanup: impl FnOnce(&Session) + 'static) {
        self.registry
            .borrow_mut()
            .add_cleanup(id.0, Box::new(cleanup));
    }

    /// Remove a callback and run its cleanup action. Returns whether it was
    /// registered.
    pub fn remove(&self, id: CallbackId) -> bool {
        let removed = self.registry.borrow_mut().remove(id.0);
        match removed {
            Some(mut callback) => {
                tracing::debug!(uid = id.0, "Removed callback");
                if let Some(cleanup) = callback.cleanup.take() {
                    cleanup(self);
                }
                true
            }
            None => false,
        }
    }

    /// Remove a callback without running its cleanup action.
    pub(crate) fn discard(&self, id: CallbackId) {
        self.registry.borrow_mut().remove(id.0);
    }

    /// Whether `id` is still registered.
    #[must_use]
    pub fn is_registered(&self, id: CallbackId) -> bool {
        self.registry.borrow().contains(id)
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.registry.borrow().len()
    }

    /// Identifiers of every registered callback, in ascending order.
    #[must_use]
    pub fn callback_ids(&self) -> Vec<CallbackId> {
        self.registry.borrow().ids()
    }

    /// The re-entry point called by the host's dispatch function.
    ///
    /// Reads `{uid, args}` from the argument slot and dispatches.
    pub fn invoke(&self, shape: CallShape) -> Value {
        let slot = match self.host().eval(&self.config().args_slot) {
            Ok(slot) => slot,
            Err(err) => {
                self.report_failure("?", &Error::from(err));
                return shape.failure();
            }
        };
        let uid = slot.get("uid").and_then(Value::to_text).unwrap_or_default();
        let args = slot
            .get("args")
            .cloned()
            .and_then(Value::into_list)
            .unwrap_or_default();
        self.dispatch(shape, &uid, args)
    }

    /// Dispatch a host invocation to the callback registered as `uid`.
    pub fn dispatch(&self, shape: CallShape, uid: &str, host_args: Vec<Value>) -> Value {
        let Ok(number) = uid.trim().parse::<u64>() else {
            tracing::debug!(uid, shape = %shape, "Ignoring invocation with malformed uid");
            return shape.neutral();
        };
        let resolution = self.registry.borrow_mut().resolve(number);
        let invocation = match resolution {
            Resolution::Missing => {
                tracing::debug!(uid = number, shape = %shape, "No callback for invocation");
                return shape.neutral();
            }
            Resolution::Dead(cleanup) => {
                tracing::debug!(uid = number, shape = %shape, "Callback target is gone");
                if let Some(cleanup) = cleanup {
                    cleanup(self);
                }
                return shape.neutral();
            }
            Resolution::Live(invocation) => invocation,
        };

        tracing::debug!(uid = number, shape = %shape, "Dispatching callback");
        let Invocation {
            target,
            args,
            kwargs,
            kind,
            retired,
        } = invocation;
        let result = self
            .unmarshal(&kind, args, kwargs, host_args)
            .map_err(CallbackError::from)
            .and_then(|args| {
                catch_unwind(AssertUnwindSafe(|| target(self, args)))
                    .unwrap_or_else(|payload| Err(CallbackError::Panicked(panic_message(&*payload))))
            });
        if let Some(cleanup) = retired.flatten() {
            cleanup(self);
        }

        match result {
            Ok(object) => marshal(shape, object),
            Err(err) => {
                self.report_failure(uid, &Error::Callback(err));
                shape.failure()
            }
        }
    }

    /// Build the callback's arguments from its fixed arguments and the host
    /// arguments, according to its kind.
    fn unmarshal(
        &self,
        kind: &CallbackKind,
        fixed: Vec<Object>,
        mut kwargs: BTreeMap<String, Object>,
        host_args: Vec<Value>,
    ) -> Result<Args, Error> {
        let positional = match kind {
            CallbackKind::Plain => self.append_wrapped(fixed, host_args)?,
            CallbackKind::Autocmd { event, pass_event } => {
                if *pass_event {
                    kwargs.insert("event".to_string(), Object::from(event.as_str()));
                }
                self.append_wrapped(fixed, host_args)?
            }
            CallbackKind::Mapping {
                mode,
                keys,
                pass_info,
                ..
            } => crate::mapping::unmarshal(self, *mode, keys, *pass_info, fixed)?,
            CallbackKind::Command { pass_info, .. } => {
                crate::command::unmarshal(*pass_info, fixed, host_args)?
            }
            CallbackKind::Listener {
                buffer,
                ops,
                raw_changes,
            } => crate::listener::unmarshal(self, *buffer, *ops, *raw_changes, fixed, host_args)?,
            CallbackKind::Timer { pass_timer } => {
                let mut positional = Vec::with_capacity(fixed.len() + 1);
                if *pass_timer {
                    positional.push(Object::Int(
                        host_args.first().and_then(Value::as_int).unwrap_or(-1),
                    ));
                }
                positional.extend(fixed);
                positional
            }
        };
        Ok(Args {
            positional,
            keyword: kwargs,
        })
    }

    fn append_wrapped(
        &self,
        mut positional: Vec<Object>,
        host_args: Vec<Value>,
    ) -> Result<Vec<Object>, Error> {
        for value in host_args {
            positional.push(self.wrap_or_decode(value)?);
        }
        Ok(positional)
    }

    /// Log a dispatch failure to `tracing` and the diagnostic log.
    fn report_failure(&self, uid: &str, err: &Error) {
        tracing::error!(uid, error = %err, detail = ?err, "Callback failed");
        self.log_message(&format!("VPE: callback {uid} failed: {err}\n{err:?}"));
    }
}

/// Convert a callback's result into the value the host expects.
fn marshal(shape: CallShape, result: Object) -> Value {
    match (shape, result) {
        (_, Object::None) | (CallShape::Command, _) => shape.neutral(),
        (CallShape::Mapping, Object::Text(text)) => Value::Str(text),
        (CallShape::Mapping, _) => shape.neutral(),
        (CallShape::Generic, result) => result.to_host(),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-text panic payload".to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::callback::target;
    use crate::fake::FakeHost;
    use std::cell::Cell;

    #[test]
    fn test_shape_values() {
        assert_eq!(CallShape::Generic.neutral(), Value::Int(0));
        assert_eq!(CallShape::Generic.failure(), Value::Int(-1));
        assert_eq!(CallShape::Mapping.neutral(), Value::from(""));
        assert_eq!(CallShape::from_name("command"), Some(CallShape::Command));
        assert_eq!(CallShape::from_name("bogus"), None);
    }

    #[test]
    fn test_trampoline_definition() {
        let script = CallShape::Generic.definition(&SessionConfig::default());
        assert!(script.starts_with("function! VPE_Call(uid, ...)\n"));
        assert!(script.contains("let g:_vpe_args_ = {'uid': a:uid, 'args': a:000}"));
        assert!(script.contains("return VPE_Dispatch('generic')"));
        assert!(script.ends_with("endfunction"));
    }

    #[test]
    fn test_install_defines_every_trampoline() {
        let host = Rc::new(FakeHost::new());
        let session = Session::new(Rc::clone(&host));
        session.install().unwrap();
        let commands = host.commands();
        for shape in CallShape::ALL {
            let prefix = format!("function! {}(", shape.trampoline());
            assert!(commands.iter().any(|c| c.starts_with(&prefix)));
        }
    }

    #[test]
    fn test_dispatch_passes_fixed_then_host_args() {
        let session = Session::new(FakeHost::new());
        let seen = Rc::new(Cell::new(0_i64));
        let sink = Rc::clone(&seen);
        let t = target(move |_, args| {
            let a = args.get(0).and_then(Object::as_int).unwrap_or(0);
            let b = args.get(1).and_then(Object::as_int).unwrap_or(0);
            sink.set(a * 10 + b);
            Ok(Object::Int(a + b))
        });
        let id = session.register(&t, CallbackOptions::new().with_arg(4_i64));

        let result = session.dispatch(CallShape::Generic, &id.to_string(), vec![Value::Int(2)]);
        assert_eq!(result, Value::Int(6));
        assert_eq!(seen.get(), 42);
    }

    #[test]
    fn test_failure_is_logged_not_raised() {
        let session = Session::new(FakeHost::new());
        let t = target(|_, _| Err(CallbackError::Failed("boom".to_string())));
        let id = session.register(&t, CallbackOptions::new());
        let result = session.dispatch(CallShape::Generic, &id.to_string(), vec![]);
        assert_eq!(result, Value::Int(-1));
        assert!(session.log_lines().iter().any(|l| l.contains("boom")));
        assert!(session.is_registered(id));
    }

    #[test]
    fn test_panic_is_contained() {
        let session = Session::new(FakeHost::new());
        let t = target(|_, _| panic!("kaboom"));
        let id = session.register(&t, CallbackOptions::new());
        let result = session.dispatch(CallShape::Mapping, &id.to_string(), vec![]);
        assert_eq!(result, Value::from(""));
        assert!(session.log_lines().iter().any(|l| l.contains("kaboom")));
    }

    #[test]
    fn test_once_removes_after_first_firing() {
        let session = Session::new(FakeHost::new());
        let cleaned = Rc::new(Cell::new(0));
        let counter = Rc::clone(&cleaned);
        let t = target(|_, _| Ok(Object::None));
        let id = session.register(
            &t,
            CallbackOptions::new()
                .once()
                .with_cleanup(move |_| counter.set(counter.get() + 1)),
        );
        session.dispatch(CallShape::Generic, &id.to_string(), vec![]);
        assert!(!session.is_registered(id));
        assert_eq!(cleaned.get(), 1);
        assert_eq!(
            session.dispatch(CallShape::Generic, &id.to_string(), vec![]),
            Value::Int(0)
        );
        assert_eq!(cleaned.get(), 1);
    }

    #[test]
    fn test_once_retires_after_failed_firing() {
        let session = Session::new(FakeHost::new());
        let cleaned = Rc::new(Cell::new(0));
        let counter = Rc::clone(&cleaned);
        let t = target(|_, _| Err(CallbackError::Failed("refused".to_string())));
        let id = session.register(
            &t,
            CallbackOptions::new()
                .once()
                .with_cleanup(move |_| counter.set(counter.get() + 1)),
        );
        assert_eq!(
            session.dispatch(CallShape::Generic, &id.to_string(), vec![]),
            Value::Int(-1)
        );
        assert!(!session.is_registered(id));
        assert_eq!(cleaned.get(), 1);
        assert!(session.log_lines().iter().any(|l| l.contains("refused")));
    }

    #[test]
    fn test_removed_id_is_reused() {
        let session = Session::new(FakeHost::new());
        let t = target(|_, _| Ok(Object::None));
        let first = session.register(&t, CallbackOptions::new());
        let second = session.register(&t, CallbackOptions::new());
        assert!(session.remove(first));
        assert!(!session.remove(first));
        let third = session.register(&t, CallbackOptions::new());
        assert_eq!(third, first);
        assert_ne!(third, second);
    }

    #[test]
    fn test_malformed_uid_is_neutral() {
        let session = Session::new(FakeHost::new());
        assert_eq!(
            session.dispatch(CallShape::Command, "not-a-number", vec![]),
            Value::Int(0)
        );
    }
}
