//! Callback records and the types a callback sees.
//!
//! A callback is a Rust closure that the host can reach through one of the
//! trampoline functions. The registry holds the closure either weakly (the
//! default) or strongly:
//!
//! - **Weak**: the registering code keeps the [`Rc<Target>`] alive. When it
//!   drops the last strong reference, the callback is dead; the next host
//!   invocation is silently ignored and the callback's cleanup action removes
//!   the host-side registration.
//! - **Strong**: the registry keeps the closure alive until the callback is
//!   explicitly removed or has fired the requested number of times.
//!
//! # Example
//!
//! ```rust,ignore
//! use vpe::{Object, Session, target};
//!
//! let on_save = target(|session: &Session, _args| {
//!     session.log_message("saved");
//!     Ok(Object::None)
//! });
//! let group = session.autocmd_group("my_plugin", true)?;
//! group.add("BufWritePost", &on_save, Default::default())?;
//! // `on_save` must outlive the autocommand.
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::changes::ChangeOp;
use crate::command::CommandInfo;
use crate::error::Error;
use crate::mapping::{MappingInfo, Mode};
use crate::object::Object;
use crate::session::Session;

/// The signature every callback target has.
pub type Target = dyn Fn(&Session, Args) -> Result<Object, CallbackError>;

/// An action run when a callback is torn down.
pub type Cleanup = Box<dyn FnOnce(&Session)>;

/// Wrap a closure as a callback target.
pub fn target<F>(f: F) -> Rc<Target>
where
    F: Fn(&Session, Args) -> Result<Object, CallbackError> + 'static,
{
    Rc::new(f)
}

/// Errors a callback can report.
///
/// These never cross the host boundary; the dispatcher logs them and returns
/// a failure value to the host instead.
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    /// The host passed arguments the callback cannot use.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The callback execution failed.
    #[error("execution failed: {0}")]
    Failed(String),

    /// The callback panicked.
    #[error("callback panicked: {0}")]
    Panicked(String),

    /// A binding-layer call made by the callback failed.
    #[error(transparent)]
    Binding(Box<Error>),
}

impl From<Error> for CallbackError {
    fn from(err: Error) -> Self {
        Self::Binding(Box::new(err))
    }
}

/// How the registry refers to a callback target.
#[derive(Clone)]
pub enum TargetRef {
    /// Held weakly; the callback dies with its last strong reference.
    Weak(Weak<Target>),
    /// Held strongly by the registry.
    Strong(Rc<Target>),
}

impl TargetRef {
    /// Refer to `target` without keeping it alive.
    #[must_use]
    pub fn weak(target: &Rc<Target>) -> Self {
        Self::Weak(Rc::downgrade(target))
    }

    /// Keep `target` alive for the lifetime of the registration.
    #[must_use]
    pub fn strong(target: Rc<Target>) -> Self {
        Self::Strong(target)
    }

    /// Get the target if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Rc<Target>> {
        match self {
            Self::Weak(weak) => weak.upgrade(),
            Self::Strong(strong) => Some(Rc::clone(strong)),
        }
    }

    /// Whether the target is still alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        match self {
            Self::Weak(weak) => weak.strong_count() > 0,
            Self::Strong(_) => true,
        }
    }
}

impl From<&Rc<Target>> for TargetRef {
    fn from(target: &Rc<Target>) -> Self {
        Self::weak(target)
    }
}

impl From<Rc<Target>> for TargetRef {
    fn from(target: Rc<Target>) -> Self {
        Self::strong(target)
    }
}

impl fmt::Debug for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Weak(weak) => f
                .debug_tuple("Weak")
                .field(&if weak.strong_count() > 0 { "<alive>" } else { "<dead>" })
                .finish(),
            Self::Strong(_) => f.debug_tuple("Strong").field(&"<callable>").finish(),
        }
    }
}

/// Identifier of a registered callback.
///
/// Rendered as text whenever it crosses into the host, because the host's
/// expression layer does not reliably preserve numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(pub(crate) u64);

impl CallbackId {
    /// The numeric identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// A host function reference that calls the generic trampoline with
    /// this identifier bound as its first argument.
    #[must_use]
    pub fn as_funcref(self) -> String {
        format!("function('{}', ['{}'])", crate::registry::GENERIC_TRAMPOLINE, self.0)
    }

    /// A host expression that invokes the generic trampoline.
    #[must_use]
    pub fn as_invocation(self) -> String {
        format!("{}('{}')", crate::registry::GENERIC_TRAMPOLINE, self.0)
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Arguments delivered to a callback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    /// Positional arguments.
    pub positional: Vec<Object>,
    /// Keyword arguments.
    pub keyword: BTreeMap<String, Object>,
}

impl Args {
    /// A positional argument.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Object> {
        self.positional.get(index)
    }

    /// A keyword argument.
    #[must_use]
    pub fn kwarg(&self, name: &str) -> Option<&Object> {
        self.keyword.get(name)
    }

    /// Number of positional arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positional.len()
    }

    /// Whether there are no positional arguments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty()
    }

    /// The mapping info record, when the callback was registered with
    /// `pass_info`.
    #[must_use]
    pub fn mapping_info(&self) -> Option<&MappingInfo> {
        self.positional.iter().find_map(|arg| match arg {
            Object::Mapping(info) => Some(info),
            _ => None,
        })
    }

    /// The command info record, when the callback was registered with
    /// `pass_info`.
    #[must_use]
    pub fn command_info(&self) -> Option<&CommandInfo> {
        self.positional.iter().find_map(|arg| match arg {
            Object::Command(info) => Some(info),
            _ => None,
        })
    }

    /// Decoded buffer change operations, for listeners registered with `ops`.
    #[must_use]
    pub fn changes(&self) -> Option<&[ChangeOp]> {
        self.positional.iter().find_map(|arg| match arg {
            Object::Changes(ops) => Some(ops.as_slice()),
            _ => None,
        })
    }
}

/// What kind of host registration a callback belongs to. This decides how
/// the host's arguments are unmarshalled.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CallbackKind {
    /// Host arguments are passed through as positional arguments.
    Plain,
    /// An autocommand handler.
    Autocmd { event: String, pass_event: bool },
    /// A key mapping.
    Mapping {
        mode: Mode,
        keys: String,
        buffer: Option<i64>,
        pass_info: bool,
    },
    /// A user command.
    Command { name: String, pass_info: bool },
    /// A buffer change listener.
    Listener {
        buffer: i64,
        ops: bool,
        raw_changes: bool,
    },
    /// A timer.
    Timer { pass_timer: bool },
}

/// Options shared by every kind of registration.
#[derive(Default)]
pub struct CallbackOptions {
    /// Fixed positional arguments, passed before any host arguments.
    pub args: Vec<Object>,
    /// Fixed keyword arguments.
    pub kwargs: BTreeMap<String, Object>,
    /// Remove the callback after it first fires, even if that call fails.
    pub once: bool,
    /// Action to run when the callback is torn down.
    pub cleanup: Option<Cleanup>,
}

impl fmt::Debug for CallbackOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackOptions")
            .field("args", &self.args)
            .field("kwargs", &self.kwargs)
            .field("once", &self.once)
            .field("has_cleanup", &self.cleanup.is_some())
            .finish()
    }
}

impl CallbackOptions {
    /// Create default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fixed positional argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<Object>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add a fixed keyword argument.
    #[must_use]
    pub fn with_kwarg(mut self, name: impl Into<String>, value: impl Into<Object>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Remove the callback after it first fires, even if that call fails.
    #[must_use]
    pub const fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Run `cleanup` when the callback is torn down.
    #[must_use]
    pub fn with_cleanup(mut self, cleanup: impl FnOnce(&Session) + 'static) -> Self {
        self.cleanup = Some(Box::new(cleanup));
        self
    }
}

/// A registered callback.
pub struct Callback {
    pub(crate) uid: u64,
    pub(crate) target: TargetRef,
    pub(crate) args: Vec<Object>,
    pub(crate) kwargs: BTreeMap<String, Object>,
    pub(crate) cleanup: Option<Cleanup>,
    /// Remaining firings before automatic removal; `None` means unlimited.
    pub(crate) fires_left: Option<u32>,
    pub(crate) kind: CallbackKind,
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("uid", &self.uid)
            .field("target", &self.target)
            .field("args", &self.args)
            .field("kwargs", &self.kwargs)
            .field("has_cleanup", &self.cleanup.is_some())
            .field("fires_left", &self.fires_left)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Callback {
    pub(crate) fn new(
        uid: u64,
        target: TargetRef,
        options: CallbackOptions,
        kind: CallbackKind,
    ) -> Self {
        Self {
            uid,
            target,
            args: options.args,
            kwargs: options.kwargs,
            cleanup: options.cleanup,
            fires_left: options.once.then_some(1),
            kind,
        }
    }

    /// Limit the number of firings before automatic removal.
    pub(crate) const fn with_fires(mut self, fires: Option<u32>) -> Self {
        self.fires_left = fires;
        self
    }

    /// The callback's identifier.
    #[must_use]
    pub const fn id(&self) -> CallbackId {
        CallbackId(self.uid)
    }

    /// Whether the callback's target is still alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.target.is_alive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_weak_target_dies_with_last_reference() {
        let t = target(|_, _| Ok(Object::None));
        let weak = TargetRef::weak(&t);
        assert!(weak.is_alive());
        assert!(weak.upgrade().is_some());
        drop(t);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_strong_target_survives() {
        let strong = TargetRef::strong(target(|_, _| Ok(Object::Int(1))));
        assert!(strong.is_alive());
        assert!(strong.upgrade().is_some());
    }

    #[test]
    fn test_once_sets_single_firing() {
        let t = target(|_, _| Ok(Object::None));
        let cb = Callback::new(
            3,
            TargetRef::weak(&t),
            CallbackOptions::new().once(),
            CallbackKind::Plain,
        );
        assert_eq!(cb.fires_left, Some(1));
        assert_eq!(cb.id(), CallbackId(3));
    }

    #[test]
    fn test_callback_id_renders_as_text() {
        assert_eq!(CallbackId(7).as_funcref(), "function('VPE_Call', ['7'])");
        assert_eq!(CallbackId(7).as_invocation(), "VPE_Call('7')");
    }

    #[test]
    fn test_args_accessors() {
        let args = Args {
            positional: vec![Object::Int(1), Object::from("x")],
            keyword: BTreeMap::from([("event".to_string(), Object::from("BufEnter"))]),
        };
        assert_eq!(args.len(), 2);
        assert_eq!(args.get(1).and_then(Object::as_text), Some("x"));
        assert_eq!(args.kwarg("event").and_then(Object::as_text), Some("BufEnter"));
        assert!(args.mapping_info().is_none());
    }
}
