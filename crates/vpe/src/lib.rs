//! # VPE
//!
//! A binding layer between Rust plugin code and an embedded Vim-style
//! editor's scripting interface.
//!
//! The editor only exposes a small set of primitives (call a function,
//! evaluate an expression, run a command, and touch native buffers, windows,
//! tab pages, option and variable tables). This crate builds a typed,
//! identity-preserving API on top of them:
//!
//! - **Callback dispatch** - Rust closures are registered under small integer
//!   identifiers and reached from the editor through three script
//!   trampolines (generic, mapping and user command call shapes)
//! - **Weak targets** - callbacks can hold their targets weakly; once the
//!   target is dropped the registration cleans itself up on the next
//!   invocation
//! - **Proxies** - buffers, windows and tab pages are wrapped in
//!   identity-preserving handles with plugin-local storage; lists,
//!   dictionaries, options and variables get typed accessors
//! - **Key mappings, autocommands, user commands, buffer listeners and
//!   timers**, each routed through the callback registry
//! - **Temporary state** - scoped option and variable changes, and scoped
//!   switches of the active window or buffer, restored on drop
//! - **Deferred work** and a bounded diagnostic **log** that can be
//!   mirrored into an editor buffer
//!
//! Everything the crate knows about the editor goes through the [`Host`]
//! trait. [`FakeHost`] is an in-memory implementation for tests and headless
//! runs.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::rc::Rc;
//! use vpe::{FakeHost, MapOptions, Mode, Object, Session, target};
//!
//! let host = Rc::new(FakeHost::with_lines(&["one", "two"]));
//! let session = Session::new(Rc::clone(&host));
//! session.install()?;
//!
//! let on_f = target(|session, args| {
//!     let info = args.mapping_info();
//!     session.log_message(&format!("pressed {info:?}"));
//!     Ok(Object::None)
//! });
//! session.map(Mode::Normal, "f", &on_f, MapOptions::new())?;
//! host.press(&session, Mode::Normal, "f");
//! ```

#![forbid(unsafe_code)]

mod autocmd;
mod buffer;
mod callback;
mod changes;
mod command;
mod defer;
mod error;
pub mod fake;
mod host;
mod identity;
mod idpool;
mod listener;
mod log;
mod mapping;
mod object;
mod options;
mod proxy;
mod registry;
mod session;
mod tabpage;
mod temp;
mod timer;
mod window;

pub use autocmd::{AutoCmdGroup, AutocmdOptions};
pub use buffer::Buffer;
pub use callback::{
    Args, Callback, CallbackError, CallbackId, CallbackOptions, Cleanup, Target, TargetRef, target,
};
pub use changes::ChangeOp;
pub use command::{CommandInfo, CommandOptions, Completion, Nargs, RangeSpec};
pub use error::{Error, VimError};
pub use fake::FakeHost;
pub use host::{Current, Host, HostError, NativeKind, NativeRef, Scope, Value};
pub use identity::IdentityCache;
pub use idpool::IntIdentifierPool;
pub use listener::{Listener, ListenerOptions};
pub use log::{Appended, Log};
pub use mapping::{MapOptions, MappingInfo, Mode, VisualMode};
pub use object::Object;
pub use options::{Access, ListKind, ListOption, Options, Variables, list_kind};
pub use proxy::{Delegating, DictProxy, ListProxy, LocalStore};
pub use registry::{
    COMMAND_TRAMPOLINE, CallShape, CallbackRegistry, GENERIC_TRAMPOLINE, MAPPING_TRAMPOLINE,
};
pub use session::{Session, SessionBuilder, SessionConfig};
pub use tabpage::TabPage;
pub use temp::{ActiveBuffer, ActiveWindow, StateTarget, TemporaryState};
pub use timer::{Repeat, Timer, TimerOptions};
pub use window::Window;
