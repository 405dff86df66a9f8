//! User commands that call Rust callbacks.

use std::collections::BTreeMap;

use crate::callback::{CallbackId, CallbackKind, CallbackOptions, TargetRef};
use crate::error::Error;
use crate::host::Value;
use crate::object::Object;
use crate::registry::{COMMAND_TRAMPOLINE, GENERIC_TRAMPOLINE};
use crate::session::Session;

/// What a user command callback is told about its invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandInfo {
    /// First line of the range.
    pub line1: i64,
    /// Last line of the range.
    pub line2: i64,
    /// Number of items in the range given (0, 1 or 2).
    pub range: i64,
    /// The count given, or the default.
    pub count: i64,
    /// Whether the command was invoked with `!`.
    pub bang: bool,
    /// Command modifiers such as `vertical`.
    pub mods: String,
    /// The register name given, if any.
    pub reg: String,
}

impl CommandInfo {
    /// Decode the seven leading fields the command trampoline passes.
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than seven fields are present.
    pub fn from_host(fields: &[Value]) -> Result<Self, Error> {
        let [line1, line2, range, count, bang, mods, reg, ..] = fields else {
            return Err(Error::unexpected(
                "command fields",
                Value::List(fields.to_vec()),
            ));
        };
        let int = |v: &Value| v.as_int().unwrap_or(0);
        let text = |v: &Value| v.to_text().unwrap_or_default();
        Ok(Self {
            line1: int(line1),
            line2: int(line2),
            range: int(range),
            count: int(count),
            bang: text(bang) == "!",
            mods: text(mods),
            reg: text(reg),
        })
    }

    /// Marshal as a host dictionary.
    #[must_use]
    pub fn to_host(&self) -> Value {
        Value::Dict(BTreeMap::from([
            ("line1".to_string(), Value::Int(self.line1)),
            ("line2".to_string(), Value::Int(self.line2)),
            ("range".to_string(), Value::Int(self.range)),
            ("count".to_string(), Value::Int(self.count)),
            ("bang".to_string(), Value::Bool(self.bang)),
            ("mods".to_string(), Value::from(self.mods.as_str())),
            ("reg".to_string(), Value::from(self.reg.as_str())),
        ]))
    }
}

/// How many arguments a command takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Nargs {
    /// No arguments.
    #[default]
    Zero,
    /// Exactly one argument.
    One,
    /// Any number of arguments.
    Any,
    /// Zero or one argument.
    Optional,
    /// One or more arguments.
    AtLeastOne,
}

impl Nargs {
    const fn as_attr(self) -> &'static str {
        match self {
            Self::Zero => "0",
            Self::One => "1",
            Self::Any => "*",
            Self::Optional => "?",
            Self::AtLeastOne => "+",
        }
    }
}

/// The range a command accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeSpec {
    /// A range, defaulting to the current line.
    Current,
    /// A range, defaulting to the whole file.
    All,
    /// A count in the line number position, defaulting to `n`.
    Count(u32),
}

/// How command arguments are completed.
#[derive(Debug, Clone)]
pub enum Completion {
    /// One of the host's built-in completion kinds, such as `file`.
    Builtin(String),
    /// A callback given `(arglead, cmdline, cursorpos)` that returns a list
    /// of candidate strings.
    Custom(TargetRef),
}

/// Options for [`Session::define_command`].
#[derive(Debug)]
pub struct CommandOptions {
    /// Number of arguments.
    pub nargs: Nargs,
    /// Accepted range.
    pub range: Option<RangeSpec>,
    /// Accept a count, with this default.
    pub count: Option<u32>,
    /// Accept `!`.
    pub bang: bool,
    /// Allow `|` to follow the command.
    pub bar: bool,
    /// Accept a register name as the first argument.
    pub register: bool,
    /// Make the command local to the current buffer.
    pub buffer: bool,
    /// Replace an existing command of the same name.
    pub replace: bool,
    /// Argument completion.
    pub complete: Option<Completion>,
    /// Pass a [`CommandInfo`] as the first argument.
    pub pass_info: bool,
    /// Fixed arguments and lifetime options.
    pub callback: CallbackOptions,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            nargs: Nargs::Zero,
            range: None,
            count: None,
            bang: false,
            bar: false,
            register: false,
            buffer: false,
            replace: true,
            complete: None,
            pass_info: true,
            callback: CallbackOptions::default(),
        }
    }
}

impl CommandOptions {
    /// Default options: no arguments, replacing any existing command.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of arguments.
    #[must_use]
    pub const fn with_nargs(mut self, nargs: Nargs) -> Self {
        self.nargs = nargs;
        self
    }

    /// Accept a range.
    #[must_use]
    pub const fn with_range(mut self, range: RangeSpec) -> Self {
        self.range = Some(range);
        self
    }

    /// Accept a count.
    #[must_use]
    pub const fn with_count(mut self, default: u32) -> Self {
        self.count = Some(default);
        self
    }

    /// Accept `!`.
    #[must_use]
    pub const fn bang(mut self) -> Self {
        self.bang = true;
        self
    }

    /// Allow `|` to follow the command.
    #[must_use]
    pub const fn bar(mut self) -> Self {
        self.bar = true;
        self
    }

    /// Accept a register name.
    #[must_use]
    pub const fn register(mut self) -> Self {
        self.register = true;
        self
    }

    /// Make the command buffer-local.
    #[must_use]
    pub const fn buffer(mut self) -> Self {
        self.buffer = true;
        self
    }

    /// Set argument completion.
    #[must_use]
    pub fn with_completion(mut self, complete: Completion) -> Self {
        self.complete = Some(complete);
        self
    }

    /// Set whether a [`CommandInfo`] is passed.
    #[must_use]
    pub const fn with_info(mut self, pass_info: bool) -> Self {
        self.pass_info = pass_info;
        self
    }

    /// Set fixed arguments and lifetime options.
    #[must_use]
    pub fn with_callback(mut self, callback: CallbackOptions) -> Self {
        self.callback = callback;
        self
    }

    fn attributes(&self, completer: Option<&str>) -> String {
        let mut attrs = vec![format!("-nargs={}", self.nargs.as_attr())];
        match self.range {
            Some(RangeSpec::Current) => attrs.push("-range".to_string()),
            Some(RangeSpec::All) => attrs.push("-range=%".to_string()),
            Some(RangeSpec::Count(n)) => attrs.push(format!("-range={n}")),
            None => {}
        }
        if let Some(n) = self.count {
            attrs.push(format!("-count={n}"));
        }
        for (on, attr) in [
            (self.bang, "-bang"),
            (self.bar, "-bar"),
            (self.register, "-register"),
            (self.buffer, "-buffer"),
        ] {
            if on {
                attrs.push(attr.to_string());
            }
        }
        match (&self.complete, completer) {
            (_, Some(function)) => attrs.push(format!("-complete=customlist,{function}")),
            (Some(Completion::Builtin(kind)), None) => attrs.push(format!("-complete={kind}")),
            _ => {}
        }
        attrs.join(" ")
    }
}

fn completer_name(id: CallbackId) -> String {
    format!("VPE_Complete_{id}")
}

impl Session {
    /// Define a user command that calls `target`.
    ///
    /// The callback receives the [`CommandInfo`] (unless disabled), then the
    /// fixed arguments, then the command's arguments as text.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the command cannot be defined.
    pub fn define_command(
        &self,
        name: &str,
        target: impl Into<TargetRef>,
        mut options: CommandOptions,
    ) -> Result<CallbackId, Error> {
        let callback = std::mem::take(&mut options.callback);
        let kind = CallbackKind::Command {
            name: name.to_string(),
            pass_info: options.pass_info,
        };
        let id = self.register_kind(target.into(), callback, kind, None);

        let completer = match options.complete.take() {
            Some(Completion::Custom(complete)) => match self.define_completer(complete) {
                Ok(completer) => Some(completer),
                Err(err) => {
                    self.discard(id);
                    return Err(err);
                }
            },
            other => {
                options.complete = other;
                None
            }
        };
        let function = completer.map(completer_name);

        let bang = if options.replace { "!" } else { "" };
        let fargs = if options.nargs == Nargs::Zero {
            ""
        } else {
            ", <f-args>"
        };
        let command = format!(
            "command{bang} {attrs} {name} call {COMMAND_TRAMPOLINE}('{id}', <line1>, <line2>, \
             <range>, <count>, '<bang>', <q-mods>, <q-reg>{fargs})",
            attrs = options.attributes(function.as_deref()),
        );
        if let Err(err) = self.host().command(&command) {
            self.discard(id);
            if let Some(completer) = completer {
                self.remove(completer);
            }
            return Err(err.into());
        }

        let delete = if options.buffer {
            format!("delcommand -buffer {name}")
        } else {
            format!("delcommand {name}")
        };
        self.add_cleanup(id, move |session| {
            if let Err(err) = session.host().command(&delete) {
                tracing::debug!(command = %delete, error = %err, "Command cleanup failed");
            }
            if let Some(completer) = completer {
                session.remove(completer);
            }
        });
        tracing::debug!(uid = id.get(), name, "Defined user command");
        Ok(id)
    }

    /// Register a completion callback and define the host function that
    /// calls it.
    fn define_completer(&self, target: TargetRef) -> Result<CallbackId, Error> {
        let id = self.register_kind(target, CallbackOptions::default(), CallbackKind::Plain, None);
        let function = completer_name(id);
        let definition = format!(
            "function! {function}(arglead, cmdline, cursorpos)\n\
             \x20   return {GENERIC_TRAMPOLINE}('{id}', a:arglead, a:cmdline, a:cursorpos)\n\
             endfunction"
        );
        if let Err(err) = self.host().command(&definition) {
            self.discard(id);
            return Err(err.into());
        }
        self.add_cleanup(id, move |session| {
            if let Err(err) = session.host().command(&format!("delfunction {function}")) {
                tracing::debug!(function = %function, error = %err, "Completer cleanup failed");
            }
        });
        Ok(id)
    }

    /// Delete a user command and forget any callback behind it.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the command does not exist.
    pub fn delete_command(&self, name: &str, buffer: bool) -> Result<(), Error> {
        let stale = self.registry.borrow().find(
            |kind| matches!(kind, CallbackKind::Command { name: n, .. } if n == name),
        );
        for uid in stale {
            self.remove(CallbackId(uid));
        }
        let delete = if buffer {
            format!("delcommand -buffer {name}")
        } else {
            format!("delcommand {name}")
        };
        match self.host().command(&delete) {
            Ok(()) => Ok(()),
            // Already deleted by the callback's cleanup.
            Err(_) if !self.host().eval(&format!("exists(':{name}')"))?.is_truthy() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Arguments for a command callback: the info record, if wanted, then the
/// fixed arguments, then the command's own arguments.
pub(crate) fn unmarshal(
    pass_info: bool,
    fixed: Vec<Object>,
    host_args: Vec<Value>,
) -> Result<Vec<Object>, Error> {
    let info = CommandInfo::from_host(&host_args)?;
    let fargs = host_args
        .into_iter()
        .nth(7)
        .and_then(Value::into_list)
        .unwrap_or_default();

    let mut positional = Vec::with_capacity(fixed.len() + fargs.len() + 1);
    if pass_info {
        positional.push(Object::Command(info));
    }
    positional.extend(fixed);
    positional.extend(
        fargs
            .into_iter()
            .map(|arg| Object::Text(arg.to_text().unwrap_or_default())),
    );
    Ok(positional)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::callback::target;
    use crate::fake::FakeHost;
    use crate::registry::CallShape;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn command_args(fargs: serde_json::Value) -> Vec<Value> {
        Value::from(json!([3, 7, 2, 7, "!", "vertical", "a"]))
            .into_list()
            .unwrap()
            .into_iter()
            .chain([Value::from(fargs)])
            .collect()
    }

    #[test]
    fn test_define_command_text() {
        let host = Rc::new(FakeHost::new());
        let session = Session::new(Rc::clone(&host));
        let t = target(|_, _| Ok(Object::None));
        let id = session
            .define_command(
                "Frob",
                &t,
                CommandOptions::new()
                    .with_nargs(Nargs::Any)
                    .with_range(RangeSpec::Current)
                    .bang()
                    .with_completion(Completion::Builtin("file".to_string())),
            )
            .unwrap();
        assert_eq!(
            host.commands().last().unwrap(),
            &format!(
                "command! -nargs=* -range -bang -complete=file Frob call VPE_CmdCall('{id}', \
                 <line1>, <line2>, <range>, <count>, '<bang>', <q-mods>, <q-reg>, <f-args>)"
            )
        );
    }

    #[test]
    fn test_command_arguments_unmarshalled() {
        let session = Session::new(FakeHost::new());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let t = target(move |_, args| {
            sink.borrow_mut().extend(args.positional);
            Ok(Object::None)
        });
        let id = session
            .define_command(
                "Frob",
                &t,
                CommandOptions::new()
                    .with_nargs(Nargs::Any)
                    .with_callback(CallbackOptions::new().with_arg("fixed")),
            )
            .unwrap();

        let result = session.dispatch(
            CallShape::Command,
            &id.to_string(),
            command_args(json!(["x", "y"])),
        );
        assert_eq!(result, Value::Int(0));

        let seen = seen.borrow();
        let Object::Command(info) = &seen[0] else {
            panic!("expected command info, got {:?}", seen[0]);
        };
        assert_eq!((info.line1, info.line2, info.range), (3, 7, 2));
        assert!(info.bang);
        assert_eq!(info.mods, "vertical");
        assert_eq!(info.reg, "a");
        assert_eq!(
            &seen[1..],
            &[Object::from("fixed"), Object::from("x"), Object::from("y")]
        );
    }

    #[test]
    fn test_custom_completion_returns_list() {
        let host = Rc::new(FakeHost::new());
        let session = Session::new(Rc::clone(&host));
        let t = target(|_, _| Ok(Object::None));
        let complete = target(|_, args| {
            let lead = args.get(0).and_then(Object::as_text).unwrap_or("").to_string();
            Ok(Object::List(
                ["alpha", "beta"]
                    .into_iter()
                    .filter(|c| c.starts_with(&lead))
                    .map(Object::from)
                    .collect(),
            ))
        });
        let id = session
            .define_command(
                "Pick",
                &t,
                CommandOptions::new()
                    .with_nargs(Nargs::One)
                    .with_completion(Completion::Custom(TargetRef::weak(&complete))),
            )
            .unwrap();
        let command = host.commands().last().unwrap().clone();
        let function = command
            .split_whitespace()
            .find_map(|part| part.strip_prefix("-complete=customlist,"))
            .unwrap()
            .to_string();
        let completer_uid = function.trim_start_matches("VPE_Complete_").to_string();
        assert_eq!(
            session.dispatch(
                CallShape::Generic,
                &completer_uid,
                vec![Value::from("al"), Value::from("Pick al"), Value::Int(7)],
            ),
            Value::List(vec![Value::from("alpha")])
        );

        session.remove(id);
        assert!(host.commands().contains(&"delcommand Pick".to_string()));
        assert!(host.commands().contains(&format!("delfunction {function}")));
    }

    #[test]
    fn test_too_few_fields_is_reported() {
        let session = Session::new(FakeHost::new());
        let t = target(|_, _| Ok(Object::None));
        let id = session.define_command("Frob", &t, CommandOptions::new()).unwrap();
        assert_eq!(
            session.dispatch(CallShape::Command, &id.to_string(), vec![Value::Int(1)]),
            Value::Int(-1)
        );
    }
}
