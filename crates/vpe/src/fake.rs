//! An in-memory host.
//!
//! [`FakeHost`] models just enough of the editor for the binding layer to be
//! exercised without one: buffers with lines, options and variables, windows
//! arranged in tab pages, host lists and dictionaries, global options
//! (including global-local ones only reachable through `&g:`), user
//! functions, mappings, autocommands, user commands, timers and buffer
//! listeners.
//!
//! Every command string is recorded and can be inspected with
//! [`FakeHost::commands`]; function calls and evaluated expressions are
//! recorded in [`FakeHost::calls`]. Host-side events are driven explicitly
//! with [`FakeHost::press`], [`FakeHost::fire_autocmd`],
//! [`FakeHost::run_command`], [`FakeHost::fire_timer`] and
//! [`FakeHost::fire_listener`], which go through the same trampoline
//! argument slot and [`Session::invoke`] entry point the real host uses.
//!
//! ```rust,ignore
//! let host = Rc::new(FakeHost::with_lines(&["one", "two"]));
//! let session = Session::new(Rc::clone(&host));
//! session.map(Mode::Normal, "f", &on_f, MapOptions::new())?;
//! host.press(&session, Mode::Normal, "f");
//! ```

use std::cell::{RefCell, RefMut};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use crate::host::{Current, Host, HostError, NativeRef, Scope, Value};
use crate::mapping::Mode;
use crate::registry::{CallShape, COMMAND_TRAMPOLINE, GENERIC_TRAMPOLINE, MAPPING_TRAMPOLINE};
use crate::session::Session;

/// First window ID handed out, as in the real editor.
const FIRST_WINDOW_ID: i64 = 1000;

#[derive(Debug, Clone)]
struct FakeBuffer {
    name: String,
    lines: Vec<String>,
    options: BTreeMap<String, Value>,
    vars: BTreeMap<String, Value>,
}

impl FakeBuffer {
    fn new(lines: Vec<String>) -> Self {
        let options = [
            ("modifiable", Value::Bool(true)),
            ("readonly", Value::Bool(false)),
            ("buftype", Value::from("")),
            ("bufhidden", Value::from("")),
            ("swapfile", Value::Bool(true)),
            ("filetype", Value::from("")),
            ("tabstop", Value::Int(8)),
        ];
        Self {
            name: String::new(),
            lines: if lines.is_empty() {
                vec![String::new()]
            } else {
                lines
            },
            options: options
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            vars: BTreeMap::new(),
        }
    }

    fn check_modifiable(&self) -> Result<(), HostError> {
        if self.options.get("modifiable").is_some_and(Value::is_truthy) {
            Ok(())
        } else {
            Err(HostError::Vim(
                "Vim:E21: Cannot make changes, 'modifiable' is off".to_string(),
            ))
        }
    }
}

#[derive(Debug, Clone)]
struct FakeWindow {
    buffer: i64,
    cursor: (i64, i64),
    height: i64,
    width: i64,
    options: BTreeMap<String, Value>,
    vars: BTreeMap<String, Value>,
}

#[derive(Debug, Clone)]
struct FakeTab {
    handle: u64,
    windows: Vec<i64>,
    current: usize,
    vars: BTreeMap<String, Value>,
}

#[derive(Debug, Clone)]
struct FakeTimer {
    uid: String,
    remaining: i64,
}

#[derive(Debug, Clone)]
struct FakeAutocmd {
    group: String,
    event: String,
    pattern: String,
    buffer: Option<i64>,
    once: bool,
    cmd: String,
}

#[derive(Debug, Clone)]
struct Visual {
    mode: String,
    start: (i64, i64),
    end: (i64, i64),
}

#[derive(Debug)]
struct State {
    buffers: BTreeMap<i64, FakeBuffer>,
    next_buffer: i64,
    windows: BTreeMap<i64, FakeWindow>,
    next_window: i64,
    tabs: Vec<FakeTab>,
    next_tab: u64,
    current_tab: usize,
    global_options: BTreeMap<String, Value>,
    global_local_options: BTreeMap<String, Value>,
    gvars: BTreeMap<String, Value>,
    vvars: BTreeMap<String, Value>,
    lists: BTreeMap<u64, Vec<Value>>,
    dicts: BTreeMap<u64, BTreeMap<String, Value>>,
    next_container: u64,
    commands: Vec<String>,
    calls: Vec<String>,
    functions: BTreeSet<String>,
    mappings: BTreeMap<(char, Option<i64>, String), String>,
    user_commands: BTreeMap<String, String>,
    augroup: Option<String>,
    autocmds: Vec<FakeAutocmd>,
    timers: BTreeMap<i64, FakeTimer>,
    next_timer: i64,
    listeners: BTreeMap<i64, (i64, String)>,
    next_listener: i64,
    visual: Visual,
}

impl State {
    fn new(lines: Vec<String>) -> Self {
        let window = FakeWindow {
            buffer: 1,
            cursor: (1, 0),
            height: 24,
            width: 80,
            options: BTreeMap::new(),
            vars: BTreeMap::new(),
        };
        let global_options = [
            ("eventignore", Value::from("")),
            ("whichwrap", Value::from("b,s")),
            ("tabstop", Value::Int(8)),
            ("shiftwidth", Value::Int(8)),
            ("ignorecase", Value::Bool(false)),
            ("formatoptions", Value::from("tcq")),
        ];
        let vvars = [
            ("count", Value::Int(0)),
            ("version", Value::Int(900)),
        ];
        Self {
            buffers: BTreeMap::from([(1, FakeBuffer::new(lines))]),
            next_buffer: 2,
            windows: BTreeMap::from([(FIRST_WINDOW_ID, window)]),
            next_window: FIRST_WINDOW_ID + 1,
            tabs: vec![FakeTab {
                handle: 1,
                windows: vec![FIRST_WINDOW_ID],
                current: 0,
                vars: BTreeMap::new(),
            }],
            next_tab: 2,
            current_tab: 0,
            global_options: global_options
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            global_local_options: BTreeMap::new(),
            gvars: BTreeMap::new(),
            vvars: vvars.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            lists: BTreeMap::new(),
            dicts: BTreeMap::new(),
            next_container: 1,
            commands: Vec::new(),
            calls: Vec::new(),
            functions: BTreeSet::new(),
            mappings: BTreeMap::new(),
            user_commands: BTreeMap::new(),
            augroup: None,
            autocmds: Vec::new(),
            timers: BTreeMap::new(),
            next_timer: 1,
            listeners: BTreeMap::new(),
            next_listener: 1,
            visual: Visual {
                mode: String::new(),
                start: (0, 0),
                end: (0, 0),
            },
        }
    }

    fn tab(&self) -> &FakeTab {
        &self.tabs[self.current_tab]
    }

    /// The buffer a `<buffer>` or `<buffer=N>` pattern refers to.
    fn pattern_buffer(&self, pattern: &str) -> Option<i64> {
        if pattern == "<buffer>" {
            return Some(self.current_buffer_number());
        }
        pattern
            .strip_prefix("<buffer=")?
            .strip_suffix('>')?
            .parse()
            .ok()
    }

    fn current_window_id(&self) -> i64 {
        let tab = self.tab();
        tab.windows[tab.current]
    }

    fn current_window(&mut self) -> Result<&mut FakeWindow, HostError> {
        let id = self.current_window_id();
        self.windows.get_mut(&id).ok_or(HostError::Invalid("window"))
    }

    fn current_buffer_number(&self) -> i64 {
        self.windows
            .get(&self.current_window_id())
            .map_or(1, |w| w.buffer)
    }

    fn window_at(&self, tab: i64, number: i64) -> Option<i64> {
        let tab = self.tabs.get(usize::try_from(tab - 1).ok()?)?;
        tab.windows.get(usize::try_from(number - 1).ok()?).copied()
    }

    fn position_of(&self, id: i64) -> Option<(i64, i64)> {
        self.tabs.iter().enumerate().find_map(|(t, tab)| {
            let w = tab.windows.iter().position(|&w| w == id)?;
            Some((t as i64 + 1, w as i64 + 1))
        })
    }

    fn tab_index(&self, handle: u64) -> Option<usize> {
        self.tabs.iter().position(|t| t.handle == handle)
    }

    fn buffer(&self, number: i64) -> Result<&FakeBuffer, HostError> {
        self.buffers
            .get(&number)
            .ok_or_else(|| HostError::Vim(format!("Vim:E86: Buffer {number} does not exist")))
    }

    fn buffer_mut(&mut self, number: i64) -> Result<&mut FakeBuffer, HostError> {
        self.buffers
            .get_mut(&number)
            .ok_or_else(|| HostError::Vim(format!("Vim:E86: Buffer {number} does not exist")))
    }

    fn window(&self, tab: i64, number: i64) -> Result<&FakeWindow, HostError> {
        self.window_at(tab, number)
            .and_then(|id| self.windows.get(&id))
            .ok_or_else(|| HostError::Vim("Vim:E957: Invalid window number".to_string()))
    }

    fn window_mut(&mut self, tab: i64, number: i64) -> Result<&mut FakeWindow, HostError> {
        self.window_at(tab, number)
            .and_then(|id| self.windows.get_mut(&id))
            .ok_or_else(|| HostError::Vim("Vim:E957: Invalid window number".to_string()))
    }

    fn table(&self, object: &NativeRef) -> Result<&BTreeMap<String, Value>, HostError> {
        Ok(match object {
            NativeRef::Options(Scope::Global) => &self.global_options,
            NativeRef::Options(Scope::Buffer(n)) => &self.buffer(*n)?.options,
            NativeRef::Options(Scope::Window { tab, number }) => &self.window(*tab, *number)?.options,
            NativeRef::Vars(Scope::Global) => &self.gvars,
            NativeRef::Vars(Scope::Vim) => &self.vvars,
            NativeRef::Vars(Scope::Buffer(n)) => &self.buffer(*n)?.vars,
            NativeRef::Vars(Scope::Window { tab, number }) => &self.window(*tab, *number)?.vars,
            NativeRef::Vars(Scope::TabPage(handle)) => {
                let index = self.tab_index(*handle).ok_or(HostError::Invalid("tab page"))?;
                &self.tabs[index].vars
            }
            NativeRef::Dict(handle) => self.dicts.get(handle).ok_or(HostError::Invalid("dict"))?,
            _ => return Err(HostError::Invalid("not a table")),
        })
    }

    fn table_mut(&mut self, object: &NativeRef) -> Result<&mut BTreeMap<String, Value>, HostError> {
        Ok(match object {
            NativeRef::Options(Scope::Global) => &mut self.global_options,
            NativeRef::Options(Scope::Buffer(n)) => &mut self.buffer_mut(*n)?.options,
            NativeRef::Options(Scope::Window { tab, number }) => {
                &mut self.window_mut(*tab, *number)?.options
            }
            NativeRef::Vars(Scope::Global) => &mut self.gvars,
            NativeRef::Vars(Scope::Buffer(n)) => &mut self.buffer_mut(*n)?.vars,
            NativeRef::Vars(Scope::Window { tab, number }) => {
                &mut self.window_mut(*tab, *number)?.vars
            }
            NativeRef::Vars(Scope::TabPage(handle)) => {
                let index = self.tab_index(*handle).ok_or(HostError::Invalid("tab page"))?;
                &mut self.tabs[index].vars
            }
            NativeRef::Dict(handle) => self
                .dicts
                .get_mut(handle)
                .ok_or(HostError::Invalid("dict"))?,
            _ => return Err(HostError::Invalid("not a writable table")),
        })
    }

    fn sequence_mut(&mut self, object: &NativeRef) -> Result<&mut Vec<Value>, HostError> {
        match object {
            NativeRef::List(handle) => self.lists.get_mut(handle).ok_or(HostError::Invalid("list")),
            _ => Err(HostError::Invalid("not a list")),
        }
    }

    fn new_window_showing(&mut self, buffer: i64, cursor: (i64, i64)) -> i64 {
        let id = self.next_window;
        self.next_window += 1;
        self.windows.insert(
            id,
            FakeWindow {
                buffer,
                cursor,
                height: 12,
                width: 80,
                options: BTreeMap::new(),
                vars: BTreeMap::new(),
            },
        );
        id
    }

    fn open_tab(&mut self, handle: u64) -> u64 {
        let buffer = self.current_buffer_number();
        let window = self.new_window_showing(buffer, (1, 0));
        let index = self.current_tab + 1;
        self.tabs.insert(
            index,
            FakeTab {
                handle,
                windows: vec![window],
                current: 0,
                vars: BTreeMap::new(),
            },
        );
        self.current_tab = index;
        handle
    }

    fn remove_tab(&mut self, index: usize) {
        let tab = self.tabs.remove(index);
        for id in tab.windows {
            self.windows.remove(&id);
        }
        if self.current_tab >= self.tabs.len() || self.current_tab > index {
            self.current_tab = self.current_tab.saturating_sub(1);
        }
    }
}

/// An in-memory host for tests and headless use.
#[derive(Debug)]
pub struct FakeHost {
    state: RefCell<State>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHost {
    /// One empty buffer in one window in one tab page.
    #[must_use]
    pub fn new() -> Self {
        Self::with_lines(&[])
    }

    /// Like [`FakeHost::new`], with the buffer holding `lines`.
    #[must_use]
    pub fn with_lines(lines: &[&str]) -> Self {
        Self {
            state: RefCell::new(State::new(lines.iter().map(ToString::to_string).collect())),
        }
    }

    fn state(&self) -> RefMut<'_, State> {
        self.state.borrow_mut()
    }

    /// Every command executed so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.state.borrow().commands.clone()
    }

    /// Create a buffer that is not shown in any window.
    pub fn add_buffer(&self, lines: &[&str]) -> i64 {
        let mut state = self.state();
        let number = state.next_buffer;
        state.next_buffer += 1;
        state.buffers.insert(
            number,
            FakeBuffer::new(lines.iter().map(ToString::to_string).collect()),
        );
        number
    }

    /// Wipe a buffer.
    pub fn wipe_buffer(&self, number: i64) {
        self.state().buffers.remove(&number);
    }

    /// Create a host list.
    pub fn add_list(&self, items: Vec<Value>) -> NativeRef {
        let mut state = self.state();
        let handle = state.next_container;
        state.next_container += 1;
        state.lists.insert(handle, items);
        NativeRef::List(handle)
    }

    /// Create a host dictionary.
    pub fn add_dict(&self, items: Vec<(String, Value)>) -> NativeRef {
        let mut state = self.state();
        let handle = state.next_container;
        state.next_container += 1;
        state.dicts.insert(handle, items.into_iter().collect());
        NativeRef::Dict(handle)
    }

    /// Set a global option.
    pub fn set_global_option(&self, name: &str, value: Value) {
        self.state().global_options.insert(name.to_string(), value);
    }

    /// Set a global-local option. These are missing from the global option
    /// table and only reachable with `&g:name`.
    pub fn set_global_local_option(&self, name: &str, value: Value) {
        self.state()
            .global_local_options
            .insert(name.to_string(), value);
    }

    /// Split the current window. The new window takes the current window's
    /// place, pushing it down, and becomes current. Returns its ID.
    pub fn split_window(&self) -> i64 {
        let mut state = self.state();
        let (buffer, cursor) = state
            .windows
            .get(&state.current_window_id())
            .map_or((1, (1, 0)), |w| (w.buffer, w.cursor));
        let id = state.new_window_showing(buffer, cursor);
        let tab = state.current_tab;
        let at = state.tabs[tab].current;
        state.tabs[tab].windows.insert(at, id);
        id
    }

    /// Close a window. Closing the last window of a tab page closes the tab
    /// page.
    pub fn close_window(&self, id: i64) {
        let mut state = self.state();
        let Some((tab, number)) = state.position_of(id) else {
            return;
        };
        let tab_index = (tab - 1) as usize;
        let window_index = (number - 1) as usize;
        if state.tabs[tab_index].windows.len() == 1 {
            state.remove_tab(tab_index);
            return;
        }
        state.windows.remove(&id);
        let tab = &mut state.tabs[tab_index];
        tab.windows.remove(window_index);
        if tab.current >= tab.windows.len() || tab.current > window_index {
            tab.current = tab.current.saturating_sub(1);
        }
    }

    /// Open a new tab page after the current one and make it current.
    pub fn new_tab(&self) -> u64 {
        let mut state = self.state();
        let handle = state.next_tab;
        state.next_tab += 1;
        state.open_tab(handle)
    }

    /// Open a new tab page reusing `handle`.
    pub fn new_tab_with_handle(&self, handle: u64) -> u64 {
        self.state().open_tab(handle)
    }

    /// Close a tab page and its windows.
    pub fn close_tab(&self, handle: u64) {
        let mut state = self.state();
        if let Some(index) = state.tab_index(handle) {
            state.remove_tab(index);
        }
    }

    /// Set the last visual selection.
    pub fn set_visual(&self, mode: &str, start: (i64, i64), end: (i64, i64)) {
        self.state().visual = Visual {
            mode: mode.to_string(),
            start,
            end,
        };
    }

    /// The right-hand side mapped to `keys` in `mode`, preferring a mapping
    /// local to the current buffer.
    #[must_use]
    pub fn mapping(&self, mode: Mode, keys: &str) -> Option<String> {
        let state = self.state.borrow();
        let prefix = mode_char(mode);
        let local = state.current_buffer_number();
        state
            .mappings
            .get(&(prefix, Some(local), keys.to_string()))
            .or_else(|| state.mappings.get(&(prefix, None, keys.to_string())))
            .cloned()
    }

    /// Commands of the autocommands defined for `event`, in definition
    /// order.
    #[must_use]
    pub fn autocmds(&self, event: &str) -> Vec<String> {
        self.state
            .borrow()
            .autocmds
            .iter()
            .filter(|autocmd| autocmd.event == event)
            .map(|autocmd| autocmd.cmd.clone())
            .collect()
    }

    /// Every function called and expression evaluated, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    /// Whether a user command is defined.
    #[must_use]
    pub fn has_command(&self, name: &str) -> bool {
        self.state.borrow().user_commands.contains_key(name)
    }

    /// Whether a host listener is registered.
    #[must_use]
    pub fn has_listener(&self, listener_id: i64) -> bool {
        self.state.borrow().listeners.contains_key(&listener_id)
    }

    /// IDs of running timers.
    #[must_use]
    pub fn pending_timers(&self) -> Vec<i64> {
        self.state.borrow().timers.keys().copied().collect()
    }

    /// Call a trampoline: store `{uid, args}` in the argument slot and
    /// re-enter the session.
    pub fn trigger(&self, session: &Session, shape: CallShape, uid: &str, args: Vec<Value>) -> Value {
        let slot = session.config().args_slot.clone();
        let name = slot.strip_prefix("g:").unwrap_or(&slot).to_string();
        let payload = Value::Dict(BTreeMap::from([
            ("uid".to_string(), Value::from(uid)),
            ("args".to_string(), Value::List(args)),
        ]));
        self.state().gvars.insert(name, payload);
        session.invoke(shape)
    }

    /// Press a mapped key sequence. Returns the mapping's result, or `None`
    /// if the keys are not mapped to a callback.
    pub fn press(&self, session: &Session, mode: Mode, keys: &str) -> Option<Value> {
        let rhs = self.mapping(mode, keys)?;
        let uid = quoted_uid(&rhs, MAPPING_TRAMPOLINE)?;
        Some(self.trigger(session, CallShape::Mapping, &uid, vec![]))
    }

    /// Fire `event` for the current buffer, running every matching
    /// autocommand that calls a callback. Returns the number run.
    pub fn fire_autocmd(&self, session: &Session, event: &str) -> usize {
        let uids: Vec<String> = {
            let mut state = self.state();
            let current = state.current_buffer_number();
            let applies =
                |a: &FakeAutocmd| a.event == event && a.buffer.is_none_or(|b| b == current);
            let uids = state
                .autocmds
                .iter()
                .filter(|a| applies(a))
                .filter_map(|a| quoted_uid(&a.cmd, GENERIC_TRAMPOLINE))
                .collect();
            state.autocmds.retain(|a| !(a.once && applies(a)));
            uids
        };
        for uid in &uids {
            self.trigger(session, CallShape::Generic, uid, vec![]);
        }
        uids.len()
    }

    /// Run a user command on the cursor line. Returns `None` if the command
    /// is not backed by a callback.
    pub fn run_command(
        &self,
        session: &Session,
        name: &str,
        bang: bool,
        fargs: &[&str],
    ) -> Option<Value> {
        let (definition, line) = {
            let mut state = self.state();
            let definition = state.user_commands.get(name)?.clone();
            let line = state.current_window().map_or(1, |w| w.cursor.0);
            (definition, line)
        };
        let uid = quoted_uid(&definition, COMMAND_TRAMPOLINE)?;
        let args = vec![
            Value::Int(line),
            Value::Int(line),
            Value::Int(0),
            Value::Int(0),
            Value::from(if bang { "!" } else { "" }),
            Value::from(""),
            Value::from(""),
            Value::List(fargs.iter().map(|a| Value::from(*a)).collect()),
        ];
        Some(self.trigger(session, CallShape::Command, &uid, args))
    }

    /// Fire a timer once. Returns false if the timer is not running.
    pub fn fire_timer(&self, session: &Session, timer_id: i64) -> bool {
        let uid = {
            let mut state = self.state();
            let Some(timer) = state.timers.get_mut(&timer_id) else {
                return false;
            };
            let uid = timer.uid.clone();
            if timer.remaining > 0 {
                timer.remaining -= 1;
                if timer.remaining == 0 {
                    state.timers.remove(&timer_id);
                }
            }
            uid
        };
        self.trigger(session, CallShape::Generic, &uid, vec![Value::Int(timer_id)]);
        true
    }

    /// Deliver a batch of buffer changes to a listener. `start` and `end`
    /// are 1-based. Returns false if the listener is not registered.
    pub fn fire_listener(
        &self,
        session: &Session,
        listener_id: i64,
        start: i64,
        end: i64,
        added: i64,
        changes: Value,
    ) -> bool {
        let Some((buffer, uid)) = self.state.borrow().listeners.get(&listener_id).cloned() else {
            return false;
        };
        let args = vec![
            Value::Int(buffer),
            Value::Int(start),
            Value::Int(end),
            Value::Int(added),
            changes,
        ];
        self.trigger(session, CallShape::Generic, &uid, args);
        true
    }

    fn run(&self, text: &str) -> Result<(), HostError> {
        let mut state = self.state();
        state.commands.push(text.to_string());

        let (head, rest) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
        let rest = rest.trim();
        match head {
            "function!" => {
                if let Some((name, _)) = rest.split_once('(') {
                    state.functions.insert(name.to_string());
                }
            }
            "delfunction" => {
                if !state.functions.remove(rest) {
                    return Err(HostError::Vim(format!("Vim(delfunction):E130: Unknown function: {rest}")));
                }
            }
            "let" => {
                let Some((lhs, rhs)) = rest.split_once('=') else {
                    return Err(HostError::Vim("Vim(let):E15: Invalid expression".to_string()));
                };
                let Some(name) = lhs.trim().strip_prefix("&g:") else {
                    return Err(HostError::Vim(format!("Vim(let):E461: Illegal variable name: {lhs}")));
                };
                let value = parse_literal(rhs.trim());
                if state.global_local_options.contains_key(name) {
                    state.global_local_options.insert(name.to_string(), value);
                } else if state.global_options.contains_key(name) {
                    state.global_options.insert(name.to_string(), value);
                } else {
                    return Err(HostError::Vim(format!("Vim(let):E355: Unknown option: {name}")));
                }
            }
            "command" | "command!" => {
                let name = rest
                    .split_whitespace()
                    .find(|part| !part.starts_with('-'))
                    .unwrap_or_default()
                    .to_string();
                if head == "command" && state.user_commands.contains_key(&name) {
                    return Err(HostError::Vim(format!(
                        "Vim(command):E174: Command already exists: add ! to replace it: {name}"
                    )));
                }
                state.user_commands.insert(name, text.to_string());
            }
            "augroup" => {
                state.augroup = (rest != "END").then(|| rest.to_string());
            }
            "autocmd" => {
                let Some((group, event, pattern, once, cmd)) = parse_autocmd(rest) else {
                    return Err(HostError::Vim(format!("Vim(autocmd):E216: No such group or event: {rest}")));
                };
                let buffer = state.pattern_buffer(&pattern);
                state.autocmds.push(FakeAutocmd {
                    group,
                    event,
                    pattern,
                    buffer,
                    once,
                    cmd,
                });
            }
            "autocmd!" => {
                let mut words = rest.split_whitespace();
                let group = words
                    .next()
                    .map(String::from)
                    .or_else(|| state.augroup.clone())
                    .unwrap_or_default();
                let event = words.next().map(String::from);
                let pattern = words.next().map(String::from);
                let buffer = pattern.as_deref().and_then(|p| state.pattern_buffer(p));
                state.autocmds.retain(|a| {
                    let matches = a.group == group
                        && event.as_ref().is_none_or(|e| *e == a.event)
                        && pattern
                            .as_ref()
                            .is_none_or(|p| a.buffer == buffer && (buffer.is_some() || *p == a.pattern));
                    !matches
                });
            }
            "delcommand" => {
                let name = rest.trim_start_matches("-buffer").trim();
                if state.user_commands.remove(name).is_none() {
                    return Err(HostError::Vim(format!(
                        "Vim(delcommand):E184: No such user-defined command: {name}"
                    )));
                }
            }
            _ => {
                if let Some(prefix) = head.strip_suffix("noremap").and_then(single_char) {
                    let (local, keys, rhs) = parse_map_args(rest);
                    let buffer = local.then(|| state.current_buffer_number());
                    state.mappings.insert((prefix, buffer, keys), rhs);
                } else if let Some(prefix) = head.strip_suffix("unmap").and_then(single_char) {
                    let (local, keys, _) = parse_map_args(rest);
                    let buffer = local.then(|| state.current_buffer_number());
                    if state.mappings.remove(&(prefix, buffer, keys)).is_none() {
                        return Err(HostError::Vim(format!("Vim({head}):E31: No such mapping")));
                    }
                }
            }
        }
        Ok(())
    }

    fn evaluate(&self, expr: &str) -> Result<Value, HostError> {
        let expr = expr.trim();
        let mut state = self.state();
        if let Some(inner) = call_argument(expr, "exists") {
            let inner = inner.trim_matches('\'');
            let found = if let Some(name) = inner.strip_prefix('&') {
                state.global_options.contains_key(name)
                    || state.global_local_options.contains_key(name)
            } else if let Some(name) = inner.strip_prefix('*') {
                state.functions.contains(name)
            } else if let Some(name) = inner.strip_prefix(':') {
                state.user_commands.contains_key(name)
            } else {
                let name = inner.strip_prefix("g:").unwrap_or(inner);
                state.gvars.contains_key(name)
            };
            return Ok(Value::Int(i64::from(found)));
        }
        if let Some(inner) = call_argument(expr, "timer_start") {
            let uid = quoted_uid(inner, GENERIC_TRAMPOLINE)
                .ok_or_else(|| HostError::Vim(format!("E475: Invalid argument: {inner}")))?;
            let remaining = inner
                .split_once("'repeat':")
                .and_then(|(_, r)| r.trim().trim_end_matches('}').trim().parse::<i64>().ok())
                .unwrap_or(1);
            let id = state.next_timer;
            state.next_timer += 1;
            state.timers.insert(id, FakeTimer { uid, remaining });
            return Ok(Value::Int(id));
        }
        if let Some(inner) = call_argument(expr, "listener_add") {
            let uid = quoted_uid(inner, GENERIC_TRAMPOLINE)
                .ok_or_else(|| HostError::Vim(format!("E475: Invalid argument: {inner}")))?;
            let buffer = inner
                .rsplit_once(',')
                .and_then(|(_, b)| b.trim().parse::<i64>().ok())
                .unwrap_or_else(|| state.current_buffer_number());
            state.buffer(buffer)?;
            let id = state.next_listener;
            state.next_listener += 1;
            state.listeners.insert(id, (buffer, uid));
            return Ok(Value::Int(id));
        }
        if let Some(name) = expr.strip_prefix("&g:") {
            return state
                .global_local_options
                .get(name)
                .or_else(|| state.global_options.get(name))
                .cloned()
                .ok_or_else(|| HostError::Vim(format!("E113: Unknown option: {name}")));
        }
        let lookup = |table: &BTreeMap<String, Value>, name: &str| {
            table
                .get(name)
                .cloned()
                .ok_or_else(|| HostError::Vim(format!("E121: Undefined variable: {expr}")))
        };
        if let Some(name) = expr.strip_prefix("g:") {
            return lookup(&state.gvars, name);
        }
        if let Some(name) = expr.strip_prefix("v:") {
            return lookup(&state.vvars, name);
        }
        if let Ok(n) = expr.parse::<i64>() {
            return Ok(Value::Int(n));
        }
        Err(HostError::Vim(format!("E15: Invalid expression: \"{expr}\"")))
    }

    fn call_function(&self, function: &str, args: &[Value]) -> Result<Value, HostError> {
        let mut state = self.state();
        let int = |i: usize| args.get(i).and_then(Value::as_int).unwrap_or(0);
        Ok(match function {
            "win_getid" => {
                let number = int(0);
                let tab = args
                    .get(1)
                    .and_then(Value::as_int)
                    .unwrap_or(state.current_tab as i64 + 1);
                Value::Int(state.window_at(tab, number).unwrap_or(0))
            }
            "win_id2tabwin" => {
                let (tab, number) = state.position_of(int(0)).unwrap_or((0, 0));
                Value::List(vec![Value::Int(tab), Value::Int(number)])
            }
            "visualmode" => Value::from(state.visual.mode.as_str()),
            "getpos" => {
                let mark = args.first().and_then(Value::to_text).unwrap_or_default();
                let (line, col) = match mark.as_str() {
                    "'<" => state.visual.start,
                    "'>" => state.visual.end,
                    _ => {
                        let (line, col) = state.current_window()?.cursor;
                        (line, col + 1)
                    }
                };
                Value::List(vec![
                    Value::Int(0),
                    Value::Int(line),
                    Value::Int(col),
                    Value::Int(0),
                ])
            }
            "winsaveview" => {
                let (line, col) = state.current_window()?.cursor;
                Value::Dict(BTreeMap::from([
                    ("lnum".to_string(), Value::Int(line)),
                    ("col".to_string(), Value::Int(col)),
                ]))
            }
            "winrestview" => {
                let view = args.first().cloned().unwrap_or(Value::Nil);
                let window = state.current_window()?;
                if let Some(line) = view.get("lnum").and_then(Value::as_int) {
                    window.cursor.0 = line;
                }
                if let Some(col) = view.get("col").and_then(Value::as_int) {
                    window.cursor.1 = col;
                }
                Value::Int(0)
            }
            "listener_flush" => Value::Int(0),
            "autocmd_delete" => {
                let requests = args.first().cloned().and_then(Value::into_list).unwrap_or_default();
                for request in requests {
                    let field = |name: &str| request.get(name).and_then(Value::to_text);
                    let buffer = request
                        .get("bufnr")
                        .and_then(Value::as_int)
                        .or_else(|| field("pattern").and_then(|p| state.pattern_buffer(&p)));
                    let (group, event, pattern, cmd) =
                        (field("group"), field("event"), field("pattern"), field("cmd"));
                    state.autocmds.retain(|a| {
                        let matches = group.as_ref().is_none_or(|g| *g == a.group)
                            && event.as_ref().is_none_or(|e| *e == a.event)
                            && cmd.as_ref().is_none_or(|c| *c == a.cmd)
                            && match buffer {
                                Some(number) => a.buffer == Some(number),
                                None => pattern.as_ref().is_none_or(|p| *p == a.pattern),
                            };
                        !matches
                    });
                }
                Value::Bool(true)
            }
            "listener_remove" => Value::Int(i64::from(state.listeners.remove(&int(0)).is_some())),
            "timer_stop" => {
                state.timers.remove(&int(0));
                Value::Int(0)
            }
            "bufadd" => {
                let name = args.first().and_then(Value::to_text).unwrap_or_default();
                let existing = state
                    .buffers
                    .iter()
                    .find(|(_, b)| !name.is_empty() && b.name == name)
                    .map(|(&n, _)| n);
                let number = existing.unwrap_or_else(|| {
                    let number = state.next_buffer;
                    state.next_buffer += 1;
                    let mut buffer = FakeBuffer::new(Vec::new());
                    buffer.name = name;
                    state.buffers.insert(number, buffer);
                    number
                });
                Value::Int(number)
            }
            "bufload" => {
                state.buffer(int(0))?;
                Value::Int(0)
            }
            other => {
                return Err(HostError::Vim(format!("E117: Unknown function: {other}")));
            }
        })
    }
}

fn mode_char(mode: Mode) -> char {
    mode.prefix().chars().next().unwrap_or('n')
}

fn single_char(text: &str) -> Option<char> {
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}

/// Split `[<buffer>] [<silent>] ... lhs rhs` into (buffer-local, lhs, rhs).
fn parse_map_args(text: &str) -> (bool, String, String) {
    let mut local = false;
    let mut rest = text.trim_start();
    while let Some(flag) = ["<buffer>", "<silent>", "<nowait>", "<unique>", "<expr>"]
        .into_iter()
        .find(|flag| rest.starts_with(*flag))
    {
        local |= flag == "<buffer>";
        rest = rest[flag.len()..].trim_start();
    }
    let (lhs, rhs) = rest.split_once(' ').unwrap_or((rest, ""));
    (local, lhs.to_string(), rhs.to_string())
}

/// Split `group event pattern [++once] [++nested] cmd` into (group, event,
/// pattern, once, cmd).
fn parse_autocmd(text: &str) -> Option<(String, String, String, bool, String)> {
    let mut rest = text.trim_start();
    let mut words = Vec::with_capacity(3);
    for _ in 0..3 {
        let (word, after) = rest.split_once(' ')?;
        words.push(word.to_string());
        rest = after.trim_start();
    }
    let mut once = false;
    loop {
        if let Some(after) = rest.strip_prefix("++once") {
            once = true;
            rest = after.trim_start();
        } else if let Some(after) = rest.strip_prefix("++nested") {
            rest = after.trim_start();
        } else {
            break;
        }
    }
    let [group, event, pattern] = <[String; 3]>::try_from(words).ok()?;
    Some((group, event, pattern, once, rest.to_string()))
}

/// The argument text of `name(...)`.
fn call_argument<'a>(expr: &'a str, name: &str) -> Option<&'a str> {
    expr.strip_prefix(name)?
        .strip_prefix('(')?
        .strip_suffix(')')
}

/// The quoted callback ID following `trampoline`, as in
/// `function('VPE_Call', ['3'])` or `VPE_MappingCall('3')`.
fn quoted_uid(text: &str, trampoline: &str) -> Option<String> {
    let after = &text[text.find(trampoline)? + trampoline.len()..];
    let start = after.find('\'')? + 1;
    let after = &after[start..];
    let after = if after.starts_with(']') || after.starts_with(',') {
        // function('VPE_Call', ['3']): skip to the bound argument.
        let open = after.find("['")? + 2;
        &after[open..]
    } else {
        after
    };
    let end = after.find('\'')?;
    Some(after[..end].to_string())
}

fn parse_literal(text: &str) -> Value {
    if let Some(inner) = text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')) {
        return Value::from(inner.replace("''", "'"));
    }
    match text {
        "v:true" => return Value::Bool(true),
        "v:false" => return Value::Bool(false),
        "v:null" | "v:none" => return Value::Nil,
        _ => {}
    }
    if let Ok(n) = text.parse::<i64>() {
        return Value::Int(n);
    }
    if let Ok(f) = text.parse::<f64>() {
        return Value::Float(f);
    }
    Value::from(text)
}

fn index(key: &Value, len: usize) -> Result<usize, HostError> {
    let raw = key.as_int().ok_or(HostError::Invalid("index must be a number"))?;
    usize::try_from(raw)
        .ok()
        .filter(|&i| i < len)
        .ok_or(HostError::IndexOutOfRange(raw))
}

fn text_key(key: &Value) -> Result<String, HostError> {
    key.to_text().ok_or(HostError::Invalid("key must be text"))
}

impl Host for FakeHost {
    fn call(&self, function: &str, args: &[Value]) -> Result<Value, HostError> {
        self.state().calls.push(function.to_string());
        self.call_function(function, args)
    }

    fn eval(&self, expr: &str) -> Result<Value, HostError> {
        self.state().calls.push(expr.trim().to_string());
        self.evaluate(expr)
    }

    fn command(&self, command: &str) -> Result<(), HostError> {
        self.run(command)
    }

    fn get(&self, object: &NativeRef, name: &str) -> Result<Value, HostError> {
        let state = self.state.borrow();
        let missing = || HostError::NoSuchAttribute(name.to_string());
        match object {
            NativeRef::Buffer(number) => {
                let buffer = state.buffer(*number)?;
                match name {
                    "name" => Ok(Value::from(buffer.name.as_str())),
                    "number" => Ok(Value::Int(*number)),
                    "valid" => Ok(Value::Bool(true)),
                    _ => Err(missing()),
                }
            }
            NativeRef::Window { tab, number } => {
                let window = state.window(*tab, *number)?;
                match name {
                    "buffer" => Ok(Value::Native(NativeRef::Buffer(window.buffer))),
                    "cursor" => Ok(Value::List(vec![
                        Value::Int(window.cursor.0),
                        Value::Int(window.cursor.1),
                    ])),
                    "height" => Ok(Value::Int(window.height)),
                    "width" => Ok(Value::Int(window.width)),
                    "number" => Ok(Value::Int(*number)),
                    "valid" => Ok(Value::Bool(true)),
                    "tabpage" => {
                        let index = usize::try_from(tab - 1).map_err(|_| missing())?;
                        Ok(Value::Native(NativeRef::TabPage(state.tabs[index].handle)))
                    }
                    _ => Err(missing()),
                }
            }
            NativeRef::TabPage(handle) => {
                let index = state
                    .tab_index(*handle)
                    .ok_or(HostError::Invalid("tab page"))?;
                let tab = &state.tabs[index];
                let window = |n: usize| {
                    Value::Native(NativeRef::Window {
                        tab: index as i64 + 1,
                        number: n as i64 + 1,
                    })
                };
                match name {
                    "number" => Ok(Value::Int(index as i64 + 1)),
                    "windows" => Ok(Value::List((0..tab.windows.len()).map(window).collect())),
                    "window" => Ok(window(tab.current)),
                    "valid" => Ok(Value::Bool(true)),
                    _ => Err(missing()),
                }
            }
            _ => Err(missing()),
        }
    }

    fn set(&self, object: &NativeRef, name: &str, value: Value) -> Result<(), HostError> {
        let mut state = self.state();
        match (object, name) {
            (NativeRef::Buffer(number), "name") => {
                state.buffer_mut(*number)?.name = value.to_text().unwrap_or_default();
                Ok(())
            }
            (NativeRef::Window { tab, number }, "cursor") => {
                let (line, col) = match value.into_list().as_deref() {
                    Some([line, col]) => (line.as_int(), col.as_int()),
                    _ => (None, None),
                };
                let (Some(line), Some(col)) = (line, col) else {
                    return Err(HostError::Invalid("cursor must be a (line, col) pair"));
                };
                let buffer = state.window(*tab, *number)?.buffer;
                let len = state.buffer(buffer)?.lines.len() as i64;
                if line < 1 || line > len {
                    return Err(HostError::Vim("cursor position outside buffer".to_string()));
                }
                state.window_mut(*tab, *number)?.cursor = (line, col);
                Ok(())
            }
            (NativeRef::Window { tab, number }, "height" | "width") => {
                let size = value.as_int().ok_or(HostError::Invalid("size must be a number"))?;
                let window = state.window_mut(*tab, *number)?;
                if name == "height" {
                    window.height = size;
                } else {
                    window.width = size;
                }
                Ok(())
            }
            _ => Err(HostError::NoSuchAttribute(name.to_string())),
        }
    }

    fn valid(&self, object: &NativeRef) -> bool {
        let state = self.state.borrow();
        match object {
            NativeRef::Buffer(number) => state.buffers.contains_key(number),
            NativeRef::Window { tab, number } => state.window_at(*tab, *number).is_some(),
            NativeRef::TabPage(handle) => state.tab_index(*handle).is_some(),
            NativeRef::List(handle) => state.lists.contains_key(handle),
            NativeRef::Dict(handle) => state.dicts.contains_key(handle),
            NativeRef::Options(_) | NativeRef::Vars(_) => state.table(object).is_ok(),
        }
    }

    fn length(&self, object: &NativeRef) -> Result<usize, HostError> {
        let state = self.state.borrow();
        match object {
            NativeRef::Buffer(number) => Ok(state.buffer(*number)?.lines.len()),
            NativeRef::List(handle) => state
                .lists
                .get(handle)
                .map(Vec::len)
                .ok_or(HostError::Invalid("list")),
            _ => Ok(state.table(object)?.len()),
        }
    }

    fn item(&self, object: &NativeRef, key: &Value) -> Result<Value, HostError> {
        let state = self.state.borrow();
        match object {
            NativeRef::Buffer(number) => {
                let lines = &state.buffer(*number)?.lines;
                Ok(Value::from(lines[index(key, lines.len())?].as_str()))
            }
            NativeRef::List(handle) => {
                let items = state.lists.get(handle).ok_or(HostError::Invalid("list"))?;
                Ok(items[index(key, items.len())?].clone())
            }
            _ => {
                let name = text_key(key)?;
                state
                    .table(object)?
                    .get(&name)
                    .cloned()
                    .ok_or(HostError::NoSuchKey(name))
            }
        }
    }

    fn set_item(&self, object: &NativeRef, key: &Value, value: Value) -> Result<(), HostError> {
        let mut state = self.state();
        match object {
            NativeRef::Buffer(number) => {
                let buffer = state.buffer_mut(*number)?;
                buffer.check_modifiable()?;
                let i = index(key, buffer.lines.len())?;
                buffer.lines[i] = value.to_text().unwrap_or_default();
                Ok(())
            }
            NativeRef::List(_) => {
                let items = state.sequence_mut(object)?;
                let i = index(key, items.len())?;
                items[i] = value;
                Ok(())
            }
            NativeRef::Vars(Scope::Vim) => Err(HostError::Vim(
                "Vim(let):E46: Cannot change read-only variable".to_string(),
            )),
            NativeRef::Options(Scope::Global) => {
                let name = text_key(key)?;
                let table = &mut state.global_options;
                match table.get_mut(&name) {
                    Some(slot) => {
                        *slot = value;
                        Ok(())
                    }
                    None => Err(HostError::NoSuchKey(name)),
                }
            }
            _ => {
                let name = text_key(key)?;
                state.table_mut(object)?.insert(name, value);
                Ok(())
            }
        }
    }

    fn del_item(&self, object: &NativeRef, key: &Value) -> Result<(), HostError> {
        let mut state = self.state();
        match object {
            NativeRef::Buffer(_) | NativeRef::List(_) => {
                drop(state);
                let i = key.as_int().ok_or(HostError::Invalid("index must be a number"))?;
                let len = self.length(object)?;
                let i = index(&Value::Int(i), len)?;
                self.splice(object, i..i + 1, Vec::new())
            }
            NativeRef::Options(_) | NativeRef::Vars(Scope::Vim) => {
                Err(HostError::Invalid("cannot delete from this table"))
            }
            _ => {
                let name = text_key(key)?;
                state
                    .table_mut(object)?
                    .remove(&name)
                    .map(|_| ())
                    .ok_or(HostError::NoSuchKey(name))
            }
        }
    }

    fn keys(&self, object: &NativeRef) -> Result<Vec<Value>, HostError> {
        let state = self.state.borrow();
        Ok(state
            .table(object)?
            .keys()
            .map(|k| Value::from(k.as_str()))
            .collect())
    }

    fn splice(
        &self,
        object: &NativeRef,
        range: Range<usize>,
        values: Vec<Value>,
    ) -> Result<(), HostError> {
        let mut state = self.state();
        match object {
            NativeRef::Buffer(number) => {
                let buffer = state.buffer_mut(*number)?;
                buffer.check_modifiable()?;
                let end = range.end.min(buffer.lines.len());
                let start = range.start.min(end);
                let lines = values.into_iter().map(|v| v.to_text().unwrap_or_default());
                buffer.lines.splice(start..end, lines);
                if buffer.lines.is_empty() {
                    buffer.lines.push(String::new());
                }
                Ok(())
            }
            NativeRef::List(_) => {
                let items = state.sequence_mut(object)?;
                let end = range.end.min(items.len());
                let start = range.start.min(end);
                items.splice(start..end, values);
                Ok(())
            }
            _ => Err(HostError::Invalid("not a sequence")),
        }
    }

    fn current(&self, kind: Current) -> Result<NativeRef, HostError> {
        let state = self.state.borrow();
        Ok(match kind {
            Current::Buffer => NativeRef::Buffer(state.current_buffer_number()),
            Current::Window => NativeRef::Window {
                tab: state.current_tab as i64 + 1,
                number: state.tab().current as i64 + 1,
            },
            Current::TabPage => NativeRef::TabPage(state.tab().handle),
        })
    }

    fn set_current(&self, target: &NativeRef) -> Result<(), HostError> {
        let mut state = self.state();
        match target {
            NativeRef::Buffer(number) => {
                state.buffer(*number)?;
                let window = state.current_window()?;
                window.buffer = *number;
                window.cursor = (1, 0);
                Ok(())
            }
            NativeRef::Window { tab, number } => {
                state.window(*tab, *number)?;
                let tab_index = (*tab - 1) as usize;
                state.current_tab = tab_index;
                state.tabs[tab_index].current = (*number - 1) as usize;
                Ok(())
            }
            NativeRef::TabPage(handle) => {
                let index = state
                    .tab_index(*handle)
                    .ok_or(HostError::Invalid("tab page"))?;
                state.current_tab = index;
                Ok(())
            }
            _ => Err(HostError::Invalid("cannot make this current")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_uid_forms() {
        assert_eq!(
            quoted_uid("function('VPE_Call', ['12'])", GENERIC_TRAMPOLINE).as_deref(),
            Some("12")
        );
        assert_eq!(
            quoted_uid(":call VPE_MappingCall('3')<CR>", MAPPING_TRAMPOLINE).as_deref(),
            Some("3")
        );
        assert_eq!(
            quoted_uid(
                "command! -nargs=0 X call VPE_CmdCall('7', <line1>)",
                COMMAND_TRAMPOLINE
            )
            .as_deref(),
            Some("7")
        );
    }

    #[test]
    fn test_parse_map_args() {
        assert_eq!(
            parse_map_args("<buffer> <silent> <F4> :call X()<CR>"),
            (true, "<F4>".to_string(), ":call X()<CR>".to_string())
        );
        assert_eq!(
            parse_map_args("Q gq"),
            (false, "Q".to_string(), "gq".to_string())
        );
    }

    #[test]
    fn test_unknown_unmap_fails() {
        let host = FakeHost::new();
        assert!(host.command("nunmap <F9>").is_err());
        host.command("nnoremap <F9> :echo<CR>").unwrap();
        assert_eq!(host.mapping(Mode::Normal, "<F9>").as_deref(), Some(":echo<CR>"));
        host.command("nunmap <F9>").unwrap();
        assert!(host.mapping(Mode::Normal, "<F9>").is_none());
    }

    #[test]
    fn test_unmodifiable_buffer_rejects_edits() {
        let host = FakeHost::with_lines(&["a"]);
        let options = NativeRef::Options(Scope::Buffer(1));
        host.set_item(&options, &Value::from("modifiable"), Value::Bool(false))
            .unwrap();
        let err = host
            .splice(&NativeRef::Buffer(1), 0..0, vec![Value::from("b")])
            .unwrap_err();
        assert!(matches!(err, HostError::Vim(text) if text.contains("E21")));
    }
}
