//! Key mappings that call Rust callbacks.
//!
//! The host's mapping mechanism passes nothing to the right-hand side, so a
//! mapping callback's [`MappingInfo`] is built from host state at the moment
//! of invocation: the mode is known from the registration, and in visual
//! mode the selection is read back from the `'<` and `'>` marks.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use crate::callback::{CallbackId, CallbackKind, CallbackOptions, TargetRef};
use crate::error::Error;
use crate::host::Value;
use crate::object::Object;
use crate::registry::MAPPING_TRAMPOLINE;
use crate::session::Session;

/// The mode a mapping applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Normal mode.
    Normal,
    /// Visual and select mode, via `xnoremap`.
    Visual,
    /// Operator-pending mode.
    OpPending,
    /// Insert mode. The callback's text result is inserted.
    Insert,
    /// Command-line mode. The callback's text result is inserted.
    Command,
}

impl Mode {
    /// The mode's name, as seen in [`MappingInfo::mode`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Visual => "visual",
            Self::OpPending => "op-pending",
            Self::Insert => "insert",
            Self::Command => "command",
        }
    }

    /// The prefix of the host's map commands for this mode.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Normal => "n",
            Self::Visual => "x",
            Self::OpPending => "o",
            Self::Insert => "i",
            Self::Command => "c",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The kind of visual selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VisualMode {
    /// Characterwise (`v`).
    Character,
    /// Linewise (`V`).
    Line,
    /// Blockwise (`CTRL-V`).
    Block,
}

impl VisualMode {
    /// Parse the result of the host's `visualmode()`.
    #[must_use]
    pub fn from_host(text: &str) -> Option<Self> {
        match text {
            "v" => Some(Self::Character),
            "V" => Some(Self::Line),
            "\u{16}" => Some(Self::Block),
            _ => None,
        }
    }

    /// The sub-mode's name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Line => "line",
            Self::Block => "block",
        }
    }
}

/// What a mapping callback is told about its invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingInfo {
    /// The mapping's mode.
    pub mode: Mode,
    /// The mapped key sequence.
    pub keys: String,
    /// The selection kind, in visual mode only.
    pub vmode: Option<VisualMode>,
    /// Selection start as (1-based line, 1-based column), in visual mode
    /// only.
    pub start_cursor: Option<(i64, i64)>,
    /// Selection end as (1-based line, 1-based column), in visual mode only.
    pub end_cursor: Option<(i64, i64)>,
}

impl MappingInfo {
    /// The selected lines as a 0-based half-open range, in visual mode only.
    #[must_use]
    pub fn line_range(&self) -> Option<Range<usize>> {
        let (start, _) = self.start_cursor?;
        let (end, _) = self.end_cursor?;
        let start = usize::try_from(start - 1).ok()?;
        let end = usize::try_from(end).ok()?;
        Some(start..end)
    }

    /// Build the record from current host state.
    pub(crate) fn capture(session: &Session, mode: Mode, keys: &str) -> Result<Self, Error> {
        let mut info = Self {
            mode,
            keys: keys.to_string(),
            vmode: None,
            start_cursor: None,
            end_cursor: None,
        };
        if mode == Mode::Visual {
            let vmode = session.host().call("visualmode", &[])?;
            info.vmode = vmode.to_text().as_deref().and_then(VisualMode::from_host);
            info.start_cursor = Some(mark_position(session, "'<")?);
            info.end_cursor = Some(mark_position(session, "'>")?);
        }
        Ok(info)
    }

    /// Marshal as a host dictionary.
    #[must_use]
    pub fn to_host(&self) -> Value {
        let position = |pos: Option<(i64, i64)>| match pos {
            Some((line, col)) => Value::List(vec![Value::Int(line), Value::Int(col)]),
            None => Value::Nil,
        };
        Value::Dict(BTreeMap::from([
            ("mode".to_string(), Value::from(self.mode.name())),
            ("keys".to_string(), Value::from(self.keys.as_str())),
            (
                "vmode".to_string(),
                self.vmode.map_or(Value::Nil, |v| Value::from(v.name())),
            ),
            ("start_cursor".to_string(), position(self.start_cursor)),
            ("end_cursor".to_string(), position(self.end_cursor)),
        ]))
    }
}

fn mark_position(session: &Session, mark: &str) -> Result<(i64, i64), Error> {
    let value = session.host().call("getpos", &[Value::from(mark)])?;
    let fields = match &value {
        Value::List(fields) if fields.len() >= 3 => fields,
        _ => return Err(Error::unexpected("mark position", value)),
    };
    match (fields[1].as_int(), fields[2].as_int()) {
        (Some(line), Some(col)) => Ok((line, col)),
        _ => Err(Error::unexpected("mark position", value.clone())),
    }
}

/// Options for [`Session::map`].
#[derive(Debug)]
pub struct MapOptions {
    /// Make the mapping local to the current buffer.
    pub buffer: bool,
    /// Do not echo the right-hand side.
    pub silent: bool,
    /// Fail if the mapping already exists.
    pub unique: bool,
    /// Do not wait for longer mappings.
    pub nowait: bool,
    /// Use a `<Cmd>` right-hand side, which does not change mode.
    pub command: bool,
    /// Pass a [`MappingInfo`] as the first argument.
    pub pass_info: bool,
    /// Fixed arguments and lifetime options.
    pub callback: CallbackOptions,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            buffer: true,
            silent: true,
            unique: false,
            nowait: false,
            command: false,
            pass_info: true,
            callback: CallbackOptions::default(),
        }
    }
}

impl MapOptions {
    /// Default options: buffer-local, silent, with mapping info.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the mapping global rather than buffer-local.
    #[must_use]
    pub const fn global(mut self) -> Self {
        self.buffer = false;
        self
    }

    /// Set whether the right-hand side is echoed.
    #[must_use]
    pub const fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Fail if the mapping already exists.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Do not wait for longer mappings.
    #[must_use]
    pub const fn nowait(mut self) -> Self {
        self.nowait = true;
        self
    }

    /// Use a `<Cmd>` right-hand side.
    #[must_use]
    pub const fn command(mut self) -> Self {
        self.command = true;
        self
    }

    /// Set whether a [`MappingInfo`] is passed.
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

    fn flags(&self) -> String {
        [
            (self.buffer, "<buffer> "),
            (self.silent, "<silent> "),
            (self.nowait, "<nowait> "),
            (self.unique, "<unique> "),
        ]
        .into_iter()
        .filter_map(|(on, flag)| on.then_some(flag))
        .collect()
    }
}

/// The right-hand side that invokes callback `id`.
fn callback_rhs(mode: Mode, id: CallbackId, command_style: bool) -> String {
    let call = format!("{MAPPING_TRAMPOLINE}('{id}')");
    if command_style {
        return format!("<Cmd>call {call}<CR>");
    }
    match mode {
        Mode::Normal | Mode::OpPending => format!(":call {call}<CR>"),
        Mode::Visual => format!(":<C-U>call {call}<CR>"),
        Mode::Insert | Mode::Command => format!("<C-R>={call}<CR>"),
    }
}

fn unmap_command(mode: Mode, keys: &str, buffer: bool) -> String {
    let buffer = if buffer { "<buffer> " } else { "" };
    format!("{}unmap {buffer}{keys}", mode.prefix())
}

impl Session {
    /// Map `keys` in `mode` to a callback.
    ///
    /// The mapping is removed when the callback is removed, or on the first
    /// key press after a weakly held target has been dropped.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the map command fails.
    pub fn map(
        &self,
        mode: Mode,
        keys: &str,
        target: impl Into<TargetRef>,
        options: MapOptions,
    ) -> Result<CallbackId, Error> {
        let buffer = if options.buffer {
            Some(self.current_buffer()?.number())
        } else {
            None
        };
        let flags = options.flags();
        let kind = CallbackKind::Mapping {
            mode,
            keys: keys.to_string(),
            buffer,
            pass_info: options.pass_info,
        };
        let id = self.register_kind(target.into(), options.callback, kind, None);
        let rhs = callback_rhs(mode, id, options.command);
        if let Err(err) = self
            .host()
            .command(&format!("{}noremap {flags}{keys} {rhs}", mode.prefix()))
        {
            self.discard(id);
            return Err(err.into());
        }

        let unmap = unmap_command(mode, keys, buffer.is_some());
        self.add_cleanup(id, move |session| {
            let run = |session: &Session| -> Result<(), Error> {
                session.host().command(&unmap)?;
                Ok(())
            };
            // A buffer-local mapping lives in the buffer it was made in.
            let result = match buffer {
                Some(number) => session.with_buffer(number, run).map(|_| ()),
                None => run(session),
            };
            if let Err(err) = result {
                tracing::debug!(command = %unmap, error = %err, "Unmap during cleanup failed");
            }
        });
        tracing::debug!(uid = id.get(), mode = %mode, keys, "Mapped keys to callback");
        Ok(id)
    }

    /// Map `keys` in `mode` to a plain right-hand side.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the map command fails.
    pub fn map_keys(&self, mode: Mode, keys: &str, rhs: &str, buffer: bool) -> Result<(), Error> {
        let buffer = if buffer { "<buffer> " } else { "" };
        self.host()
            .command(&format!("{}noremap {buffer}{keys} {rhs}", mode.prefix()))?;
        Ok(())
    }

    /// Remove a mapping and forget any callback behind it.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the unmap command fails.
    pub fn unmap(&self, mode: Mode, keys: &str, buffer: bool) -> Result<(), Error> {
        let local = if buffer {
            Some(self.current_buffer()?.number())
        } else {
            None
        };
        let stale = self.registry.borrow().find(|kind| {
            matches!(
                kind,
                CallbackKind::Mapping { mode: m, keys: k, buffer: b, .. }
                    if *m == mode && k == keys && *b == local
            )
        });
        for uid in stale {
            self.discard(CallbackId(uid));
        }
        self.host().command(&unmap_command(mode, keys, buffer))?;
        Ok(())
    }
}

/// Arguments for a mapping callback: the info record, if wanted, then the
/// fixed arguments.
pub(crate) fn unmarshal(
    session: &Session,
    mode: Mode,
    keys: &str,
    pass_info: bool,
    fixed: Vec<Object>,
) -> Result<Vec<Object>, Error> {
    if !pass_info {
        return Ok(fixed);
    }
    let mut positional = Vec::with_capacity(fixed.len() + 1);
    positional.push(Object::Mapping(MappingInfo::capture(session, mode, keys)?));
    positional.extend(fixed);
    Ok(positional)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::callback::target;
    use crate::fake::FakeHost;
    use crate::registry::CallShape;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_rhs_per_mode() {
        let id = CallbackId(5);
        assert_eq!(
            callback_rhs(Mode::Normal, id, false),
            ":call VPE_MappingCall('5')<CR>"
        );
        assert_eq!(
            callback_rhs(Mode::Visual, id, false),
            ":<C-U>call VPE_MappingCall('5')<CR>"
        );
        assert_eq!(
            callback_rhs(Mode::Insert, id, false),
            "<C-R>=VPE_MappingCall('5')<CR>"
        );
        assert_eq!(
            callback_rhs(Mode::Insert, id, true),
            "<Cmd>call VPE_MappingCall('5')<CR>"
        );
    }

    #[test]
    fn test_map_issues_command() {
        let host = Rc::new(FakeHost::new());
        let session = Session::new(Rc::clone(&host));
        let t = target(|_, _| Ok(Object::None));
        let id = session.map(Mode::Normal, "<F4>", &t, MapOptions::new()).unwrap();
        assert!(host.commands().contains(&format!(
            "nnoremap <buffer> <silent> <F4> :call VPE_MappingCall('{id}')<CR>"
        )));

        assert!(session.remove(id));
        assert!(host.commands().contains(&"nunmap <buffer> <F4>".to_string()));
    }

    #[test]
    fn test_visual_info_reads_marks() {
        let host = Rc::new(FakeHost::with_lines(&["a", "b", "c", "d", "e"]));
        let session = Session::new(Rc::clone(&host));
        let seen = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&seen);
        let t = target(move |_, args| {
            *sink.borrow_mut() = args.mapping_info().cloned();
            Ok(Object::None)
        });
        let id = session
            .map(Mode::Visual, "<leader>x", &t, MapOptions::new())
            .unwrap();

        host.set_visual("V", (2, 1), (4, 1));
        session.dispatch(CallShape::Mapping, &id.to_string(), vec![]);
        let info = seen.borrow().clone().unwrap();
        assert_eq!(info.vmode, Some(VisualMode::Line));
        assert_eq!(info.line_range(), Some(1..4));
    }

    #[test]
    fn test_insert_mapping_returns_text() {
        let session = Session::new(FakeHost::new());
        let t = target(|_, _| Ok(Object::from("inserted")));
        let id = session
            .map(Mode::Insert, "<C-J>", &t, MapOptions::new().with_info(false))
            .unwrap();
        assert_eq!(
            session.dispatch(CallShape::Mapping, &id.to_string(), vec![]),
            Value::from("inserted")
        );
    }

    #[test]
    fn test_unmap_forgets_callback() {
        let host = Rc::new(FakeHost::new());
        let session = Session::new(Rc::clone(&host));
        let t = target(|_, _| Ok(Object::None));
        let id = session.map(Mode::Normal, "Q", &t, MapOptions::new()).unwrap();
        session.unmap(Mode::Normal, "Q", true).unwrap();
        assert!(!session.is_registered(id));
    }

    #[test]
    fn test_buffer_local_cleanup_targets_its_buffer() {
        let host = Rc::new(FakeHost::with_lines(&["one"]));
        let session = Session::new(Rc::clone(&host));
        let home = session.current_buffer().unwrap();
        let other = session.wrap_buffer(host.add_buffer(&["two"]));
        let t = target(|_, _| Ok(Object::None));
        let id = session.map(Mode::Normal, "Q", &t, MapOptions::new()).unwrap();

        {
            let _away = session.temp_active_buffer(&other).unwrap();
            assert!(session.remove(id));
        }
        assert_eq!(session.current_buffer().unwrap(), home);
        assert!(host.mapping(Mode::Normal, "Q").is_none());

        let hits = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&hits);
        let unrelated = target(move |_, _| {
            *counter.borrow_mut() += 1;
            Ok(Object::None)
        });
        let reused = session.register(&unrelated, crate::CallbackOptions::new());
        assert_eq!(reused, id);
        assert_eq!(host.press(&session, Mode::Normal, "Q"), None);
        assert_eq!(*hits.borrow(), 0);
    }

    #[test]
    fn test_cleanup_skips_wiped_buffer() {
        let host = Rc::new(FakeHost::with_lines(&["one"]));
        let session = Session::new(Rc::clone(&host));
        let scratch = session.wrap_buffer(host.add_buffer(&["two"]));
        let t = target(|_, _| Ok(Object::None));
        let id = {
            let _there = session.temp_active_buffer(&scratch).unwrap();
            session.map(Mode::Normal, "Q", &t, MapOptions::new()).unwrap()
        };
        host.wipe_buffer(scratch.number());
        let before = host.commands().len();
        assert!(session.remove(id));
        assert_eq!(host.commands().len(), before);
    }
}
