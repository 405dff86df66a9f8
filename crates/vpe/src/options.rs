//! Option and variable tables.
//!
//! Both are views over a host key-value table. They differ in how writes are
//! allowed, which is captured by [`Access`] rather than by distinct types:
//!
//! - `v:` variables are read-only.
//! - Buffer and window options, and `g:`/`b:`/`w:`/`t:` variables, are
//!   written directly to the host table.
//! - Global options are written to the table when it accepts the key, and
//!   with a `let &g:name = value` command otherwise (global-local options are
//!   not always present in the global table).
//!
//! Options whose values are comma separated lists or strings of single
//! character flags are read as [`ListOption`] values, which support adding
//! and removing list elements.

use std::fmt;
use std::ops::{Add, Deref, Sub};

use crate::error::Error;
use crate::host::{HostError, NativeRef, Scope, Value};
use crate::object::{Object, decode_key};
use crate::session::Session;

/// How a table may be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// No writes allowed.
    ReadOnly,
    /// Writes go straight to the host table.
    Writable,
    /// Writes go to the host table, falling back to a host command for keys
    /// the table does not accept.
    WritableViaCommand,
}

/// A view of a host option table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Options {
    scope: Scope,
    access: Access,
}

impl Options {
    /// The option table for `scope`.
    ///
    /// The global table is writable via command; every other table is
    /// directly writable.
    #[must_use]
    pub const fn for_scope(scope: Scope) -> Self {
        let access = match scope {
            Scope::Global => Access::WritableViaCommand,
            _ => Access::Writable,
        };
        Self { scope, access }
    }

    /// The table's scope.
    #[must_use]
    pub const fn scope(&self) -> Scope {
        self.scope
    }

    /// How the table may be written.
    #[must_use]
    pub const fn access(&self) -> Access {
        self.access
    }

    const fn native(&self) -> NativeRef {
        NativeRef::Options(self.scope)
    }

    /// Read an option.
    ///
    /// For the global table, an option missing from the table is looked up
    /// with the host's `&g:` expression syntax if the host confirms the
    /// option exists; this covers global-local options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchOption`] if the option does not exist.
    pub fn get(&self, session: &Session, name: &str) -> Result<Object, Error> {
        let value = match session.host().item(&self.native(), &Value::from(name)) {
            Ok(value) => value,
            Err(HostError::NoSuchKey(_)) if self.scope == Scope::Global => {
                if !is_option_name(name) {
                    return Err(Error::NoSuchOption(name.to_string()));
                }
                let exists = session.host().eval(&format!("exists('&{name}')"))?;
                if !exists.is_truthy() {
                    return Err(Error::NoSuchOption(name.to_string()));
                }
                session.host().eval(&format!("&g:{name}"))?
            }
            Err(HostError::NoSuchKey(_)) => return Err(Error::NoSuchOption(name.to_string())),
            Err(err) => return Err(err.into()),
        };
        if let Some(kind) = list_kind(name)
            && let Some(text) = value.to_text()
        {
            return Ok(Object::ListOption(ListOption::new(kind, text)));
        }
        session.wrap_or_decode(value)
    }

    /// Read a list-style option.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAListOption`] if `name` is not one of the list or
    /// flag options, or any error from [`get`](Self::get).
    pub fn list_option(&self, session: &Session, name: &str) -> Result<ListOption, Error> {
        if list_kind(name).is_none() {
            return Err(Error::NotAListOption(name.to_string()));
        }
        match self.get(session, name)? {
            Object::ListOption(option) => Ok(option),
            other => Err(Error::unexpected("list option", other.to_host())),
        }
    }

    /// Write an option.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadOnly`] for a read-only table, or the host's
    /// error if it rejects the value.
    pub fn set(&self, session: &Session, name: &str, value: impl Into<Object>) -> Result<(), Error> {
        let value = value.into().to_host();
        match self.access {
            Access::ReadOnly => Err(Error::ReadOnly {
                wrapper: "Options",
                attribute: name.to_string(),
            }),
            Access::Writable => {
                session
                    .host()
                    .set_item(&self.native(), &Value::from(name), value)?;
                Ok(())
            }
            Access::WritableViaCommand => {
                match session
                    .host()
                    .set_item(&self.native(), &Value::from(name), value.clone())
                {
                    Err(HostError::NoSuchKey(_)) if !is_option_name(name) => {
                        Err(Error::NoSuchOption(name.to_string()))
                    }
                    Err(HostError::NoSuchKey(_)) => {
                        session
                            .host()
                            .command(&format!("let &g:{name} = {}", value.to_literal()))?;
                        Ok(())
                    }
                    other => Ok(other?),
                }
            }
        }
    }

    /// The option names in the table.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the table cannot be listed.
    pub fn keys(&self, session: &Session) -> Result<Vec<String>, Error> {
        Ok(session
            .host()
            .keys(&self.native())?
            .into_iter()
            .map(decode_key)
            .collect())
    }
}

/// A view of a host variable table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Variables {
    scope: Scope,
    access: Access,
}

impl Variables {
    /// The variable table for `scope`. Only `v:` variables are read-only.
    #[must_use]
    pub const fn for_scope(scope: Scope) -> Self {
        let access = match scope {
            Scope::Vim => Access::ReadOnly,
            _ => Access::Writable,
        };
        Self { scope, access }
    }

    /// The table's scope.
    #[must_use]
    pub const fn scope(&self) -> Scope {
        self.scope
    }

    /// How the table may be written.
    #[must_use]
    pub const fn access(&self) -> Access {
        self.access
    }

    const fn native(&self) -> NativeRef {
        NativeRef::Vars(self.scope)
    }

    /// Read a variable, or `None` if it is not set.
    ///
    /// # Errors
    ///
    /// Returns an error for host failures other than a missing variable.
    pub fn get(&self, session: &Session, name: &str) -> Result<Option<Object>, Error> {
        match session.host().item(&self.native(), &Value::from(name)) {
            Ok(value) => Ok(Some(session.wrap_or_decode(value)?)),
            Err(HostError::NoSuchKey(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Whether a variable is set.
    ///
    /// # Errors
    ///
    /// Returns an error for host failures other than a missing variable.
    pub fn contains(&self, session: &Session, name: &str) -> Result<bool, Error> {
        Ok(self.get(session, name)?.is_some())
    }

    /// Set a variable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadOnly`] for `v:` variables, or the host's error
    /// if it rejects the value.
    pub fn set(&self, session: &Session, name: &str, value: impl Into<Object>) -> Result<(), Error> {
        self.check_writable(name)?;
        session
            .host()
            .set_item(&self.native(), &Value::from(name), value.into().to_host())?;
        Ok(())
    }

    /// Unset a variable. Unsetting a variable that is not set is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadOnly`] for `v:` variables.
    pub fn remove(&self, session: &Session, name: &str) -> Result<(), Error> {
        self.check_writable(name)?;
        match session.host().del_item(&self.native(), &Value::from(name)) {
            Ok(()) | Err(HostError::NoSuchKey(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// The variable names in the table.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the table cannot be listed.
    pub fn keys(&self, session: &Session) -> Result<Vec<String>, Error> {
        Ok(session
            .host()
            .keys(&self.native())?
            .into_iter()
            .map(decode_key)
            .collect())
    }

    fn check_writable(&self, name: &str) -> Result<(), Error> {
        if self.access == Access::ReadOnly {
            return Err(Error::ReadOnly {
                wrapper: "Variables",
                attribute: name.to_string(),
            });
        }
        Ok(())
    }
}

/// The element convention of a list-style option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    /// Comma separated elements; adding always appends.
    Comma,
    /// Comma separated flags; adding skips flags already present.
    CommaFlags,
    /// Single character flags; adding skips flags already present.
    Flags,
}

const COMMA_OPTIONS: &[&str] = &[
    "backspace",
    "backupcopy",
    "backupdir",
    "backupskip",
    "belloff",
    "breakindentopt",
    "casemap",
    "cdpath",
    "cinkeys",
    "cinoptions",
    "cinwords",
    "clipboard",
    "colorcolumn",
    "comments",
    "complete",
    "completeopt",
    "dictionary",
    "diffopt",
    "directory",
    "display",
    "eventignore",
    "fileencodings",
    "fileformats",
    "fillchars",
    "foldclose",
    "foldmarker",
    "foldopen",
    "isfname",
    "isident",
    "iskeyword",
    "isprint",
    "lispwords",
    "listchars",
    "matchpairs",
    "nrformats",
    "packpath",
    "path",
    "runtimepath",
    "sessionoptions",
    "spellfile",
    "spelllang",
    "spellsuggest",
    "suffixes",
    "suffixesadd",
    "switchbuf",
    "tags",
    "thesaurus",
    "undodir",
    "viewoptions",
    "viminfo",
    "virtualedit",
    "wildignore",
    "wildmode",
    "wildoptions",
];

const COMMA_FLAG_OPTIONS: &[&str] = &["whichwrap"];

const FLAG_OPTIONS: &[&str] = &[
    "breakat",
    "concealcursor",
    "cpoptions",
    "formatoptions",
    "guioptions",
    "mouse",
    "shortmess",
];

/// Whether `name` can be spliced into an `&name` expression: lowercase
/// letters, or a `t_` terminal option.
fn is_option_name(name: &str) -> bool {
    match name.strip_prefix("t_") {
        Some(code) => !code.is_empty() && code.chars().all(|c| c.is_ascii_alphanumeric()),
        None => !name.is_empty() && name.chars().all(|c| c.is_ascii_lowercase()),
    }
}

/// The list convention of option `name`, if it is a list-style option.
#[must_use]
pub fn list_kind(name: &str) -> Option<ListKind> {
    if COMMA_OPTIONS.contains(&name) {
        Some(ListKind::Comma)
    } else if COMMA_FLAG_OPTIONS.contains(&name) {
        Some(ListKind::CommaFlags)
    } else if FLAG_OPTIONS.contains(&name) {
        Some(ListKind::Flags)
    } else {
        None
    }
}

/// The value of a list-style option.
///
/// `+` and `-` treat the value as a set of elements and produce the new
/// option value as a plain string. They do not change the host option; the
/// result has to be written back:
///
/// ```rust,ignore
/// let ww = session.options().list_option(&session, "whichwrap")?;
/// session.options().set(&session, "whichwrap", ww + "h,l")?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListOption {
    kind: ListKind,
    value: String,
}

impl ListOption {
    /// Wrap an option value.
    #[must_use]
    pub fn new(kind: ListKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    /// The list convention.
    #[must_use]
    pub const fn kind(&self) -> ListKind {
        self.kind
    }

    /// The raw option value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Take the raw option value.
    #[must_use]
    pub fn into_string(self) -> String {
        self.value
    }

    fn added(&self, extra: &str) -> String {
        match self.kind {
            ListKind::Flags => {
                let mut value = self.value.clone();
                for flag in extra.chars() {
                    if !value.contains(flag) {
                        value.push(flag);
                    }
                }
                value
            }
            ListKind::Comma | ListKind::CommaFlags => {
                let mut parts: Vec<&str> = split_commas(&self.value).collect();
                for part in split_commas(extra) {
                    if self.kind == ListKind::Comma || !parts.contains(&part) {
                        parts.push(part);
                    }
                }
                parts.join(",")
            }
        }
    }

    fn removed(&self, unwanted: &str) -> String {
        match self.kind {
            ListKind::Flags => self
                .value
                .chars()
                .filter(|flag| !unwanted.contains(*flag))
                .collect(),
            ListKind::Comma | ListKind::CommaFlags => {
                let unwanted: Vec<&str> = split_commas(unwanted).collect();
                split_commas(&self.value)
                    .filter(|part| !unwanted.contains(part))
                    .collect::<Vec<_>>()
                    .join(",")
            }
        }
    }
}

fn split_commas(text: &str) -> impl Iterator<Item = &str> {
    text.split(',').filter(|part| !part.is_empty())
}

impl Add<&str> for ListOption {
    type Output = String;

    fn add(self, extra: &str) -> String {
        self.added(extra)
    }
}

impl Add<&str> for &ListOption {
    type Output = String;

    fn add(self, extra: &str) -> String {
        self.added(extra)
    }
}

impl Sub<&str> for ListOption {
    type Output = String;

    fn sub(self, unwanted: &str) -> String {
        self.removed(unwanted)
    }
}

impl Sub<&str> for &ListOption {
    type Output = String;

    fn sub(self, unwanted: &str) -> String {
        self.removed(unwanted)
    }
}

impl Deref for ListOption {
    type Target = str;

    fn deref(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for ListOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fake::FakeHost;
    use std::rc::Rc;

    #[test]
    fn test_comma_list_add_and_remove() {
        let ww = ListOption::new(ListKind::CommaFlags, "b,s,h");
        assert_eq!(&ww - "s", "b,h");
        let ww = ListOption::new(ListKind::CommaFlags, "b,h");
        assert_eq!(&ww + "s", "b,h,s");
        assert_eq!(&ww + "h", "b,h");
    }

    #[test]
    fn test_plain_comma_list_always_appends() {
        let path = ListOption::new(ListKind::Comma, ".,/usr/include");
        assert_eq!(&path + ".", ".,/usr/include,.");
        let empty = ListOption::new(ListKind::Comma, "");
        assert_eq!(empty + "a,b", "a,b");
    }

    #[test]
    fn test_flag_list_add_and_remove() {
        let mouse = ListOption::new(ListKind::Flags, "na");
        let added = &mouse + "nvic";
        assert_eq!(added, "navic");
        let mouse = ListOption::new(ListKind::Flags, added);
        assert_eq!(mouse - "ni", "avc");
    }

    #[test]
    fn test_list_kind_lookup() {
        assert_eq!(list_kind("whichwrap"), Some(ListKind::CommaFlags));
        assert_eq!(list_kind("formatoptions"), Some(ListKind::Flags));
        assert_eq!(list_kind("path"), Some(ListKind::Comma));
        assert_eq!(list_kind("tabstop"), None);
    }

    #[test]
    fn test_list_options_read_as_list_values() {
        let host = Rc::new(FakeHost::new());
        host.set_global_option("whichwrap", Value::from("b,s"));
        let session = Session::new(Rc::clone(&host));
        let options = session.options();

        let ww = options.list_option(&session, "whichwrap").unwrap();
        options.set(&session, "whichwrap", ww + "h").unwrap();
        assert_eq!(
            options.get(&session, "whichwrap").unwrap().as_text(),
            Some("b,s,h")
        );
        assert!(matches!(
            options.list_option(&session, "tabstop"),
            Err(Error::NotAListOption(_))
        ));
    }

    #[test]
    fn test_global_local_option_falls_back_to_expression() {
        let host = Rc::new(FakeHost::new());
        host.set_global_local_option("undolevels", Value::Int(1000));
        let session = Session::new(Rc::clone(&host));
        let options = session.options();

        assert_eq!(options.get(&session, "undolevels").unwrap(), Object::Int(1000));
        options.set(&session, "undolevels", 50_i64).unwrap();
        assert!(host.commands().contains(&"let &g:undolevels = 50".to_string()));
        assert_eq!(options.get(&session, "undolevels").unwrap(), Object::Int(50));
        assert!(matches!(
            options.get(&session, "nosuchoption"),
            Err(Error::NoSuchOption(_))
        ));
    }

    #[test]
    fn test_malformed_option_names_never_reach_expressions() {
        let host = Rc::new(FakeHost::new());
        let session = Session::new(Rc::clone(&host));
        let options = session.options();
        let name = "ts') | call system('x";

        assert!(matches!(options.get(&session, name), Err(Error::NoSuchOption(_))));
        assert!(matches!(
            options.set(&session, name, 4_i64),
            Err(Error::NoSuchOption(_))
        ));
        assert!(host.calls().iter().all(|c| !c.contains("system")));
        assert!(host.commands().iter().all(|c| !c.contains("system")));
        assert!(is_option_name("undolevels"));
        assert!(is_option_name("t_Co"));
        assert!(!is_option_name("Undo"));
        assert!(!is_option_name(""));
    }

    #[test]
    fn test_vim_variables_are_read_only() {
        let session = Session::new(FakeHost::new());
        let vvars = session.vvars();
        assert!(matches!(
            vvars.set(&session, "count", 3_i64),
            Err(Error::ReadOnly { wrapper: "Variables", .. })
        ));

        let gvars = session.vars();
        gvars.set(&session, "my_flag", true).unwrap();
        assert_eq!(gvars.get(&session, "my_flag").unwrap(), Some(Object::Bool(true)));
        gvars.remove(&session, "my_flag").unwrap();
        assert_eq!(gvars.get(&session, "my_flag").unwrap(), None);
        gvars.remove(&session, "my_flag").unwrap();
    }
}
