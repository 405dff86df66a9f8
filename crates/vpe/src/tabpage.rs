//! Tab page proxies.

use std::fmt;
use std::rc::Rc;

use crate::error::Error;
use crate::host::{NativeRef, Scope};
use crate::object::Object;
use crate::options::Variables;
use crate::proxy::{Delegating, LocalStore};
use crate::session::Session;
use crate::window::Window;

/// A proxy for a host tab page.
///
/// Tab pages are keyed by the host's opaque handle. Handles can be reused
/// after a tab page is closed, so the identity cache drops entries for closed
/// tab pages before wrapping a new one.
#[derive(Clone)]
pub struct TabPage(Rc<TabPageInner>);

struct TabPageInner {
    handle: u64,
    locals: LocalStore,
}

impl TabPage {
    pub(crate) fn new(handle: u64) -> Self {
        Self(Rc::new(TabPageInner {
            handle,
            locals: LocalStore::default(),
        }))
    }

    /// The opaque host handle.
    #[must_use]
    pub fn handle(&self) -> u64 {
        self.0.handle
    }

    /// Whether the tab page is still open.
    #[must_use]
    pub fn valid(&self, session: &Session) -> bool {
        session.host().valid(&NativeRef::TabPage(self.0.handle))
    }

    /// The tab page number (1-based).
    ///
    /// # Errors
    ///
    /// Returns the host's error if the tab page has been closed.
    pub fn number(&self, session: &Session) -> Result<i64, Error> {
        let value = self.get(session, "number")?;
        value
            .as_int()
            .ok_or_else(|| Error::unexpected("tab page number", value.to_host()))
    }

    /// The windows in this tab page, in order.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the tab page has been closed.
    pub fn windows(&self, session: &Session) -> Result<Vec<Window>, Error> {
        let value = self.get(session, "windows")?;
        let Some(items) = value.as_list() else {
            return Err(Error::unexpected("tab page windows", value.to_host()));
        };
        items
            .iter()
            .map(|item| match item {
                Object::Window(window) => Ok(window.clone()),
                other => Err(Error::unexpected("tab page window", other.to_host())),
            })
            .collect()
    }

    /// The current window of this tab page.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the tab page has been closed.
    pub fn window(&self, session: &Session) -> Result<Window, Error> {
        match self.get(session, "window")? {
            Object::Window(window) => Ok(window),
            other => Err(Error::unexpected("tab page window", other.to_host())),
        }
    }

    /// The tab page's `t:` variables.
    #[must_use]
    pub fn vars(&self) -> Variables {
        Variables::for_scope(Scope::TabPage(self.0.handle))
    }

    /// Values stored on this proxy.
    #[must_use]
    pub fn store(&self) -> &LocalStore {
        &self.0.locals
    }
}

impl Delegating for TabPage {
    const WRAPPER: &'static str = "TabPage";
    const WRITABLE: &'static [&'static str] = &[];

    fn native(&self, _session: &Session) -> Result<NativeRef, Error> {
        Ok(NativeRef::TabPage(self.0.handle))
    }

    fn locals(&self) -> Option<&LocalStore> {
        Some(&self.0.locals)
    }
}

impl PartialEq for TabPage {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for TabPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TabPage")
            .field("handle", &self.0.handle)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Wrap a tab page by handle.
    ///
    /// Closed tab pages are evicted from the identity cache on every lookup,
    /// so a reused handle never resolves to a stale proxy.
    pub fn wrap_tabpage(&self, handle: u64) -> TabPage {
        let mut tabpages = self.tabpages.borrow_mut();
        let pruned = tabpages.prune(|t| t.valid(self));
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned closed tab pages from identity cache");
        }
        tabpages.get_or_insert_with(handle, || TabPage::new(handle))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fake::FakeHost;

    #[test]
    fn test_tabpage_identity() {
        let host = Rc::new(FakeHost::new());
        let session = Session::new(Rc::clone(&host));
        let first = session.current_tabpage().unwrap();
        assert_eq!(session.current_tabpage().unwrap(), first);
        assert_eq!(first.number(&session).unwrap(), 1);
        assert_eq!(first.windows(&session).unwrap().len(), 1);
    }

    #[test]
    fn test_reused_handle_gets_fresh_proxy() {
        let host = Rc::new(FakeHost::new());
        let session = Session::new(Rc::clone(&host));
        let handle = host.new_tab();
        let stale = session.wrap_tabpage(handle);
        stale.store().insert("marker", Object::Int(1));

        host.close_tab(handle);
        // Any wrap after the close evicts the stale entry.
        session.current_tabpage().unwrap();
        assert!(!stale.valid(&session));
        host.new_tab_with_handle(handle);
        let fresh = session.wrap_tabpage(handle);
        assert_ne!(fresh, stale);
        assert!(!fresh.store().contains("marker"));
    }

    #[test]
    fn test_tabpage_attributes_are_read_only() {
        let session = Session::new(FakeHost::new());
        let tab = session.current_tabpage().unwrap();
        assert!(matches!(
            tab.set(&session, "number", Object::Int(3)),
            Err(Error::ReadOnly { wrapper: "TabPage", .. })
        ));
    }
}
