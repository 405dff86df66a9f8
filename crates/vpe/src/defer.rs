//! Deferred execution.
//!
//! Work queued with [`Session::call_soon`] runs from a zero-delay host timer,
//! after the current host event has finished. Entries run in the order they
//! were queued.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::callback::target;
use crate::object::Object;
use crate::registry::panic_message;
use crate::session::Session;
use crate::timer::TimerOptions;

type Job = Box<dyn FnOnce(&Session)>;

/// The queue of deferred work.
#[derive(Default)]
pub(crate) struct Deferred {
    queue: VecDeque<(Option<String>, Job)>,
    tokens: HashSet<String>,
    scheduled: bool,
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("pending", &self.queue.len())
            .field("tokens", &self.tokens)
            .field("scheduled", &self.scheduled)
            .finish()
    }
}

impl Deferred {
    /// Queue a job. Returns whether a flush needs scheduling.
    fn push(&mut self, token: Option<String>, job: Job) -> bool {
        if let Some(token) = &token {
            self.tokens.insert(token.clone());
        }
        self.queue.push_back((token, job));
        !std::mem::replace(&mut self.scheduled, true)
    }

    fn take(&mut self) -> VecDeque<(Option<String>, Job)> {
        self.scheduled = false;
        self.tokens.clear();
        std::mem::take(&mut self.queue)
    }
}

impl Session {
    /// Run `f` once the current host event has been handled.
    pub fn call_soon(&self, f: impl FnOnce(&Session) + 'static) {
        self.defer(None, Box::new(f));
    }

    /// Like [`Session::call_soon`], but does nothing if work queued with the
    /// same `token` is still pending. Returns whether `f` was queued.
    pub fn call_soon_once(&self, token: &str, f: impl FnOnce(&Session) + 'static) -> bool {
        if self.deferred.borrow().tokens.contains(token) {
            tracing::trace!(token, "Deferred work already pending");
            return false;
        }
        self.defer(Some(token.to_string()), Box::new(f));
        true
    }

    /// Number of queued jobs.
    #[must_use]
    pub fn deferred_count(&self) -> usize {
        self.deferred.borrow().queue.len()
    }

    /// Run every queued job now. Jobs queued while these run wait for the
    /// next flush. A job that panics is logged and the rest still run.
    /// Returns the number of jobs run.
    pub fn run_deferred(&self) -> usize {
        let jobs = self.deferred.borrow_mut().take();
        let count = jobs.len();
        for (token, job) in jobs {
            tracing::trace!(token = ?token, "Running deferred work");
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| job(self))) {
                let message = panic_message(&*payload);
                tracing::error!(token = ?token, error = %message, "Deferred work panicked");
                self.log_message(&format!("VPE: deferred work panicked: {message}"));
            }
        }
        count
    }

    fn defer(&self, token: Option<String>, job: Job) {
        let needs_flush = self.deferred.borrow_mut().push(token, job);
        if !needs_flush {
            return;
        }
        let flush = target(|session, _| {
            session.run_deferred();
            Ok(Object::None)
        });
        if let Err(err) = self.start_timer(0, flush, TimerOptions::new()) {
            // Left queued; the next successful schedule or an explicit
            // run_deferred picks it up.
            self.deferred.borrow_mut().scheduled = false;
            tracing::warn!(error = %err, "Failed to schedule deferred work");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fake::FakeHost;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_runs_in_order_from_one_timer() {
        let host = Rc::new(FakeHost::new());
        let session = Session::new(Rc::clone(&host));
        let order = Rc::new(RefCell::new(Vec::new()));
        for n in 0..3 {
            let order = Rc::clone(&order);
            session.call_soon(move |_| order.borrow_mut().push(n));
        }
        assert!(order.borrow().is_empty());
        assert_eq!(host.pending_timers().len(), 1);

        let timer = host.pending_timers()[0];
        assert!(host.fire_timer(&session, timer));
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
        assert_eq!(session.deferred_count(), 0);
    }

    #[test]
    fn test_token_suppresses_duplicates_until_run() {
        let session = Session::new(FakeHost::new());
        let hits = Rc::new(RefCell::new(0));
        for _ in 0..3 {
            let hits = Rc::clone(&hits);
            session.call_soon_once("refresh", move |_| *hits.borrow_mut() += 1);
        }
        assert_eq!(session.run_deferred(), 1);
        assert_eq!(*hits.borrow(), 1);

        let again = Rc::clone(&hits);
        assert!(session.call_soon_once("refresh", move |_| *again.borrow_mut() += 1));
    }

    #[test]
    fn test_work_queued_while_running_waits() {
        let host = Rc::new(FakeHost::new());
        let session = Session::new(Rc::clone(&host));
        let ran = Rc::new(RefCell::new(Vec::new()));
        let outer = Rc::clone(&ran);
        session.call_soon(move |session| {
            outer.borrow_mut().push("outer");
            let inner = Rc::clone(&outer);
            session.call_soon(move |_| inner.borrow_mut().push("inner"));
        });
        assert_eq!(session.run_deferred(), 1);
        assert_eq!(*ran.borrow(), vec!["outer"]);
        assert_eq!(session.run_deferred(), 1);
        assert_eq!(*ran.borrow(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_panicking_job_does_not_drop_the_rest() {
        let host = Rc::new(FakeHost::new());
        let session = Session::new(Rc::clone(&host));
        let ran = Rc::new(RefCell::new(Vec::new()));
        session.call_soon(|_| panic!("deferred boom"));
        let sink = Rc::clone(&ran);
        session.call_soon(move |_| sink.borrow_mut().push("second"));

        let timer = host.pending_timers()[0];
        assert!(host.fire_timer(&session, timer));
        assert_eq!(*ran.borrow(), vec!["second"]);
        assert_eq!(session.deferred_count(), 0);
        assert!(host.pending_timers().is_empty());
        assert!(session.log_lines().iter().any(|line| line.contains("deferred boom")));
    }
}
