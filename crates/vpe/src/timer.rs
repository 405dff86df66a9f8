//! Host timers that call Rust callbacks.

use std::rc::Rc;

use crate::callback::{CallbackId, CallbackKind, CallbackOptions, Target, TargetRef};
use crate::error::Error;
use crate::host::Value;
use crate::session::Session;

/// How many times a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Repeat {
    /// A fixed number of times.
    Times(u32),
    /// Until stopped.
    Forever,
}

impl Default for Repeat {
    fn default() -> Self {
        Self::Times(1)
    }
}

impl Repeat {
    const fn as_host(self) -> i64 {
        match self {
            Self::Times(n) => n as i64,
            Self::Forever => -1,
        }
    }

    const fn fires(self) -> Option<u32> {
        match self {
            Self::Times(n) => Some(n),
            Self::Forever => None,
        }
    }
}

/// Options for [`Session::start_timer`].
#[derive(Debug, Default)]
pub struct TimerOptions {
    /// How many times to fire.
    pub repeat: Repeat,
    /// Pass the host's timer identifier as the first argument.
    pub pass_timer: bool,
    /// Fixed arguments and cleanup. `once` is ignored; use `repeat`.
    pub callback: CallbackOptions,
}

impl TimerOptions {
    /// Fire once, without the timer identifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how many times to fire.
    #[must_use]
    pub const fn with_repeat(mut self, repeat: Repeat) -> Self {
        self.repeat = repeat;
        self
    }

    /// Pass the timer identifier to the callback.
    #[must_use]
    pub const fn pass_timer(mut self) -> Self {
        self.pass_timer = true;
        self
    }

    /// Set fixed arguments and cleanup.
    #[must_use]
    pub fn with_callback(mut self, callback: CallbackOptions) -> Self {
        self.callback = callback;
        self
    }
}

/// A running host timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    id: CallbackId,
    timer_id: i64,
}

impl Timer {
    /// The callback behind this timer.
    #[must_use]
    pub const fn id(&self) -> CallbackId {
        self.id
    }

    /// The host's timer identifier.
    #[must_use]
    pub const fn timer_id(&self) -> i64 {
        self.timer_id
    }

    /// Stop the timer. Returns whether it was still running.
    pub fn stop(&self, session: &Session) -> bool {
        session.remove(self.id)
    }

    /// Whether the timer has fires left and has not been stopped.
    #[must_use]
    pub fn is_active(&self, session: &Session) -> bool {
        session.is_registered(self.id)
    }
}

impl Session {
    /// Start a host timer that calls `target` every `ms` milliseconds.
    ///
    /// The registry holds the target strongly until the timer has fired the
    /// requested number of times or is stopped.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the timer cannot be started.
    pub fn start_timer(
        &self,
        ms: u64,
        target: Rc<Target>,
        options: TimerOptions,
    ) -> Result<Timer, Error> {
        let TimerOptions {
            repeat,
            pass_timer,
            callback,
        } = options;
        let kind = CallbackKind::Timer { pass_timer };
        let id = self.register_kind(
            TargetRef::strong(target),
            callback,
            kind,
            Some(repeat.fires()),
        );
        let started = self.host().eval(&format!(
            "timer_start({ms}, {}, {{'repeat': {}}})",
            id.as_funcref(),
            repeat.as_host()
        ));
        let timer_id = match started {
            Ok(value) => match value.as_int() {
                Some(tid) => tid,
                None => {
                    self.discard(id);
                    return Err(Error::unexpected("timer id", value));
                }
            },
            Err(err) => {
                self.discard(id);
                return Err(err.into());
            }
        };

        self.add_cleanup(id, move |session| {
            if let Err(err) = session.host().call("timer_stop", &[Value::Int(timer_id)]) {
                tracing::debug!(timer_id, error = %err, "Timer cleanup failed");
            }
        });
        tracing::debug!(uid = id.get(), timer_id, ms, ?repeat, "Started timer");
        Ok(Timer { id, timer_id })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Object;
    use crate::callback::target;
    use crate::fake::FakeHost;
    use std::cell::RefCell;

    #[test]
    fn test_single_shot_timer() {
        let host = Rc::new(FakeHost::new());
        let session = Session::new(Rc::clone(&host));
        let fired = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&fired);
        let timer = session
            .start_timer(
                10,
                target(move |_, args| {
                    sink.borrow_mut().push(args.positional);
                    Ok(Object::None)
                }),
                TimerOptions::new()
                    .pass_timer()
                    .with_callback(CallbackOptions::new().with_arg("x")),
            )
            .unwrap();
        assert!(timer.is_active(&session));
        assert!(host.fire_timer(&session, timer.timer_id()));

        assert_eq!(
            *fired.borrow(),
            vec![vec![Object::Int(timer.timer_id()), Object::from("x")]]
        );
        assert!(!timer.is_active(&session));
        assert!(!host.fire_timer(&session, timer.timer_id()));
    }

    #[test]
    fn test_repeat_counts_down() {
        let host = Rc::new(FakeHost::new());
        let session = Session::new(Rc::clone(&host));
        let count = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&count);
        let timer = session
            .start_timer(
                5,
                target(move |_, _| {
                    *sink.borrow_mut() += 1;
                    Ok(Object::None)
                }),
                TimerOptions::new().with_repeat(Repeat::Times(3)),
            )
            .unwrap();
        for _ in 0..5 {
            host.fire_timer(&session, timer.timer_id());
        }
        assert_eq!(*count.borrow(), 3);
        assert!(!timer.is_active(&session));
    }

    #[test]
    fn test_forever_until_stopped() {
        let host = Rc::new(FakeHost::new());
        let session = Session::new(Rc::clone(&host));
        let timer = session
            .start_timer(
                5,
                target(|_, _| Ok(Object::None)),
                TimerOptions::new().with_repeat(Repeat::Forever),
            )
            .unwrap();
        for _ in 0..10 {
            assert!(host.fire_timer(&session, timer.timer_id()));
        }
        assert!(timer.stop(&session));
        assert!(!host.fire_timer(&session, timer.timer_id()));
    }
}
