//! Cooperative per-connection coroutine.
//!
//! A coroutine is a future the owning worker polls by hand; there is no
//! runtime underneath. [`YieldPoint::io`] is the only suspension point:
//! awaiting it parks the coroutine exactly once and records which readiness
//! direction it is blocked on, so the caller of [`Coro::resume`] knows
//! whether to arm read or write interest before the next resume.
//!
//! Exactly one worker thread ever owns a given coroutine; nothing here is
//! `Send` and nothing needs to be.

use std::{
    cell::Cell,
    future::Future,
    pin::Pin,
    rc::Rc,
    sync::Arc,
    task::{Context, Poll, Wake, Waker},
};

/// The readiness direction a suspended coroutine is blocked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wants {
    Read,
    Write,
}

/// Outcome of one [`Coro::resume`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resume {
    /// Suspended at a yield point, blocked on readable data.
    AwaitingRead,
    /// Suspended at a yield point, blocked on writable space.
    AwaitingWrite,
    /// Ran to completion; resuming again is a caller bug.
    Finished,
}

impl Resume {
    /// Whether the coroutine asked for another resume.
    #[inline(always)]
    pub(crate) fn should_resume(&self) -> bool {
        !matches!(self, Resume::Finished)
    }

    /// The interest direction this outcome implies. A finished coroutine
    /// wants its connection parked on read, awaiting the next request.
    #[inline(always)]
    pub(crate) fn wants_write(&self) -> bool {
        matches!(self, Resume::AwaitingWrite)
    }
}

pub(crate) struct Coro {
    task: Pin<Box<dyn Future<Output = ()>>>,
    wants: Rc<Cell<Wants>>,
}

impl Coro {
    /// Arms `entry` with a yield handle and boxes its future. The body does
    /// not run until the first [`resume`](Self::resume).
    pub(crate) fn new<F, Fut>(entry: F) -> Self
    where
        F: FnOnce(YieldPoint) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        let wants = Rc::new(Cell::new(Wants::Read));
        let task = Box::pin(entry(YieldPoint {
            wants: wants.clone(),
        }));

        Self { task, wants }
    }

    /// Runs the coroutine until its next yield point or completion.
    pub(crate) fn resume(&mut self) -> Resume {
        let waker = Waker::from(Arc::new(NoopWake));
        let mut cx = Context::from_waker(&waker);

        match self.task.as_mut().poll(&mut cx) {
            Poll::Ready(()) => Resume::Finished,
            Poll::Pending => match self.wants.get() {
                Wants::Read => Resume::AwaitingRead,
                Wants::Write => Resume::AwaitingWrite,
            },
        }
    }
}

impl std::fmt::Debug for Coro {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coro").field("wants", &self.wants.get()).finish()
    }
}

/// Handle a coroutine body uses to suspend itself.
#[derive(Clone)]
pub(crate) struct YieldPoint {
    wants: Rc<Cell<Wants>>,
}

impl YieldPoint {
    /// Suspends until the scheduler resumes the coroutine again, recording
    /// the readiness direction the body is blocked on.
    #[inline]
    pub(crate) fn io(&self, wants: Wants) -> BlockedOnIo {
        self.wants.set(wants);
        BlockedOnIo { yielded: false }
    }
}

/// Pending exactly once, then ready: the shape of a cooperative yield.
pub(crate) struct BlockedOnIo {
    yielded: bool,
}

impl Future for BlockedOnIo {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<()> {
        match self.yielded {
            true => Poll::Ready(()),
            false => {
                self.yielded = true;
                Poll::Pending
            }
        }
    }
}

// Resumption is driven by readiness events, never by wake-ups.
struct NoopWake;

impl Wake for NoopWake {
    fn wake(self: Arc<Self>) {}
    fn wake_by_ref(self: &Arc<Self>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_then_finishes() {
        let mut coro = Coro::new(|yield_point| async move {
            yield_point.io(Wants::Read).await;
            yield_point.io(Wants::Write).await;
        });

        assert_eq!(coro.resume(), Resume::AwaitingRead);
        assert_eq!(coro.resume(), Resume::AwaitingWrite);
        assert_eq!(coro.resume(), Resume::Finished);
    }

    #[test]
    fn immediate_completion() {
        let mut coro = Coro::new(|_| async {});
        assert_eq!(coro.resume(), Resume::Finished);
    }

    #[test]
    fn body_runs_lazily_and_sees_state() {
        let seen = Rc::new(Cell::new(0));
        let inner = seen.clone();

        let mut coro = Coro::new(move |yield_point| async move {
            inner.set(1);
            yield_point.io(Wants::Read).await;
            inner.set(2);
        });

        assert_eq!(seen.get(), 0); // nothing runs before the first resume

        assert_eq!(coro.resume(), Resume::AwaitingRead);
        assert_eq!(seen.get(), 1);

        assert_eq!(coro.resume(), Resume::Finished);
        assert_eq!(seen.get(), 2);
    }

    #[test]
    fn resume_outcomes() {
        assert!(Resume::AwaitingRead.should_resume());
        assert!(Resume::AwaitingWrite.should_resume());
        assert!(!Resume::Finished.should_resume());

        assert!(!Resume::AwaitingRead.wants_write());
        assert!(Resume::AwaitingWrite.wants_write());
        assert!(!Resume::Finished.wants_write());
    }
}
