//! Cooperative chain scheduler
//!
//! Keeps one task per scheduled chain in scheduling order. A tick resumes
//! every task whose wake time has elapsed, exactly once, in that order.
//! Tasks are polled with a no-op waker: readiness is decided by wake
//! times, never by wakeups.

use std::future::Future;
use std::rc::Rc;
use std::task::{Context as TaskContext, Poll};
use std::time::Instant;

use futures::future::LocalBoxFuture;
use futures::task::noop_waker_ref;

use super::chain::ChainRef;
use super::context::TaskShared;

/// A chain's task as tracked by the scheduler
pub(crate) struct ScheduledChain {
    pub(crate) chain: ChainRef,
    future: LocalBoxFuture<'static, ()>,
    pub(crate) shared: Rc<TaskShared>,
    finished: bool,
}

impl ScheduledChain {
    pub(crate) fn new(chain: ChainRef, future: LocalBoxFuture<'static, ()>, shared: Rc<TaskShared>) -> Self {
        Self {
            chain,
            future,
            shared,
            finished: false,
        }
    }

    /// Resume the task once; returns true when it has run to completion
    pub(crate) fn resume(&mut self) -> bool {
        if self.finished {
            return true;
        }
        let mut cx = TaskContext::from_waker(noop_waker_ref());
        if let Poll::Ready(()) = self.future.as_mut().poll(&mut cx) {
            self.finished = true;
        }
        self.finished
    }

    /// Ask the task to stop and drive it until it has cleaned up
    pub(crate) fn stop(&mut self) {
        self.shared.request_abort();
        while !self.resume() {}
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Ordered set of chain tasks
#[derive(Default)]
pub(crate) struct Scheduler {
    tasks: Vec<ScheduledChain>,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, task: ScheduledChain) {
        self.tasks.push(task);
    }

    pub(crate) fn contains(&self, chain: &ChainRef) -> bool {
        self.tasks.iter().any(|task| task.chain.ptr_eq(chain))
    }

    pub(crate) fn remove(&mut self, chain: &ChainRef) -> Option<ScheduledChain> {
        let idx = self.tasks.iter().position(|task| task.chain.ptr_eq(chain))?;
        Some(self.tasks.remove(idx))
    }

    /// Resume every ready task once, in scheduling order. Returns the
    /// tasks that finished during this pass, removed from the schedule.
    pub(crate) fn tick(&mut self, now: Instant) -> Vec<ScheduledChain> {
        for task in self.tasks.iter_mut() {
            if task.shared.is_ready(now) {
                task.resume();
            }
        }
        let (finished, running): (Vec<_>, Vec<_>) = std::mem::take(&mut self.tasks)
            .into_iter()
            .partition(ScheduledChain::is_finished);
        self.tasks = running;
        finished
    }

    pub(crate) fn drain(&mut self) -> Vec<ScheduledChain> {
        std::mem::take(&mut self.tasks)
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub(crate) fn chains(&self) -> Vec<ChainRef> {
        self.tasks.iter().map(|task| task.chain.clone()).collect()
    }
}
