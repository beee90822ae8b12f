//! Cooperative task scheduling: microtasks, timers and animation frames.
//!
//! Nothing runs on its own. The embedder drives the queues with [`Boundary::pump`] (microtasks
//! and due timers) and [`Boundary::run_animation_frames`], passing the current time in; every
//! scheduled callback is a closure invoked through the closure bridge.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use crate::boundary::Boundary;
use crate::closure::ClosureId;
use crate::value::HostValue;
use crate::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task{}", self.0)
    }
}

/// What one call to [`Boundary::pump`] or [`Boundary::run_animation_frames`] did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PumpStats {
    pub microtasks: usize,
    pub timers: usize,
    pub frames: usize,
    /// Callbacks whose closure was destroyed before they came due.
    pub skipped: usize,
    /// Callbacks that returned an error; counted in their category as well.
    pub failed: usize,
}

impl PumpStats {
    pub fn ran(&self) -> usize {
        self.microtasks + self.timers + self.frames
    }
}

#[derive(Debug)]
pub(crate) struct Microtask {
    pub(crate) closure: ClosureId,
    pub(crate) arg: HostValue,
}

/// FIFO shared with every [`crate::Resolver`] so settlement can enqueue continuations without
/// holding the boundary.
#[derive(Debug, Clone, Default)]
pub(crate) struct MicrotaskQueue(Rc<RefCell<VecDeque<Microtask>>>);

impl MicrotaskQueue {
    pub(crate) fn push(&self, task: Microtask) {
        self.0.borrow_mut().push_back(task);
    }

    fn pop(&self) -> Option<Microtask> {
        self.0.borrow_mut().pop_front()
    }

    fn len(&self) -> usize {
        self.0.borrow().len()
    }
}

#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    last_task: u64,
    pub(crate) microtasks: MicrotaskQueue,
    timers: BTreeMap<(u64, TaskId), ClosureId>,
    deadlines: HashMap<TaskId, u64>,
    frames: Vec<(TaskId, ClosureId)>,
}

impl Scheduler {
    fn next_id(&mut self) -> TaskId {
        self.last_task += 1;
        TaskId(self.last_task)
    }

    /// Earliest timer due at `now_ms` that was registered no later than `horizon`.
    fn due_timer(&self, now_ms: u64, horizon: u64) -> Option<(u64, TaskId)> {
        self.timers
            .keys()
            .take_while(|(deadline, _)| *deadline <= now_ms)
            .find(|(_, id)| id.0 <= horizon)
            .copied()
    }
}

#[derive(Clone, Copy)]
enum TaskKind {
    Microtask,
    Timer,
    Frame,
}

impl Boundary {
    pub fn queue_microtask(&mut self, closure: ClosureId) {
        self.scheduler.microtasks.push(Microtask {
            closure,
            arg: HostValue::Undefined,
        });
    }

    /// Run `closure` once `delay_ms` has elapsed after `now_ms`.
    pub fn set_timeout(&mut self, closure: ClosureId, delay_ms: u64, now_ms: u64) -> TaskId {
        let id = self.scheduler.next_id();
        let deadline = now_ms.saturating_add(delay_ms);
        self.scheduler.timers.insert((deadline, id), closure);
        self.scheduler.deadlines.insert(id, deadline);
        tracing::trace!(task = %id, %closure, deadline, "timer scheduled");
        id
    }

    pub fn request_animation_frame(&mut self, closure: ClosureId) -> TaskId {
        let id = self.scheduler.next_id();
        self.scheduler.frames.push((id, closure));
        tracing::trace!(task = %id, %closure, "animation frame requested");
        id
    }

    /// Cancel a timer or animation frame. `false` if it already ran or was cancelled.
    pub fn cancel(&mut self, task: TaskId) -> bool {
        if let Some(deadline) = self.scheduler.deadlines.remove(&task) {
            self.scheduler.timers.remove(&(deadline, task));
            return true;
        }
        if let Some(pos) = self.scheduler.frames.iter().position(|(id, _)| *id == task) {
            self.scheduler.frames.remove(pos);
            return true;
        }
        false
    }

    /// Queued microtasks, timers and frames.
    pub fn pending_tasks(&self) -> usize {
        self.scheduler.microtasks.len() + self.scheduler.timers.len() + self.scheduler.frames.len()
    }

    pub fn next_timer_deadline(&self) -> Option<u64> {
        self.scheduler.timers.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Drain microtasks, then fire every timer due at `now_ms` in deadline order, draining
    /// microtasks after each one.
    ///
    /// Timers scheduled by callbacks during this pump wait for the next one, even when already
    /// due. Callback failures are logged and counted, never propagated.
    pub fn pump(&mut self, now_ms: u64) -> PumpStats {
        let mut stats = PumpStats::default();
        let horizon = self.scheduler.last_task;
        self.drain_microtasks(&mut stats);

        while let Some(key) = self.scheduler.due_timer(now_ms, horizon) {
            let Some(closure) = self.scheduler.timers.remove(&key) else {
                break;
            };
            self.scheduler.deadlines.remove(&key.1);
            self.run_task(TaskKind::Timer, closure, HostValue::Undefined, &mut stats);
            self.drain_microtasks(&mut stats);
        }

        if stats.ran() > 0 || stats.skipped > 0 {
            tracing::trace!(?stats, now_ms, "pump finished");
        }
        stats
    }

    /// Fire the animation frames requested before this call, passing `timestamp_ms`.
    pub fn run_animation_frames(&mut self, timestamp_ms: f64) -> PumpStats {
        let mut stats = PumpStats::default();
        let frames = std::mem::take(&mut self.scheduler.frames);
        for (_, closure) in frames {
            self.run_task(
                TaskKind::Frame,
                closure,
                HostValue::Number(timestamp_ms),
                &mut stats,
            );
            self.drain_microtasks(&mut stats);
        }
        stats
    }

    fn drain_microtasks(&mut self, stats: &mut PumpStats) {
        while let Some(task) = self.scheduler.microtasks.pop() {
            self.run_task(TaskKind::Microtask, task.closure, task.arg, stats);
        }
    }

    fn run_task(&mut self, kind: TaskKind, closure: ClosureId, arg: HostValue, stats: &mut PumpStats) {
        let args = match arg {
            HostValue::Undefined => Vec::new(),
            arg => vec![arg],
        };
        match self.invoke_closure(closure, &args) {
            Ok(_) => {}
            Err(BridgeError::ClosureDestroyed(_)) => {
                stats.skipped += 1;
                return;
            }
            Err(err) => {
                stats.failed += 1;
                tracing::warn!(%closure, %err, "scheduled callback failed");
            }
        }
        match kind {
            TaskKind::Microtask => stats.microtasks += 1,
            TaskKind::Timer => stats.timers += 1,
            TaskKind::Frame => stats.frames += 1,
        }
    }
}
