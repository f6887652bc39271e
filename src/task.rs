//! # Task Control Block
//!
//! Defines the periodic task model. Each task is released once per period,
//! must finish its work before its absolute deadline (the next release), and
//! then calls `wait_for_next_period`.
//!
//! ## Periodic Timeline
//!
//! ```text
//!  last_wake            absolute_deadline = last_wake + period
//!      │◄──────────── period ────────────►│
//!      ▼                                  ▼
//! ─────┼──[run]──[preempted]──[run]┐──────┼──────────►  time (ticks)
//!      release                     wait_for_next_period
//! ```
//!
//! The reference time `last_wake` always advances by exactly one period per
//! activation, never to "now + period", so late dispatch does not drift the
//! activation grid.

use core::fmt;

use crate::stack::StackRegion;

/// Scheduler time in ticks since start.
pub type Tick = u64;

/// Profiler time in timer units (SysTick cycles on hardware, ticks in the
/// host simulation).
pub type Timestamp = u64;

/// Task entry point. Task bodies loop forever around `wait_for_next_period`.
pub type TaskEntry = extern "C" fn() -> !;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Stable profiling tag of a task, distinct from any display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskTag(pub u8);

impl fmt::Display for TaskTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle returned by task creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRef {
    /// Index in the TCB store; also the creation order.
    pub index: usize,
    pub tag: TaskTag,
}

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task.
///
/// ```text
///   ┌──────────┐    switch_to()     ┌─────────┐
///   │  Ready   │ ─────────────────► │ Running │
///   └──────────┘ ◄───────────────── └─────────┘
///        ▲           preempted           │
///        │ tick() release                │ wait_for_next_period()
///        │                               ▼
///        │                       ┌──────────────────┐
///        └────────────────────── │ WaitingForPeriod │
///                                └──────────────────┘
///   suspend()/resume() move any live task to and from Suspended.
///   A stack fault leaves the offending task Terminated.
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Released and queued in the Ready Set.
    Ready,
    /// Currently executing on the CPU.
    Running,
    /// Finished this period's work; sleeping until `next_release`.
    WaitingForPeriod,
    /// Removed from scheduling until resumed.
    Suspended,
    /// Will never be scheduled again.
    Terminated,
}

// ---------------------------------------------------------------------------
// Saved context
// ---------------------------------------------------------------------------

/// Saved machine context of a task that is not running.
///
/// The registers themselves live on the task's stack; only the stack pointer
/// is kept here, as a word offset into the stack pool so the scheduler
/// state stays position independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedContext {
    pub sp: usize,
}

impl SavedContext {
    pub const EMPTY: Self = Self { sp: 0 };
}

// ---------------------------------------------------------------------------
// Per-task statistics
// ---------------------------------------------------------------------------

/// Per-task deadline bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskStats {
    /// Number of released jobs, including the one released at creation.
    pub activations: u32,
    /// Number of jobs that reached `wait_for_next_period`.
    pub completions: u32,
    /// Jobs that were still unfinished at their absolute deadline.
    pub deadline_overruns: u32,
    /// Activations dropped under `OverrunPolicy::SkipMissed`.
    pub skipped_activations: u32,
    /// Longest observed release-to-completion time, in ticks.
    pub worst_response: Tick,
    /// Whether the current job has already been counted as an overrun.
    pub job_overrun: bool,
}

impl TaskStats {
    pub const fn new() -> Self {
        Self {
            activations: 0,
            completions: 0,
            deadline_overruns: 0,
            skipped_activations: 0,
            worst_response: 0,
            job_overrun: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block: all scheduling state for one task.
///
/// TCBs live in a fixed array inside the scheduler and are only mutated
/// under the kernel's critical section.
#[derive(Debug, Clone, Copy)]
pub struct TaskControlBlock {
    pub tag: TaskTag,
    pub state: TaskState,
    /// Ticks between activations. Immutable after creation.
    pub period: Tick,
    /// Absolute release time of the current job.
    pub last_wake: Tick,
    /// Absolute release time of the next job.
    pub next_release: Tick,
    /// `last_wake + period`.
    pub absolute_deadline: Tick,
    pub context: SavedContext,
    pub stack: StackRegion,
    /// Index of this task's slot in the profiler.
    pub profile_slot: usize,
    pub stats: TaskStats,
}

impl TaskControlBlock {
    /// An unallocated TCB. Used to initialize the static array.
    pub const EMPTY: Self = Self {
        tag: TaskTag(0),
        state: TaskState::Suspended,
        period: 0,
        last_wake: 0,
        next_release: 0,
        absolute_deadline: 0,
        context: SavedContext::EMPTY,
        stack: StackRegion::EMPTY,
        profile_slot: 0,
        stats: TaskStats::new(),
    };

    /// Initialize a TCB for a task released at `now`.
    ///
    /// The task starts Ready with its first deadline one period away. The
    /// stack frame must be prepared separately.
    pub fn init(&mut self, tag: TaskTag, period: Tick, now: Tick, stack: StackRegion, profile_slot: usize) {
        *self = Self::EMPTY;
        self.tag = tag;
        self.period = period;
        self.stack = stack;
        self.profile_slot = profile_slot;
        self.release(now);
    }

    /// Start a new job whose reference time is `at`.
    ///
    /// `at` may lie in the past (catch-up after an overrun); the deadline is
    /// always derived from the reference, never from the current time.
    pub fn release(&mut self, at: Tick) {
        self.last_wake = at;
        self.absolute_deadline = at + self.period;
        self.next_release = at + self.period;
        self.state = TaskState::Ready;
        self.stats.activations += 1;
        self.stats.job_overrun = false;
    }

    /// Count the current job as overrun, once.
    ///
    /// Returns `true` if this call recorded it.
    pub fn flag_overrun(&mut self) -> bool {
        if self.stats.job_overrun {
            return false;
        }
        self.stats.job_overrun = true;
        self.stats.deadline_overruns += 1;
        true
    }

    /// Record that the current job finished at `now`.
    pub fn record_completion(&mut self, now: Tick) {
        self.stats.completions += 1;
        let response = now.saturating_sub(self.last_wake);
        if response > self.stats.worst_response {
            self.stats.worst_response = response;
        }
    }

    /// Whether the current job's deadline has been reached at `now`.
    #[inline]
    pub fn deadline_passed(&self, now: Tick) -> bool {
        self.absolute_deadline <= now
    }

    /// First point of this task's activation grid strictly after `now`.
    pub fn next_grid_point_after(&self, now: Tick) -> Tick {
        if self.last_wake > now {
            return self.last_wake;
        }
        let periods = (now - self.last_wake) / self.period + 1;
        self.last_wake + periods * self.period
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_task(period: Tick, now: Tick) -> TaskControlBlock {
        let mut tcb = TaskControlBlock::EMPTY;
        tcb.init(TaskTag(3), period, now, StackRegion { base: 0, words: 64 }, 0);
        tcb
    }

    #[test]
    fn test_tcb_initialization() {
        let tcb = TaskControlBlock::EMPTY;
        assert_eq!(tcb.state, TaskState::Suspended);

        let tcb = make_task(50, 7);
        assert_eq!(tcb.tag, TaskTag(3));
        assert_eq!(tcb.state, TaskState::Ready);
        assert_eq!(tcb.last_wake, 7);
        assert_eq!(tcb.absolute_deadline, 57);
        assert_eq!(tcb.next_release, 57);
        assert_eq!(tcb.stats.activations, 1);
    }

    #[test]
    fn test_release_keeps_reference_grid() {
        let mut tcb = make_task(10, 0);
        // Released late: the reference is still the grid point, not "now".
        tcb.release(tcb.next_release);
        assert_eq!(tcb.last_wake, 10);
        assert_eq!(tcb.absolute_deadline, 20);
        assert_eq!(tcb.stats.activations, 2);
    }

    #[test]
    fn test_overrun_flagged_once_per_job() {
        let mut tcb = make_task(10, 0);
        assert!(tcb.flag_overrun());
        assert!(!tcb.flag_overrun());
        assert_eq!(tcb.stats.deadline_overruns, 1);

        tcb.release(10);
        assert!(tcb.flag_overrun());
        assert_eq!(tcb.stats.deadline_overruns, 2);
    }

    #[test]
    fn test_completion_tracks_worst_response() {
        let mut tcb = make_task(10, 0);
        tcb.record_completion(4);
        tcb.release(10);
        tcb.record_completion(12);
        assert_eq!(tcb.stats.completions, 2);
        assert_eq!(tcb.stats.worst_response, 4);
    }

    #[test]
    fn test_next_grid_point() {
        let tcb = make_task(10, 0);
        assert_eq!(tcb.next_grid_point_after(0), 10);
        assert_eq!(tcb.next_grid_point_after(9), 10);
        assert_eq!(tcb.next_grid_point_after(10), 20);
        assert_eq!(tcb.next_grid_point_after(35), 40);
    }

    #[test]
    fn test_deadline_passed_is_inclusive() {
        let tcb = make_task(10, 0);
        assert!(!tcb.deadline_passed(9));
        assert!(tcb.deadline_passed(10));
    }
}
