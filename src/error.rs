//! # Errors
//!
//! Creation-time and lifecycle errors are returned synchronously as
//! [`KernelError`]. Deadline overruns are not errors: they are counted in
//! [`TaskStats`](crate::task::TaskStats) and the system keeps running.
//! A [`Fault`] is fatal; the kernel halts instead of continuing on a
//! corrupted stack.

use core::fmt;

use crate::task::TaskTag;

/// Which fixed-size pool ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// All `MAX_TASKS` control blocks are in use.
    TaskSlots,
    /// The stack pool cannot fit the requested region.
    StackPool,
}

/// Stack integrity violation detected at switch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The saved stack pointer lies outside the task's own region
    /// (or inside its guard words). `None` is the idle context.
    StackOverflow { task: Option<TaskTag> },
    /// The canary words at the low end of the region were overwritten.
    StackCorrupted { task: Option<TaskTag> },
}

impl Fault {
    /// Tag of the task that faulted, `None` for the idle context.
    pub fn task(&self) -> Option<TaskTag> {
        match *self {
            Fault::StackOverflow { task } | Fault::StackCorrupted { task } => task,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (what, task) = match *self {
            Fault::StackOverflow { task } => ("stack overflow", task),
            Fault::StackCorrupted { task } => ("stack canary corrupted", task),
        };
        match task {
            Some(tag) => write!(f, "{} in task {}", what, tag),
            None => write!(f, "{} in idle context", what),
        }
    }
}

/// Errors returned by the kernel API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// The TCB store or the stack pool is full; the task was not created.
    ResourceExhausted(Resource),
    /// Another task already carries this tag.
    DuplicateTag(TaskTag),
    /// Periods must be at least one tick.
    InvalidPeriod,
    /// Requested stack (in words) is below `MIN_STACK_WORDS`.
    InvalidStackSize(usize),
    /// No task carries this tag.
    UnknownTask(TaskTag),
    /// Tasks cannot be created or the kernel reconfigured after `start`.
    AlreadyStarted,
    /// A fatal stack fault surfaced through a fallible call.
    Fault(Fault),
}

impl From<Fault> for KernelError {
    fn from(fault: Fault) -> Self {
        KernelError::Fault(fault)
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            KernelError::ResourceExhausted(Resource::TaskSlots) => {
                write!(f, "resource exhausted: no free task control block")
            }
            KernelError::ResourceExhausted(Resource::StackPool) => {
                write!(f, "resource exhausted: stack pool full")
            }
            KernelError::DuplicateTag(tag) => write!(f, "task tag {} already in use", tag),
            KernelError::InvalidPeriod => write!(f, "period must be at least one tick"),
            KernelError::InvalidStackSize(words) => {
                write!(f, "stack of {} words is below the minimum", words)
            }
            KernelError::UnknownTask(tag) => write!(f, "no task with tag {}", tag),
            KernelError::AlreadyStarted => write!(f, "scheduler already started"),
            KernelError::Fault(fault) => write!(f, "fatal fault: {}", fault),
        }
    }
}

impl core::error::Error for Fault {}
impl core::error::Error for KernelError {}
