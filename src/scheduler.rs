//! # Scheduler
//!
//! Core scheduling logic for EDF OS: a preemptive Earliest-Deadline-First
//! scheduler for periodic tasks.
//!
//! ## Scheduling Algorithm
//!
//! At each SysTick interrupt (`tick()`):
//! 1. **Advance time**: increment the tick counter
//! 2. **Detect overruns**: any Ready or Running job whose absolute deadline
//!    has been reached is flagged, once per job
//! 3. **Release**: every task waiting for its period whose release time has
//!    come becomes Ready, with reference time = its grid point
//! 4. **Preemption check**: if the earliest-deadline task differs from the
//!    running one, request a context switch (PendSV)
//!
//! At each context switch (`reschedule()`):
//! 1. **Integrity**: check the outgoing stack (saved pointer, canary)
//! 2. **Requeue**: a preempted task goes back into the Ready Set
//! 3. **Select**: smallest `(absolute_deadline, creation index)` wins
//! 4. **Profile**: record switch-out/switch-in with the profiler
//!
//! Everything here runs inside the kernel's critical section. None of it
//! executes task code, logs, or allocates on the tick and switch paths.

use log::info;

use crate::config::{KernelConfig, OverrunPolicy, TickHook, IDLE_STACK_WORDS, MAX_TASKS, MIN_STACK_WORDS};
use crate::error::{Fault, KernelError, Resource};
use crate::profiler::Profiler;
use crate::ready::{ReadyEntry, ReadySet};
use crate::stack::{StackPool, StackRegion, StackViolation};
use crate::task::{SavedContext, TaskControlBlock, TaskEntry, TaskRef, TaskState, TaskStats, TaskTag, Tick, Timestamp};

// ---------------------------------------------------------------------------
// Scheduling decisions
// ---------------------------------------------------------------------------

/// What should run next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// TCB index.
    Task(usize),
    /// Nothing is Ready; run the idle context.
    Idle,
}

/// Result of a context switch: the context the port must restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub selection: Selection,
    /// Address of the incoming context's saved stack pointer.
    pub stack_pointer: usize,
    /// Whether a different context was switched in.
    pub switched: bool,
}

/// Result of `wait_for_next_period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOutcome {
    /// The job finished at or after its deadline.
    pub overrun: bool,
    /// Reference time of the next job.
    pub next_release: Tick,
    /// The next job was released immediately (`OverrunPolicy::CatchUp`).
    pub released_now: bool,
}

struct IdleContext {
    stack: StackRegion,
    context: SavedContext,
}

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The central scheduler state: TCB store, Ready Set, stack pool and
/// profiler. One instance lives in a static inside `kernel.rs`; the host
/// simulation owns its own.
pub struct Scheduler {
    tasks: [TaskControlBlock; MAX_TASKS],
    task_count: usize,
    ready: ReadySet,
    /// Index of the task owning the CPU; `None` while idle.
    current: Option<usize>,
    idle: IdleContext,
    stacks: StackPool,
    profiler: Profiler,
    tick_count: Tick,
    overrun_policy: OverrunPolicy,
    tick_hook: Option<TickHook>,
    needs_reschedule: bool,
    started: bool,
    context_switches: u32,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            tasks: [TaskControlBlock::EMPTY; MAX_TASKS],
            task_count: 0,
            ready: ReadySet::new(),
            current: None,
            idle: IdleContext {
                stack: StackRegion::EMPTY,
                context: SavedContext::EMPTY,
            },
            stacks: StackPool::new(),
            profiler: Profiler::new(),
            tick_count: 0,
            overrun_policy: OverrunPolicy::CatchUp,
            tick_hook: None,
            needs_reschedule: false,
            started: false,
            context_switches: 0,
        }
    }

    /// Apply the runtime configuration. Only allowed before `start`.
    pub fn configure(&mut self, config: KernelConfig) -> Result<(), KernelError> {
        if self.started {
            return Err(KernelError::AlreadyStarted);
        }
        self.overrun_policy = config.overrun_policy;
        self.tick_hook = config.tick_hook;
        self.profiler.set_observer(config.switch_observer);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Periodic task manager
    // -----------------------------------------------------------------------

    /// Create a periodic task released now, with its first deadline one
    /// period away.
    ///
    /// `stack_words` is the stack size in 32-bit words.
    ///
    /// # Errors
    /// - `AlreadyStarted` once the scheduler runs
    /// - `InvalidPeriod` for a zero period
    /// - `InvalidStackSize` below `MIN_STACK_WORDS`
    /// - `DuplicateTag` if the tag is taken
    /// - `ResourceExhausted` if the TCB store or the stack pool is full
    pub fn create_periodic(
        &mut self,
        entry: TaskEntry,
        stack_words: usize,
        period: Tick,
        tag: TaskTag,
    ) -> Result<TaskRef, KernelError> {
        if self.started {
            return Err(KernelError::AlreadyStarted);
        }
        if period == 0 {
            return Err(KernelError::InvalidPeriod);
        }
        if stack_words < MIN_STACK_WORDS {
            return Err(KernelError::InvalidStackSize(stack_words));
        }
        if self.find(tag).is_some() {
            return Err(KernelError::DuplicateTag(tag));
        }
        if self.task_count >= MAX_TASKS {
            return Err(KernelError::ResourceExhausted(Resource::TaskSlots));
        }

        let stack = self
            .stacks
            .allocate(stack_words)
            .ok_or(KernelError::ResourceExhausted(Resource::StackPool))?;
        let slot = self
            .profiler
            .register(tag)
            .ok_or(KernelError::ResourceExhausted(Resource::TaskSlots))?;

        let index = self.task_count;
        let tcb = &mut self.tasks[index];
        tcb.init(tag, period, self.tick_count, stack, slot);
        tcb.context.sp = self.stacks.init_frame(
            stack,
            entry as *const () as usize,
            task_exit as *const () as usize,
        );
        self.ready.insert(ReadyEntry {
            deadline: tcb.absolute_deadline,
            task: index,
        });
        self.task_count += 1;

        info!(
            "task {} created: period {} ticks, {} stack words",
            tag, period, stack.words
        );
        Ok(TaskRef { index, tag })
    }

    /// End the running task's current job and wait for its next activation.
    ///
    /// The next activation is `last_wake + period`, never `now + period`.
    /// If that instant has already been reached the job overran its deadline;
    /// the overrun is recorded and the configured [`OverrunPolicy`] decides
    /// how the task resumes. A reschedule is always requested.
    ///
    /// Returns `None` when no task is running (called from idle).
    pub fn wait_for_next_period(&mut self) -> Option<WaitOutcome> {
        let index = self.running()?;
        let now = self.tick_count;
        let policy = self.overrun_policy;
        let tcb = &mut self.tasks[index];

        tcb.record_completion(now);
        let next = tcb.last_wake + tcb.period;
        let overrun = next <= now;

        let outcome = if !overrun {
            tcb.next_release = next;
            tcb.state = TaskState::WaitingForPeriod;
            WaitOutcome {
                overrun,
                next_release: next,
                released_now: false,
            }
        } else {
            tcb.flag_overrun();
            match policy {
                OverrunPolicy::CatchUp => {
                    tcb.release(next);
                    self.ready.insert(ReadyEntry {
                        deadline: tcb.absolute_deadline,
                        task: index,
                    });
                    WaitOutcome {
                        overrun,
                        next_release: next,
                        released_now: true,
                    }
                }
                OverrunPolicy::SkipMissed => {
                    let resume_at = tcb.next_grid_point_after(now);
                    tcb.stats.skipped_activations += ((resume_at - next) / tcb.period) as u32;
                    tcb.next_release = resume_at;
                    tcb.state = TaskState::WaitingForPeriod;
                    WaitOutcome {
                        overrun,
                        next_release: resume_at,
                        released_now: false,
                    }
                }
            }
        };

        self.needs_reschedule = true;
        Some(outcome)
    }

    /// Take a task out of scheduling until `resume`.
    ///
    /// Suspending the running task requests a reschedule.
    pub fn suspend(&mut self, tag: TaskTag) -> Result<(), KernelError> {
        let index = self.find(tag).ok_or(KernelError::UnknownTask(tag))?;
        match self.tasks[index].state {
            TaskState::Suspended | TaskState::Terminated => return Ok(()),
            TaskState::Ready => {
                self.ready.remove(index);
            }
            TaskState::Running => self.needs_reschedule = true,
            TaskState::WaitingForPeriod => {}
        }
        self.tasks[index].state = TaskState::Suspended;
        info!("task {} suspended", tag);
        Ok(())
    }

    /// Return a suspended task to its activation grid.
    ///
    /// An unfinished job is abandoned; the task waits for the first grid
    /// point after now unless its pending release is still ahead.
    pub fn resume(&mut self, tag: TaskTag) -> Result<(), KernelError> {
        let index = self.find(tag).ok_or(KernelError::UnknownTask(tag))?;
        let now = self.tick_count;
        let tcb = &mut self.tasks[index];
        if tcb.state != TaskState::Suspended {
            return Ok(());
        }
        if tcb.next_release <= now {
            tcb.next_release = tcb.next_grid_point_after(now);
        }
        tcb.state = TaskState::WaitingForPeriod;
        info!("task {} resumed, next release at tick {}", tag, tcb.next_release);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Scheduler core
    // -----------------------------------------------------------------------

    /// Allocate the idle context and dispatch the first task.
    ///
    /// `now` is the profiler epoch.
    pub fn start(&mut self, idle_entry: TaskEntry, now: Timestamp) -> Result<Dispatch, KernelError> {
        if self.started {
            return Err(KernelError::AlreadyStarted);
        }
        let stack = self
            .stacks
            .allocate(IDLE_STACK_WORDS)
            .ok_or(KernelError::ResourceExhausted(Resource::StackPool))?;
        let sp = self.stacks.init_frame(
            stack,
            idle_entry as *const () as usize,
            task_exit as *const () as usize,
        );
        self.idle = IdleContext {
            stack,
            context: SavedContext { sp },
        };

        self.profiler.reset(now);
        self.started = true;
        let dispatch = self.reschedule(now)?;

        info!(
            "scheduler started with {} tasks, {} stack words free",
            self.task_count,
            self.stacks.remaining()
        );
        Ok(dispatch)
    }

    /// Called from the SysTick handler every tick.
    ///
    /// Returns `true` if a context switch should be performed.
    pub fn tick(&mut self) -> bool {
        self.tick_count += 1;
        let now = self.tick_count;

        for i in 0..self.task_count {
            let tcb = &mut self.tasks[i];
            match tcb.state {
                TaskState::Ready | TaskState::Running => {
                    if tcb.deadline_passed(now) {
                        tcb.flag_overrun();
                    }
                }
                TaskState::WaitingForPeriod if tcb.next_release <= now => {
                    let at = tcb.next_release;
                    tcb.release(at);
                    self.ready.insert(ReadyEntry {
                        deadline: tcb.absolute_deadline,
                        task: i,
                    });
                }
                _ => {}
            }
        }

        if let Some(hook) = self.tick_hook {
            hook(now);
        }

        if self.started && self.dispatch_needed() {
            self.needs_reschedule = true;
        }
        self.needs_reschedule
    }

    /// Select the task that should own the CPU.
    ///
    /// The running task competes with the head of the Ready Set; the smaller
    /// `(absolute_deadline, creation index)` wins.
    pub fn select_next(&self) -> Selection {
        let running = self.running().map(|i| self.entry_of(i));
        match (running, self.ready.peek()) {
            (Some(r), Some(head)) if head < r => Selection::Task(head.task),
            (Some(r), _) => Selection::Task(r.task),
            (None, Some(head)) => Selection::Task(head.task),
            (None, None) => Selection::Idle,
        }
    }

    /// Select and switch in one step.
    pub fn reschedule(&mut self, now: Timestamp) -> Result<Dispatch, Fault> {
        let next = self.select_next();
        self.switch_to(next, now)
    }

    /// Store the outgoing context's stack pointer. The port calls this with
    /// the address it pushed the callee-saved registers to, right before
    /// `reschedule`.
    pub fn save_context(&mut self, sp_addr: usize) {
        let sp = self.stacks.offset_of(sp_addr);
        match self.current {
            Some(i) => self.tasks[i].context.sp = sp,
            None => self.idle.context.sp = sp,
        }
    }

    /// Hand the CPU to `next`.
    ///
    /// The outgoing stack is checked first; a violation terminates the
    /// offending task and is returned as a fatal [`Fault`]. A preempted task
    /// is requeued, the profiler records both edges, and the incoming task is
    /// marked Running.
    pub fn switch_to(&mut self, next: Selection, now: Timestamp) -> Result<Dispatch, Fault> {
        let prev = self.current;
        let unchanged = match (next, prev) {
            (Selection::Task(n), Some(c)) => n == c && self.tasks[c].state == TaskState::Running,
            (Selection::Idle, None) => true,
            _ => false,
        };
        if unchanged {
            self.needs_reschedule = false;
            self.profiler.update(now);
            return Ok(Dispatch {
                selection: next,
                stack_pointer: self.stacks.addr_of(self.context_of(prev).sp),
                switched: false,
            });
        }

        self.check_outgoing()?;
        if let Some(c) = prev {
            let tcb = &mut self.tasks[c];
            if tcb.state == TaskState::Running {
                tcb.state = TaskState::Ready;
                self.ready.insert(ReadyEntry {
                    deadline: tcb.absolute_deadline,
                    task: c,
                });
            }
            self.profiler.switch_out(tcb.profile_slot, now);
        }

        if let Selection::Task(n) = next {
            self.ready.remove(n);
            let tcb = &mut self.tasks[n];
            tcb.state = TaskState::Running;
            self.profiler.switch_in(tcb.profile_slot, now);
            self.current = Some(n);
        } else {
            self.current = None;
        }
        self.profiler.update(now);

        let switched = prev != self.current;
        if switched {
            self.context_switches += 1;
        }
        self.needs_reschedule = false;

        Ok(Dispatch {
            selection: next,
            stack_pointer: self.stacks.addr_of(self.context_of(self.current).sp),
            switched,
        })
    }

    /// Verify the stack of the context about to be switched out.
    fn check_outgoing(&mut self) -> Result<(), Fault> {
        let (region, sp, task) = match self.current {
            Some(i) => {
                let tcb = &self.tasks[i];
                (tcb.stack, tcb.context.sp, Some(tcb.tag))
            }
            None => (self.idle.stack, self.idle.context.sp, None),
        };

        let violation = match self.stacks.check(region, sp) {
            Ok(()) => return Ok(()),
            Err(violation) => violation,
        };

        if let Some(i) = self.current {
            self.ready.remove(i);
            self.tasks[i].state = TaskState::Terminated;
        }
        Err(match violation {
            StackViolation::PointerOutOfRegion => Fault::StackOverflow { task },
            StackViolation::CanaryClobbered => Fault::StackCorrupted { task },
        })
    }

    /// Whether the selected context differs from the one holding the CPU.
    fn dispatch_needed(&self) -> bool {
        match (self.select_next(), self.current) {
            (Selection::Task(n), Some(c)) => n != c || self.tasks[c].state != TaskState::Running,
            (Selection::Idle, None) => false,
            _ => true,
        }
    }

    fn running(&self) -> Option<usize> {
        self.current
            .filter(|&i| self.tasks[i].state == TaskState::Running)
    }

    fn entry_of(&self, index: usize) -> ReadyEntry {
        ReadyEntry {
            deadline: self.tasks[index].absolute_deadline,
            task: index,
        }
    }

    fn context_of(&self, current: Option<usize>) -> SavedContext {
        match current {
            Some(i) => self.tasks[i].context,
            None => self.idle.context,
        }
    }

    fn find(&self, tag: TaskTag) -> Option<usize> {
        self.tasks[..self.task_count].iter().position(|t| t.tag == tag)
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// Ticks since start.
    pub fn current_time(&self) -> Tick {
        self.tick_count
    }

    /// Context currently owning the CPU.
    pub fn current(&self) -> Selection {
        match self.current {
            Some(i) => Selection::Task(i),
            None => Selection::Idle,
        }
    }

    /// Tag of the running task, `None` while idle.
    pub fn current_tag(&self) -> Option<TaskTag> {
        self.running().map(|i| self.tasks[i].tag)
    }

    pub fn needs_reschedule(&self) -> bool {
        self.needs_reschedule
    }

    pub fn context_switches(&self) -> u32 {
        self.context_switches
    }

    /// Aggregate CPU load in whole percent.
    pub fn cpu_load(&self) -> u8 {
        self.profiler.cpu_load()
    }

    /// Aggregate CPU load in hundredths of a percent.
    pub fn cpu_load_hundredths(&self) -> u32 {
        self.profiler.cpu_load_hundredths()
    }

    /// Busy time of `tag` in profiler units.
    pub fn per_task_busy_time(&self, tag: TaskTag) -> Option<Timestamp> {
        self.profiler.busy_time(tag)
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    pub fn task(&self, tag: TaskTag) -> Option<&TaskControlBlock> {
        self.find(tag).map(|i| &self.tasks[i])
    }

    pub fn task_at(&self, index: usize) -> Option<&TaskControlBlock> {
        self.tasks[..self.task_count].get(index)
    }

    pub fn tasks(&self) -> &[TaskControlBlock] {
        &self.tasks[..self.task_count]
    }

    pub fn task_stats(&self, tag: TaskTag) -> Option<TaskStats> {
        self.task(tag).map(|t| t.stats)
    }

    /// Deadline overruns summed over all tasks.
    pub fn deadline_overruns(&self) -> u32 {
        self.tasks().iter().map(|t| t.stats.deadline_overruns).sum()
    }

    /// Stack words of `tag` that have never been written.
    pub fn stack_high_water_mark(&self, tag: TaskTag) -> Option<usize> {
        self.task(tag).map(|t| self.stacks.unused_words(t.stack))
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    /// EDF invariant: the running task's deadline is no later than that of
    /// any Ready task, and idle only runs when nothing is Ready.
    pub fn check_edf_order(&self) -> bool {
        match self.running() {
            Some(i) => {
                let deadline = self.tasks[i].absolute_deadline;
                self.ready.iter().all(|e| deadline <= e.deadline)
            }
            None => self.ready.is_empty(),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Return address planted in every initial frame. Task bodies never return.
extern "C" fn task_exit() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
