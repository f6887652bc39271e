//! # Kernel
//!
//! Top-level kernel initialization and public API for EDF OS.
//!
//! The kernel owns the single global scheduler instance, provides task
//! creation and lifecycle APIs, and coordinates system startup. Every public
//! function goes through a critical section.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► logger::init()
//!         ├─► kernel::init(config)         ← Overrun policy, hooks
//!         ├─► kernel::create_periodic()    ← Register tasks (×N)
//!         └─► kernel::start(peripherals)   ← Launch scheduler (no return)
//!               ├─► Configure SysTick
//!               ├─► Set interrupt priorities
//!               ├─► Scheduler::start()     ← Idle context, profiler epoch
//!               └─► arch::start_first_task()
//! ```

use core::sync::atomic::{AtomicU32, Ordering};

use log::{error, info};

use crate::arch::cortex_m4;
use crate::config::KernelConfig;
use crate::error::{Fault, KernelError};
use crate::scheduler::Scheduler;
use crate::sync::Shared;
use crate::task::{TaskEntry, TaskRef, TaskStats, TaskTag, Tick, Timestamp};

// ---------------------------------------------------------------------------
// Global scheduler instance
// ---------------------------------------------------------------------------

static KERNEL: Shared<Scheduler> = Shared::new(Scheduler::new());

/// Aggregate CPU load in hundredths of a percent, mirrored after every
/// context switch so tasks can read it without a critical section.
static CPU_LOAD: AtomicU32 = AtomicU32::new(0);

// ---------------------------------------------------------------------------
// Kernel API
// ---------------------------------------------------------------------------

/// Apply the runtime configuration.
///
/// Optional; the defaults are used otherwise. Fails with `AlreadyStarted`
/// once the scheduler runs.
pub fn init(config: KernelConfig) -> Result<(), KernelError> {
    KERNEL.lock(|s| s.configure(config))?;
    info!("kernel configured: {:?} on overrun", config.overrun_policy);
    Ok(())
}

/// Create a periodic task, released when the scheduler starts.
///
/// Only allowed before [`start`]; afterwards it fails with `AlreadyStarted`.
///
/// # Parameters
/// - `entry`: Task body. Loops forever around [`wait_for_next_period`].
/// - `stack_words`: Stack size in 32-bit words.
/// - `period`: Ticks between activations; also the relative deadline.
/// - `tag`: Unique profiling tag.
///
/// # Example
/// ```ignore
/// kernel::create_periodic(sensor_task, 256, 10, TaskTag(1))?;
/// ```
pub fn create_periodic(
    entry: TaskEntry,
    stack_words: usize,
    period: Tick,
    tag: TaskTag,
) -> Result<TaskRef, KernelError> {
    KERNEL.lock(|s| s.create_periodic(entry, stack_words, period, tag))
}

/// Start the EDF OS scheduler. **Does not return.**
///
/// Configures the SysTick timer, sets interrupt priorities, and launches
/// the earliest-deadline task. Without any task the idle context runs.
/// A failure to start (the idle stack does not fit the pool) is logged and
/// halts the system.
pub fn start(mut core_peripherals: cortex_m::Peripherals) -> ! {
    cortex_m::interrupt::disable();

    cortex_m4::configure_systick(&mut core_peripherals.SYST);
    cortex_m4::set_interrupt_priorities(&mut core_peripherals.SCB);

    let dispatch = KERNEL.lock(|s| {
        let now = cortex_m4::timestamp(s.current_time());
        s.start(cortex_m4::idle_task, now)
    });

    match dispatch {
        Ok(dispatch) => unsafe { cortex_m4::start_first_task(dispatch.stack_pointer) },
        Err(err) => {
            error!("cannot start scheduler: {}", err);
            cortex_m4::halt()
        }
    }
}

/// End the calling task's current job and sleep until its next activation.
///
/// Returns once the task has been released again and selected. Called from
/// the idle context or before `start`, it returns immediately.
pub fn wait_for_next_period() {
    if KERNEL.lock(|s| s.wait_for_next_period()).is_some() {
        cortex_m4::trigger_pendsv();
    }
}

/// Ticks since the scheduler started.
pub fn current_time() -> Tick {
    KERNEL.lock(|s| s.current_time())
}

/// Aggregate CPU load in whole percent, as of the last context switch.
pub fn cpu_load() -> u8 {
    (CPU_LOAD.load(Ordering::Relaxed) / 100) as u8
}

/// Accumulated busy time of `tag`, in processor cycles.
pub fn per_task_busy_time(tag: TaskTag) -> Option<Timestamp> {
    KERNEL.lock(|s| s.per_task_busy_time(tag))
}

pub fn task_stats(tag: TaskTag) -> Option<TaskStats> {
    KERNEL.lock(|s| s.task_stats(tag))
}

/// Deadline overruns summed over all tasks.
pub fn deadline_overruns() -> u32 {
    KERNEL.lock(|s| s.deadline_overruns())
}

/// Stack words of `tag` never written so far.
pub fn stack_high_water_mark(tag: TaskTag) -> Option<usize> {
    KERNEL.lock(|s| s.stack_high_water_mark(tag))
}

/// Stop scheduling `tag` until [`resume`]. A task may suspend itself.
pub fn suspend(tag: TaskTag) -> Result<(), KernelError> {
    let reschedule = KERNEL.lock(|s| {
        s.suspend(tag)?;
        Ok::<_, KernelError>(s.needs_reschedule())
    })?;
    if reschedule {
        cortex_m4::trigger_pendsv();
    }
    Ok(())
}

/// Put a suspended task back on its activation grid.
pub fn resume(tag: TaskTag) -> Result<(), KernelError> {
    KERNEL.lock(|s| s.resume(tag))
}

// ---------------------------------------------------------------------------
// Port entry points
// ---------------------------------------------------------------------------

/// SysTick: advance time and pend a switch if the EDF choice changed.
pub(crate) fn on_tick() {
    if KERNEL.lock(|s| s.tick()) {
        cortex_m4::trigger_pendsv();
    }
}

/// PendSV: save the outgoing stack pointer and return the incoming one.
pub(crate) fn switch_context(psp: usize) -> usize {
    let dispatch = KERNEL.lock(|s| {
        s.save_context(psp);
        let now = cortex_m4::timestamp(s.current_time());
        let dispatch = s.reschedule(now);
        CPU_LOAD.store(s.cpu_load_hundredths(), Ordering::Relaxed);
        dispatch
    });
    match dispatch {
        Ok(dispatch) => dispatch.stack_pointer,
        Err(fault) => fatal(fault),
    }
}

fn fatal(fault: Fault) -> ! {
    cortex_m::interrupt::disable();
    error!("{}", KernelError::from(fault));
    match fault.task() {
        Some(tag) => error!("task {} terminated, halting", tag),
        None => error!("idle context corrupted, halting"),
    }
    cortex_m4::halt()
}
