//! # EDF OS: Earliest-Deadline-First Periodic Scheduler
//!
//! A preemptive, tick-driven real-time scheduler for periodic tasks on
//! ARM Cortex-M4 microcontrollers, with a built-in execution-time profiler.
//!
//! ## Overview
//!
//! Every task is periodic: it is released once per period and must finish
//! before its next release (implicit deadline). At every scheduling point the
//! Ready task with the earliest absolute deadline owns the CPU. Periods are
//! anchored on a fixed activation grid, so late dispatch never accumulates
//! drift. Deadline overruns are detected and counted rather than treated as
//! errors; the system keeps running degraded.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                    │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                  │
//! │  init() · create_periodic() · start() · wait_for_next_ │
//! │  period() · cpu_load() · task_stats() · suspend()      │
//! ├──────────────┬──────────────────┬──────────────────────┤
//! │  Scheduler   │  Profiler        │  Sync / Mailbox      │
//! │  scheduler.rs│  profiler.rs     │  sync.rs mailbox.rs  │
//! │  ─ tick()    │  ─ switch_in()   │  ─ Shared<T>         │
//! │  ─ select_   │  ─ switch_out()  │  ─ try_send()        │
//! │    next()    │  ─ cpu_load()    │  ─ try_receive()     │
//! ├──────────────┴──────────────────┴──────────────────────┤
//! │  Task Model (task.rs) · Ready Set (ready.rs)            │
//! │  Stack Pool (stack.rs)                                   │
//! ├────────────────────────────────────────────────────────┤
//! │            Arch Port (arch/cortex_m4.rs)                │
//! │    PendSV · SysTick · Context Switch · Timestamp       │
//! ├────────────────────────────────────────────────────────┤
//! │         ARM Cortex-M4 Hardware (Thumb-2)                │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! The scheduler core is plain Rust with no hardware access. On the host it
//! is driven by the simulation in `sim.rs`, which is how the scheduling
//! properties are tested with `cargo test`.
//!
//! ## Memory Model
//!
//! - **No heap**: All state is statically allocated
//! - **No `alloc`**: Pure `core` only
//! - **Fixed-size TCB array**: `[TaskControlBlock; MAX_TASKS]`
//! - **Stack pool**: one static word array, carved into per-task regions
//! - **Critical sections**: `critical-section` for all shared state

#![no_std]

#[cfg(test)]
extern crate std;

pub mod config;
pub mod error;
pub mod mailbox;
pub mod profiler;
pub mod ready;
pub mod scheduler;
pub mod stack;
pub mod sync;
pub mod task;

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub mod sim;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod arch;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod kernel;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod logger;
