//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor.
//! Implements context switching via PendSV, the SysTick tick source, the
//! cycle-resolution profiler clock and interrupt management.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): Used by the kernel and interrupt handlers
//! - **PSP** (Process Stack Pointer): Used by tasks and the idle context
//!
//! On exception entry, the hardware automatically stacks R0–R3, R12, LR, PC,
//! and xPSR onto the process stack. The PendSV handler manually saves and
//! restores R4–R11, which completes the full context save/restore.
//! The FPU context is not saved: task bodies must not use floating point.
//!
//! ## Interrupt Priorities
//!
//! - SysTick: Priority 0xFF (lowest)
//! - PendSV: Priority 0xFF (lowest), runs only when no other ISR is active
//!
//! Equal priorities keep SysTick and PendSV from preempting each other, so
//! a tick never observes a half-finished switch.

use core::arch::{asm, naked_asm};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};

use crate::config::CYCLES_PER_TICK;
use crate::kernel;
use crate::profiler::cycle_timestamp;
use crate::task::{Tick, Timestamp};

/// Lowest priority on a part with 4 priority bits.
const LOWEST_PRIORITY: u8 = 0xFF;

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure the SysTick timer for the scheduler tick.
///
/// Sets up SysTick to fire at `TICK_HZ` using the processor clock. Each tick
/// enters `SysTick` below, which calls `Scheduler::tick()`.
pub fn configure_systick(syst: &mut SYST) {
    syst.set_reload(CYCLES_PER_TICK - 1);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

/// Monotonic profiler time in processor cycles, given the current tick
/// count. SysTick counts down from its reload value once per tick.
pub fn timestamp(tick: Tick) -> Timestamp {
    let reload = SYST::get_reload();
    loop {
        // A wrap between the reads leaves counter and pending bit disagreeing.
        let pending = SCB::is_pendst_pending();
        let current = SYST::get_current();
        if SCB::is_pendst_pending() == pending {
            return cycle_timestamp(tick, reload, current, pending);
        }
    }
}

// ---------------------------------------------------------------------------
// PendSV trigger
// ---------------------------------------------------------------------------

/// Request a context switch.
///
/// PendSV fires at the lowest priority, once no other ISR is active. From
/// thread mode it is taken right after the barrier.
#[inline]
pub fn trigger_pendsv() {
    SCB::set_pendsv();
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

// ---------------------------------------------------------------------------
// Interrupt priority configuration
// ---------------------------------------------------------------------------

/// Set PendSV and SysTick to the lowest interrupt priority.
///
/// Context switches never preempt application-level ISRs.
pub fn set_interrupt_priorities(scb: &mut SCB) {
    unsafe {
        scb.set_priority(SystemHandler::PendSV, LOWEST_PRIORITY);
        scb.set_priority(SystemHandler::SysTick, LOWEST_PRIORITY);
    }
}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Start the first context by switching to PSP and branching to Thread mode.
///
/// `sp` is the address of the initial frame laid out by
/// `StackPool::init_frame`. Interrupts are enabled right before the branch.
///
/// # Safety
/// Must only be called once, with interrupts disabled, on a frame produced
/// by the scheduler.
pub unsafe fn start_first_task(sp: usize) -> ! {
    asm!(
        // Skip the software-saved R4-R11 (8 × 4 bytes)
        "adds r0, #32",
        "msr psp, r0",

        // Thread mode uses PSP (CONTROL.SPSEL = 1)
        "movs r0, #2",
        "msr control, r0",
        "isb",

        // Unwind the hardware frame by hand; this is not an exception return
        "pop {{r0-r3, r12}}",
        "pop {{r4}}",          // LR: exit trampoline
        "pop {{r5}}",          // PC: entry point
        "pop {{r6}}",          // xPSR: set by the processor
        "mov lr, r4",

        "cpsie i",
        "bx r5",

        in("r0") sp,
        options(noreturn)
    );
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// PendSV exception handler. Performs the actual context switch.
///
/// ## Sequence
/// 1. Save R4–R11 onto the outgoing stack (PSP)
/// 2. Hand the resulting PSP to the kernel, which saves it, runs the EDF
///    selection and returns the incoming PSP
/// 3. Restore R4–R11 from the incoming stack
/// 4. Return from exception to Thread mode on PSP (EXC_RETURN = 0xFFFFFFFD)
///
/// # Safety
/// Naked function entered directly by the NVIC; follows the Cortex-M4
/// exception entry/exit convention exactly.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",

        "bl {switch}",

        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",

        "ldr r0, =0xFFFFFFFD",
        "bx r0",

        switch = sym pendsv_switch,
    );
}

/// Save `psp`, reschedule, and return the stack pointer to restore.
extern "C" fn pendsv_switch(psp: usize) -> usize {
    kernel::switch_context(psp)
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// SysTick exception handler. Scheduler tick entry point.
///
/// Called at `TICK_HZ`. Updates scheduler state and pends PendSV if a
/// context switch is needed.
#[no_mangle]
pub extern "C" fn SysTick() {
    kernel::on_tick();
}

// ---------------------------------------------------------------------------
// Idle and halt
// ---------------------------------------------------------------------------

/// Body of the idle context: sleep until the next interrupt.
pub extern "C" fn idle_task() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

/// Stop the system with interrupts disabled. Used on fatal faults.
pub fn halt() -> ! {
    cortex_m::interrupt::disable();
    loop {
        cortex_m::asm::wfi();
    }
}
