//! # Synchronization Primitives
//!
//! Interrupt-safe critical section abstractions.
//! All shared kernel state must be accessed within a critical section
//! to prevent data races between task code and interrupt handlers.
//!
//! On the Cortex-M4 the `critical-section` implementation comes from
//! `cortex-m` (PRIMASK, single core); on the host it comes from the crate's
//! `std` feature, so the same code runs under `cargo test`.

use core::cell::RefCell;

use critical_section::{CriticalSection, Mutex};

/// Execute a closure within a critical section (interrupts disabled).
///
/// Interrupts are disabled on entry and restored on exit, ensuring
/// atomicity of the enclosed operation. Nesting is allowed.
///
/// # Usage
/// ```ignore
/// sync::critical_section(|cs| {
///     // Access shared state safely
/// });
/// ```
///
/// Keep critical sections short; SysTick and PendSV are held off while one
/// is active.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}

/// A value shared between tasks and interrupt handlers.
///
/// Every access goes through [`Shared::lock`], which enters a critical
/// section and hands out a unique reference for the duration of the closure.
pub struct Shared<T> {
    inner: Mutex<RefCell<T>>,
}

impl<T> Shared<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(value)),
        }
    }

    /// Run `f` with exclusive access to the value.
    ///
    /// Calling `lock` on the same value from inside `f` panics.
    #[inline]
    pub fn lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        critical_section(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }

    /// Like [`lock`](Self::lock) for callers already inside a critical section.
    #[inline]
    pub fn lock_in<R>(&self, cs: CriticalSection<'_>, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.inner.borrow_ref_mut(cs))
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_mutates_shared_value() {
        static COUNTER: Shared<u32> = Shared::new(0);
        for _ in 0..5 {
            COUNTER.lock(|c| *c += 1);
        }
        assert_eq!(COUNTER.lock(|c| *c), 5);
    }

    #[test]
    fn test_nested_sections_on_distinct_values() {
        let a = Shared::new(1u8);
        let b = Shared::new(2u8);
        let sum = a.lock(|x| b.lock(|y| *x + *y));
        assert_eq!(sum, 3);
        let doubled = critical_section(|cs| a.lock_in(cs, |x| *x * 2));
        assert_eq!(doubled, 2);
    }
}
