//! # Stack Pool
//!
//! One statically sized word array from which every task stack (and the
//! idle stack) is carved. Regions never overlap, are 8-byte aligned as the
//! AAPCS requires, and are painted with [`STACK_CANARY`] on allocation so
//! that overflow and the high-water mark can be detected later.
//!
//! Regions and saved stack pointers are word offsets into the pool, never raw
//! pointers; the port converts them to addresses with [`StackPool::addr_of`].

use crate::config::{CANARY_WORDS, STACK_CANARY, STACK_POOL_WORDS};

/// Words in the initial frame: 8 software-saved + 8 hardware-stacked.
pub const FRAME_WORDS: usize = 16;

/// Initial xPSR with the Thumb bit set.
const INITIAL_XPSR: u32 = 0x0100_0000;

#[repr(C, align(8))]
struct StackMemory([u32; STACK_POOL_WORDS]);

/// A stack range inside the pool, in words. Grows down from `base + words`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    pub base: usize,
    pub words: usize,
}

impl StackRegion {
    pub const EMPTY: Self = Self { base: 0, words: 0 };

    /// One past the highest word of the region.
    #[inline]
    pub const fn top(&self) -> usize {
        self.base + self.words
    }

    /// Whether a saved stack pointer lies inside the usable part of the region.
    #[inline]
    pub const fn holds(&self, sp: usize) -> bool {
        sp >= self.base + CANARY_WORDS && sp <= self.top()
    }
}

/// Why a region failed its integrity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackViolation {
    PointerOutOfRegion,
    CanaryClobbered,
}

pub struct StackPool {
    memory: StackMemory,
    used: usize,
}

impl StackPool {
    pub const fn new() -> Self {
        Self {
            memory: StackMemory([STACK_CANARY; STACK_POOL_WORDS]),
            used: 0,
        }
    }

    /// Carve a region of at least `words` words, rounded up to keep
    /// 8-byte alignment. Returns `None` when the pool is exhausted.
    pub fn allocate(&mut self, words: usize) -> Option<StackRegion> {
        let words = words.checked_add(1)? & !1;
        let end = self.used.checked_add(words)?;
        if end > STACK_POOL_WORDS {
            return None;
        }
        let region = StackRegion { base: self.used, words };
        self.used = end;
        self.memory.0[region.base..region.top()].fill(STACK_CANARY);
        Some(region)
    }

    /// Words still free in the pool.
    pub fn remaining(&self) -> usize {
        STACK_POOL_WORDS - self.used
    }

    /// Lay out the initial exception frame so that the first context restore
    /// starts executing `entry`.
    ///
    /// ## Frame Layout (top = high address, growing down)
    ///
    /// ```text
    /// [Hardware stacked frame]
    ///   xPSR  (Thumb bit set)
    ///   PC    (task entry point)
    ///   LR    (exit trampoline)
    ///   R12, R3, R2, R1, R0   (0)
    /// [Software saved context]
    ///   R11 .. R4             (0)   <- returned stack pointer
    /// ```
    ///
    /// Returns the saved stack pointer as a pool offset.
    pub fn init_frame(&mut self, region: StackRegion, entry: usize, exit: usize) -> usize {
        let sp = region.top() - FRAME_WORDS;
        let frame = &mut self.memory.0[sp..region.top()];
        frame[..13].fill(0); // R4-R11, R0-R3, R12
        frame[13] = exit as u32; // LR
        frame[14] = entry as u32; // PC
        frame[15] = INITIAL_XPSR;
        sp
    }

    /// Check a region at switch-out: the saved pointer must be inside the
    /// region and the guard words at its low end must be untouched.
    pub fn check(&self, region: StackRegion, sp: usize) -> Result<(), StackViolation> {
        if !region.holds(sp) {
            return Err(StackViolation::PointerOutOfRegion);
        }
        let guard = &self.memory.0[region.base..region.base + CANARY_WORDS];
        if guard.iter().any(|&w| w != STACK_CANARY) {
            return Err(StackViolation::CanaryClobbered);
        }
        Ok(())
    }

    /// Words at the low end of the region that were never written.
    pub fn unused_words(&self, region: StackRegion) -> usize {
        self.memory.0[region.base..region.top()]
            .iter()
            .take_while(|&&w| w == STACK_CANARY)
            .count()
    }

    /// Address of the word at `offset`.
    #[inline]
    pub fn addr_of(&self, offset: usize) -> usize {
        self.memory.0.as_ptr() as usize + offset * 4
    }

    /// Pool offset of `addr`. Addresses below the pool wrap to huge offsets,
    /// which no region holds.
    #[inline]
    pub fn offset_of(&self, addr: usize) -> usize {
        addr.wrapping_sub(self.memory.0.as_ptr() as usize) / 4
    }

    #[cfg(test)]
    pub(crate) fn word_mut(&mut self, offset: usize) -> &mut u32 {
        &mut self.memory.0[offset]
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regions_do_not_overlap_and_stay_aligned() {
        let mut pool = StackPool::new();
        let a = pool.allocate(63).unwrap();
        let b = pool.allocate(64).unwrap();
        assert_eq!(a.words, 64);
        assert_eq!(b.base, a.top());
        assert_eq!(pool.addr_of(a.base) % 8, 0);
        assert_eq!(pool.addr_of(b.top()) % 8, 0);
    }

    #[test]
    fn test_pool_exhaustion() {
        let mut pool = StackPool::new();
        assert!(pool.allocate(STACK_POOL_WORDS).is_some());
        assert_eq!(pool.remaining(), 0);
        assert!(pool.allocate(2).is_none());
    }

    #[test]
    fn test_oversized_request_fails_without_wrapping() {
        let mut pool = StackPool::new();
        assert!(pool.allocate(usize::MAX).is_none());
        assert!(pool.allocate(usize::MAX - 1).is_none());
        assert_eq!(pool.remaining(), STACK_POOL_WORDS);
        assert_eq!(pool.allocate(63).map(|r| r.words), Some(64));
    }

    #[test]
    fn test_initial_frame_layout() {
        let mut pool = StackPool::new();
        let region = pool.allocate(64).unwrap();
        let sp = pool.init_frame(region, 0x0800_1235, 0x0800_2001);
        assert_eq!(sp, region.top() - FRAME_WORDS);
        assert_eq!(*pool.word_mut(sp), 0);
        assert_eq!(*pool.word_mut(sp + 13), 0x0800_2001);
        assert_eq!(*pool.word_mut(sp + 14), 0x0800_1235);
        assert_eq!(*pool.word_mut(sp + 15), INITIAL_XPSR);
        assert!(pool.check(region, sp).is_ok());
        assert_eq!(pool.unused_words(region), 64 - FRAME_WORDS);
    }

    #[test]
    fn test_overflow_detection() {
        let mut pool = StackPool::new();
        let region = pool.allocate(64).unwrap();
        let sp = pool.init_frame(region, 1, 2);

        // Pointer inside the guard words
        assert_eq!(pool.check(region, region.base + 1), Err(StackViolation::PointerOutOfRegion));
        // Pointer above the region
        assert_eq!(pool.check(region, region.top() + 1), Err(StackViolation::PointerOutOfRegion));

        *pool.word_mut(region.base + 2) = 0xDEAD_BEEF;
        assert_eq!(pool.check(region, sp), Err(StackViolation::CanaryClobbered));
        assert_eq!(pool.unused_words(region), 2);
    }

    #[test]
    fn test_address_round_trip() {
        let pool = StackPool::new();
        assert_eq!(pool.offset_of(pool.addr_of(100)), 100);
        // Below the pool: wraps far outside any region
        assert!(pool.offset_of(pool.addr_of(0).wrapping_sub(4)) > STACK_POOL_WORDS);
    }
}
