//! # Mailbox
//!
//! Single-slot, non-blocking message passing between tasks (and from
//! interrupt handlers). A send into an occupied slot is rejected and the
//! value already waiting stays in place; a receive from an empty slot
//! returns `None`. Neither side ever blocks, so a periodic task cannot miss
//! its deadline waiting on a peer.

use crate::sync::Shared;

pub struct Mailbox<T> {
    slot: Shared<Option<T>>,
}

impl<T> Mailbox<T> {
    pub const fn new() -> Self {
        Self {
            slot: Shared::new(None),
        }
    }

    /// Deposit `value` if the slot is empty.
    ///
    /// Returns `false` (and drops `value`) when a message is already waiting.
    pub fn try_send(&self, value: T) -> bool {
        self.slot.lock(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
            true
        })
    }

    /// Take the waiting message, if any.
    pub fn try_receive(&self) -> Option<T> {
        self.slot.lock(|slot| slot.take())
    }

    /// Discard any waiting message.
    pub fn reset(&self) {
        self.slot.lock(|slot| *slot = None);
    }

    pub fn is_occupied(&self) -> bool {
        self.slot.lock(|slot| slot.is_some())
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_send_is_rejected() {
        let mb = Mailbox::new();
        assert!(mb.try_send(1u32));
        assert!(!mb.try_send(2));
        assert!(mb.is_occupied());
        assert_eq!(mb.try_receive(), Some(1));
        assert_eq!(mb.try_receive(), None);
        assert!(!mb.is_occupied());
    }

    #[test]
    fn test_reset_empties_slot() {
        let mb: Mailbox<[u8; 4]> = Mailbox::new();
        assert!(mb.try_send(*b"ping"));
        mb.reset();
        assert_eq!(mb.try_receive(), None);
        assert!(mb.try_send(*b"pong"));
        assert_eq!(mb.try_receive(), Some(*b"pong"));
    }

    #[test]
    fn test_static_mailbox() {
        static LINK: Mailbox<u16> = Mailbox::new();
        assert!(LINK.try_send(42));
        assert_eq!(LINK.try_receive(), Some(42));
    }
}
