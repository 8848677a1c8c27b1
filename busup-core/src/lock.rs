// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Device lock and the last-error register.
//!
//! Every mutating command asks the lock first. The device powers up locked
//! and stays so until an operator proves presence through the program
//! button, or knowledge of the chip unique ID through the unlock key. There
//! is no re-lock command; only a reset closes the device again.

use crate::protocol::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LockState {
    Locked,
    Unlocked,
}

/// Lock state plus the last-error register that gates and reports every
/// command.
pub struct LockManager {
    state: LockState,
    last_error: ErrorCode,
}

impl LockManager {
    pub const fn new() -> Self {
        Self {
            state: LockState::Locked,
            last_error: ErrorCode::Success,
        }
    }

    pub fn is_unlocked(&self) -> bool {
        matches!(self.state, LockState::Unlocked)
    }

    pub fn last_error(&self) -> ErrorCode {
        self.last_error
    }

    pub fn set_error(&mut self, error: ErrorCode) {
        self.last_error = error;
    }

    /// Reads the register and clears it to success.
    pub fn take_error(&mut self) -> ErrorCode {
        core::mem::replace(&mut self.last_error, ErrorCode::Success)
    }

    /// The operator is physically present; no key required.
    pub fn unlock_by_presence(&mut self) {
        self.state = LockState::Unlocked;
        self.last_error = ErrorCode::Success;
    }

    /// First pass of the key check: sweeps every one of the first 12 unique
    /// ID bytes, latching a mismatch without short-circuiting. A key too
    /// short to cover a position counts as a mismatch at that position.
    pub fn sweep_key(&mut self, key: &[u8], uid: &[u8; 16]) {
        for (position, expected) in uid.iter().take(12).enumerate() {
            if key.get(position) != Some(expected) {
                self.last_error = ErrorCode::UidMismatch;
            }
        }
    }

    /// Second pass: opens the lock unless the register holds a mismatch.
    /// A `UID_MISMATCH` still latched from an earlier frame also keeps the
    /// device locked, even for a correct key.
    pub fn finish_unlock(&mut self) {
        if self.last_error != ErrorCode::UidMismatch {
            self.state = LockState::Unlocked;
            self.last_error = ErrorCode::Success;
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UID: [u8; 16] = [
        0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF,
        0x00,
    ];

    #[test]
    fn powers_up_locked_and_clean() {
        let lock = LockManager::new();
        assert!(!lock.is_unlocked());
        assert_eq!(lock.last_error(), ErrorCode::Success);
    }

    #[test]
    fn presence_opens_the_lock() {
        let mut lock = LockManager::new();
        lock.set_error(ErrorCode::CrcError);
        lock.unlock_by_presence();
        assert!(lock.is_unlocked());
        assert_eq!(lock.last_error(), ErrorCode::Success);
    }

    #[test]
    fn a_correct_key_opens_the_lock() {
        let mut lock = LockManager::new();
        lock.sweep_key(&UID[..12], &UID);
        lock.finish_unlock();
        assert!(lock.is_unlocked());
        assert_eq!(lock.last_error(), ErrorCode::Success);
    }

    #[test]
    fn only_the_first_twelve_bytes_matter() {
        let mut lock = LockManager::new();
        let mut key = [0u8; 16];
        key[..12].copy_from_slice(&UID[..12]);
        // Trailing bytes disagree with the UID and are ignored.
        lock.sweep_key(&key, &UID);
        lock.finish_unlock();
        assert!(lock.is_unlocked());
    }

    #[test]
    fn any_mismatched_byte_keeps_the_lock_shut() {
        let mut lock = LockManager::new();
        let mut key = UID;
        key[11] ^= 0x01;
        lock.sweep_key(&key[..12], &UID);
        lock.finish_unlock();
        assert!(!lock.is_unlocked());
        assert_eq!(lock.last_error(), ErrorCode::UidMismatch);
    }

    #[test]
    fn a_short_key_is_a_mismatch() {
        let mut lock = LockManager::new();
        lock.sweep_key(&UID[..4], &UID);
        lock.finish_unlock();
        assert!(!lock.is_unlocked());
        assert_eq!(lock.last_error(), ErrorCode::UidMismatch);
    }

    #[test]
    fn a_stale_mismatch_blocks_a_correct_key() {
        let mut lock = LockManager::new();
        lock.set_error(ErrorCode::UidMismatch);
        lock.sweep_key(&UID[..12], &UID);
        lock.finish_unlock();
        assert!(!lock.is_unlocked());
    }

    #[test]
    fn take_error_reads_and_clears() {
        let mut lock = LockManager::new();
        lock.set_error(ErrorCode::RamOverflow);
        assert_eq!(lock.take_error(), ErrorCode::RamOverflow);
        assert_eq!(lock.last_error(), ErrorCode::Success);
    }
}
