// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! RAM staging for streamed payload fragments.

use crate::protocol::ErrorCode;

/// Capacity of the staging region.
pub const RAM_CAP: usize = 4096;

/// Fixed staging region with an append cursor.
///
/// Bytes accumulate here across `SEND_DATA` frames until a commit command
/// moves them to flash; the buffer itself is never visible to bus clients.
pub struct StagingBuffer {
    bytes: [u8; RAM_CAP],
    cursor: usize,
}

impl StagingBuffer {
    pub const fn new() -> Self {
        Self {
            bytes: [0; RAM_CAP],
            cursor: 0,
        }
    }

    /// Appends `data` at the cursor.
    ///
    /// Refuses, leaving the cursor untouched, once the buffer would reach
    /// capacity: the final byte of the region is never handed out, so at
    /// most `RAM_CAP - 1` bytes can be staged.
    pub fn append(&mut self, data: &[u8]) -> Result<(), ErrorCode> {
        if self.cursor + data.len() >= RAM_CAP {
            return Err(ErrorCode::RamOverflow);
        }
        self.bytes[self.cursor..self.cursor + data.len()].copy_from_slice(data);
        self.cursor += data.len();
        Ok(())
    }

    /// Ends the staging episode. The bytes stay behind; only the cursor
    /// rewinds.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// First `n` bytes of the staging region, clamped to capacity.
    ///
    /// Commits read through the cursor on purpose: bytes past it are
    /// whatever an earlier episode left behind, and a client that commits
    /// more than it staged answers for the mismatch through the CRC check.
    pub fn staged(&self, n: usize) -> &[u8] {
        &self.bytes[..n.min(RAM_CAP)]
    }
}

impl Default for StagingBuffer {
    fn default() -> Self {
        Self::new()
    }
}
