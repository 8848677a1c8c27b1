// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! In-memory hardware doubles for host-side tests.

use crate::flash::{FlashDriver, FlashError, PAGE_SIZE, SECTOR_SIZE};
use core::convert::Infallible;
use embedded_hal::digital::{ErrorType, InputPin};

/// Status words the fake controller reports, in the real controller's
/// numbering.
pub const STATUS_SRC_ADDR_NOT_MAPPED: u16 = 4;
pub const STATUS_DST_ADDR_NOT_MAPPED: u16 = 5;
pub const STATUS_INVALID_SECTOR: u16 = 7;

/// A flash image in a `Vec`, erased to 0xFF like the real part.
pub struct FakeFlash {
    bytes: Vec<u8>,
    unique_id: [u8; 16],
}

impl FakeFlash {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0xFF; size],
            unique_id: [0; 16],
        }
    }

    pub fn with_unique_id(mut self, unique_id: [u8; 16]) -> Self {
        self.unique_id = unique_id;
        self
    }

    /// Test backdoor: place bytes without going through `program`.
    pub fn load(&mut self, address: u32, data: &[u8]) {
        let start = address as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);
    }

    /// Test backdoor: inspect a region.
    pub fn bytes(&self, address: u32, len: usize) -> &[u8] {
        let start = address as usize;
        &self.bytes[start..start + len]
    }

    fn check_range(&self, address: u32, len: usize, status: u16) -> Result<usize, FlashError> {
        let start = address as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.bytes.len() => Ok(start),
            _ => Err(FlashError(status)),
        }
    }
}

impl FlashDriver for FakeFlash {
    fn erase_sector(&mut self, sector: u8) -> Result<(), FlashError> {
        let start = self.check_range(
            sector as u32 * SECTOR_SIZE,
            SECTOR_SIZE as usize,
            STATUS_INVALID_SECTOR,
        )?;
        self.bytes[start..start + SECTOR_SIZE as usize].fill(0xFF);
        Ok(())
    }

    fn erase_page(&mut self, page: u32) -> Result<(), FlashError> {
        let start = self.check_range(
            page.wrapping_mul(PAGE_SIZE),
            PAGE_SIZE as usize,
            STATUS_INVALID_SECTOR,
        )?;
        self.bytes[start..start + PAGE_SIZE as usize].fill(0xFF);
        Ok(())
    }

    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        let start = self.check_range(address, data.len(), STATUS_DST_ADDR_NOT_MAPPED)?;
        self.bytes[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let start = self.check_range(address, buf.len(), STATUS_SRC_ADDR_NOT_MAPPED)?;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        Ok(())
    }

    fn read_unique_id(&self, id: &mut [u8; 16]) -> Result<(), FlashError> {
        *id = self.unique_id;
        Ok(())
    }
}

/// The program button, scripted.
pub struct FakePin {
    asserted: bool,
}

impl FakePin {
    pub fn asserted() -> Self {
        Self { asserted: true }
    }

    pub fn released() -> Self {
        Self { asserted: false }
    }
}

impl ErrorType for FakePin {
    type Error = Infallible;
}

impl InputPin for FakePin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.asserted)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.asserted)
    }
}
