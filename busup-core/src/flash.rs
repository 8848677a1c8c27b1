// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Interface to the in-application flash programming entry points.
//!
//! The engine never touches flash directly; the device build implements
//! [`FlashDriver`] over the MCU's programming routines, host tests implement
//! it over an in-memory image. Erase and program calls are synchronous and
//! may stall for tens of milliseconds, which is acceptable because the
//! updater is the only code running during an update session.

pub const SECTOR_SIZE: u32 = 4096;
pub const PAGE_SIZE: u32 = 256;
/// End of addressable flash.
pub const FLASH_END: u32 = 0x10_0000;

/// Raw status word reported by a flash programming entry point.
///
/// The values are device-specific and travel to the bus client unchanged
/// through `GET_LAST_ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashError(pub u16);

/// Flash programming entry points consumed by the command engine.
pub trait FlashDriver {
    /// Erases one 4 KiB sector.
    fn erase_sector(&mut self, sector: u8) -> Result<(), FlashError>;

    /// Erases one 256-byte page.
    fn erase_page(&mut self, page: u32) -> Result<(), FlashError>;

    /// Programs `data` at `address`. The controller accepts transfer sizes
    /// of 256, 512, 1024 or 4096 bytes only; anything else is its error to
    /// report.
    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError>;

    /// Reads `buf.len()` bytes starting at `address`.
    fn read(&self, address: u32, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Reads the 16-byte chip unique ID.
    fn read_unique_id(&self, id: &mut [u8; 16]) -> Result<(), FlashError>;
}

/// Number of the sector containing `address`, rounding up: a range endpoint
/// on a sector boundary claims the sector it abuts.
pub fn address_to_sector(address: u32) -> u32 {
    address.div_ceil(SECTOR_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_rounding_claims_the_abutting_sector() {
        assert_eq!(address_to_sector(0), 0);
        assert_eq!(address_to_sector(1), 1);
        assert_eq!(address_to_sector(0x0FFF), 1);
        assert_eq!(address_to_sector(0x1000), 1);
        assert_eq!(address_to_sector(0x1001), 2);
        assert_eq!(address_to_sector(0x3FFF), 4);
    }
}
