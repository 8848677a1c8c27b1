// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Boot descriptor blocks and application startability.
//!
//! A descriptor is a 256-byte flash record telling the bootloader where an
//! application lives and how to check it before jumping. Slots count down
//! from the first application sector: slot `i` sits one block per index
//! below it.

use crate::flash::{FLASH_END, FlashDriver, PAGE_SIZE};
use crc::{CRC_32_ISO_HDLC, Crc};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Size of one descriptor block in flash.
pub const BOOT_BLOCK_SIZE: u32 = 256;
/// Base of the first application sector; descriptor slots sit right below.
pub const FIRST_SECTOR: u32 = 0x4000;
/// Flash page holding descriptor slot 0.
pub const BOOT_BLOCK_PAGE: u32 = FIRST_SECTOR / PAGE_SIZE - 1;
/// No startable application begins above this address.
pub const APP_START_CEILING: u32 = 0x5000;
/// Version pointers at or past this read like uninitialized flash.
pub const VERSION_PTR_CEILING: u32 = 0x5_0000;
/// Length of the printable version text inside an application image.
pub const VERSION_LEN: usize = 12;

/// Flash address of descriptor slot `slot`.
///
/// Wrapping arithmetic: an absurd slot index maps to an address the flash
/// driver refuses, rather than a panic mid-frame.
pub fn slot_address(slot: u8) -> u32 {
    FIRST_SECTOR.wrapping_sub((1 + slot as u32) * BOOT_BLOCK_SIZE)
}

/// Flash page number of descriptor slot `slot`.
pub fn slot_page(slot: u8) -> u32 {
    BOOT_BLOCK_PAGE.wrapping_sub(slot as u32)
}

/// One boot descriptor, decoded from its block form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootDescriptor {
    pub start_address: u32,
    pub end_address: u32,
    /// CRC-32 over the application bytes `[start_address, end_address)`.
    pub crc: u32,
    /// Where the application keeps its 12 bytes of version text.
    pub app_version_address: u32,
}

impl BootDescriptor {
    /// Decodes the four leading fields of a block. Little-endian: the block
    /// is the record exactly as it sits in device memory.
    pub fn parse(block: &[u8]) -> Self {
        let word = |offset: usize| {
            u32::from_le_bytes([
                block[offset],
                block[offset + 1],
                block[offset + 2],
                block[offset + 3],
            ])
        };
        Self {
            start_address: word(0),
            end_address: word(4),
            crc: word(8),
            app_version_address: word(12),
        }
    }

    /// Serializes back to the 256-byte block form, padded with 0xFF like
    /// erased flash.
    pub fn to_block(&self) -> [u8; BOOT_BLOCK_SIZE as usize] {
        let mut block = [0xFF; BOOT_BLOCK_SIZE as usize];
        block[0..4].copy_from_slice(&self.start_address.to_le_bytes());
        block[4..8].copy_from_slice(&self.end_address.to_le_bytes());
        block[8..12].copy_from_slice(&self.crc.to_le_bytes());
        block[12..16].copy_from_slice(&self.app_version_address.to_le_bytes());
        block
    }

    /// Decides whether this descriptor points at a startable application.
    ///
    /// All of: the image begins at or below the first eligible address,
    /// ends within flash, is non-empty, carries the advertised CRC, and its
    /// vector table checksum balances. Unreadable flash fails the check.
    pub fn validate(&self, flash: &impl FlashDriver) -> bool {
        if self.start_address > APP_START_CEILING {
            return false;
        }
        if self.end_address > FLASH_END {
            return false;
        }
        if self.start_address == self.end_address {
            return false;
        }
        let length = self.end_address.wrapping_sub(self.start_address);
        match image_crc(flash, self.start_address, length) {
            Some(crc) if crc == self.crc => vector_table_balances(flash, self.start_address),
            _ => false,
        }
    }

    /// Address of the version text, unless the field reads like
    /// uninitialized flash.
    pub fn version_pointer(&self) -> Option<u32> {
        (self.app_version_address < VERSION_PTR_CEILING).then_some(self.app_version_address)
    }
}

/// CRC-32 over `length` flash bytes starting at `start`, page-sized chunks
/// at a time. `None` when any chunk is unreadable.
fn image_crc(flash: &impl FlashDriver, start: u32, length: u32) -> Option<u32> {
    let mut digest = CRC32.digest();
    let mut chunk = [0u8; PAGE_SIZE as usize];
    let mut address = start;
    let mut remaining = length;
    while remaining > 0 {
        let n = remaining.min(PAGE_SIZE) as usize;
        flash.read(address, &mut chunk[..n]).ok()?;
        digest.update(&chunk[..n]);
        address = address.wrapping_add(n as u32);
        remaining -= n as u32;
    }
    Some(digest.finalize())
}

/// Reads the vector table at `start` and checks its checksum.
fn vector_table_balances(flash: &impl FlashDriver, start: u32) -> bool {
    let mut table = [0u8; 32];
    if flash.read(start, &mut table).is_err() {
        return false;
    }
    vector_table_sum(&table) == 0
}

/// Sum of the first eight 32-bit vectors, mod 2^32.
///
/// Cortex-M images reserve one checksum word so that this sum vanishes for
/// a well-formed table.
pub fn vector_table_sum(table: &[u8; 32]) -> u32 {
    table.chunks_exact(4).fold(0u32, |sum, word| {
        sum.wrapping_add(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doubles::FakeFlash;

    /// Writes a minimal application at `start`: a balanced vector table
    /// followed by a recognizable body. Returns its descriptor.
    fn install_app(flash: &mut FakeFlash, start: u32, body: &[u8]) -> BootDescriptor {
        let mut image = vec![0u8; 32 + body.len()];
        for (i, word) in image[..28].chunks_exact_mut(4).enumerate() {
            word.copy_from_slice(&(0x1111_1111u32 * (i as u32 + 1)).to_le_bytes());
        }
        let partial: u32 = image[..28]
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .fold(0u32, u32::wrapping_add);
        image[28..32].copy_from_slice(&partial.wrapping_neg().to_le_bytes());
        image[32..].copy_from_slice(body);

        flash.load(start, &image);
        BootDescriptor {
            start_address: start,
            end_address: start + image.len() as u32,
            crc: CRC32.checksum(&image),
            app_version_address: start + 32,
        }
    }

    #[test]
    fn block_form_round_trips() {
        let descriptor = BootDescriptor {
            start_address: 0x4000,
            end_address: 0x5000,
            crc: 0xCAFE_F00D,
            app_version_address: 0x4100,
        };
        let block = descriptor.to_block();
        assert_eq!(BootDescriptor::parse(&block), descriptor);
        assert!(block[16..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn a_well_formed_image_validates() {
        let mut flash = FakeFlash::new(FLASH_END as usize);
        let descriptor = install_app(&mut flash, 0x2000, b"application body");
        assert!(descriptor.validate(&flash));
    }

    #[test]
    fn start_above_the_ceiling_fails() {
        let mut flash = FakeFlash::new(FLASH_END as usize);
        let mut descriptor = install_app(&mut flash, 0x2000, b"body");
        descriptor.start_address = APP_START_CEILING + 4;
        assert!(!descriptor.validate(&flash));
    }

    #[test]
    fn end_past_flash_fails() {
        let mut flash = FakeFlash::new(FLASH_END as usize);
        let mut descriptor = install_app(&mut flash, 0x2000, b"body");
        descriptor.end_address = FLASH_END + 1;
        assert!(!descriptor.validate(&flash));
    }

    #[test]
    fn an_empty_image_fails() {
        let mut flash = FakeFlash::new(FLASH_END as usize);
        let mut descriptor = install_app(&mut flash, 0x2000, b"body");
        descriptor.end_address = descriptor.start_address;
        assert!(!descriptor.validate(&flash));
    }

    #[test]
    fn a_corrupted_image_fails_the_crc() {
        let mut flash = FakeFlash::new(FLASH_END as usize);
        let descriptor = install_app(&mut flash, 0x2000, b"body");
        flash.load(0x2020, b"X");
        assert!(!descriptor.validate(&flash));
    }

    #[test]
    fn an_unbalanced_vector_table_fails() {
        let mut flash = FakeFlash::new(FLASH_END as usize);
        let descriptor = install_app(&mut flash, 0x2000, b"body");

        // Recompute the descriptor CRC for a broken checksum word, so only
        // the vector rule can fail.
        let mut image = vec![0u8; (descriptor.end_address - descriptor.start_address) as usize];
        flash.read(0x2000, &mut image).unwrap();
        image[28] ^= 0x01;
        flash.load(0x2000, &image);
        let tampered = BootDescriptor {
            crc: CRC32.checksum(&image),
            ..descriptor
        };
        assert!(!tampered.validate(&flash));
    }

    #[test]
    fn slots_count_down_from_the_first_application_sector() {
        assert_eq!(slot_address(0), FIRST_SECTOR - 256);
        assert_eq!(slot_address(1), FIRST_SECTOR - 512);
        assert_eq!(slot_page(0), BOOT_BLOCK_PAGE);
        assert_eq!(slot_page(1), BOOT_BLOCK_PAGE - 1);
        // Absurd slots wrap into addresses no driver accepts.
        assert!(slot_address(255) > FIRST_SECTOR);
    }

    #[test]
    fn version_pointer_guards_against_blank_fields() {
        let descriptor = BootDescriptor {
            start_address: 0x2000,
            end_address: 0x3000,
            crc: 0,
            app_version_address: 0xFFFF_FFFF,
        };
        assert_eq!(descriptor.version_pointer(), None);

        let descriptor = BootDescriptor {
            app_version_address: 0x2020,
            ..descriptor
        };
        assert_eq!(descriptor.version_pointer(), Some(0x2020));
    }
}
