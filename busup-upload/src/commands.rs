// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command implementations for updater operations.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, bail};
use crc::{CRC_32_ISO_HDLC, Crc};
use indicatif::{ProgressBar, ProgressStyle};

use busup_core::descriptor::{BootDescriptor, vector_table_sum};
use busup_core::flash::SECTOR_SIZE;
use busup_core::protocol::opcode;

use crate::cli::Key;
use crate::transport::Transport;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Streamed-payload size, bounded by the frame's four-bit count field.
const STAGE_CHUNK: usize = 12;
/// Bytes committed per PROGRAM frame. Must be one of the transfer sizes the
/// flash controller accepts.
const PROGRAM_WINDOW: usize = 1024;

/// Unlock the device, by key or by operator presence.
pub fn unlock(transport: &mut Transport, uid: Option<Key>) -> Result<()> {
    match uid {
        Some(key) => transport.send_expect_ack(opcode::UNLOCK_DEVICE, &key)?,
        None => transport.send_expect_ack(opcode::UNLOCK_DEVICE, &[])?,
    }
    println!("Device unlocked.");
    Ok(())
}

/// Read and display the chip unique ID.
pub fn request_uid(transport: &mut Transport) -> Result<()> {
    transport.send_expect_ack(opcode::REQUEST_UID, &[])?;
    let uid = transport.read_reply(opcode::RESPONSE_UID, 12)?;

    println!("Unique ID: {}", hex_string(&uid));
    println!("Unlock later with:");
    println!(
        "  busup-upload --port {} unlock {}",
        transport.port_name(),
        hex_string(&uid)
    );
    Ok(())
}

/// Erase a single sector.
pub fn erase(transport: &mut Transport, sector: u8) -> Result<()> {
    transport.send_expect_ack(opcode::ERASE_SECTOR, &[sector])?;
    println!("Sector {sector} erased.");
    Ok(())
}

/// Upload a firmware image and commit its boot descriptor.
pub fn upload(
    transport: &mut Transport,
    file: &Path,
    address: u32,
    slot: u8,
    version_address: Option<u32>,
) -> Result<()> {
    let firmware =
        fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    if firmware.len() < 32 {
        bail!("Image too small to carry a vector table");
    }

    let table: [u8; 32] = firmware[..32].try_into().expect("sliced to 32 bytes");
    if vector_table_sum(&table) != 0 {
        println!("Warning: vector table checksum does not balance;");
        println!("         the device will refuse the boot descriptor.");
    }

    let image_crc = CRC32.checksum(&firmware);
    println!(
        "Firmware: {} ({} bytes, CRC32: 0x{:08x})",
        file.display(),
        firmware.len(),
        image_crc
    );
    println!("Target:   0x{address:08x}, descriptor slot {slot}");
    println!();

    // Erase the covering sectors first; each erase also rewinds the
    // device's staging buffer.
    let first_sector = address / SECTOR_SIZE;
    let last_sector = (address + firmware.len() as u32 - 1) / SECTOR_SIZE;
    if last_sector > u8::MAX as u32 {
        bail!("Image extends past the last addressable sector");
    }
    print!("Erasing sectors {first_sector}..={last_sector}... ");
    std::io::stdout().flush()?;
    for sector in first_sector..=last_sector {
        transport.send_expect_ack(opcode::ERASE_SECTOR, &[sector as u8])?;
    }
    println!("OK");

    // Stream and commit one window at a time.
    let pb = ProgressBar::new(firmware.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )?
            .progress_chars("#>-"),
    );

    let mut offset = 0u32;
    for window in firmware.chunks(PROGRAM_WINDOW) {
        let padded = pad_window(window);
        for chunk in padded.chunks(STAGE_CHUNK) {
            transport.send_expect_ack(opcode::SEND_DATA, chunk)?;
        }

        let mut payload = (padded.len() as u32).to_be_bytes().to_vec();
        payload.extend_from_slice(&(address + offset).to_be_bytes());
        payload.extend_from_slice(&CRC32.checksum(&padded).to_be_bytes());
        transport.send_expect_ack(opcode::PROGRAM, &payload)?;

        offset += window.len() as u32;
        pb.set_position(offset as u64);
    }
    pb.finish_with_message("Upload complete");
    println!();

    // Build, stage and commit the descriptor.
    print!("Committing boot descriptor... ");
    std::io::stdout().flush()?;
    let block = BootDescriptor {
        start_address: address,
        end_address: address + firmware.len() as u32,
        crc: image_crc,
        app_version_address: version_address.unwrap_or(address),
    }
    .to_block();

    for chunk in block.chunks(STAGE_CHUNK) {
        transport.send_expect_ack(opcode::SEND_DATA, chunk)?;
    }
    let mut payload = CRC32.checksum(&block).to_be_bytes().to_vec();
    payload.push(slot);
    transport.send_expect_ack(opcode::UPDATE_BOOT_DESC, &payload)?;
    println!("OK");

    println!();
    println!("Firmware uploaded; restart the device to boot it.");
    Ok(())
}

/// Read the version text behind a descriptor slot.
pub fn app_version(transport: &mut Transport, slot: u8) -> Result<()> {
    transport.send_expect_ack(opcode::APP_VERSION_REQUEST, &[slot])?;
    let version = transport.read_reply(opcode::APP_VERSION_RESPONSE, 12)?;
    println!(
        "Slot {slot} application: {}",
        String::from_utf8_lossy(&version).trim_end_matches('\0')
    );
    Ok(())
}

/// Fetch and clear the device's last error code.
pub fn last_error(transport: &mut Transport) -> Result<()> {
    let code = transport.last_error()?;
    println!("Last error: {:?} (0x{:04X})", code, code.code());
    Ok(())
}

/// Set the debug emulation mask.
pub fn set_emulation(transport: &mut Transport, mask: u8) -> Result<()> {
    transport.send_expect_ack(opcode::SET_EMULATION, &[mask])?;
    if mask & 0x0F != 0 {
        println!("Emulation on: flash operations are skipped and acknowledged.");
    } else {
        println!("Emulation off.");
    }
    Ok(())
}

/// Pad a window with erased-flash bytes up to a transfer size the flash
/// controller accepts.
fn pad_window(window: &[u8]) -> Vec<u8> {
    let target = [256usize, 512, 1024, 4096]
        .into_iter()
        .find(|&n| n >= window.len())
        .unwrap_or(4096);
    let mut padded = window.to_vec();
    padded.resize(target, 0xFF);
    padded
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_pad_to_accepted_transfer_sizes() {
        assert_eq!(pad_window(&[0u8; 10]).len(), 256);
        assert_eq!(pad_window(&[0u8; 256]).len(), 256);
        assert_eq!(pad_window(&[0u8; 300]).len(), 512);
        assert_eq!(pad_window(&[0u8; 1000]).len(), 1024);
        let padded = pad_window(&[0xABu8; 10]);
        assert_eq!(&padded[..10], &[0xAB; 10]);
        assert!(padded[10..].iter().all(|&b| b == 0xFF));
    }
}
