// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-line interface definitions.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;
use crate::transport::Transport;

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "busup-upload")]
#[command(about = "Firmware upload tool for the busup updater")]
pub struct Cli {
    /// Serial port of the bus access device (e.g., /dev/ttyACM0)
    #[arg(short, long)]
    pub port: String,

    /// Baud rate of the serial link
    #[arg(short, long, default_value = "115200")]
    pub baud: u32,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Unlock the device with its unique ID, or via a pressed program button
    Unlock {
        /// First 12 unique ID bytes as 24 hex digits; omit while holding
        /// the program button
        #[arg(value_name = "UID", value_parser = parse_uid)]
        uid: Option<Key>,
    },

    /// Read the chip unique ID (program button must be pressed)
    RequestUid,

    /// Erase one 4 KiB flash sector
    Erase {
        /// Sector number
        #[arg(value_name = "SECTOR")]
        sector: u8,
    },

    /// Upload a firmware image and commit its boot descriptor
    Upload {
        /// Firmware binary file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Flash address of the image in hex
        #[arg(short, long, default_value = "0x4000", value_parser = parse_hex_u32)]
        address: u32,

        /// Boot descriptor slot to commit
        #[arg(short, long, default_value = "0")]
        slot: u8,

        /// Address of the 12-byte version text in hex (default: image base)
        #[arg(long, value_parser = parse_hex_u32)]
        version_address: Option<u32>,
    },

    /// Read the version text of the application behind a descriptor slot
    AppVersion {
        /// Boot descriptor slot
        #[arg(default_value = "0")]
        slot: u8,
    },

    /// Fetch and clear the device's last error code
    LastError,

    /// Set the debug emulation mask (low nibble bypasses flash writes)
    SetEmulation {
        /// Mask value
        mask: u8,
    },
}

/// The 12 unique ID bytes used as the unlock key.
pub type Key = [u8; 12];

/// Parse a hex string (with or without 0x prefix) into a u32.
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(s, 16).map_err(|e| format!("invalid hex value: {e}"))
}

/// Parse 24 hex digits into the 12-byte unlock key.
fn parse_uid(s: &str) -> Result<Key, String> {
    let digits: Vec<char> = s.chars().filter(|c| !matches!(c, ' ' | ':')).collect();
    if digits.len() != 24 {
        return Err(format!("expected 24 hex digits, got {}", digits.len()));
    }
    let mut key = [0u8; 12];
    for (i, pair) in digits.chunks(2).enumerate() {
        let byte: String = pair.iter().collect();
        key[i] = u8::from_str_radix(&byte, 16).map_err(|e| format!("invalid hex value: {e}"))?;
    }
    Ok(key)
}

/// Execute the parsed CLI command.
pub fn run(cli: Cli) -> Result<()> {
    let mut transport = Transport::new(&cli.port, cli.baud)?;

    match cli.command {
        Commands::Unlock { uid } => commands::unlock(&mut transport, uid),
        Commands::RequestUid => commands::request_uid(&mut transport),
        Commands::Erase { sector } => commands::erase(&mut transport, sector),
        Commands::Upload {
            file,
            address,
            slot,
            version_address,
        } => commands::upload(&mut transport, &file, address, slot, version_address),
        Commands::AppVersion { slot } => commands::app_version(&mut transport, slot),
        Commands::LastError => commands::last_error(&mut transport),
        Commands::SetEmulation { mask } => commands::set_emulation(&mut transport, mask),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_parsing_accepts_separators() {
        let key = parse_uid("1122334455667788 99AABBCC").unwrap();
        assert_eq!(
            key,
            [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC]
        );
        assert!(parse_uid("112233").is_err());
        assert!(parse_uid("XX2233445566778899AABBCC").is_err());
    }

    #[test]
    fn hex_parsing_tolerates_the_prefix() {
        assert_eq!(parse_hex_u32("0x4000").unwrap(), 0x4000);
        assert_eq!(parse_hex_u32("4000").unwrap(), 0x4000);
        assert!(parse_hex_u32("zzz").is_err());
    }
}
