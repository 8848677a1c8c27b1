// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Raw-telegram serial transport to the updater.
//!
//! The bus access device forwards frames verbatim and answers each one with
//! a single acknowledgement byte, followed by a reply telegram for the
//! reply-producing commands.

use std::io::{Read, Write};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use busup_core::protocol::{self, ACK_PDU, ErrorCode, NACK_PDU, opcode};
use busup_core::reply::HEADER_LEN;
use serialport::SerialPort;

const FRAME_TIMEOUT: Duration = Duration::from_millis(2000);

pub struct Transport {
    port: Box<dyn SerialPort>,
    port_name: String,
}

impl Transport {
    pub fn new(port_name: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud)
            .timeout(FRAME_TIMEOUT)
            .open()
            .with_context(|| format!("Failed to open {port_name}"))?;
        Ok(Self {
            port,
            port_name: port_name.to_string(),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Sends one frame and reads the acknowledgement byte. `Ok(true)` on
    /// ACK, `Ok(false)` on NACK.
    pub fn send(&mut self, opcode: u8, payload: &[u8]) -> Result<bool> {
        let frame = protocol::encode_frame(opcode, payload);
        self.port.write_all(&frame)?;
        let mut status = [0u8; 1];
        self.port
            .read_exact(&mut status)
            .context("No acknowledgement from device")?;
        match status[0] {
            ACK_PDU => Ok(true),
            NACK_PDU => Ok(false),
            other => bail!("Unexpected acknowledgement byte 0x{other:02X}"),
        }
    }

    /// Sends a frame that must succeed. On NACK the device is asked for its
    /// last error, so the failure names the actual refusal.
    pub fn send_expect_ack(&mut self, opcode: u8, payload: &[u8]) -> Result<()> {
        if self.send(opcode, payload)? {
            return Ok(());
        }
        let code = self
            .last_error()
            .context("Device refused the frame and the error query failed too")?;
        bail!("Device refused: {:?} (0x{:04X})", code, code.code())
    }

    /// Reads one reply telegram and returns its payload.
    pub fn read_reply(&mut self, expected: u8, payload_len: usize) -> Result<Vec<u8>> {
        let mut telegram = vec![0u8; HEADER_LEN + payload_len];
        self.port
            .read_exact(&mut telegram)
            .context("No reply telegram from device")?;
        if telegram[9] != expected {
            bail!("Expected reply opcode {expected}, got {}", telegram[9]);
        }
        Ok(telegram[HEADER_LEN..].to_vec())
    }

    /// Fetches and clears the device's last error code.
    pub fn last_error(&mut self) -> Result<ErrorCode> {
        if !self.send(opcode::GET_LAST_ERROR, &[])? {
            bail!("GET_LAST_ERROR was refused");
        }
        let payload = self.read_reply(opcode::SEND_LAST_ERROR, 4)?;
        let code = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        Ok(ErrorCode::from_code(code))
    }
}
