// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Wire-level protocol: frame geometry, opcodes, error codes.
//!
//! The update protocol rides on ordinary memory-write bus frames, so the
//! inbound geometry is inherited rather than designed: the low nibble of
//! byte 0 carries the payload length for streamed data, byte 2 carries the
//! opcode and the payload starts at byte 3. All multi-byte fields are
//! big-endian on the wire.

/// Transport-layer positive acknowledgement byte.
pub const ACK_PDU: u8 = 0xC2;
/// Transport-layer negative acknowledgement byte.
pub const NACK_PDU: u8 = 0xC3;

/// Frame byte whose low nibble is the streamed-payload length.
pub const FRAME_COUNT: usize = 0;
/// Frame byte holding the opcode.
pub const FRAME_OPCODE: usize = 2;
/// First payload byte.
pub const FRAME_PAYLOAD: usize = 3;

/// Wire opcodes. The numeric values are fixed by deployed bus peers.
pub mod opcode {
    pub const ERASE_SECTOR: u8 = 0;
    pub const SEND_DATA: u8 = 1;
    pub const PROGRAM: u8 = 2;
    pub const UPDATE_BOOT_DESC: u8 = 3;
    pub const REQ_DATA: u8 = 10;
    pub const GET_LAST_ERROR: u8 = 20;
    pub const SEND_LAST_ERROR: u8 = 21;
    pub const UNLOCK_DEVICE: u8 = 30;
    pub const REQUEST_UID: u8 = 31;
    pub const RESPONSE_UID: u8 = 32;
    pub const APP_VERSION_REQUEST: u8 = 33;
    pub const APP_VERSION_RESPONSE: u8 = 34;
    pub const SET_EMULATION: u8 = 100;
}

use crate::flash::FlashError;

/// Outcome of the most recent command, as reported over the bus.
///
/// The numeric codes are wire-visible through `GET_LAST_ERROR`. Flash driver
/// status words are surfaced unchanged in the `Flash` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorCode {
    Success,
    /// Received opcode is not defined.
    UnknownCommand,
    /// Frame-supplied CRC disagrees with the CRC computed on the device.
    CrcError,
    /// Target range intersects the updater reservation.
    AddressNotAllowed,
    /// Target sector belongs to the bootloader or the updater.
    SectorNotAllowed,
    /// Staging buffer would exceed capacity.
    RamOverflow,
    /// Reserved for descriptor-slot errors.
    WrongDescriptorBlock,
    /// Candidate boot descriptor does not point at a startable application.
    AppNotStartable,
    /// Mutating command attempted while locked.
    DeviceLocked,
    /// Unlock key did not match the chip unique ID.
    UidMismatch,
    /// Known opcode without an implementation.
    NotImplemented,
    /// Status word from a flash programming entry point.
    Flash(u16),
}

impl ErrorCode {
    /// Wire value of this code, as stored in the last-error register.
    pub fn code(self) -> u32 {
        match self {
            ErrorCode::Success => 0,
            ErrorCode::UnknownCommand => 0x100,
            ErrorCode::CrcError => 0x101,
            ErrorCode::AddressNotAllowed => 0x102,
            ErrorCode::SectorNotAllowed => 0x103,
            ErrorCode::RamOverflow => 0x104,
            ErrorCode::WrongDescriptorBlock => 0x105,
            ErrorCode::AppNotStartable => 0x106,
            ErrorCode::DeviceLocked => 0x107,
            ErrorCode::UidMismatch => 0x108,
            ErrorCode::NotImplemented => 0xFFFF,
            ErrorCode::Flash(status) => status as u32,
        }
    }

    /// Inverse of [`code`](Self::code); unlisted values are taken to be
    /// flash driver status words.
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => ErrorCode::Success,
            0x100 => ErrorCode::UnknownCommand,
            0x101 => ErrorCode::CrcError,
            0x102 => ErrorCode::AddressNotAllowed,
            0x103 => ErrorCode::SectorNotAllowed,
            0x104 => ErrorCode::RamOverflow,
            0x105 => ErrorCode::WrongDescriptorBlock,
            0x106 => ErrorCode::AppNotStartable,
            0x107 => ErrorCode::DeviceLocked,
            0x108 => ErrorCode::UidMismatch,
            0xFFFF => ErrorCode::NotImplemented,
            other => ErrorCode::Flash(other as u16),
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, ErrorCode::Success)
    }
}

impl From<FlashError> for ErrorCode {
    fn from(error: FlashError) -> Self {
        ErrorCode::Flash(error.0)
    }
}

/// Big-endian u32 from the first four bytes.
///
/// Explicit shifts: frame buffers carry no alignment guarantee, so the
/// bytes must never be reinterpreted in place.
pub fn be_u32(bytes: &[u8]) -> u32 {
    (bytes[0] as u32) << 24 | (bytes[1] as u32) << 16 | (bytes[2] as u32) << 8 | bytes[3] as u32
}

/// An inbound command, decoded from a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Erase one flash sector.
    EraseSector { sector: u8 },
    /// Append a payload fragment to the staging buffer.
    SendData { data: &'a [u8] },
    /// Commit `count` staged bytes to flash at `address`, guarded by `crc`.
    Program { count: u32, address: u32, crc: u32 },
    /// Commit the first staged block as boot descriptor `slot`.
    UpdateBootDescriptor { crc: u32, slot: u8 },
    /// Reserved read-back command.
    RequestData,
    /// Report and clear the last-error register.
    GetLastError,
    /// Open the device lock, by operator presence or by unique-ID key.
    UnlockDevice { key: &'a [u8] },
    /// Report the chip unique ID.
    RequestUid,
    /// Report the version text of the application behind descriptor `slot`.
    AppVersionRequest { slot: u8 },
    /// Set the debug emulation mask.
    SetEmulation { mask: u8 },
}

impl<'a> Command<'a> {
    /// Decodes the opcode and payload of one inbound frame.
    ///
    /// A frame too short for its opcode's arguments is refused the same way
    /// as an unrecognized opcode; the engine never reads past the frame.
    pub fn decode(frame: &'a [u8]) -> Result<Self, ErrorCode> {
        if frame.len() <= FRAME_OPCODE {
            return Err(ErrorCode::UnknownCommand);
        }
        let count = (frame[FRAME_COUNT] & 0x0F) as usize;
        let payload = &frame[FRAME_PAYLOAD..];

        match frame[FRAME_OPCODE] {
            opcode::ERASE_SECTOR => match payload.first() {
                Some(&sector) => Ok(Command::EraseSector { sector }),
                None => Err(ErrorCode::UnknownCommand),
            },
            opcode::SEND_DATA => match payload.get(..count) {
                Some(data) => Ok(Command::SendData { data }),
                None => Err(ErrorCode::UnknownCommand),
            },
            opcode::PROGRAM if payload.len() >= 12 => Ok(Command::Program {
                count: be_u32(&payload[0..]),
                address: be_u32(&payload[4..]),
                crc: be_u32(&payload[8..]),
            }),
            opcode::UPDATE_BOOT_DESC if payload.len() >= 5 => Ok(Command::UpdateBootDescriptor {
                crc: be_u32(&payload[0..]),
                slot: payload[4],
            }),
            opcode::REQ_DATA => Ok(Command::RequestData),
            opcode::GET_LAST_ERROR => Ok(Command::GetLastError),
            opcode::UNLOCK_DEVICE => Ok(Command::UnlockDevice { key: payload }),
            opcode::REQUEST_UID => Ok(Command::RequestUid),
            opcode::APP_VERSION_REQUEST => match payload.first() {
                Some(&slot) => Ok(Command::AppVersionRequest { slot }),
                None => Err(ErrorCode::UnknownCommand),
            },
            opcode::SET_EMULATION => match payload.first() {
                Some(&mask) => Ok(Command::SetEmulation { mask }),
                None => Err(ErrorCode::UnknownCommand),
            },
            _ => Err(ErrorCode::UnknownCommand),
        }
    }
}

/// Builds an inbound frame around an opcode and payload.
///
/// The count nibble mirrors the payload length; only `SEND_DATA` reads it,
/// and its payloads never exceed the nibble range.
#[cfg(feature = "std")]
pub fn encode_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; FRAME_PAYLOAD + payload.len()];
    frame[FRAME_COUNT] = (payload.len() as u8) & 0x0F;
    frame[FRAME_OPCODE] = opcode;
    frame[FRAME_PAYLOAD..].copy_from_slice(payload);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn be_u32_uses_explicit_shifts() {
        assert_eq!(be_u32(&[0x12, 0x34, 0x56, 0x78]), 0x1234_5678);
        assert_eq!(be_u32(&[0x00, 0x00, 0x01, 0x00]), 256);
    }

    #[test]
    fn decode_program_arguments() {
        let frame = encode_frame(
            opcode::PROGRAM,
            &[
                0x00, 0x00, 0x01, 0x00, // count 256
                0x00, 0x00, 0x20, 0x00, // address 0x2000
                0xDE, 0xAD, 0xBE, 0xEF, // crc
            ],
        );
        assert_eq!(
            Command::decode(&frame),
            Ok(Command::Program {
                count: 256,
                address: 0x2000,
                crc: 0xDEAD_BEEF
            })
        );
    }

    #[test]
    fn decode_send_data_respects_count_nibble() {
        // The count nibble, not the frame length, bounds the payload.
        let mut frame = encode_frame(opcode::SEND_DATA, &[1, 2, 3, 4, 5, 6, 7, 8]);
        frame[FRAME_COUNT] = 0x03;
        assert_eq!(
            Command::decode(&frame),
            Ok(Command::SendData { data: &[1, 2, 3] })
        );
    }

    #[test]
    fn decode_update_boot_desc() {
        let frame = encode_frame(opcode::UPDATE_BOOT_DESC, &[0x01, 0x02, 0x03, 0x04, 2]);
        assert_eq!(
            Command::decode(&frame),
            Ok(Command::UpdateBootDescriptor {
                crc: 0x0102_0304,
                slot: 2
            })
        );
    }

    #[test]
    fn unknown_and_truncated_frames_are_refused() {
        assert_eq!(
            Command::decode(&encode_frame(55, &[])),
            Err(ErrorCode::UnknownCommand)
        );
        // Outbound-only opcodes are not accepted inbound.
        assert_eq!(
            Command::decode(&encode_frame(opcode::SEND_LAST_ERROR, &[])),
            Err(ErrorCode::UnknownCommand)
        );
        // Too short to carry an opcode at all.
        assert_eq!(Command::decode(&[0x00]), Err(ErrorCode::UnknownCommand));
        // PROGRAM with a truncated argument list.
        assert_eq!(
            Command::decode(&encode_frame(opcode::PROGRAM, &[0; 8])),
            Err(ErrorCode::UnknownCommand)
        );
    }

    #[test]
    fn error_codes_round_trip_through_wire_values() {
        let codes = [
            (ErrorCode::Success, 0),
            (ErrorCode::UnknownCommand, 0x100),
            (ErrorCode::CrcError, 0x101),
            (ErrorCode::AddressNotAllowed, 0x102),
            (ErrorCode::SectorNotAllowed, 0x103),
            (ErrorCode::RamOverflow, 0x104),
            (ErrorCode::WrongDescriptorBlock, 0x105),
            (ErrorCode::AppNotStartable, 0x106),
            (ErrorCode::DeviceLocked, 0x107),
            (ErrorCode::UidMismatch, 0x108),
            (ErrorCode::NotImplemented, 0xFFFF),
            (ErrorCode::Flash(9), 9),
        ];
        for (code, wire) in codes {
            assert_eq!(code.code(), wire);
            assert_eq!(ErrorCode::from_code(wire), code);
        }
    }
}
