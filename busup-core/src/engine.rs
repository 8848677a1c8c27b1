// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! The protocol state machine.
//!
//! One inbound frame is decoded, executed and acknowledged before the next
//! is accepted; the bus layer delivers complete frames only, so the engine
//! runs without locks. Everything the update session mutates — staging
//! buffer, lock, last-error register, stream CRC, emulation mask — lives in
//! the [`Engine`] value, which makes the whole protocol drivable from host
//! tests without a bus.

use crate::buffer::StagingBuffer;
use crate::descriptor::{self, BootDescriptor};
use crate::flash::{FlashDriver, FlashError};
use crate::lock::LockManager;
use crate::policy::Reservation;
use crate::protocol::{ACK_PDU, Command, ErrorCode, NACK_PDU, opcode};
use crate::reply::Reply;
use crc::{CRC_32_ISO_HDLC, Crc, Digest};
use embedded_hal::digital::InputPin;

static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Per-frame acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Ack {
    Ack,
    Nack,
}

impl Ack {
    /// Transport control byte for this acknowledgement.
    pub fn pdu(self) -> u8 {
        match self {
            Ack::Ack => ACK_PDU,
            Ack::Nack => NACK_PDU,
        }
    }
}

/// What one frame produced: an acknowledgement, and a reply telegram for
/// the reply-producing commands. Replies accompany successful frames only.
#[derive(Debug)]
pub struct Outcome {
    pub ack: Ack,
    pub reply: Option<Reply>,
}

/// The command engine.
///
/// Generic over the flash programming entry points and the program button
/// so the device build wires in hardware while tests wire in doubles.
pub struct Engine<F, P> {
    flash: F,
    program_pin: P,
    reservation: Reservation,
    staging: StagingBuffer,
    lock: LockManager,
    stream_crc: Digest<'static, u32>,
    emulation: u8,
}

impl<F: FlashDriver, P: InputPin> Engine<F, P> {
    pub fn new(flash: F, program_pin: P) -> Self {
        Self::with_reservation(flash, program_pin, Reservation::default())
    }

    pub fn with_reservation(flash: F, program_pin: P, reservation: Reservation) -> Self {
        Self {
            flash,
            program_pin,
            reservation,
            staging: StagingBuffer::new(),
            lock: LockManager::new(),
            stream_crc: CRC32.digest(),
            emulation: 0,
        }
    }

    pub fn last_error(&self) -> ErrorCode {
        self.lock.last_error()
    }

    pub fn is_unlocked(&self) -> bool {
        self.lock.is_unlocked()
    }

    pub fn staged_len(&self) -> usize {
        self.staging.cursor()
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    /// Decodes and executes one inbound frame.
    ///
    /// The acknowledgement reflects the error register as this frame leaves
    /// it; the register itself persists until `GET_LAST_ERROR` reads it or
    /// the next command overwrites it.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Outcome {
        let reply = match Command::decode(frame) {
            Ok(command) => self.execute(command),
            Err(code) => {
                self.lock.set_error(code);
                None
            }
        };

        let ack = if self.lock.last_error().is_success() {
            Ack::Ack
        } else {
            #[cfg(feature = "defmt")]
            defmt::warn!("nack, code 0x{:04x}", self.lock.last_error().code());
            Ack::Nack
        };
        Outcome { ack, reply }
    }

    fn execute(&mut self, command: Command<'_>) -> Option<Reply> {
        match command {
            Command::UnlockDevice { key } => {
                self.unlock_device(key);
                None
            }
            Command::RequestUid => self.request_uid(),
            Command::AppVersionRequest { slot } => self.app_version(slot),
            Command::EraseSector { sector } => {
                self.erase_sector(sector);
                None
            }
            Command::SendData { data } => {
                self.send_data(data);
                None
            }
            Command::Program {
                count,
                address,
                crc,
            } => {
                self.program(count, address, crc);
                None
            }
            Command::UpdateBootDescriptor { crc, slot } => {
                self.update_boot_descriptor(crc, slot);
                None
            }
            Command::RequestData => {
                self.request_data();
                None
            }
            Command::GetLastError => Some(self.report_last_error()),
            Command::SetEmulation { mask } => {
                self.emulation = mask;
                self.lock.set_error(ErrorCode::Success);
                None
            }
        }
    }

    /// Opens the lock for a present operator, or for a client that knows
    /// the chip unique ID. The key sweep and the unlock decision are two
    /// separate passes over the error register.
    fn unlock_device(&mut self, key: &[u8]) {
        if self.pin_asserted() {
            self.lock.unlock_by_presence();
            return;
        }
        let mut uid = [0u8; 16];
        if self.flash.read_unique_id(&mut uid).is_ok() {
            self.lock.sweep_key(key, &uid);
        }
        self.lock.finish_unlock();
    }

    /// Reports the chip unique ID. Needs the operator at the device, not an
    /// open lock.
    fn request_uid(&mut self) -> Option<Reply> {
        if !self.pin_asserted() {
            self.lock.set_error(ErrorCode::DeviceLocked);
            return None;
        }
        let mut uid = [0u8; 16];
        match self.flash.read_unique_id(&mut uid) {
            Ok(()) => {
                self.lock.set_error(ErrorCode::Success);
                Some(Reply::new(opcode::RESPONSE_UID, &uid[..12]))
            }
            Err(error) => {
                self.lock.set_error(error.into());
                None
            }
        }
    }

    /// Reports the version text of the application behind descriptor
    /// `slot`. Not lock-gated; the reply reveals nothing a bus peer could
    /// not already read from a running application.
    fn app_version(&mut self, slot: u8) -> Option<Reply> {
        let mut block = [0u8; 16];
        if let Err(error) = self.flash.read(descriptor::slot_address(slot), &mut block) {
            self.lock.set_error(error.into());
            return None;
        }
        match BootDescriptor::parse(&block).version_pointer() {
            Some(address) => {
                let mut version = [0u8; descriptor::VERSION_LEN];
                match self.flash.read(address, &mut version) {
                    Ok(()) => {
                        self.lock.set_error(ErrorCode::Success);
                        Some(Reply::new(opcode::APP_VERSION_RESPONSE, &version))
                    }
                    Err(error) => {
                        self.lock.set_error(error.into());
                        None
                    }
                }
            }
            None => {
                self.lock.set_error(ErrorCode::AppNotStartable);
                None
            }
        }
    }

    fn erase_sector(&mut self, sector: u8) {
        if !self.lock.is_unlocked() {
            self.lock.set_error(ErrorCode::DeviceLocked);
            return;
        }
        #[cfg(feature = "defmt")]
        defmt::trace!("erase sector {}", sector);
        if self.reservation.sector_erasable(sector) {
            let result = if self.emulated() {
                Ok(())
            } else {
                self.flash.erase_sector(sector)
            };
            self.lock.set_error(flash_status(result));
        } else {
            self.lock.set_error(ErrorCode::SectorNotAllowed);
        }
        self.staging.reset();
    }

    fn send_data(&mut self, data: &[u8]) {
        if !self.lock.is_unlocked() {
            self.lock.set_error(ErrorCode::DeviceLocked);
            return;
        }
        match self.staging.append(data) {
            Ok(()) => {
                self.stream_crc.update(data);
                #[cfg(feature = "defmt")]
                defmt::trace!("staged {} bytes, cursor {}", data.len(), self.staging.cursor());
                self.lock.set_error(ErrorCode::Success);
            }
            Err(code) => self.lock.set_error(code),
        }
    }

    /// Commits `count` staged bytes to flash at `address`: admission policy
    /// first, then the CRC the client computed over what it streamed.
    fn program(&mut self, count: u32, address: u32, crc: u32) {
        if !self.lock.is_unlocked() {
            self.lock.set_error(ErrorCode::DeviceLocked);
            return;
        }
        if self.reservation.range_programmable(address, count) {
            let staged = self.staging.staged(count as usize);
            let computed = CRC32.checksum(staged);
            #[cfg(feature = "defmt")]
            defmt::trace!(
                "program {} bytes at 0x{:08x}, crc 0x{:08x}/0x{:08x}",
                count,
                address,
                computed,
                crc
            );
            if computed == crc {
                let result = if self.emulated() {
                    Ok(())
                } else {
                    self.flash.program(address, staged)
                };
                self.lock.set_error(flash_status(result));
            } else {
                self.lock.set_error(ErrorCode::CrcError);
            }
        } else {
            self.lock.set_error(ErrorCode::AddressNotAllowed);
        }
        self.commit_reset();
    }

    /// Commits the first staged block as boot descriptor `slot`: CRC gate,
    /// then startability, then page erase and program. The descriptor slots
    /// are not subject to the address policy.
    fn update_boot_descriptor(&mut self, crc: u32, slot: u8) {
        if !self.lock.is_unlocked() {
            self.lock.set_error(ErrorCode::DeviceLocked);
            return;
        }
        let staged = self.staging.staged(descriptor::BOOT_BLOCK_SIZE as usize);
        if CRC32.checksum(staged) == crc {
            let candidate = BootDescriptor::parse(staged);
            if candidate.validate(&self.flash) {
                #[cfg(feature = "defmt")]
                defmt::trace!(
                    "descriptor slot {}, image 0x{:08x}..0x{:08x}",
                    slot,
                    candidate.start_address,
                    candidate.end_address
                );
                let emulated = self.emulated();
                let mut result = if emulated {
                    Ok(())
                } else {
                    self.flash.erase_page(descriptor::slot_page(slot))
                };
                if result.is_ok() && !emulated {
                    result = self.flash.program(descriptor::slot_address(slot), staged);
                }
                self.lock.set_error(flash_status(result));
            } else {
                self.lock.set_error(ErrorCode::AppNotStartable);
            }
        } else {
            self.lock.set_error(ErrorCode::CrcError);
        }
        self.commit_reset();
    }

    /// Reserved read-back command. Still lock-gated, so a locked device
    /// reveals nothing about which opcodes it knows.
    fn request_data(&mut self) {
        if self.lock.is_unlocked() {
            self.lock.set_error(ErrorCode::NotImplemented);
        } else {
            self.lock.set_error(ErrorCode::DeviceLocked);
        }
    }

    /// Reports the register and clears it, so the reply carries the old
    /// value under a positive acknowledgement.
    fn report_last_error(&mut self) -> Reply {
        let code = self.lock.take_error();
        Reply::last_error(opcode::SEND_LAST_ERROR, code)
    }

    fn pin_asserted(&mut self) -> bool {
        self.program_pin.is_high().unwrap_or(false)
    }

    fn emulated(&self) -> bool {
        self.emulation & 0x0F != 0
    }

    /// A commit attempt ends the staging episode whatever its outcome: the
    /// cursor rewinds and the stream CRC re-seeds.
    fn commit_reset(&mut self) {
        self.staging.reset();
        self.stream_crc = CRC32.digest();
    }
}

fn flash_status(result: Result<(), FlashError>) -> ErrorCode {
    match result {
        Ok(()) => ErrorCode::Success,
        Err(error) => error.into(),
    }
}
