// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! In-memory NOR flash with real NOR semantics: erase sets a page to 0xFF,
//! writes can only clear bits (new = old & data). Used by unit tests and the
//! host simulator.

use consts::FLASH_PAGE_SIZE;
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};
use heapless::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemFlashError {
    OutOfBounds,
    NotAligned,
    /// Injected fault.
    Faulted,
}

impl NorFlashError for MemFlashError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            MemFlashError::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            MemFlashError::NotAligned => NorFlashErrorKind::NotAligned,
            MemFlashError::Faulted => NorFlashErrorKind::Other,
        }
    }
}

pub struct MemFlash<const SIZE: usize> {
    pub mem: [u8; SIZE],
    /// Every erase performed, as `(from, to)` ranges.
    pub erases: Vec<(u32, u32), 64>,
    pub write_count: u32,
    pub fail_writes: bool,
    pub fail_erases: bool,
}

impl<const SIZE: usize> MemFlash<SIZE> {
    /// A factory-erased part.
    pub fn new() -> Self {
        Self {
            mem: [0xFF; SIZE],
            erases: Vec::new(),
            write_count: 0,
            fail_writes: false,
            fail_erases: false,
        }
    }

    /// Fill the array with a worn-out pattern so missing erases corrupt
    /// the data visibly (writes AND against the old content).
    pub fn fill_junk(&mut self) {
        for (i, b) in self.mem.iter_mut().enumerate() {
            *b = (i as u8) ^ 0x5A;
        }
    }
}

impl<const SIZE: usize> Default for MemFlash<SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SIZE: usize> ErrorType for MemFlash<SIZE> {
    type Error = MemFlashError;
}

impl<const SIZE: usize> ReadNorFlash for MemFlash<SIZE> {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let offset = offset as usize;
        let end = offset
            .checked_add(bytes.len())
            .ok_or(MemFlashError::OutOfBounds)?;
        if end > SIZE {
            return Err(MemFlashError::OutOfBounds);
        }
        bytes.copy_from_slice(&self.mem[offset..end]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        SIZE
    }
}

impl<const SIZE: usize> NorFlash for MemFlash<SIZE> {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = FLASH_PAGE_SIZE as usize;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if self.fail_erases {
            return Err(MemFlashError::Faulted);
        }
        if from % FLASH_PAGE_SIZE != 0 || to % FLASH_PAGE_SIZE != 0 {
            return Err(MemFlashError::NotAligned);
        }
        if from > to || to as usize > SIZE {
            return Err(MemFlashError::OutOfBounds);
        }
        self.mem[from as usize..to as usize].fill(0xFF);
        let _ = self.erases.push((from, to));
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if self.fail_writes {
            return Err(MemFlashError::Faulted);
        }
        if offset as usize % Self::WRITE_SIZE != 0 || bytes.len() % Self::WRITE_SIZE != 0 {
            return Err(MemFlashError::NotAligned);
        }
        let offset = offset as usize;
        let end = offset
            .checked_add(bytes.len())
            .ok_or(MemFlashError::OutOfBounds)?;
        if end > SIZE {
            return Err(MemFlashError::OutOfBounds);
        }
        for (dst, src) in self.mem[offset..end].iter_mut().zip(bytes) {
            *dst &= src;
        }
        self.write_count += 1;
        Ok(())
    }
}
