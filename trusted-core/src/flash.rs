// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Image-region flash programming.
//!
//! Erase-before-write ordering is the caller's contract: a session starts
//! with [`Programmer::erase_image`], and each chunk address is written at
//! most once per erase cycle (the session layer never re-stages a chunk the
//! trusted side already programmed).

use consts::{FLASH_PAGE_SIZE, OTA_CHUNK_SIZE};
use embedded_storage::nor_flash::NorFlash;

// Largest write granularity the padding buffer accommodates.
const MAX_WRITE_ALIGN: usize = 8;

pub struct Programmer<F: NorFlash> {
    flash: F,
    base: u32,
}

impl<F: NorFlash> Programmer<F> {
    pub fn new(flash: F, base: u32) -> Self {
        debug_assert!(F::WRITE_SIZE <= MAX_WRITE_ALIGN);
        Self { flash, base }
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Erase the pages covering an image of `image_size` bytes, one page at
    /// a time starting at the image base. Re-erasing an already blank page
    /// is harmless, so a retried session start is safe.
    pub fn erase_image(&mut self, image_size: u32) -> Result<(), F::Error> {
        let pages = image_size.div_ceil(FLASH_PAGE_SIZE);
        info!("erasing {} pages", pages);
        for page in 0..pages {
            let from = self.base + page * FLASH_PAGE_SIZE;
            self.flash.erase(from, from + FLASH_PAGE_SIZE)?;
        }
        Ok(())
    }

    /// Program one chunk at its index-derived address. A final chunk shorter
    /// than the write granularity is padded with the erased-flash value.
    pub fn write_chunk(&mut self, index: u32, data: &[u8]) -> Result<(), F::Error> {
        let offset = self.base + index * OTA_CHUNK_SIZE as u32;
        debug!("writing chunk {} at {:x}", index, offset);
        if data.len() % F::WRITE_SIZE == 0 {
            self.flash.write(offset, data)
        } else {
            let mut padded = [0xFF; OTA_CHUNK_SIZE + MAX_WRITE_ALIGN];
            padded[..data.len()].copy_from_slice(data);
            let len = data.len().next_multiple_of(F::WRITE_SIZE);
            self.flash.write(offset, &padded[..len])
        }
    }
}
