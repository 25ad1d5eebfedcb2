//! Keeps the settings in the last sector of the on-chip flash.

use embassy_stm32::flash::{Blocking, Error, Flash};
use organum_lib::configuration::{BlockId, SETTINGS_BLOCK, SETTINGS_BLOCK_LEN, Storage};

/// Offset of the last 256 KiB sector of the 2 MiB single-bank flash.
const SECTOR_START: u32 = 0x1C_0000;
const SECTOR_END: u32 = 0x20_0000;

/// [`Storage`] backed by the on-chip flash.
///
/// Writing erases the whole sector, so only [`SETTINGS_BLOCK`] may be stored.
pub struct FlashStorage {
    flash: Flash<'static, Blocking>,
}

impl FlashStorage {
    pub fn new(flash: Flash<'static, Blocking>) -> Self {
        Self { flash }
    }
}

impl Storage for FlashStorage {
    type Error = Error;

    fn read(&mut self, block: BlockId, buf: &mut [u8]) -> Result<(), Self::Error> {
        if block != SETTINGS_BLOCK || buf.len() > SETTINGS_BLOCK_LEN {
            return Err(Error::Size);
        }
        self.flash.blocking_read(SECTOR_START, buf)
    }

    fn write(&mut self, block: BlockId, data: &[u8]) -> Result<(), Self::Error> {
        if block != SETTINGS_BLOCK || data.len() > SETTINGS_BLOCK_LEN {
            return Err(Error::Size);
        }
        self.flash.blocking_erase(SECTOR_START, SECTOR_END)?;
        self.flash.blocking_write(SECTOR_START, data)
    }
}
