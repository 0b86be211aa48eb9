//! Link table access by peeking and poking device memory (i1 devices).
//!
//! Slow: every byte is its own round trip. Records live on page 0x0F at
//! descending 8-byte slots starting at 0xF8.

use super::{BoxFuture, LinkRecord, LinkSource, RECORD_LEN};
use crate::address::Address;
use crate::error::{InsteonError, Result};
use crate::modem::Modem;

/// High byte of the link table's memory page.
pub const TABLE_PAGE: u8 = 0x0F;

/// Low byte of the first record's slot.
pub const FIRST_SLOT: u8 = 0xF8;

/// Default attempts per register access.
pub const DEFAULT_TRIES: u32 = 3;

/// Low address of the slot holding record `index`.
pub fn slot_address(index: usize) -> Result<u8> {
    u8::try_from(index)
        .ok()
        .and_then(|i| i.checked_mul(RECORD_LEN as u8))
        .and_then(|o| FIRST_SLOT.checked_sub(o))
        .ok_or_else(|| InsteonError::InvalidParameter(format!("Link index {} out of range", index)))
}

/// Register-level link table access.
#[derive(Clone)]
pub struct LegacyLinks {
    modem: Modem,
    tries: u32,
}

impl LegacyLinks {
    pub fn new(modem: Modem) -> Self {
        Self {
            modem,
            tries: DEFAULT_TRIES,
        }
    }

    /// Attempts per register access.
    pub fn tries(mut self, tries: u32) -> Self {
        self.tries = tries.max(1);
        self
    }

    /// Index of the first unused slot.
    pub async fn free_slot(&self, address: Address) -> Result<usize> {
        Ok(self.read(address, None).await?.len())
    }

    async fn read(&self, address: Address, index: Option<usize>) -> Result<Vec<LinkRecord>> {
        self.modem.set_register_page(address, TABLE_PAGE).await?;

        let mut records = Vec::new();
        let mut current = index.unwrap_or(0);
        loop {
            let slot = match slot_address(current) {
                Ok(slot) => slot,
                Err(e) if index.is_some() => return Err(e),
                Err(_) => break,
            };
            match self.read_slot(address, slot).await {
                Ok(Some(record)) => {
                    tracing::debug!("{} slot {:02X}: {}", address, slot, record);
                    records.push(record);
                }
                Ok(None) => break,
                Err(e) if records.is_empty() => return Err(e),
                Err(e) => {
                    tracing::warn!("Link scan of {} stopped at slot {:02X}: {}", address, slot, e);
                    break;
                }
            }
            if index.is_some() {
                break;
            }
            current += 1;
        }
        Ok(records)
    }

    /// Read the record at `slot`. `None` when the flags byte is zero.
    async fn read_slot(&self, address: Address, slot: u8) -> Result<Option<LinkRecord>> {
        let mut bytes = [0u8; RECORD_LEN];
        for (offset, byte) in bytes.iter_mut().enumerate() {
            *byte = self
                .modem
                .read_register(address, slot + offset as u8, self.tries)
                .await?;
            if offset == 0 && *byte == 0 {
                return Ok(None);
            }
        }
        Ok(LinkRecord::from_bytes(&bytes))
    }

    async fn write(&self, address: Address, index: usize, record: LinkRecord) -> Result<()> {
        let slot = slot_address(index)?;
        self.modem.set_register_page(address, TABLE_PAGE).await?;

        for (offset, byte) in record.to_bytes().into_iter().enumerate() {
            let low = slot + offset as u8;
            // The peek selects the address the poke writes to.
            self.modem.read_register(address, low, self.tries).await?;
            self.modem.write_register(address, byte, self.tries).await?;
        }
        tracing::debug!("Wrote {} to {} slot {:02X}", record, address, slot);
        Ok(())
    }
}

impl LinkSource for LegacyLinks {
    fn read_links(
        &self,
        address: Address,
        index: Option<usize>,
    ) -> BoxFuture<'_, Result<Vec<LinkRecord>>> {
        Box::pin(self.read(address, index))
    }

    fn write_link(
        &self,
        address: Address,
        index: usize,
        record: LinkRecord,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.write(address, index, record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_addresses() {
        assert_eq!(slot_address(0).unwrap(), 0xF8);
        assert_eq!(slot_address(1).unwrap(), 0xF0);
        assert_eq!(slot_address(31).unwrap(), 0x00);
        assert!(matches!(
            slot_address(32),
            Err(InsteonError::InvalidParameter(_))
        ));
    }
}
