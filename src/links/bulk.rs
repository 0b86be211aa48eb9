//! Link table access through the extended 0x2F command (i2 devices).

use super::{BoxFuture, LinkRecord, LinkSource, RECORD_LEN};
use crate::address::Address;
use crate::error::{InsteonError, Result};
use crate::modem::Modem;
use crate::protocol::{command, flags, message, EXTENDED_DATA_LEN};

/// Memory offset of the first record. Later records sit 8 bytes below.
pub const TABLE_START: u16 = 0x0FFF;

/// Read subcommand in data byte 1.
const READ_SUBCOMMAND: u8 = 0x00;

/// Write subcommand in data byte 1.
const WRITE_SUBCOMMAND: u8 = 0x02;

/// Where a record lies in the reply frame.
const REPLY_RECORD: std::ops::Range<usize> = 16..24;

/// Memory offset of record `index`.
pub fn record_offset(index: usize) -> Result<u16> {
    u16::try_from(index)
        .ok()
        .and_then(|i| i.checked_mul(RECORD_LEN as u16))
        .and_then(|o| TABLE_START.checked_sub(o))
        .ok_or_else(|| InsteonError::InvalidParameter(format!("Link index {} out of range", index)))
}

/// Request data for reading one record, or the whole table.
pub fn read_request(index: Option<usize>) -> Result<[u8; EXTENDED_DATA_LEN]> {
    let mut data = [0u8; EXTENDED_DATA_LEN];
    data[1] = READ_SUBCOMMAND;
    if let Some(index) = index {
        data[2..4].copy_from_slice(&record_offset(index)?.to_be_bytes());
        data[4] = 1;
    }
    Ok(data)
}

/// Request data for writing `record` at `index`.
pub fn write_request(index: usize, record: &LinkRecord) -> Result<[u8; EXTENDED_DATA_LEN]> {
    let mut data = [0u8; EXTENDED_DATA_LEN];
    data[1] = WRITE_SUBCOMMAND;
    data[2..4].copy_from_slice(&record_offset(index)?.to_be_bytes());
    data[4] = RECORD_LEN as u8;
    data[5..5 + RECORD_LEN].copy_from_slice(&record.to_bytes());
    Ok(data)
}

/// Bulk link table access.
#[derive(Clone)]
pub struct BulkLinks {
    modem: Modem,
}

impl BulkLinks {
    pub fn new(modem: Modem) -> Self {
        Self { modem }
    }

    async fn read(&self, address: Address, index: Option<usize>) -> Result<Vec<LinkRecord>> {
        let data = read_request(index)?;
        let wait = self.modem.config().response_timeout;

        let mut tx = self.modem.transaction().await;
        tx.send_extended(
            address,
            command::LINK_DATABASE,
            0x00,
            &data,
            flags::EXTENDED_DEFAULT,
        )
        .await?;

        let mut records = Vec::new();
        loop {
            let frame = tx.next_frame(wait).await?;
            if frame.type_code() != message::EXTENDED_RECEIVED {
                tracing::debug!("Skipping {} while reading links of {}", frame, address);
                continue;
            }
            let Some(record) = frame
                .as_bytes()
                .get(REPLY_RECORD)
                .and_then(LinkRecord::from_bytes)
            else {
                tracing::warn!("Short link record reply: {}", frame);
                continue;
            };
            if record.is_terminator() {
                break;
            }
            tracing::debug!("{} link {}: {}", address, records.len(), record);
            records.push(record);
            if index.is_some() {
                break;
            }
        }
        Ok(records)
    }

    async fn write(&self, address: Address, index: usize, record: LinkRecord) -> Result<()> {
        let data = write_request(index, &record)?;
        let mut tx = self.modem.transaction().await;
        tx.send_extended(
            address,
            command::LINK_DATABASE,
            0x00,
            &data,
            flags::EXTENDED_DEFAULT,
        )
        .await?;
        Ok(())
    }
}

impl LinkSource for BulkLinks {
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
