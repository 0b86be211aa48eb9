//! High-level device and gateway commands.
//!
//! Each command runs in its own [`Transaction`](crate::Transaction), so
//! commands from different tasks never interleave on the line.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::{Address, DeviceRef};
use crate::error::{InsteonError, Result};
use crate::links::LinkRecord;
use crate::modem::Modem;
use crate::protocol::{
    build_gateway_command, build_x10, command, flags, message, x10, Frame, X10Command,
};

/// Gap to the full-scale direct level.
const DIRECT_MAX: f64 = 255.0;

/// Convert a percentage (0..=100) to a direct level.
pub fn percent_to_direct(percent: u8) -> u8 {
    (f64::from(percent.min(100)) * DIRECT_MAX / 100.0).round() as u8
}

/// Convert a direct level to a percentage.
pub fn direct_to_percent(level: u8) -> u8 {
    (f64::from(level) * 100.0 / DIRECT_MAX).round() as u8
}

/// A requested brightness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    /// 0..=100 percent.
    Percent(u8),
    /// 0..=255 direct level.
    Direct(u8),
}

impl Level {
    /// The direct level to send.
    pub fn direct(self) -> Result<u8> {
        match self {
            Level::Percent(p) if p > 100 => Err(InsteonError::InvalidParameter(format!(
                "Percent level must be 0-100, got {}",
                p
            ))),
            Level::Percent(p) => Ok(percent_to_direct(p)),
            Level::Direct(d) => Ok(d),
        }
    }
}

/// Unit for reported levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelUnit {
    #[default]
    Percent,
    Direct,
}

impl LevelUnit {
    fn convert(self, direct: u8) -> u8 {
        match self {
            LevelUnit::Percent => direct_to_percent(direct),
            LevelUnit::Direct => direct,
        }
    }
}

/// Where a level is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelSource {
    /// Query the device.
    #[default]
    Device,
    /// Use the last-known level in the registry.
    Mirror,
}

/// Gateway identity as reported by `02 60`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GatewayInfo {
    pub address: Address,
    pub category: u8,
    pub subcategory: u8,
    pub firmware: u8,
}

/// Subcategory reported by KeypadLinc devices.
pub const KEYPADLINC_SUBCATEGORY: u8 = 0x1B;

/// Models that link creation knows how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceModel {
    LampLinc,
    SwitchLinc600W,
    SwitchLinc,
    KeypadLinc,
}

/// Device category and subcategory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceCategory {
    pub category: u8,
    pub subcategory: u8,
}

impl DeviceCategory {
    pub fn model(&self) -> Option<DeviceModel> {
        match self.subcategory {
            0x00 => Some(DeviceModel::LampLinc),
            0x01 => Some(DeviceModel::SwitchLinc600W),
            0x15 => Some(DeviceModel::SwitchLinc),
            KEYPADLINC_SUBCATEGORY => Some(DeviceModel::KeypadLinc),
            _ => None,
        }
    }

    pub fn is_keypad(&self) -> bool {
        self.subcategory == KEYPADLINC_SUBCATEGORY
    }
}

impl fmt::Display for DeviceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}.{:02X}", self.category, self.subcategory)
    }
}

fn response_byte(frame: &Frame) -> Result<u8> {
    frame
        .last()
        .ok_or_else(|| InsteonError::UnexpectedResponse("empty response".into()))
}

impl Modem {
    /// Resolve dotted hex or a registry name, with an optional `:button`.
    pub fn resolve(&self, text: &str) -> Result<DeviceRef> {
        let (head, button) = DeviceRef::split_button(text)?;
        let head = head.trim();
        let address = match head.parse::<Address>() {
            Ok(address) => address,
            Err(_) => self
                .registry()
                .address_for_name(head)
                .ok_or_else(|| InsteonError::InvalidAddress(head.to_string()))?,
        };
        Ok(DeviceRef::new(address, button))
    }

    /// Set a device's level. Zero sends OFF; anything else ON at that level.
    ///
    /// Succeeds when the device reports the requested level back; the mirror
    /// is then updated.
    pub async fn set_level(&self, address: Address, level: Level) -> Result<()> {
        let direct = level.direct()?;
        let cmd1 = if direct == 0 { command::OFF } else { command::ON };

        let response = {
            let mut tx = self.transaction().await;
            tx.send_standard(address, cmd1, direct, flags::DIRECT_DEFAULT)
                .await?
        };

        let reported = response_byte(&response)?;
        if reported != direct {
            return Err(InsteonError::UnexpectedResponse(format!(
                "{} reported level {} after set to {}",
                address, reported, direct
            )));
        }
        self.registry().set_level_for_address(address, direct);
        Ok(())
    }

    /// Read a device's level, from the device or the mirror.
    ///
    /// Device reads refresh the mirror.
    pub async fn get_level(
        &self,
        address: Address,
        unit: LevelUnit,
        source: LevelSource,
    ) -> Result<u8> {
        let direct = match source {
            LevelSource::Mirror => self
                .registry()
                .level_for_address(address)
                .ok_or_else(|| InsteonError::InvalidAddress(address.to_string()))?,
            LevelSource::Device => {
                let response = {
                    let mut tx = self.transaction().await;
                    tx.send_standard(address, command::STATUS_REQUEST, 0x00, flags::DIRECT_DEFAULT)
                        .await?
                };
                let level = response_byte(&response)?;
                self.registry().set_level_for_address(address, level);
                level
            }
        };
        Ok(unit.convert(direct))
    }

    /// Switch fully on if the mirror says off, otherwise off.
    pub async fn toggle(&self, address: Address) -> Result<()> {
        let current = self
            .get_level(address, LevelUnit::Direct, LevelSource::Mirror)
            .await?;
        let target = if current == 0 {
            Level::Percent(100)
        } else {
            Level::Percent(0)
        };
        self.set_level(address, target).await
    }

    /// Start ramping up, at the device's default rate or at `rate`.
    pub async fn fade_in(&self, address: Address, rate: Option<u8>) -> Result<()> {
        let (cmd1, cmd2) = match rate {
            None => (command::START_CHANGE, 0x01),
            Some(rate) => (command::ON_AT_RATE, rate),
        };
        self.standard_command(address, cmd1, cmd2).await?;
        self.registry().set_level_for_address(address, 0xFF);
        Ok(())
    }

    /// Start ramping down, at the device's default rate or at `rate`.
    pub async fn fade_out(&self, address: Address, rate: Option<u8>) -> Result<()> {
        let (cmd1, cmd2) = match rate {
            None => (command::START_CHANGE, 0x00),
            Some(rate) => (command::OFF_AT_RATE, rate),
        };
        self.standard_command(address, cmd1, cmd2).await?;
        self.registry().set_level_for_address(address, 0x00);
        Ok(())
    }

    /// Stop a ramp and refresh the mirror from the device.
    pub async fn fade_stop(&self, address: Address) -> Result<()> {
        self.standard_command(address, command::STOP_CHANGE, 0x00)
            .await?;
        self.get_level(address, LevelUnit::Direct, LevelSource::Device)
            .await?;
        Ok(())
    }

    /// Send an X10 unit code followed by a command.
    pub async fn send_x10(&self, house: char, unit: u8, cmd: X10Command) -> Result<()> {
        let (unit_byte, command_byte) = x10::encode(house, unit, cmd)?;

        let mut tx = self.transaction().await;
        tx.send_raw(&build_x10(unit_byte, x10::UNIT_CODE_FLAG), 0, true)
            .await?;
        tokio::time::sleep(self.config().x10_delay).await;
        tx.send_raw(&build_x10(command_byte, x10::COMMAND_FLAG), 0, true)
            .await?;
        Ok(())
    }

    /// Broadcast `cmd1` to every device linked to gateway group `group`.
    pub async fn send_group_command(&self, group: u8, cmd1: u8) -> Result<()> {
        let mut tx = self.transaction().await;
        tx.send_standard(Address::new(0, 0, group), cmd1, 0x00, flags::GROUP_DEFAULT)
            .await?;
        Ok(())
    }

    /// Query the gateway's own address, category and firmware.
    pub async fn gateway_info(&self) -> Result<GatewayInfo> {
        let frame = {
            let mut tx = self.transaction().await;
            tx.send_raw(&build_gateway_command(message::GET_INFO), 9, false)
                .await?
        };
        let bytes = frame.as_bytes();
        if frame.type_code() != message::GET_INFO || bytes.len() < 9 {
            return Err(InsteonError::UnexpectedResponse(format!(
                "gateway info: {}",
                frame
            )));
        }
        if bytes[8] != crate::protocol::ACK {
            return Err(InsteonError::Nack);
        }
        Ok(GatewayInfo {
            address: Address::new(bytes[2], bytes[3], bytes[4]),
            category: bytes[5],
            subcategory: bytes[6],
            firmware: bytes[7],
        })
    }

    /// Read operating flags. `cmd2` selects which flag set.
    pub async fn operating_flags(&self, address: Address, cmd2: u8) -> Result<u8> {
        let response = self
            .standard_command(address, command::GET_OPERATING_FLAGS, cmd2)
            .await?;
        response_byte(&response)
    }

    /// Set an operating flag. Returns the device's cmd2.
    pub async fn set_operating_flags(&self, address: Address, cmd2: u8) -> Result<u8> {
        let response = self
            .standard_command(address, command::SET_OPERATING_FLAGS, cmd2)
            .await?;
        response_byte(&response)
    }

    /// Insteon engine version (0 = i1, 1 = i2, 2 = i2cs).
    pub async fn engine_version(&self, address: Address) -> Result<u8> {
        let response = self
            .standard_command(address, command::ENGINE_VERSION, 0x00)
            .await?;
        response.cmd2().ok_or_else(|| {
            InsteonError::UnexpectedResponse(format!("engine version: {}", response))
        })
    }

    /// Ask for product data and read category and subcategory from the
    /// extended reply.
    pub async fn device_category(&self, address: Address) -> Result<DeviceCategory> {
        let mut tx = self.transaction().await;
        tx.send_standard(
            address,
            command::PRODUCT_DATA_REQUEST,
            0x00,
            flags::DIRECT_DEFAULT,
        )
        .await?;

        let wait = self.config().response_timeout;
        loop {
            let frame = tx.next_frame(wait).await?;
            if frame.type_code() != message::EXTENDED_RECEIVED {
                tracing::debug!("Skipping {} while waiting for product data", frame);
                continue;
            }
            return match (frame.get(15), frame.get(16)) {
                (Some(category), Some(subcategory)) => Ok(DeviceCategory {
                    category,
                    subcategory,
                }),
                _ => Err(InsteonError::UnexpectedResponse(format!(
                    "product data: {}",
                    frame
                ))),
            };
        }
    }

    /// Send an ID request and return the device's set-button broadcast.
    pub async fn identify(&self, address: Address) -> Result<Frame> {
        let mut tx = self.transaction().await;
        let first = tx
            .send_standard(address, command::ID_REQUEST, 0x00, flags::DIRECT_DEFAULT)
            .await?;
        if first.message_flags().map(|f| f & flags::BROADCAST != 0) == Some(true) {
            return Ok(first);
        }
        tx.next_frame(self.config().response_timeout).await
    }

    /// Set the high byte of the peek/poke address.
    pub async fn set_register_page(&self, address: Address, high: u8) -> Result<()> {
        self.standard_command(address, command::SET_ADDRESS_MSB, high)
            .await?;
        Ok(())
    }

    /// Peek the byte at low address `low` of the current page.
    pub async fn read_register(&self, address: Address, low: u8, tries: u32) -> Result<u8> {
        let response = self
            .with_retries(tries, || {
                self.standard_command(address, command::PEEK, low)
            })
            .await?;
        response_byte(&response)
    }

    /// Poke `value` at the address selected by the last peek.
    pub async fn write_register(&self, address: Address, value: u8, tries: u32) -> Result<()> {
        self.with_retries(tries, || {
            self.standard_command(address, command::POKE, value)
        })
        .await?;
        Ok(())
    }

    /// Read the gateway's own link table.
    ///
    /// Walks `02 69` then `02 6A` until the gateway answers NACK.
    pub async fn gateway_link_table(&self) -> Result<Vec<LinkRecord>> {
        let mut tx = self.transaction().await;
        let mut records = Vec::new();
        let mut request = message::FIRST_LINK;

        loop {
            let frame = match tx
                .send_raw(&build_gateway_command(request), 10, true)
                .await
            {
                Ok(frame) => frame,
                Err(InsteonError::Nack) => break,
                Err(e) => return Err(e),
            };
            if frame.type_code() != message::ALL_LINK_RECORD {
                return Err(InsteonError::UnexpectedResponse(format!(
                    "link record: {}",
                    frame
                )));
            }
            let record = frame
                .as_bytes()
                .get(2..10)
                .and_then(LinkRecord::from_bytes)
                .ok_or_else(|| InsteonError::UnexpectedResponse(frame.to_string()))?;
            records.push(record);
            request = message::NEXT_LINK;
        }
        Ok(records)
    }

    /// One standard direct message in its own transaction.
    async fn standard_command(&self, address: Address, cmd1: u8, cmd2: u8) -> Result<Frame> {
        let mut tx = self.transaction().await;
        tx.send_standard(address, cmd1, cmd2, flags::DIRECT_DEFAULT)
            .await
    }

    /// Run `op` up to `tries` times with the configured delay between
    /// attempts.
    async fn with_retries<F, Fut>(&self, tries: u32, mut op: F) -> Result<Frame>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Frame>>,
    {
        let tries = tries.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(frame) => return Ok(frame),
                Err(e) if attempt < tries => {
                    tracing::debug!(attempt, "Retrying after: {}", e);
                    attempt += 1;
                    tokio::time::sleep(self.config().retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
