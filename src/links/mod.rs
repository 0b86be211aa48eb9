//! Device link databases.
//!
//! Two ways to reach a device's link table:
//! - [`BulkLinks`] - one extended request, records streamed back
//! - [`LegacyLinks`] - byte-by-byte register peeks and pokes
//!
//! Both implement [`LinkSource`]. Link creation and deletion live here as
//! [`Modem`] methods.

mod bulk;
mod legacy;
mod record;

pub use bulk::{record_offset, BulkLinks, TABLE_START};
pub use legacy::{slot_address, LegacyLinks, DEFAULT_TRIES, FIRST_SLOT, TABLE_PAGE};
pub use record::{
    LinkRecord, CONTROLLER_FLAGS, DEFAULT_ON_LEVEL, DEFAULT_RAMP_RATE, RECORD_LEN,
    RESPONDER_FLAGS,
};

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::address::{Address, DeviceRef};
use crate::error::{InsteonError, Result};
use crate::modem::Modem;

/// Boxed future returned by [`LinkSource`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Read and write access to a device's link table.
pub trait LinkSource: Send + Sync {
    /// Read record `index`, or the whole table up to its terminator.
    fn read_links(
        &self,
        address: Address,
        index: Option<usize>,
    ) -> BoxFuture<'_, Result<Vec<LinkRecord>>>;

    /// Overwrite record `index`.
    fn write_link(
        &self,
        address: Address,
        index: usize,
        record: LinkRecord,
    ) -> BoxFuture<'_, Result<()>>;
}

/// Which access method to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkAccess {
    #[default]
    Bulk,
    Legacy,
}

/// Groups and buttons written into a new controller/responder pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkRoles {
    pub controller_group: u8,
    pub controller_button: u8,
    pub responder_group: u8,
    pub responder_button: u8,
}

/// Work out groups and buttons for a new link.
///
/// Keypads need a button; other devices must not be given one.
pub fn link_roles(
    controller_is_keypad: bool,
    controller_button: Option<u8>,
    responder_is_keypad: bool,
    responder_button: Option<u8>,
) -> Result<LinkRoles> {
    let controller_button = check_button("controller", controller_is_keypad, controller_button)?;
    let responder_button = check_button("responder", responder_is_keypad, responder_button)?;

    let controller_group = controller_button.unwrap_or(1);
    let responder_group = match (controller_button, responder_button) {
        (Some(_), Some(resp)) => resp,
        (None, Some(_)) => 1,
        (Some(ctrl), None) => ctrl,
        (None, None) => 1,
    };

    Ok(LinkRoles {
        controller_group,
        controller_button: controller_button.unwrap_or(0),
        responder_group,
        responder_button: responder_button.unwrap_or(0),
    })
}

fn check_button(role: &str, is_keypad: bool, button: Option<u8>) -> Result<Option<u8>> {
    match (is_keypad, button) {
        (true, None) => Err(InsteonError::InvalidParameter(format!(
            "The {} is a keypad; specify a button number",
            role
        ))),
        (false, Some(b)) => Err(InsteonError::InvalidParameter(format!(
            "Button {} given for the {}, which is not a keypad",
            b, role
        ))),
        (_, button) => Ok(button),
    }
}

impl Modem {
    /// A link table accessor bound to this modem.
    pub fn link_source(&self, access: LinkAccess) -> Box<dyn LinkSource> {
        match access {
            LinkAccess::Bulk => Box::new(BulkLinks::new(self.clone())),
            LinkAccess::Legacy => Box::new(LegacyLinks::new(self.clone())),
        }
    }

    /// Read a device's link table.
    pub async fn read_links(
        &self,
        address: Address,
        index: Option<usize>,
        access: LinkAccess,
    ) -> Result<Vec<LinkRecord>> {
        self.link_source(access).read_links(address, index).await
    }

    /// Link `controller` to `responder`, writing a record into each table.
    ///
    /// Returns the controller and responder records written.
    pub async fn create_link(
        &self,
        controller: DeviceRef,
        responder: DeviceRef,
    ) -> Result<(LinkRecord, LinkRecord)> {
        let controller_category = self.device_category(controller.address).await?;
        let responder_category = self.device_category(responder.address).await?;
        for (role, address, category) in [
            ("controller", controller.address, controller_category),
            ("responder", responder.address, responder_category),
        ] {
            if category.model().is_none() {
                return Err(InsteonError::UnknownDeviceType(format!(
                    "{} {} reports category {}",
                    role, address, category
                )));
            }
        }

        let roles = link_roles(
            controller_category.is_keypad(),
            controller.button,
            responder_category.is_keypad(),
            responder.button,
        )?;

        let legacy = LegacyLinks::new(self.clone());
        let controller_slot = legacy.free_slot(controller.address).await?;
        let responder_slot = legacy.free_slot(responder.address).await?;

        let controller_record = LinkRecord::controller(
            roles.controller_group,
            responder.address,
            roles.controller_button,
        );
        let responder_record = LinkRecord::responder(
            roles.responder_group,
            controller.address,
            roles.responder_button,
        );

        legacy
            .write_link(controller.address, controller_slot, controller_record)
            .await?;
        legacy
            .write_link(responder.address, responder_slot, responder_record)
            .await?;

        tracing::info!(
            "Linked {} (slot {}) to {} (slot {})",
            controller.address,
            controller_slot,
            responder.address,
            responder_slot
        );
        Ok((controller_record, responder_record))
    }

    /// Delete record `index` (or the last record) from a device's table.
    ///
    /// The last record is moved into the freed slot, then its old slot is
    /// zeroed.
    pub async fn delete_link(&self, address: Address, index: Option<usize>) -> Result<()> {
        let bulk = BulkLinks::new(self.clone());
        let table = bulk.read_links(address, None).await?;
        let Some((last_index, last)) = table.len().checked_sub(1).zip(table.last().copied())
        else {
            return Err(InsteonError::InvalidParameter(format!(
                "{} has no link records",
                address
            )));
        };

        if let Some(index) = index {
            if index > last_index {
                return Err(InsteonError::InvalidParameter(format!(
                    "{} has no link record {}",
                    address, index
                )));
            }
            if table.len() > 1 && index != last_index {
                bulk.write_link(address, index, last).await?;
            }
        }
        bulk.write_link(address, last_index, LinkRecord::empty())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_plain_devices() {
        let roles = link_roles(false, None, false, None).unwrap();
        assert_eq!(
            roles,
            LinkRoles {
                controller_group: 1,
                controller_button: 0,
                responder_group: 1,
                responder_button: 0,
            }
        );
    }

    #[test]
    fn test_roles_keypad_controls_dimmer() {
        let roles = link_roles(true, Some(3), false, None).unwrap();
        assert_eq!(roles.controller_group, 3);
        assert_eq!(roles.controller_button, 3);
        assert_eq!(roles.responder_group, 3);
        assert_eq!(roles.responder_button, 0);
    }

    #[test]
    fn test_roles_dimmer_controls_keypad() {
        let roles = link_roles(false, None, true, Some(2)).unwrap();
        assert_eq!(roles.controller_group, 1);
        assert_eq!(roles.responder_group, 1);
        assert_eq!(roles.responder_button, 2);
    }

    #[test]
    fn test_roles_keypad_to_keypad() {
        let roles = link_roles(true, Some(4), true, Some(2)).unwrap();
        assert_eq!(roles.controller_group, 4);
        assert_eq!(roles.responder_group, 2);
        assert_eq!(roles.responder_button, 2);
    }

    #[test]
    fn test_roles_button_validation() {
        assert!(matches!(
            link_roles(true, None, false, None),
            Err(InsteonError::InvalidParameter(_))
        ));
        assert!(matches!(
            link_roles(false, None, true, None),
            Err(InsteonError::InvalidParameter(_))
        ));
        assert!(matches!(
            link_roles(false, Some(1), false, None),
            Err(InsteonError::InvalidParameter(_))
        ));
        assert!(matches!(
            link_roles(true, Some(1), false, Some(2)),
            Err(InsteonError::InvalidParameter(_))
        ));
    }
}
