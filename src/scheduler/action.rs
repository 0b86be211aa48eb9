//! What timers do when they fire.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::address::Address;
use crate::commands::{Level, LevelSource, LevelUnit};
use crate::dispatcher::DeviceEvent;
use crate::error::{InsteonError, Result};
use crate::modem::Modem;
use crate::registry::DeviceRegistry;

/// User callback run by a timer. Trigger timers pass the matching event.
pub type ActionCallback = Arc<dyn Fn(Option<&DeviceEvent>) + Send + Sync>;

/// A timer action.
#[derive(Clone)]
pub enum Action {
    Toggle,
    /// Set a direct level (0..=255).
    SetLevel(u8),
    Off,
    Callback(ActionCallback),
    /// Query the target's level into the mirror.
    Refresh,
    /// Refresh the target, then move on to the next dimmable device.
    RefreshAndAdvance,
}

impl Action {
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(Option<&DeviceEvent>) + Send + Sync + 'static,
    {
        Action::Callback(Arc::new(f))
    }

    /// Whether the action operates on a device address.
    pub fn needs_target(&self) -> bool {
        !matches!(self, Action::Callback(_))
    }

    /// Run the action. `target` may be advanced by
    /// [`Action::RefreshAndAdvance`].
    pub async fn run(
        &self,
        modem: &Modem,
        target: &mut Option<Address>,
        event: Option<&DeviceEvent>,
    ) -> Result<()> {
        if let Action::Callback(callback) = self {
            callback(event);
            return Ok(());
        }

        let address = target.ok_or_else(|| {
            InsteonError::InvalidParameter(format!("{} needs a target device", self))
        })?;
        match self {
            Action::Toggle => modem.toggle(address).await,
            Action::SetLevel(level) => modem.set_level(address, Level::Direct(*level)).await,
            Action::Off => modem.set_level(address, Level::Direct(0)).await,
            Action::Refresh => modem
                .get_level(address, LevelUnit::Direct, LevelSource::Device)
                .await
                .map(|_| ()),
            Action::RefreshAndAdvance => {
                let result = modem
                    .get_level(address, LevelUnit::Direct, LevelSource::Device)
                    .await
                    .map(|_| ());
                // Advance even when the refresh failed.
                if let Some(next) = next_refresh_target(modem.registry().as_ref(), address) {
                    *target = Some(next);
                }
                result
            }
            Action::Callback(_) => Ok(()),
        }
    }
}

/// The next dimmable device after `current`, wrapping around.
pub fn next_refresh_target(registry: &dyn DeviceRegistry, current: Address) -> Option<Address> {
    let len = registry.len();
    if len == 0 {
        return None;
    }
    let start = registry.index_for_address(current).unwrap_or(len - 1);
    (1..=len)
        .map(|step| (start + step) % len)
        .find(|&i| {
            registry
                .type_for_index(i)
                .map(|t| t.is_dimmable())
                .unwrap_or(false)
        })
        .and_then(|i| registry.address_for_index(i))
}

/// The first dimmable device in the registry.
pub fn first_refresh_target(registry: &dyn DeviceRegistry) -> Option<Address> {
    (0..registry.len())
        .find(|&i| {
            registry
                .type_for_index(i)
                .map(|t| t.is_dimmable())
                .unwrap_or(false)
        })
        .and_then(|i| registry.address_for_index(i))
}

impl FromStr for Action {
    type Err = InsteonError;

    /// Parses `toggle`, `on`, `off`, `refresh`, `refresh_all` or a direct
    /// level `0..=255`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "toggle" => Ok(Action::Toggle),
            "on" => Ok(Action::SetLevel(0xFF)),
            "off" => Ok(Action::Off),
            "refresh" | "update" => Ok(Action::Refresh),
            "refresh_all" | "update_all" => Ok(Action::RefreshAndAdvance),
            other => other
                .parse::<u8>()
                .map(Action::SetLevel)
                .map_err(|_| InsteonError::InvalidParameter(format!("Invalid action '{}'", s))),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Toggle => f.write_str("toggle"),
            Action::SetLevel(level) => write!(f, "level {}", level),
            Action::Off => f.write_str("off"),
            Action::Callback(_) => f.write_str("callback"),
            Action::Refresh => f.write_str("refresh"),
            Action::RefreshAndAdvance => f.write_str("refresh_all"),
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Action({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DeviceRecord, DeviceType, MemoryRegistry};

    fn registry() -> MemoryRegistry {
        MemoryRegistry::new(vec![
            DeviceRecord::new("gateway", Address::new(0x11, 0x11, 0x11), DeviceType::Plm),
            DeviceRecord::new("hall", Address::new(0x22, 0x22, 0x22), DeviceType::Dimmer),
            DeviceRecord::new("door", Address::new(0x33, 0x33, 0x33), DeviceType::GarageIo),
            DeviceRecord::new("porch", Address::new(0x44, 0x44, 0x44), DeviceType::Switch),
        ])
    }

    #[test]
    fn test_parse_actions() {
        assert!(matches!("toggle".parse::<Action>().unwrap(), Action::Toggle));
        assert!(matches!("ON".parse::<Action>().unwrap(), Action::SetLevel(255)));
        assert!(matches!("off".parse::<Action>().unwrap(), Action::Off));
        assert!(matches!("128".parse::<Action>().unwrap(), Action::SetLevel(128)));
        assert!(matches!(
            "update_all".parse::<Action>().unwrap(),
            Action::RefreshAndAdvance
        ));
        assert!("256".parse::<Action>().is_err());
        assert!("explode".parse::<Action>().is_err());
    }

    #[test]
    fn test_first_refresh_target() {
        assert_eq!(
            first_refresh_target(&registry()),
            Some(Address::new(0x22, 0x22, 0x22))
        );
        assert_eq!(first_refresh_target(&MemoryRegistry::default()), None);
    }

    #[test]
    fn test_refresh_rotation_skips_other_types() {
        let reg = registry();
        let hall = Address::new(0x22, 0x22, 0x22);
        let porch = Address::new(0x44, 0x44, 0x44);
        assert_eq!(next_refresh_target(&reg, hall), Some(porch));
        assert_eq!(next_refresh_target(&reg, porch), Some(hall));
    }

    #[test]
    fn test_needs_target() {
        assert!(Action::Toggle.needs_target());
        assert!(!Action::callback(|_| {}).needs_target());
    }
}
