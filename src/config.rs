//! Daemon configuration.
//!
//! Read from a TOML file, then overridden by `INSTEON_*` environment
//! variables and finally by command-line flags.
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//!
//! [timeouts]
//! response_ms = 8000
//! settle_ms = 4000
//!
//! [remote]
//! bind = "0.0.0.0:52006"
//! codec = "msgpack"
//!
//! [scheduler]
//! latitude = 40.01
//! longitude = -105.27
//! auto_update_secs = 600
//!
//! [devices]
//! file = "devices.json"
//!
//! [[timer]]
//! kind = "daily"
//! time = "sunset"
//! action = "200"
//! device = "porch"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::codec::WireCodec;
use crate::error::{InsteonError, Result};
use crate::modem::{
    Modem, ModemConfig, DEFAULT_ECHO_TIMEOUT, DEFAULT_READ_TIMEOUT, DEFAULT_RESPONSE_TIMEOUT,
    DEFAULT_RETRY_DELAY, DEFAULT_SETTLE_DELAY, DEFAULT_X10_DELAY,
};
use crate::remote::{RemoteConfig, DEFAULT_MAX_CONCURRENT, DEFAULT_REMOTE_PORT};
use crate::scheduler::{Action, DailyTime, Location, Scheduler, TimerId};
use crate::transport::{SerialSettings, DEFAULT_BAUD_RATE};

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "INSTEON_";

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialSection {
    pub port: Option<String>,
    pub baud_rate: u32,
}

impl Default for SerialSection {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

/// Timings in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutSection {
    pub echo_ms: u64,
    pub response_ms: u64,
    pub read_ms: u64,
    pub settle_ms: u64,
    pub retry_ms: u64,
    pub x10_ms: u64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            echo_ms: millis(DEFAULT_ECHO_TIMEOUT),
            response_ms: millis(DEFAULT_RESPONSE_TIMEOUT),
            read_ms: millis(DEFAULT_READ_TIMEOUT),
            settle_ms: millis(DEFAULT_SETTLE_DELAY),
            retry_ms: millis(DEFAULT_RETRY_DELAY),
            x10_ms: millis(DEFAULT_X10_DELAY),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteSection {
    pub enabled: bool,
    pub bind: SocketAddr,
    pub codec: WireCodec,
    pub max_concurrent: usize,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_REMOTE_PORT)),
            codec: WireCodec::default(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerSection {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Round-robin refresh period; off when unset.
    pub auto_update_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceSection {
    /// JSON device file.
    pub file: Option<PathBuf>,
    /// Write levels back to the file on exit.
    pub save_on_exit: bool,
}

/// A timer installed at startup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimerSpec {
    Interval {
        seconds: u64,
        action: String,
        device: Option<String>,
        count: Option<u32>,
    },
    Daily {
        time: String,
        action: String,
        device: Option<String>,
    },
    Trigger {
        source: String,
        command: u8,
        action: String,
        #[serde(default)]
        delay_seconds: u64,
        target: Option<String>,
    },
}

impl TimerSpec {
    /// Add this timer to `scheduler`.
    pub fn install(&self, modem: &Modem, scheduler: &Scheduler) -> Result<TimerId> {
        let device = |text: &Option<String>| -> Result<_> {
            text.as_deref()
                .map(|t| modem.resolve(t).map(|r| r.address))
                .transpose()
        };
        match self {
            TimerSpec::Interval {
                seconds,
                action,
                device: target,
                count,
            } => scheduler.add_interval(
                Duration::from_secs(*seconds),
                action.parse::<Action>()?,
                device(target)?,
                *count,
            ),
            TimerSpec::Daily {
                time,
                action,
                device: target,
            } => scheduler.add_daily(
                time.parse::<DailyTime>()?,
                device(target)?,
                action.parse::<Action>()?,
            ),
            TimerSpec::Trigger {
                source,
                command,
                action,
                delay_seconds,
                target,
            } => scheduler.add_trigger(
                modem.resolve(source)?,
                *command,
                action.parse::<Action>()?,
                Duration::from_secs(*delay_seconds),
                device(target)?,
            ),
        }
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub serial: SerialSection,
    pub timeouts: TimeoutSection,
    pub remote: RemoteSection,
    pub scheduler: SchedulerSection,
    pub devices: DeviceSection,
    #[serde(rename = "timer")]
    pub timers: Vec<TimerSpec>,
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| InsteonError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            InsteonError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    /// Apply `INSTEON_*` variables from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(std::env::vars())
    }

    /// Apply `INSTEON_*` overrides from `vars`. Other names are ignored.
    pub fn apply_vars<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref();
            match name {
                "PORT" => self.serial.port = Some(value.to_string()),
                "BAUD_RATE" => self.serial.baud_rate = parse_env(name, value)?,
                "REMOTE_BIND" => self.remote.bind = parse_env(name, value)?,
                "REMOTE_ENABLED" => self.remote.enabled = parse_env(name, value)?,
                "CODEC" => {
                    self.remote.codec = toml::Value::String(value.to_string())
                        .try_into()
                        .map_err(|e| InsteonError::Config(format!("{}{}: {}", ENV_PREFIX, name, e)))?
                }
                "DEVICES" => self.devices.file = Some(PathBuf::from(value)),
                "LATITUDE" => self.scheduler.latitude = Some(parse_env(name, value)?),
                "LONGITUDE" => self.scheduler.longitude = Some(parse_env(name, value)?),
                "RESPONSE_MS" => self.timeouts.response_ms = parse_env(name, value)?,
                "SETTLE_MS" => self.timeouts.settle_ms = parse_env(name, value)?,
                _ => tracing::debug!("Ignoring unknown override {}{}", ENV_PREFIX, name),
            }
        }
        Ok(())
    }

    pub fn modem_config(&self) -> ModemConfig {
        let t = &self.timeouts;
        ModemConfig {
            echo_timeout: Duration::from_millis(t.echo_ms),
            response_timeout: Duration::from_millis(t.response_ms),
            read_timeout: Duration::from_millis(t.read_ms),
            settle_delay: Duration::from_millis(t.settle_ms),
            retry_delay: Duration::from_millis(t.retry_ms),
            x10_delay: Duration::from_millis(t.x10_ms),
            ..ModemConfig::default()
        }
    }

    pub fn serial_settings(&self) -> Result<SerialSettings> {
        let port = self
            .serial
            .port
            .as_deref()
            .ok_or_else(|| InsteonError::Config("No serial port configured".into()))?;
        let mut settings = SerialSettings::new(port);
        settings.baud_rate = self.serial.baud_rate;
        settings.timeout = Duration::from_millis(self.timeouts.read_ms);
        Ok(settings)
    }

    /// Remote server settings, or `None` when disabled.
    pub fn remote_config(&self) -> Option<RemoteConfig> {
        self.remote.enabled.then(|| RemoteConfig {
            bind: self.remote.bind,
            codec: self.remote.codec,
            max_concurrent: self.remote.max_concurrent,
        })
    }

    /// Location for sunrise and sunset, when both coordinates are set.
    pub fn location(&self) -> Result<Option<Location>> {
        match (self.scheduler.latitude, self.scheduler.longitude) {
            (Some(latitude), Some(longitude)) => {
                if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
                    return Err(InsteonError::Config(format!(
                        "Location {}, {} out of range",
                        latitude, longitude
                    )));
                }
                Ok(Some(Location {
                    latitude,
                    longitude,
                }))
            }
            (None, None) => Ok(None),
            _ => Err(InsteonError::Config(
                "Set both latitude and longitude, or neither".into(),
            )),
        }
    }
}

fn parse_env<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| InsteonError::Config(format!("{}{}={}: {}", ENV_PREFIX, name, value, e)))
}
