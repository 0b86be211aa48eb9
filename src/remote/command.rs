//! Remote commands and replies.
//!
//! The command set is a closed enum: anything that does not decode into a
//! [`RemoteCommand`] is rejected before it reaches the engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::address::Address;
use crate::commands::{Level, LevelSource, LevelUnit};
use crate::error::{InsteonError, Result};
use crate::links::LinkAccess;
use crate::modem::Modem;
use crate::protocol::X10Command;
use crate::scheduler::{Action, DailyTime, Scheduler, TimerId};

/// One request datagram, tagged by `cmd`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum RemoteCommand {
    /// Liveness check.
    Ping,
    SetLevel {
        device: String,
        level: u8,
        #[serde(default)]
        unit: LevelUnit,
    },
    GetLevel {
        device: String,
        #[serde(default)]
        unit: LevelUnit,
        #[serde(default)]
        source: LevelSource,
    },
    Toggle {
        device: String,
    },
    FadeIn {
        device: String,
        rate: Option<u8>,
    },
    FadeOut {
        device: String,
        rate: Option<u8>,
    },
    FadeStop {
        device: String,
    },
    X10 {
        house: char,
        unit: u8,
        command: X10Command,
    },
    GroupCommand {
        group: u8,
        cmd1: u8,
    },
    GatewayInfo,
    GatewayLinks,
    ListDevices,
    ReadLinks {
        device: String,
        index: Option<usize>,
        #[serde(default)]
        access: LinkAccess,
    },
    CreateLink {
        controller: String,
        responder: String,
    },
    DeleteLink {
        device: String,
        index: Option<usize>,
    },
    AddInterval {
        seconds: u64,
        action: String,
        device: Option<String>,
        count: Option<u32>,
    },
    AddDaily {
        time: String,
        action: String,
        device: Option<String>,
    },
    AddTrigger {
        source: String,
        command: u8,
        action: String,
        #[serde(default)]
        delay_seconds: u64,
        target: Option<String>,
    },
    CancelTimer {
        id: TimerId,
    },
    ListTimers,
}

/// Reply to one request: `{ok, result}` or `{ok, error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RemoteReply {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: impl ToString) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.to_string()),
        }
    }
}

impl From<Result<Value>> for RemoteReply {
    fn from(result: Result<Value>) -> Self {
        match result {
            Ok(value) => Self::success(value),
            Err(e) => Self::failure(e),
        }
    }
}

fn resolve(modem: &Modem, text: &str) -> Result<Address> {
    Ok(modem.resolve(text)?.address)
}

fn resolve_opt(modem: &Modem, text: Option<&str>) -> Result<Option<Address>> {
    text.map(|t| resolve(modem, t)).transpose()
}

impl RemoteCommand {
    /// Run the command.
    pub async fn execute(self, modem: &Modem, scheduler: &Scheduler) -> Result<Value> {
        match self {
            RemoteCommand::Ping => Ok(json!("pong")),
            RemoteCommand::SetLevel {
                device,
                level,
                unit,
            } => {
                let level = match unit {
                    LevelUnit::Percent => Level::Percent(level),
                    LevelUnit::Direct => Level::Direct(level),
                };
                modem.set_level(resolve(modem, &device)?, level).await?;
                Ok(Value::Null)
            }
            RemoteCommand::GetLevel {
                device,
                unit,
                source,
            } => {
                let level = modem
                    .get_level(resolve(modem, &device)?, unit, source)
                    .await?;
                Ok(json!(level))
            }
            RemoteCommand::Toggle { device } => {
                modem.toggle(resolve(modem, &device)?).await?;
                Ok(Value::Null)
            }
            RemoteCommand::FadeIn { device, rate } => {
                modem.fade_in(resolve(modem, &device)?, rate).await?;
                Ok(Value::Null)
            }
            RemoteCommand::FadeOut { device, rate } => {
                modem.fade_out(resolve(modem, &device)?, rate).await?;
                Ok(Value::Null)
            }
            RemoteCommand::FadeStop { device } => {
                modem.fade_stop(resolve(modem, &device)?).await?;
                Ok(Value::Null)
            }
            RemoteCommand::X10 {
                house,
                unit,
                command,
            } => {
                modem.send_x10(house, unit, command).await?;
                Ok(Value::Null)
            }
            RemoteCommand::GroupCommand { group, cmd1 } => {
                modem.send_group_command(group, cmd1).await?;
                Ok(Value::Null)
            }
            RemoteCommand::GatewayInfo => Ok(serde_json::to_value(modem.gateway_info().await?)?),
            RemoteCommand::GatewayLinks => {
                Ok(serde_json::to_value(modem.gateway_link_table().await?)?)
            }
            RemoteCommand::ListDevices => {
                let registry = modem.registry();
                let devices: Vec<Value> = (0..registry.len())
                    .filter_map(|i| {
                        let address = registry.address_for_index(i)?;
                        Some(json!({
                            "address": address,
                            "type": registry.type_for_index(i),
                            "level": registry.level_for_index(i),
                        }))
                    })
                    .collect();
                Ok(Value::Array(devices))
            }
            RemoteCommand::ReadLinks {
                device,
                index,
                access,
            } => {
                let records = modem
                    .read_links(resolve(modem, &device)?, index, access)
                    .await?;
                Ok(serde_json::to_value(records)?)
            }
            RemoteCommand::CreateLink {
                controller,
                responder,
            } => {
                let (ctrl, resp) = modem
                    .create_link(modem.resolve(&controller)?, modem.resolve(&responder)?)
                    .await?;
                Ok(json!({ "controller": ctrl, "responder": resp }))
            }
            RemoteCommand::DeleteLink { device, index } => {
                modem.delete_link(resolve(modem, &device)?, index).await?;
                Ok(Value::Null)
            }
            RemoteCommand::AddInterval {
                seconds,
                action,
                device,
                count,
            } => {
                let id = scheduler.add_interval(
                    Duration::from_secs(seconds),
                    action.parse::<Action>()?,
                    resolve_opt(modem, device.as_deref())?,
                    count,
                )?;
                Ok(json!(id))
            }
            RemoteCommand::AddDaily {
                time,
                action,
                device,
            } => {
                let id = scheduler.add_daily(
                    time.parse::<DailyTime>()?,
                    resolve_opt(modem, device.as_deref())?,
                    action.parse::<Action>()?,
                )?;
                Ok(json!(id))
            }
            RemoteCommand::AddTrigger {
                source,
                command,
                action,
                delay_seconds,
                target,
            } => {
                let id = scheduler.add_trigger(
                    modem.resolve(&source)?,
                    command,
                    action.parse::<Action>()?,
                    Duration::from_secs(delay_seconds),
                    resolve_opt(modem, target.as_deref())?,
                )?;
                Ok(json!(id))
            }
            RemoteCommand::CancelTimer { id } => {
                if scheduler.cancel(id) {
                    Ok(Value::Null)
                } else {
                    Err(InsteonError::InvalidParameter(format!("No timer {}", id)))
                }
            }
            RemoteCommand::ListTimers => Ok(json!(scheduler.ids())),
        }
    }
}
