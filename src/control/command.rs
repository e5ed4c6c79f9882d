//! Typed command surface
//!
//! Method-channel calls arrive as a method name plus a JSON argument map.
//! [`Command::parse`] turns them into a typed request; anything unknown is
//! `NotImplemented`.

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::lifecycle::{DeviceInfo, ForegroundNotice};

/// A request to the control façade
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    StartForegroundService { notice: ForegroundNotice },
    StopForegroundService,
    OpenBatteryOptimizationSettings,
    RequestIgnoreBatteryOptimizations,
    OpenAppDetailsSettings,
    GetDeviceInfo,
    StartHost {
        league_id: String,
        match_id: String,
        live_match_id: String,
    },
    StopHost { live_match_id: String },
    JoinViewer { live_match_id: String },
    LeaveViewer { live_match_id: String },
    SendEvent {
        live_match_id: String,
        payload: Map<String, Value>,
    },
}

/// Successful outcome of a command
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Done,
    DeviceInfo(DeviceInfo),
}

impl Response {
    /// JSON form for the method-channel reply (`null` for `Done`)
    pub fn to_value(&self) -> Value {
        match self {
            Response::Done => Value::Null,
            Response::DeviceInfo(info) => serde_json::to_value(info).unwrap_or(Value::Null),
        }
    }
}

impl Command {
    /// Parse a method-channel call
    pub fn parse(method: &str, args: &Value) -> Result<Self> {
        let command = match method {
            "startForegroundStreamingService" => {
                let defaults = ForegroundNotice::default();
                Command::StartForegroundService {
                    notice: ForegroundNotice {
                        title: optional_str(args, "title")?.unwrap_or(defaults.title),
                        text: optional_str(args, "text")?.unwrap_or(defaults.text),
                    },
                }
            }
            "stopForegroundStreamingService" => Command::StopForegroundService,
            "openBatteryOptimizationSettings" => Command::OpenBatteryOptimizationSettings,
            "requestIgnoreBatteryOptimizations" => Command::RequestIgnoreBatteryOptimizations,
            "openAppDetailsSettings" => Command::OpenAppDetailsSettings,
            "getDeviceInfo" => Command::GetDeviceInfo,
            "startHostSession" => Command::StartHost {
                league_id: required_str(args, "leagueId")?,
                match_id: required_str(args, "matchId")?,
                live_match_id: required_str(args, "liveMatchId")?,
            },
            "stopHostSession" => Command::StopHost {
                live_match_id: required_str(args, "liveMatchId")?,
            },
            "joinViewerSession" => Command::JoinViewer {
                live_match_id: required_str(args, "liveMatchId")?,
            },
            "leaveViewerSession" => Command::LeaveViewer {
                live_match_id: required_str(args, "liveMatchId")?,
            },
            "sendLiveEvent" => Command::SendEvent {
                live_match_id: required_str(args, "liveMatchId")?,
                payload: match args.get("event") {
                    None | Some(Value::Null) => Map::new(),
                    Some(Value::Object(map)) => map.clone(),
                    Some(_) => return Err(Error::InvalidArgument("event must be an object".into())),
                },
            },
            other => return Err(Error::NotImplemented(other.to_string())),
        };

        Ok(command)
    }

    /// Method-channel name of this command
    pub fn method(&self) -> &'static str {
        match self {
            Command::StartForegroundService { .. } => "startForegroundStreamingService",
            Command::StopForegroundService => "stopForegroundStreamingService",
            Command::OpenBatteryOptimizationSettings => "openBatteryOptimizationSettings",
            Command::RequestIgnoreBatteryOptimizations => "requestIgnoreBatteryOptimizations",
            Command::OpenAppDetailsSettings => "openAppDetailsSettings",
            Command::GetDeviceInfo => "getDeviceInfo",
            Command::StartHost { .. } => "startHostSession",
            Command::StopHost { .. } => "stopHostSession",
            Command::JoinViewer { .. } => "joinViewerSession",
            Command::LeaveViewer { .. } => "leaveViewerSession",
            Command::SendEvent { .. } => "sendLiveEvent",
        }
    }
}

fn optional_str(args: &Value, key: &str) -> Result<Option<String>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(Error::InvalidArgument(format!("{} must be a string", key))),
    }
}

fn required_str(args: &Value, key: &str) -> Result<String> {
    optional_str(args, key)?.ok_or_else(|| Error::InvalidArgument(format!("missing {}", key)))
}
