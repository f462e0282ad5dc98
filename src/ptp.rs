use serde::Serialize;
use std::fmt;

/// Interface placeholder used when a daemon reports against the upstream
/// master rather than a local port.
pub const MASTER: &str = "master";

/// Disciplining state reported by the linuxptp servo.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize)]
pub enum ClockState {
    #[default]
    Unknown,
    FreeRun,
    Locked,
    Holdover,
}

impl ClockState {
    /// Maps a servo state token (`s0`..`s9`, anything else) to a clock state.
    pub fn from_servo(state: &str) -> Self {
        match state {
            "s0" | "s1" => ClockState::FreeRun,
            "s2" | "s3" => ClockState::Locked,
            _ => ClockState::Unknown,
        }
    }
    pub fn as_str(self) -> &'static str {
        match self {
            ClockState::FreeRun => "FreeRun",
            ClockState::Locked => "Locked",
            ClockState::Holdover => "Holdover",
            ClockState::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ClockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize)]
pub enum PortRole {
    Passive,
    Faulty,
    Listening,
    Master,
    Slave,
    Unknown,
}

impl PortRole {
    /// Maps a ptp4l port state token. Tokens outside the closed set (such as
    /// `UNCALIBRATED`) come back as `Unknown`.
    pub fn from_ptp4l(token: &str) -> Self {
        match token {
            "PASSIVE" => PortRole::Passive,
            "FAULTY" => PortRole::Faulty,
            "LISTENING" => PortRole::Listening,
            "MASTER" => PortRole::Master,
            "SLAVE" => PortRole::Slave,
            _ => PortRole::Unknown,
        }
    }
    pub fn as_str(self) -> &'static str {
        match self {
            PortRole::Passive => "Passive",
            PortRole::Faulty => "Faulty",
            PortRole::Listening => "Listening",
            PortRole::Master => "Master",
            PortRole::Slave => "Slave",
            PortRole::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize)]
pub enum RoleAction {
    #[serde(rename = "Init Complete")]
    InitComplete,
    #[serde(rename = "Announce Receipt Timeout Expires")]
    AnnounceReceiptTimeoutExpires,
    #[serde(rename = "Fault Detected")]
    FaultDetected,
    Other,
}

impl RoleAction {
    pub fn from_ptp4l(token: &str) -> Self {
        match token {
            "INIT_COMPLETE" => RoleAction::InitComplete,
            "ANNOUNCE_RECEIPT_TIMEOUT_EXPIRES" => RoleAction::AnnounceReceiptTimeoutExpires,
            "FAULT_DETECTED" => RoleAction::FaultDetected,
            _ => RoleAction::Other,
        }
    }
    pub fn as_str(self) -> &'static str {
        match self {
            RoleAction::InitComplete => "Init Complete",
            RoleAction::AnnounceReceiptTimeoutExpires => "Announce Receipt Timeout Expires",
            RoleAction::FaultDetected => "Fault Detected",
            RoleAction::Other => "Other",
        }
    }
}

impl fmt::Display for RoleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clock role of a ptp4l configuration, derived from its interface sections.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize)]
pub enum ClockType {
    GM,
    BC,
    OC,
    TBC,
    TGM,
}

impl ClockType {
    pub fn as_str(self) -> &'static str {
        match self {
            ClockType::GM => "GM",
            ClockType::BC => "BC",
            ClockType::OC => "OC",
            ClockType::TBC => "TBC",
            ClockType::TGM => "TGM",
        }
    }
}

impl fmt::Display for ClockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origin of a metric: the reporting daemon or the upstream time source.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize)]
pub enum EventSource {
    #[serde(rename = "ptp4l")]
    Ptp4l,
    #[serde(rename = "phc2sys")]
    Phc2Sys,
    #[serde(rename = "ts2phc")]
    Ts2Phc,
    #[serde(rename = "dpll")]
    Dpll,
    #[serde(rename = "gnss")]
    Gnss,
    #[serde(rename = "GM")]
    Gm,
    #[serde(rename = "master")]
    Master,
    #[serde(rename = "pps")]
    Pps,
}

impl EventSource {
    pub fn as_str(self) -> &'static str {
        match self {
            EventSource::Ptp4l => "ptp4l",
            EventSource::Phc2Sys => "phc2sys",
            EventSource::Ts2Phc => "ts2phc",
            EventSource::Dpll => "dpll",
            EventSource::Gnss => "gnss",
            EventSource::Gm => "GM",
            EventSource::Master => "master",
            EventSource::Pps => "pps",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
