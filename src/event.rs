use crate::error::Result;
use crate::ptp::{ClockState, EventSource, PortRole, RoleAction};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt;

/// Key names of the in-process key/value projection.
pub mod keys {
    pub const STATE: &str = "state";
    pub const OFFSET: &str = "offset";
    pub const FREQ: &str = "freq";
    pub const PATH_DELAY: &str = "pathdelay";
    pub const INTERFACE: &str = "interface";
    pub const ROLE: &str = "role";
    pub const PREVIOUS_ROLE: &str = "previousRole";
    pub const ACTION: &str = "action";
    pub const GPS_FIX: &str = "gpsFix";
    pub const TIME_LS: &str = "timeLs";
    pub const CLOCK_CLASS: &str = "clockClass";
    pub const SEVERITY: &str = "severity";
    pub const STATUS: &str = "status";
}

/// Closed set of event subtypes published on the bus.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize)]
pub enum EventType {
    GNSSMetric,
    PTP4lMetric,
    PortRole,
    Phc2SysMetric,
    Ts2PhcMetric,
    ClockClassChange,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::GNSSMetric => "GNSSMetric",
            EventType::PTP4lMetric => "PTP4lMetric",
            EventType::PortRole => "PortRole",
            EventType::Phc2SysMetric => "Phc2SysMetric",
            EventType::Ts2PhcMetric => "Ts2PhcMetric",
            EventType::ClockClassChange => "ClockClassChange",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subsystem-specific sub-status carried by a metric, e.g. a DPLL phase
/// status.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct StatusMetric {
    pub subtype: &'static str,
    pub status: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub from: EventSource,
    #[serde(rename = "interface")]
    pub iface: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    #[serde(rename = "maxOffset", skip_serializing_if = "Option::is_none")]
    pub max_offset: Option<i64>,
    #[serde(rename = "freq", skip_serializing_if = "Option::is_none")]
    pub freq_adj: Option<i64>,
    #[serde(rename = "pathDelay", skip_serializing_if = "Option::is_none")]
    pub delay: Option<i64>,
    #[serde(rename = "state")]
    pub clock_state: ClockState,
    pub source: EventSource,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub status: Vec<StatusMetric>,
}

impl Metric {
    pub fn new(from: EventSource, source: EventSource, iface: impl Into<String>) -> Self {
        Self {
            from,
            iface: iface.into(),
            offset: None,
            max_offset: None,
            freq_adj: None,
            delay: None,
            clock_state: ClockState::Unknown,
            source,
            status: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortRoleEvent {
    #[serde(rename = "portID")]
    pub port_id: u32,
    pub interface: String,
    pub role: PortRole,
    #[serde(rename = "previousRole")]
    pub previous_role: PortRole,
    pub action: RoleAction,
    pub raw: String,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize)]
pub struct ClockClassChange {
    #[serde(rename = "clockClass")]
    pub clock_class: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<u8>,
}

/// UBX-NAV-TIMELS leap second record. Field names follow the u-blox interface
/// description.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TimeLs {
    /// Information source for the current number of leap seconds.
    pub src_of_curr_ls: u8,
    /// Current number of leap seconds since start of GPS time.
    pub curr_ls: i8,
    /// Information source for the future leap second event.
    pub src_of_ls_change: u8,
    /// Future leap second change: +1, -1, or 0 when none is scheduled.
    pub ls_change: i8,
    /// Seconds until (or since) the leap second event; valid only if
    /// validTimeToLsEvent is set.
    pub time_to_ls_event: i32,
    /// GPS week number of the leap second event.
    pub date_of_ls_gps_wn: u32,
    /// GPS day of week of the leap second event.
    pub date_of_ls_gps_dn: u8,
    /// Validity flags: bit 0 validCurrLs, bit 1 validTimeToLsEvent.
    pub valid: u8,
}

impl TimeLs {
    #[inline]
    pub fn valid_curr_ls(&self) -> bool {
        self.valid & 0x01 != 0
    }
    #[inline]
    pub fn valid_time_to_ls_event(&self) -> bool {
        self.valid & 0x02 != 0
    }
}

/// Composite snapshot emitted once per tick by the ublox parser.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct UBloxEvent {
    #[serde(rename = "gpsFix")]
    pub gps_fix: i8,
    pub offset: i64,
    #[serde(rename = "timeLs")]
    pub time_ls: Option<TimeLs>,
}

/// A published bus value: subtype tag plus payload. JSON is the externally
/// stable form, `values` the in-process projection.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Gnss(UBloxEvent),
    Ptp4lMetric(Metric),
    PortRole(PortRoleEvent),
    Phc2SysMetric(Metric),
    Ts2PhcMetric(Metric),
    ClockClassChange(ClockClassChange),
}

impl Event {
    pub fn subtype(&self) -> EventType {
        match self {
            Event::Gnss(_) => EventType::GNSSMetric,
            Event::Ptp4lMetric(_) => EventType::PTP4lMetric,
            Event::PortRole(_) => EventType::PortRole,
            Event::Phc2SysMetric(_) => EventType::Phc2SysMetric,
            Event::Ts2PhcMetric(_) => EventType::Ts2PhcMetric,
            Event::ClockClassChange(_) => EventType::ClockClassChange,
        }
    }

    pub fn marshal(&self) -> Result<Vec<u8>> {
        let buf = match self {
            Event::Gnss(e) => serde_json::to_vec(e)?,
            Event::Ptp4lMetric(m) | Event::Phc2SysMetric(m) | Event::Ts2PhcMetric(m) => {
                serde_json::to_vec(m)?
            }
            Event::PortRole(e) => serde_json::to_vec(e)?,
            Event::ClockClassChange(e) => serde_json::to_vec(e)?,
        };
        Ok(buf)
    }

    pub fn values(&self) -> Map<String, Value> {
        let mut map = Map::new();
        match self {
            Event::Gnss(e) => {
                map.insert(keys::GPS_FIX.to_owned(), json!(e.gps_fix));
                map.insert(keys::OFFSET.to_owned(), json!(e.offset));
                map.insert(keys::TIME_LS.to_owned(), json!(e.time_ls));
            }
            Event::Ptp4lMetric(m) | Event::Phc2SysMetric(m) | Event::Ts2PhcMetric(m) => {
                map.insert(keys::STATE.to_owned(), json!(m.clock_state.as_str()));
                map.insert(keys::INTERFACE.to_owned(), json!(m.iface));
                if let Some(offset) = m.offset {
                    map.insert(keys::OFFSET.to_owned(), json!(offset));
                }
                if let Some(freq) = m.freq_adj {
                    map.insert(keys::FREQ.to_owned(), json!(freq));
                }
                if let Some(delay) = m.delay {
                    map.insert(keys::PATH_DELAY.to_owned(), json!(delay));
                }
                if !m.status.is_empty() {
                    map.insert(keys::STATUS.to_owned(), json!(m.status));
                }
            }
            Event::PortRole(e) => {
                map.insert(keys::INTERFACE.to_owned(), json!(e.interface));
                map.insert(keys::ROLE.to_owned(), json!(e.role.as_str()));
                map.insert(keys::PREVIOUS_ROLE.to_owned(), json!(e.previous_role.as_str()));
                map.insert(keys::ACTION.to_owned(), json!(e.action.as_str()));
            }
            Event::ClockClassChange(e) => {
                map.insert(keys::CLOCK_CLASS.to_owned(), json!(e.clock_class));
                if let Some(severity) = e.severity {
                    map.insert(keys::SEVERITY.to_owned(), json!(severity));
                }
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ptp::{ClockState, EventSource, PortRole, RoleAction};

    #[test]
    fn metric_json_shape() {
        let mut metric = Metric::new(EventSource::Ptp4l, EventSource::Master, "master");
        metric.offset = Some(-1);
        metric.max_offset = Some(-1);
        metric.freq_adj = Some(-3972);
        metric.delay = Some(89);
        metric.clock_state = ClockState::Locked;
        let event = Event::Ptp4lMetric(metric);
        let value: Value = serde_json::from_slice(&event.marshal().unwrap()).unwrap();
        assert_eq!(value["state"], "Locked");
        assert_eq!(value["offset"], -1);
        assert_eq!(value["maxOffset"], -1);
        assert_eq!(value["freq"], -3972);
        assert_eq!(value["pathDelay"], 89);
        assert_eq!(value["interface"], "master");
        assert_eq!(value["from"], "ptp4l");
        assert_eq!(value["source"], "master");
    }

    #[test]
    fn metric_json_skips_absent_fields() {
        let metric = Metric::new(EventSource::Gm, EventSource::Gm, "ens1f0");
        let value: Value =
            serde_json::from_slice(&Event::Ts2PhcMetric(metric).marshal().unwrap()).unwrap();
        assert!(value.get("offset").is_none());
        assert!(value.get("pathDelay").is_none());
        assert!(value.get("status").is_none());
        assert_eq!(value["state"], "Unknown");
    }

    #[test]
    fn port_role_json_shape() {
        let event = Event::PortRole(PortRoleEvent {
            port_id: 1,
            interface: String::new(),
            role: PortRole::Slave,
            previous_role: PortRole::Unknown,
            action: RoleAction::Other,
            raw: "raw line".to_owned(),
        });
        let value: Value = serde_json::from_slice(&event.marshal().unwrap()).unwrap();
        assert_eq!(value["portID"], 1);
        assert_eq!(value["role"], "Slave");
        assert_eq!(value["previousRole"], "Unknown");
        assert_eq!(value["action"], "Other");
        assert_eq!(value["raw"], "raw line");
    }

    #[test]
    fn ublox_json_shape() {
        let event = Event::Gnss(UBloxEvent {
            gps_fix: 3,
            offset: 42,
            time_ls: None,
        });
        let value: Value = serde_json::from_slice(&event.marshal().unwrap()).unwrap();
        assert_eq!(value["gpsFix"], 3);
        assert_eq!(value["offset"], 42);
        assert!(value["timeLs"].is_null());
        assert_eq!(event.subtype(), EventType::GNSSMetric);
    }

    #[test]
    fn time_ls_validity_bits() {
        let ls = TimeLs {
            valid: 0x03,
            ..TimeLs::default()
        };
        assert!(ls.valid_curr_ls());
        assert!(ls.valid_time_to_ls_event());
        let ls = TimeLs {
            valid: 0x02,
            ..TimeLs::default()
        };
        assert!(!ls.valid_curr_ls());
        assert!(ls.valid_time_to_ls_event());
    }

    #[test]
    fn values_projection_uses_documented_keys() {
        let mut metric = Metric::new(EventSource::Phc2Sys, EventSource::Phc2Sys, "CLOCK_REALTIME");
        metric.offset = Some(7);
        metric.freq_adj = Some(-2);
        metric.delay = Some(496);
        let values = Event::Phc2SysMetric(metric).values();
        assert_eq!(values[keys::OFFSET], 7);
        assert_eq!(values[keys::FREQ], -2);
        assert_eq!(values[keys::PATH_DELAY], 496);
        assert_eq!(values[keys::STATE], "Unknown");
    }
}
