use crate::error::{Error, Result};
use crate::event::{ClockClassChange, Event, Metric, PortRoleEvent};
use crate::parser::{capture_i64, try_extract, ParseOutcome, RegexExtractor};
use crate::ptp::{ClockState, EventSource, PortRole, RoleAction, MASTER};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

pub const PROCESS_NAME: &str = "ptp4l";
pub const PROCESS_PATH: &str = "/usr/sbin/ptp4l";

// ptp4l[74737.942]: [ptp4l.0.config] rms 53 max 74 freq -16642 +/- 40 delay 1089 +/- 20
// ptp4l[5196755.139]: [ptp4l.0.config] ens5f0 rms 3152778 max 3152778 freq -6083928 +/- 0 delay 2791 +/- 0
static SUMMARY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^ptp4l\[(?P<timestamp>\d+\.?\d*)\]:\s*\[(?P<config_name>[^:\]]+)(?::(?P<severity>\d+))?\]\s+(?:(?P<interface>\S+)\s+)?rms\s+(?P<offset>-?\d+)\s+max\s+(?P<max_offset>-?\d+)\s+freq\s+(?P<freq_adj>[-+]?\d+)\s+\+/-\s+\d+\s+delay\s+(?P<delay>-?\d+)\s+\+/-\s+\d+$",
    )
    .unwrap()
});

// ptp4l[365195.391]: [ptp4l.0.config] master offset -1 s2 freq -3972 path delay 89
static REGULAR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^ptp4l\[(?P<timestamp>\d+\.?\d*)\]:\s*\[(?P<config_name>[^:\]]+)(?::(?P<severity>\d+))?\]\s+(?P<interface>\S+)\s+offset\s+(?P<offset>-?\d+)\s+(?P<servo_state>s\d+)\s+freq\s+(?P<freq_adj>[-+]?\d+)\s+path\s+delay\s+(?P<delay>-?\d+)$",
    )
    .unwrap()
});

// ptp4l[4268779.809]: [ptp4l.0.config] port 1: UNCALIBRATED to SLAVE on MASTER
// ptp4l[4268779.809]: [ptp4l.0.config] port 1: FAULT_DETECTED
static PORT_EVENT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^ptp4l\[(?P<timestamp>\d+\.?\d*)\]:\s*\[(?P<config_name>[^:\]]+)(?::(?P<severity>\d+))?\]\s+port\s+(?P<port_id>\d+):\s+(?P<event>.+)$",
    )
    .unwrap()
});

// ptp4l[1234.567]: [ptp4l.0.config:4] CLOCK_CLASS_CHANGE 248
static CLOCK_CLASS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^ptp4l\[(?P<timestamp>\d+\.?\d*)\]:\s*\[(?P<config_name>[^:\]]+)(?::(?P<severity>\d+))?\]\s+CLOCK_CLASS_CHANGE\s+(?P<clock_class>\S+)$",
    )
    .unwrap()
});

static TRANSITION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<from>\S+)\s+to\s+(?P<to>\S+)\s+on\s+(?P<reason>\S+)(?:\s+.*)?$").unwrap()
});

static EXTRACTORS: [RegexExtractor; 4] = [
    RegexExtractor {
        regex: &SUMMARY_REGEX,
        extract: extract_summary_metric,
    },
    RegexExtractor {
        regex: &REGULAR_REGEX,
        extract: extract_regular_metric,
    },
    RegexExtractor {
        regex: &PORT_EVENT_REGEX,
        extract: extract_port_event,
    },
    RegexExtractor {
        regex: &CLOCK_CLASS_REGEX,
        extract: extract_clock_class_change,
    },
];

pub fn parse_line(line: &str) -> ParseOutcome {
    try_extract(line, &EXTRACTORS)
}

fn extract_summary_metric(caps: &Captures, _line: &str) -> Result<Event> {
    let iface = caps
        .name("interface")
        .map_or(MASTER, |m| m.as_str())
        .to_owned();
    let mut metric = Metric::new(EventSource::Ptp4l, EventSource::Master, iface);
    metric.offset = Some(capture_i64(caps, "offset")?);
    metric.max_offset = Some(capture_i64(caps, "max_offset")?);
    metric.freq_adj = Some(capture_i64(caps, "freq_adj")?);
    metric.delay = Some(capture_i64(caps, "delay")?);
    Ok(Event::Ptp4lMetric(metric))
}

fn extract_regular_metric(caps: &Captures, _line: &str) -> Result<Event> {
    let mut metric = Metric::new(EventSource::Ptp4l, EventSource::Master, &caps["interface"]);
    let offset = capture_i64(caps, "offset")?;
    metric.offset = Some(offset);
    metric.max_offset = Some(offset);
    metric.freq_adj = Some(capture_i64(caps, "freq_adj")?);
    metric.delay = Some(capture_i64(caps, "delay")?);
    metric.clock_state = ClockState::from_servo(&caps["servo_state"]);
    Ok(Event::Ptp4lMetric(metric))
}

fn extract_port_event(caps: &Captures, line: &str) -> Result<Event> {
    let port_id = capture_i64(caps, "port_id")?;
    let port_id = u32::try_from(port_id)
        .map_err(|_| Error::parse(format!("invalid port id: {}", port_id)))?;
    let text = &caps["event"];
    let (role, previous_role, action) = if let Some(tr) = TRANSITION_REGEX.captures(text) {
        let role = PortRole::from_ptp4l(&tr["to"]);
        if role == PortRole::Unknown {
            return Err(Error::parse(format!("unknown port role: {}", &tr["to"])));
        }
        (
            role,
            PortRole::from_ptp4l(&tr["from"]),
            RoleAction::from_ptp4l(&tr["reason"]),
        )
    } else if text.starts_with("FAULT_DETECTED") {
        (PortRole::Faulty, PortRole::Unknown, RoleAction::FaultDetected)
    } else {
        return Err(Error::parse(format!("unrecognized port event: {}", text)));
    };
    Ok(Event::PortRole(PortRoleEvent {
        port_id,
        interface: String::new(),
        role,
        previous_role,
        action,
        raw: line.to_owned(),
    }))
}

fn extract_clock_class_change(caps: &Captures, _line: &str) -> Result<Event> {
    let clock_class: u8 = caps["clock_class"]
        .parse()
        .map_err(|e| Error::parse(format!("invalid clock class: {}", e)))?;
    let severity = match caps.name("severity") {
        Some(m) => Some(
            m.as_str()
                .parse::<u8>()
                .map_err(|e| Error::parse(format!("invalid severity: {}", e)))?,
        ),
        None => None,
    };
    Ok(Event::ClockClassChange(ClockClassChange {
        clock_class,
        severity,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ptp::MASTER;

    fn metric(line: &str) -> Metric {
        match parse_line(line) {
            Some(Ok(Event::Ptp4lMetric(m))) => m,
            other => panic!("expected metric for {:?}, got {:?}", line, other),
        }
    }

    #[test]
    fn summary_metrics_for_master() {
        let m = metric("ptp4l[74737.942]: [ptp4l.0.config] rms 53 max 74 freq -16642 +/- 40 delay 1089 +/- 20");
        assert_eq!(m.iface, MASTER);
        assert_eq!(m.offset, Some(53));
        assert_eq!(m.max_offset, Some(74));
        assert_eq!(m.freq_adj, Some(-16642));
        assert_eq!(m.delay, Some(1089));
        assert_eq!(m.clock_state, ClockState::Unknown);
        assert_eq!(m.source, EventSource::Master);
    }

    #[test]
    fn summary_metrics_for_interface() {
        let m = metric("ptp4l[5196755.139]: [ptp4l.0.config] ens5f0 rms 3152778 max 3152778 freq -6083928 +/- 0 delay 2791 +/- 0");
        assert_eq!(m.iface, "ens5f0");
        assert_eq!(m.offset, Some(3152778));
        assert_eq!(m.max_offset, Some(3152778));
        assert_eq!(m.freq_adj, Some(-6083928));
        assert_eq!(m.delay, Some(2791));
    }

    #[test]
    fn regular_metrics_with_master_offset() {
        let m = metric("ptp4l[365195.391]: [ptp4l.0.config] master offset -1 s2 freq -3972 path delay 89");
        assert_eq!(m.iface, MASTER);
        assert_eq!(m.offset, Some(-1));
        assert_eq!(m.max_offset, Some(-1));
        assert_eq!(m.freq_adj, Some(-3972));
        assert_eq!(m.delay, Some(89));
        assert_eq!(m.clock_state, ClockState::Locked);
    }

    #[test]
    fn positive_freq_with_sign() {
        let m = metric("ptp4l[5196819.100]: [ptp4l.0.config] master offset -2162130 s2 freq +22451884 path delay 374976");
        assert_eq!(m.freq_adj, Some(22451884));
    }

    #[test]
    fn port_state_changes() {
        for (line, role, previous, action) in [
            (
                "ptp4l[4268779.809]: [ptp4l.0.config] port 1: UNCALIBRATED to SLAVE on MASTER",
                PortRole::Slave,
                PortRole::Unknown,
                RoleAction::Other,
            ),
            (
                "ptp4l[4268779.809]: [ptp4l.0.config] port 1: UNCALIBRATED to PASSIVE on RS_PASSIVE",
                PortRole::Passive,
                PortRole::Unknown,
                RoleAction::Other,
            ),
            (
                "ptp4l[4268779.809]: [ptp4l.0.config] port 1: LISTENING to MASTER on ANNOUNCE_RECEIPT_TIMEOUT_EXPIRES",
                PortRole::Master,
                PortRole::Listening,
                RoleAction::AnnounceReceiptTimeoutExpires,
            ),
            (
                "ptp4l[4268779.809]: [ptp4l.0.config] port 1: FAULT_DETECTED",
                PortRole::Faulty,
                PortRole::Unknown,
                RoleAction::FaultDetected,
            ),
            (
                "ptp4l[4268779.809]: [ptp4l.0.config] port 1: UNCALIBRATED to LISTENING on RS_LISTENING",
                PortRole::Listening,
                PortRole::Unknown,
                RoleAction::Other,
            ),
        ] {
            match parse_line(line) {
                Some(Ok(Event::PortRole(e))) => {
                    assert_eq!(e.port_id, 1, "{}", line);
                    assert_eq!(e.role, role, "{}", line);
                    assert_eq!(e.previous_role, previous, "{}", line);
                    assert_eq!(e.action, action, "{}", line);
                    assert_eq!(e.raw, line);
                }
                other => panic!("expected port event for {:?}, got {:?}", line, other),
            }
        }
    }

    #[test]
    fn invalid_port_state_is_an_error() {
        let line = "ptp4l[4268779.809]: [ptp4l.0.config] port 1: INVALID_STATE";
        assert!(matches!(parse_line(line), Some(Err(_))));
        let line = "ptp4l[4268779.809]: [ptp4l.0.config] port 1: MASTER to GRANDMASTER on RS_GRAND_MASTER";
        assert!(matches!(parse_line(line), Some(Err(_))));
    }

    #[test]
    fn clock_class_changes() {
        for (line, clock_class, severity) in [
            ("ptp4l[1234.567]: [ptp4l.0.config] CLOCK_CLASS_CHANGE 248", 248u8, None),
            ("ptp4l[9876.543]: [ptp4l.1.config:4] CLOCK_CLASS_CHANGE 6", 6, Some(4u8)),
            ("ptp4l[9999.123]: [ptp4l.1.config:6] CLOCK_CLASS_CHANGE 255", 255, Some(6)),
            ("ptp4l[7777.999]: [ptp4l.2.config] CLOCK_CLASS_CHANGE 135", 135, None),
        ] {
            match parse_line(line) {
                Some(Ok(Event::ClockClassChange(e))) => {
                    assert_eq!(e.clock_class, clock_class, "{}", line);
                    assert_eq!(e.severity, severity, "{}", line);
                }
                other => panic!("expected clock class change for {:?}, got {:?}", line, other),
            }
        }
    }

    #[test]
    fn clock_class_change_non_numeric_is_an_error() {
        let line = "ptp4l[1234.567]: [ptp4l.0.config] CLOCK_CLASS_CHANGE abc";
        assert!(matches!(parse_line(line), Some(Err(_))));
    }

    #[test]
    fn unrelated_lines_are_not_attempted() {
        for line in [
            "invalid log line",
            "",
            "ptp4l[1234.567]: [ptp4l.0.config] CLOCK_CLASS_CHANGE",
            "ptp4l[365195.391]: [ptp4l.0.config] selected /dev/ptp4 as PTP clock",
        ] {
            assert!(parse_line(line).is_none(), "{:?}", line);
        }
    }
}
