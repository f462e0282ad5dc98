use crate::error::{Error, Result};
use crate::event::{Event, Metric};
use crate::parser::ParseOutcome;
use crate::ptp::{ClockState, EventSource};

pub const PROCESS_NAME: &str = "phc2sys";
pub const PROCESS_PATH: &str = "/usr/sbin/phc2sys";

// Field positions after replacing "[]()" with spaces:
// 0       1           2 3                4              5   6      7        8  9    10      11    12
// phc2sys 1361551.425 : ptp4l.0.config:6 CLOCK_REALTIME phc offset -1104133 s2 freq +287746 delay 496
const SUBJECT_FIELD: usize = 4;
const OFFSET_FIELD: usize = 7;
const STATE_FIELD: usize = 8;
const FREQ_FIELD: usize = 10;
const DELAY_FIELD: usize = 12;

pub fn parse_line(line: &str) -> ParseOutcome {
    if !line.starts_with(PROCESS_NAME) || !line.contains("offset") {
        return None;
    }
    Some(extract_metric(line))
}

fn extract_metric(line: &str) -> Result<Event> {
    let cleaned = line.replace(&['[', ']', '(', ')'][..], " ");
    let fields: Vec<&str> = cleaned.split_whitespace().collect();
    if fields.len() <= DELAY_FIELD {
        return Err(Error::parse(format!("phc2sys line too short: {}", line)));
    }
    let mut metric = Metric::new(
        EventSource::Phc2Sys,
        EventSource::Phc2Sys,
        fields[SUBJECT_FIELD],
    );
    metric.offset = Some(parse_field(fields[OFFSET_FIELD], "offset")?);
    metric.freq_adj = Some(parse_field(fields[FREQ_FIELD], "freq")?);
    metric.delay = Some(parse_field(fields[DELAY_FIELD], "delay")?);
    metric.clock_state = ClockState::from_servo(fields[STATE_FIELD]);
    Ok(Event::Phc2SysMetric(metric))
}

fn parse_field(value: &str, what: &str) -> Result<i64> {
    value
        .parse()
        .map_err(|e| Error::parse(format!("invalid {}: {}", what, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_metric() {
        let line =
            "phc2sys[1361551.425]: [ptp4l.0.config:6] CLOCK_REALTIME phc offset -1104133 s2 freq +287746 delay 496";
        match parse_line(line) {
            Some(Ok(Event::Phc2SysMetric(m))) => {
                assert_eq!(m.iface, "CLOCK_REALTIME");
                assert_eq!(m.offset, Some(-1104133));
                assert_eq!(m.freq_adj, Some(287746));
                assert_eq!(m.delay, Some(496));
                assert_eq!(m.clock_state, ClockState::Locked);
                assert_eq!(m.source, EventSource::Phc2Sys);
            }
            other => panic!("expected metric, got {:?}", other),
        }
    }

    #[test]
    fn free_running_servo_state() {
        let line =
            "phc2sys[1361551.425]: [ptp4l.0.config] CLOCK_REALTIME phc offset -1104133 s0 freq +287746 delay 496";
        match parse_line(line) {
            Some(Ok(Event::Phc2SysMetric(m))) => {
                assert_eq!(m.clock_state, ClockState::FreeRun);
            }
            other => panic!("expected metric, got {:?}", other),
        }
    }

    #[test]
    fn non_integer_fields_are_errors() {
        let line =
            "phc2sys[1361551.425]: [ptp4l.0.config] CLOCK_REALTIME phc offset oops s2 freq +287746 delay 496";
        assert!(matches!(parse_line(line), Some(Err(_))));
        let line = "phc2sys[1361551.425]: [ptp4l.0.config] CLOCK_REALTIME phc offset -1104133 s2";
        assert!(matches!(parse_line(line), Some(Err(_))));
    }

    #[test]
    fn summary_lines_are_not_attempted() {
        let line =
            "phc2sys[1361599.314]: [ptp4l.0.config] CLOCK_REALTIME rms 10 max 29 freq -2346 +/- 12 delay 500 +/- 2";
        assert!(parse_line(line).is_none());
        assert!(parse_line("unrelated").is_none());
    }
}
