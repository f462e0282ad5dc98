use crate::error::{Error, Result};
use crate::event::{Event, Metric};
use crate::parser::{try_extract, ParseOutcome, RegexExtractor};
use crate::ptp::{ClockState, EventSource};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

pub const PROCESS_NAME: &str = "GM";

// GM[0]:[ts2phc.0.config] ens1f0 T-GM-STATUS s0
static GM_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^GM\[(?P<timestamp>\d+\.?\d*)\]:\s*\[(?P<config_name>.*\.\d+\.c.*g)\]\s+(?P<interface>\w+)\s+T-GM-STATUS\s+(?P<gm_status>s\d+)$",
    )
    .unwrap()
});

static EXTRACTORS: [RegexExtractor; 1] = [RegexExtractor {
    regex: &GM_REGEX,
    extract: extract_metric,
}];

pub fn parse_line(line: &str) -> ParseOutcome {
    try_extract(line, &EXTRACTORS)
}

// The grandmaster status line carries no offset, only a clock state.
fn extract_metric(caps: &Captures, _line: &str) -> Result<Event> {
    let iface = caps
        .name("interface")
        .ok_or_else(|| Error::parse("gm interface is empty"))?
        .as_str();
    let mut metric = Metric::new(EventSource::Gm, EventSource::Gm, iface);
    metric.clock_state = ClockState::from_servo(&caps["gm_status"]);
    Ok(Event::Ts2PhcMetric(metric))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_metric() {
        let line = "GM[0]:[ts2phc.0.config] ens1f0 T-GM-STATUS s0";
        match parse_line(line) {
            Some(Ok(Event::Ts2PhcMetric(m))) => {
                assert_eq!(m.iface, "ens1f0");
                assert_eq!(m.offset, None);
                assert_eq!(m.clock_state, ClockState::FreeRun);
                assert_eq!(m.from, EventSource::Gm);
                assert_eq!(m.source, EventSource::Gm);
            }
            other => panic!("expected metric, got {:?}", other),
        }
    }

    #[test]
    fn locked_status() {
        let line = "GM[1689960762]:[ts2phc.0.config] ens2f1 T-GM-STATUS s2";
        match parse_line(line) {
            Some(Ok(Event::Ts2PhcMetric(m))) => {
                assert_eq!(m.clock_state, ClockState::Locked);
            }
            other => panic!("expected metric, got {:?}", other),
        }
    }

    #[test]
    fn unrelated_lines_are_not_attempted() {
        assert!(parse_line("GM[0]:[ts2phc.0.config] ens1f0 T-BC-STATUS s0").is_none());
        assert!(parse_line("").is_none());
    }
}
