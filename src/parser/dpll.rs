use crate::error::{Error, Result};
use crate::event::{Event, Metric, StatusMetric};
use crate::parser::{capture_f64, capture_i64, try_extract, ParseOutcome, RegexExtractor};
use crate::ptp::{ClockState, EventSource};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

pub const PROCESS_NAME: &str = "dpll";

// dpll[1700598434]:[ts2phc.0.config] ens2f0 frequency_status 3 offset 0 phase_status 3 pps_status 1 s2
static DPLL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^dpll\[(?P<timestamp>\d+\.?\d*)\]:\s*\[(?P<config_name>.*\.\d+\.c.*g)\]\s+(?P<interface>\w+)\s+frequency_status\s+(?P<frequency_status>[0-9]+)\s+offset\s+(?P<offset>-?\d+)\s+phase_status\s+(?P<phase_status>[0-9]+)\s+pps_status\s+(?P<pps_status>[0-9]+)\s+(?P<servo_state>s\d+)$",
    )
    .unwrap()
});

static EXTRACTORS: [RegexExtractor; 1] = [RegexExtractor {
    regex: &DPLL_REGEX,
    extract: extract_metric,
}];

pub fn parse_line(line: &str) -> ParseOutcome {
    try_extract(line, &EXTRACTORS)
}

fn extract_metric(caps: &Captures, _line: &str) -> Result<Event> {
    let iface = caps
        .name("interface")
        .ok_or_else(|| Error::parse("dpll interface is empty"))?
        .as_str();
    let offset = capture_i64(caps, "offset")
        .map_err(|_| Error::parse("dpll offset is empty"))?;
    let mut metric = Metric::new(EventSource::Dpll, EventSource::Dpll, iface);
    metric.offset = Some(offset);
    metric.max_offset = Some(offset);
    metric.clock_state = ClockState::from_servo(&caps["servo_state"]);
    for subtype in ["frequency_status", "phase_status", "pps_status"] {
        if let Some(status) = capture_f64(caps, subtype).transpose()? {
            metric.status.push(StatusMetric { subtype, status });
        }
    }
    Ok(Event::Ts2PhcMetric(metric))
}
