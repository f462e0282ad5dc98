use crate::error::{Error, Result};
use crate::event::{Event, Metric, StatusMetric};
use crate::parser::{capture_f64, capture_i64, try_extract, ParseOutcome, RegexExtractor};
use crate::ptp::{ClockState, EventSource};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

pub const PROCESS_NAME: &str = "gnss";

// gnss[1234.32]:[ts2phc.0.config] ens1f0 gnss_status 3 offset 0 s2
static GNSS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^gnss\[(?P<timestamp>\d+\.?\d*)\]:\s*\[(?P<config_name>.*\.\d+\.c.*g)\]\s+(?P<interface>\w+)\s+gnss_status\s+(?P<gnss_status>[0-9]+)\s+offset\s+(?P<offset>-?\d+)\s+(?P<servo_state>s\d+)$",
    )
    .unwrap()
});

static EXTRACTORS: [RegexExtractor; 1] = [RegexExtractor {
    regex: &GNSS_REGEX,
    extract: extract_metric,
}];

pub fn parse_line(line: &str) -> ParseOutcome {
    try_extract(line, &EXTRACTORS)
}

fn extract_metric(caps: &Captures, _line: &str) -> Result<Event> {
    let iface = caps
        .name("interface")
        .ok_or_else(|| Error::parse("gnss interface is empty"))?
        .as_str();
    let offset = capture_i64(caps, "offset")
        .map_err(|_| Error::parse("gnss offset is empty"))?;
    let mut metric = Metric::new(EventSource::Gnss, EventSource::Gnss, iface);
    metric.offset = Some(offset);
    metric.max_offset = Some(offset);
    metric.clock_state = ClockState::from_servo(&caps["servo_state"]);
    if let Some(status) = capture_f64(caps, "gnss_status").transpose()? {
        metric.status.push(StatusMetric {
            subtype: "gnss_status",
            status,
        });
    }
    Ok(Event::Ts2PhcMetric(metric))
}
