use crate::error::{Error, Result};
use crate::event::{Event, Metric};
use crate::parser::ParseOutcome;
use crate::ptp::{ClockState, EventSource};

pub const PROCESS_NAME: &str = "ts2phc";
pub const PROCESS_PATH: &str = "/usr/sbin/ts2phc";

// Two shapes share one extractor; erasing the literal "master" unifies them:
// 0                   1                    2         3      4 5  6    7
// ts2phc[82674.465]:  [ts2phc.0.config]   ens2f1    offset 0 s2 freq -0
// ts2phc[521734.693]: [ts2phc.0.config:6] /dev/ptp6 offset 0 s2 freq -0
const IFACE_FIELD: usize = 2;
const OFFSET_FIELD: usize = 4;
const STATE_FIELD: usize = 5;
const FREQ_FIELD: usize = 7;

// Ignored lines (no "offset"):
// ts2phc[82674.465]: [ts2phc.0.config] nmea delay: 88403525 ns
// ts2phc[82674.465]: [ts2phc.0.config] ens2f1 extts index 0 at 1673031129.000000000 corr 0 src 1673031129.911642976 diff 0
pub fn parse_line(line: &str) -> ParseOutcome {
    if !line.starts_with(PROCESS_NAME) || !line.contains("offset") {
        return None;
    }
    Some(extract_metric(line))
}

fn extract_metric(line: &str) -> Result<Event> {
    let cleaned = line.replace("master", " ");
    let fields: Vec<&str> = cleaned.split_whitespace().collect();
    if fields.len() <= FREQ_FIELD {
        return Err(Error::parse(format!("ts2phc line too short: {}", line)));
    }
    let offset: i64 = fields[OFFSET_FIELD]
        .parse()
        .map_err(|e| Error::parse(format!("invalid offset: {}", e)))?;
    let freq: i64 = fields[FREQ_FIELD]
        .parse()
        .map_err(|e| Error::parse(format!("invalid freq: {}", e)))?;
    let mut metric = Metric::new(EventSource::Ts2Phc, EventSource::Ts2Phc, fields[IFACE_FIELD]);
    metric.offset = Some(offset);
    metric.freq_adj = Some(freq);
    metric.clock_state = ClockState::from_servo(fields[STATE_FIELD]);
    Ok(Event::Ts2PhcMetric(metric))
}
