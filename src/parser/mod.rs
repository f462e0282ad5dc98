use crate::error::Result;
use crate::event::Event;
use crate::process::Process;
use crate::tasks;
use log::{debug, error};
use parking_lot::Mutex;
use regex::{Captures, Regex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub mod dpll;
pub mod gm;
pub mod gnss;
pub mod phc2sys;
pub mod ptp4l;
pub mod ts2phc;
pub mod ublox;

/// Bounded capacity of the shared event channel.
pub const EVENT_CHANNEL_SIZE: usize = 1000;

const RECV_STEP: Duration = Duration::from_millis(50);
const SEND_RETRY_STEP: Duration = Duration::from_millis(1);

/// Outcome of feeding one line to a parse function. `None` means the line is
/// not one the parser recognizes and is dropped silently; `Some(Err(_))`
/// means the shape was recognized but decoding failed.
pub type ParseOutcome = Option<Result<Event>>;

pub type ParseLineFn = fn(&str) -> ParseOutcome;

/// Creates the bounded event channel shared by all parsers and the consumer.
pub fn event_channel() -> (SyncSender<Event>, Receiver<Event>) {
    mpsc::sync_channel(EVENT_CHANNEL_SIZE)
}

/// One entry of a per-daemon dispatch table: the first regex to match wins
/// and its extractor decides the event.
pub(crate) struct RegexExtractor {
    pub regex: &'static once_cell::sync::Lazy<Regex>,
    pub extract: fn(&Captures, &str) -> Result<Event>,
}

pub(crate) fn try_extract(line: &str, table: &[RegexExtractor]) -> ParseOutcome {
    for entry in table {
        if let Some(caps) = entry.regex.captures(line) {
            return Some((entry.extract)(&caps, line));
        }
    }
    None
}

/// Reads lines from a supervised process's channel, decodes them with a
/// per-daemon parse function and forwards events in line order.
pub struct BaseParser {
    name: String,
    process: Arc<dyn Process>,
    lines: Mutex<Option<Receiver<String>>>,
    events: SyncSender<Event>,
    parse_line: ParseLineFn,
    quit: Arc<AtomicBool>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl BaseParser {
    pub fn new(
        name: impl Into<String>,
        lines: Receiver<String>,
        events: SyncSender<Event>,
        process: Arc<dyn Process>,
        parse_line: ParseLineFn,
    ) -> Self {
        Self {
            name: name.into(),
            process,
            lines: Mutex::new(Some(lines)),
            events,
            parse_line,
            quit: Arc::new(AtomicBool::new(false)),
            handle: <_>::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn process(&self) -> &Arc<dyn Process> {
        &self.process
    }

    /// # Panics
    ///
    /// Will panic if called twice
    pub fn start(&self) {
        let lines = self
            .lines
            .lock()
            .take()
            .expect("parser has already been started");
        let events = self.events.clone();
        let quit = Arc::clone(&self.quit);
        let parse_line = self.parse_line;
        let name = self.name.clone();
        let handle = tasks::spawn_service(&self.name, move || {
            parse_loop(&name, &lines, &events, parse_line, &quit);
        });
        self.handle.lock().replace(handle);
    }

    pub fn stop(&self, wait: bool) -> Result<()> {
        self.quit.store(true, Ordering::SeqCst);
        self.process.stop()?;
        if wait {
            if let Some(handle) = self.handle.lock().take() {
                let _ = handle.join();
            }
        }
        Ok(())
    }
}

fn parse_loop(
    name: &str,
    lines: &Receiver<String>,
    events: &SyncSender<Event>,
    parse_line: ParseLineFn,
    quit: &AtomicBool,
) {
    loop {
        if quit.load(Ordering::SeqCst) {
            break;
        }
        match lines.recv_timeout(RECV_STEP) {
            Ok(line) => match parse_line(&line) {
                None => {}
                Some(Err(e)) => error!("failed to parse {} line: {}", name, e),
                Some(Ok(event)) => {
                    if !send_event(events, event, quit) {
                        break;
                    }
                }
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("{} parser finished", name);
}

pub(crate) fn send_event(events: &SyncSender<Event>, event: Event, quit: &AtomicBool) -> bool {
    let mut event = event;
    loop {
        match events.try_send(event) {
            Ok(()) => return true,
            Err(TrySendError::Full(e)) => {
                if quit.load(Ordering::SeqCst) {
                    return false;
                }
                event = e;
                thread::sleep(SEND_RETRY_STEP);
            }
            Err(TrySendError::Disconnected(_)) => return false,
        }
    }
}

/// Parse function for the ts2phc stream: dpll, gnss and GM status lines ride
/// the same stdout as the ts2phc metrics.
pub fn parse_ts2phc_stream(line: &str) -> ParseOutcome {
    ts2phc::parse_line(line)
        .or_else(|| dpll::parse_line(line))
        .or_else(|| gnss::parse_line(line))
        .or_else(|| gm::parse_line(line))
}

pub(crate) fn capture_i64(caps: &Captures, name: &str) -> Result<i64> {
    let field = caps
        .name(name)
        .ok_or_else(|| crate::error::Error::parse(format!("{} is empty", name)))?;
    field
        .as_str()
        .parse()
        .map_err(|e| crate::error::Error::parse(format!("invalid {}: {}", name, e)))
}

pub(crate) fn capture_f64(caps: &Captures, name: &str) -> Option<Result<f64>> {
    let field = caps.name(name)?;
    Some(
        field
            .as_str()
            .parse()
            .map_err(|e| crate::error::Error::parse(format!("invalid {}: {}", name, e))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, Metric};
    use crate::process::testing::MockProcess;
    use crate::process::{line_channel, Status};
    use crate::ptp::EventSource;

    fn fake_parse(line: &str) -> ParseOutcome {
        if line.starts_with("skip") {
            return None;
        }
        if line.starts_with("bad") {
            return Some(Err(crate::error::Error::parse("bad line")));
        }
        let mut metric = Metric::new(EventSource::Ptp4l, EventSource::Master, line.to_owned());
        metric.offset = Some(0);
        Some(Ok(Event::Ptp4lMetric(metric)))
    }

    #[test]
    fn events_follow_line_order_with_drops() {
        let (lines_tx, lines_rx) = line_channel();
        let (events_tx, events_rx) = event_channel();
        let process = Arc::new(MockProcess::new("fake"));
        let parser = BaseParser::new(
            "fake",
            lines_rx,
            events_tx,
            Arc::clone(&process) as Arc<dyn Process>,
            fake_parse,
        );
        process.start().unwrap();
        parser.start();
        for line in ["a", "skip me", "bad int", "b", "c"] {
            lines_tx.send(line.to_owned()).unwrap();
        }
        let mut seen = Vec::new();
        for _ in 0..3 {
            let event = events_rx.recv_timeout(Duration::from_secs(5)).unwrap();
            if let Event::Ptp4lMetric(m) = event {
                seen.push(m.iface);
            }
        }
        assert_eq!(seen, ["a", "b", "c"]);
        parser.stop(true).unwrap();
        assert_eq!(process.status(), Status::Stopped);
    }
}
