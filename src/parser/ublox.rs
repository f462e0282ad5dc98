use crate::error::Result;
use crate::event::{Event, TimeLs, UBloxEvent};
use crate::interval::Loop;
use crate::parser::send_event;
use crate::process::Process;
use crate::tasks;
use log::{error, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const PROCESS_NAME: &str = "ubxtool";
pub const UBXTOOL_PATH: &str = "/usr/local/bin/ubxtool";

/// Poll wait passed to ubxtool, in nanoseconds (1 s cadence).
pub const POLL_WAIT: u64 = 1_000_000_000;
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Stale ticks tolerated before the child is considered unresponsive.
pub const ALLOWED_MISSED: u32 = 3;

const TIME_LS_RESULT_LINES: usize = 4;
const RECV_STEP: Duration = Duration::from_millis(50);

/// Spawn command for the poller: `(path, args)`, ready for `BaseProcess`.
pub fn command() -> (String, Vec<String>) {
    (
        "python3".to_owned(),
        vec![
            "-u".to_owned(),
            UBXTOOL_PATH.to_owned(),
            "-t".to_owned(),
            "-P".to_owned(),
            "29.20".to_owned(),
            "-w".to_owned(),
            POLL_WAIT.to_string(),
        ],
    )
}

#[derive(Debug)]
struct Inner {
    offset: i64,
    gps_fix: i8,
    time_ls: Option<TimeLs>,
    stale: bool,
}

/// Latest values sampled from the ubxtool output. `stale` is set by `reset`
/// and cleared by any setter; the emitter uses it to detect a silent child.
#[derive(Debug)]
pub struct InstantValues {
    inner: Mutex<Inner>,
}

impl Default for InstantValues {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                offset: 0,
                gps_fix: 0,
                time_ls: None,
                stale: true,
            }),
        }
    }
}

impl InstantValues {
    pub fn is_stale(&self) -> bool {
        self.inner.lock().stale
    }
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.stale = true;
        inner.offset = 0;
        inner.gps_fix = 0;
        inner.time_ls = None;
    }
    pub fn set_offset(&self, offset: i64) {
        let mut inner = self.inner.lock();
        inner.offset = offset;
        inner.stale = false;
    }
    pub fn set_gps_fix(&self, fix: i8) {
        let mut inner = self.inner.lock();
        inner.gps_fix = fix;
        inner.stale = false;
    }
    pub fn set_time_ls(&self, time_ls: TimeLs) {
        let mut inner = self.inner.lock();
        inner.time_ls = Some(time_ls);
        inner.stale = false;
    }
    fn snapshot(&self) -> (i8, i64, Option<TimeLs>) {
        let inner = self.inner.lock();
        (inner.gps_fix, inner.offset, inner.time_ls)
    }
}

/// Aggregates the multi-line ubxtool polling output into one event per tick
/// and restarts the child when it stops emitting.
pub struct UbxParser {
    process: Arc<dyn Process>,
    values: Arc<InstantValues>,
    lines: Mutex<Option<Receiver<String>>>,
    events: SyncSender<Event>,
    quit: Arc<AtomicBool>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl UbxParser {
    pub fn new(
        lines: Receiver<String>,
        events: SyncSender<Event>,
        process: Arc<dyn Process>,
    ) -> Self {
        Self {
            process,
            values: Arc::new(InstantValues::default()),
            lines: Mutex::new(Some(lines)),
            events,
            quit: Arc::new(AtomicBool::new(false)),
            handles: <_>::default(),
        }
    }

    pub fn process(&self) -> &Arc<dyn Process> {
        &self.process
    }

    /// # Panics
    ///
    /// Will panic if called twice
    pub fn start(&self) -> Result<()> {
        self.values.reset();
        self.process.start()?;
        let lines = self
            .lines
            .lock()
            .take()
            .expect("ublox parser has already been started");
        let mut handles = self.handles.lock();
        {
            let values = Arc::clone(&self.values);
            let quit = Arc::clone(&self.quit);
            handles.push(tasks::spawn_service("ublox", move || {
                parse_loop(&lines, &values, &quit);
            }));
        }
        {
            let values = Arc::clone(&self.values);
            let quit = Arc::clone(&self.quit);
            let events = self.events.clone();
            let process = Arc::clone(&self.process);
            handles.push(tasks::spawn_service("ubloxtick", move || {
                emit_loop(&values, &events, process.as_ref(), &quit);
            }));
        }
        Ok(())
    }

    pub fn stop(&self, wait: bool) -> Result<()> {
        self.quit.store(true, Ordering::SeqCst);
        self.process.stop()?;
        if wait {
            for handle in self.handles.lock().drain(..) {
                let _ = handle.join();
            }
        }
        Ok(())
    }
}

fn parse_loop(lines: &Receiver<String>, values: &InstantValues, quit: &AtomicBool) {
    loop {
        if quit.load(Ordering::SeqCst) {
            return;
        }
        match lines.recv_timeout(RECV_STEP) {
            Ok(line) => {
                if line.contains("UBX-NAV-CLOCK") {
                    if let Some(next) = next_line(lines, quit) {
                        values.set_offset(extract_offset(&next));
                    }
                } else if line.contains("UBX-NAV-STATUS") {
                    if let Some(next) = next_line(lines, quit) {
                        values.set_gps_fix(extract_nav_status(&next));
                    }
                } else if line.contains("UBX-NAV-TIMELS") {
                    let mut payload = Vec::with_capacity(TIME_LS_RESULT_LINES);
                    for _ in 0..TIME_LS_RESULT_LINES {
                        match next_line(lines, quit) {
                            Some(next) => payload.push(next),
                            None => return,
                        }
                    }
                    values.set_time_ls(extract_leap_sec(&payload));
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Blocks for the payload line following a marker, still honoring quit.
fn next_line(lines: &Receiver<String>, quit: &AtomicBool) -> Option<String> {
    loop {
        if quit.load(Ordering::SeqCst) {
            return None;
        }
        match lines.recv_timeout(RECV_STEP) {
            Ok(line) => return Some(line),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return None,
        }
    }
}

fn emit_loop(
    values: &InstantValues,
    events: &SyncSender<Event>,
    process: &dyn Process,
    quit: &AtomicBool,
) {
    let mut tick = Loop::prepare_reported(POLL_INTERVAL);
    let mut missed_ticks = 0;
    loop {
        tick.tick();
        if quit.load(Ordering::SeqCst) {
            return;
        }
        if !emit_step(values, events, process, &mut missed_ticks, quit) {
            return;
        }
    }
}

/// One emitter tick: publish a snapshot, or count a missed tick and reset the
/// child once more than `ALLOWED_MISSED` in a row went by.
fn emit_step(
    values: &InstantValues,
    events: &SyncSender<Event>,
    process: &dyn Process,
    missed_ticks: &mut u32,
    quit: &AtomicBool,
) -> bool {
    if values.is_stale() {
        *missed_ticks += 1;
        if *missed_ticks > ALLOWED_MISSED {
            warn!("no fresh values from {}, resetting it", process.name());
            if let Err(e) = process.reset() {
                error!("failed to reset {}: {}", process.name(), e);
            }
            *missed_ticks = 0;
        }
        return true;
    }
    *missed_ticks = 0;
    let (gps_fix, offset, time_ls) = values.snapshot();
    values.reset();
    send_event(
        events,
        Event::Gnss(UBloxEvent {
            gps_fix,
            offset,
            time_ls,
        }),
        quit,
    )
}

fn extract_offset(output: &str) -> i64 {
    let fields: Vec<&str> = output.split_whitespace().collect();
    for (i, field) in fields.iter().enumerate() {
        if *field == "tAcc" {
            return fields
                .get(i + 1)
                .and_then(|v| v.parse().ok())
                .unwrap_or_default();
        }
    }
    -1
}

fn extract_nav_status(output: &str) -> i8 {
    let fields: Vec<&str> = output.split_whitespace().collect();
    for (i, field) in fields.iter().enumerate() {
        if *field == "gpsFix" {
            return fields
                .get(i + 1)
                .and_then(|v| v.parse().ok())
                .unwrap_or_default();
        }
    }
    -1
}

fn extract_leap_sec(output: &[String]) -> TimeLs {
    let mut data = TimeLs::default();
    for line in output {
        let fields: Vec<&str> = line.split_whitespace().collect();
        for (i, field) in fields.iter().enumerate() {
            let Some(value) = fields.get(i + 1) else {
                continue;
            };
            match *field {
                "srcOfCurrLs" => data.src_of_curr_ls = value.parse().unwrap_or_default(),
                "currLs" => data.curr_ls = value.parse().unwrap_or_default(),
                "srcOfLsChange" => data.src_of_ls_change = value.parse().unwrap_or_default(),
                "lsChange" => data.ls_change = value.parse().unwrap_or_default(),
                "timeToLsEvent" => data.time_to_ls_event = value.parse().unwrap_or_default(),
                "dateOfLsGpsWn" => data.date_of_ls_gps_wn = value.parse().unwrap_or_default(),
                "dateOfLsGpsDn" => data.date_of_ls_gps_dn = value.parse().unwrap_or_default(),
                "valid" => data.valid = parse_valid_flags(value),
                _ => {}
            }
        }
    }
    data
}

// ubxtool prints the validity flags as a bare hex tail, e.g. "x3".
fn parse_valid_flags(value: &str) -> u8 {
    let padded = format!("0{}", value);
    if let Some(hex) = padded
        .strip_prefix("0x")
        .or_else(|| padded.strip_prefix("0X"))
    {
        u8::from_str_radix(hex, 16).unwrap_or_default()
    } else {
        padded.parse().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::event_channel;
    use crate::process::testing::MockProcess;
    use crate::process::{line_channel, Status};

    #[test]
    fn instant_values_stale_transitions() {
        let values = InstantValues::default();
        assert!(values.is_stale());
        values.set_offset(42);
        assert!(!values.is_stale());
        values.reset();
        assert!(values.is_stale());
        let (gps_fix, offset, time_ls) = values.snapshot();
        assert_eq!(gps_fix, 0);
        assert_eq!(offset, 0);
        assert_eq!(time_ls, None);
        values.set_gps_fix(3);
        assert!(!values.is_stale());
        values.reset();
        values.set_time_ls(TimeLs::default());
        assert!(!values.is_stale());
    }

    #[test]
    fn offset_extraction() {
        assert_eq!(extract_offset("iTOW 500592000 clkB 85923 clkD -249 tAcc 42 fAcc 81"), 42);
        assert_eq!(extract_offset("no accuracy here"), -1);
        assert_eq!(extract_offset("tAcc oops"), 0);
    }

    #[test]
    fn nav_status_extraction() {
        assert_eq!(extract_nav_status("iTOW 500592000 gpsFix 3 flags 0xdd fixStat 0x0"), 3);
        assert_eq!(extract_nav_status("iTOW 500592000"), -1);
    }

    #[test]
    fn leap_sec_extraction() {
        let payload = vec![
            "srcOfCurrLs 2 currLs 18".to_owned(),
            "srcOfLsChange 2 lsChange 0".to_owned(),
            "timeToLsEvent -218087 dateOfLsGpsWn 2185 dateOfLsGpsDn 7".to_owned(),
            "valid x3".to_owned(),
        ];
        let data = extract_leap_sec(&payload);
        assert_eq!(data.src_of_curr_ls, 2);
        assert_eq!(data.curr_ls, 18);
        assert_eq!(data.src_of_ls_change, 2);
        assert_eq!(data.ls_change, 0);
        assert_eq!(data.time_to_ls_event, -218087);
        assert_eq!(data.date_of_ls_gps_wn, 2185);
        assert_eq!(data.date_of_ls_gps_dn, 7);
        assert_eq!(data.valid, 3);
        assert!(data.valid_curr_ls());
        assert!(data.valid_time_to_ls_event());
    }

    #[test]
    fn emit_publishes_snapshot_and_goes_stale() {
        let values = InstantValues::default();
        let (events_tx, events_rx) = event_channel();
        let process = MockProcess::new(PROCESS_NAME);
        let quit = AtomicBool::new(false);
        let mut missed = 0;
        values.set_offset(42);
        assert!(emit_step(&values, &events_tx, &process, &mut missed, &quit));
        match events_rx.try_recv().unwrap() {
            Event::Gnss(e) => {
                assert_eq!(e.offset, 42);
                assert_eq!(e.gps_fix, 0);
                assert_eq!(e.time_ls, None);
            }
            other => panic!("expected gnss event, got {:?}", other),
        }
        assert!(values.is_stale());
        assert_eq!(process.resets(), 0);
    }

    #[test]
    fn watchdog_resets_after_missed_ticks() {
        let values = InstantValues::default();
        let (events_tx, events_rx) = event_channel();
        let process = MockProcess::new(PROCESS_NAME);
        let quit = AtomicBool::new(false);
        let mut missed = 0;
        for _ in 0..ALLOWED_MISSED + 1 {
            assert!(emit_step(&values, &events_tx, &process, &mut missed, &quit));
        }
        assert_eq!(process.resets(), 1);
        assert_eq!(missed, 0);
        assert!(events_rx.try_recv().is_err());
    }

    #[test]
    fn marker_lines_drive_the_shared_values() {
        let (lines_tx, lines_rx) = line_channel();
        let (events_tx, events_rx) = event_channel();
        let process: Arc<MockProcess> = Arc::new(MockProcess::new(PROCESS_NAME));
        let parser = UbxParser::new(lines_rx, events_tx, Arc::clone(&process) as Arc<dyn Process>);
        parser.start().unwrap();
        assert_eq!(process.status(), Status::Running);
        lines_tx.send("UBX-NAV-CLOCK:".to_owned()).unwrap();
        lines_tx
            .send("iTOW 500592000 clkB 85923 clkD -249 tAcc 42 fAcc 81".to_owned())
            .unwrap();
        match events_rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            Event::Gnss(e) => {
                assert_eq!(e.offset, 42);
                assert_eq!(e.time_ls, None);
            }
            other => panic!("expected gnss event, got {:?}", other),
        }
        parser.stop(true).unwrap();
        assert_eq!(process.status(), Status::Stopped);
    }
}
