use crate::tasks::{self, ConvX};
use log::warn;
use std::cmp::Ordering;
use std::time::{Duration, Instant};

/// Drift-corrected periodic loop. Ticks keep the nominal cadence as long as
/// the body finishes on time; overruns are logged and re-anchor the schedule.
pub struct Loop {
    next_iter: Instant,
    interval: Duration,
    int_micros: i64,
    t: Instant,
    report: bool,
}

#[negative_impl::negative_impl]
impl !Send for Loop {}

impl Loop {
    pub fn prepare0(interval: Duration) -> Self {
        Self::prepare(interval, false)
    }
    pub fn prepare_reported(interval: Duration) -> Self {
        Self::prepare(interval, true)
    }
    /// # Panics
    ///
    /// will panic if interval in us > i64::MAX
    pub fn prepare(interval: Duration, report: bool) -> Self {
        let now = Instant::now();
        Loop {
            next_iter: now + interval,
            interval,
            int_micros: i64::try_from(interval.as_micros()).unwrap(),
            t: now,
            report,
        }
    }

    pub fn tick(&mut self) -> bool {
        let t = Instant::now();
        let result = match t.cmp(&self.next_iter) {
            Ordering::Greater => false,
            Ordering::Equal => true,
            Ordering::Less => {
                tasks::sleep(self.next_iter - t);
                true
            }
        };
        if result {
            self.next_iter += self.interval;
        } else {
            self.next_iter = Instant::now() + self.interval;
            warn!(
                "{} loop timeout ({:?} + {:?})",
                tasks::thread_name(),
                self.interval,
                self.next_iter.elapsed()
            );
        }
        if self.report {
            let t = Instant::now();
            #[allow(clippy::cast_possible_truncation)]
            let jitter = (self.int_micros - (t.duration_since(self.t)).as_micros() as i64)
                .unsigned_abs()
                .as_u16_max();
            tasks::report_jitter(jitter);
            self.t = t;
        };
        result
    }
}
