use crate::cpus;
use crate::error::{Error, Result};
use log::{error, info};
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{btree_map, BTreeMap};
use std::env;
use std::str::FromStr;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

static THREAD_STATS: Lazy<Mutex<BTreeMap<String, ThreadStats>>> = Lazy::new(<_>::default);
static STATS_TX: OnceCell<Mutex<mpsc::SyncSender<(String, u16)>>> = OnceCell::new();

pub const SLEEP_STEP: Duration = Duration::from_millis(500);

const STATS_CHANNEL_SIZE: usize = 100_000;

pub(crate) fn init() {
    let (tx, rx) = mpsc::sync_channel::<(String, u16)>(STATS_CHANNEL_SIZE);
    if STATS_TX.set(Mutex::new(tx)).is_err() {
        return;
    }
    let _ = spawn_service("stats", move || {
        while let Ok((name, jitter)) = rx.recv() {
            if let Some(entry) = THREAD_STATS.lock().get_mut(&name) {
                entry.report_jitter(jitter);
            }
        }
    });
}

pub(crate) trait ConvX {
    fn as_u16_max(&self) -> u16;
}

macro_rules! impl_convx {
    ($t: ty) => {
        impl ConvX for $t {
            fn as_u16_max(&self) -> u16 {
                let val = *self;
                if val > <$t>::from(u16::MAX) {
                    u16::MAX
                } else {
                    val as u16
                }
            }
        }
    };
}

impl_convx!(u32);
impl_convx!(u64);

#[inline]
pub fn step_sleep() {
    sleep(SLEEP_STEP);
}

#[inline]
pub fn sleep(duration: Duration) {
    thread::sleep(duration);
}

pub fn thread_name() -> String {
    let th = thread::current();
    if let Some(name) = th.name() {
        name.to_owned()
    } else {
        format!("{:?}", th.id())
    }
}

#[derive(Default, Debug)]
pub(crate) struct ThreadStats {
    iters: u32,
    jitter: Option<JitterStats>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct ThreadInfo {
    pub iters: u32,
    pub jitter_min: u16,
    pub jitter_max: u16,
    pub jitter_last: u16,
    pub jitter_avg: u16,
}

#[derive(Default, Debug)]
struct JitterStats {
    min: u16,
    max: u16,
    last: u16,
    total: u32,
}

impl JitterStats {
    #[inline]
    fn new(jitter: u16) -> Self {
        Self {
            min: jitter,
            max: jitter,
            last: jitter,
            total: u32::from(jitter),
        }
    }
}

impl ThreadStats {
    pub(crate) fn info(&self) -> Option<ThreadInfo> {
        self.jitter.as_ref().map(|jitter| ThreadInfo {
            iters: self.iters,
            jitter_min: jitter.min,
            jitter_max: jitter.max,
            jitter_last: jitter.last,
            jitter_avg: (jitter.total / self.iters).as_u16_max(),
        })
    }
    #[inline]
    fn report_jitter(&mut self, jitter: u16) {
        let was_reset = if self.iters == u32::MAX {
            self.iters = 1;
            true
        } else {
            self.iters += 1;
            false
        };
        if let Some(ref mut j_stats) = self.jitter {
            if j_stats.min > jitter {
                j_stats.min = jitter;
            }
            if j_stats.max < jitter {
                j_stats.max = jitter;
            }
            j_stats.last = jitter;
            let j32 = u32::from(jitter);
            if was_reset {
                j_stats.total = j32;
            } else if j_stats.total > u32::MAX - j32 {
                self.iters = 1;
                j_stats.total = j32;
            } else {
                j_stats.total += j32;
            }
        } else {
            self.jitter.replace(JitterStats::new(jitter));
        }
    }
    pub(crate) fn reset(&mut self) {
        self.iters = 0;
        self.jitter.take();
    }
}

#[inline]
pub(crate) fn report_jitter(jitter: u16) {
    if let Some(tx) = STATS_TX.get() {
        if tx.lock().try_send((thread_name(), jitter)).is_err() {
            error!("CRITICAL: stats channel full");
        }
    }
}

pub fn thread_info() -> BTreeMap<String, Option<ThreadInfo>> {
    THREAD_STATS
        .lock()
        .iter()
        .map(|(name, st)| (name.clone(), st.info()))
        .collect()
}

pub fn reset_thread_stats() {
    THREAD_STATS.lock().values_mut().for_each(ThreadStats::reset);
}

fn register_thread_stats(name: &str) -> Result<()> {
    if let btree_map::Entry::Vacant(v) = THREAD_STATS.lock().entry(name.to_owned()) {
        v.insert(ThreadStats::default());
        Ok(())
    } else {
        Err(Error::config(format!("thread {} is already registered", name)))
    }
}

/// Spawns a named service thread and registers it with the stats collector.
///
/// An optional `PTPMON_THREAD_AFFINITY_<name>` env var pins the thread to a
/// CPU with an RR scheduling priority, which matters on the RT hosts this
/// daemon usually runs on.
///
/// # Panics
///
/// Will panic if the thread name is 15 characters or more, if the OS is
/// unable to spawn the thread or if the thread has invalid CPU id or
/// priority specified
pub fn spawn_service<F>(name: &str, f: F) -> thread::JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    assert!(
        name.len() < 15,
        "task name MUST be LESS than 15 characters ({})",
        name
    );
    if let Err(e) = register_thread_stats(name) {
        error!("{}", e);
    }
    let var = format!("PTPMON_THREAD_AFFINITY_{}", name.replace('.', "__"));
    let affinity = env::var(var)
        .map(|aff| {
            aff.parse::<Affinity>()
                .unwrap_or_else(|e| panic!("UNABLE TO SET THREAD {} AFFINITY: {}", name, e))
        })
        .ok();
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || {
            if let Some(affinity) = affinity {
                let name = thread_name();
                info!(
                    "setting {} affinity to CPU {}, priority: {}",
                    name, affinity.cpu_id, affinity.sched_priority
                );
                core_affinity::set_for_current(core_affinity::CoreId {
                    id: affinity.cpu_id,
                });
                let res = unsafe {
                    libc::sched_setscheduler(
                        0,
                        libc::SCHED_RR,
                        &libc::sched_param {
                            sched_priority: affinity.sched_priority,
                        },
                    )
                };
                assert!(
                    res == 0,
                    "UNABLE TO SET THREAD {} AFFINITY, error code: {}",
                    name,
                    res
                );
            }
            f();
        })
        .unwrap()
}

pub struct Affinity {
    pub cpu_id: usize,
    pub sched_priority: libc::c_int,
}

impl FromStr for Affinity {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let mut sp = s.split(',');
        let cpu_id: usize = sp
            .next()
            .unwrap_or_default()
            .parse()
            .map_err(|e| Error::config(format!("invalid task cpu id: {e}")))?;
        let sched_priority: libc::c_int = sp
            .next()
            .ok_or_else(|| Error::config("no priority specified"))?
            .parse()
            .map_err(|e| Error::config(format!("invalid task priority: {e}")))?;
        if let Some(s) = sp.next() {
            return Err(Error::config(format!(
                "extra affinity params not supported: {}",
                s
            )));
        }
        if cpu_id >= cpus() {
            return Err(Error::config(format!("CPU not found: {}", cpu_id)));
        }
        if !(1..=99).contains(&sched_priority) {
            return Err(Error::config(format!(
                "invalid scheduler priority: {}",
                sched_priority
            )));
        }
        Ok(Self {
            cpu_id,
            sched_priority,
        })
    }
}
