use log::{debug, info};
use once_cell::sync::{Lazy, OnceCell};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fmt::Write as _;
use std::fs;
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::atomic;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod api;
pub mod config;
pub mod error;
pub mod event;
pub mod interval;
pub mod parser;
pub mod process;
pub mod ptp;
pub mod supervisor;
pub mod synce;
pub mod tasks;

pub mod prelude {
    pub use super::{init, run, sigterm_received};
    pub use crate::error::{Error, Result};
    pub use log::{debug, error, info, trace, warn};
}

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_STOP_TIMEOUT: f64 = 30.0;
pub static NAME: OnceCell<String> = OnceCell::new();
pub static DESCRIPTION: OnceCell<String> = OnceCell::new();
pub static VERSION: OnceCell<String> = OnceCell::new();
pub static CPUS: OnceCell<usize> = OnceCell::new();

static HOSTNAME: OnceCell<String> = OnceCell::new();
static STARTUP_TIME: OnceCell<Instant> = OnceCell::new();

static TERM_FLAG: Lazy<Arc<atomic::AtomicBool>> =
    Lazy::new(|| Arc::new(atomic::AtomicBool::new(false)));

pub fn sigterm_received() -> bool {
    TERM_FLAG.load(atomic::Ordering::SeqCst)
}

#[derive(Serialize, Deserialize, Default)]
pub struct DaemonInfo {
    pub system_name: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub pid: u32,
    pub uptime: f64,
    pub processes: BTreeMap<String, String>,
}

pub(crate) fn daemon_info() -> DaemonInfo {
    DaemonInfo {
        system_name: HOSTNAME.get().unwrap().clone(),
        name: NAME.get().unwrap().clone(),
        description: DESCRIPTION.get().unwrap().clone(),
        version: VERSION.get().unwrap().clone(),
        pid: std::process::id(),
        uptime: uptime().as_secs_f64(),
        processes: supervisor::process_statuses(),
    }
}

/// # Panics
///
/// Will panic if the daemon is not initialized
#[inline]
pub fn hostname() -> &'static str {
    HOSTNAME.get().unwrap()
}

/// # Panics
///
/// Will panic if the daemon is not initialized
#[inline]
pub fn uptime() -> Duration {
    STARTUP_TIME.get().unwrap().elapsed()
}

/// Initializes the daemon identity, the panic hook and logging. Verbosity is
/// selected with `VERBOSE=1`, syslog output with `SYSLOG=1`.
///
/// # Panics
///
/// Will panic if syslog is selected but can not be connected
pub fn init(name: &str, description: &str, version: &str) {
    panic::set_hook(Box::new(|s| {
        println!("PANIC: {}", s);
        std::process::exit(1);
    }));
    HOSTNAME
        .set(hostname::get().unwrap().to_string_lossy().to_string())
        .unwrap();
    STARTUP_TIME.set(Instant::now()).unwrap();
    NAME.set(name.to_owned()).unwrap();
    DESCRIPTION.set(description.to_owned()).unwrap();
    VERSION.set(version.to_owned()).unwrap();
    let verbose: bool = env::var("VERBOSE").ok().map_or(false, |v| v == "1");
    let syslog: bool = env::var("SYSLOG").ok().map_or(false, |v| v == "1");
    if syslog {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_USER,
            hostname: None,
            process: name.to_owned(),
            pid: std::process::id(),
        };
        log::set_boxed_logger(Box::new(syslog::BasicLogger::new(
            syslog::unix(formatter).unwrap(),
        )))
        .unwrap();
        log::set_max_level(if verbose {
            log::LevelFilter::Trace
        } else {
            log::LevelFilter::Info
        });
    } else {
        env_logger::Builder::new()
            .target(env_logger::Target::Stdout)
            .filter_level(if verbose {
                log::LevelFilter::Trace
            } else {
                log::LevelFilter::Info
            })
            .init();
    }
    debug!("log initialization completed");
    tasks::init();
}

/// # Panics
///
/// Will panic if unable to register SIGTERM/SIGINT handler
fn register_signals() {
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&TERM_FLAG)).unwrap();
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&TERM_FLAG)).unwrap();
}

pub fn var_dir() -> PathBuf {
    env::var("PTPMON_VAR_DIR").map_or_else(|_| env::temp_dir(), |p| Path::new(&p).to_owned())
}

pub(crate) fn name() -> &'static str {
    NAME.get().map(String::as_str).unwrap()
}

/// Runs the supervisor until SIGTERM/SIGINT, then shuts it down, aborting
/// hard if the shutdown does not finish within `stop_timeout`.
///
/// # Panics
///
/// Will panic if unable to write/remove the pid file/api socket or if the
/// daemon is not initialized
pub fn run(supervisor: &supervisor::Supervisor, stop_timeout: Duration) {
    let name = NAME.get().expect("daemon not initialized");
    let description = DESCRIPTION.get().unwrap();
    let version = VERSION.get().unwrap();
    let mut msg = format!("{} {}", name, version);
    if !description.is_empty() {
        let _ = write!(msg, " ({})", description);
    }
    info!("system: {}, cpus: {}", HOSTNAME.get().unwrap(), cpus());
    info!("{}", msg);
    register_signals();
    let pid = std::process::id();
    let mut pid_file = var_dir();
    pid_file.push(format!("{}.pid", name));
    fs::write(&pid_file, pid.to_string()).unwrap();
    let socket_path = api::spawn_api();
    while !sigterm_received() {
        tasks::step_sleep();
    }
    info!("shutting down");
    let _ = tasks::spawn_service("stopwatch", move || {
        tasks::sleep(stop_timeout);
        panic!("timeout has been reached, FORCE STOP");
    });
    supervisor.stop(true);
    fs::remove_file(pid_file).unwrap();
    fs::remove_file(socket_path).unwrap();
}

pub fn cpus() -> usize {
    if let Some(cpus) = CPUS.get() {
        *cpus
    } else {
        let cpus = if let Ok(s) = std::fs::read_to_string("/proc/cpuinfo") {
            let mut c = 0;
            for line in s.split('\n') {
                if line.starts_with("processor\t") {
                    c += 1;
                }
            }
            c
        } else {
            0
        };
        let _ = CPUS.set(cpus);
        cpus
    }
}
