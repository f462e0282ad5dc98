use crate::error::{Error, Result};
use log::{error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::io::{self, BufRead, BufReader};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Bounded capacity of a per-process line channel. A full channel applies
/// backpressure toward the child through the kernel pipe buffer.
pub const LINE_CHANNEL_SIZE: usize = 100;

const SEND_RETRY_STEP: Duration = Duration::from_millis(1);
const READ_ERR_STEP: Duration = Duration::from_millis(100);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Status {
    New,
    Running,
    Dead,
    Stopped,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::New => "NEW",
            Status::Running => "RUNNING",
            Status::Dead => "DEAD",
            Status::Stopped => "STOPPED",
        })
    }
}

/// A supervised external daemon.
pub trait Process: Send + Sync {
    fn name(&self) -> &str;
    fn status(&self) -> Status;
    fn start(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
    /// Stop + start preserving identity; used by watchdogs on unresponsive
    /// children.
    fn reset(&self) -> Result<()>;
}

/// Creates the bounded line channel shared by a process and its parser.
pub fn line_channel() -> (SyncSender<String>, Receiver<String>) {
    mpsc::sync_channel(LINE_CHANNEL_SIZE)
}

/// Spawns a child binary and streams its stdout as non-empty lines into a
/// bounded channel.
pub struct BaseProcess {
    name: String,
    path: String,
    args: Vec<String>,
    status: RwLock<Status>,
    child: Mutex<Option<Child>>,
    reader: Mutex<Option<thread::JoinHandle<()>>>,
    lines: SyncSender<String>,
    stopped: Arc<AtomicBool>,
}

impl BaseProcess {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        opts: &[String],
        lines: SyncSender<String>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            args: split_opts(opts),
            status: RwLock::new(Status::New),
            child: <_>::default(),
            reader: <_>::default(),
            lines,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    fn set_status(&self, val: Status) {
        *self.status.write() = val;
    }

    fn spawn_child(&self) -> Result<()> {
        let mut child = match Command::new(&self.path)
            .args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                error!("failed to start {}: {}", self.name, e);
                self.set_status(Status::Stopped);
                return Err(Error::Spawn {
                    name: self.name.clone(),
                    source: e,
                });
            }
        };
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                self.set_status(Status::Stopped);
                return Err(Error::Spawn {
                    name: self.name.clone(),
                    source: io::Error::new(io::ErrorKind::BrokenPipe, "no stdout pipe"),
                });
            }
        };
        info!("started {} with PID={}", self.name, child.id());
        self.child.lock().replace(child);
        self.set_status(Status::Running);
        let lines = self.lines.clone();
        let stopped = Arc::clone(&self.stopped);
        let name = self.name.clone();
        let handle = thread::Builder::new()
            .name(format!("r:{}", self.name))
            .spawn(move || read_lines(stdout, &lines, &stopped, &name))?;
        self.reader.lock().replace(handle);
        Ok(())
    }

    /// Sends SIGTERM to the current child and reaps it.
    fn terminate_child(&self) {
        if let Some(mut child) = self.child.lock().take() {
            let pid = child.id();
            info!("stopping {} with PID={}", self.name, pid);
            #[allow(clippy::cast_possible_wrap)]
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            if let Err(e) = child.wait() {
                warn!("{} wait failed: {}", self.name, e);
            }
        }
    }

    fn join_reader(&self) {
        if let Some(handle) = self.reader.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Process for BaseProcess {
    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> Status {
        *self.status.read()
    }

    fn start(&self) -> Result<()> {
        match self.status() {
            Status::Running | Status::Stopped => Ok(()),
            Status::New | Status::Dead => {
                self.stopped.store(false, Ordering::SeqCst);
                self.spawn_child()
            }
        }
    }

    fn stop(&self) -> Result<()> {
        self.set_status(Status::Stopped);
        self.stopped.store(true, Ordering::SeqCst);
        self.terminate_child();
        self.join_reader();
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        self.terminate_child();
        if self.status() != Status::Stopped {
            self.set_status(Status::Dead);
        }
        self.spawn_child()
    }
}

/// Callers sometimes pass a single space-joined option string; re-split so
/// the child sees individual arguments.
fn split_opts(opts: &[String]) -> Vec<String> {
    opts.iter()
        .flat_map(|o| o.split_whitespace())
        .map(str::to_owned)
        .collect()
}

fn read_lines(stdout: ChildStdout, lines: &SyncSender<String>, stopped: &AtomicBool, name: &str) {
    let mut reader = BufReader::new(stdout);
    let mut buf = String::new();
    loop {
        if stopped.load(Ordering::SeqCst) {
            break;
        }
        buf.clear();
        match reader.read_line(&mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = buf.trim_end();
                if line.is_empty() {
                    continue;
                }
                if !send_line(lines, line.to_owned(), stopped) {
                    break;
                }
            }
            Err(e) => {
                error!("{} read error: {}", name, e);
                thread::sleep(READ_ERR_STEP);
            }
        }
    }
}

fn send_line(lines: &SyncSender<String>, line: String, stopped: &AtomicBool) -> bool {
    let mut line = line;
    loop {
        match lines.try_send(line) {
            Ok(()) => return true,
            Err(TrySendError::Full(l)) => {
                if stopped.load(Ordering::SeqCst) {
                    return false;
                }
                line = l;
                thread::sleep(SEND_RETRY_STEP);
            }
            Err(TrySendError::Disconnected(_)) => return false,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{Process, Status};
    use crate::error::Result;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counting test double used by watchdog and runtime tests.
    pub struct MockProcess {
        pub process_name: String,
        pub reset_count: AtomicUsize,
        pub process_status: Mutex<Status>,
    }

    impl MockProcess {
        pub fn new(name: &str) -> Self {
            Self {
                process_name: name.to_owned(),
                reset_count: AtomicUsize::new(0),
                process_status: Mutex::new(Status::New),
            }
        }
        pub fn resets(&self) -> usize {
            self.reset_count.load(Ordering::SeqCst)
        }
    }

    impl Process for MockProcess {
        fn name(&self) -> &str {
            &self.process_name
        }
        fn status(&self) -> Status {
            *self.process_status.lock()
        }
        fn start(&self) -> Result<()> {
            *self.process_status.lock() = Status::Running;
            Ok(())
        }
        fn stop(&self) -> Result<()> {
            *self.process_status.lock() = Status::Stopped;
            Ok(())
        }
        fn reset(&self) -> Result<()> {
            self.stop()?;
            self.start()?;
            self.reset_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn spawn_failure_reports_and_stops() {
        let (tx, _rx) = line_channel();
        let proc = BaseProcess::new("missing", "/nonexistent/daemon", &[], tx);
        let err = proc.start().unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
        assert_eq!(proc.status(), Status::Stopped);
        // idempotent once stopped
        assert!(proc.start().is_ok());
        assert_eq!(proc.status(), Status::Stopped);
    }

    #[test]
    fn lines_are_delivered_in_order_without_empties() {
        let (tx, rx) = line_channel();
        let proc = BaseProcess::new(
            "echo",
            "/bin/echo",
            &["-e one\\ntwo\\n\\nthree".to_owned()],
            tx,
        );
        proc.start().unwrap();
        assert_eq!(proc.status(), Status::Running);
        let mut got = Vec::new();
        for _ in 0..3 {
            got.push(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        }
        assert_eq!(got, ["one", "two", "three"]);
        proc.stop().unwrap();
        assert_eq!(proc.status(), Status::Stopped);
    }

    #[test]
    fn opts_are_resplit_on_whitespace() {
        let opts = vec!["-e  one two".to_owned(), "three".to_owned()];
        assert_eq!(split_opts(&opts), ["-e", "one", "two", "three"]);
    }
}
