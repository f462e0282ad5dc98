use ptpmon::config::ConfUpdate;
use ptpmon::parser;
use ptpmon::prelude::*;
use ptpmon::supervisor::Supervisor;
use ptpmon::tasks;
use std::env;
use std::fs;
use std::process::exit;
use std::time::Duration;

fn main() {
    ptpmon::init(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_DESCRIPTION"),
        env!("CARGO_PKG_VERSION"),
    );
    let profiles_path = match env::var("PTPMON_PROFILES").ok().or_else(|| env::args().nth(1)) {
        Some(path) => path,
        None => {
            error!("no profiles given (set PTPMON_PROFILES or pass a path)");
            exit(1);
        }
    };
    let profiles_json = match fs::read_to_string(&profiles_path) {
        Ok(raw) => raw,
        Err(e) => {
            error!("unable to read {}: {}", profiles_path, e);
            exit(1);
        }
    };
    let (mut conf, _updates) = ConfUpdate::new();
    if let Err(e) = conf.update_config(&profiles_json) {
        error!("{}", e);
        exit(1);
    }
    let (events_tx, events_rx) = parser::event_channel();
    let supervisor = match Supervisor::from_profiles(&conf.node_profiles, &events_tx) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            error!("{}", e);
            exit(1);
        }
    };
    if let Err(e) = supervisor.start() {
        error!("{}", e);
        exit(1);
    }
    let _ = tasks::spawn_service("events", move || {
        while let Ok(event) = events_rx.recv() {
            match event.marshal() {
                Ok(buf) => info!("{} {}", event.subtype(), String::from_utf8_lossy(&buf)),
                Err(e) => error!("failed to encode {} event: {}", event.subtype(), e),
            }
        }
    });
    ptpmon::run(&supervisor, Duration::from_secs_f64(ptpmon::DEFAULT_STOP_TIMEOUT));
}
