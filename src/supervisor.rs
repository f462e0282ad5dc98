use crate::config::{PtpProfile, Ptp4lConf};
use crate::error::Result;
use crate::event::Event;
use crate::parser::ublox::UbxParser;
use crate::parser::{self, BaseParser, ParseLineFn};
use crate::process::{line_channel, BaseProcess, Process};
use log::{debug, error, info};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::mpsc::SyncSender;
use std::sync::Arc;

static PROCESSES: Lazy<Mutex<Vec<Arc<dyn Process>>>> = Lazy::new(<_>::default);

fn register_process(process: Arc<dyn Process>) {
    PROCESSES.lock().push(process);
}

/// Status snapshot of every supervised process, for the api.
pub fn process_statuses() -> BTreeMap<String, String> {
    PROCESSES
        .lock()
        .iter()
        .map(|p| (p.name().to_owned(), p.status().to_string()))
        .collect()
}

enum Unit {
    Line(BaseParser),
    Ublox(UbxParser),
}

impl Unit {
    fn name(&self) -> &str {
        match self {
            Unit::Line(parser) => parser.name(),
            Unit::Ublox(_) => parser::ublox::PROCESS_NAME,
        }
    }
    fn start(&self) -> Result<()> {
        match self {
            Unit::Line(parser) => {
                parser.process().start()?;
                parser.start();
                Ok(())
            }
            Unit::Ublox(parser) => parser.start(),
        }
    }
    fn stop(&self, wait: bool) -> Result<()> {
        match self {
            Unit::Line(parser) => parser.stop(wait),
            Unit::Ublox(parser) => parser.stop(wait),
        }
    }
}

/// Owns the supervised daemons built from the applied node profiles.
pub struct Supervisor {
    units: Vec<Unit>,
}

impl Supervisor {
    /// Composes one supervised unit per daemon the profiles ask for. The
    /// ublox poller joins in when the ts2phc configuration references nmea.
    pub fn from_profiles(profiles: &[PtpProfile], events: &SyncSender<Event>) -> Result<Self> {
        let mut units = Vec::new();
        for profile in profiles {
            if profile.is_empty() {
                continue;
            }
            let profile_name = profile.name.clone().unwrap_or_default();
            if let Some(conf_text) = &profile.ptp4l_conf {
                let mut conf = Ptp4lConf::parse(&profile_name, conf_text)?;
                let (rendered, ifaces) = conf.render();
                info!(
                    "profile {}: clock type {}, interfaces {:?}",
                    profile_name, conf.clock_type, conf.mapping
                );
                debug!("rendered ptp4l conf:\n{}", rendered);
                for iface in &ifaces {
                    if let Some(source) = iface.source {
                        debug!("interface {} fed by {}", iface.name, source);
                    }
                }
                if let Some(port) = &conf.gnss_serial_port {
                    info!("profile {}: gnss serial port {}", profile_name, port);
                }
            }
            if let Some(conf_text) = &profile.synce4l_conf {
                let conf = Ptp4lConf::parse(&profile_name, conf_text)?;
                let (rendered, relations) = conf.render_synce(&profile.ptp_settings);
                info!(
                    "profile {}: {} synce device(s)",
                    profile_name,
                    relations.devices().len()
                );
                debug!("rendered synce4l conf:\n{}", rendered);
            }
            if let Some(opts) = &profile.ptp4l_opts {
                units.push(line_unit(
                    parser::ptp4l::PROCESS_NAME,
                    parser::ptp4l::PROCESS_PATH,
                    opts,
                    parser::ptp4l::parse_line,
                    events,
                ));
            }
            if let Some(opts) = &profile.phc2sys_opts {
                units.push(line_unit(
                    parser::phc2sys::PROCESS_NAME,
                    parser::phc2sys::PROCESS_PATH,
                    opts,
                    parser::phc2sys::parse_line,
                    events,
                ));
            }
            if let Some(opts) = &profile.ts2phc_opts {
                units.push(line_unit(
                    parser::ts2phc::PROCESS_NAME,
                    parser::ts2phc::PROCESS_PATH,
                    opts,
                    parser::parse_ts2phc_stream,
                    events,
                ));
            }
            let uses_nmea = profile
                .ts2phc_conf
                .as_deref()
                .map_or(false, |conf| conf.contains("nmea"));
            if uses_nmea {
                let (lines_tx, lines_rx) = line_channel();
                let (path, args) = parser::ublox::command();
                let process: Arc<dyn Process> = Arc::new(BaseProcess::new(
                    parser::ublox::PROCESS_NAME,
                    path,
                    &args,
                    lines_tx,
                ));
                register_process(Arc::clone(&process));
                units.push(Unit::Ublox(UbxParser::new(
                    lines_rx,
                    events.clone(),
                    process,
                )));
            }
        }
        Ok(Self { units })
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn start(&self) -> Result<()> {
        for unit in &self.units {
            unit.start()?;
        }
        info!("supervising {} daemon(s)", self.units.len());
        Ok(())
    }

    /// Best-effort shutdown: failures are logged, every unit is attempted.
    pub fn stop(&self, wait: bool) {
        for unit in &self.units {
            if let Err(e) = unit.stop(wait) {
                error!("failed to stop {}: {}", unit.name(), e);
            }
        }
    }
}

fn line_unit(
    name: &str,
    path: &str,
    opts: &str,
    parse_line: ParseLineFn,
    events: &SyncSender<Event>,
) -> Unit {
    let (lines_tx, lines_rx) = line_channel();
    let process: Arc<dyn Process> = Arc::new(BaseProcess::new(
        name,
        path,
        &[opts.to_owned()],
        lines_tx,
    ));
    register_process(Arc::clone(&process));
    Unit::Line(BaseParser::new(
        name,
        lines_rx,
        events.clone(),
        process,
        parse_line,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::event_channel;
    use std::time::Duration;

    #[test]
    fn units_follow_profile_opts() {
        let (events_tx, _events_rx) = event_channel();
        let profile: PtpProfile = serde_json::from_str(
            r#"{
                "name": "grandmaster",
                "interface": "ens2f0",
                "ptp4lOpts": "-2 --summary_interval -4",
                "phc2sysOpts": "-a -r -r",
                "ts2phcOpts": "",
                "ts2phcConf": "[nmea]\nts2phc.master 1\n[global]\nuse_syslog 0\n[ens2f0]\nts2phc.extts_polarity rising"
            }"#,
        )
        .unwrap();
        let supervisor = Supervisor::from_profiles(&[profile], &events_tx).unwrap();
        // ptp4l + phc2sys + ts2phc + ublox (nmea referenced)
        assert_eq!(supervisor.len(), 4);
    }

    #[test]
    fn empty_profiles_yield_no_units() {
        let (events_tx, _events_rx) = event_channel();
        let supervisor = Supervisor::from_profiles(&[PtpProfile::default()], &events_tx).unwrap();
        assert!(supervisor.is_empty());
    }

    // spawn -> child stdout -> line channel -> parser -> event channel
    #[test]
    fn pipeline_end_to_end() {
        let (lines_tx, lines_rx) = line_channel();
        let (events_tx, events_rx) = event_channel();
        let process: Arc<dyn Process> = Arc::new(BaseProcess::new(
            "ptp4l-echo",
            "/bin/echo",
            &["ptp4l[365195.391]: [ptp4l.0.config] master offset -1 s2 freq -3972 path delay 89"
                .to_owned()],
            lines_tx,
        ));
        let unit = BaseParser::new(
            "ptp4l-echo",
            lines_rx,
            events_tx,
            Arc::clone(&process),
            parser::ptp4l::parse_line,
        );
        process.start().unwrap();
        unit.start();
        match events_rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            Event::Ptp4lMetric(m) => {
                assert_eq!(m.iface, "master");
                assert_eq!(m.offset, Some(-1));
                assert_eq!(m.freq_adj, Some(-3972));
                assert_eq!(m.delay, Some(89));
            }
            other => panic!("expected ptp4l metric, got {:?}", other),
        }
        unit.stop(true).unwrap();
    }

    #[test]
    fn ublox_only_with_nmea() {
        let (events_tx, _events_rx) = event_channel();
        let profile = PtpProfile {
            name: Some("bc".to_owned()),
            ts2phc_opts: Some(String::new()),
            ts2phc_conf: Some("[global]\nuse_syslog 0\n".to_owned()),
            ..PtpProfile::default()
        };
        let supervisor = Supervisor::from_profiles(&[profile], &events_tx).unwrap();
        assert_eq!(supervisor.len(), 1);
    }
}
