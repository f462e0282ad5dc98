use crate::error::{Error, Result};
use crate::ptp::{ClockType, EventSource};
use crate::synce::{Device, Relations};
use indexmap::IndexMap;
use log::{error, info};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, SyncSender};

/// Node profile as delivered by the configuration intake, camelCase JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PtpProfile {
    pub name: Option<String>,
    pub interface: Option<String>,
    pub ptp4l_opts: Option<String>,
    pub phc2sys_opts: Option<String>,
    pub ts2phc_opts: Option<String>,
    pub ptp4l_conf: Option<String>,
    pub ts2phc_conf: Option<String>,
    pub synce4l_conf: Option<String>,
    pub ptp_settings: HashMap<String, String>,
}

impl PtpProfile {
    /// `{"name":null,"interface":null}` is the "no profile" token.
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.interface.is_none()
    }
}

/// Holds the applied profiles document and signals appliers on change.
pub struct ConfUpdate {
    pub node_profiles: Vec<PtpProfile>,
    applied: Option<String>,
    update_tx: SyncSender<bool>,
}

impl ConfUpdate {
    pub fn new() -> (Self, Receiver<bool>) {
        let (update_tx, update_rx) = mpsc::sync_channel(1);
        (
            Self {
                node_profiles: Vec::new(),
                applied: None,
                update_tx,
            },
            update_rx,
        )
    }

    /// Applies a profiles document: a JSON array of profiles, or a single
    /// profile object kept for backward compatibility. Re-applying identical
    /// bytes is a no-op. Returns whether anything was applied.
    pub fn update_config(&mut self, profiles_json: &str) -> Result<bool> {
        if self.applied.as_deref() == Some(profiles_json) {
            return Ok(false);
        }
        if let Ok(profiles) = serde_json::from_str::<Vec<PtpProfile>>(profiles_json) {
            info!("load profiles");
            self.apply(profiles_json, profiles);
            return Ok(true);
        }
        if let Ok(profile) = serde_json::from_str::<PtpProfile>(profiles_json) {
            if profile.is_empty() {
                info!("skip no profile");
                return Ok(false);
            }
            info!("load profiles using old method");
            self.apply(profiles_json, vec![profile]);
            return Ok(true);
        }
        Err(Error::config("unable to load profile config"))
    }

    fn apply(&mut self, profiles_json: &str, profiles: Vec<PtpProfile>) {
        self.applied = Some(profiles_json.to_owned());
        self.node_profiles = profiles;
        let _ = self.update_tx.try_send(true);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ptp4lConfSection {
    pub name: String,
    pub options: IndexMap<String, String>,
}

impl Ptp4lConfSection {
    fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: IndexMap::new(),
        }
    }
}

/// An interface named by a configuration section and the time source feeding
/// it.
#[derive(Debug, Clone, PartialEq)]
pub struct Iface {
    pub name: String,
    pub source: Option<EventSource>,
}

/// Sectioned ptp4l configuration with its derived clock role.
#[derive(Debug, Clone, PartialEq)]
pub struct Ptp4lConf {
    pub sections: Vec<Ptp4lConfSection>,
    pub mapping: Vec<String>,
    pub profile_name: String,
    pub clock_type: ClockType,
    pub gnss_serial_port: Option<String>,
}

static SECTION_NAME_STRIP: Lazy<Regex> = Lazy::new(|| Regex::new(r"[{}<>\[\] ]+").unwrap());

fn strip_section_name(name: &str) -> String {
    SECTION_NAME_STRIP.replace_all(name, "").into_owned()
}

// strconv.ParseBool-compatible token set.
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// `ts2phc.master 1` means the interface is fed by the GNSS receiver,
/// anything else means an external PPS.
fn get_source(value: &str) -> EventSource {
    if parse_bool(value.trim()) == Some(true) {
        EventSource::Gnss
    } else {
        EventSource::Pps
    }
}

impl Ptp4lConf {
    /// Parses a ptp4l configuration text into ordered sections.
    ///
    /// Lines beginning with `#` are comments, `[name]` opens a section and
    /// option lines split at the first space. An option line outside any
    /// section and an unclosed section header are errors. A missing
    /// `[global]` section is appended empty.
    pub fn parse(profile_name: &str, config: &str) -> Result<Self> {
        let mut sections: Vec<Ptp4lConfSection> = Vec::new();
        let mut current: Option<Ptp4lConfSection> = None;
        let mut global_defined = false;
        for raw in config.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(rest) = line.strip_prefix('[') {
                if let Some(section) = current.take() {
                    sections.push(section);
                }
                let end = rest
                    .find(']')
                    .ok_or_else(|| Error::config(format!("section missing closing ']': {}", line)))?;
                let name = format!("[{}]", &rest[..end]);
                if name == "[global]" {
                    global_defined = true;
                }
                current = Some(Ptp4lConfSection::named(name));
            } else if let Some(section) = current.as_mut() {
                if let Some(split) = line.find(' ') {
                    section
                        .options
                        .insert(line[..split].to_owned(), line[split..].trim().to_owned());
                }
            } else {
                return Err(Error::config(format!("config option not in section: {}", line)));
            }
        }
        if let Some(section) = current.take() {
            sections.push(section);
        }
        if !global_defined {
            sections.push(Ptp4lConfSection::named("[global]"));
        }
        let gnss_serial_port = sections
            .iter()
            .find_map(|s| s.options.get("ts2phc.nmea_serialport").cloned());
        let mut conf = Self {
            sections,
            mapping: Vec::new(),
            profile_name: profile_name.to_owned(),
            clock_type: ClockType::OC,
            gnss_serial_port,
        };
        conf.clock_type = conf.determine_clock_type();
        Ok(conf)
    }

    /// Classifies the configured clock topology from the per-interface
    /// master/slave flags and the `[global]` defaults.
    fn determine_clock_type(&self) -> ClockType {
        let mut default_is_master = false;
        let mut default_is_slave = false;
        for section in &self.sections {
            if section.name == "[global]" {
                default_is_master = flag(section, "masterOnly").or_else(|| flag(section, "serverOnly")).unwrap_or(false);
                default_is_slave = flag(section, "slaveOnly").or_else(|| flag(section, "clientOnly")).unwrap_or(false);
            }
        }
        let mut masters = 0;
        let mut slaves = 0;
        for section in &self.sections {
            if section.name == "[global]" || section.name == "[nmea]" {
                continue;
            }
            let is_master = flag(section, "masterOnly")
                .or_else(|| flag(section, "serverOnly"))
                .unwrap_or(default_is_master);
            let is_slave = flag(section, "slaveOnly")
                .or_else(|| flag(section, "clientOnly"))
                .unwrap_or(default_is_slave);
            if is_master {
                masters += 1;
            } else if is_slave {
                slaves += 1;
            }
        }
        match (masters > 0, slaves > 0) {
            (true, false) => ClockType::GM,
            (true, true) => ClockType::BC,
            _ => ClockType::OC,
        }
    }

    /// Renders the configuration back to text and collects the interface
    /// list with each interface's time source.
    pub fn render(&mut self) -> (String, Vec<Iface>) {
        let mut out = format!("#profile: {}\n", self.profile_name);
        self.mapping.clear();
        let mut ifaces: Vec<Iface> = Vec::new();
        let mut nmea_source: Option<EventSource> = None;
        for section in &self.sections {
            out.push('\n');
            out.push_str(&section.name);
            if section.name == "[nmea]" {
                if let Some(value) = section.options.get("ts2phc.master") {
                    nmea_source = Some(get_source(value));
                }
            }
            if section.name != "[global]" && section.name != "[nmea]" {
                let name = section.name.replace(&['[', ']'][..], "");
                self.mapping.push(name.clone());
                let source = section
                    .options
                    .get("ts2phc.master")
                    .map(|value| get_source(value))
                    .or(nmea_source);
                ifaces.push(Iface { name, source });
            }
            for (key, value) in &section.options {
                out.push('\n');
                out.push_str(key);
                out.push(' ');
                out.push_str(value);
            }
        }
        (out, ifaces)
    }

    /// Extracts SyncE device relations from the section sequence.
    ///
    /// `[<name>]` opens a device, `[{name}]` names the current device's
    /// external source, any other section (except `[global]`) is a port of
    /// the current device.
    pub fn extract_synce_relations(&self) -> Relations {
        let mut relations = Relations::new();
        let mut ifaces: Vec<String> = Vec::new();
        let mut current = Device::default();
        for section in &self.sections {
            if section.name.starts_with("[<") {
                if !current.name.is_empty() {
                    if !ifaces.is_empty() {
                        current.ifaces = std::mem::take(&mut ifaces);
                    }
                    relations.add_device_config(current);
                }
                current = Device {
                    name: strip_section_name(&section.name),
                    ..Device::default()
                };
                if let Some(value) = section.options.get("network_option") {
                    match value.trim().parse::<i32>() {
                        Ok(option) => current.network_option = option,
                        Err(e) => error!(
                            "error parsing `network_option`, using default {}: {}",
                            crate::synce::NETWORK_OPT_1,
                            e
                        ),
                    }
                }
                if let Some(value) = section.options.get("extended_tlv") {
                    match value.trim().parse::<i32>() {
                        Ok(tlv) => current.extended_tlv = tlv,
                        Err(e) => error!(
                            "error parsing `extended_tlv`, using default {}: {}",
                            crate::synce::EXTENDED_TLV_DISABLED,
                            e
                        ),
                    }
                }
            } else if section.name.starts_with("[{") {
                current.external_source = strip_section_name(&section.name);
            } else if section.name.starts_with('[') && section.name != "[global]" {
                ifaces.push(strip_section_name(&section.name));
            }
        }
        if !ifaces.is_empty() {
            current.ifaces = ifaces;
        }
        if !current.name.is_empty() {
            relations.add_device_config(current);
        }
        relations
    }

    /// Renders a synce4l configuration, injecting the computed `clock_id`
    /// into device sections that lacked one.
    pub fn render_synce(&self, ptp_settings: &HashMap<String, String>) -> (String, Relations) {
        let mut out = format!("#profile: {}\n", self.profile_name);
        let mut relations = self.extract_synce_relations();
        relations.add_clock_ids(ptp_settings);
        let mut device_idx = 0;
        for section in &self.sections {
            out.push('\n');
            out.push_str(&section.name);
            let mut inject = None;
            if section.name.starts_with("[<") {
                if !section.options.contains_key("clock_id") {
                    if let Some(device) = relations.devices().get(device_idx) {
                        if !device.clock_id.is_empty() {
                            inject = Some(device.clock_id.clone());
                        }
                    }
                }
                device_idx += 1;
            }
            for (key, value) in &section.options {
                out.push('\n');
                out.push_str(key);
                out.push(' ');
                out.push_str(value);
            }
            if let Some(clock_id) = inject {
                out.push_str("\nclock_id ");
                out.push_str(&clock_id);
            }
        }
        (out, relations)
    }
}

fn flag(section: &Ptp4lConfSection, key: &str) -> Option<bool> {
    section.options.get(key).map(|value| value.trim() == "1")
}
