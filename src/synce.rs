use crate::ptp::ClockState;
use serde::Serialize;
use std::collections::HashMap;

pub const NETWORK_OPT_1: i32 = 1;
pub const NETWORK_OPT_2: i32 = 2;
pub const EXTENDED_TLV_DISABLED: i32 = 0;
pub const EXTENDED_TLV_ENABLED: i32 = 1;

/// Last quality level received on a SyncE port.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize)]
pub struct QualityLevelInfo {
    pub priority: u8,
    pub ssm: u8,
    pub extended_ssm: u8,
}

/// One logical SyncE device and the ports grouped under it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub name: String,
    pub ifaces: Vec<String>,
    pub clock_id: String,
    pub network_option: i32,
    pub extended_tlv: i32,
    pub external_source: String,
    pub last_ql_state: HashMap<String, QualityLevelInfo>,
    pub last_clock_state: ClockState,
}

impl Default for Device {
    fn default() -> Self {
        Self {
            name: String::new(),
            ifaces: Vec::new(),
            clock_id: String::new(),
            network_option: NETWORK_OPT_1,
            extended_tlv: EXTENDED_TLV_DISABLED,
            external_source: String::new(),
            last_ql_state: HashMap::new(),
            last_clock_state: ClockState::Unknown,
        }
    }
}

/// Ordered SyncE device relations extracted from a synce4l configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Relations {
    devices: Vec<Device>,
}

impl Relations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device_config(&mut self, device: Device) {
        self.devices.push(device);
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Injects clock ids provided by an external collaborator into devices
    /// that did not carry a `clock_id` option, keyed by device name.
    pub fn add_clock_ids(&mut self, ptp_settings: &HashMap<String, String>) {
        for device in &mut self.devices {
            if device.clock_id.is_empty() {
                if let Some(clock_id) = ptp_settings.get(&device.name) {
                    device.clock_id = clock_id.clone();
                }
            }
        }
    }
}
