// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Device picker list.

use bluer::Address;
use chrono::{DateTime, Local};

use crate::bluetooth::{BondState, Device, DeviceFound};

/// One row of the list.
#[derive(Debug, Clone)]
pub struct DeviceEntry {
    pub device: Device,
    pub rssi: Option<i16>,
    pub seen_at: DateTime<Local>,
}

impl DeviceEntry {
    /// Render as a single terminal line.
    pub fn render(&self) -> String {
        let rssi = match self.rssi {
            Some(rssi) => format!("{} dBm", rssi),
            None => "-".to_string(),
        };
        format!(
            "{:<24} {}  {:<10}  {:>8}  {}",
            self.device.display_name(),
            self.device.address,
            self.device.bond_state.as_str(),
            rssi,
            self.seen_at.format("%Y-%m-%d %H:%M:%S"),
        )
    }
}

/// Bonded devices first, then scan results in the order they were found.
/// Each address appears once.
#[derive(Debug, Default)]
pub struct DeviceList {
    entries: Vec<DeviceEntry>,
}

impl DeviceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the list with bonded devices. They stay at the top.
    pub fn add_bonded(&mut self, devices: impl IntoIterator<Item = Device>) {
        let now = Local::now();
        let mut bonded: Vec<DeviceEntry> = Vec::new();
        for device in devices {
            if bonded.iter().any(|e| e.device.address == device.address) {
                continue;
            }
            self.remove(device.address);
            bonded.push(DeviceEntry {
                device,
                rssi: None,
                seen_at: now,
            });
        }
        let pos = self.bonded_count();
        self.entries.splice(pos..pos, bonded);
    }

    /// Record a scan hit. Returns true when the address is new.
    ///
    /// A repeat refreshes the existing row in place.
    pub fn add_found(&mut self, found: DeviceFound) -> bool {
        let now = Local::now();
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.device.address == found.device.address)
        {
            if entry.device.name.is_none() {
                entry.device.name = found.device.name;
            }
            entry.rssi = found.rssi.or(entry.rssi);
            entry.seen_at = now;
            return false;
        }
        self.entries.push(DeviceEntry {
            device: found.device,
            rssi: found.rssi,
            seen_at: now,
        });
        true
    }

    pub fn get(&self, index: usize) -> Option<&DeviceEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Numbered lines, starting at 1.
    pub fn render(&self) -> Vec<String> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, entry)| format!("{:>3}. {}", i + 1, entry.render()))
            .collect()
    }

    fn bonded_count(&self) -> usize {
        self.entries
            .iter()
            .take_while(|e| e.device.bond_state == BondState::Bonded)
            .count()
    }

    fn remove(&mut self, address: Address) {
        self.entries.retain(|e| e.device.address != address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(last: u8, name: Option<&str>, bond_state: BondState) -> Device {
        Device::new(
            Address::new([0xAA, 0, 0, 0, 0, last]),
            name.map(str::to_string),
            bond_state,
        )
    }

    fn found(last: u8, name: Option<&str>, rssi: i16) -> DeviceFound {
        DeviceFound {
            device: device(last, name, BondState::None),
            rssi: Some(rssi),
            class: None,
        }
    }

    #[test]
    fn test_bonded_devices_come_first() {
        let mut list = DeviceList::new();
        assert!(list.add_found(found(3, Some("Speaker"), -70)));
        list.add_bonded(vec![
            device(1, Some("Phone"), BondState::Bonded),
            device(2, None, BondState::Bonded),
        ]);

        assert_eq!(list.len(), 3);
        assert_eq!(list.get(0).unwrap().device.display_name(), "Phone");
        assert_eq!(list.get(1).unwrap().device.display_name(), "AA:00:00:00:00:02");
        assert_eq!(list.get(2).unwrap().device.display_name(), "Speaker");
    }

    #[test]
    fn test_found_devices_are_deduplicated() {
        let mut list = DeviceList::new();
        list.add_bonded(vec![device(1, Some("Phone"), BondState::Bonded)]);

        assert!(!list.add_found(found(1, Some("Phone"), -50)));
        assert!(list.add_found(found(2, None, -80)));
        assert!(!list.add_found(found(2, Some("Watch"), -60)));

        assert_eq!(list.len(), 2);
        let watch = list.get(1).unwrap();
        assert_eq!(watch.device.name.as_deref(), Some("Watch"));
        assert_eq!(watch.rssi, Some(-60));
        // Bonded rows keep their bond state.
        assert_eq!(list.get(0).unwrap().device.bond_state, BondState::Bonded);
    }

    #[test]
    fn test_render_numbers_rows() {
        let mut list = DeviceList::new();
        list.add_found(found(7, Some("Sensor"), -42));

        let lines = list.render();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("  1. Sensor"));
        assert!(lines[0].contains("AA:00:00:00:00:07"));
        assert!(lines[0].contains("Not paired"));
        assert!(lines[0].contains("-42 dBm"));
    }

    #[test]
    fn test_empty_list() {
        let list = DeviceList::new();
        assert!(list.is_empty());
        assert!(list.get(0).is_none());
        assert!(list.render().is_empty());
    }
}
