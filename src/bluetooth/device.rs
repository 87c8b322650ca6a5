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

//! Remote device snapshots.

use bluer::Address;
use std::fmt;

use crate::error::Result;

/// Pairing state of a remote device.
///
/// BlueZ only exposes whether a device is paired, so snapshots taken from it
/// are `None` or `Bonded`. `Bonding` is for callers that track a pairing
/// they started themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondState {
    None,
    Bonding,
    Bonded,
}

impl BondState {
    /// Map BlueZ's `Paired` property.
    pub fn from_paired(paired: bool) -> Self {
        if paired {
            BondState::Bonded
        } else {
            BondState::None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BondState::None => "Not paired",
            BondState::Bonding => "Pairing...",
            BondState::Bonded => "Paired",
        }
    }
}

/// Immutable snapshot of a remote device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub address: Address,
    pub name: Option<String>,
    pub bond_state: BondState,
}

impl Device {
    pub fn new(address: Address, name: Option<String>, bond_state: BondState) -> Self {
        Self {
            address,
            name,
            bond_state,
        }
    }

    /// Take a snapshot of a device known to BlueZ.
    pub async fn snapshot(device: &bluer::Device) -> Result<Self> {
        let name = device.name().await?;
        let bond_state = BondState::from_paired(device.is_paired().await?);
        Ok(Self::new(device.address(), name, bond_state))
    }

    /// Name to show a user: the device name, or its address when unnamed.
    pub fn display_name(&self) -> String {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.address.to_string(),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.address)
    }
}

/// A device reported by a discovery scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFound {
    pub device: Device,
    /// Signal strength in dBm, when reported.
    pub rssi: Option<i16>,
    /// Class of device bit field, when reported.
    pub class: Option<u32>,
}

impl DeviceFound {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            rssi: None,
            class: None,
        }
    }

    pub async fn snapshot(device: &bluer::Device) -> Result<Self> {
        Ok(Self {
            device: Device::snapshot(device).await?,
            rssi: device.rssi().await?,
            class: device.class().await?,
        })
    }
}
