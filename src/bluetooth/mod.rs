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

//! Bluetooth communication module.
//!
//! Adapter control, discovery and RFCOMM byte sessions on top of BlueZ.

mod adapter;
mod connection;
pub mod constants;
mod device;
mod discovery;
mod server;
pub mod transport;

pub use adapter::{validate_discoverable, AdapterHandle};
pub use connection::{InputEvent, Session, SessionOptions};
pub use device::{BondState, Device, DeviceFound};
pub use discovery::{DeviceSource, DiscoveryEvent, DiscoveryScanner};
pub use server::BluetoothServer;
