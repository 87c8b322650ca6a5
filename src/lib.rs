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

//! Bluetooth convenience layer over BlueZ.
//!
//! Open an [`AdapterHandle`], scan with a [`DiscoveryScanner`], then talk
//! to a remote device through a [`Session`], either as a client or as one
//! handed out by a [`BluetoothServer`]. Callbacks are delivered through a
//! [`Dispatcher`](dispatch::Dispatcher) chosen by the caller.

pub mod bluetooth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod state;
pub mod ui;

pub use bluetooth::{
    AdapterHandle, BluetoothServer, BondState, Device, DeviceFound, DiscoveryEvent,
    DiscoveryScanner, InputEvent, Session, SessionOptions,
};
pub use dispatch::{Dispatcher, EventLoop, Inline};
pub use error::{Error, Result};
pub use state::{ConnectionState, ListenerState};
