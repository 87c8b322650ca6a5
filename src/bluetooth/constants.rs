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

//! RFCOMM service UUIDs and endpoint defaults.

use std::time::Duration;
use uuid::Uuid;

/// Service UUID for authenticated, encrypted channels.
pub const SERVICE_UUID_SECURE: Uuid = Uuid::from_u128(0xfa87c0d0_afac_11de_8a39_0800200c9a66);

/// Service UUID for channels that skip authentication.
pub const SERVICE_UUID_INSECURE: Uuid = Uuid::from_u128(0x8ce255c0_200a_11e0_ac64_0800200c9a66);

/// Default service UUID for the given security mode.
pub fn default_service_uuid(secure: bool) -> Uuid {
    if secure {
        SERVICE_UUID_SECURE
    } else {
        SERVICE_UUID_INSECURE
    }
}

/// Upper bound for a temporary discoverable window.
pub const MAX_DISCOVERABLE: Duration = Duration::from_secs(300);

/// Default discoverable window.
pub const DEFAULT_DISCOVERABLE: Duration = Duration::from_secs(120);

/// Length of a classic inquiry scan.
pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(12);

/// Size of the buffer each read loop iteration fills.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// RFCOMM channel used when listening without a service record.
pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;
