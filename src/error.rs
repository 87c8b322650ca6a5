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

//! Error types shared by every Bluetooth endpoint.

use std::io;
use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by adapters, scanners, sessions and listeners.
///
/// Nothing is retried: every failure is returned (or delivered to a callback)
/// as-is.
#[derive(Error, Debug)]
pub enum Error {
    /// An identifier, range or duration was invalid.
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// The operation is not allowed in the current state.
    #[error("Invalid state: {0}")]
    State(String),

    /// I/O failure on the underlying channel, including timeouts and closes.
    #[error("Channel error: {source}")]
    Channel {
        #[from]
        source: io::Error,
    },

    /// No Bluetooth stack or adapter is available on this system.
    #[error("Bluetooth is not supported on this system: {0}")]
    Unsupported(String),

    /// Any other error reported by BlueZ.
    #[error("Bluetooth stack error: {source}")]
    Platform {
        #[from]
        source: bluer::Error,
    },
}

impl Error {
    pub(crate) fn not_connected() -> Self {
        io::Error::new(io::ErrorKind::NotConnected, "channel is not connected").into()
    }

    pub(crate) fn closed(what: &str) -> Self {
        io::Error::new(io::ErrorKind::ConnectionAborted, format!("{} was closed", what)).into()
    }

    pub(crate) fn timed_out(what: &str) -> Self {
        io::Error::new(io::ErrorKind::TimedOut, format!("{} timed out", what)).into()
    }

    /// The I/O error kind, for channel errors.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Error::Channel { source } => Some(source.kind()),
            _ => None,
        }
    }

    /// Whether this is a channel timeout (e.g. an accept that saw no peer).
    pub fn is_timeout(&self) -> bool {
        self.io_kind() == Some(io::ErrorKind::TimedOut)
    }

    pub fn is_channel(&self) -> bool {
        matches!(self, Error::Channel { .. })
    }

    pub fn is_state(&self) -> bool {
        matches!(self, Error::State(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_channel_error() {
        let err = Error::timed_out("accept");
        assert!(err.is_channel());
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Channel error: accept timed out");
    }

    #[test]
    fn test_not_connected_kind() {
        let err = Error::not_connected();
        assert_eq!(err.io_kind(), Some(io::ErrorKind::NotConnected));
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_state_error() {
        let err = Error::State("already connected".to_string());
        assert!(err.is_state());
        assert!(err.io_kind().is_none());
    }
}
