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

//! Connection and listener state management.

use tokio::sync::watch;

/// Lifecycle of a session.
///
/// Moves forward along `Disconnected -> Connecting -> Connected`, falls back
/// to `Disconnected` when a connect attempt or the channel fails, and ends in
/// `Closed`, which is never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Connected => "Connected",
            ConnectionState::Closed => "Closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == ConnectionState::Closed
    }
}

/// Lifecycle of a listening endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Accepting,
    Closed,
}

impl ListenerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerState::Idle => "Idle",
            ListenerState::Accepting => "Accepting...",
            ListenerState::Closed => "Closed",
        }
    }
}

/// A state value that can be observed and changed atomically.
///
/// Doubles as the close signal for background loops: they wait on
/// [`StateCell::subscribe`] for the terminal state alongside their blocking
/// read or accept.
#[derive(Debug)]
pub(crate) struct StateCell<S> {
    tx: watch::Sender<S>,
}

impl<S: Copy + PartialEq> StateCell<S> {
    pub fn new(initial: S) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn get(&self) -> S {
        *self.tx.borrow()
    }

    /// Move from `from` to `to`. Returns false, leaving the state untouched,
    /// when the current state is not `from`.
    pub fn transition(&self, from: S, to: S) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == from {
                *current = to;
                true
            } else {
                false
            }
        })
    }

    /// Unconditionally set the state, returning the previous one.
    pub fn replace(&self, to: S) -> S {
        self.tx.send_replace(to)
    }

    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.tx.subscribe()
    }
}

/// Resolve once the watched state equals `target` (or the cell is gone).
pub(crate) async fn reached<S: PartialEq>(mut rx: watch::Receiver<S>, target: S) {
    let _ = rx.wait_for(|state| *state == target).await;
}
