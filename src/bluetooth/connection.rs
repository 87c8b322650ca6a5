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

//! RFCOMM byte sessions.
//!
//! A [`Session`] owns exactly one channel. Clients create it disconnected and
//! call [`Session::connect`]; listeners hand out sessions that are already
//! connected. Writes are awaited directly. Reads run on a background loop
//! that delivers each chunk to the current subscriber through its
//! dispatcher.

use bluer::Address;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::constants::DEFAULT_READ_BUFFER_SIZE;
use super::transport::{BoxedChannel, Connector};
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::state::{reached, ConnectionState, StateCell};

/// Events delivered to a read subscriber.
#[derive(Debug)]
pub enum InputEvent {
    /// A chunk of bytes, in arrival order.
    Data(Vec<u8>),
    /// The channel failed or the remote closed it. Sent once.
    Disconnected(Error),
}

/// Tunables for a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Largest chunk a single read delivers.
    pub read_buffer_size: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

#[derive(Clone)]
struct Subscriber {
    dispatcher: Arc<dyn Dispatcher>,
    callback: Arc<dyn Fn(InputEvent) + Send + Sync>,
}

impl Subscriber {
    fn deliver(&self, event: InputEvent) {
        let callback = self.callback.clone();
        self.dispatcher.dispatch(Box::new(move || callback(event)));
    }
}

struct Shared {
    state: StateCell<ConnectionState>,
    connector: Option<Arc<dyn Connector>>,
    peer: Option<Address>,
    reader: parking_lot::Mutex<Option<ReadHalf<BoxedChannel>>>,
    writer: tokio::sync::Mutex<Option<WriteHalf<BoxedChannel>>>,
    // Single slot; the read loop parks on it while it is empty.
    subscriber: watch::Sender<Option<Subscriber>>,
    options: SessionOptions,
}

/// A byte session over one RFCOMM channel. Cloning shares the session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Create a disconnected client session that opens its channel through
    /// `connector`.
    pub fn new(connector: Arc<dyn Connector>, options: SessionOptions) -> Self {
        let peer = connector.peer();
        Self::build(ConnectionState::Disconnected, Some(connector), peer, None, options)
    }

    /// Wrap a channel a listener has just accepted.
    pub(crate) fn accepted(
        channel: BoxedChannel,
        peer: Option<Address>,
        options: SessionOptions,
    ) -> Self {
        Self::build(ConnectionState::Connected, None, peer, Some(channel), options)
    }

    fn build(
        state: ConnectionState,
        connector: Option<Arc<dyn Connector>>,
        peer: Option<Address>,
        channel: Option<BoxedChannel>,
        options: SessionOptions,
    ) -> Self {
        let (reader, writer) = match channel.map(tokio::io::split) {
            Some((reader, writer)) => (Some(reader), Some(writer)),
            None => (None, None),
        };
        let (subscriber, _) = watch::channel(None);

        Self {
            shared: Arc::new(Shared {
                state: StateCell::new(state),
                connector,
                peer,
                reader: parking_lot::Mutex::new(reader),
                writer: tokio::sync::Mutex::new(writer),
                subscriber,
                options,
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    /// Observe state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Address of the remote device, when the transport knows it.
    pub fn peer(&self) -> Option<Address> {
        self.shared.peer
    }

    /// Connect and wait for the outcome.
    ///
    /// Only allowed while disconnected. On failure the session falls back to
    /// disconnected and may be connected again.
    pub async fn connect(&self) -> Result<()> {
        let connector = self.begin_connect()?;
        self.finish_connect(connector).await
    }

    /// Connect on a background task.
    ///
    /// The state check happens before this returns; afterwards exactly one
    /// outcome is passed to `callback` through `dispatcher`.
    pub fn connect_async<F>(&self, dispatcher: Arc<dyn Dispatcher>, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Session>) + Send + 'static,
    {
        let connector = self.begin_connect()?;
        let session = self.clone();

        tokio::spawn(async move {
            let result = session
                .finish_connect(connector)
                .await
                .map(|()| session.clone());
            dispatcher.dispatch(Box::new(move || callback(result)));
        });

        Ok(())
    }

    fn begin_connect(&self) -> Result<Arc<dyn Connector>> {
        let connector = self
            .shared
            .connector
            .clone()
            .ok_or_else(|| Error::State("accepted sessions cannot reconnect".to_string()))?;

        if !self
            .shared
            .state
            .transition(ConnectionState::Disconnected, ConnectionState::Connecting)
        {
            return Err(Error::State(format!(
                "cannot connect while {}",
                self.state().as_str()
            )));
        }

        debug!("Connecting to {:?}", self.shared.peer);
        Ok(connector)
    }

    async fn finish_connect(&self, connector: Arc<dyn Connector>) -> Result<()> {
        let closed = reached(self.shared.state.subscribe(), ConnectionState::Closed);
        let result = tokio::select! {
            res = connector.connect() => res,
            _ = closed => Err(Error::closed("session")),
        };

        let channel = match result {
            Ok(channel) => channel,
            Err(e) => {
                self.shared
                    .state
                    .transition(ConnectionState::Connecting, ConnectionState::Disconnected);
                warn!("Connect failed: {}", e);
                return Err(e);
            }
        };

        let (reader, writer) = tokio::io::split(channel);
        *self.shared.writer.lock().await = Some(writer);
        *self.shared.reader.lock() = Some(reader);

        if !self
            .shared
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Connected)
        {
            // Shut down while the channel was being installed.
            self.shared.reader.lock().take();
            self.shared.writer.lock().await.take();
            return Err(Error::closed("session"));
        }

        info!("Connected to {:?}", self.shared.peer);

        let subscribed = self.shared.subscriber.borrow().is_some();
        if subscribed {
            self.start_reader();
        }
        Ok(())
    }

    /// Write all of `buf` and flush.
    pub async fn write(&self, buf: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::not_connected());
        }

        let mut writer = self.shared.writer.lock().await;
        let writer = writer.as_mut().ok_or_else(Error::not_connected)?;
        writer.write_all(buf).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Write `len` bytes of `buf` starting at `offset`.
    pub async fn write_range(&self, buf: &[u8], offset: usize, len: usize) -> Result<()> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= buf.len())
            .ok_or_else(|| {
                Error::Argument(format!(
                    "range {}+{} is out of bounds for a buffer of {} bytes",
                    offset,
                    len,
                    buf.len()
                ))
            })?;
        self.write(&buf[offset..end]).await
    }

    /// Register the read subscriber and start the read loop if it is not
    /// running yet.
    ///
    /// A chunk that arrived while nobody was subscribed is delivered first.
    pub fn subscribe<F>(&self, dispatcher: Arc<dyn Dispatcher>, callback: F) -> Result<()>
    where
        F: Fn(InputEvent) + Send + Sync + 'static,
    {
        if !self.is_connected() {
            return Err(Error::State(format!(
                "cannot read while {}",
                self.state().as_str()
            )));
        }

        let mut pending = Some(Subscriber {
            dispatcher,
            callback: Arc::new(callback),
        });
        let installed = self.shared.subscriber.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = pending.take();
                true
            } else {
                false
            }
        });
        if !installed {
            return Err(Error::State(
                "already subscribed, unsubscribe first".to_string(),
            ));
        }

        self.start_reader();
        Ok(())
    }

    /// Stop delivering chunks. The read loop keeps running and parks on the
    /// next chunk. Returns whether a subscriber was registered.
    pub fn unsubscribe(&self) -> bool {
        self.shared.subscriber.send_replace(None).is_some()
    }

    fn start_reader(&self) {
        let reader = self.shared.reader.lock().take();
        if let Some(reader) = reader {
            tokio::spawn(read_loop(self.shared.clone(), reader));
        }
    }

    /// Close the session for good and release the channel.
    pub async fn shutdown(&self) {
        if self.shared.state.replace(ConnectionState::Closed).is_terminal() {
            return;
        }

        self.shared.reader.lock().take();
        // Drop the callback, which may hold a clone of this session.
        self.shared.subscriber.send_replace(None);
        let writer = self.shared.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!("Channel shutdown: {}", e);
            }
        }
        info!("Session with {:?} closed", self.shared.peer);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.shared.peer)
            .field("state", &self.state())
            .finish()
    }
}

async fn read_loop(shared: Arc<Shared>, mut reader: ReadHalf<BoxedChannel>) {
    debug!("Read loop started");

    let mut buf = vec![0u8; shared.options.read_buffer_size.max(1)];
    let mut subscribers = shared.subscriber.subscribe();

    let failure: Error = loop {
        let read = tokio::select! {
            res = reader.read(&mut buf) => res,
            _ = reached(shared.state.subscribe(), ConnectionState::Closed) => {
                debug!("Read loop stopped, session closed");
                return;
            }
        };

        let chunk = match read {
            Ok(0) => {
                break io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by remote")
                    .into()
            }
            Ok(n) => buf[..n].to_vec(),
            Err(e) => break e.into(),
        };

        // Hold the chunk, without reading further, until someone listens.
        let subscriber = tokio::select! {
            res = subscribers.wait_for(|slot| slot.is_some()) => {
                res.ok().and_then(|slot| (*slot).clone())
            }
            _ = reached(shared.state.subscribe(), ConnectionState::Closed) => None,
        };
        let Some(subscriber) = subscriber else {
            debug!("Read loop stopped with a pending chunk of {} bytes", chunk.len());
            return;
        };

        subscriber.deliver(InputEvent::Data(chunk));
    };

    // Release the writer before leaving Connected, so a reconnect cannot
    // install its own writer first and lose it here.
    let writer = shared.writer.lock().await.take();
    if shared
        .state
        .transition(ConnectionState::Connected, ConnectionState::Disconnected)
    {
        warn!("Channel to {:?} failed: {}", shared.peer, failure);
        drop(writer);

        let subscriber = shared.subscriber.borrow().clone();
        if let Some(subscriber) = subscriber {
            subscriber.deliver(InputEvent::Disconnected(failure));
        }
    } else {
        if let Some(mut writer) = writer {
            let _ = writer.shutdown().await;
        }
        debug!("Read loop ended after close: {}", failure);
    }
}
