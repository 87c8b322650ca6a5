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

//! RFCOMM socket primitives.
//!
//! Sessions and listeners only see the [`Connector`] and [`Acceptor`]
//! traits. BlueZ backs them either through a registered profile (service
//! UUID) or a fixed RFCOMM channel; [`memory`] provides an in-process
//! loopback with the same behaviour.

use async_trait::async_trait;
use bluer::rfcomm::{Listener, Profile, ProfileHandle, ReqError, Role, SocketAddr, Stream};
use bluer::Address;
use futures::StreamExt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;

/// A connected, bidirectional byte channel.
pub trait Channel: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Channel for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedChannel = Box<dyn Channel>;

/// Opens outbound channels to one remote service.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<BoxedChannel>;

    /// The remote device this connector targets.
    fn peer(&self) -> Option<Address> {
        None
    }
}

/// Accepts inbound channels, one per call.
#[async_trait]
pub trait Acceptor: Send + Sync {
    async fn accept(&self) -> Result<(BoxedChannel, Option<Address>)>;
}

fn profile(uuid: Uuid, name: Option<String>, role: Role, secure: bool) -> Profile {
    Profile {
        uuid,
        name,
        role: Some(role),
        require_authentication: Some(secure),
        require_authorization: Some(false),
        auto_connect: Some(false),
        ..Default::default()
    }
}

/// Keeps a profile registered for as long as a channel opened through it.
struct ProfileStream {
    stream: Stream,
    _profile: ProfileHandle,
}

impl AsyncRead for ProfileStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for ProfileStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// Connects to a service UUID on a remote device through a client profile.
pub struct ProfileConnector {
    session: bluer::Session,
    adapter: bluer::Adapter,
    address: Address,
    uuid: Uuid,
    secure: bool,
}

impl ProfileConnector {
    pub fn new(
        session: bluer::Session,
        adapter: bluer::Adapter,
        address: Address,
        uuid: Uuid,
        secure: bool,
    ) -> Self {
        Self {
            session,
            adapter,
            address,
            uuid,
            secure,
        }
    }
}

#[async_trait]
impl Connector for ProfileConnector {
    async fn connect(&self) -> Result<BoxedChannel> {
        let mut handle = self
            .session
            .register_profile(profile(self.uuid, None, Role::Client, self.secure))
            .await?;
        debug!("Client profile registered for {}", self.uuid);

        let device = self.adapter.device(self.address)?;
        if self.secure && !device.is_paired().await? {
            info!("Pairing with {} before connecting", self.address);
            device.pair().await?;
        }

        let connect = device.connect_profile(&self.uuid);
        tokio::pin!(connect);
        let mut requested = false;

        loop {
            tokio::select! {
                res = &mut connect, if !requested => {
                    res?;
                    requested = true;
                }
                req = handle.next() => {
                    let req = req.ok_or_else(|| {
                        io::Error::new(io::ErrorKind::ConnectionAborted, "profile was unregistered")
                    })?;
                    if req.device() != self.address {
                        warn!("Rejecting unexpected connection from {}", req.device());
                        req.reject(ReqError::Rejected);
                        continue;
                    }
                    let stream = req.accept()?;
                    info!("Connected to {} on {}", self.address, self.uuid);
                    return Ok(Box::new(ProfileStream {
                        stream,
                        _profile: handle,
                    }));
                }
            }
        }
    }

    fn peer(&self) -> Option<Address> {
        Some(self.address)
    }
}

/// Connects to a fixed RFCOMM channel, skipping the service lookup.
pub struct ChannelConnector {
    address: Address,
    channel: u8,
}

impl ChannelConnector {
    pub fn new(address: Address, channel: u8) -> Self {
        Self { address, channel }
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self) -> Result<BoxedChannel> {
        let stream = Stream::connect(SocketAddr::new(self.address, self.channel)).await?;
        info!("Connected to {} on channel {}", self.address, self.channel);
        Ok(Box::new(stream))
    }

    fn peer(&self) -> Option<Address> {
        Some(self.address)
    }
}

/// Accepts connections for a service UUID through a server profile.
pub struct ProfileAcceptor {
    handle: Mutex<ProfileHandle>,
}

impl ProfileAcceptor {
    /// Register a server profile. BlueZ publishes the service record.
    pub async fn register(
        session: &bluer::Session,
        name: &str,
        uuid: Uuid,
        secure: bool,
    ) -> Result<Self> {
        let handle = session
            .register_profile(profile(uuid, Some(name.to_string()), Role::Server, secure))
            .await?;
        info!("Service '{}' registered (UUID: {})", name, uuid);
        Ok(Self {
            handle: Mutex::new(handle),
        })
    }
}

#[async_trait]
impl Acceptor for ProfileAcceptor {
    async fn accept(&self) -> Result<(BoxedChannel, Option<Address>)> {
        let mut handle = self.handle.lock().await;
        let req = handle.next().await.ok_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionAborted, "profile was unregistered")
        })?;
        let peer = req.device();
        let stream = req.accept()?;
        Ok((Box::new(stream), Some(peer)))
    }
}

/// Accepts connections on a fixed RFCOMM channel.
pub struct ChannelAcceptor {
    listener: Listener,
}

impl ChannelAcceptor {
    pub async fn bind(channel: u8) -> Result<Self> {
        let local_addr = SocketAddr::new(Address::any(), channel);
        let listener = Listener::bind(local_addr).await?;
        info!("RFCOMM server listening on channel {}", channel);
        Ok(Self { listener })
    }
}

#[async_trait]
impl Acceptor for ChannelAcceptor {
    async fn accept(&self) -> Result<(BoxedChannel, Option<Address>)> {
        let (stream, remote_addr) = self.listener.accept().await?;
        Ok((Box::new(stream), Some(remote_addr.addr)))
    }
}

/// In-process loopback transport.
///
/// Each [`MemoryConnector::connect`] hands one end of a fresh duplex pipe to
/// the paired [`MemoryAcceptor`]. Connecting fails once the acceptor is
/// dropped, and accepting blocks until a connector connects.
pub mod memory {
    use super::*;
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc;

    pub struct MemoryConnector {
        tx: mpsc::UnboundedSender<DuplexStream>,
        buffer_size: usize,
    }

    pub struct MemoryAcceptor {
        rx: Mutex<mpsc::UnboundedReceiver<DuplexStream>>,
    }

    /// Create a connected acceptor/connector pair. `buffer_size` bounds the
    /// bytes in flight in each direction.
    pub fn loopback(buffer_size: usize) -> (MemoryAcceptor, MemoryConnector) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            MemoryAcceptor { rx: Mutex::new(rx) },
            MemoryConnector { tx, buffer_size },
        )
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn connect(&self) -> Result<BoxedChannel> {
            let (local, remote) = tokio::io::duplex(self.buffer_size);
            self.tx.send(remote).map_err(|_| {
                io::Error::new(io::ErrorKind::ConnectionRefused, "no acceptor is listening")
            })?;
            Ok(Box::new(local))
        }
    }

    #[async_trait]
    impl Acceptor for MemoryAcceptor {
        async fn accept(&self) -> Result<(BoxedChannel, Option<Address>)> {
            let mut rx = self.rx.lock().await;
            let stream = rx.recv().await.ok_or_else(|| {
                io::Error::new(io::ErrorKind::ConnectionAborted, "every connector was dropped")
            })?;
            Ok((Box::new(stream), None))
        }
    }
}
