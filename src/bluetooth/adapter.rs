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

//! Local adapter control.
//!
//! [`AdapterHandle`] is the entry point of the library: it powers the radio
//! on and off, makes it discoverable, lists bonded devices and builds the
//! scanners, sessions and servers that talk through it.

use async_trait::async_trait;
use bluer::{AdapterEvent, Address};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::connection::{Session, SessionOptions};
use super::constants::MAX_DISCOVERABLE;
use super::device::{Device, DeviceFound};
use super::discovery::{DeviceSource, DiscoveryScanner};
use super::server::BluetoothServer;
use super::transport::{ChannelAcceptor, ChannelConnector, ProfileAcceptor, ProfileConnector};
use crate::error::{Error, Result};

/// Handle to one local Bluetooth adapter. Cloning shares the D-Bus session.
#[derive(Clone)]
pub struct AdapterHandle {
    session: bluer::Session,
    adapter: bluer::Adapter,
}

impl AdapterHandle {
    /// Connect to BlueZ and pick the named adapter, or the default one.
    ///
    /// A missing Bluetooth daemon or adapter is reported as
    /// [`Error::Unsupported`].
    pub async fn open(name: Option<&str>) -> Result<Self> {
        let session = bluer::Session::new()
            .await
            .map_err(|e| Error::Unsupported(format!("failed to reach BlueZ: {}", e)))?;

        let adapter = match name {
            Some(name) => session.adapter(name),
            None => session.default_adapter().await,
        }
        .map_err(|e| Error::Unsupported(format!("no usable adapter: {}", e)))?;

        info!("Using Bluetooth adapter: {}", adapter.name());
        Ok(Self { session, adapter })
    }

    /// The adapter's interface name, e.g. `hci0`.
    pub fn name(&self) -> &str {
        self.adapter.name()
    }

    pub async fn address(&self) -> Result<Address> {
        Ok(self.adapter.address().await?)
    }

    pub async fn is_enabled(&self) -> Result<bool> {
        Ok(self.adapter.is_powered().await?)
    }

    /// Power the adapter on. Returns whether the request was accepted.
    pub async fn enable(&self) -> bool {
        self.set_powered(true).await
    }

    /// Power the adapter off. Returns whether the request was accepted.
    pub async fn disable(&self) -> bool {
        self.set_powered(false).await
    }

    async fn set_powered(&self, powered: bool) -> bool {
        match self.adapter.set_powered(powered).await {
            Ok(()) => {
                info!(
                    "Bluetooth adapter powered {}",
                    if powered { "on" } else { "off" }
                );
                true
            }
            Err(e) => {
                warn!("Failed to set power state: {}", e);
                false
            }
        }
    }

    /// Power the adapter on after asking the user.
    ///
    /// Returns true straight away when the adapter is already on. Otherwise
    /// `consent` is called with the adapter name, and the adapter is powered
    /// on only when it agrees.
    pub async fn request_enable<F>(&self, consent: F) -> Result<bool>
    where
        F: FnOnce(&str) -> bool,
    {
        if self.is_enabled().await? {
            return Ok(true);
        }
        if !consent(self.name()) {
            info!("User declined to enable {}", self.name());
            return Ok(false);
        }
        Ok(self.enable().await)
    }

    /// Make the adapter discoverable for `duration` (1 to 300 seconds).
    pub async fn set_discoverable(&self, duration: Duration) -> Result<()> {
        let secs = validate_discoverable(duration)?;
        self.adapter.set_discoverable_timeout(secs).await?;
        self.adapter.set_discoverable(true).await?;
        info!("Adapter {} discoverable for {}s", self.name(), secs);
        Ok(())
    }

    pub async fn is_discovering(&self) -> Result<bool> {
        Ok(self.adapter.is_discovering().await?)
    }

    /// Snapshot of every device paired with this adapter.
    pub async fn bonded_devices(&self) -> Result<Vec<Device>> {
        let mut bonded = Vec::new();
        for address in self.adapter.device_addresses().await? {
            let device = self.adapter.device(address)?;
            if device.is_paired().await? {
                bonded.push(Device::snapshot(&device).await?);
            }
        }
        debug!("{} bonded devices", bonded.len());
        Ok(bonded)
    }

    /// Change the name remote devices see.
    pub async fn set_alias(&self, alias: &str) -> Result<()> {
        self.adapter.set_alias(alias.to_string()).await?;
        info!("Adapter alias set to '{}'", alias);
        Ok(())
    }

    /// A scanner whose scans run for `duration`.
    pub fn scanner(&self, duration: Duration) -> DiscoveryScanner {
        DiscoveryScanner::new(Arc::new(self.clone()), duration)
    }

    /// A disconnected session to the service `uuid` on `address`.
    ///
    /// With `secure` the link is authenticated and the device is paired
    /// first when needed.
    pub fn client(
        &self,
        address: Address,
        uuid: Uuid,
        secure: bool,
        options: SessionOptions,
    ) -> Session {
        let connector = ProfileConnector::new(
            self.session.clone(),
            self.adapter.clone(),
            address,
            uuid,
            secure,
        );
        Session::new(Arc::new(connector), options)
    }

    /// A disconnected session to a fixed RFCOMM channel on `address`.
    pub fn channel_client(
        &self,
        address: Address,
        channel: u8,
        options: SessionOptions,
    ) -> Session {
        Session::new(Arc::new(ChannelConnector::new(address, channel)), options)
    }

    /// Register the service `uuid` under `name` and listen for it.
    pub async fn server(
        &self,
        name: &str,
        uuid: Uuid,
        secure: bool,
        options: SessionOptions,
    ) -> Result<BluetoothServer> {
        let acceptor = ProfileAcceptor::register(&self.session, name, uuid, secure).await?;
        Ok(BluetoothServer::new(Arc::new(acceptor), options))
    }

    /// Listen on a fixed RFCOMM channel.
    pub async fn channel_server(
        &self,
        channel: u8,
        options: SessionOptions,
    ) -> Result<BluetoothServer> {
        let acceptor = ChannelAcceptor::bind(channel).await?;
        Ok(BluetoothServer::new(Arc::new(acceptor), options))
    }
}

#[async_trait]
impl DeviceSource for AdapterHandle {
    async fn discover(&self) -> Result<BoxStream<'static, DeviceFound>> {
        let adapter = self.adapter.clone();
        let (started_tx, started_rx) = oneshot::channel();
        let (tx, rx) = mpsc::unbounded_channel();

        // BlueZ scans for as long as the event stream lives; the task drops
        // it once the returned stream is dropped.
        tokio::spawn(async move {
            let events = match adapter.discover_devices().await {
                Ok(events) => {
                    let _ = started_tx.send(Ok(()));
                    events
                }
                Err(e) => {
                    let _ = started_tx.send(Err(e));
                    return;
                }
            };
            futures::pin_mut!(events);

            loop {
                let event = tokio::select! {
                    _ = tx.closed() => break,
                    event = events.next() => event,
                };
                let address = match event {
                    Some(AdapterEvent::DeviceAdded(address)) => address,
                    Some(_) => continue,
                    None => break,
                };
                let found = match adapter.device(address) {
                    Ok(device) => DeviceFound::snapshot(&device).await,
                    Err(e) => Err(e.into()),
                };
                match found {
                    Ok(found) => {
                        if tx.send(found).is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!("Skipping {}: {}", address, e),
                }
            }
            debug!("Discovery stream closed");
        });

        started_rx
            .await
            .map_err(|_| Error::closed("discovery"))??;

        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|found| (found, rx))
        })
        .boxed())
    }
}

/// Check a discoverable duration, returning it in whole seconds.
pub fn validate_discoverable(duration: Duration) -> Result<u32> {
    let secs = duration.as_secs();
    if duration.subsec_nanos() != 0 || secs == 0 || secs > MAX_DISCOVERABLE.as_secs() {
        return Err(Error::Argument(format!(
            "discoverable duration must be 1 to {} whole seconds, got {:?}",
            MAX_DISCOVERABLE.as_secs(),
            duration
        )));
    }
    Ok(secs as u32)
}
