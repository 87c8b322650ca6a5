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

//! Time-bounded device discovery.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::device::DeviceFound;
use crate::dispatch::Dispatcher;
use crate::error::Result;

/// Events emitted by a scan.
///
/// Every scan emits `Started`, any number of `DeviceFound`, then exactly one
/// of `Finished` or `Canceled`.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    Started,
    DeviceFound(DeviceFound),
    Finished,
    Canceled,
}

/// Something that can report nearby devices.
#[async_trait]
pub trait DeviceSource: Send + Sync {
    /// Start the platform scan. It runs until the stream is dropped.
    async fn discover(&self) -> Result<BoxStream<'static, DeviceFound>>;
}

#[derive(Clone)]
struct ScanListener {
    dispatcher: Arc<dyn Dispatcher>,
    callback: Arc<dyn Fn(DiscoveryEvent) + Send + Sync>,
}

impl ScanListener {
    fn emit(&self, event: DiscoveryEvent) {
        let callback = self.callback.clone();
        self.dispatcher.dispatch(Box::new(move || callback(event)));
    }
}

struct ActiveScan {
    id: u64,
    listener: ScanListener,
    task: Option<JoinHandle<()>>,
}

/// Runs one scan at a time against a [`DeviceSource`].
pub struct DiscoveryScanner {
    source: Arc<dyn DeviceSource>,
    duration: Duration,
    active: Arc<Mutex<Option<ActiveScan>>>,
    next_id: AtomicU64,
}

impl DiscoveryScanner {
    /// `duration` bounds how long each scan runs.
    pub fn new(source: Arc<dyn DeviceSource>, duration: Duration) -> Self {
        Self {
            source,
            duration,
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Start a scan, delivering events to `callback` through `dispatcher`.
    ///
    /// Returns false, without side effects, while a scan is already running.
    pub fn start<F>(&self, dispatcher: Arc<dyn Dispatcher>, callback: F) -> bool
    where
        F: Fn(DiscoveryEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let listener = ScanListener {
            dispatcher,
            callback: Arc::new(callback),
        };

        {
            let mut active = self.active.lock();
            if active.is_some() {
                debug!("Scan already running");
                return false;
            }
            *active = Some(ActiveScan {
                id,
                listener: listener.clone(),
                task: None,
            });
        }

        listener.emit(DiscoveryEvent::Started);
        info!("Starting discovery for {:?}", self.duration);

        let task = tokio::spawn(run_scan(
            id,
            self.source.clone(),
            self.duration,
            listener,
            self.active.clone(),
        ));

        let mut active = self.active.lock();
        match active.as_mut() {
            Some(scan) if scan.id == id => scan.task = Some(task),
            // Stopped from the Started callback.
            _ => task.abort(),
        }
        true
    }

    /// Cancel the running scan and emit `Canceled`. Returns false when no
    /// scan was running.
    pub fn stop(&self) -> bool {
        let scan = self.active.lock().take();
        match scan {
            Some(scan) => {
                if let Some(task) = scan.task {
                    task.abort();
                }
                info!("Discovery canceled");
                scan.listener.emit(DiscoveryEvent::Canceled);
                true
            }
            None => false,
        }
    }
}

impl Drop for DiscoveryScanner {
    fn drop(&mut self) {
        let scan = self.active.lock().take();
        if let Some(task) = scan.and_then(|scan| scan.task) {
            task.abort();
        }
    }
}

async fn run_scan(
    id: u64,
    source: Arc<dyn DeviceSource>,
    duration: Duration,
    listener: ScanListener,
    active: Arc<Mutex<Option<ActiveScan>>>,
) {
    match source.discover().await {
        Ok(stream) => {
            let found = stream.for_each(|device| {
                debug!("Found {}", device.device);
                listener.emit(DiscoveryEvent::DeviceFound(device));
                futures::future::ready(())
            });
            if tokio::time::timeout(duration, found).await.is_err() {
                debug!("Discovery window elapsed");
            }
        }
        Err(e) => warn!("Failed to start discovery: {}", e),
    }

    // Whoever takes the slot emits the terminal event.
    let finished = {
        let mut slot = active.lock();
        match slot.as_ref() {
            Some(scan) if scan.id == id => slot.take(),
            _ => None,
        }
    };
    if let Some(scan) = finished {
        info!("Discovery finished");
        scan.listener.emit(DiscoveryEvent::Finished);
    }
}
