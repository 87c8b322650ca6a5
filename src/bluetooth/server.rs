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

//! Bluetooth RFCOMM server implementation.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::connection::{Session, SessionOptions};
use super::transport::Acceptor;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::state::{reached, ListenerState, StateCell};

struct ServerInner {
    // Released on shutdown so the service record or socket goes away.
    acceptor: Mutex<Option<Arc<dyn Acceptor>>>,
    state: StateCell<ListenerState>,
    options: SessionOptions,
    accept_loop: Mutex<Option<AcceptLoop>>,
}

struct AcceptLoop {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Bluetooth server that accepts incoming connections, one per call.
#[derive(Clone)]
pub struct BluetoothServer {
    inner: Arc<ServerInner>,
}

impl BluetoothServer {
    /// Create a server on top of a bound acceptor.
    pub fn new(acceptor: Arc<dyn Acceptor>, options: SessionOptions) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                acceptor: Mutex::new(Some(acceptor)),
                state: StateCell::new(ListenerState::Idle),
                options,
                accept_loop: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ListenerState {
        self.inner.state.get()
    }

    /// Wait for one peer.
    ///
    /// With a timeout the call fails with a `TimedOut` channel error once it
    /// elapses. Fails with a state error while another accept is running or
    /// after shutdown.
    pub async fn accept(&self, timeout: Option<Duration>) -> Result<Session> {
        self.begin_accept()?;
        let result = accept_once(&self.inner, timeout).await;
        self.inner
            .state
            .transition(ListenerState::Accepting, ListenerState::Idle);
        result
    }

    /// Accept peers on a background task until a failure, shutdown or
    /// [`stop_accepting`](Self::stop_accepting).
    ///
    /// Every accepted session is passed to `callback` through `dispatcher`.
    /// The failure that ends the loop (a timeout, a transport error or the
    /// shutdown) is passed once as well.
    pub fn accept_async<F>(
        &self,
        timeout: Option<Duration>,
        dispatcher: Arc<dyn Dispatcher>,
        callback: F,
    ) -> Result<()>
    where
        F: Fn(Result<Session>) + Send + Sync + 'static,
    {
        self.begin_accept()?;

        let inner = self.inner.clone();
        let callback = Arc::new(callback);
        let (stop, mut stopped) = oneshot::channel();
        let task = tokio::spawn(async move {
            info!("Waiting for connections...");
            loop {
                // A session is produced and dispatched within one poll, so
                // stopping never drops an accepted peer.
                let result = tokio::select! {
                    biased;
                    _ = &mut stopped => break,
                    result = accept_once(&inner, timeout) => result,
                };
                match result {
                    Ok(session) => {
                        let callback = callback.clone();
                        dispatcher.dispatch(Box::new(move || callback(Ok(session))));
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                        inner
                            .state
                            .transition(ListenerState::Accepting, ListenerState::Idle);
                        dispatcher.dispatch(Box::new(move || callback(Err(e))));
                        break;
                    }
                }
            }
        });

        *self.inner.accept_loop.lock() = Some(AcceptLoop { stop, task });
        Ok(())
    }

    /// End a running accept loop without closing the server. Returns whether
    /// a loop was running.
    ///
    /// The loop finishes its current step first: a peer accepted before the
    /// stop is still handed to the callback. No failure is delivered for a
    /// stopped loop.
    pub fn stop_accepting(&self) -> bool {
        let accept_loop = self.inner.accept_loop.lock().take();
        match accept_loop {
            Some(accept_loop) if !accept_loop.task.is_finished() => {
                let _ = accept_loop.stop.send(());
                self.inner
                    .state
                    .transition(ListenerState::Accepting, ListenerState::Idle);
                info!("Accept loop stopped");
                true
            }
            _ => false,
        }
    }

    /// Close the server for good and release the listening socket or
    /// service record. A running accept fails with a channel error.
    pub fn shutdown(&self) {
        if self.inner.state.replace(ListenerState::Closed) != ListenerState::Closed {
            self.inner.acceptor.lock().take();
            info!("Bluetooth server shut down");
        }
    }

    fn begin_accept(&self) -> Result<()> {
        if self
            .inner
            .state
            .transition(ListenerState::Idle, ListenerState::Accepting)
        {
            Ok(())
        } else {
            Err(Error::State(format!(
                "server is {}",
                self.state().as_str().to_lowercase()
            )))
        }
    }
}

async fn accept_once(inner: &ServerInner, timeout: Option<Duration>) -> Result<Session> {
    let acceptor = inner
        .acceptor
        .lock()
        .clone()
        .ok_or_else(|| Error::closed("server"))?;
    let closed = reached(inner.state.subscribe(), ListenerState::Closed);
    let accept = async {
        tokio::select! {
            res = acceptor.accept() => res,
            _ = closed => Err(Error::closed("server")),
        }
    };

    let (channel, peer) = match timeout {
        Some(limit) => tokio::time::timeout(limit, accept)
            .await
            .map_err(|_| Error::timed_out("accept"))??,
        None => accept.await?,
    };

    info!("Connection from: {:?}", peer);
    debug!("Handing out session for {:?}", peer);
    Ok(Session::accepted(channel, peer, inner.options.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::transport::memory::{loopback, MemoryConnector};
    use crate::bluetooth::transport::Connector;
    use crate::dispatch::{EventLoop, Inline};
    use crate::state::ConnectionState;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(2);

    fn server() -> (BluetoothServer, MemoryConnector) {
        let (acceptor, connector) = loopback(1024);
        (
            BluetoothServer::new(Arc::new(acceptor), SessionOptions::default()),
            connector,
        )
    }

    #[tokio::test]
    async fn test_accept_returns_connected_session() {
        let (server, connector) = server();

        let mut client = connector.connect().await.unwrap();
        let session = server.accept(Some(WAIT)).await.unwrap();
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(server.state(), ListenerState::Idle);

        session.write(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[tokio::test]
    async fn test_accept_times_out_without_peer() {
        let (server, _connector) = server();

        let started = Instant::now();
        let err = server
            .accept(Some(Duration::from_millis(1000)))
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(err.is_timeout());
        assert!(elapsed >= Duration::from_millis(1000));
        assert!(elapsed < Duration::from_millis(1500));
        assert_eq!(server.state(), ListenerState::Idle);
    }

    #[tokio::test]
    async fn test_accept_while_accepting_is_state_error() {
        let (server, _connector) = server();
        let background = server.clone();
        let pending = tokio::spawn(async move { background.accept(None).await });

        while server.state() != ListenerState::Accepting {
            tokio::task::yield_now().await;
        }
        assert!(server.accept(None).await.unwrap_err().is_state());

        server.shutdown();
        let err = tokio::time::timeout(WAIT, pending)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(err.is_channel());
    }

    #[tokio::test]
    async fn test_accept_after_shutdown_fails() {
        let (server, _connector) = server();
        server.shutdown();

        assert!(server.accept(None).await.unwrap_err().is_state());
        assert!(server
            .accept_async(None, Arc::new(Inline), |_| {})
            .unwrap_err()
            .is_state());
        assert_eq!(server.state(), ListenerState::Closed);
    }

    #[tokio::test]
    async fn test_accept_loop_delivers_every_peer() {
        let (server, connector) = server();
        let (dispatcher, event_loop) = EventLoop::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        server
            .accept_async(None, dispatcher, move |result| {
                let _ = tx.send(result);
            })
            .unwrap();

        let mut clients = Vec::new();
        for _ in 0..3 {
            clients.push(connector.connect().await.unwrap());
        }

        for i in 0..3u8 {
            assert!(tokio::time::timeout(WAIT, event_loop.run_one()).await.unwrap());
            let session = rx.try_recv().unwrap().unwrap();
            session.write(&[i]).await.unwrap();
        }
        assert_eq!(server.state(), ListenerState::Accepting);

        for (i, client) in clients.iter_mut().enumerate() {
            let mut buf = [0u8; 1];
            client.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf[0], i as u8);
        }
    }

    #[tokio::test]
    async fn test_shutdown_ends_accept_loop_with_failure() {
        let (server, _connector) = server();
        let (tx, mut rx) = mpsc::unbounded_channel();

        server
            .accept_async(None, Arc::new(Inline), move |result| {
                let _ = tx.send(result.map(|_| ()));
            })
            .unwrap();

        server.shutdown();

        let result = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert!(result.unwrap_err().is_channel());
        assert_eq!(server.state(), ListenerState::Closed);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_accept_loop_ends_on_timeout() {
        let (server, _connector) = server();
        let (tx, mut rx) = mpsc::unbounded_channel();

        server
            .accept_async(
                Some(Duration::from_millis(100)),
                Arc::new(Inline),
                move |result| {
                    let _ = tx.send(result.map(|_| ()));
                },
            )
            .unwrap();

        let result = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert!(result.unwrap_err().is_timeout());
        assert_eq!(server.state(), ListenerState::Idle);
    }

    #[tokio::test]
    async fn test_stop_accepting_allows_restart() {
        let (server, connector) = server();

        server
            .accept_async(None, Arc::new(Inline), |_| panic!("no peer connected"))
            .unwrap();
        assert!(server.stop_accepting());
        assert!(!server.stop_accepting());
        assert_eq!(server.state(), ListenerState::Idle);

        let mut client = connector.connect().await.unwrap();
        let session = server.accept(Some(WAIT)).await.unwrap();
        client.write_all(b"ok").await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        session
            .subscribe(Arc::new(Inline), move |event| {
                let _ = tx.send(event);
            })
            .unwrap();
        assert!(tokio::time::timeout(WAIT, rx.recv()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_shutdown_releases_listener() {
        let (server, connector) = server();
        server.shutdown();

        let err = connector.connect().await.err().unwrap();
        assert_eq!(err.io_kind(), Some(std::io::ErrorKind::ConnectionRefused));
    }

    #[tokio::test]
    async fn test_shutdown_during_accept_releases_listener() {
        let (server, connector) = server();
        let background = server.clone();
        let pending = tokio::spawn(async move { background.accept(None).await });
        while server.state() != ListenerState::Accepting {
            tokio::task::yield_now().await;
        }

        server.shutdown();
        let err = tokio::time::timeout(WAIT, pending)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(err.is_channel());
        assert!(connector.connect().await.is_err());
    }

    #[tokio::test]
    async fn test_stop_accepting_keeps_delivered_peer() {
        let (server, connector) = server();
        let (tx, mut rx) = mpsc::unbounded_channel();

        server
            .accept_async(None, Arc::new(Inline), move |result| {
                let _ = tx.send(result.is_ok());
            })
            .unwrap();
        let _client = connector.connect().await.unwrap();
        assert!(tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap());

        assert!(server.stop_accepting());
        // The loop exits on its own and drops the callback.
        assert!(tokio::time::timeout(WAIT, rx.recv()).await.unwrap().is_none());
        assert_eq!(server.state(), ListenerState::Idle);
    }
}
