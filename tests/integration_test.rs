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

//! End-to-end client/server flow over the in-memory transport.

use bluelink::bluetooth::transport::memory::loopback;
use bluelink::{
    BluetoothServer, ConnectionState, EventLoop, Inline, InputEvent, ListenerState, Session,
    SessionOptions,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(2);

fn pair() -> (BluetoothServer, Session) {
    let (acceptor, connector) = loopback(4096);
    let server = BluetoothServer::new(Arc::new(acceptor), SessionOptions::default());
    let client = Session::new(Arc::new(connector), SessionOptions::default());
    (server, client)
}

fn collect(session: &Session) -> mpsc::UnboundedReceiver<InputEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    session
        .subscribe(Arc::new(Inline), move |event| {
            let _ = tx.send(event);
        })
        .unwrap();
    rx
}

async fn read_exactly(rx: &mut mpsc::UnboundedReceiver<InputEvent>, len: usize) -> Vec<u8> {
    let mut received = Vec::new();
    while received.len() < len {
        match tokio::time::timeout(WAIT, rx.recv()).await.unwrap() {
            Some(InputEvent::Data(chunk)) => received.extend(chunk),
            other => panic!("expected data, got {:?}", other),
        }
    }
    received
}

#[tokio::test]
async fn test_client_and_server_exchange_bytes() {
    let (server, client) = pair();

    let accepting = {
        let server = server.clone();
        tokio::spawn(async move { server.accept(Some(WAIT)).await })
    };
    client.connect().await.unwrap();
    let remote = accepting.await.unwrap().unwrap();

    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(remote.state(), ConnectionState::Connected);

    let mut at_server = collect(&remote);
    let mut at_client = collect(&client);

    client.write(b"hello server").await.unwrap();
    assert_eq!(read_exactly(&mut at_server, 12).await, b"hello server");

    remote.write(b"hello client").await.unwrap();
    assert_eq!(read_exactly(&mut at_client, 12).await, b"hello client");
}

#[tokio::test]
async fn test_client_shutdown_disconnects_server_side() {
    let (server, client) = pair();
    client.connect().await.unwrap();
    let remote = server.accept(Some(WAIT)).await.unwrap();
    let mut at_server = collect(&remote);

    client.shutdown().await;
    assert_eq!(client.state(), ConnectionState::Closed);

    match tokio::time::timeout(WAIT, at_server.recv()).await.unwrap() {
        Some(InputEvent::Disconnected(err)) => assert!(err.is_channel()),
        other => panic!("expected disconnect, got {:?}", other),
    }
    assert_eq!(remote.state(), ConnectionState::Disconnected);
    assert!(remote.connect().await.unwrap_err().is_state());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_echo_server_keeps_chunk_order() {
    let (server, client) = pair();
    let (dispatcher, event_loop) = EventLoop::new();

    let echo_dispatcher = dispatcher.clone();
    server
        .accept_async(None, dispatcher, move |result| {
            let session = result.unwrap();
            let (echo_tx, mut echo_rx) = mpsc::unbounded_channel::<Vec<u8>>();
            let writer = session.clone();
            tokio::spawn(async move {
                while let Some(bytes) = echo_rx.recv().await {
                    writer.write(&bytes).await.unwrap();
                }
            });
            session
                .subscribe(echo_dispatcher.clone(), move |event| {
                    if let InputEvent::Data(bytes) = event {
                        let _ = echo_tx.send(bytes);
                    }
                })
                .unwrap();
        })
        .unwrap();

    client.connect().await.unwrap();
    let mut at_client = collect(&client);

    let mut expected = Vec::new();
    for i in 0..50u8 {
        let chunk = vec![i; (i as usize % 5) + 1];
        client.write(&chunk).await.unwrap();
        expected.extend(chunk);
    }

    // Accept and every echo callback run on the loop.
    let read = read_exactly(&mut at_client, expected.len());
    tokio::pin!(read);
    let echoed = loop {
        tokio::select! {
            _ = event_loop.run_one() => {}
            data = &mut read => break data,
        }
    };
    assert_eq!(echoed, expected);

    assert!(server.stop_accepting());
    assert_eq!(server.state(), ListenerState::Idle);
}

#[tokio::test]
async fn test_server_shutdown_rejects_new_accepts() {
    let (server, _client) = pair();
    server.shutdown();

    assert_eq!(server.state(), ListenerState::Closed);
    assert!(server.accept(None).await.unwrap_err().is_state());
}
