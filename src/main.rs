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

//! Bluelink terminal demo.

use anyhow::{bail, Context, Result};
use bluer::Address;
use clap::{Parser, Subcommand, ValueEnum};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bluelink::config::Config;
use bluelink::dispatch::LoopDispatcher;
use bluelink::ui::{prompt, DeviceList};
use bluelink::{
    AdapterHandle, BluetoothServer, DiscoveryEvent, EventLoop, InputEvent, ListenerState, Session,
};

#[derive(Parser)]
#[command(name = "bluelink", version, about = "Bluetooth RFCOMM toolbox")]
struct Cli {
    /// Adapter to use instead of the configured or default one.
    #[arg(short, long)]
    adapter: Option<String>,

    /// Configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the adapter state.
    Status,
    /// Power the adapter on or off.
    Power {
        #[arg(value_enum)]
        state: Power,
    },
    /// Make the adapter visible to other devices.
    Discoverable {
        /// Seconds, 1 to 300. Defaults to the configured value.
        secs: Option<u64>,
    },
    /// List paired devices.
    Paired,
    /// Scan for nearby devices.
    Scan,
    /// Connect to a device and exchange lines with it.
    Connect {
        /// Remote address. Scan and pick when omitted.
        address: Option<String>,
        /// Connect to a fixed RFCOMM channel instead of the service UUID.
        /// Without a value the configured channel is used.
        #[arg(long, num_args = 0..=1)]
        channel: Option<Option<u8>>,
    },
    /// Accept connections and echo what every peer sends.
    Listen {
        /// Listen on a fixed RFCOMM channel instead of registering the service.
        /// Without a value the configured channel is used.
        #[arg(long, num_args = 0..=1)]
        channel: Option<Option<u8>>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Power {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bluelink=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    info!("Configuration loaded");

    let adapter_name = cli.adapter.as_deref().or(config.bluetooth.adapter.as_deref());
    let adapter = AdapterHandle::open(adapter_name).await?;

    let (dispatcher, event_loop) = EventLoop::new();

    match cli.command {
        Command::Status => status(&adapter).await,
        Command::Power { state } => {
            let done = match state {
                Power::On => adapter.enable().await,
                Power::Off => adapter.disable().await,
            };
            if !done {
                bail!("adapter {} refused the power change", adapter.name());
            }
            Ok(())
        }
        Command::Discoverable { secs } => {
            let duration = match secs {
                Some(secs) => std::time::Duration::from_secs(secs),
                None => config.discoverable_timeout(),
            };
            ensure_enabled(&adapter).await?;
            adapter.set_alias(&config.bluetooth.alias).await?;
            adapter.set_discoverable(duration).await?;
            println!(
                "Visible as '{}' for {}s",
                config.bluetooth.alias,
                duration.as_secs()
            );
            Ok(())
        }
        Command::Paired => {
            let mut list = DeviceList::new();
            list.add_bonded(adapter.bonded_devices().await?);
            print_list(&list);
            Ok(())
        }
        Command::Scan => {
            ensure_enabled(&adapter).await?;
            let list = scan(&adapter, &config, &dispatcher, &event_loop).await?;
            print_list(&list);
            Ok(())
        }
        Command::Connect { address, channel } => {
            ensure_enabled(&adapter).await?;
            let address = match address {
                Some(address) => address
                    .parse::<Address>()
                    .with_context(|| format!("invalid address '{}'", address))?,
                None => {
                    let list = scan(&adapter, &config, &dispatcher, &event_loop).await?;
                    if list.is_empty() {
                        bail!("no devices found");
                    }
                    print_list(&list);
                    let picked = prompt::pick(list.len())?.and_then(|i| list.get(i));
                    match picked {
                        Some(entry) => entry.device.address,
                        None => return Ok(()),
                    }
                }
            };
            let session = match channel.map(|c| config.rfcomm_channel(c)) {
                Some(channel) => {
                    adapter.channel_client(address, channel, config.session_options())
                }
                None => adapter.client(
                    address,
                    config.service_uuid(),
                    config.bluetooth.secure,
                    config.session_options(),
                ),
            };
            chat(session, &dispatcher, &event_loop).await
        }
        Command::Listen { channel } => {
            ensure_enabled(&adapter).await?;
            let server = match channel.map(|c| config.rfcomm_channel(c)) {
                Some(channel) => {
                    adapter
                        .channel_server(channel, config.session_options())
                        .await?
                }
                None => {
                    adapter
                        .server(
                            &config.bluetooth.service_name,
                            config.service_uuid(),
                            config.bluetooth.secure,
                            config.session_options(),
                        )
                        .await?
                }
            };
            listen(server, &config, &dispatcher, &event_loop).await
        }
    }
}

async fn status(adapter: &AdapterHandle) -> Result<()> {
    println!("Adapter:     {}", adapter.name());
    println!("Address:     {}", adapter.address().await?);
    println!("Enabled:     {}", adapter.is_enabled().await?);
    println!("Discovering: {}", adapter.is_discovering().await?);
    Ok(())
}

async fn ensure_enabled(adapter: &AdapterHandle) -> Result<()> {
    let enabled = adapter
        .request_enable(|name| {
            prompt::confirm(&format!("Bluetooth adapter {} is off. Turn it on?", name))
        })
        .await?;
    if !enabled {
        bail!("Bluetooth is off");
    }
    Ok(())
}

fn print_list(list: &DeviceList) {
    if list.is_empty() {
        println!("No devices.");
    }
    for line in list.render() {
        println!("{}", line);
    }
}

/// Bonded devices plus everything one scan finds.
async fn scan(
    adapter: &AdapterHandle,
    config: &Config,
    dispatcher: &Arc<LoopDispatcher>,
    event_loop: &EventLoop,
) -> Result<DeviceList> {
    let mut seeded = DeviceList::new();
    seeded.add_bonded(adapter.bonded_devices().await?);
    let list = Arc::new(Mutex::new(seeded));

    let done = Arc::new(AtomicBool::new(false));
    let scanner = adapter.scanner(config.scan_duration());
    let started = {
        let list = list.clone();
        let done = done.clone();
        scanner.start(dispatcher.clone(), move |event| match event {
            DiscoveryEvent::Started => println!("Scanning..."),
            DiscoveryEvent::DeviceFound(found) => {
                println!("  found {}", found.device);
                list.lock().add_found(found);
            }
            DiscoveryEvent::Finished => {
                println!("Scan finished");
                done.store(true, Ordering::SeqCst);
            }
            DiscoveryEvent::Canceled => {
                println!("Scan canceled");
                done.store(true, Ordering::SeqCst);
            }
        })
    };
    if !started {
        bail!("a scan is already running");
    }

    while !done.load(Ordering::SeqCst) {
        tokio::select! {
            _ = event_loop.run_one() => {}
            _ = tokio::signal::ctrl_c() => {
                scanner.stop();
            }
        }
    }

    let list = std::mem::take(&mut *list.lock());
    Ok(list)
}

/// Connect, then send stdin lines and print whatever arrives.
async fn chat(
    session: Session,
    dispatcher: &Arc<LoopDispatcher>,
    event_loop: &EventLoop,
) -> Result<()> {
    let outcome = Arc::new(Mutex::new(None));
    {
        let outcome = outcome.clone();
        session.connect_async(dispatcher.clone(), move |result| {
            *outcome.lock() = Some(result);
        })?;
    }
    println!("Connecting to {:?}...", session.peer());

    let connected = loop {
        tokio::select! {
            _ = event_loop.run_one() => {}
            _ = tokio::signal::ctrl_c() => {
                session.shutdown().await;
                return Ok(());
            }
        }
        if let Some(result) = outcome.lock().take() {
            break result;
        }
    };
    let session = connected.context("connection failed")?;
    println!("Connected. Type lines to send, Ctrl-C to quit.");

    session.subscribe(dispatcher.clone(), |event| match event {
        InputEvent::Data(bytes) => println!("< {}", String::from_utf8_lossy(&bytes).trim_end()),
        InputEvent::Disconnected(e) => println!("Disconnected: {}", e),
    })?;

    let mut state = session.watch_state();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = event_loop.run_one() => {}
            line = lines.next_line() => match line? {
                Some(line) => session.write(format!("{}\n", line).as_bytes()).await?,
                None => break,
            },
            changed = state.changed() => {
                if changed.is_err() || !session.is_connected() {
                    event_loop.run_pending();
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.shutdown().await;
    info!("Chat ended");
    Ok(())
}

/// Accept peers until Ctrl-C or the accept loop fails, echoing every chunk.
async fn listen(
    server: BluetoothServer,
    config: &Config,
    dispatcher: &Arc<LoopDispatcher>,
    event_loop: &EventLoop,
) -> Result<()> {
    let peers: Peers = Arc::new(Mutex::new(HashMap::new()));
    {
        let peers = peers.clone();
        let echo_dispatcher = dispatcher.clone();
        let next_id = AtomicU64::new(0);
        server.accept_async(config.accept_timeout(), dispatcher.clone(), move |result| {
            match result {
                Ok(session) => {
                    println!("Peer connected: {:?}", session.peer());
                    let id = next_id.fetch_add(1, Ordering::Relaxed);
                    echo_peer(session, id, peers.clone(), echo_dispatcher.clone());
                }
                Err(e) => error!("Stopped accepting: {}", e),
            }
        })?;
    }
    println!("Listening. Ctrl-C to stop.");

    while server.state() == ListenerState::Accepting {
        tokio::select! {
            _ = event_loop.run_one() => {}
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    server.shutdown();
    let sessions: Vec<Session> = peers.lock().drain().map(|(_, session)| session).collect();
    for session in sessions {
        session.shutdown().await;
    }
    event_loop.run_pending();
    info!("Listener stopped");
    Ok(())
}

type Peers = Arc<Mutex<HashMap<u64, Session>>>;

/// Echo every chunk back to the peer until it leaves.
fn echo_peer(session: Session, id: u64, peers: Peers, dispatcher: Arc<LoopDispatcher>) {
    // One writer per peer keeps echoes in arrival order.
    let (echo_tx, mut echo_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let writer = session.clone();
    tokio::spawn(async move {
        while let Some(bytes) = echo_rx.recv().await {
            if let Err(e) = writer.write(&bytes).await {
                warn!("Echo failed: {}", e);
                break;
            }
        }
    });

    let peer = session.clone();
    let registry = peers.clone();
    let subscribed = session.subscribe(dispatcher, move |event| match event {
        InputEvent::Data(bytes) => {
            let _ = echo_tx.send(bytes);
        }
        InputEvent::Disconnected(e) => {
            println!("Peer {:?} left: {}", peer.peer(), e);
            registry.lock().remove(&id);
            // Dropping the subscription ends the writer task.
            let peer = peer.clone();
            tokio::spawn(async move { peer.shutdown().await });
        }
    });

    match subscribed {
        Ok(()) => {
            peers.lock().insert(id, session);
        }
        Err(e) => warn!("Could not read from peer: {}", e),
    }
}
