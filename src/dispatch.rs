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

//! Execution contexts for user-facing callbacks.
//!
//! Background tasks never call user code directly. Every callback is handed
//! to the [`Dispatcher`] supplied when it was registered, which runs it on
//! whatever context the caller chose: inline on the background task, or on
//! a thread that owns an [`EventLoop`].

use std::sync::Arc;
use tracing::warn;

/// A unit of work posted to a dispatcher.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs callbacks on a chosen execution context.
///
/// Implementations must run tasks in the order they were dispatched.
pub trait Dispatcher: Send + Sync + 'static {
    fn dispatch(&self, task: Task);
}

/// Runs every task immediately on the dispatching task.
#[derive(Debug, Default, Clone, Copy)]
pub struct Inline;

impl Dispatcher for Inline {
    fn dispatch(&self, task: Task) {
        task();
    }
}

/// Posts tasks to an [`EventLoop`].
#[derive(Debug, Clone)]
pub struct LoopDispatcher {
    tx: async_channel::Sender<Task>,
}

impl Dispatcher for LoopDispatcher {
    fn dispatch(&self, task: Task) {
        if self.tx.try_send(task).is_err() {
            warn!("Event loop is gone, dropping callback");
        }
    }
}

/// A FIFO queue of callbacks drained by the context that owns it.
///
/// The owner (typically the main task of an application) runs the queued
/// callbacks with [`EventLoop::run_one`], [`EventLoop::run_pending`] or
/// [`EventLoop::run`].
pub struct EventLoop {
    rx: async_channel::Receiver<Task>,
}

impl EventLoop {
    /// Create an event loop and the dispatcher that feeds it.
    pub fn new() -> (Arc<LoopDispatcher>, EventLoop) {
        let (tx, rx) = async_channel::unbounded();
        (Arc::new(LoopDispatcher { tx }), EventLoop { rx })
    }

    /// Wait for the next callback and run it.
    ///
    /// Returns false once every dispatcher has been dropped and the queue is
    /// empty.
    pub async fn run_one(&self) -> bool {
        match self.rx.recv().await {
            Ok(task) => {
                task();
                true
            }
            Err(_) => false,
        }
    }

    /// Run everything queued right now without waiting. Returns the count.
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            count += 1;
        }
        count
    }

    /// Run callbacks until every dispatcher has been dropped.
    pub async fn run(&self) {
        while self.run_one().await {}
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_inline_runs_immediately() {
        let hits = Arc::new(Mutex::new(0));
        let hits_clone = hits.clone();
        Inline.dispatch(Box::new(move || *hits_clone.lock() += 1));
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn test_loop_preserves_order() {
        let (dispatcher, event_loop) = EventLoop::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let seen = seen.clone();
            dispatcher.dispatch(Box::new(move || seen.lock().push(i)));
        }

        // Nothing runs until the owner drains the queue.
        assert!(seen.lock().is_empty());
        assert_eq!(event_loop.pending(), 5);
        assert_eq!(event_loop.run_pending(), 5);
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_run_ends_when_dispatchers_drop() {
        let (dispatcher, event_loop) = EventLoop::new();
        let seen = Arc::new(Mutex::new(0));
        let seen_clone = seen.clone();

        let worker = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher.dispatch(Box::new(move || *seen_clone.lock() += 1));
            })
        };
        worker.await.unwrap();
        drop(dispatcher);

        event_loop.run().await;
        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn test_dispatch_after_loop_dropped_is_ignored() {
        let (dispatcher, event_loop) = EventLoop::new();
        drop(event_loop);
        dispatcher.dispatch(Box::new(|| panic!("must not run")));
    }
}
