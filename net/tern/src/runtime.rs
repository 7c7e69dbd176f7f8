// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The centralized IO runtime.
//!
//! One worker pool per process hosts every driver loop (acceptors, session
//! IO, timers). Drivers are registered under a label, signalled to stop
//! cooperatively, and awaited during an orderly drain so their captured
//! resources are released before the runtime itself shuts down.

use crate::error::{Error, ErrorKind};
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};
use tokio::{
    runtime::{Builder, Handle, Runtime},
    sync::watch,
};
use tracing::{debug, warn};

/// Ceiling on [`ReactorManager::wait_all`]
const WAIT_ALL_CEILING: Duration = Duration::from_secs(10);

/// Cooperative stop signal handed to every registered driver
#[derive(Clone)]
pub struct StopSignal {
    receiver: watch::Receiver<bool>,
}

impl StopSignal {
    /// Resolves when the driver is asked to stop
    pub async fn stopped(&mut self) {
        while !*self.receiver.borrow() {
            if self.receiver.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.receiver.borrow()
    }
}

struct Entry {
    stop: watch::Sender<bool>,
    done: Arc<AtomicBool>,
}

/// Resolves when a registered driver's run loop returns
pub struct CompletionHandle {
    label: String,
    handle: tokio::task::JoinHandle<Result<(), Error>>,
}

impl CompletionHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Waits for the driver to finish; panics inside the driver surface as
    /// `InternalError`
    pub async fn wait(self) -> Result<(), Error> {
        match self.handle.await {
            Ok(result) => result,
            Err(join_error) => Err(Error::new(
                ErrorKind::InternalError,
                "runtime.wait",
                join_error.to_string(),
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ManagerMetrics {
    pub active: usize,
    pub started: u64,
    pub completed: u64,
}

pub struct ReactorManager {
    runtime: Option<Runtime>,
    entries: Mutex<HashMap<String, Entry>>,
    started: AtomicU64,
    completed: Arc<AtomicU64>,
}

impl ReactorManager {
    /// Builds the shared worker pool, sized `max(32, 4 × parallelism)`
    pub fn new() -> Result<Self, Error> {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let workers = 32.max(parallelism * 4);

        let runtime = Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name("tern-io")
            .enable_io()
            .enable_time()
            .build()
            .map_err(|error| {
                Error::new(ErrorKind::InternalError, "runtime.build", error.to_string())
            })?;

        debug!(workers, "reactor manager started");
        Ok(Self {
            runtime: Some(runtime),
            entries: Mutex::new(HashMap::new()),
            started: AtomicU64::new(0),
            completed: Arc::new(AtomicU64::new(0)),
        })
    }

    /// The shared runtime handle; sessions spawn their IO tasks here
    pub fn handle(&self) -> Handle {
        self.runtime
            .as_ref()
            .expect("runtime exists until drop")
            .handle()
            .clone()
    }

    /// Submits a driver's run loop under `label` and returns its
    /// completion handle. A second registration under the same label
    /// replaces the stop entry of the first.
    pub fn register<F, Fut>(&self, label: &str, driver: F) -> CompletionHandle
    where
        F: FnOnce(StopSignal) -> Fut,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let done = Arc::new(AtomicBool::new(false));

        self.started.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().unwrap().insert(
            label.to_string(),
            Entry {
                stop: stop_tx,
                done: done.clone(),
            },
        );

        let future = driver(StopSignal { receiver: stop_rx });
        let completed = self.completed.clone();
        let task_label = label.to_string();

        let handle = self.handle().spawn(async move {
            let result = future.await;
            if let Err(error) = &result {
                warn!(label = %task_label, %error, "driver exited with error");
            }
            // locals captured by the driver have been dropped by now
            done.store(true, Ordering::Release);
            completed.fetch_add(1, Ordering::Relaxed);
            result
        });

        CompletionHandle {
            label: label.to_string(),
            handle,
        }
    }

    /// Signals one driver to exit its loop
    pub fn stop(&self, label: &str) {
        if let Some(entry) = self.entries.lock().unwrap().get(label) {
            let _ = entry.stop.send(true);
        }
    }

    /// Signals every driver to exit
    pub fn stop_all(&self) {
        for entry in self.entries.lock().unwrap().values() {
            let _ = entry.stop.send(true);
        }
    }

    /// Blocks until every registered driver has finished, up to a 10 s
    /// ceiling, then clears the entry table. A final short pause lets the
    /// last completions run their drop handlers before the caller releases
    /// dependent resources.
    pub fn wait_all(&self) {
        let deadline = Instant::now() + WAIT_ALL_CEILING;

        loop {
            let all_done = self
                .entries
                .lock()
                .unwrap()
                .values()
                .all(|entry| entry.done.load(Ordering::Acquire));
            if all_done {
                break;
            }
            if Instant::now() >= deadline {
                warn!("wait_all ceiling reached with drivers still running");
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        // final drain poll
        std::thread::sleep(Duration::from_millis(10));
        self.entries.lock().unwrap().clear();
    }

    pub fn metrics(&self) -> ManagerMetrics {
        let active = self
            .entries
            .lock()
            .unwrap()
            .values()
            .filter(|entry| !entry.done.load(Ordering::Acquire))
            .count();
        ManagerMetrics {
            active,
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for ReactorManager {
    fn drop(&mut self) {
        self.stop_all();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(Duration::from_secs(1));
        }
    }
}
