// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tempnet-rs

//! Worker supervisor and the shared shutdown token

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Cooperative cancellation token handed to every worker.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Token that is never triggered, for running a worker standalone.
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown has been requested.
    pub async fn triggered(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Sender gone without a shutdown request: wait forever.
                std::future::pending::<()>().await;
            }
        }
    }
}

struct Worker {
    handle: JoinHandle<anyhow::Result<()>>,
}

/// Spawns named workers and joins them on shutdown.
pub struct Supervisor {
    tx: watch::Sender<bool>,
    workers: Arc<RwLock<HashMap<String, Worker>>>,
}

impl Supervisor {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            tx,
            workers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// New token bound to this supervisor.
    pub fn token(&self) -> Shutdown {
        Shutdown { rx: self.tx.subscribe() }
    }

    /// Run `worker` on its own task.
    pub async fn spawn<F, Fut>(&self, name: &str, worker: F)
    where
        F: FnOnce(Shutdown) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handle = tokio::spawn(worker(self.token()));
        let mut workers = self.workers.write().await;
        if workers.insert(name.to_string(), Worker { handle }).is_some() {
            warn!("Worker '{}' replaced a running worker of the same name", name);
        }
        debug!("Spawned worker '{}'", name);
    }

    pub async fn is_running(&self, name: &str) -> bool {
        let workers = self.workers.read().await;
        workers.get(name).map(|w| !w.handle.is_finished()).unwrap_or(false)
    }

    pub async fn worker_names(&self) -> Vec<String> {
        let workers = self.workers.read().await;
        let mut names: Vec<_> = workers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Signal every worker and wait for all of them to return.
    pub async fn shutdown(&self) {
        info!("Stopping workers...");
        self.tx.send_replace(true);

        let drained: Vec<_> = {
            let mut workers = self.workers.write().await;
            workers.drain().collect()
        };

        for (name, worker) in drained {
            match worker.handle.await {
                Ok(Ok(())) => info!("Worker '{}' stopped", name),
                Ok(Err(e)) => error!("Worker '{}' failed: {}", name, e),
                Err(e) => error!("Worker '{}' aborted: {}", name, e),
            }
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
