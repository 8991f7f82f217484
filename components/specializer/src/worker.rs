//! The spesh worker thread
//!
//! One worker per VM receives log batches, folds them into the stats,
//! plans and produces candidates, and installs them. Mutator threads never
//! wait for it unless blocking mode is on.

use crate::config::SpeshConfig;
use crate::spesh_log::{LogBatch, TypeTuple, WorkerMessage};
use crate::planner::plan;
use crate::routine::SpeshHost;
use crate::specialize::specialize;
use crate::stats::SpeshStats;
use bytecode_system::CallsiteId;
use core_types::{ErrorKind, StaticFrameId, VmError, VmResult};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Handle to a running worker.
#[derive(Debug)]
pub struct SpeshWorker {
    sender: Sender<WorkerMessage>,
    handle: Option<JoinHandle<()>>,
}

impl SpeshWorker {
    /// Starts the worker.
    pub fn spawn(host: Arc<dyn SpeshHost>, config: SpeshConfig) -> VmResult<Self> {
        let (sender, receiver) = unbounded();
        let handle = std::thread::Builder::new()
            .name("spesh-worker".to_string())
            .spawn(move || Worker::new(host, config).run(receiver))
            .map_err(|e| VmError::adhoc(ErrorKind::Config, format!("cannot start spesh worker: {}", e)))?;
        log::info!("spesh worker started");
        Ok(SpeshWorker {
            sender,
            handle: Some(handle),
        })
    }

    /// Channel that spesh logs send to.
    pub fn sender(&self) -> Sender<WorkerMessage> {
        self.sender.clone()
    }

    /// Stops the worker after it drains what was already sent.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else { return };
        let _ = self.sender.send(WorkerMessage::Shutdown);
        if handle.join().is_err() {
            log::error!("spesh worker panicked");
        } else {
            log::info!("spesh worker stopped");
        }
    }
}

impl Drop for SpeshWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

type PlanKey = (StaticFrameId, CallsiteId, Option<TypeTuple>);

struct Worker {
    host: Arc<dyn SpeshHost>,
    config: SpeshConfig,
    stats: SpeshStats,
    failed: HashSet<PlanKey>,
}

impl Worker {
    fn new(host: Arc<dyn SpeshHost>, config: SpeshConfig) -> Self {
        let stats = SpeshStats::new(config.max_age, config.max_offset_entries);
        Worker {
            host,
            config,
            stats,
            failed: HashSet::new(),
        }
    }

    fn run(mut self, receiver: Receiver<WorkerMessage>) {
        while let Ok(message) = receiver.recv() {
            match message {
                WorkerMessage::Batch(batch) => self.process(batch),
                WorkerMessage::Shutdown => break,
            }
        }
    }

    fn process(&mut self, batch: LogBatch) {
        self.stats.update(batch.thread, &batch.entries);
        for p in plan(&self.stats, &*self.host, &self.config) {
            let key = (p.routine, p.callsite, p.types.clone());
            if self.failed.contains(&key) {
                continue;
            }
            let Some(routine) = self.host.routine(p.routine) else { continue };
            let installed = specialize(&*self.host, &routine, &p, &self.stats, &self.config)
                .and_then(|candidate| routine.spesh().install(candidate, self.config.max_candidates));
            match installed {
                Ok(Some(id)) => log::debug!("installed candidate {} for '{}'", id, routine.body().name),
                Ok(None) => {
                    self.failed.insert(key);
                }
                Err(e) => {
                    log::warn!("discarded specialization of '{}': {}", routine.body().name, e);
                    self.failed.insert(key);
                }
            }
        }
        if let Some(done) = batch.done {
            let _ = done.send(());
        }
    }
}
