//! Per-thread spesh log
//!
//! Interpreting threads append what they observe to a bounded buffer. A
//! full buffer, an explicit flush or thread exit sends it as one batch to
//! the spesh worker. With blocking on, the sender waits until the worker
//! has processed the batch.

use bytecode_system::CallsiteId;
use core_types::{StableId, StaticFrameId, ThreadId};
use crossbeam::channel::{bounded, Sender};

/// Type and concreteness of an observed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObservedType {
    /// Its STable
    pub stable: StableId,
    /// Instance (true) or type object (false)
    pub concrete: bool,
}

/// What was seen for one object argument at frame entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArgType {
    /// The argument itself
    pub ty: ObservedType,
    /// Type of its content, if it is a container holding an object
    pub decont: Option<ObservedType>,
    /// True if it is an rw container
    pub rw: bool,
}

impl ArgType {
    /// A plain, non-container argument.
    pub fn plain(stable: StableId, concrete: bool) -> Self {
        ArgType {
            ty: ObservedType { stable, concrete },
            decont: None,
            rw: false,
        }
    }
}

/// Per positional argument: `Some` for objects, `None` for natives and null.
pub type TypeTuple = Box<[Option<ArgType>]>;

/// One spesh log entry. Entries after `Entry` refer back to their frame by
/// correlation id.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    /// A frame started running original code
    Entry {
        /// Frame correlation id
        correlation: u32,
        /// Routine entered
        routine: StaticFrameId,
        /// Shape it was called with
        callsite: CallsiteId,
        /// Argument types
        types: TypeTuple,
        /// Call stack depth at entry
        depth: u32,
    },
    /// An object produced at `offset`
    Type {
        /// Frame correlation id
        correlation: u32,
        /// Instruction offset
        offset: u32,
        /// What was produced
        ty: ObservedType,
    },
    /// A routine invoked from `offset`
    Invoke {
        /// Frame correlation id
        correlation: u32,
        /// Instruction offset
        offset: u32,
        /// Routine invoked
        target: StaticFrameId,
    },
    /// The dispatch program that handled the dispatch at `offset`
    Dispatch {
        /// Frame correlation id
        correlation: u32,
        /// Instruction offset
        offset: u32,
        /// Program id
        program: u64,
    },
}

/// A batch of entries from one thread.
#[derive(Debug)]
pub struct LogBatch {
    /// Logging thread
    pub thread: ThreadId,
    /// Entries in the order they were logged
    pub entries: Vec<LogEntry>,
    /// Signalled once the batch is processed, in blocking mode
    pub done: Option<Sender<()>>,
}

/// Messages understood by the spesh worker.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Log data to fold into the stats
    Batch(LogBatch),
    /// Stop the worker
    Shutdown,
}

/// The spesh log of one thread.
#[derive(Debug)]
pub struct SpeshLog {
    thread: ThreadId,
    entries: Vec<LogEntry>,
    capacity: usize,
    blocking: bool,
    sender: Sender<WorkerMessage>,
    next_correlation: u32,
}

impl SpeshLog {
    /// Creates a log sending to `sender`.
    pub fn new(thread: ThreadId, capacity: usize, blocking: bool, sender: Sender<WorkerMessage>) -> Self {
        SpeshLog {
            thread,
            entries: Vec::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            blocking,
            sender,
            next_correlation: 1,
        }
    }

    /// A fresh frame correlation id. Zero is never handed out.
    pub fn next_correlation(&mut self) -> u32 {
        let id = self.next_correlation;
        self.next_correlation = self.next_correlation.wrapping_add(1).max(1);
        id
    }

    /// Entries waiting to be sent.
    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    /// Appends an entry, sending the batch when the log is full.
    pub fn record(&mut self, entry: LogEntry) {
        self.entries.push(entry);
        if self.entries.len() >= self.capacity {
            self.flush();
        }
    }

    /// Sends whatever is pending.
    pub fn flush(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        let entries = std::mem::replace(&mut self.entries, Vec::with_capacity(self.capacity.min(1024)));
        let count = entries.len();
        let (done, wait) = if self.blocking {
            let (tx, rx) = bounded(1);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let batch = LogBatch {
            thread: self.thread,
            entries,
            done,
        };
        if self.sender.send(WorkerMessage::Batch(batch)).is_err() {
            log::debug!("spesh worker gone; dropped {} log entries", count);
            return;
        }
        if let Some(wait) = wait {
            // An error means the worker exited without answering.
            let _ = wait.recv();
        }
    }
}

impl Drop for SpeshLog {
    fn drop(&mut self) {
        self.flush();
    }
}
