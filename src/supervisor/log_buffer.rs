use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    /// Literal prefix the UI matches on to classify a line.
    pub fn prefix(&self) -> &'static str {
        match self {
            LogStream::Stdout => "[OUT]",
            LogStream::Stderr => "[ERR]",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub sequence: u64,
    pub stream: LogStream,
    pub text: String,
}

impl LogEntry {
    pub fn render(&self) -> String {
        format!("{} {}", self.stream.prefix(), self.text)
    }
}

#[derive(Debug)]
struct Ring {
    entries: VecDeque<LogEntry>,
    next_sequence: u64,
}

/// Fixed-capacity FIFO of output lines for one terminal.
///
/// Appends evict the oldest entry once full; sequence numbers keep counting
/// across runs, so a snapshot taken after a restart still orders correctly.
#[derive(Debug)]
pub struct LogBuffer {
    capacity: usize,
    ring: Mutex<Ring>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            ring: Mutex::new(Ring {
                entries: VecDeque::with_capacity(capacity),
                next_sequence: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn append(&self, stream: LogStream, text: impl Into<String>) -> u64 {
        let mut text = text.into();
        // One entry is one line.
        if text.contains('\n') || text.contains('\r') {
            text = text.replace(|c: char| c == '\r' || c == '\n', " ");
        }

        // A panicking reader must not take the buffer down with it.
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        let sequence = ring.next_sequence;
        ring.next_sequence += 1;
        if ring.entries.len() == self.capacity {
            ring.entries.pop_front();
        }
        ring.entries.push_back(LogEntry {
            sequence,
            stream,
            text,
        });
        sequence
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        let ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        ring.entries.iter().cloned().collect()
    }

    /// The snapshot in wire form (`[OUT] ...` / `[ERR] ...`).
    pub fn rendered(&self) -> Vec<String> {
        self.snapshot().iter().map(LogEntry::render).collect()
    }

    pub fn len(&self) -> usize {
        self.ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
