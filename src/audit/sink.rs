//! Audit log sinks.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use super::records::{ExitAttempt, PositionExit};
use crate::error::AuditError;

/// Append-only event log. No updates, no deletes.
pub trait AuditLog: Send + Sync {
    /// Append an exit attempt.
    fn record_attempt(&self, attempt: &ExitAttempt) -> Result<(), AuditError>;

    /// Append a position exit.
    fn record_exit(&self, exit: &PositionExit) -> Result<(), AuditError>;
}

/// In-process audit log.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    attempts: Mutex<Vec<ExitAttempt>>,
    exits: Mutex<Vec<PositionExit>>,
}

impl MemoryAuditLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// All attempts in append order.
    pub fn attempts(&self) -> Vec<ExitAttempt> {
        self.attempts
            .lock()
            .map(|a| a.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// All exits in append order.
    pub fn exits(&self) -> Vec<PositionExit> {
        self.exits
            .lock()
            .map(|e| e.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Attempts for one position.
    pub fn attempts_for(&self, position_id: &str) -> Vec<ExitAttempt> {
        self.attempts()
            .into_iter()
            .filter(|a| a.position_id == position_id)
            .collect()
    }

    /// Exits for one position.
    pub fn exits_for(&self, position_id: &str) -> Vec<PositionExit> {
        self.exits()
            .into_iter()
            .filter(|e| e.position_id == position_id)
            .collect()
    }
}

impl AuditLog for MemoryAuditLog {
    fn record_attempt(&self, attempt: &ExitAttempt) -> Result<(), AuditError> {
        self.attempts
            .lock()
            .map_err(|_| AuditError::Poisoned)?
            .push(attempt.clone());
        Ok(())
    }

    fn record_exit(&self, exit: &PositionExit) -> Result<(), AuditError> {
        self.exits
            .lock()
            .map_err(|_| AuditError::Poisoned)?
            .push(exit.clone());
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Line<'a> {
    ExitAttempt(&'a ExitAttempt),
    PositionExit(&'a PositionExit),
}

/// Audit log appending one JSON object per line to a file.
#[derive(Debug)]
pub struct JsonlAuditLog {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlAuditLog {
    /// Open (or create) a log file in append mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    fn append(&self, line: &Line<'_>) -> Result<(), AuditError> {
        let mut encoded = serde_json::to_vec(line)?;
        encoded.push(b'\n');

        let mut writer = self.writer.lock().map_err(|_| AuditError::Poisoned)?;
        writer.write_all(&encoded)?;
        writer.flush()?;
        Ok(())
    }
}

impl AuditLog for JsonlAuditLog {
    fn record_attempt(&self, attempt: &ExitAttempt) -> Result<(), AuditError> {
        self.append(&Line::ExitAttempt(attempt))
    }

    fn record_exit(&self, exit: &PositionExit) -> Result<(), AuditError> {
        self.append(&Line::PositionExit(exit))
    }
}

/// Audit log forwarding every event to several sinks.
///
/// Every sink sees every event; the first failure is reported after all
/// sinks were tried.
#[derive(Clone, Default)]
pub struct TeeAuditLog {
    sinks: Vec<Arc<dyn AuditLog>>,
}

impl TeeAuditLog {
    /// Create a tee over the given sinks.
    pub fn new(sinks: Vec<Arc<dyn AuditLog>>) -> Self {
        Self { sinks }
    }

    fn each(&self, f: impl Fn(&dyn AuditLog) -> Result<(), AuditError>) -> Result<(), AuditError> {
        self.sinks
            .iter()
            .map(|sink| f(sink.as_ref()))
            .fold(Ok(()), |first, next| first.and(next))
    }
}

impl AuditLog for TeeAuditLog {
    fn record_attempt(&self, attempt: &ExitAttempt) -> Result<(), AuditError> {
        self.each(|sink| sink.record_attempt(attempt))
    }

    fn record_exit(&self, exit: &PositionExit) -> Result<(), AuditError> {
        self.each(|sink| sink.record_exit(exit))
    }
}
