//! Audit Ledger - Append-Only Publication Records
//!
//! One entry per successfully published artifact, created only after
//! publish verification. Entries are never mutated or deleted. The
//! shipped backend is a JSON-lines file written in canonical key order
//! so ledger diffs stay byte-stable.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hashing::canonical_json;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub filename: String,
    pub signed_hash: String,
    pub published_hash: String,
    pub content_id: String,
    pub logo_position: (u32, u32),
    pub marker_text: String,
    pub marker_position: (u32, u32),
    pub timestamp: DateTime<Utc>,
}

pub trait Ledger {
    fn append(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError>;
}

/// Append-only JSON-lines file.
pub struct JsonlLedger {
    path: PathBuf,
}

impl JsonlLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Ledger for JsonlLedger {
    fn append(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let line = canonical_json(entry)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}
