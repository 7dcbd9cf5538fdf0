//! Recent-operation records.
//!
//! After a successful run the caller may hand a [`HistoryRecord`] to a
//! [`HistorySink`]. Sinks are write-only from the core's point of view;
//! nothing in the pipeline reads history back.

use std::collections::VecDeque;
use std::convert::Infallible;

use serde::{Deserialize, Serialize};

use crate::types::{Dimensions, Encoded, OutputFormat};

/// What kind of operation produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    /// Perspective rectification only.
    Rectify,
    /// Enhancement only.
    Enhance,
    /// Rectification followed by enhancement.
    Scan,
    /// Format or size conversion.
    Convert,
}

/// Output metadata stored with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMetadata {
    /// Output format.
    pub format: OutputFormat,
    /// Output dimensions.
    pub dimensions: Dimensions,
    /// Output size in bytes.
    pub byte_size: usize,
}

/// One completed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Operation kind.
    pub kind: HistoryKind,
    /// Output metadata.
    pub metadata: HistoryMetadata,
    /// A URL the UI can show as a thumbnail, if one was created.
    pub preview_url: Option<String>,
    /// When the operation finished, in milliseconds since the Unix
    /// epoch.
    pub created_at_ms: u64,
}

impl HistoryRecord {
    /// Describe `encoded` as the output of a `kind` operation.
    #[must_use]
    pub fn from_encoded(
        kind: HistoryKind,
        encoded: &Encoded,
        preview_url: Option<String>,
        created_at_ms: u64,
    ) -> Self {
        Self {
            kind,
            metadata: HistoryMetadata {
                format: encoded.format,
                dimensions: encoded.dimensions,
                byte_size: encoded.byte_size,
            },
            preview_url,
            created_at_ms,
        }
    }
}

/// Receives history records.
pub trait HistorySink {
    /// Why a record could not be stored.
    type Error;

    /// Store `record`.
    ///
    /// # Errors
    ///
    /// Implementation-defined.
    fn record(&mut self, record: HistoryRecord) -> Result<(), Self::Error>;
}

/// Bounded in-memory history, newest first.
#[derive(Debug, Clone)]
pub struct RecentHistory {
    capacity: usize,
    records: VecDeque<HistoryRecord>,
}

impl RecentHistory {
    /// Default number of records kept.
    pub const DEFAULT_CAPACITY: usize = 20;

    /// Keep at most `capacity` records (at least one).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
        }
    }

    /// Build from stored records (newest first), dropping any beyond
    /// `capacity`.
    #[must_use]
    pub fn from_records(capacity: usize, records: Vec<HistoryRecord>) -> Self {
        let mut history = Self::with_capacity(capacity);
        history.records.extend(records.into_iter().take(history.capacity));
        history
    }

    /// Records, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.records.iter()
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// `true` when no records are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Remove every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Insert at the front, evicting the oldest record when full.
    /// Returns the evicted record.
    pub fn push(&mut self, record: HistoryRecord) -> Option<HistoryRecord> {
        let evicted = if self.records.len() == self.capacity {
            self.records.pop_back()
        } else {
            None
        };
        self.records.push_front(record);
        evicted
    }
}

impl Default for RecentHistory {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}

impl HistorySink for RecentHistory {
    type Error = Infallible;

    fn record(&mut self, record: HistoryRecord) -> Result<(), Infallible> {
        self.push(record);
        Ok(())
    }
}
