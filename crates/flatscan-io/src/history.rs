//! Recent-scan history persisted in `localStorage`.
//!
//! Records are stored as one JSON array under a single key, newest
//! first. Preview URLs are Blob URLs and die with the page, so they are
//! dropped when history is loaded back.

use flatscan_core::{HistoryRecord, HistorySink, RecentHistory};
use wasm_bindgen::JsValue;

use crate::raster;

/// Default `localStorage` key.
pub const STORAGE_KEY: &str = "flatscan.history";

/// Errors that can occur while loading or storing history.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// `localStorage` is unavailable (private mode, non-browser host).
    #[error("local storage is not available")]
    NoStorage,

    /// Stored history could not be read or written as JSON.
    #[error("history JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A browser API call returned an error.
    #[error("browser API error: {0}")]
    JsError(String),
}

impl From<JsValue> for HistoryError {
    fn from(value: JsValue) -> Self {
        Self::JsError(format!("{value:?}"))
    }
}

/// A [`HistorySink`] that mirrors a [`RecentHistory`] into
/// `localStorage`.
#[derive(Debug)]
pub struct LocalStorageHistory {
    key: String,
    history: RecentHistory,
}

impl LocalStorageHistory {
    /// Load history stored under `key`, keeping at most `capacity`
    /// records. Missing or unreadable data starts an empty history.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::NoStorage`] if `localStorage` cannot be
    /// reached.
    pub fn load(key: &str, capacity: usize) -> Result<Self, HistoryError> {
        let stored = storage()?.get_item(key)?;
        let records = stored
            .as_deref()
            .map(parse_records)
            .unwrap_or_default();
        Ok(Self {
            key: key.to_owned(),
            history: RecentHistory::from_records(capacity, records),
        })
    }

    /// Records, newest first.
    #[must_use]
    pub const fn history(&self) -> &RecentHistory {
        &self.history
    }

    /// Remove every record, in memory and in storage.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be written.
    pub fn clear(&mut self) -> Result<(), HistoryError> {
        for record in self.history.iter() {
            if let Some(url) = &record.preview_url {
                raster::revoke_blob_url(url);
            }
        }
        self.history.clear();
        storage()?.remove_item(&self.key)?;
        Ok(())
    }

    fn save(&self) -> Result<(), HistoryError> {
        let records: Vec<&HistoryRecord> = self.history.iter().collect();
        let json = serde_json::to_string(&records)?;
        storage()?.set_item(&self.key, &json)?;
        Ok(())
    }
}

impl HistorySink for LocalStorageHistory {
    type Error = HistoryError;

    fn record(&mut self, record: HistoryRecord) -> Result<(), HistoryError> {
        if let Some(evicted) = self.history.push(record)
            && let Some(url) = evicted.preview_url
        {
            raster::revoke_blob_url(&url);
        }
        self.save()
    }
}

/// Milliseconds since the Unix epoch, for [`HistoryRecord::created_at_ms`].
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn now_ms() -> u64 {
    let now = js_sys::Date::now();
    if now.is_finite() && now > 0.0 {
        now as u64
    } else {
        0
    }
}

/// Parse stored records, dropping their stale preview URLs. Corrupt
/// data yields an empty list.
fn parse_records(json: &str) -> Vec<HistoryRecord> {
    match serde_json::from_str::<Vec<HistoryRecord>>(json) {
        Ok(records) => records
            .into_iter()
            .map(|record| HistoryRecord {
                preview_url: None,
                ..record
            })
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "discarding unreadable history");
            Vec::new()
        }
    }
}

fn storage() -> Result<web_sys::Storage, HistoryError> {
    web_sys::window()
        .ok_or(HistoryError::NoStorage)?
        .local_storage()?
        .ok_or(HistoryError::NoStorage)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use flatscan_core::{Dimensions, Encoded, HistoryKind, OutputFormat};

    use super::*;

    #[test]
    fn stored_records_lose_preview_urls() {
        let encoded = Encoded::new(vec![1, 2, 3], OutputFormat::Png, Dimensions::new(2, 2));
        let record = HistoryRecord::from_encoded(
            HistoryKind::Scan,
            &encoded,
            Some("blob:gone".to_owned()),
            42,
        );
        let json = serde_json::to_string(&vec![&record]).unwrap();
        let parsed = parse_records(&json);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].preview_url, None);
        assert_eq!(parsed[0].created_at_ms, 42);
        assert_eq!(parsed[0].metadata.byte_size, 3);
    }

    #[test]
    fn corrupt_storage_is_empty() {
        assert!(parse_records("{not json").is_empty());
    }
}
