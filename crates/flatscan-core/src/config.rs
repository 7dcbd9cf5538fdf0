//! The settings document for a full scan.

use serde::{Deserialize, Serialize};

use crate::enhance::EnhancementParameters;
use crate::rectify::RectifyConfig;
use crate::types::{OutputSettings, ScanError};

/// Rectify, enhance and output settings for one scan.
///
/// Missing fields take their defaults, so `{}` is a valid document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Perspective rectification.
    pub rectify: RectifyConfig,
    /// Tone and colour enhancement.
    pub enhance: EnhancementParameters,
    /// Final encode.
    pub output: OutputSettings,
}

impl ScanConfig {
    /// Parse a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidConfig`] if the JSON is malformed or a
    /// value fails [`validate`](Self::validate).
    pub fn from_json(json: &str) -> Result<Self, ScanError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ScanError::InvalidConfig(format!("malformed config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns the first section's error.
    pub fn validate(&self) -> Result<(), ScanError> {
        self.rectify.validate()?;
        self.enhance.validate()?;
        self.output.validate()
    }
}
