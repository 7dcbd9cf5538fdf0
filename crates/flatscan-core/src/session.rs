//! Re-enhancement sessions and stale-result rejection.
//!
//! An [`EnhanceSession`] keeps the rectified original separately from
//! the currently displayed output, so every slider change recomputes
//! from the original instead of compounding onto the last result.
//! A [`RequestTracker`] numbers overlapping requests so that only the
//! newest completion is applied.

use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::enhance::EnhancementParameters;
use crate::types::{Encoded, OutputSettings, ScanError};

/// The original image plus the latest enhancement of it.
#[derive(Debug, Clone)]
pub struct EnhanceSession {
    original: Vec<u8>,
    output: OutputSettings,
    params: EnhancementParameters,
    displayed: Option<Encoded>,
}

impl EnhanceSession {
    /// Start a session over the preprocessed (typically rectified)
    /// image bytes.
    #[must_use]
    pub const fn new(original: Vec<u8>, output: OutputSettings) -> Self {
        Self {
            original,
            output,
            params: EnhancementParameters::NEUTRAL,
            displayed: None,
        }
    }

    /// The bytes every enhancement starts from.
    #[must_use]
    pub fn original(&self) -> &[u8] {
        &self.original
    }

    /// The most recent successful enhancement, if any.
    #[must_use]
    pub const fn displayed(&self) -> Option<&Encoded> {
        self.displayed.as_ref()
    }

    /// Parameters of the displayed output.
    #[must_use]
    pub const fn params(&self) -> &EnhancementParameters {
        &self.params
    }

    /// Output settings used for every enhancement.
    #[must_use]
    pub const fn output(&self) -> &OutputSettings {
        &self.output
    }

    /// Change the output settings. The displayed output is kept until
    /// the next [`apply`](Self::apply).
    pub const fn set_output(&mut self, output: OutputSettings) {
        self.output = output;
    }

    /// Enhance the original with `params` and make it the displayed
    /// output. On failure the previous output stays displayed.
    ///
    /// # Errors
    ///
    /// Propagates [`Engine::enhance`] errors.
    pub fn apply(
        &mut self,
        engine: &Engine,
        params: EnhancementParameters,
    ) -> Result<&Encoded, ScanError> {
        let encoded = engine.enhance(&self.original, &params, &self.output)?;
        self.params = params;
        Ok(self.displayed.insert(encoded))
    }

    /// Install an enhancement computed elsewhere (for example by a
    /// worker) for `params`.
    pub fn accept(&mut self, params: EnhancementParameters, encoded: Encoded) {
        self.params = params;
        self.displayed = Some(encoded);
    }

    /// Drop the displayed output and return to neutral parameters.
    pub fn reset(&mut self) {
        self.params = EnhancementParameters::NEUTRAL;
        self.displayed = None;
    }

    /// End the session, returning the displayed output if there is one
    /// and the original otherwise.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.displayed.map_or(self.original, |e| e.bytes)
    }
}

/// A request token. Later requests carry larger tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Generation(pub u64);

/// Issues [`Generation`] tokens and decides which completion is current.
#[derive(Debug, Clone, Default)]
pub struct RequestTracker {
    latest: u64,
}

impl RequestTracker {
    /// A tracker that has issued no tokens.
    #[must_use]
    pub const fn new() -> Self {
        Self { latest: 0 }
    }

    /// Issue a token for a new request, superseding every earlier one.
    pub const fn next(&mut self) -> Generation {
        self.latest += 1;
        Generation(self.latest)
    }

    /// The newest token issued, if any.
    #[must_use]
    pub const fn latest(&self) -> Option<Generation> {
        if self.latest == 0 {
            None
        } else {
            Some(Generation(self.latest))
        }
    }

    /// `true` when `token` is the newest issued; completions for any
    /// other token are stale and must be dropped.
    #[must_use]
    pub const fn is_current(&self, token: Generation) -> bool {
        token.0 == self.latest && self.latest != 0
    }

    /// Invalidate every outstanding token without issuing a new one.
    pub const fn invalidate(&mut self) {
        self.latest += 1;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::types::{OutputFormat, RgbImage};

    fn original() -> Vec<u8> {
        let img = RgbImage::from_fn(24, 24, |x, y| {
            #[allow(clippy::cast_possible_truncation)]
            image::Rgb([(x * 10) as u8, (y * 10) as u8, 100])
        });
        codec::encode(&img, &png()).unwrap().bytes
    }

    fn png() -> OutputSettings {
        OutputSettings {
            format: OutputFormat::Png,
            ..OutputSettings::default()
        }
    }

    #[test]
    fn apply_always_starts_from_original() {
        let engine = Engine::new();
        let mut session = EnhanceSession::new(original(), png());
        let params = EnhancementParameters::manual(130, 120, 100);

        let first = session.apply(&engine, params).unwrap().bytes.clone();
        let second = session.apply(&engine, params).unwrap().bytes.clone();
        assert_eq!(first, second);

        // Applying onto the previous output compounds instead.
        let compounded = engine.enhance(&first, &params, &png()).unwrap();
        assert_ne!(compounded.bytes, first);
        assert_eq!(engine.live_buffers(), 0);
    }

    #[test]
    fn failed_apply_keeps_previous_output() {
        let engine = Engine::new();
        let mut session = EnhanceSession::new(original(), png());
        session
            .apply(&engine, EnhancementParameters::manual(110, 100, 100))
            .unwrap();
        let before = session.displayed().cloned();
        let result = session.apply(&engine, EnhancementParameters::manual(999, 100, 100));
        assert!(result.is_err());
        assert_eq!(session.displayed().cloned(), before);
        assert_eq!(session.params().brightness, 110);
    }

    #[test]
    fn finish_prefers_displayed_output() {
        let engine = Engine::new();
        let bytes = original();
        let session = EnhanceSession::new(bytes.clone(), png());
        assert_eq!(session.finish(), bytes);

        let mut session = EnhanceSession::new(bytes.clone(), png());
        session.apply(&engine, EnhancementParameters::AUTO).unwrap();
        assert_ne!(session.clone().finish(), bytes);
        session.reset();
        assert!(session.displayed().is_none());
    }

    #[test]
    fn only_newest_token_is_current() {
        let mut tracker = RequestTracker::new();
        assert!(tracker.latest().is_none());
        let a = tracker.next();
        let b = tracker.next();
        assert!(a < b);
        assert!(!tracker.is_current(a));
        assert!(tracker.is_current(b));
        tracker.invalidate();
        assert!(!tracker.is_current(b));
    }
}
