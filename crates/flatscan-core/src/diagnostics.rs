//! Scan diagnostics: per-stage timing and metrics.
//!
//! Timestamps come from a caller-supplied [`Clock`] so the core stays
//! free of platform time sources. [`WebClock`] uses the `web-time`
//! crate, which reads `performance.now()` on WASM and
//! `std::time::Instant` on native.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{Dimensions, OutputFormat};

/// Source of monotonic timestamps.
pub trait Clock {
    /// Opaque timestamp.
    type Instant;

    /// The current time.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// [`Clock`] backed by `web_time::Instant`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebClock;

impl Clock for WebClock {
    type Instant = web_time::Instant;

    fn now(&self) -> Self::Instant {
        web_time::Instant::now()
    }

    fn elapsed(&self, since: &Self::Instant) -> Duration {
        since.elapsed()
    }
}

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single scan.
///
/// Stages that did not run are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanDiagnostics {
    /// Image decoding.
    pub decode: StageDiagnostics,
    /// Perspective rectification.
    pub rectify: Option<StageDiagnostics>,
    /// Tone and colour enhancement.
    pub enhance: Option<StageDiagnostics>,
    /// Resize before conversion.
    pub resize: Option<StageDiagnostics>,
    /// Final encode.
    pub encode: StageDiagnostics,
    /// Wall-clock duration of the whole run.
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Buffers acquired on the ledger during the run.
    pub buffers_acquired: u64,
}

/// Diagnostics for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage.
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Decoding.
    Decode {
        /// Size of the input bytes.
        input_bytes: usize,
        /// Decoded size.
        dimensions: Dimensions,
    },
    /// Rectification.
    Rectify {
        /// Output size.
        target: Dimensions,
        /// Area enclosed by the ordered selection, in source pixels.
        selection_area: f64,
    },
    /// Enhancement.
    Enhance {
        /// Whether the auto preset was used.
        auto: bool,
        /// Whether a sharpening pass ran.
        sharpened: bool,
        /// Median radius, if a denoise pass ran.
        denoise_radius: Option<u32>,
    },
    /// Resize.
    Resize {
        /// Size before.
        from: Dimensions,
        /// Size after.
        to: Dimensions,
    },
    /// Encoding.
    Encode {
        /// Output format.
        format: OutputFormat,
        /// Configured quality; a byte-budget search may settle lower.
        quality: u8,
        /// Encoded size.
        byte_size: usize,
    },
}

impl ScanDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!("Scan Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Total duration: {:.3}ms  |  Buffers acquired: {}",
            duration_ms(self.total_duration),
            self.buffers_acquired
        ));
        lines.push(String::new());
        lines.push(format!(
            "{:<12} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(72));

        let total_ms = duration_ms(self.total_duration);
        let mut stages = vec![("Decode", &self.decode)];
        if let Some(ref r) = self.rectify {
            stages.push(("Rectify", r));
        }
        if let Some(ref e) = self.enhance {
            stages.push(("Enhance", e));
        }
        if let Some(ref r) = self.resize {
            stages.push(("Resize", r));
        }
        stages.push(("Encode", &self.encode));

        for (name, diag) in stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<12} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }
        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Decode {
            input_bytes,
            dimensions,
        } => format!(
            "{input_bytes} bytes -> {}x{}",
            dimensions.width, dimensions.height
        ),
        StageMetrics::Rectify {
            target,
            selection_area,
        } => format!(
            "{}x{} from {selection_area:.0} px² selection",
            target.width, target.height
        ),
        StageMetrics::Enhance {
            auto,
            sharpened,
            denoise_radius,
        } => {
            let mode = if *auto { "auto" } else { "manual" };
            let denoise = denoise_radius.map_or_else(|| "off".to_owned(), |r| format!("r={r}"));
            format!("{mode} sharpen={sharpened} denoise={denoise}")
        }
        StageMetrics::Resize { from, to } => format!(
            "{}x{} -> {}x{}",
            from.width, from.height, to.width, to.height
        ),
        StageMetrics::Encode {
            format,
            quality,
            byte_size,
        } => format!("{format} q={quality} {byte_size} bytes"),
    }
}

/// Times closures against a [`Clock`].
pub(crate) struct Stopwatch<'c, C: Clock> {
    clock: &'c C,
    start: C::Instant,
}

impl<'c, C: Clock> Stopwatch<'c, C> {
    pub(crate) fn start(clock: &'c C) -> Self {
        Self {
            clock,
            start: clock.now(),
        }
    }

    /// Run `f`, returning its result and how long it took.
    pub(crate) fn time<T>(&self, f: impl FnOnce() -> T) -> (T, Duration) {
        let t0 = self.clock.now();
        let out = f();
        (out, self.clock.elapsed(&t0))
    }

    /// Time since [`start`](Self::start).
    pub(crate) fn total(&self) -> Duration {
        self.clock.elapsed(&self.start)
    }
}
