//! flatscan: command line document rectification and enhancement.
//!
//! Runs the same core operations the web front end uses on image files:
//!
//! - `rectify`: warp a four-corner selection onto a fixed-size page
//! - `enhance`: apply tone, saturation, sharpening and denoise
//! - `scan`: both, in one pass, with per-stage diagnostics
//! - `convert`: change format, size or byte budget, with diagnostics
//!
//! # Usage
//!
//! ```text
//! flatscan scan photo.jpg --quad "120,80 900,110 880,1200 100,1180" -o page.jpg
//! flatscan scan photo.jpg --quad "60,40 450,55 440,600 50,590" --display 500x667 -o page.jpg
//! flatscan enhance page.jpg --auto -o page-auto.jpg
//! flatscan convert page.jpg --format webp --width 1200 -o page.webp
//! ```
//!
//! Logging goes to stderr through `tracing`; set `RUST_LOG` or pass `-v`.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand, ValueEnum};
use flatscan_core::diagnostics::{Clock, ScanDiagnostics};
use flatscan_core::{
    ConversionSettings, Encoded, EncodedMeta, Engine, EnhancementParameters, OutputFormat,
    OutputSettings, Point, Quad, RectifyConfig, ResizeFilter, ScanConfig, ScanError, Size,
    SizeMode,
};

/// Perspective-correct and enhance photographed documents.
#[derive(Parser)]
#[command(name = "flatscan", version)]
struct Cli {
    /// Log more (`-v` for debug, `-vv` for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print machine-readable JSON on stdout instead of a report.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rectify a selection onto a fixed-size page (JPEG intermediate).
    Rectify {
        #[command(flatten)]
        io: IoArgs,
        #[command(flatten)]
        selection: SelectionArgs,
        #[command(flatten)]
        page: PageArgs,
    },
    /// Enhance a whole image.
    Enhance {
        #[command(flatten)]
        io: IoArgs,
        #[command(flatten)]
        tone: ToneArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Rectify then enhance, printing per-stage diagnostics.
    Scan {
        #[command(flatten)]
        io: IoArgs,
        #[command(flatten)]
        selection: SelectionArgs,
        #[command(flatten)]
        page: PageArgs,
        #[command(flatten)]
        tone: ToneArgs,
        #[command(flatten)]
        output: OutputArgs,
        /// Full scan config as a JSON string.
        ///
        /// When provided, the page, tone and output flags are ignored.
        /// The JSON must be a valid `ScanConfig` serialization.
        #[arg(long)]
        config_json: Option<String>,
    },
    /// Convert format and size, printing per-stage diagnostics.
    Convert {
        #[command(flatten)]
        io: IoArgs,
        /// Output format.
        #[arg(long, value_enum, default_value_t = Format::Jpeg)]
        format: Format,
        /// Encoder quality (0-100, JPEG only).
        #[arg(long, default_value_t = OutputSettings::DEFAULT_QUALITY, value_parser = clap::value_parser!(u8).range(0..=100))]
        quality: u8,
        /// Search for the highest JPEG quality whose output fits this
        /// many bytes.
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        target_bytes: Option<u64>,
        /// Output width in pixels.
        #[arg(long)]
        width: Option<u32>,
        /// Output height in pixels.
        #[arg(long)]
        height: Option<u32>,
        /// Stretch to exactly `--width` x `--height`.
        #[arg(long)]
        ignore_aspect: bool,
        /// Resampling filter.
        #[arg(long, value_enum, default_value_t = Filter::Triangle)]
        filter: Filter,
    },
}

/// Input and output paths.
#[derive(Args)]
struct IoArgs {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    input: PathBuf,
    /// Where to write the result.
    #[arg(short, long)]
    output: PathBuf,
}

/// The four-corner selection.
#[derive(Args)]
struct SelectionArgs {
    /// Corners as `"x,y x,y x,y x,y"`, in any order.
    #[arg(long, value_parser = parse_quad)]
    quad: Quad,
    /// Size the image was displayed at when the corners were picked,
    /// as `WxH`. Omit when the corners are in image pixels.
    #[arg(long, value_parser = parse_size)]
    display: Option<Size>,
}

/// Rectified page size.
#[derive(Args)]
struct PageArgs {
    /// Page width in pixels.
    #[arg(long, default_value_t = RectifyConfig::DEFAULT_TARGET_WIDTH)]
    page_width: u32,
    /// Page height in pixels.
    #[arg(long, default_value_t = RectifyConfig::DEFAULT_TARGET_HEIGHT)]
    page_height: u32,
}

/// Enhancement controls.
#[derive(Args)]
struct ToneArgs {
    /// Use the one-click preset; every tone flag except `--denoise` is
    /// ignored.
    #[arg(long)]
    auto: bool,
    /// Brightness percent (100 = unchanged).
    #[arg(long, default_value_t = EnhancementParameters::NEUTRAL_PERCENT, value_parser = clap::value_parser!(u16).range(0..=200))]
    brightness: u16,
    /// Contrast percent (100 = unchanged).
    #[arg(long, default_value_t = EnhancementParameters::NEUTRAL_PERCENT, value_parser = clap::value_parser!(u16).range(0..=200))]
    contrast: u16,
    /// Saturation percent (100 = unchanged).
    #[arg(long, default_value_t = EnhancementParameters::NEUTRAL_PERCENT, value_parser = clap::value_parser!(u16).range(0..=200))]
    saturation: u16,
    /// Sharpening strength (0-100).
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=100))]
    sharpness: u8,
    /// Denoise strength (0-100).
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=100))]
    denoise: u8,
}

/// Final encode settings.
#[derive(Args)]
struct OutputArgs {
    /// Output format.
    #[arg(long, value_enum, default_value_t = Format::Jpeg)]
    format: Format,
    /// Encoder quality (0-100, JPEG only).
    #[arg(long, default_value_t = OutputSettings::DEFAULT_QUALITY, value_parser = clap::value_parser!(u8).range(0..=100))]
    quality: u8,
}

/// Output format selection.
#[derive(Clone, Copy, ValueEnum)]
enum Format {
    /// JPEG (lossy, honours `--quality`).
    Jpeg,
    /// PNG (lossless).
    Png,
    /// WebP (lossless).
    Webp,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Jpeg => Self::Jpeg,
            Format::Png => Self::Png,
            Format::Webp => Self::Webp,
        }
    }
}

/// Resampling filter selection.
#[derive(Clone, Copy, ValueEnum)]
enum Filter {
    /// Nearest-neighbor (fastest, blocky).
    Nearest,
    /// Bilinear interpolation (fast, decent quality).
    Triangle,
    /// Bicubic Catmull-Rom (moderate, good quality).
    CatmullRom,
    /// Lanczos with 3 lobes (slowest, sharpest).
    Lanczos3,
}

impl From<Filter> for ResizeFilter {
    fn from(filter: Filter) -> Self {
        match filter {
            Filter::Nearest => Self::Nearest,
            Filter::Triangle => Self::Triangle,
            Filter::CatmullRom => Self::CatmullRom,
            Filter::Lanczos3 => Self::Lanczos3,
        }
    }
}

impl ToneArgs {
    const fn params(&self) -> EnhancementParameters {
        if self.auto {
            return EnhancementParameters {
                denoise: self.denoise,
                ..EnhancementParameters::AUTO
            };
        }
        EnhancementParameters {
            brightness: self.brightness,
            contrast: self.contrast,
            saturation: self.saturation,
            sharpness: self.sharpness,
            denoise: self.denoise,
            auto: false,
        }
    }
}

impl OutputArgs {
    fn settings(&self) -> OutputSettings {
        OutputSettings {
            format: self.format.into(),
            quality: self.quality,
        }
    }
}

impl PageArgs {
    fn config(&self) -> RectifyConfig {
        RectifyConfig {
            target_width: self.page_width,
            target_height: self.page_height,
            ..RectifyConfig::default()
        }
    }
}

/// Parse `"x,y x,y x,y x,y"`.
fn parse_quad(s: &str) -> Result<Quad, String> {
    let points = s
        .split_whitespace()
        .map(parse_point)
        .collect::<Result<Vec<_>, _>>()?;
    Quad::from_slice(&points)
        .ok_or_else(|| format!("expected exactly 4 corners, got {}", points.len()))
}

fn parse_point(s: &str) -> Result<Point, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("corner {s:?} is not of the form x,y"))?;
    let x: f64 = x.trim().parse().map_err(|e| format!("bad x in {s:?}: {e}"))?;
    let y: f64 = y.trim().parse().map_err(|e| format!("bad y in {s:?}: {e}"))?;
    Ok(Point::new(x, y))
}

/// Parse `WxH`.
fn parse_size(s: &str) -> Result<Size, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("size {s:?} is not of the form WxH"))?;
    let w: f64 = w.trim().parse().map_err(|e| format!("bad width in {s:?}: {e}"))?;
    let h: f64 = h.trim().parse().map_err(|e| format!("bad height in {s:?}: {e}"))?;
    let size = Size::new(w, h);
    if size.is_usable() {
        Ok(size)
    } else {
        Err(format!("size {s:?} must be positive"))
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let io = match &cli.command {
        Command::Rectify { io, .. }
        | Command::Enhance { io, .. }
        | Command::Scan { io, .. }
        | Command::Convert { io, .. } => io,
    };

    let source = match std::fs::read(&io.input) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error reading {}: {e}", io.input.display());
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(path = %io.input.display(), bytes = source.len(), "read input");

    let engine = Engine::new();
    let start = StdClock.now();
    let result = run(&engine, &cli, &source);
    let elapsed = StdClock.elapsed(&start);

    let encoded = match result {
        Ok(encoded) => encoded,
        Err(e) => {
            tracing::error!(error = %e, category = ?e.category(), "operation failed");
            eprintln!("{}", e.user_message());
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = std::fs::write(&io.output, &encoded.bytes) {
        eprintln!("Error writing {}: {e}", io.output.display());
        return ExitCode::FAILURE;
    }

    if !cli.json {
        print_summary(&io.output, &encoded, elapsed);
    }
    ExitCode::SUCCESS
}

/// Run the selected command, printing diagnostics along the way.
fn run(engine: &Engine, cli: &Cli, source: &[u8]) -> Result<Encoded, ScanError> {
    let encoded = match &cli.command {
        Command::Rectify {
            selection, page, ..
        } => match selection.display {
            Some(display) => {
                engine.rectify_display(source, &selection.quad, display, &page.config())?
            }
            None => engine.rectify(source, &selection.quad, &page.config())?,
        },
        Command::Enhance { tone, output, .. } => {
            engine.enhance(source, &tone.params(), &output.settings())?
        }
        Command::Scan {
            selection,
            page,
            tone,
            output,
            config_json,
            ..
        } => {
            let config = match config_json {
                Some(json) => ScanConfig::from_json(json)?,
                None => ScanConfig {
                    rectify: page.config(),
                    enhance: tone.params(),
                    output: output.settings(),
                },
            };
            tracing::debug!(?config, "scan config");
            let (encoded, diagnostics) = engine.scan_with_diagnostics(
                source,
                &selection.quad,
                selection.display,
                &config,
                &StdClock,
            )?;
            print_diagnostics(cli.json, &diagnostics);
            return Ok(encoded);
        }
        Command::Convert {
            format,
            quality,
            target_bytes,
            width,
            height,
            ignore_aspect,
            filter,
            ..
        } => {
            let size_mode = target_bytes.map_or(SizeMode::Quality, |n| {
                SizeMode::TargetBytes(usize::try_from(n).unwrap_or(usize::MAX))
            });
            let settings = ConversionSettings {
                format: (*format).into(),
                quality: *quality,
                size_mode,
                width: *width,
                height: *height,
                keep_aspect: !ignore_aspect,
                filter: (*filter).into(),
            };
            let (encoded, diagnostics) =
                engine.convert_with_diagnostics(source, &settings, &StdClock)?;
            print_diagnostics(cli.json, &diagnostics);
            return Ok(encoded);
        }
    };
    if cli.json {
        let meta = EncodedMeta {
            format: encoded.format,
            dimensions: encoded.dimensions,
            byte_size: encoded.byte_size,
        };
        match serde_json::to_string_pretty(&meta) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Error serializing result: {e}"),
        }
    }
    Ok(encoded)
}

fn print_diagnostics(json: bool, diagnostics: &ScanDiagnostics) {
    if json {
        match serde_json::to_string_pretty(diagnostics) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Error serializing diagnostics: {e}"),
        }
    } else {
        println!("{}", diagnostics.report());
    }
}

fn print_summary(path: &Path, encoded: &Encoded, elapsed: Duration) {
    println!(
        "Wrote {} ({}, {}x{}, {} bytes) in {:.3}ms",
        path.display(),
        encoded.format,
        encoded.dimensions.width,
        encoded.dimensions.height,
        encoded.byte_size,
        elapsed.as_secs_f64() * 1000.0,
    );
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn quad_parses_four_corners() {
        let quad = parse_quad("1,2 3.5,4  5,6\t7,8").unwrap();
        assert_eq!(quad.0[1], Point::new(3.5, 4.0));
        assert_eq!(quad.0[3], Point::new(7.0, 8.0));
    }

    #[test]
    fn quad_rejects_wrong_count() {
        assert!(parse_quad("1,2 3,4 5,6").is_err());
        assert!(parse_quad("1,2 3,4 5,6 7,8 9,10").is_err());
        assert!(parse_quad("1;2 3,4 5,6 7,8").is_err());
    }

    #[test]
    fn size_parses_and_rejects_zero() {
        assert_eq!(parse_size("640x480").unwrap(), Size::new(640.0, 480.0));
        assert!(parse_size("0x480").is_err());
        assert!(parse_size("640").is_err());
    }

    #[test]
    fn auto_flag_overrides_sliders() {
        let tone = ToneArgs {
            auto: true,
            brightness: 150,
            contrast: 100,
            saturation: 100,
            sharpness: 0,
            denoise: 0,
        };
        assert_eq!(tone.params(), EnhancementParameters::AUTO);
    }

    #[test]
    fn auto_flag_keeps_denoise() {
        let tone = ToneArgs {
            auto: true,
            brightness: 100,
            contrast: 100,
            saturation: 100,
            sharpness: 0,
            denoise: 60,
        };
        let params = tone.params();
        assert!(params.auto);
        assert_eq!(params.denoise, 60);
        assert_eq!(params.resolve().denoise_radius, Some(2));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
