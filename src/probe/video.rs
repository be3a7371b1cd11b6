//! Video discovery through `ffprobe`.
//!
//! `ffprobe` inspects container and stream headers without decoding frames.
//! Its JSON report is parsed into [`VideoMetadata`]:
//!
//! * width/height from the first real video stream (cover art is skipped)
//! * duration from the container, falling back to that stream
//! * frame rate from `avg_frame_rate`, falling back to `r_frame_rate`,
//!   rounded to the nearest whole frame

use serde::Deserialize;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::{MetadataSource, ProbeError, DEFAULT_PROBE_TIMEOUT};
use crate::media::{Metadata, VideoMetadata};

const FFPROBE_ARGS: [&str; 6] = [
    "-v",
    "quiet",
    "-print_format",
    "json",
    "-show_format",
    "-show_streams",
];

/// How often a running `ffprobe` is checked for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs the `ffprobe` executable and parses its JSON report.
///
/// A run that outlives the timeout is killed and reaped, so a hung
/// `ffprobe` never outlasts the probe that started it.
#[derive(Debug, Clone)]
pub struct FfprobeDiscoverer {
    program: PathBuf,
    timeout: Duration,
}

impl FfprobeDiscoverer {
    /// Use the `ffprobe` found at `program` (a bare name is looked up on `PATH`).
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Kill `ffprobe` if it runs longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn spawn(&self, path: &Path) -> Result<Child, ProbeError> {
        Command::new(&self.program)
            .args(FFPROBE_ARGS)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                    ProbeError::Unavailable {
                        source_name: "ffprobe",
                        reason: format!("cannot run {}: {e}", self.program.display()),
                    }
                }
                _ => ProbeError::io(path, e),
            })
    }
}

impl Default for FfprobeDiscoverer {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl MetadataSource for FfprobeDiscoverer {
    fn name(&self) -> &'static str {
        "ffprobe"
    }

    fn try_read(&self, path: &Path) -> Result<Metadata, ProbeError> {
        let mut child = self.spawn(path)?;

        // Drain stdout while waiting; a full pipe would stall the child.
        let reader = child.stdout.take().map(|mut stdout| {
            thread::spawn(move || {
                let mut report = Vec::new();
                stdout.read_to_end(&mut report).map(|_| report)
            })
        });

        let status = match wait_with_deadline(&mut child, self.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                log::debug!(
                    "ffprobe exceeded {:?} on {}; killed",
                    self.timeout,
                    path.display()
                );
                return Err(ProbeError::Timeout {
                    path: path.to_path_buf(),
                    timeout: self.timeout,
                });
            }
            Err(e) => {
                kill_and_reap(&mut child);
                return Err(ProbeError::io(path, e));
            }
        };

        let report = match reader {
            Some(handle) => handle
                .join()
                .map_err(|_| ProbeError::corrupt(path, "ffprobe output reader panicked"))?
                .map_err(|e| ProbeError::io(path, e))?,
            None => Vec::new(),
        };

        if !status.success() {
            // ffprobe exits non-zero both for unreadable files and unknown formats.
            if let Err(e) = std::fs::metadata(path) {
                return Err(ProbeError::io(path, e));
            }
            return Err(ProbeError::Unsupported(path.to_path_buf()));
        }

        parse_report(path, &report)
    }
}

/// Poll `child` until it exits or `timeout` passes.
///
/// Returns `None` after killing and reaping a child that missed the deadline.
fn wait_with_deadline(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            kill_and_reap(child);
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

fn kill_and_reap(child: &mut Child) {
    let pid = child.id();
    if let Err(e) = child.kill() {
        log::debug!("Failed to kill ffprobe process {pid}: {e}");
    }
    if let Err(e) = child.wait() {
        log::debug!("Failed to reap ffprobe process {pid}: {e}");
    }
}

#[derive(Debug, Default, Deserialize)]
struct Report {
    #[serde(default)]
    streams: Vec<Stream>,
    #[serde(default)]
    format: Option<Format>,
}

#[derive(Debug, Default, Deserialize)]
struct Format {
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Stream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    avg_frame_rate: Option<String>,
    #[serde(default)]
    r_frame_rate: Option<String>,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    disposition: Option<Disposition>,
}

#[derive(Debug, Default, Deserialize)]
struct Disposition {
    #[serde(default)]
    attached_pic: u8,
}

impl Stream {
    fn is_video(&self) -> bool {
        self.codec_type.as_deref() == Some("video")
            && !self.disposition.as_ref().is_some_and(|d| d.attached_pic != 0)
    }
}

/// Parse an `ffprobe -print_format json -show_format -show_streams` report.
pub fn parse_report(path: &Path, json: &[u8]) -> Result<Metadata, ProbeError> {
    let report: Report = serde_json::from_slice(json)
        .map_err(|e| ProbeError::corrupt(path, format!("unreadable ffprobe report: {e}")))?;

    let stream = report.streams.iter().find(|s| s.is_video());

    let duration_secs = report
        .format
        .as_ref()
        .and_then(|f| parse_duration(f.duration.as_deref()))
        .or_else(|| stream.and_then(|s| parse_duration(s.duration.as_deref())));

    if stream.is_none() && duration_secs.is_none() {
        return Err(ProbeError::Unsupported(path.to_path_buf()));
    }

    let video = VideoMetadata {
        width: stream.and_then(|s| s.width).filter(|&w| w > 0),
        height: stream.and_then(|s| s.height).filter(|&h| h > 0),
        duration_secs,
        frame_rate: stream.and_then(|s| {
            parse_frame_rate(s.avg_frame_rate.as_deref())
                .or_else(|| parse_frame_rate(s.r_frame_rate.as_deref()))
        }),
    };
    Ok(Metadata::Video(video))
}

/// Parse a decimal seconds value such as `"12.345000"`; `"N/A"` is unknown.
fn parse_duration(value: Option<&str>) -> Option<f64> {
    value?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
}

/// Parse a `"num/den"` rational (or plain number) and round to whole frames.
fn parse_frame_rate(value: Option<&str>) -> Option<u32> {
    let value = value?.trim();
    let rate = match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => value.parse().ok()?,
    };

    if !rate.is_finite() || rate <= 0.0 {
        return None;
    }
    let rounded = rate.round();
    if rounded < 1.0 || rounded > f64::from(u32::MAX) {
        return None;
    }
    Some(rounded as u32)
}
