//! Media duration probing.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::process::Command;

use crate::error::{SessionError, SessionResult};

#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> SessionResult<Duration>;
}

/// Asks ffprobe for the container duration, falling back to the `Duration:` banner of
/// `ffmpeg -i` when ffprobe is unavailable.
pub struct FfprobeDuration {
    ffprobe: PathBuf,
    ffmpeg: PathBuf,
}

impl FfprobeDuration {
    pub fn new(ffprobe: PathBuf, ffmpeg: PathBuf) -> Self {
        FfprobeDuration { ffprobe, ffmpeg }
    }

    async fn from_ffprobe(&self, path: &Path) -> Result<Duration, String> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| format!("ffprobe: {e}"))?;

        if !output.status.success() {
            return Err(format!(
                "ffprobe exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(seconds)
            .ok_or_else(|| format!("ffprobe printed {:?}", stdout.trim()))
    }

    async fn from_banner(&self, path: &Path) -> Result<Duration, String> {
        // ffmpeg exits non-zero without an output file, the banner is still printed
        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-i"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| format!("ffmpeg: {e}"))?;

        String::from_utf8_lossy(&output.stderr)
            .lines()
            .find_map(parse_duration_line)
            .ok_or_else(|| "no Duration line in ffmpeg output".to_string())
    }
}

#[async_trait]
impl DurationProbe for FfprobeDuration {
    async fn probe(&self, path: &Path) -> SessionResult<Duration> {
        let first = match self.from_ffprobe(path).await {
            Ok(duration) => return Ok(duration),
            Err(message) => message,
        };
        debug!("{}, trying ffmpeg banner", first);

        self.from_banner(path)
            .await
            .map_err(|second| SessionError::ProbeFailure {
                path: path.to_path_buf(),
                message: format!("{first}; {second}"),
            })
    }
}

/// Probes `path`, substituting `fallback` when the probe fails.
pub async fn duration_or_fallback(
    probe: &dyn DurationProbe,
    path: &Path,
    fallback: Duration,
) -> Duration {
    match probe.probe(path).await {
        Ok(duration) => duration,
        Err(err) => {
            warn!("{}, assuming {}s", err, fallback.as_secs());
            fallback
        }
    }
}

/// Parses `  Duration: 00:01:30.50, start: 0.000000, bitrate: ...`.
fn parse_duration_line(line: &str) -> Option<Duration> {
    let (_, rest) = line.split_once("Duration:")?;
    let stamp = rest.split(',').next()?.trim();
    let mut parts = stamp.split(':');
    let h: f64 = parts.next()?.parse().ok()?;
    let m: f64 = parts.next()?.parse().ok()?;
    let s: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    seconds(h * 3600.0 + m * 60.0 + s)
}

fn seconds(value: f64) -> Option<Duration> {
    (value.is_finite() && value >= 0.0).then(|| Duration::from_secs_f64(value))
}
