use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, SessionError, SessionResult};
use crate::planner::parse_start_time;

pub const DEFAULT_LISTEN_ADDR: &str = "[::1]:50051";
pub const DEFAULT_RTMP_BASE_URL: &str = "rtmp://a.rtmp.youtube.com/live2";
pub const DEFAULT_PROBE_FALLBACK_SECS: u64 = 180;
pub const DEFAULT_TERMINATION_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_WAITING_CLIP_SECS: u64 = 5;

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub listen_addr: SocketAddr,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub rtmp_base_url: String,
    pub work_dir: PathBuf,
    pub probe_fallback: Duration,
    pub termination_timeout: Duration,
    pub waiting_clip: Duration,
}

impl Settings {
    /// Reads settings from the environment. Call `dotenv()` first to pick up `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str, default: &str| lookup(var).unwrap_or_else(|| default.to_string());

        Ok(Settings {
            listen_addr: parse_var("SCHEDULER_LISTEN_ADDR", get("SCHEDULER_LISTEN_ADDR", DEFAULT_LISTEN_ADDR))?,
            ffmpeg_path: get("FFMPEG_PATH", "ffmpeg").into(),
            ffprobe_path: get("FFPROBE_PATH", "ffprobe").into(),
            rtmp_base_url: get("RTMP_BASE_URL", DEFAULT_RTMP_BASE_URL),
            work_dir: get("WORK_DIR", "./work").into(),
            probe_fallback: secs_var(&lookup, "PROBE_FALLBACK_SECS", DEFAULT_PROBE_FALLBACK_SECS)?,
            termination_timeout: secs_var(
                &lookup,
                "TERMINATION_TIMEOUT_SECS",
                DEFAULT_TERMINATION_TIMEOUT_SECS,
            )?,
            waiting_clip: secs_var(&lookup, "WAITING_CLIP_SECS", DEFAULT_WAITING_CLIP_SECS)?,
        })
    }
}

fn parse_var<T: FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { var, value })
}

fn secs_var<F>(lookup: &F, var: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(value) => parse_var::<u64>(var, value).map(Duration::from_secs),
        None => Ok(Duration::from_secs(default)),
    }
}

/// Destination the encoder publishes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    pub rtmp_base_url: String,
    pub stream_key: String,
}

impl StreamTarget {
    pub fn publish_url(&self) -> String {
        format!(
            "{}/{}",
            self.rtmp_base_url.trim_end_matches('/'),
            self.stream_key
        )
    }
}

/// Everything one session needs, captured once when the session starts.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub target: StreamTarget,
    pub main_video: PathBuf,
    /// `None` when the countdown is disabled.
    pub countdown_video: Option<PathBuf>,
    /// `None` when the waiting loop is disabled. May be a still image.
    pub waiting_source: Option<PathBuf>,
    pub start_time: String,
}

impl SessionConfig {
    pub fn validate(&self) -> SessionResult<()> {
        if self.target.stream_key.trim().is_empty() {
            return Err(SessionError::MissingInput("stream key"));
        }
        if self.main_video.as_os_str().is_empty() {
            return Err(SessionError::MissingInput("main video"));
        }
        parse_start_time(&self.start_time)?;
        Ok(())
    }
}
