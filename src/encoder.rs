//! Encoder argument templates.

use std::path::{Path, PathBuf};
use std::time::Duration;

const VIDEO_CODEC: &str = "libx264";
const PRESET: &str = "veryfast";
const MAX_RATE: &str = "6000k";
const BUF_SIZE: &str = "6000k";
const PIXEL_FORMAT: &str = "yuv420p";
const KEYFRAME_INTERVAL: &str = "120";
const AUDIO_CODEC: &str = "aac";
const AUDIO_BITRATE: &str = "160k";
const CONTAINER: &str = "flv";

const CLIP_SCALE: &str = "scale=1280:720";
const SILENT_AUDIO: &str = "anullsrc=channel_layout=stereo:sample_rate=44100";

/// Real-time publish of one input file to an RTMP destination.
#[derive(Debug, Clone)]
pub struct PublishCommand {
    input: PathBuf,
    destination: String,
    looping: bool,
}

impl PublishCommand {
    pub fn new(input: impl AsRef<Path>, destination: impl Into<String>) -> Self {
        PublishCommand {
            input: input.as_ref().to_path_buf(),
            destination: destination.into(),
            looping: false,
        }
    }

    /// Repeat the input until the process is stopped.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(32);
        if self.looping {
            args.extend(["-stream_loop", "-1"].map(String::from));
        }
        args.extend(["-re", "-i"].map(String::from));
        args.push(self.input.to_string_lossy().into_owned());
        args.extend(
            [
                "-c:v", VIDEO_CODEC,
                "-preset", PRESET,
                "-maxrate", MAX_RATE,
                "-bufsize", BUF_SIZE,
                "-pix_fmt", PIXEL_FORMAT,
                "-g", KEYFRAME_INTERVAL,
                "-c:a", AUDIO_CODEC,
                "-b:a", AUDIO_BITRATE,
                "-f", CONTAINER,
            ]
            .map(String::from),
        );
        args.push(self.destination.clone());
        args
    }
}

/// Renders a still image into a short clip with a silent audio track.
#[derive(Debug, Clone)]
pub struct StillClipCommand {
    image: PathBuf,
    output: PathBuf,
    length: Duration,
}

impl StillClipCommand {
    pub fn new(image: impl AsRef<Path>, output: impl AsRef<Path>, length: Duration) -> Self {
        StillClipCommand {
            image: image.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            length,
        }
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec!["-loop".to_string(), "1".to_string(), "-i".to_string()];
        args.push(self.image.to_string_lossy().into_owned());
        args.extend(
            [
                "-f", "lavfi",
                "-i", SILENT_AUDIO,
                "-c:v", VIDEO_CODEC,
                "-c:a", AUDIO_CODEC,
                "-shortest",
                "-t",
            ]
            .map(String::from),
        );
        args.push(self.length.as_secs().to_string());
        args.extend(["-pix_fmt", PIXEL_FORMAT, "-vf", CLIP_SCALE, "-y"].map(String::from));
        args.push(self.output.to_string_lossy().into_owned());
        args
    }
}

pub fn is_still_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            matches!(
                ext.to_ascii_lowercase().as_str(),
                "png" | "jpg" | "jpeg" | "bmp" | "webp"
            )
        })
        .unwrap_or(false)
}
