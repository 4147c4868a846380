//! Stream session controller.
//!
//! Owns the one encoder process that may publish to the destination. Every start, stop and
//! wait goes through here, and a new segment cannot start while the previous one is live.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::StreamTarget;
use crate::encoder::PublishCommand;
use crate::error::{SessionError, SessionResult};
use crate::planner::{Segment, SegmentKind};
use crate::process::{EncoderProcess, ProcessLauncher};

/// Identifies the segment a controller call refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHandle {
    id: u64,
    pub kind: SegmentKind,
}

#[derive(Debug)]
pub enum Completion {
    Exited(ExitStatus),
    Cancelled,
}

struct ActiveEncoder {
    handle: SegmentHandle,
    process: Box<dyn EncoderProcess>,
}

pub struct StreamController {
    launcher: Arc<dyn ProcessLauncher>,
    ffmpeg: PathBuf,
    cwd: PathBuf,
    target: StreamTarget,
    termination_timeout: Duration,
    active: Option<ActiveEncoder>,
    next_id: u64,
}

impl StreamController {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        ffmpeg: PathBuf,
        cwd: PathBuf,
        target: StreamTarget,
        termination_timeout: Duration,
    ) -> Self {
        StreamController {
            launcher,
            ffmpeg,
            cwd,
            target,
            termination_timeout,
            active: None,
            next_id: 0,
        }
    }

    pub fn active_kind(&self) -> Option<SegmentKind> {
        self.active.as_ref().map(|a| a.handle.kind)
    }

    pub fn start(&mut self, segment: &Segment) -> SessionResult<SegmentHandle> {
        if let Some(active) = &self.active {
            return Err(SessionError::EncoderBusy {
                active: active.handle.kind,
            });
        }

        let args = PublishCommand::new(&segment.source, self.target.publish_url())
            .looping(segment.looping)
            .build_args();
        let process = self
            .launcher
            .launch(&self.ffmpeg, &args, &self.cwd, &segment.kind.to_string())
            .map_err(|source| SessionError::LaunchFailure {
                kind: segment.kind,
                source,
            })?;

        self.next_id += 1;
        let handle = SegmentHandle {
            id: self.next_id,
            kind: segment.kind,
        };
        info!(
            "{} segment streaming {:?} (pid {:?}, loop {})",
            segment.kind,
            segment.source,
            process.id(),
            segment.looping
        );
        self.active = Some(ActiveEncoder { handle, process });
        Ok(handle)
    }

    /// Blocks until the segment's encoder exits by itself, or stops it on cancellation.
    pub async fn await_completion(
        &mut self,
        handle: SegmentHandle,
        cancel: &CancellationToken,
    ) -> SessionResult<Completion> {
        let outcome = {
            let Some(active) = self.active.as_mut().filter(|a| a.handle == handle) else {
                return Ok(Completion::Cancelled);
            };
            tokio::select! {
                status = active.process.wait() => Some(status),
                _ = cancel.cancelled() => None,
            }
        };

        match outcome {
            Some(status) => {
                self.active = None;
                let status = status?;
                if status.success() {
                    info!("{} segment finished", handle.kind);
                } else {
                    warn!("{} segment encoder exited with {}", handle.kind, status);
                }
                Ok(Completion::Exited(status))
            }
            None => {
                self.stop(handle).await?;
                Ok(Completion::Cancelled)
            }
        }
    }

    /// Terminates the segment's encoder and returns once it has exited.
    /// A stale or already stopped handle is a no-op.
    pub async fn stop(&mut self, handle: SegmentHandle) -> SessionResult<()> {
        if self.active.as_ref().map(|a| a.handle) != Some(handle) {
            return Ok(());
        }
        self.stop_active().await
    }

    pub async fn stop_active(&mut self) -> SessionResult<()> {
        let Some(mut active) = self.active.take() else {
            return Ok(());
        };
        let kind = active.handle.kind;
        let pid = active.process.id();

        if let Err(err) = active.process.terminate() {
            warn!("failed to signal {} encoder: {}", kind, err);
        }

        match tokio::time::timeout(self.termination_timeout, active.process.wait()).await {
            Ok(Ok(status)) => info!("{} segment stopped ({})", kind, status),
            Ok(Err(err)) => warn!("waiting on {} encoder failed: {}", kind, err),
            Err(_) => {
                let err = SessionError::TerminationTimeout {
                    pid,
                    secs: self.termination_timeout.as_secs(),
                };
                warn!("{}, killing", err);
                active.process.kill().await?;
            }
        }
        Ok(())
    }
}
