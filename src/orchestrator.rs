//! Runs one session from preparation to the end of the main segment.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, info};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::{SessionConfig, Settings};
use crate::controller::{Completion, StreamController};
use crate::encoder::{is_still_image, StillClipCommand};
use crate::error::{SessionError, SessionResult};
use crate::planner::{plan, PlanInputs, SegmentKind, Timeline};
use crate::probe::{duration_or_fallback, DurationProbe};
use crate::process::ProcessLauncher;
use crate::session::{Phase, SessionState, SessionStatus};
use crate::staging::Staging;
use crate::transition::{await_instant, Clock, WaitOutcome};

const WAITING_CLIP_NAME: &str = "waiting_loop.mp4";

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct SessionDeps {
    pub settings: Arc<Settings>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub probe: Arc<dyn DurationProbe>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Default)]
struct Resources {
    staging: Option<Staging>,
    controller: Option<StreamController>,
}

pub struct Orchestrator {
    config: SessionConfig,
    deps: SessionDeps,
    status: Arc<watch::Sender<SessionStatus>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        config: SessionConfig,
        deps: SessionDeps,
        status: Arc<watch::Sender<SessionStatus>>,
        cancel: CancellationToken,
    ) -> Self {
        Orchestrator {
            config,
            deps,
            status,
            cancel,
        }
    }

    /// Drives the session to completion. Whatever happens, no encoder is left running and
    /// the status is back to idle when this returns.
    pub async fn run(self) -> SessionResult<()> {
        let mut resources = Resources::default();
        let result = self.drive(&mut resources).await;

        match &result {
            Ok(()) => info!("session finished"),
            Err(SessionError::Cancelled) => info!("session cancelled"),
            Err(err) => error!("session aborted: {}", err),
        }
        if result.is_err() {
            self.set_phase(Phase::Aborting);
        }
        self.unwind(&mut resources).await;

        let last_error = match &result {
            Err(SessionError::Cancelled) | Ok(()) => None,
            Err(err) => Some((err.kind(), err.to_string())),
        };
        self.status.send_modify(|status| {
            status.state = SessionState::Idle;
            status.phase = Phase::Idle;
            status.last_error = last_error;
        });
        result
    }

    async fn drive(&self, resources: &mut Resources) -> SessionResult<()> {
        self.set_phase(Phase::Preparing);
        self.config.validate()?;
        self.check_cancelled()?;

        let settings = &self.deps.settings;
        let staging = resources
            .staging
            .insert(Staging::create(&settings.work_dir).await?);

        let main = staging.stage(&self.config.main_video).await?;
        let countdown = match &self.config.countdown_video {
            Some(path) => Some(staging.stage(path).await?),
            None => None,
        };
        let waiting = match &self.config.waiting_source {
            Some(path) => Some(self.prepare_waiting(staging, path).await?),
            None => None,
        };
        self.check_cancelled()?;

        let countdown = match countdown {
            Some(path) => {
                let length = tokio::select! {
                    length = duration_or_fallback(self.deps.probe.as_ref(), &path, settings.probe_fallback) => length,
                    _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
                };
                info!("countdown runs {}s", length.as_secs());
                Some((path, length))
            }
            None => None,
        };

        let timeline = plan(
            self.deps.clock.now(),
            &PlanInputs {
                stream_key: &self.config.target.stream_key,
                start_time: &self.config.start_time,
                main_video: &main,
                countdown: countdown.as_ref().map(|(path, length)| (path.as_path(), *length)),
                waiting: waiting.as_deref(),
            },
        )?;
        for entry in timeline.entries() {
            debug!("planned {} segment at {}", entry.segment.kind, entry.planned_start);
        }
        info!("main segment goes live at {}", timeline.main().planned_start);

        let controller = resources.controller.insert(StreamController::new(
            self.deps.launcher.clone(),
            settings.ffmpeg_path.clone(),
            staging.root().to_path_buf(),
            self.config.target.clone(),
            settings.termination_timeout,
        ));
        self.stream(controller, &timeline).await
    }

    async fn stream(&self, controller: &mut StreamController, timeline: &Timeline) -> SessionResult<()> {
        let clock = self.deps.clock.as_ref();
        let entries = timeline.entries();
        // a segment that follows a finite one starts as soon as the previous one ends
        let mut timed = true;

        for (i, entry) in entries.iter().enumerate() {
            let segment = &entry.segment;
            if timed && await_instant(clock, entry.planned_start, &self.cancel).await == WaitOutcome::Cancelled {
                return Err(SessionError::Cancelled);
            }

            self.set_phase(Phase::streaming(segment.kind));
            let handle = controller.start(segment)?;

            if segment.looping {
                let until = entries
                    .get(i + 1)
                    .map(|next| next.planned_start)
                    .unwrap_or(entry.planned_start);
                let outcome = await_instant(clock, until, &self.cancel).await;
                controller.stop(handle).await?;
                if outcome == WaitOutcome::Cancelled {
                    return Err(SessionError::Cancelled);
                }
                timed = true;
            } else {
                match controller.await_completion(handle, &self.cancel).await? {
                    Completion::Exited(status) => {
                        debug!("{} segment ended with {}", segment.kind, status)
                    }
                    Completion::Cancelled => return Err(SessionError::Cancelled),
                }
                timed = false;
            }
        }
        Ok(())
    }

    /// Stages the waiting source, rendering a still image into a short loopable clip.
    async fn prepare_waiting(&self, staging: &mut Staging, source: &Path) -> SessionResult<PathBuf> {
        let staged = staging.stage(source).await?;
        if !is_still_image(&staged) {
            return Ok(staged);
        }

        let clip = staging.intermediate(WAITING_CLIP_NAME);
        let args = StillClipCommand::new(&staged, &clip, self.deps.settings.waiting_clip).build_args();
        info!("rendering waiting clip from {}", staged.display());

        let mut process = self
            .deps
            .launcher
            .launch(&self.deps.settings.ffmpeg_path, &args, staging.root(), "render")
            .map_err(|source| SessionError::LaunchFailure {
                kind: SegmentKind::Waiting,
                source,
            })?;

        let outcome = tokio::select! {
            status = process.wait() => Some(status),
            _ = self.cancel.cancelled() => None,
        };
        let Some(status) = outcome else {
            process.kill().await?;
            return Err(SessionError::Cancelled);
        };

        let status = status?;
        if !status.success() {
            return Err(SessionError::RenderFailure(status.code()));
        }
        Ok(clip)
    }

    async fn unwind(&self, resources: &mut Resources) {
        if let Some(controller) = resources.controller.as_mut() {
            if let Some(kind) = controller.active_kind() {
                info!("stopping {} segment", kind);
            }
            if let Err(err) = controller.stop_active().await {
                error!("failed to stop encoder: {}", err);
            }
        }
        if let Some(staging) = resources.staging.as_mut() {
            staging.release().await;
        }
    }

    fn check_cancelled(&self) -> SessionResult<()> {
        if self.cancel.is_cancelled() {
            Err(SessionError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_phase(&self, phase: Phase) {
        info!("session phase: {:?}", phase);
        self.status.send_modify(|status| status.phase = phase);
    }
}
