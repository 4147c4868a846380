use std::sync::Arc;

use log::{info, warn};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::error::{ErrorKind, SessionError, SessionResult};
use crate::orchestrator::{Orchestrator, SessionDeps};
use crate::planner::SegmentKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Preparing,
    StreamingWaiting,
    StreamingCountdown,
    StreamingMain,
    Aborting,
}

impl Phase {
    pub fn streaming(kind: SegmentKind) -> Self {
        match kind {
            SegmentKind::Waiting => Phase::StreamingWaiting,
            SegmentKind::Countdown => Phase::StreamingCountdown,
            SegmentKind::Main => Phase::StreamingMain,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub phase: Phase,
    /// Why the last session ended early. User stops are not errors.
    pub last_error: Option<(ErrorKind, String)>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus {
            state: SessionState::Idle,
            phase: Phase::Idle,
            last_error: None,
        }
    }
}

struct Session {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the one session the process may run at a time.
pub struct SessionManager {
    deps: SessionDeps,
    status: Arc<watch::Sender<SessionStatus>>,
    session: Mutex<Option<Session>>,
}

impl SessionManager {
    pub fn new(deps: SessionDeps) -> Self {
        let (status, _) = watch::channel(SessionStatus::default());
        SessionManager {
            deps,
            status: Arc::new(status),
            session: Mutex::new(None),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Validates `config` and starts streaming it in the background.
    pub async fn start(&self, config: SessionConfig) -> SessionResult<SessionStatus> {
        let mut slot = self.session.lock().await;
        if self.status.borrow().state != SessionState::Idle {
            return Err(SessionError::AlreadyRunning);
        }
        config.validate()?;

        self.status.send_modify(|status| {
            status.state = SessionState::Running;
            status.phase = Phase::Preparing;
            status.last_error = None;
        });

        let cancel = CancellationToken::new();
        let orchestrator = Orchestrator::new(
            config,
            self.deps.clone(),
            self.status.clone(),
            cancel.clone(),
        );
        let task = tokio::spawn(async move {
            // the orchestrator reports its own outcome through the status channel
            let _ = orchestrator.run().await;
        });
        info!("session started");
        *slot = Some(Session { cancel, task });
        Ok(self.status())
    }

    /// Cancels the running session and waits until its encoder has exited.
    /// Stopping an idle manager does nothing.
    pub async fn stop(&self) -> SessionResult<SessionStatus> {
        let mut slot = self.session.lock().await;
        let Some(session) = slot.take() else {
            return Ok(self.status());
        };

        if !session.task.is_finished() {
            info!("stopping session");
            self.status.send_if_modified(|status| {
                if status.state == SessionState::Running {
                    status.state = SessionState::Stopping;
                    true
                } else {
                    false
                }
            });
        }
        session.cancel.cancel();

        if let Err(err) = session.task.await {
            warn!("session task failed: {}", err);
            self.status.send_modify(|status| {
                status.state = SessionState::Idle;
                status.phase = Phase::Idle;
            });
        }
        Ok(self.status())
    }
}
