use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tokio_stream::wrappers::WatchStream;
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status};

use crate::config::{SessionConfig, StreamTarget};
use crate::error::ErrorKind;
use crate::service::{
    stream_scheduler_server::StreamScheduler, GetStatusRequest, StartSessionRequest,
    StartSessionResponse, StopSessionRequest, StopSessionResponse,
};
use crate::service;
use crate::session::{Phase, SessionManager, SessionState, SessionStatus};

pub struct ServerInner {
    sessions: Arc<SessionManager>,
    default_rtmp_base_url: String,
}

impl ServerInner {
    pub fn new(sessions: Arc<SessionManager>, default_rtmp_base_url: String) -> Self {
        ServerInner {
            sessions,
            default_rtmp_base_url,
        }
    }

    fn session_config(&self, request: StartSessionRequest) -> SessionConfig {
        let optional = |enabled: bool, path: String| {
            (enabled && !path.trim().is_empty()).then(|| PathBuf::from(path))
        };
        let rtmp_base_url = if request.rtmp_base_url.trim().is_empty() {
            self.default_rtmp_base_url.clone()
        } else {
            request.rtmp_base_url
        };

        SessionConfig {
            target: StreamTarget {
                rtmp_base_url,
                stream_key: request.stream_key,
            },
            main_video: PathBuf::from(request.main_video),
            countdown_video: optional(request.countdown_enabled, request.countdown_video),
            waiting_source: optional(request.waiting_enabled, request.waiting_source),
            start_time: request.start_time,
        }
    }
}

impl From<SessionStatus> for service::SessionStatus {
    fn from(status: SessionStatus) -> Self {
        let state = match status.state {
            SessionState::Idle => service::SessionState::Idle,
            SessionState::Running => service::SessionState::Running,
            SessionState::Stopping => service::SessionState::Stopping,
        };
        let phase = match status.phase {
            Phase::Idle => service::SessionPhase::Idle,
            Phase::Preparing => service::SessionPhase::Preparing,
            Phase::StreamingWaiting => service::SessionPhase::StreamingWaiting,
            Phase::StreamingCountdown => service::SessionPhase::StreamingCountdown,
            Phase::StreamingMain => service::SessionPhase::StreamingMain,
            Phase::Aborting => service::SessionPhase::Aborting,
        };
        let (last_error, error_message) = match status.last_error {
            Some((kind, message)) => (error_kind(kind), message),
            None => (service::ErrorKind::None, String::new()),
        };

        service::SessionStatus {
            state: state as i32,
            phase: phase as i32,
            last_error: last_error as i32,
            error_message,
        }
    }
}

fn error_kind(kind: ErrorKind) -> service::ErrorKind {
    match kind {
        ErrorKind::InvalidTimeFormat => service::ErrorKind::InvalidTimeFormat,
        ErrorKind::MissingInput => service::ErrorKind::MissingInput,
        ErrorKind::LaunchFailure => service::ErrorKind::LaunchFailure,
        ErrorKind::ProbeFailure => service::ErrorKind::ProbeFailure,
        ErrorKind::TerminationTimeout => service::ErrorKind::TerminationTimeout,
        ErrorKind::RenderFailure => service::ErrorKind::RenderFailure,
        ErrorKind::Internal => service::ErrorKind::Internal,
    }
}

type StatusStream = Pin<Box<dyn Stream<Item = Result<service::SessionStatus, Status>> + Send>>;

#[tonic::async_trait]
impl StreamScheduler for ServerInner {
    async fn start_session(
        &self,
        request: Request<StartSessionRequest>,
    ) -> Result<Response<StartSessionResponse>, Status> {
        let config = self.session_config(request.into_inner());
        let status = self.sessions.start(config).await?;

        Ok(Response::new(StartSessionResponse {
            status: Some(status.into()),
        }))
    }

    async fn stop_session(
        &self,
        _request: Request<StopSessionRequest>,
    ) -> Result<Response<StopSessionResponse>, Status> {
        let status = self.sessions.stop().await?;

        Ok(Response::new(StopSessionResponse {
            status: Some(status.into()),
        }))
    }

    async fn get_status(
        &self,
        _request: Request<GetStatusRequest>,
    ) -> Result<Response<service::SessionStatus>, Status> {
        Ok(Response::new(self.sessions.status().into()))
    }

    type WatchStatusStream = StatusStream;

    async fn watch_status(
        &self,
        _request: Request<GetStatusRequest>,
    ) -> Result<Response<Self::WatchStatusStream>, Status> {
        let stream = WatchStream::new(self.sessions.subscribe()).map(|status| Ok(status.into()));
        Ok(Response::new(Box::pin(stream)))
    }
}
