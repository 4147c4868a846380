//! Fakes for driving sessions without real encoders or wall-clock waits.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::time::Instant;

use crate::config::Settings;
use crate::error::{SessionError, SessionResult};
use crate::orchestrator::SessionDeps;
use crate::probe::DurationProbe;
use crate::process::{EncoderProcess, ProcessLauncher};
use crate::transition::Clock;

/// Wall clock that advances with tokio's (pausable) time.
pub struct TokioClock {
    base: DateTime<Local>,
    started: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::starting_at(Local::now())
    }

    pub fn starting_at(base: DateTime<Local>) -> Self {
        TokioClock {
            base,
            started: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Local> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed()).unwrap();
        self.base + elapsed
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FakeBehavior {
    runtime: Option<Duration>,
    exit_code: i32,
    ignores_terminate: bool,
}

impl Default for FakeBehavior {
    /// Runs until terminated, like a looping or live publish.
    fn default() -> Self {
        FakeBehavior {
            runtime: None,
            exit_code: 0,
            ignores_terminate: false,
        }
    }
}

impl FakeBehavior {
    pub fn runs_for(runtime: Duration) -> Self {
        FakeBehavior {
            runtime: Some(runtime),
            ..Default::default()
        }
    }

    pub fn exits_with(code: i32, runtime: Duration) -> Self {
        FakeBehavior {
            runtime: Some(runtime),
            exit_code: code,
            ..Default::default()
        }
    }

    pub fn ignores_terminate() -> Self {
        FakeBehavior {
            ignores_terminate: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct LaunchRecord {
    pub tag: String,
    pub args: Vec<String>,
    pub at: Instant,
}

#[derive(Default)]
struct Counters {
    live: AtomicUsize,
    max_live: AtomicUsize,
    terminations: AtomicUsize,
    kills: AtomicUsize,
}

/// Launcher whose processes only exist in memory. Behaviour is picked by the first rule
/// whose pattern appears in any argument.
#[derive(Default)]
pub struct FakeLauncher {
    rules: Vec<(String, FakeBehavior)>,
    failures: Vec<String>,
    counters: Arc<Counters>,
    launches: Mutex<Vec<LaunchRecord>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, pattern: &str, behavior: FakeBehavior) -> Self {
        self.rules.push((pattern.to_string(), behavior));
        self
    }

    /// Launching with an argument containing `pattern` fails as if the binary were missing.
    pub fn fail_on(mut self, pattern: &str) -> Self {
        self.failures.push(pattern.to_string());
        self
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.launches.lock().unwrap().clone()
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.counters.max_live.load(Ordering::SeqCst)
    }

    pub fn terminations(&self) -> usize {
        self.counters.terminations.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.counters.kills.load(Ordering::SeqCst)
    }
}

fn matches(args: &[String], pattern: &str) -> bool {
    args.iter().any(|arg| arg.contains(pattern))
}

impl ProcessLauncher for FakeLauncher {
    fn launch(
        &self,
        _program: &Path,
        args: &[String],
        _cwd: &Path,
        tag: &str,
    ) -> io::Result<Box<dyn EncoderProcess>> {
        if self.failures.iter().any(|p| matches(args, p)) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such encoder"));
        }
        let behavior = self
            .rules
            .iter()
            .find(|(p, _)| matches(args, p))
            .map(|(_, b)| *b)
            .unwrap_or_default();

        let mut launches = self.launches.lock().unwrap();
        launches.push(LaunchRecord {
            tag: tag.to_string(),
            args: args.to_vec(),
            at: Instant::now(),
        });
        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_live.fetch_max(live, Ordering::SeqCst);

        Ok(Box::new(FakeProcess {
            id: 1000 + launches.len() as u32,
            deadline: behavior.runtime.map(|r| Instant::now() + r),
            behavior,
            terminated: false,
            exited: None,
            counters: self.counters.clone(),
        }))
    }
}

struct FakeProcess {
    id: u32,
    behavior: FakeBehavior,
    deadline: Option<Instant>,
    terminated: bool,
    exited: Option<ExitStatus>,
    counters: Arc<Counters>,
}

impl FakeProcess {
    fn exit(&mut self, status: ExitStatus) -> ExitStatus {
        if self.exited.is_none() {
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
            self.exited = Some(status);
        }
        self.exited.unwrap_or(status)
    }
}

#[async_trait]
impl EncoderProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        self.exited.is_none().then_some(self.id)
    }

    fn terminate(&mut self) -> io::Result<()> {
        if self.exited.is_none() {
            self.counters.terminations.fetch_add(1, Ordering::SeqCst);
            self.terminated = true;
        }
        Ok(())
    }

    async fn wait(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.exited {
            return Ok(status);
        }
        if self.terminated && !self.behavior.ignores_terminate {
            // 255 is what ffmpeg reports after SIGTERM
            return Ok(self.exit(ExitStatus::from_raw(255 << 8)));
        }
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                let code = self.behavior.exit_code;
                Ok(self.exit(ExitStatus::from_raw(code << 8)))
            }
            None => std::future::pending().await,
        }
    }

    async fn kill(&mut self) -> io::Result<()> {
        if self.exited.is_none() {
            self.counters.kills.fetch_add(1, Ordering::SeqCst);
            self.exit(ExitStatus::from_raw(libc::SIGKILL));
        }
        Ok(())
    }
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        if self.exited.is_none() {
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

pub struct FixedProbe {
    result: Option<Duration>,
}

impl FixedProbe {
    pub fn new(duration: Duration) -> Self {
        FixedProbe {
            result: Some(duration),
        }
    }

    pub fn failing() -> Self {
        FixedProbe { result: None }
    }
}

#[async_trait]
impl DurationProbe for FixedProbe {
    async fn probe(&self, path: &Path) -> SessionResult<Duration> {
        self.result.ok_or_else(|| SessionError::ProbeFailure {
            path: path.to_path_buf(),
            message: "probe disabled".to_string(),
        })
    }
}

pub fn settings(work_dir: PathBuf) -> Settings {
    let mut settings = Settings::from_lookup(|_| None).unwrap();
    settings.work_dir = work_dir;
    settings
}

/// Session collaborators backed by fakes, with a countdown probe of 30s.
pub fn deps(work_dir: PathBuf, launcher: Arc<FakeLauncher>, now: DateTime<Local>) -> SessionDeps {
    SessionDeps {
        settings: Arc::new(settings(work_dir)),
        launcher,
        probe: Arc::new(FixedProbe::new(Duration::from_secs(30))),
        clock: Arc::new(TokioClock::starting_at(now)),
    }
}
