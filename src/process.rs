use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use log::debug;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

/// A running encoder invocation.
#[async_trait]
pub trait EncoderProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Asks the process to exit. Does not wait.
    fn terminate(&mut self) -> io::Result<()>;

    async fn wait(&mut self) -> io::Result<ExitStatus>;

    async fn kill(&mut self) -> io::Result<()>;
}

pub trait ProcessLauncher: Send + Sync {
    fn launch(
        &self,
        program: &Path,
        args: &[String],
        cwd: &Path,
        tag: &str,
    ) -> io::Result<Box<dyn EncoderProcess>>;
}

/// Spawns real encoder processes with tokio.
pub struct CommandLauncher;

impl ProcessLauncher for CommandLauncher {
    fn launch(
        &self,
        program: &Path,
        args: &[String],
        cwd: &Path,
        tag: &str,
    ) -> io::Result<Box<dyn EncoderProcess>> {
        debug!("[{}] {} {}", tag, program.display(), args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(stderr) = child.stderr.take() {
            let tag = tag.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[{}] {}", tag, line);
                }
            });
        }

        Ok(Box::new(ChildProcess { child }))
    }
}

struct ChildProcess {
    child: Child,
}

#[async_trait]
impl EncoderProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn terminate(&mut self) -> io::Result<()> {
        // id() is None once the child has been reaped
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(err);
            }
        }
        Ok(())
    }

    async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }
}
