//! External initializer invocation.
//!
//! Runs an out-of-process setup script with a hard wall-clock limit. The
//! contract with the script is its exit code and output only; the resolved
//! connection is passed through environment variables.
//!
//! On Unix the script runs in its own process group. The whole group is
//! killed on timeout, and also when background processes it left behind
//! still hold the output pipes after it exits. Output is kept as it
//! arrives, so a failure always reports what the script printed.

use crate::error::{BootstrapError, Result};
use crate::profile::ConnectionTarget;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default wall-clock limit; full schema setup can be slow.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// How long to wait for the output pipes to close once the child is gone.
const OUTPUT_GRACE: Duration = Duration::from_secs(1);

/// What a finished initializer produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializerOutput {
    /// Process exit code
    pub exit_code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Wall-clock run time
    pub elapsed: Duration,
}

/// Result of a successful invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitializerStatus {
    /// No script at the configured path
    Missing,
    /// The script ran and exited zero
    Completed(InitializerOutput),
}

/// An initializer script invocation.
#[derive(Clone)]
pub struct ExternalInitializer {
    path: PathBuf,
    timeout: Duration,
    env: Vec<(String, String)>,
}

impl std::fmt::Debug for ExternalInitializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Values may hold credentials; show names only.
        let keys: Vec<&str> = self.env.iter().map(|(key, _)| key.as_str()).collect();
        f.debug_struct("ExternalInitializer")
            .field("path", &self.path)
            .field("timeout", &self.timeout)
            .field("env", &keys)
            .finish()
    }
}

impl ExternalInitializer {
    /// Creates an invocation of the script at `path` with the default timeout.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: DEFAULT_TIMEOUT,
            env: Vec::new(),
        }
    }

    /// Builder method to set the timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builder method to add one environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Builder method exporting a connection target to the script.
    #[must_use]
    pub fn with_target(mut self, target: &ConnectionTarget) -> Self {
        self.env.extend(
            target
                .environment()
                .into_iter()
                .map(|(key, value)| (key.to_string(), value)),
        );
        self
    }

    /// Script path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs the script, blocking until it exits or the timeout fires.
    ///
    /// # Errors
    /// Returns [`BootstrapError::InitializerProcessFailed`] if the script
    /// cannot start, exits nonzero, or is killed on timeout.
    pub fn run(&self) -> Result<InitializerStatus> {
        if !self.path.exists() {
            info!(
                "Initializer {} not found; assuming the database is already provisioned",
                self.path.display()
            );
            return Ok(InitializerStatus::Missing);
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BootstrapError::io("failed to start initializer runtime", e))?;
        runtime.block_on(self.run_child())
    }

    async fn run_child(&self) -> Result<InitializerStatus> {
        info!(
            "Running initializer {} (timeout {:?})",
            self.path.display(),
            self.timeout
        );

        let mut command = tokio::process::Command::from(self.command());
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = command.spawn().map_err(|e| {
            self.failure(
                format!("could not be started: {e}"),
                None,
                false,
                String::new(),
                String::new(),
            )
        })?;

        let pid = child.id();
        let stdout = child.stdout.take().map(Capture::start);
        let stderr = child.stderr.take().map(Capture::start);

        let waited = tokio::time::timeout(self.timeout, child.wait()).await;
        match waited {
            Ok(Ok(status)) => {
                let (stdout, stderr) = drain(pid, stdout, stderr).await;
                let output = InitializerOutput {
                    exit_code: status.code(),
                    stdout,
                    stderr,
                    elapsed: started.elapsed(),
                };
                if status.success() {
                    info!("Initializer finished in {:?}", output.elapsed);
                    Ok(InitializerStatus::Completed(output))
                } else {
                    let reason = status.code().map_or_else(
                        || "was terminated by a signal".to_string(),
                        |code| format!("exited with code {code}"),
                    );
                    Err(self.failure(reason, output.exit_code, false, output.stdout, output.stderr))
                }
            }
            Ok(Err(e)) => Err(BootstrapError::io(
                format!("failed waiting for initializer {}", self.path.display()),
                e,
            )),
            Err(_) => {
                warn!(
                    "Initializer {} exceeded {:?}; killing it",
                    self.path.display(),
                    self.timeout
                );
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                if let Err(e) = child.kill().await {
                    debug!("Initializer already gone after group kill: {}", e);
                }
                let (stdout, stderr) = drain(pid, stdout, stderr).await;
                Err(self.failure(
                    format!("timed out after {:?} and was killed", self.timeout),
                    None,
                    true,
                    stdout,
                    stderr,
                ))
            }
        }
    }

    /// Builds the command, picking an interpreter from the file extension.
    fn command(&self) -> std::process::Command {
        let interpreter = match self.path.extension().and_then(|ext| ext.to_str()) {
            Some("sh") => Some(("sh", None)),
            Some("bash") => Some(("bash", None)),
            Some("py") => Some(("python3", None)),
            Some("ps1") => Some(("pwsh", Some("-File"))),
            _ => None,
        };

        let mut command = match interpreter {
            Some((program, flag)) => {
                let mut command = std::process::Command::new(program);
                command.args(flag);
                command.arg(&self.path);
                command
            }
            None => std::process::Command::new(&self.path),
        };
        command.envs(self.env.iter().map(|(key, value)| (key, value)));

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        command
    }

    fn failure(
        &self,
        reason: String,
        exit_code: Option<i32>,
        timed_out: bool,
        stdout: String,
        stderr: String,
    ) -> BootstrapError {
        BootstrapError::InitializerProcessFailed {
            path: self.path.clone(),
            reason,
            exit_code,
            timed_out,
            stdout,
            stderr,
        }
    }
}

/// Runs the initializer at `path` with `timeout` and no extra environment.
///
/// # Errors
/// See [`ExternalInitializer::run`].
pub fn run_external_initializer(path: &Path, timeout: Duration) -> Result<InitializerStatus> {
    ExternalInitializer::new(path).with_timeout(timeout).run()
}

/// One output pipe, read into a shared buffer as data arrives.
struct Capture {
    buffer: Arc<Mutex<Vec<u8>>>,
    reader: JoinHandle<()>,
    closed: bool,
}

impl Capture {
    fn start<R: AsyncRead + Unpin + Send + 'static>(mut pipe: R) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let reader = tokio::spawn(async move {
            let mut chunk = [0_u8; 4096];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(read) => sink
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(chunk.get(..read).unwrap_or_default()),
                    Err(e) => {
                        debug!("Initializer output stream ended with error: {}", e);
                        break;
                    }
                }
            }
        });
        Self {
            buffer,
            reader,
            closed: false,
        }
    }

    /// Waits up to `grace` for the pipe to reach end of file.
    async fn closed_within(&mut self, grace: Duration) -> bool {
        if !self.closed {
            self.closed = tokio::time::timeout(grace, &mut self.reader)
                .await
                .is_ok();
        }
        self.closed
    }

    fn text(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// Collects whatever both pipes produced once the child is gone.
///
/// A pipe still open after the grace period is held by something the script
/// left running; the process group is killed before the final read.
async fn drain(
    pid: Option<u32>,
    stdout: Option<Capture>,
    stderr: Option<Capture>,
) -> (String, String) {
    let mut captures = [stdout, stderr];

    let mut lingering = false;
    for capture in captures.iter_mut().flatten() {
        if !capture.closed_within(OUTPUT_GRACE).await {
            lingering = true;
            break;
        }
    }

    if lingering {
        if let Some(pid) = pid {
            warn!(
                "Initializer left background processes holding its output; killing process group {}",
                pid
            );
            kill_process_group(pid);
        }
        for capture in captures.iter_mut().flatten() {
            capture.closed_within(OUTPUT_GRACE).await;
        }
    }

    let [stdout, stderr] = captures.map(|capture| capture.map(|c| c.text()).unwrap_or_default());
    (stdout, stderr)
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        warn!("Initializer pid {} is out of range; cannot signal its group", pid);
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Could not kill initializer process group {}: {}", pid, e),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}
