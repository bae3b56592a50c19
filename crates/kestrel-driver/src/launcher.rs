use crate::terminate::{terminate_tree, TerminateOpts};
use crate::{discovery, pidtree};
use kestrel_core::{ArtifactPaths, Error, LaunchDescriptor, LogEntry, LogLevel, LogPipeline, LogSource, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

/// Environment variables the launched app honors (see the env contract):
/// the port variable makes the app expose its debugging endpoint there;
/// the other two signal headless/test mode.
pub const ENV_CDP_PORT: &str = "KESTREL_REMOTE_DEBUGGING_PORT";
pub const ENV_HEADLESS: &str = "KESTREL_HEADLESS";
pub const ENV_TEST_MODE: &str = "KESTREL_TEST_MODE";

/// Settling delay after the endpoint is reachable, before the process tree
/// is scanned for the leaf pid; helper processes are still forking then.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Spawning,
    Ready,
    Exited,
    Failed,
}

/// Launches the target app detached and races its debug endpoint against
/// early death.
pub struct AppLauncher {
    command: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: HashMap<String, String>,
    headless: bool,
    cdp_port: u16,
    discovery_timeout: Duration,
    artifacts: ArtifactPaths,
}

impl AppLauncher {
    pub fn new(command: impl Into<String>, cdp_port: u16, artifacts: ArtifactPaths) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            headless: true,
            cdp_port,
            discovery_timeout: Duration::from_secs(30),
            artifacts,
        }
    }

    pub fn args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }

    pub fn cwd(mut self, dir: PathBuf) -> Self {
        self.cwd = Some(dir);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Full environment for the child: caller-supplied overrides win over
    /// the injected debugging/headless variables.
    fn build_env(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert(ENV_CDP_PORT.to_string(), self.cdp_port.to_string());
        if self.headless {
            env.insert(ENV_HEADLESS.to_string(), "1".to_string());
        }
        env.insert(ENV_TEST_MODE.to_string(), "1".to_string());
        for (key, value) in &self.env {
            env.insert(key.clone(), value.clone());
        }
        env
    }

    /// Path of the binary actually being launched, for leaf-pid scoring.
    fn resolve_binary(&self) -> PathBuf {
        which::which(&self.command).unwrap_or_else(|_| PathBuf::from(&self.command))
    }

    /// Spawn the app and wait until it is either reachable or dead.
    ///
    /// Resolves once the debugging endpoint answers; rejects with `E_SPAWN`
    /// when the command cannot start, `E_EXIT_EARLY` when the child dies
    /// before the endpoint comes up (carrying exit code/signal and the
    /// stderr log path), `E_CDP_TIMEOUT` when the endpoint never appears.
    /// Every failure path kills whatever was spawned and lets the capture
    /// tasks close their descriptors, so repeated failed launches leak
    /// nothing.
    pub async fn launch(&self, pipeline: Arc<LogPipeline>) -> Result<LaunchedProcess> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(self.build_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        // Own process group, so the graduated shutdown can signal the whole
        // tree via the negative pgid.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        #[cfg(windows)]
        {
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::spawn(format!("cannot start {}: {}", self.command, e)))?;
        let root_pid = child
            .id()
            .ok_or_else(|| Error::spawn("child had no pid at spawn time"))?;

        tracing::info!(pid = root_pid, port = self.cdp_port, "app spawned, waiting for debug endpoint");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        if let Some(out) = stdout {
            tokio::spawn(tee_stream(
                out,
                self.artifacts.stdout_log.clone(),
                LogSource::Stdout,
                pipeline.clone(),
            ));
        }
        if let Some(err) = stderr {
            tokio::spawn(tee_stream(
                err,
                self.artifacts.stderr_log.clone(),
                LogSource::Stderr,
                pipeline.clone(),
            ));
        }

        // Race "ready" against "already dead".
        let outcome = tokio::select! {
            endpoint = discovery::discover_endpoint(self.cdp_port, self.discovery_timeout) => endpoint,
            status = child.wait() => Err(self.early_exit_error(status)),
        };

        let ws_url = match outcome {
            Ok(ws_url) => ws_url,
            Err(err) => {
                // Best-effort cleanup so a failed attempt never leaves an
                // orphaned process behind.
                terminate_tree(root_pid, TerminateOpts::default()).await;
                let _ = child.wait().await;
                return Err(err);
            }
        };

        tokio::time::sleep(SETTLE_DELAY).await;
        let binary = self.resolve_binary();
        let leaf_pid = pidtree::resolve_leaf_pid(root_pid, &binary);
        let leaf_pid = (leaf_pid != root_pid).then_some(leaf_pid);

        let descriptor = LaunchDescriptor {
            ws_url: ws_url.clone(),
            pid: root_pid,
            leaf_pid,
            cdp_port: self.cdp_port,
            artifact_dir: self.artifacts.dir.clone(),
        };
        descriptor.write(&self.artifacts.descriptor)?;

        pipeline.push(LogEntry::new(
            LogSource::System,
            LogLevel::Info,
            format!("launched pid {} (leaf {:?}) on port {}", root_pid, leaf_pid, self.cdp_port),
        ));

        Ok(LaunchedProcess {
            root_pid,
            leaf_pid,
            cdp_port: self.cdp_port,
            ws_url,
            artifacts: self.artifacts.clone(),
            state: ProcessState::Ready,
            child: Some(child),
        })
    }

    fn early_exit_error(&self, status: std::io::Result<std::process::ExitStatus>) -> Error {
        match status {
            Ok(status) => {
                #[cfg(unix)]
                let signal = {
                    use std::os::unix::process::ExitStatusExt;
                    status.signal()
                };
                #[cfg(not(unix))]
                let signal = None;

                Error::ExitedEarly {
                    exit_code: status.code(),
                    signal,
                    log_path: Some(self.artifacts.stderr_log.clone()),
                }
            }
            Err(e) => Error::spawn(format!("waiting on child failed: {}", e)),
        }
    }
}

/// Copy one captured output stream line-by-line into its log file and the
/// pipeline. Ends (closing both descriptors) when the pipe closes.
async fn tee_stream(
    stream: impl tokio::io::AsyncRead + Unpin,
    log_path: PathBuf,
    source: LogSource,
    pipeline: Arc<LogPipeline>,
) {
    let mut file = match tokio::fs::File::create(&log_path).await {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(path = %log_path.display(), "cannot open capture log: {}", e);
            return;
        }
    };

    let level = if source == LogSource::Stderr {
        LogLevel::Warn
    } else {
        LogLevel::Info
    };

    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let _ = file.write_all(line.as_bytes()).await;
        let _ = file.write_all(b"\n").await;
        pipeline.push(LogEntry::new(source, level, line));
    }
    let _ = file.flush().await;
}

/// A live, launched app. Owned exclusively by the launcher's caller until
/// [`LaunchedProcess::quit`].
#[derive(Debug)]
pub struct LaunchedProcess {
    pub root_pid: u32,
    pub leaf_pid: Option<u32>,
    pub cdp_port: u16,
    pub ws_url: String,
    pub artifacts: ArtifactPaths,
    state: ProcessState,
    child: Option<Child>,
}

impl LaunchedProcess {
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Observe an external exit without initiating one. Once `Ready`, the
    /// state may move to `Exited` here but never back to `Spawning`.
    pub fn check_exited(&mut self) -> bool {
        if let Some(child) = self.child.as_mut() {
            if let Ok(Some(_)) = child.try_wait() {
                self.state = ProcessState::Exited;
            }
        }
        self.state == ProcessState::Exited
    }

    /// Wait for the app to exit on its own.
    pub async fn wait(&mut self) -> Result<()> {
        if let Some(child) = self.child.as_mut() {
            child
                .wait()
                .await
                .map_err(|e| Error::spawn(format!("waiting on child failed: {}", e)))?;
            self.state = ProcessState::Exited;
        }
        Ok(())
    }

    /// Tear the whole tree down. Safe to call repeatedly.
    pub async fn quit(&mut self, timeout_ms: u64) -> Result<()> {
        let opts = TerminateOpts {
            timeout_ms,
            leaf_pid: self.leaf_pid,
        };
        let confirmed = terminate_tree(self.root_pid, opts).await;

        // Reap so the pid table entry is released.
        if let Some(mut child) = self.child.take() {
            let _ = child.wait().await;
        }

        if confirmed {
            self.state = ProcessState::Exited;
            Ok(())
        } else {
            self.state = ProcessState::Failed;
            Err(Error::spawn(format!(
                "failed to terminate pid {} within {}ms",
                self.root_pid, timeout_ms
            )))
        }
    }
}
