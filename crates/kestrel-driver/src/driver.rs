use crate::inject::Injector;
use crate::launcher::{AppLauncher, LaunchedProcess};
use crate::picker::{self, PageHints, PickedWindow};
use crate::port;
use crate::session::SessionMux;
use crate::terminate::{terminate_tree, TerminateOpts};
use crate::worlds::{SessionKind, World};
use chromiumoxide::browser::Browser;
use futures::StreamExt;
use kestrel_core::{ArtifactPaths, Error, LaunchDescriptor, LogPipeline, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Everything needed to launch and attach to an app.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub headless: bool,
    /// Explicit debugging port; allocated when absent.
    pub port: Option<u16>,
    pub discovery_timeout: Duration,
    pub window_timeout: Duration,
    pub window_hints: PageHints,
    pub artifact_dir: Option<PathBuf>,
    pub ipc_tracing: bool,
}

impl DriverConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            headless: true,
            port: None,
            discovery_timeout: Duration::from_secs(30),
            window_timeout: Duration::from_secs(15),
            window_hints: PageHints::default(),
            artifact_dir: None,
            ipc_tracing: false,
        }
    }
}

/// Live, introspectable handle to a launched app's UI.
///
/// Owns the process, the CDP connection, and one session multiplexer per
/// attached window. One driver instance per app instance; nothing is shared
/// across drivers.
pub struct AppDriver {
    browser: Arc<Browser>,
    handler_task: JoinHandle<()>,
    process: LaunchedProcess,
    pipeline: Arc<LogPipeline>,
    injectors: Arc<Mutex<Vec<Injector>>>,
    sessions: Vec<SessionMux>,
    ipc_tracing: bool,
}

impl AppDriver {
    /// Launch the app and attach to its best-matching window.
    ///
    /// Port allocation, detached spawn, endpoint discovery, CDP connect,
    /// window pick, and session wiring in one call. Any failure tears down
    /// whatever was already started before returning.
    pub async fn launch(config: DriverConfig) -> Result<Self> {
        let artifacts = match &config.artifact_dir {
            Some(dir) => ArtifactPaths::in_dir(dir.clone())?,
            None => ArtifactPaths::timestamped(&std::env::temp_dir().join("kestrel-runs"))?,
        };

        let pipeline = Arc::new(LogPipeline::new());
        pipeline.attach_file_sink(&artifacts.log_stream)?;

        let cdp_port = port::allocate_port(config.port)?;

        let mut launcher = AppLauncher::new(&config.command, cdp_port, artifacts)
            .args(config.args.clone())
            .headless(config.headless)
            .discovery_timeout(config.discovery_timeout);
        for (key, value) in &config.env {
            launcher = launcher.env(key, value);
        }
        if let Some(dir) = &config.cwd {
            launcher = launcher.cwd(dir.clone());
        }

        let mut process = launcher.launch(pipeline.clone()).await?;

        let (browser, mut handler) = match Browser::connect(&process.ws_url).await {
            Ok(pair) => pair,
            Err(e) => {
                let _ = process.quit(5_000).await;
                return Err(Error::Cdp(format!("connect to {}: {}", process.ws_url, e)));
            }
        };
        let browser = Arc::new(browser);

        // The handler must be pumped for any command or event to move.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("CDP handler event error (continuing): {}", e);
                }
            }
        });

        let injectors = Arc::new(Mutex::new(Vec::new()));

        let picked = match picker::wait_for_window(
            &browser,
            config.window_timeout,
            &config.window_hints,
        )
        .await
        {
            Ok(picked) => picked,
            Err(e) => {
                handler_task.abort();
                let _ = process.quit(5_000).await;
                return Err(e);
            }
        };
        tracing::info!(url = %picked.url, title = %picked.title, score = picked.score, "attached to window");

        let mux = match SessionMux::attach(
            picked.page,
            SessionKind::Page,
            pipeline.clone(),
            injectors.clone(),
            config.ipc_tracing,
        )
        .await
        {
            Ok(mux) => mux,
            Err(e) => {
                handler_task.abort();
                let _ = process.quit(5_000).await;
                return Err(e);
            }
        };

        Ok(Self {
            browser,
            handler_task,
            process,
            pipeline,
            injectors,
            sessions: vec![mux],
            ipc_tracing: config.ipc_tracing,
        })
    }

    pub fn pipeline(&self) -> Arc<LogPipeline> {
        self.pipeline.clone()
    }

    pub fn process(&mut self) -> &mut LaunchedProcess {
        &mut self.process
    }

    pub fn descriptor_path(&self) -> &Path {
        &self.process.artifacts.descriptor
    }

    /// Primary (first-attached) session.
    pub fn session(&self) -> &SessionMux {
        &self.sessions[0]
    }

    /// Register an injector; replayed into every future matching context and
    /// applied to currently live ones right away.
    pub async fn register_injector(&self, injector: Injector) -> Result<()> {
        self.injectors.lock().unwrap().push(injector);
        for session in &self.sessions {
            session.replay_now().await?;
        }
        Ok(())
    }

    pub async fn enable_ipc_tracing(&mut self) -> Result<()> {
        self.ipc_tracing = true;
        for session in &self.sessions {
            session.enable_ipc_tracing().await?;
        }
        Ok(())
    }

    /// Evaluate in the most recent context of `world` on the primary window.
    pub async fn evaluate_in_world(&self, world: World, expression: &str) -> Result<()> {
        self.session().evaluate_in_world(world, expression).await
    }

    /// Wait for a window matching `hints`, attach a session to it, and make
    /// it the primary.
    pub async fn wait_for_window(
        &mut self,
        timeout: Duration,
        hints: &PageHints,
    ) -> Result<PickedWindow> {
        let picked = picker::wait_for_window(&self.browser, timeout, hints).await?;
        self.attach_picked(&picked).await?;
        Ok(picked)
    }

    /// Immediate re-selection among open windows; fails with `E_NO_PAGE`
    /// when nothing currently matches.
    pub async fn switch_window(&mut self, hints: &PageHints) -> Result<PickedWindow> {
        let picked = picker::switch_window(&self.browser, hints).await?;
        self.attach_picked(&picked).await?;
        Ok(picked)
    }

    async fn attach_picked(&mut self, picked: &PickedWindow) -> Result<()> {
        // Re-picking an already-attached page must not start a second pump;
        // two sessions on one page would push every event into the pipeline
        // twice. Promote the existing session to primary instead.
        let target = picked.page.target_id();
        if let Some(index) = self
            .sessions
            .iter()
            .position(|session| session.page().target_id() == target)
        {
            promote_to_front(&mut self.sessions, index);
            return Ok(());
        }

        let mux = SessionMux::attach(
            picked.page.clone(),
            SessionKind::Page,
            self.pipeline.clone(),
            self.injectors.clone(),
            self.ipc_tracing,
        )
        .await?;
        self.sessions.insert(0, mux);
        Ok(())
    }

    /// Tear everything down: sessions, CDP connection, process tree.
    pub async fn quit(mut self, timeout_ms: u64) -> Result<()> {
        for session in &self.sessions {
            session.detach();
        }
        self.handler_task.abort();
        self.process.quit(timeout_ms).await
    }

    /// Out-of-band termination from a previously written descriptor file.
    pub async fn quit_by_descriptor(path: &Path, timeout_ms: u64) -> Result<()> {
        let descriptor = LaunchDescriptor::read(path)?;
        let opts = TerminateOpts {
            timeout_ms,
            leaf_pid: descriptor.leaf_pid,
        };
        if terminate_tree(descriptor.pid, opts).await {
            Ok(())
        } else {
            Err(Error::spawn(format!(
                "failed to terminate pid {} within {}ms",
                descriptor.pid, timeout_ms
            )))
        }
    }
}

/// Move the item at `index` into the first slot, keeping the rest in order.
fn promote_to_front<T>(items: &mut Vec<T>, index: usize) {
    let item = items.remove(index);
    items.insert(0, item);
}
