//! umu-launcher runner adapter.
//!
//! Each launch spawns one `umu-run` process under the currently selected
//! prefix and classifies its output into status signals. The child's
//! exit is reaped by a per-invocation ingestion task and surfaces as the
//! terminal `Exited` signal; a requested stop first asks wine to end the
//! session and only force-kills after a grace period.

pub mod args;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cask_protocol::error::{LaunchError, LaunchResult};
use cask_protocol::event::RunnerSignal;
use cask_protocol::runner::{
    RunnerControl, RunnerHandle, RunnerInfo, RunnerSignalStream, RunnerSignalSubscription,
};
use cask_protocol::session::{InvocationId, LaunchSpec, LaunchTarget};
use cask_protocol::store::PrefixStore;
use cask_store::paths::resolve_windows_path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{debug, warn};

const DEFAULT_UMU_BINARY: &str = "umu-run";
pub const ENV_UMU_BIN: &str = "CASK_UMU_BIN";
const DEFAULT_SIGNAL_BUFFER: usize = 64;
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
const END_SESSION_ARGS: [&str; 2] = ["wineboot", "-e"];

const MARKER_LAUNCHER_STARTING: &str = "umu-launcher version";
const MARKER_RUNTIME_UPDATED: &str = "Proton: Upgrading";
const MARKER_PROTON_STARTED: &str = "fsync: up and running";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UmuRunnerConfig {
    pub binary: PathBuf,
    pub runners_root: PathBuf,
    pub signal_buffer: usize,
    pub stop_grace: Duration,
}

impl UmuRunnerConfig {
    pub fn new(runners_root: impl Into<PathBuf>) -> Self {
        Self {
            binary: std::env::var_os(ENV_UMU_BIN)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_UMU_BINARY)),
            runners_root: runners_root.into(),
            signal_buffer: DEFAULT_SIGNAL_BUFFER,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }
}

#[derive(Clone)]
pub struct UmuRunner {
    config: UmuRunnerConfig,
    store: Arc<dyn PrefixStore>,
    invocations: Arc<AsyncMutex<HashMap<InvocationId, Arc<UmuInvocation>>>>,
}

struct UmuInvocation {
    signal_tx: broadcast::Sender<RunnerSignal>,
    terminal_signal_sent: AtomicBool,
    stop_requested: AtomicBool,
    child: AsyncMutex<Option<Child>>,
    prefix_env: Vec<(String, String)>,
}

impl UmuInvocation {
    fn emit_signal(&self, signal: RunnerSignal) {
        let _ = self.signal_tx.send(signal);
    }

    fn emit_terminal_signal(&self, signal: RunnerSignal) {
        if self.terminal_signal_sent.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.signal_tx.send(signal);
    }
}

impl UmuRunner {
    pub fn new(config: UmuRunnerConfig, store: Arc<dyn PrefixStore>) -> Self {
        Self {
            config,
            store,
            invocations: Arc::new(AsyncMutex::new(HashMap::new())),
        }
    }

    fn signal_buffer(&self) -> usize {
        self.config.signal_buffer.max(1)
    }

    async fn invocation(&self, handle: &RunnerHandle) -> LaunchResult<Arc<UmuInvocation>> {
        let invocations = self.invocations.lock().await;
        invocations
            .get(&handle.invocation_id)
            .cloned()
            .ok_or_else(|| handle.not_found())
    }

    fn proton_path(&self, prefix: &str) -> LaunchResult<PathBuf> {
        let runner = self.store.runner_version(prefix)?;
        let proton_path = self.config.runners_root.join(&runner);
        if !proton_path.is_dir() {
            return Err(LaunchError::Process(format!(
                "runner version {runner} is not installed under {}",
                self.config.runners_root.display()
            )));
        }
        Ok(proton_path)
    }

    fn resolve_target(
        &self,
        prefix_root: &Path,
        target: &LaunchTarget,
    ) -> LaunchResult<(PathBuf, Vec<String>)> {
        match target {
            LaunchTarget::Shortcut { hash } => {
                let entry = self.store.resolve_shortcut(hash)?;
                Ok((
                    resolve_windows_path(prefix_root, &entry.executable),
                    entry.extra_args,
                ))
            }
            LaunchTarget::Executable { path, args } => {
                Ok((resolve_windows_path(prefix_root, path), args.clone()))
            }
        }
    }
}

#[async_trait]
impl RunnerControl for UmuRunner {
    async fn start(&self, spec: LaunchSpec) -> LaunchResult<(RunnerHandle, RunnerSignalStream)> {
        let prefix = self.store.current_prefix()?;
        let prefix_root = self.store.prefix_root(&prefix)?;
        let proton_path = self.proton_path(&prefix)?;
        let (executable, extra_args) = self.resolve_target(&prefix_root, &spec.target)?;
        if !executable.exists() {
            return Err(LaunchError::TargetMissing(executable));
        }

        let prefix_env =
            invocation_environment(&prefix_root, &proton_path, spec.shared_invocation);

        let mut command = Command::new(&self.config.binary);
        command.arg(&executable);
        command.args(&extra_args);
        command.envs(prefix_env.iter().cloned());
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|error| {
            LaunchError::Process(format!(
                "failed to start {} for {}: {error}",
                self.config.binary.display(),
                executable.display()
            ))
        })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (signal_tx, _) = broadcast::channel(self.signal_buffer());
        let invocation = Arc::new(UmuInvocation {
            signal_tx,
            terminal_signal_sent: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            child: AsyncMutex::new(Some(child)),
            prefix_env,
        });
        // Subscribed before the ingestion task exists, so a child that
        // exits instantly cannot emit into a receiverless channel.
        let stream: RunnerSignalStream = Box::new(UmuSignalSubscription {
            signals: invocation.signal_tx.subscribe(),
        });

        {
            let mut invocations = self.invocations.lock().await;
            if invocations.contains_key(&spec.invocation_id) {
                return Err(LaunchError::Internal(format!(
                    "runner invocation already exists: {}",
                    spec.invocation_id.context()
                )));
            }
            invocations.insert(spec.invocation_id, Arc::clone(&invocation));
        }

        debug!(
            context = %spec.invocation_id.context(),
            executable = %executable.display(),
            shared = spec.shared_invocation,
            "spawned umu invocation"
        );

        tokio::spawn(ingest_invocation_output(
            Arc::clone(&invocation),
            Arc::clone(&self.invocations),
            spec.invocation_id,
            stdout,
            stderr,
        ));

        Ok((
            RunnerHandle {
                invocation_id: spec.invocation_id,
            },
            stream,
        ))
    }

    async fn stop(&self, handle: &RunnerHandle) -> LaunchResult<()> {
        let invocation = self.invocation(handle).await?;
        if invocation.stop_requested.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        invocation.emit_signal(RunnerSignal::Stopping);

        tokio::spawn(teardown_invocation(
            self.config.binary.clone(),
            self.config.stop_grace,
            invocation,
        ));
        Ok(())
    }
}

#[async_trait]
impl RunnerInfo for UmuRunner {
    fn binary_name(&self) -> String {
        self.config.binary.to_string_lossy().into_owned()
    }

    async fn health_check(&self) -> LaunchResult<()> {
        which::which(&self.config.binary)
            .map_err(|_| LaunchError::RunnerBinaryMissing(self.binary_name()))?;

        let has_runner_version = std::fs::read_dir(&self.config.runners_root)
            .map(|entries| {
                entries
                    .flatten()
                    .any(|entry| entry.path().is_dir())
            })
            .unwrap_or(false);
        if !has_runner_version {
            return Err(LaunchError::NoRunnersAvailable(
                self.config.runners_root.clone(),
            ));
        }
        Ok(())
    }
}

struct UmuSignalSubscription {
    signals: broadcast::Receiver<RunnerSignal>,
}

#[async_trait]
impl RunnerSignalSubscription for UmuSignalSubscription {
    async fn next_signal(&mut self) -> LaunchResult<Option<RunnerSignal>> {
        match self.signals.recv().await {
            Ok(signal) => Ok(Some(signal)),
            Err(broadcast::error::RecvError::Closed) => Ok(None),
            Err(broadcast::error::RecvError::Lagged(skipped)) => Err(LaunchError::Internal(
                format!("umu signal stream lagged and dropped {skipped} signals"),
            )),
        }
    }
}

/// Classifies runner output lines into status signals. Once the main
/// Proton process is reported live, classification stops for the rest of
/// the invocation.
#[derive(Debug, Default)]
struct OutputClassifier {
    proton_started: bool,
}

impl OutputClassifier {
    fn classify(&mut self, line: &str) -> Option<RunnerSignal> {
        if self.proton_started {
            return None;
        }
        if line.contains(MARKER_PROTON_STARTED) {
            self.proton_started = true;
            return Some(RunnerSignal::ProtonStarted);
        }
        if line.contains(MARKER_LAUNCHER_STARTING) {
            return Some(RunnerSignal::Starting);
        }
        if line.contains(MARKER_RUNTIME_UPDATED) {
            return Some(RunnerSignal::Updated);
        }
        None
    }
}

fn invocation_environment(
    prefix_root: &Path,
    proton_path: &Path,
    shared_invocation: bool,
) -> Vec<(String, String)> {
    let mut environment = vec![
        (
            "WINEPREFIX".to_owned(),
            prefix_root.to_string_lossy().into_owned(),
        ),
        ("GAMEID".to_owned(), "0".to_owned()),
        (
            "PROTONPATH".to_owned(),
            proton_path.to_string_lossy().into_owned(),
        ),
        ("PROTON_USE_XALIA".to_owned(), "0".to_owned()),
    ];
    if shared_invocation {
        // A second invocation must not race the runtime update the first
        // one may still be performing in the same prefix.
        environment.push(("UMU_RUNTIME_UPDATE".to_owned(), "0".to_owned()));
    }
    environment
}

async fn ingest_invocation_output(
    invocation: Arc<UmuInvocation>,
    invocations: Arc<AsyncMutex<HashMap<InvocationId, Arc<UmuInvocation>>>>,
    invocation_id: InvocationId,
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
) {
    let mut classifier = OutputClassifier::default();
    let mut stdout_lines = stdout.map(|stream| BufReader::new(stream).lines());
    let mut stderr_lines = stderr.map(|stream| BufReader::new(stream).lines());

    while stdout_lines.is_some() || stderr_lines.is_some() {
        let line = tokio::select! {
            line = next_line(&mut stdout_lines), if stdout_lines.is_some() => line,
            line = next_line(&mut stderr_lines), if stderr_lines.is_some() => line,
        };
        if let Some(line) = line {
            if let Some(signal) = classifier.classify(&line) {
                invocation.emit_signal(signal);
            }
        }
    }

    // Both output streams closed; reap the child for its exit code.
    let code = {
        let mut child_slot = invocation.child.lock().await;
        match child_slot.take() {
            Some(mut child) => match child.wait().await {
                Ok(status) => status.code().unwrap_or(-1),
                Err(error) => {
                    warn!(%error, context = %invocation_id.context(), "failed to reap umu invocation");
                    -1
                }
            },
            None => -1,
        }
    };

    if invocation.stop_requested.load(Ordering::SeqCst) {
        invocation.emit_signal(RunnerSignal::Stopped);
    }
    invocation.emit_terminal_signal(RunnerSignal::Exited { code });

    let mut invocations = invocations.lock().await;
    invocations.remove(&invocation_id);
}

async fn next_line<R>(lines: &mut Option<tokio::io::Lines<BufReader<R>>>) -> Option<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(reader) = lines.as_mut() else {
        return None;
    };
    match reader.next_line().await {
        Ok(Some(line)) => Some(line),
        Ok(None) | Err(_) => {
            *lines = None;
            None
        }
    }
}

async fn teardown_invocation(
    binary: PathBuf,
    grace: Duration,
    invocation: Arc<UmuInvocation>,
) {
    // Ask wine to end the session first so the whole process tree in the
    // prefix shuts down, not just the direct child.
    let mut end_session = Command::new(&binary);
    end_session.args(END_SESSION_ARGS);
    end_session.envs(invocation.prefix_env.iter().cloned());
    end_session.stdin(Stdio::null());
    end_session.stdout(Stdio::null());
    end_session.stderr(Stdio::null());

    match end_session.spawn() {
        Ok(mut child) => {
            if tokio::time::timeout(grace, child.wait()).await.is_err() {
                let _ = child.start_kill();
            }
        }
        Err(error) => warn!(%error, "end-session request failed to start"),
    }

    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        if invocation.terminal_signal_sent.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(STOP_POLL_INTERVAL).await;
    }

    let mut child_slot = invocation.child.lock().await;
    if let Some(child) = child_slot.as_mut() {
        if let Err(error) = child.start_kill() {
            warn!(%error, "forced kill of umu invocation failed");
        }
    }
}
