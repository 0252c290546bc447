use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cask_eventbus::{LaunchContextSubscription, LaunchEventBus, LaunchGlobalSubscription};
use cask_protocol::error::{LaunchError, LaunchResult};
use cask_protocol::event::LaunchEvent;
use cask_protocol::ids::{ContextIndex, ShortcutHash};
use cask_protocol::runner::{RunnerControl, RunnerInfo, RunnerSignalStream};
use cask_protocol::session::{InvocationId, LaunchSpec, LaunchTarget, SessionHandle, SessionSlot};
use cask_protocol::store::PrefixStore;
use cask_store::paths::resolve_windows_path;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::registry::SessionRegistry;
use crate::state::SessionState;

pub trait SessionRunner: RunnerControl + RunnerInfo + Send + Sync {}

impl<T> SessionRunner for T where T: RunnerControl + RunnerInfo + Send + Sync {}

/// Admits, observes and stops launch sessions over one runner. All
/// session bookkeeping goes through the inner registry; the exit
/// reported by a session's own signal stream is the only thing that
/// frees its slot.
#[derive(Clone)]
pub struct LaunchController {
    runner: Arc<dyn SessionRunner>,
    store: Arc<dyn PrefixStore>,
    registry: Arc<RwLock<SessionRegistry>>,
    eventbus: Arc<LaunchEventBus>,
    stream_tasks: Arc<RwLock<HashMap<ContextIndex, JoinHandle<()>>>>,
}

impl LaunchController {
    pub fn new(
        runner: Arc<dyn SessionRunner>,
        store: Arc<dyn PrefixStore>,
        eventbus: Arc<LaunchEventBus>,
    ) -> Self {
        Self {
            runner,
            store,
            registry: Arc::new(RwLock::new(SessionRegistry::default())),
            eventbus,
            stream_tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn runner_binary(&self) -> String {
        self.runner.binary_name()
    }

    pub async fn health_check(&self) -> LaunchResult<()> {
        self.runner.health_check().await
    }

    /// Launches the shortcut occupying `slot_index` in the rendered
    /// list. Rejected without admitting a session when the slot already
    /// runs one or the target executable is missing.
    pub async fn start_shortcut(
        &self,
        slot_index: usize,
        hash: &ShortcutHash,
    ) -> LaunchResult<SessionHandle> {
        {
            let registry = self.registry.read().await;
            if registry.slot_is_running(slot_index) {
                return Err(LaunchError::AlreadyRunning(slot_index));
            }
        }
        let entry = self.store.resolve_shortcut(hash)?;
        self.check_target_exists(&entry.executable)?;

        self.start_session(
            SessionSlot::Shortcut(slot_index),
            Some(hash.clone()),
            LaunchTarget::Shortcut { hash: hash.clone() },
        )
        .await
    }

    /// Launches a free-standing executable under the current prefix.
    /// One-time sessions stack; each gets its own context.
    pub async fn start_one_time(
        &self,
        executable: PathBuf,
        args: Vec<String>,
    ) -> LaunchResult<SessionHandle> {
        self.check_target_exists(&executable)?;
        self.start_session(
            SessionSlot::OneTime,
            None,
            LaunchTarget::Executable {
                path: executable,
                args,
            },
        )
        .await
    }

    /// Requests teardown of one session. A stop addressed to a session
    /// whose exit has already been applied is a no-op: the request has
    /// nothing left to do and reports success.
    pub async fn stop(&self, context: ContextIndex) -> LaunchResult<()> {
        let runner_handle = {
            let registry = self.registry.read().await;
            registry.runner_handle(context)
        };
        let Some(runner_handle) = runner_handle else {
            debug!(context = %context, "stop requested for an ended session");
            return Ok(());
        };
        match self.runner.stop(&runner_handle).await {
            // The invocation finished between the registry read and the
            // adapter call; same ended-session no-op.
            Err(LaunchError::SessionNotFound(_)) => Ok(()),
            result => result,
        }
    }

    pub async fn stop_slot(&self, slot_index: usize) -> LaunchResult<()> {
        let context = {
            let registry = self.registry.read().await;
            registry.context_for_slot(slot_index).ok_or_else(|| {
                LaunchError::SessionNotFound(format!("shortcut slot {slot_index}"))
            })?
        };
        self.stop(context).await
    }

    /// Stops every active session through a single teardown request.
    /// Ending one wine session ends the whole prefix, so the remaining
    /// sessions observe their own exits without being stopped directly.
    pub async fn stop_all(&self) -> LaunchResult<()> {
        let first = {
            let registry = self.registry.read().await;
            registry.active_handles().into_iter().next()
        };
        match first {
            Some(handle) => self.stop(handle.context_index).await,
            None => Ok(()),
        }
    }

    /// Prefix administration (switching, deleting, runner changes) is
    /// only safe while nothing runs in it.
    pub async fn administration_allowed(&self) -> bool {
        let registry = self.registry.read().await;
        registry.is_empty()
    }

    pub async fn active_sessions(&self) -> Vec<SessionHandle> {
        let registry = self.registry.read().await;
        registry.active_handles()
    }

    pub async fn session_state(&self, context: ContextIndex) -> LaunchResult<SessionState> {
        let registry = self.registry.read().await;
        registry
            .state(context)
            .ok_or_else(|| LaunchError::SessionNotFound(context.to_string()))
    }

    pub async fn slot_is_running(&self, slot_index: usize) -> bool {
        let registry = self.registry.read().await;
        registry.slot_is_running(slot_index)
    }

    pub fn subscribe(&self, context: ContextIndex) -> LaunchContextSubscription {
        self.eventbus.subscribe_context(context)
    }

    pub fn subscribe_all(&self) -> LaunchGlobalSubscription {
        self.eventbus.subscribe_all()
    }

    async fn start_session(
        &self,
        slot: SessionSlot,
        hash: Option<ShortcutHash>,
        target: LaunchTarget,
    ) -> LaunchResult<SessionHandle> {
        let (handle, shared_invocation) = {
            let mut registry = self.registry.write().await;
            let shared_invocation = registry.active_count() > 0;
            let handle = registry.admit(slot, hash)?;
            (handle, shared_invocation)
        };

        let spec = LaunchSpec {
            invocation_id: InvocationId::new(handle.context_index),
            target,
            shared_invocation,
        };
        let (_, stream) = match self.runner.start(spec).await {
            Ok(started) => started,
            Err(error) => {
                self.rollback_admission(handle.context_index).await;
                return Err(error);
            }
        };

        let task = self.spawn_signal_ingestion_task(handle.clone(), stream);
        let mut stream_tasks = self.stream_tasks.write().await;
        stream_tasks.insert(handle.context_index, task);

        debug!(
            context = %handle.context_index,
            slot = ?handle.slot,
            shared = shared_invocation,
            "admitted launch session"
        );
        Ok(handle)
    }

    fn check_target_exists(&self, executable: &Path) -> LaunchResult<()> {
        let prefix = self.store.current_prefix()?;
        let prefix_root = self.store.prefix_root(&prefix)?;
        let resolved = resolve_windows_path(&prefix_root, executable);
        if !resolved.exists() {
            return Err(LaunchError::TargetMissing(resolved));
        }
        Ok(())
    }

    fn spawn_signal_ingestion_task(
        &self,
        handle: SessionHandle,
        mut stream: RunnerSignalStream,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let eventbus = Arc::clone(&self.eventbus);
        let stream_tasks = Arc::clone(&self.stream_tasks);
        let context = handle.context_index;
        let slot = handle.slot;

        tokio::spawn(async move {
            loop {
                match stream.next_signal().await {
                    Ok(Some(signal)) => {
                        if let Some(state) = SessionState::from_signal(signal) {
                            let mut registry = registry.write().await;
                            registry.set_state(context, state);
                        }
                        eventbus.publish(context, LaunchEvent::from_signal(signal, slot));
                        if signal.is_terminal() {
                            finish_session(&registry, &eventbus, context).await;
                            break;
                        }
                    }
                    Ok(None) => {
                        // Stream closed without an exit report; the
                        // session is unobservable and treated as dead.
                        eventbus.publish(context, LaunchEvent::Exited { slot, code: -1 });
                        finish_session(&registry, &eventbus, context).await;
                        break;
                    }
                    Err(error) => {
                        warn!(%error, context = %context, "runner signal stream failed");
                        eventbus.publish(context, LaunchEvent::Exited { slot, code: -1 });
                        finish_session(&registry, &eventbus, context).await;
                        break;
                    }
                }
            }

            let mut stream_tasks = stream_tasks.write().await;
            stream_tasks.remove(&context);
        })
    }

    async fn rollback_admission(&self, context: ContextIndex) {
        let mut registry = self.registry.write().await;
        registry.remove(context);
    }
}

async fn finish_session(
    registry: &Arc<RwLock<SessionRegistry>>,
    eventbus: &Arc<LaunchEventBus>,
    context: ContextIndex,
) {
    let drained = {
        let mut registry = registry.write().await;
        registry.remove(context);
        registry.is_empty()
    };
    eventbus.remove_context(context);
    if drained {
        debug!("all launch sessions exited; prefix is idle");
    }
}
