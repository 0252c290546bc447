//! cask command line entrypoint.
//!
//! Administration subcommands (prefix and shortcut management) operate on
//! the store directly and exit. `run` and `run-exe` wire the full launch
//! stack, stream session events until the process exits, and translate
//! ctrl-c into a prefix-wide stop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use cask_config::{CaskConfig, RunnerRuntimeConfig};
use cask_eventbus::{LaunchEventBus, LaunchEventBusConfig};
use cask_lifecycle::LaunchController;
use cask_protocol::error::LaunchError;
use cask_protocol::event::LaunchEvent;
use cask_protocol::ids::{ContextIndex, ShortcutHash};
use cask_protocol::store::{PrefixStore, ShortcutEntry};
use cask_store::FsPrefixStore;
use clap::{Parser, Subcommand};
use runner_umu::args::split_command_arguments;
use runner_umu::{UmuRunner, UmuRunnerConfig};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cask", version, about = "Proton prefix manager and launcher built on umu")]
struct Cli {
    /// Configuration file; defaults to $CASK_CONFIG or ~/.config/cask/config.toml.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List prefixes and the current prefix's shortcuts.
    List,
    /// Launch a shortcut by its list position and wait for it to exit.
    Run {
        /// Position of the shortcut in `cask list` output.
        slot: usize,
    },
    /// Launch a free-standing executable under the current prefix.
    RunExe {
        /// Windows or host path of the executable.
        path: PathBuf,
        /// Extra arguments, split on spaces outside double quotes.
        #[arg(long, value_name = "ARGS")]
        args: Option<String>,
    },
    /// Create a prefix and select it.
    CreatePrefix {
        name: String,
        /// Proton build directory name under the runners root.
        runner: String,
    },
    /// Select an existing prefix.
    UsePrefix { name: String },
    /// Delete a prefix and everything in it.
    DeletePrefix { name: String },
    /// Change the Proton build a prefix runs with.
    SetRunner { prefix: String, runner: String },
    /// Register a shortcut in the current prefix.
    AddShortcut {
        name: String,
        path: PathBuf,
        /// Extra arguments, split on spaces outside double quotes.
        #[arg(long, value_name = "ARGS")]
        args: Option<String>,
    },
    /// Rename a shortcut; its hash and launch history stay attached.
    RenameShortcut { hash: String, name: String },
    /// Remove a shortcut from the current prefix.
    RemoveShortcut { hash: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let store = Arc::new(FsPrefixStore::open(config.store_root())?);

    match cli.command {
        Command::List => list(&store),
        Command::Run { slot } => run_shortcut(&config, store, slot).await,
        Command::RunExe { path, args } => {
            let args = parse_extra_args(args.as_deref());
            run_one_time(&config, store, path, args).await
        }
        Command::CreatePrefix { name, runner } => {
            store.create_prefix(&name, &runner)?;
            store.set_current_prefix(&name)?;
            println!("created prefix {name} ({runner})");
            Ok(())
        }
        Command::UsePrefix { name } => {
            store.set_current_prefix(&name)?;
            println!("selected prefix {name}");
            Ok(())
        }
        Command::DeletePrefix { name } => {
            store.delete_prefix(&name)?;
            println!("deleted prefix {name}");
            Ok(())
        }
        Command::SetRunner { prefix, runner } => {
            store.set_runner_version(&prefix, &runner)?;
            println!("prefix {prefix} now runs with {runner}");
            Ok(())
        }
        Command::AddShortcut { name, path, args } => {
            let args = parse_extra_args(args.as_deref());
            let hash = store.add_shortcut(&name, &path, &args)?;
            println!("added shortcut {name} ({hash})");
            Ok(())
        }
        Command::RenameShortcut { hash, name } => {
            store.rename_shortcut(&ShortcutHash::new(hash), &name)?;
            println!("renamed shortcut to {name}");
            Ok(())
        }
        Command::RemoveShortcut { hash } => {
            store.remove_shortcut(&ShortcutHash::new(hash))?;
            println!("removed shortcut");
            Ok(())
        }
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<CaskConfig> {
    let config = match path {
        Some(path) => cask_config::load_from_path(path)?,
        None => cask_config::load_from_env()?,
    };
    Ok(config)
}

fn list(store: &FsPrefixStore) -> Result<()> {
    let prefixes = store.list_prefixes()?;
    if prefixes.is_empty() {
        println!("no prefixes; create one with `cask create-prefix`");
        return Ok(());
    }

    let current = store.current_prefix().ok();
    for name in &prefixes {
        let marker = if current.as_deref() == Some(name.as_str()) {
            "*"
        } else {
            " "
        };
        println!("{marker} {name} ({})", store.runner_version(name)?);
    }

    if current.is_some() {
        let shortcuts = store.sorted_shortcuts()?;
        if shortcuts.is_empty() {
            println!("  no shortcuts");
        }
        for (index, entry) in shortcuts.iter().enumerate() {
            println!(
                "  [{index}] {} -> {} ({})",
                entry.display_name,
                entry.executable.display(),
                entry.hash
            );
        }
    }
    Ok(())
}

async fn run_shortcut(config: &CaskConfig, store: Arc<FsPrefixStore>, slot: usize) -> Result<()> {
    let entry = shortcut_at(&store, slot)?;
    let controller = build_controller(config, store);
    controller.health_check().await?;

    let mut events = controller.subscribe_all();
    let handle = controller.start_shortcut(slot, &entry.hash).await?;
    info!(context = %handle.context_index, shortcut = %entry.display_name, "session admitted");
    println!("launching {}", entry.display_name);
    wait_for_exit(&controller, &mut events, handle.context_index).await
}

async fn run_one_time(
    config: &CaskConfig,
    store: Arc<FsPrefixStore>,
    path: PathBuf,
    args: Vec<String>,
) -> Result<()> {
    let controller = build_controller(config, store);
    controller.health_check().await?;

    let mut events = controller.subscribe_all();
    let handle = controller.start_one_time(path.clone(), args).await?;
    info!(context = %handle.context_index, path = %path.display(), "one-time session admitted");
    println!("launching {}", path.display());
    wait_for_exit(&controller, &mut events, handle.context_index).await
}

fn build_controller(config: &CaskConfig, store: Arc<FsPrefixStore>) -> LaunchController {
    let runner_config = build_runner_config(&config.runner_runtime());
    let runner = Arc::new(UmuRunner::new(runner_config, store.clone()));
    let events = config.events_runtime();
    let bus = Arc::new(LaunchEventBus::new(LaunchEventBusConfig {
        context_buffer_capacity: events.context_buffer,
        global_buffer_capacity: events.global_buffer,
    }));
    LaunchController::new(runner, store, bus)
}

/// CASK_UMU_BIN outranks the configured binary path.
fn build_runner_config(runtime: &RunnerRuntimeConfig) -> UmuRunnerConfig {
    let mut config = UmuRunnerConfig::new(runtime.runners_root.clone());
    if std::env::var_os(runner_umu::ENV_UMU_BIN).is_none() {
        config.binary = PathBuf::from(&runtime.binary);
    }
    config.stop_grace = runtime.stop_grace;
    config
}

/// Streams session events until the terminal exit arrives. Ctrl-c does not
/// abort the wait; it requests a prefix-wide stop and keeps streaming so
/// the exit is still observed.
async fn wait_for_exit(
    controller: &LaunchController,
    events: &mut cask_eventbus::LaunchGlobalSubscription,
    context: ContextIndex,
) -> Result<()> {
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(envelope) if envelope.context_index == context => {
                    println!("{}", describe_event(&envelope.event));
                    if let LaunchEvent::Exited { code, .. } = envelope.event {
                        if code != 0 {
                            return Err(LaunchError::ProcessFailure { code }.into());
                        }
                        return Ok(());
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "launch event subscription lagged");
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                println!("stopping sessions");
                controller.stop_all().await?;
            }
        }
    }
}

fn shortcut_at(store: &FsPrefixStore, slot: usize) -> Result<ShortcutEntry> {
    let shortcuts = store.sorted_shortcuts()?;
    shortcuts
        .into_iter()
        .nth(slot)
        .ok_or_else(|| anyhow!("no shortcut at position {slot}"))
}

fn parse_extra_args(raw: Option<&str>) -> Vec<String> {
    raw.map(split_command_arguments).unwrap_or_default()
}

fn describe_event(event: &LaunchEvent) -> String {
    match event {
        LaunchEvent::Starting => "runner starting".to_owned(),
        LaunchEvent::Updated => "proton runtime updated".to_owned(),
        LaunchEvent::ProtonStarted => "proton started".to_owned(),
        LaunchEvent::Stopping => "stopping".to_owned(),
        LaunchEvent::Stopped => "stopped".to_owned(),
        LaunchEvent::Exited { code, .. } => format!("exited with code {code}"),
    }
}
