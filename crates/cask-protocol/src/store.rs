use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::LaunchResult;
use crate::ids::ShortcutHash;

/// One persisted shortcut, resolved by hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortcutEntry {
    pub hash: ShortcutHash,
    pub display_name: String,
    pub executable: PathBuf,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// Filesystem/registry collaborator consumed by the launch core. The
/// core treats these as pure lookups; storage format belongs to the
/// implementation.
pub trait PrefixStore: Send + Sync {
    fn current_prefix(&self) -> LaunchResult<String>;
    fn prefix_root(&self, prefix: &str) -> LaunchResult<PathBuf>;
    fn runner_version(&self, prefix: &str) -> LaunchResult<String>;
    fn list_shortcuts(&self, prefix: &str) -> LaunchResult<Vec<ShortcutHash>>;
    fn resolve_shortcut(&self, hash: &ShortcutHash) -> LaunchResult<ShortcutEntry>;
}
