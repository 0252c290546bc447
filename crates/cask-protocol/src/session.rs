use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ids::{ContextIndex, ShortcutHash};

/// Which entry of the rendered shortcut list a session belongs to, or the
/// one-time marker for ad-hoc launches. Replaces the original negative
/// sentinel index with a tagged variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionSlot {
    Shortcut(usize),
    OneTime,
}

impl SessionSlot {
    pub fn shortcut_index(self) -> Option<usize> {
        match self {
            Self::Shortcut(index) => Some(index),
            Self::OneTime => None,
        }
    }
}

/// What the runner should execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LaunchTarget {
    /// Resolved to an executable path and argument set through the
    /// prefix store at invocation time.
    Shortcut { hash: ShortcutHash },
    /// Free-standing executable run under the currently selected prefix.
    Executable { path: PathBuf, args: Vec<String> },
}

/// One fully-specified runner invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub invocation_id: InvocationId,
    pub target: LaunchTarget,
    /// True when other sessions are already active in the prefix; the
    /// invocation must not assume exclusive ownership of it.
    pub shared_invocation: bool,
}

/// Identity of one runner invocation, matching the context index the
/// registry allocated for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationId(ContextIndex);

impl InvocationId {
    pub fn new(context: ContextIndex) -> Self {
        Self(context)
    }

    pub fn context(self) -> ContextIndex {
        self.0
    }
}

/// Handle returned by a successful session start. Strongly typed carrier
/// for what the original stashed in widget property bags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub slot: SessionSlot,
    pub context_index: ContextIndex,
    pub hash: Option<ShortcutHash>,
}
