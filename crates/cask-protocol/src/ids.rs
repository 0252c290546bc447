use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identity token of a shortcut. Generated once when the shortcut
/// is created and stable across renames; the display name is presentation
/// state only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShortcutHash(String);

impl ShortcutHash {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShortcutHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShortcutHash {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Index of the execution context (worker task) bound to one in-flight
/// session. Allocated monotonically by the registry; never reused while
/// any session is active.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ContextIndex(u64);

impl ContextIndex {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
