//! Filesystem-backed prefix and shortcut persistence.
//!
//! Layout under the store root:
//! `manager.toml` holds the current-prefix pointer; each prefix lives at
//! `prefixes/<name>/` (the wine prefix directory itself) with its
//! settings and shortcut table in `prefixes/<name>/prefix.toml`.

pub mod document;
pub mod paths;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use cask_protocol::error::{LaunchError, LaunchResult};
use cask_protocol::ids::ShortcutHash;
use cask_protocol::store::{PrefixStore, ShortcutEntry};
use tracing::debug;

use crate::document::{ManagerDocument, PrefixDocument, ShortcutRecord};

const MANAGER_FILE: &str = "manager.toml";
const PREFIX_FILE: &str = "prefix.toml";
const PREFIXES_DIR: &str = "prefixes";

pub struct FsPrefixStore {
    root: PathBuf,
}

impl FsPrefixStore {
    pub fn open(root: impl Into<PathBuf>) -> LaunchResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(PREFIXES_DIR))
            .map_err(|error| store_error("create store root", &root, error))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn list_prefixes(&self) -> LaunchResult<Vec<String>> {
        let prefixes_dir = self.root.join(PREFIXES_DIR);
        let entries = fs::read_dir(&prefixes_dir)
            .map_err(|error| store_error("read prefixes directory", &prefixes_dir, error))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|error| store_error("read prefix entry", &prefixes_dir, error))?;
            let path = entry.path();
            if path.is_dir() && path.join(PREFIX_FILE).exists() {
                if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                    names.push(name.to_owned());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn create_prefix(&self, name: &str, runner: &str) -> LaunchResult<()> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(LaunchError::Store(format!(
                "invalid prefix name: {name:?}"
            )));
        }
        let prefix_dir = self.root.join(PREFIXES_DIR).join(name);
        if prefix_dir.join(PREFIX_FILE).exists() {
            return Err(LaunchError::Store(format!("prefix already exists: {name}")));
        }
        fs::create_dir_all(&prefix_dir)
            .map_err(|error| store_error("create prefix directory", &prefix_dir, error))?;

        let document = PrefixDocument {
            runner: runner.to_owned(),
            shortcuts: BTreeMap::new(),
        };
        self.write_prefix_document(name, &document)?;
        debug!(prefix = name, runner, "created prefix");
        Ok(())
    }

    pub fn delete_prefix(&self, name: &str) -> LaunchResult<()> {
        let prefix_dir = self.root.join(PREFIXES_DIR).join(name);
        if !prefix_dir.join(PREFIX_FILE).exists() {
            return Err(LaunchError::Store(format!("no such prefix: {name}")));
        }
        fs::remove_dir_all(&prefix_dir)
            .map_err(|error| store_error("delete prefix directory", &prefix_dir, error))?;

        let mut manager = self.read_manager_document()?;
        if manager.current_prefix.as_deref() == Some(name) {
            manager.current_prefix = None;
            self.write_manager_document(&manager)?;
        }
        Ok(())
    }

    pub fn set_current_prefix(&self, name: &str) -> LaunchResult<()> {
        let prefix_file = self.root.join(PREFIXES_DIR).join(name).join(PREFIX_FILE);
        if !prefix_file.exists() {
            return Err(LaunchError::Store(format!("no such prefix: {name}")));
        }
        let mut manager = self.read_manager_document()?;
        manager.current_prefix = Some(name.to_owned());
        self.write_manager_document(&manager)
    }

    pub fn set_runner_version(&self, prefix: &str, runner: &str) -> LaunchResult<()> {
        let mut document = self.read_prefix_document(prefix)?;
        document.runner = runner.to_owned();
        self.write_prefix_document(prefix, &document)
    }

    /// Registers a shortcut in the current prefix and returns its hash.
    /// The hash is a random token re-rolled until unique within the
    /// prefix's shortcut set; renames never change it.
    pub fn add_shortcut(
        &self,
        display_name: &str,
        executable: &Path,
        extra_args: &[String],
    ) -> LaunchResult<ShortcutHash> {
        let prefix = self.current_prefix()?;
        let mut document = self.read_prefix_document(&prefix)?;

        let mut token = random_hash_token();
        while document.shortcuts.contains_key(&token) {
            token = random_hash_token();
        }

        document.shortcuts.insert(
            token.clone(),
            ShortcutRecord {
                name: display_name.to_owned(),
                path: executable.to_path_buf(),
                args: extra_args.to_vec(),
            },
        );
        self.write_prefix_document(&prefix, &document)?;
        debug!(prefix, shortcut = display_name, hash = %token, "added shortcut");
        Ok(ShortcutHash::new(token))
    }

    pub fn rename_shortcut(&self, hash: &ShortcutHash, display_name: &str) -> LaunchResult<()> {
        let prefix = self.current_prefix()?;
        let mut document = self.read_prefix_document(&prefix)?;
        let record = document
            .shortcuts
            .get_mut(hash.as_str())
            .ok_or_else(|| LaunchError::Store(format!("no such shortcut: {hash}")))?;
        record.name = display_name.to_owned();
        self.write_prefix_document(&prefix, &document)
    }

    pub fn remove_shortcut(&self, hash: &ShortcutHash) -> LaunchResult<()> {
        let prefix = self.current_prefix()?;
        let mut document = self.read_prefix_document(&prefix)?;
        if document.shortcuts.remove(hash.as_str()).is_none() {
            return Err(LaunchError::Store(format!("no such shortcut: {hash}")));
        }
        self.write_prefix_document(&prefix, &document)
    }

    /// Shortcut entries of the current prefix, ordered by display name —
    /// the order the presentation layer renders, which slot indices are
    /// taken from.
    pub fn sorted_shortcuts(&self) -> LaunchResult<Vec<ShortcutEntry>> {
        let prefix = self.current_prefix()?;
        let document = self.read_prefix_document(&prefix)?;
        let mut entries: Vec<ShortcutEntry> = document
            .shortcuts
            .into_iter()
            .map(|(token, record)| ShortcutEntry {
                hash: ShortcutHash::new(token),
                display_name: record.name,
                executable: record.path,
                extra_args: record.args,
            })
            .collect();
        entries.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(entries)
    }

    fn read_manager_document(&self) -> LaunchResult<ManagerDocument> {
        let path = self.root.join(MANAGER_FILE);
        if !path.exists() {
            return Ok(ManagerDocument::default());
        }
        let raw = fs::read_to_string(&path)
            .map_err(|error| store_error("read manager document", &path, error))?;
        toml::from_str(&raw)
            .map_err(|error| LaunchError::Store(format!("parse {}: {error}", path.display())))
    }

    fn write_manager_document(&self, document: &ManagerDocument) -> LaunchResult<()> {
        let path = self.root.join(MANAGER_FILE);
        let raw = toml::to_string_pretty(document)
            .map_err(|error| LaunchError::Store(format!("encode manager document: {error}")))?;
        fs::write(&path, raw).map_err(|error| store_error("write manager document", &path, error))
    }

    fn read_prefix_document(&self, prefix: &str) -> LaunchResult<PrefixDocument> {
        let path = self
            .root
            .join(PREFIXES_DIR)
            .join(prefix)
            .join(PREFIX_FILE);
        let raw = fs::read_to_string(&path)
            .map_err(|error| store_error("read prefix document", &path, error))?;
        toml::from_str(&raw)
            .map_err(|error| LaunchError::Store(format!("parse {}: {error}", path.display())))
    }

    fn write_prefix_document(&self, prefix: &str, document: &PrefixDocument) -> LaunchResult<()> {
        let path = self
            .root
            .join(PREFIXES_DIR)
            .join(prefix)
            .join(PREFIX_FILE);
        let raw = toml::to_string_pretty(document)
            .map_err(|error| LaunchError::Store(format!("encode prefix document: {error}")))?;
        fs::write(&path, raw).map_err(|error| store_error("write prefix document", &path, error))
    }
}

impl PrefixStore for FsPrefixStore {
    fn current_prefix(&self) -> LaunchResult<String> {
        self.read_manager_document()?
            .current_prefix
            .ok_or_else(|| LaunchError::Store("no prefix is currently selected".to_owned()))
    }

    fn prefix_root(&self, prefix: &str) -> LaunchResult<PathBuf> {
        let prefix_dir = self.root.join(PREFIXES_DIR).join(prefix);
        if !prefix_dir.join(PREFIX_FILE).exists() {
            return Err(LaunchError::Store(format!("no such prefix: {prefix}")));
        }
        Ok(prefix_dir)
    }

    fn runner_version(&self, prefix: &str) -> LaunchResult<String> {
        Ok(self.read_prefix_document(prefix)?.runner)
    }

    fn list_shortcuts(&self, prefix: &str) -> LaunchResult<Vec<ShortcutHash>> {
        let document = self.read_prefix_document(prefix)?;
        Ok(document
            .shortcuts
            .into_keys()
            .map(ShortcutHash::new)
            .collect())
    }

    fn resolve_shortcut(&self, hash: &ShortcutHash) -> LaunchResult<ShortcutEntry> {
        let prefix = self.current_prefix()?;
        let document = self.read_prefix_document(&prefix)?;
        let record = document
            .shortcuts
            .get(hash.as_str())
            .ok_or_else(|| LaunchError::Store(format!("no such shortcut: {hash}")))?;
        Ok(ShortcutEntry {
            hash: hash.clone(),
            display_name: record.name.clone(),
            executable: record.path.clone(),
            extra_args: record.args.clone(),
        })
    }
}

fn random_hash_token() -> String {
    format!("{:032x}", rand::random::<u128>())
}

fn store_error(action: &str, path: &Path, error: std::io::Error) -> LaunchError {
    LaunchError::Store(format!("{action} {}: {error}", path.display()))
}

#[cfg(test)]
mod tests {
    use cask_protocol::store::PrefixStore;
    use tempfile::TempDir;

    use super::FsPrefixStore;

    fn store_with_prefix(name: &str) -> (TempDir, FsPrefixStore) {
        let dir = TempDir::new().expect("create temp store root");
        let store = FsPrefixStore::open(dir.path()).expect("open store");
        store.create_prefix(name, "GE-Proton9-20").expect("create prefix");
        store.set_current_prefix(name).expect("select prefix");
        (dir, store)
    }

    #[test]
    fn create_and_select_prefix_round_trips() {
        let (_dir, store) = store_with_prefix("games");

        assert_eq!(store.current_prefix().expect("current prefix"), "games");
        assert_eq!(
            store.runner_version("games").expect("runner version"),
            "GE-Proton9-20"
        );
        assert_eq!(store.list_prefixes().expect("list prefixes"), vec!["games"]);
    }

    #[test]
    fn create_prefix_rejects_duplicates_and_bad_names() {
        let (_dir, store) = store_with_prefix("games");

        assert!(store.create_prefix("games", "GE-Proton9-20").is_err());
        assert!(store.create_prefix("", "GE-Proton9-20").is_err());
        assert!(store.create_prefix("a/b", "GE-Proton9-20").is_err());
    }

    #[test]
    fn shortcut_hash_survives_rename_and_stays_unique() {
        let (_dir, store) = store_with_prefix("games");

        let first = store
            .add_shortcut("Quake", "C:/games/quake.exe".as_ref(), &[])
            .expect("add first shortcut");
        let second = store
            .add_shortcut("Doom", "C:/games/doom.exe".as_ref(), &["-nosound".to_owned()])
            .expect("add second shortcut");
        assert_ne!(first, second);

        store
            .rename_shortcut(&first, "Quake Remastered")
            .expect("rename shortcut");
        let resolved = store.resolve_shortcut(&first).expect("resolve after rename");
        assert_eq!(resolved.hash, first);
        assert_eq!(resolved.display_name, "Quake Remastered");
        assert_eq!(resolved.executable.to_str(), Some("C:/games/quake.exe"));

        let hashes = store.list_shortcuts("games").expect("list shortcuts");
        assert_eq!(hashes.len(), 2);
    }

    #[test]
    fn sorted_shortcuts_orders_by_display_name() {
        let (_dir, store) = store_with_prefix("games");
        store
            .add_shortcut("Zork", "C:/games/zork.exe".as_ref(), &[])
            .expect("add shortcut");
        store
            .add_shortcut("Arx Fatalis", "C:/games/arx.exe".as_ref(), &[])
            .expect("add shortcut");

        let names: Vec<String> = store
            .sorted_shortcuts()
            .expect("sorted shortcuts")
            .into_iter()
            .map(|entry| entry.display_name)
            .collect();
        assert_eq!(names, vec!["Arx Fatalis", "Zork"]);
    }

    #[test]
    fn remove_shortcut_rejects_unknown_hash() {
        let (_dir, store) = store_with_prefix("games");
        let hash = store
            .add_shortcut("Quake", "C:/games/quake.exe".as_ref(), &[])
            .expect("add shortcut");

        store.remove_shortcut(&hash).expect("remove shortcut");
        assert!(store.remove_shortcut(&hash).is_err());
        assert!(store.resolve_shortcut(&hash).is_err());
    }

    #[test]
    fn delete_prefix_clears_current_selection() {
        let (_dir, store) = store_with_prefix("games");
        store.delete_prefix("games").expect("delete prefix");

        assert!(store.current_prefix().is_err());
        assert!(store.list_prefixes().expect("list prefixes").is_empty());
    }
}
