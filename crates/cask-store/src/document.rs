use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root store document (`manager.toml`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_prefix: Option<String>,
}

/// Per-prefix document (`prefixes/<name>/prefix.toml`). Shortcuts are
/// keyed by their hash token; BTreeMap keeps the serialized table in a
/// stable order across rewrites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixDocument {
    pub runner: String,
    #[serde(default)]
    pub shortcuts: BTreeMap<String, ShortcutRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortcutRecord {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::{PrefixDocument, ShortcutRecord};

    #[test]
    fn prefix_document_round_trips_through_toml() {
        let mut document = PrefixDocument {
            runner: "GE-Proton9-20".to_owned(),
            shortcuts: Default::default(),
        };
        document.shortcuts.insert(
            "00000000000000000000000000000abc".to_owned(),
            ShortcutRecord {
                name: "Quake".to_owned(),
                path: "C:/games/quake.exe".into(),
                args: vec!["-nosound".to_owned()],
            },
        );

        let encoded = toml::to_string_pretty(&document).expect("encode prefix document");
        let decoded: PrefixDocument = toml::from_str(&encoded).expect("decode prefix document");
        assert_eq!(decoded, document);
    }

    #[test]
    fn missing_shortcut_table_decodes_as_empty() {
        let decoded: PrefixDocument =
            toml::from_str("runner = \"GE-Proton9-20\"").expect("decode minimal document");
        assert!(decoded.shortcuts.is_empty());
    }
}
