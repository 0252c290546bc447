use std::path::{Path, PathBuf};

/// Maps a Windows-style `C:` path onto the prefix's `drive_c` tree.
/// Paths without a drive letter are taken as host paths and returned
/// unchanged. Backslash separators in the remapped tail are normalized.
pub fn resolve_windows_path(prefix_root: &Path, path: &Path) -> PathBuf {
    let Some(raw) = path.to_str() else {
        return path.to_path_buf();
    };

    let mut chars = raw.chars();
    let drive = chars.next();
    let colon = chars.next();
    let is_c_drive = matches!(drive, Some('c') | Some('C')) && colon == Some(':');
    if !is_c_drive {
        return path.to_path_buf();
    }

    let tail = raw[2..].trim_start_matches(['/', '\\']);
    let mut resolved = prefix_root.join("drive_c");
    for segment in tail.split(['/', '\\']).filter(|segment| !segment.is_empty()) {
        resolved.push(segment);
    }
    resolved
}
