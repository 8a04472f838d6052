//! Output path helpers
//!
//! Time-stamped file naming and storage key derivation.

use chrono::Utc;
use std::path::{Component, Path, PathBuf};

/// Build `<dir>/<prefix>_<unix millis>.<ext>`.
///
/// If a file with that name already exists the timestamp is bumped until a
/// free name is found, so a path is never handed out twice.
pub fn timestamped_path(dir: &Path, prefix: &str, extension: &str) -> PathBuf {
    let mut stamp = Utc::now().timestamp_millis();
    loop {
        let candidate = dir.join(format!("{}_{}.{}", prefix, stamp, extension));
        if !candidate.exists() {
            return candidate;
        }
        stamp += 1;
    }
}

/// Derive an object storage key for `file` relative to `base_dir`.
///
/// Components are joined with `/` regardless of platform. Files outside
/// `base_dir` fall back to their file name.
pub fn storage_key(file: &Path, base_dir: &Path) -> String {
    let file = normalize(file);
    let base = normalize(base_dir);

    match file.strip_prefix(&base) {
        Ok(rel) if rel.components().next().is_some() => rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/"),
        _ => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

/// Drop `.` components so `./recordings` and `recordings` compare equal
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
