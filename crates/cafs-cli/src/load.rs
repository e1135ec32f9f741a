use std::fs;
use std::path::Path;

use anyhow::Context;
use cafs_store::{File, Memdir, Memfile};
use tracing::debug;
use walkdir::WalkDir;

/// Read a local file or directory tree into memory.
///
/// The root is placed at `/<name>`. Entries within a directory are ordered by
/// file name; symlinks and special files are skipped.
pub fn load_path(path: &Path) -> anyhow::Result<Box<dyn File>> {
    let meta = fs::metadata(path).with_context(|| format!("cannot read {}", path.display()))?;
    let name = root_name(path);
    let logical = format!("/{name}");

    if meta.is_file() {
        let data = fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
        return Ok(Box::new(Memfile::from_bytes(name, data).with_path(logical)));
    }

    let mut root = Memdir::new(logical);
    for entry in WalkDir::new(path).min_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("cannot walk {}", path.display()))?;
        let rel = entry.path().strip_prefix(path)?;
        let file_type = entry.file_type();

        if file_type.is_dir() {
            root.make_dir_p(&slash_path(rel));
        } else if file_type.is_file() {
            let data = fs::read(entry.path())
                .with_context(|| format!("cannot read {}", entry.path().display()))?;
            let parent = rel.parent().map(slash_path).unwrap_or_default();
            let name = entry.file_name().to_string_lossy().into_owned();
            root.make_dir_p(&parent)
                .add_child(Memfile::from_bytes(name, data));
        } else {
            debug!(path = %entry.path().display(), "skipping special file");
        }
    }
    Ok(Box::new(root))
}

fn root_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .or_else(|| {
            path.canonicalize()
                .ok()?
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "root".to_string())
}

/// Relative path with `/` separators regardless of platform.
fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
