//! Small filesystem helpers shared by the stores.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Replace `path` with `contents` so readers see either the old file or the
/// new one, never a half-written file.
///
/// The data goes to a `.tmp` sibling first and is renamed over the target.
pub fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }

    let tmp = tmp_sibling(path);
    {
        let mut file = std::fs::File::create(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

/// Sibling path with `.tmp` appended to the full file name.
pub fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `contents` to a brand new file named `<stem>.<ext>` in `dir`.
///
/// An existing file is never touched: on a name clash `<stem>-1.<ext>`,
/// `<stem>-2.<ext>`, ... are tried in turn. Returns the path written.
pub fn create_unique(dir: &Path, stem: &str, ext: &str, contents: &[u8]) -> Result<PathBuf> {
    create_unique_with(dir, stem, ext, |file| {
        file.write_all(contents)?;
        file.sync_all()
    })
}

/// [`create_unique`] with the file body produced by `fill`. If `fill`
/// fails the new file is removed again.
fn create_unique_with(
    dir: &Path,
    stem: &str,
    ext: &str,
    fill: impl FnOnce(&mut File) -> std::io::Result<()>,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    for attempt in 0u32.. {
        let name = if attempt == 0 {
            format!("{}.{}", stem, ext)
        } else {
            format!("{}-{}.{}", stem, attempt, ext)
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                if let Err(e) = fill(&mut file) {
                    drop(file);
                    let _ = std::fs::remove_file(&path);
                    return Err(e).with_context(|| format!("Failed to write {}", path.display()));
                }
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create {}", path.display()))
            }
        }
    }
    anyhow::bail!("no free file name for {} in {}", stem, dir.display())
}

/// Escape a username for use inside a file name.
///
/// Bytes outside `[A-Za-z0-9._-]` become `%XX`, so the mapping is
/// injective and no username can climb out of its directory.
pub fn escape_file_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || (b == b'.' && !out.is_empty()) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}
