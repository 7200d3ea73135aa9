//! Free-text feedback capture.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::fsutil::{create_unique, escape_file_component};

/// Write `text` to `<dir>/<user>_<YYYYmmddHHMMSS>.txt`.
///
/// Blank feedback is ignored and yields `None`. An existing file is never
/// overwritten.
pub fn save_feedback(dir: &Path, username: &str, text: &str) -> Result<Option<PathBuf>> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    let stem = format!(
        "{}_{}",
        escape_file_component(username),
        chrono::Local::now().format("%Y%m%d%H%M%S")
    );
    let path = create_unique(dir, &stem, "txt", text.as_bytes())?;
    tracing::info!(username, path = %path.display(), "feedback saved");
    Ok(Some(path))
}
