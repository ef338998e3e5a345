//! History export for `ritmo run --history-out`.

use ritmo_core::History;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Write `history` as pretty JSON to `path`, replacing any existing file.
///
/// The JSON goes to a uniquely named temp file in the target directory first and
/// is renamed into place, so readers never see a half-written export.
pub fn export_history(path: &Path, history: &History) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut file = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(file.as_file_mut(), history).map_err(io::Error::other)?;
    file.as_file_mut().flush()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
