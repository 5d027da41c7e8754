//! ffconcat playlist files.
//!
//! A playlist is a header line followed by `file '<name>'` entries. Writes go
//! through a sibling temp file and a rename so a reader never sees a torn list.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

pub const HEADER: &str = "ffconcat version 1.0";

/// `file '<name>'`, with single quotes escaped the way ffconcat expects.
pub fn entry_line(name: &str) -> String {
    format!("file '{}'", name.replace('\'', "'\\''"))
}

/// Name referenced by an entry line, if the line is one.
pub fn entry_name(line: &str) -> Option<String> {
    let rest = line.trim().strip_prefix("file ")?.trim();
    let inner = rest.strip_prefix('\'')?.strip_suffix('\'')?;
    Some(inner.replace("'\\''", "'"))
}

pub fn read_lines(path: &Path) -> io::Result<Vec<String>> {
    Ok(fs::read_to_string(path)?
        .lines()
        .map(str::to_string)
        .collect())
}

/// Replace the file with `lines`, one per line.
pub fn write_lines(path: &Path, lines: &[String]) -> io::Result<()> {
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "playlist path has no file name")
    })?;
    let tmp = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

    {
        let mut file = fs::File::create(&tmp)?;
        for line in lines {
            writeln!(file, "{line}")?;
        }
        file.sync_all()?;
    }

    fs::rename(&tmp, path)
}

/// Truncate a playlist back to its header.
pub fn write_header_only(path: &Path) -> io::Result<()> {
    write_lines(path, &[HEADER.to_string()])
}

/// A segment that exists and has content.
pub fn is_file_ready(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!("Error checking readiness of {}: {}", path.display(), e);
            }
            false
        }
    }
}
