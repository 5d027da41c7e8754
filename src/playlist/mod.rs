//! Double-buffered playlists.
//!
//! The transport process reads the active buffer while the pipeline appends
//! to the other one. Every non-empty buffer ends with an entry pointing at the
//! active buffer's file, so a reader that runs out of content loops back
//! instead of starving.

pub mod format;

use format::{
    entry_line, entry_name, is_file_ready, read_lines, write_header_only, write_lines, HEADER,
};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

pub const PLAYLIST_NAMES: [&str; 2] = ["list_1.txt", "list_2.txt"];

/// One playlist file plus the playtime appended to it but not yet played.
#[derive(Debug, Clone)]
pub struct PlaylistBuffer {
    path: PathBuf,
    name: String,
    pending_secs: f64,
}

impl PlaylistBuffer {
    fn new(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(name),
            name: name.to_string(),
            pending_secs: 0.0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pending_secs(&self) -> f64 {
        self.pending_secs
    }
}

#[derive(Debug)]
pub struct BufferPair {
    dir: PathBuf,
    buffers: [PlaylistBuffer; 2],
    active: usize,
}

impl BufferPair {
    /// Two buffers in `dir`; the second starts out active so the first
    /// receives the warm-up content.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let buffers = [
            PlaylistBuffer::new(&dir, PLAYLIST_NAMES[0]),
            PlaylistBuffer::new(&dir, PLAYLIST_NAMES[1]),
        ];
        Self {
            dir,
            buffers,
            active: 1,
        }
    }

    /// Create both files with only the header if they do not exist yet.
    pub fn initialize(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        for buffer in &self.buffers {
            if !buffer.path.exists() {
                write_header_only(&buffer.path)?;
                tracing::debug!("Created playlist {}", buffer.path.display());
            }
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn non_active_index(&self) -> usize {
        1 - self.active
    }

    pub fn active(&self) -> &PlaylistBuffer {
        &self.buffers[self.active]
    }

    pub fn non_active(&self) -> &PlaylistBuffer {
        &self.buffers[self.non_active_index()]
    }

    pub fn buffer(&self, index: usize) -> &PlaylistBuffer {
        &self.buffers[index]
    }

    /// How a segment is referenced from a playlist: bare file name when it sits
    /// next to the playlists, full path otherwise.
    fn reference_for(&self, segment: &Path) -> String {
        match (segment.parent(), segment.file_name()) {
            (Some(parent), Some(name)) if parent == self.dir => name.to_string_lossy().to_string(),
            _ => segment.to_string_lossy().to_string(),
        }
    }

    fn is_loop_back(&self, line: &str) -> bool {
        entry_name(line).is_some_and(|name| PLAYLIST_NAMES.contains(&name.as_str()))
    }

    /// Append a segment to the non-active buffer.
    ///
    /// Returns `Ok(false)` without touching anything when the segment is
    /// missing or empty.
    pub fn append(&mut self, segment: &Path, duration_secs: f64) -> io::Result<bool> {
        if !is_file_ready(segment) {
            tracing::warn!("Segment {} is not ready to be added to a playlist", segment.display());
            return Ok(false);
        }

        let reference = self.reference_for(segment);
        let active_name = self.active().name.clone();
        let target = self.non_active_index();

        let mut lines = read_lines(&self.buffers[target].path)?;
        if lines.first().map(|l| l.trim()) != Some(HEADER) {
            lines.insert(0, HEADER.to_string());
        }
        while lines.len() > 1 && lines.last().is_some_and(|l| self.is_loop_back(l)) {
            lines.pop();
        }
        lines.push(entry_line(&reference));
        lines.push(entry_line(&active_name));
        write_lines(&self.buffers[target].path, &lines)?;

        let buffer = &mut self.buffers[target];
        buffer.pending_secs += duration_secs;
        tracing::info!(
            "Added {} ({:.1}s) to {}; it now holds {:.1}s",
            reference,
            duration_secs,
            buffer.name,
            buffer.pending_secs
        );

        Ok(true)
    }

    /// Make the non-active buffer active and empty the one that was playing.
    pub fn switch(&mut self) -> io::Result<()> {
        let from = self.active;
        let to = self.non_active_index();

        tracing::info!(
            "Switching from playlist {} to playlist {} with {:.1}s queued",
            self.buffers[from].name,
            self.buffers[to].name,
            self.buffers[to].pending_secs
        );

        self.active = to;
        write_header_only(&self.buffers[from].path)?;
        self.buffers[from].pending_secs = 0.0;
        Ok(())
    }

    /// Charge played time against the active buffer, returning what remains.
    pub fn charge_active(&mut self, elapsed_secs: f64) -> f64 {
        let buffer = &mut self.buffers[self.active];
        buffer.pending_secs -= elapsed_secs;
        buffer.pending_secs
    }

    /// Whether a buffer has no entries besides loop-back references.
    pub fn is_structurally_empty(&self, index: usize) -> io::Result<bool> {
        let lines = read_lines(&self.buffers[index].path)?;
        Ok(lines
            .iter()
            .skip(1)
            .filter(|l| !l.trim().is_empty())
            .all(|l| self.is_loop_back(l)))
    }

    pub fn both_empty(&self) -> io::Result<bool> {
        Ok(self.is_structurally_empty(0)? && self.is_structurally_empty(1)?)
    }

    /// File names of segments referenced by either playlist.
    pub fn referenced_segments(&self) -> io::Result<HashSet<String>> {
        let mut names = HashSet::new();
        for buffer in &self.buffers {
            let lines = match read_lines(&buffer.path) {
                Ok(lines) => lines,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            for name in lines.iter().filter_map(|l| entry_name(l)) {
                if PLAYLIST_NAMES.contains(&name.as_str()) {
                    continue;
                }
                let file_name = Path::new(&name)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or(name);
                names.insert(file_name);
            }
        }
        Ok(names)
    }

    /// Contents and durations of both buffers, for debug logging.
    pub fn render_state(&self) -> String {
        let mut out = String::new();
        for (i, buffer) in self.buffers.iter().enumerate() {
            let role = if i == self.active { "active" } else { "non-active" };
            out.push_str(&format!(
                "Playlist {} ({role}), {:.2}s pending:\n",
                buffer.name, buffer.pending_secs
            ));
            match read_lines(&buffer.path) {
                Ok(lines) => {
                    for line in lines {
                        out.push_str("  ");
                        out.push_str(&line);
                        out.push('\n');
                    }
                }
                Err(e) => out.push_str(&format!("  <unreadable: {e}>\n")),
            }
        }
        out
    }

    pub fn paths(&self) -> [PathBuf; 2] {
        [self.buffers[0].path.clone(), self.buffers[1].path.clone()]
    }
}
