//! Discovered media files and the naming convention that dates them.

use chrono::NaiveDateTime;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// What a file name says an artifact is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactType {
    Snapshot,
    Recording,
}

impl ArtifactType {
    /// Classify by extension: `.jpg` snapshots, `.mp4` recordings.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" => Some(Self::Snapshot),
            "mp4" => Some(Self::Recording),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Recording => "recording",
        }
    }
}

/// Kind-specific data carried by a queued artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactKind {
    /// A still image; its playtime is assigned by the budget pass.
    Snapshot { assigned_secs: Option<f64> },
    /// A clip; its playtime is the duration measured at discovery.
    Recording { duration_secs: f64 },
}

/// One discovered media file awaiting scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub capture_time: NaiveDateTime,
    pub path: PathBuf,
    pub kind: ArtifactKind,
}

impl Artifact {
    pub fn snapshot(capture_time: NaiveDateTime, path: impl Into<PathBuf>) -> Self {
        Self {
            capture_time,
            path: path.into(),
            kind: ArtifactKind::Snapshot {
                assigned_secs: None,
            },
        }
    }

    pub fn recording(
        capture_time: NaiveDateTime,
        path: impl Into<PathBuf>,
        duration_secs: f64,
    ) -> Self {
        Self {
            capture_time,
            path: path.into(),
            kind: ArtifactKind::Recording { duration_secs },
        }
    }

    pub fn artifact_type(&self) -> ArtifactType {
        match self.kind {
            ArtifactKind::Snapshot { .. } => ArtifactType::Snapshot,
            ArtifactKind::Recording { .. } => ArtifactType::Recording,
        }
    }

    /// File name without extension.
    pub fn base_name(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Assigned playtime of a snapshot, `None` for recordings or before the budget pass.
    pub fn assigned_secs(&self) -> Option<f64> {
        match self.kind {
            ArtifactKind::Snapshot { assigned_secs } => assigned_secs,
            ArtifactKind::Recording { .. } => None,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Why a path could not be turned into an artifact.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("not a snapshot or recording: {}", .0.display())]
    UnsupportedFile(PathBuf),

    #[error("no timestamp found in file name: {0}")]
    NoTimestamp(String),

    #[error("{} is not inside a <year>/<month>/<day> directory", .0.display())]
    MissingDateDirs(PathBuf),

    #[error("invalid capture time {value:?}: {source}")]
    InvalidDate {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{6})-Camera\d+-(Snapshot|Recording)\.(jpg|mp4)$")
            .expect("artifact name pattern is valid")
    })
}

/// Parse `<HHMMSS>-Camera<N>-<Snapshot|Recording>.<jpg|mp4>` living under
/// `<year>/<MM-MonthName>/<DD>/`.
///
/// Returns the capture time and the type announced by the name.
pub fn parse_artifact_path(path: &Path) -> Result<(NaiveDateTime, ArtifactType), ArtifactError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ArtifactError::UnsupportedFile(path.to_path_buf()))?;

    let artifact_type = ArtifactType::from_path(path)
        .ok_or_else(|| ArtifactError::UnsupportedFile(path.to_path_buf()))?;

    let captures = name_pattern()
        .captures(file_name)
        .ok_or_else(|| ArtifactError::NoTimestamp(file_name.to_string()))?;
    let time_str = &captures[1];

    let named_type = match &captures[2] {
        "Snapshot" => ArtifactType::Snapshot,
        _ => ArtifactType::Recording,
    };
    if named_type != artifact_type {
        return Err(ArtifactError::UnsupportedFile(path.to_path_buf()));
    }

    let mut dirs = path
        .parent()
        .into_iter()
        .flat_map(|p| p.components().rev())
        .filter_map(|c| c.as_os_str().to_str());
    let (day, month, year) = match (dirs.next(), dirs.next(), dirs.next()) {
        (Some(d), Some(m), Some(y)) => (d, m, y),
        _ => return Err(ArtifactError::MissingDateDirs(path.to_path_buf())),
    };

    let value = format!("{year}/{month}/{day}/{time_str}");
    let capture_time = NaiveDateTime::parse_from_str(&value, "%Y/%m-%B/%d/%H%M%S")
        .map_err(|source| ArtifactError::InvalidDate { value, source })?;

    Ok((capture_time, artifact_type))
}

/// Directory holding a given day's artifacts: `<root>/Snapshots/<YYYY>/<MM-Month>/<DD>`.
pub fn day_directory(root: &Path, day: chrono::NaiveDate) -> PathBuf {
    root.join("Snapshots")
        .join(day.format("%Y").to_string())
        .join(day.format("%m-%B").to_string())
        .join(day.format("%d").to_string())
}
