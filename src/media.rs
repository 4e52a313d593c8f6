//! Playable sources and the local audio library

use std::fmt;
use std::path::{Path, PathBuf};

use crate::constants::AUDIO_EXTENSIONS;
use crate::error::{NetworkError, Result};

/// What a receiver is asked to play
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// Local file
    File(PathBuf),
    /// Already HTTP-addressable stream or file
    Url(String),
}

impl MediaSource {
    /// File source with an absolute path, failing if the file is missing
    pub fn file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(NetworkError::SourceNotFound(path.display().to_string()).into());
        }
        Ok(MediaSource::File(std::fs::canonicalize(path)?))
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            MediaSource::File(path) => content_type_for(path),
            MediaSource::Url(_) => "audio/mpeg",
        }
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSource::File(path) => write!(f, "{}", path.display()),
            MediaSource::Url(url) => f.write_str(url),
        }
    }
}

/// MIME type from file extension, `audio/mpeg` when unknown
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("m4a") => "audio/mp4",
        Some("wav") => "audio/wav",
        Some("flac") => "audio/flac",
        Some("aac") => "audio/aac",
        _ => "audio/mpeg",
    }
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Audio files directly inside `dir`, sorted by file name.
/// A missing directory yields an empty list.
pub fn list_audio_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_audio_file(path))
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Resolve a user-supplied name as a path, then as a file in the library
pub fn resolve_audio_file(arg: &str, audio_dir: &Path) -> Result<PathBuf> {
    let direct = PathBuf::from(arg);
    if direct.is_file() {
        return Ok(direct);
    }
    let in_library = audio_dir.join(arg);
    if in_library.is_file() {
        return Ok(in_library);
    }
    Err(NetworkError::SourceNotFound(arg.to_string()).into())
}
