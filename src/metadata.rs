//! Reading video metadata files and writing publish results back into them.
//!
//! A metadata file is a JSON object such as:
//!
//! ```json
//! {
//!     "title": "Projectile motion, JEE Advanced 2019",
//!     "tags": ["physics", "kinematics"],
//!     "language": { "video": "en" },
//!     "license": "Standard YouTube License",
//!     "recording": { "date": "2024-05-01", "location": "Bengaluru" },
//!     "files": { "video": "out.mp4", "description": "desc.txt", "thumbnail": "thumb.png" },
//!     "education": { "type": "Problem walkthrough", "problems": ["..."] }
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::models::{Education, License, MediaFiles, Recording, VideoMetadata};
use crate::{store, youtube};

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("could not read {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("malformed metadata file {}: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("metadata file {} is missing required key '{key}'", .path.display())]
    MissingKey { path: PathBuf, key: &'static str },

    #[error("description file not found: {}", .0.display())]
    DescriptionNotFound(PathBuf),
}

#[derive(Deserialize)]
struct RawMetadata {
    title: Option<String>,
    tags: Option<Vec<String>>,
    language: Option<RawLanguage>,
    license: Option<String>,
    embedding: Option<bool>,
    recording: Option<RawRecording>,
    files: Option<RawFiles>,
    education: Option<Education>,
    youtube_id: Option<String>,
    url: Option<String>,
}

#[derive(Deserialize)]
struct RawLanguage {
    video: Option<String>,
}

#[derive(Deserialize)]
struct RawRecording {
    date: Option<String>,
    location: Option<String>,
}

#[derive(Deserialize)]
struct RawFiles {
    video: Option<PathBuf>,
    description: Option<PathBuf>,
    thumbnail: Option<PathBuf>,
}

/// Reads and validates a metadata file, then loads the description it points to.
pub fn read(path: &Path) -> Result<VideoMetadata, MetadataError> {
    let data = fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => MetadataError::NotFound(path.to_path_buf()),
        _ => MetadataError::Io {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    let raw: RawMetadata =
        serde_json::from_str(&data).map_err(|source| MetadataError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;

    let missing = |key: &'static str| MetadataError::MissingKey {
        path: path.to_path_buf(),
        key,
    };

    let language = raw
        .language
        .and_then(|l| l.video)
        .ok_or_else(|| missing("language.video"))?;

    let recording = raw.recording.ok_or_else(|| missing("recording"))?;
    let recording = Recording {
        date: recording.date.ok_or_else(|| missing("recording.date"))?,
        location: recording
            .location
            .ok_or_else(|| missing("recording.location"))?,
    };

    let files = raw.files.ok_or_else(|| missing("files"))?;
    let files = MediaFiles {
        video: files.video.ok_or_else(|| missing("files.video"))?,
        description: files
            .description
            .ok_or_else(|| missing("files.description"))?,
        thumbnail: files.thumbnail,
    };

    let description = read_description(&files.description)?;

    Ok(VideoMetadata {
        title: raw.title.unwrap_or_default(),
        description,
        tags: raw.tags.unwrap_or_default(),
        language,
        license: License::from_label(raw.license.as_deref()),
        embeddable: raw.embedding.unwrap_or(true),
        recording,
        files,
        education: raw.education,
        youtube_id: raw.youtube_id.filter(|id| !id.trim().is_empty()),
        url: raw.url,
    })
}

/// Loads a description text file with surrounding whitespace stripped.
pub fn read_description(path: &Path) -> Result<String, MetadataError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text.trim().to_string()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(MetadataError::DescriptionNotFound(path.to_path_buf()))
        }
        Err(source) => Err(MetadataError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Stores the remote ID and public URL of a freshly created video.
/// Only `youtube_id` and `url` are touched.
pub fn record_publication(path: &Path, video_id: &str) -> anyhow::Result<String> {
    let url = youtube::build_canonical_url(video_id);

    store::update_json_file(path, |object| {
        object.insert("youtube_id".to_string(), Value::from(video_id));
        object.insert("url".to_string(), Value::from(url.as_str()));
        Ok(())
    })
    .with_context(|| format!("failed to save video ID {video_id} to {}", path.display()))?;

    Ok(url)
}
