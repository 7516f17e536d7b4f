//! Creating and updating videos from metadata files.
//!
//! The primary action (creating the video, or overwriting its snippet) either
//! succeeds or aborts the command. Thumbnail upload and education tagging run
//! afterwards on a best-effort basis: their failures are collected into
//! [`PublishOutcome::warnings`] and never undo the primary action.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::metadata;
use crate::models::{EDUCATION_CATEGORY_ID, Education, Privacy, VideoMetadata};
use crate::youtube;
use crate::youtube_api::{ChunkStatus, YouTubeApi};

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use thiserror::Error;

/// Size of each piece of a resumable upload.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Consecutive chunks without forward progress before giving up.
const MAX_STALLED_CHUNKS: u32 = 3;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("no YouTube ID found in {}; upload the video first", .0.display())]
    MissingVideoId(PathBuf),
}

/// Result of a successful primary action plus any secondary-step failures.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishOutcome {
    pub video_id: String,
    pub url: String,
    pub warnings: Vec<String>,
}

/// Whole-percent upload progress that never goes backwards.
#[derive(Debug, Default)]
pub struct UploadProgress {
    last: Option<u8>,
}

impl UploadProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new percentage only when it exceeds everything reported so far.
    pub fn advance(&mut self, done: u64, total: u64) -> Option<u8> {
        if total == 0 {
            return None;
        }
        let percent = (done.min(total) * 100 / total) as u8;
        match self.last {
            Some(last) if percent <= last => None,
            _ => {
                self.last = Some(percent);
                Some(percent)
            }
        }
    }
}

/// Tags in first-seen order with blanks and repeats removed.
fn dedup_tags<'a>(tags: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags.into_iter().map(str::trim) {
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

/// Request body for creating a video.
pub fn insert_body(meta: &VideoMetadata, privacy: Privacy) -> Value {
    json!({
        "snippet": {
            "title": meta.title,
            "description": meta.description,
            "tags": dedup_tags(meta.tags.iter().map(String::as_str)),
            "categoryId": EDUCATION_CATEGORY_ID,
            "defaultLanguage": meta.language,
        },
        "status": {
            "privacyStatus": privacy.as_str(),
            "license": meta.license.as_api_str(),
            "embeddable": meta.embeddable,
            "selfDeclaredMadeForKids": false,
        },
        "recordingDetails": {
            "recordingDate": meta.recording.date,
            "location": {
                "description": meta.recording.location,
            },
        },
    })
}

/// Request body that overwrites the snippet of an existing video.
pub fn update_body(video_id: &str, meta: &VideoMetadata) -> Value {
    json!({
        "id": video_id,
        "snippet": {
            "title": meta.title,
            "description": meta.description,
            "tags": dedup_tags(meta.tags.iter().map(String::as_str)),
            "categoryId": EDUCATION_CATEGORY_ID,
            "defaultLanguage": meta.language,
        },
    })
}

/// Base tags merged with the non-empty education fields.
pub fn education_tags(base: &[String], edu: &Education) -> Vec<String> {
    let extra = [&edu.academic_system, &edu.level, &edu.exam, &edu.kind]
        .into_iter()
        .filter_map(|v| v.as_deref());
    dedup_tags(base.iter().map(String::as_str).chain(extra))
}

/// The block appended to a description by education tagging.
pub fn education_section(edu: &Education) -> String {
    let field = |v: &Option<String>| v.clone().unwrap_or_else(|| "N/A".to_string());

    let mut section = String::from("\n\n=== Education Information ===\n");
    section.push_str(&format!("Type: {}\n", field(&edu.kind)));
    section.push_str(&format!("Academic System: {}\n", field(&edu.academic_system)));
    section.push_str(&format!("Level: {}\n", field(&edu.level)));
    section.push_str(&format!("Exam: {}\n", field(&edu.exam)));

    if let Some(problems) = &edu.problems {
        section.push_str("\nProblems Covered:\n");
        for problem in problems {
            section.push_str(&format!("• {problem}\n"));
        }
    }

    section
}

pub struct Publisher<'a, A: YouTubeApi> {
    api: &'a A,
}

impl<'a, A: YouTubeApi> Publisher<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self { api }
    }

    /// Uploads the video described by `metadata_path`, then records its ID and
    /// URL in that file. `on_progress` receives increasing whole percentages.
    pub fn publish(
        &self,
        metadata_path: &Path,
        privacy: Privacy,
        on_progress: &mut dyn FnMut(u8),
    ) -> Result<PublishOutcome> {
        let meta = metadata::read(metadata_path)?;

        if let Some(existing) = &meta.youtube_id {
            tracing::warn!(
                existing = %existing,
                "metadata already has a YouTube ID, uploading creates a new video"
            );
        }

        let body = insert_body(&meta, privacy);
        let video_id = self.upload_file(&body, &meta.files.video, on_progress)?;
        let url = metadata::record_publication(metadata_path, &video_id)?;

        let warnings = self.enrich(&video_id, &meta);

        Ok(PublishOutcome {
            video_id,
            url,
            warnings,
        })
    }

    /// Overwrites title, description, tags, category and language of the
    /// video recorded in `metadata_path`.
    pub fn update(&self, metadata_path: &Path) -> Result<PublishOutcome> {
        let meta = metadata::read(metadata_path)?;

        let video_id = meta
            .youtube_id
            .as_deref()
            .ok_or_else(|| PublishError::MissingVideoId(metadata_path.to_path_buf()))?;
        let video_id = youtube::validate_video_id(video_id)?.to_string();

        self.api
            .update_video(&update_body(&video_id, &meta))
            .with_context(|| format!("failed to update video {video_id}"))?;

        let warnings = self.enrich(&video_id, &meta);

        Ok(PublishOutcome {
            url: meta
                .url
                .clone()
                .unwrap_or_else(|| youtube::build_canonical_url(&video_id)),
            video_id,
            warnings,
        })
    }

    /// Uploads a thumbnail image in a single request.
    pub fn set_thumbnail(&self, video_id: &str, path: &Path) -> Result<()> {
        let image =
            fs::read(path).with_context(|| format!("failed to read thumbnail {}", path.display()))?;
        let mime_type = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or("image/png");

        tracing::info!(video_id, path = %path.display(), "uploading thumbnail");
        self.api.set_thumbnail(video_id, &image, mime_type)
    }

    /// Adds education tags and appends the education block to the current
    /// description. Does nothing without an education record.
    ///
    /// Appends on every call: running it twice leaves two blocks.
    pub fn apply_education_tagging(&self, video_id: &str, meta: &VideoMetadata) -> Result<()> {
        let Some(edu) = &meta.education else {
            return Ok(());
        };

        let current = self.api.video_snippet(video_id)?;

        let body = json!({
            "id": video_id,
            "snippet": {
                "categoryId": EDUCATION_CATEGORY_ID,
                "title": current.title,
                "description": current.description + &education_section(edu),
                "tags": education_tags(&meta.tags, edu),
            },
        });

        self.api.update_video(&body)
    }

    /// Best-effort steps after the primary action.
    fn enrich(&self, video_id: &str, meta: &VideoMetadata) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Some(thumbnail) = &meta.files.thumbnail
            && let Err(e) = self.set_thumbnail(video_id, thumbnail)
        {
            tracing::debug!(video_id, "thumbnail upload failed: {e:#}");
            warnings.push(format!("thumbnail upload failed: {e:#}"));
        }

        if meta.education.is_some()
            && let Err(e) = self.apply_education_tagging(video_id, meta)
        {
            tracing::debug!(video_id, "education tagging failed: {e:#}");
            warnings.push(format!("education tagging failed: {e:#}"));
        }

        warnings
    }

    /// Streams the file through a resumable session and returns the new video ID.
    fn upload_file(
        &self,
        body: &Value,
        path: &Path,
        on_progress: &mut dyn FnMut(u8),
    ) -> Result<String> {
        let mut file =
            File::open(path).with_context(|| format!("failed to open video {}", path.display()))?;
        let total = file
            .metadata()
            .with_context(|| format!("cannot stat {}", path.display()))?
            .len();
        if total == 0 {
            bail!("video file {} is empty", path.display());
        }

        let session_url = self.api.start_upload(body, total)?;

        let mut progress = UploadProgress::new();
        let mut chunk = Vec::with_capacity(CHUNK_SIZE);
        let mut offset = 0u64;
        let mut stalled = 0u32;

        loop {
            chunk.clear();
            file.seek(SeekFrom::Start(offset))?;
            (&mut file)
                .take(CHUNK_SIZE as u64)
                .read_to_end(&mut chunk)
                .with_context(|| format!("failed to read {}", path.display()))?;
            if chunk.is_empty() {
                bail!("upload expected more data than {} contains", path.display());
            }

            match self.api.upload_chunk(&session_url, &chunk, offset, total)? {
                ChunkStatus::Complete { video_id } => {
                    if video_id.trim().is_empty() {
                        bail!("upload finished without a video ID");
                    }
                    if let Some(p) = progress.advance(total, total) {
                        on_progress(p);
                    }
                    return Ok(video_id);
                }
                ChunkStatus::Incomplete { next_offset } => {
                    if next_offset > total {
                        bail!("server acknowledged {next_offset} bytes of a {total}-byte file");
                    }
                    if next_offset <= offset {
                        stalled += 1;
                        if stalled >= MAX_STALLED_CHUNKS {
                            bail!("upload is not making progress at byte {offset}");
                        }
                    } else {
                        stalled = 0;
                    }
                    if let Some(p) = progress.advance(next_offset, total) {
                        on_progress(p);
                    }
                    offset = next_offset;
                }
            }
        }
    }
}
