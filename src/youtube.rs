use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use regex::Regex;

/// YouTube IDs are exactly 11 characters,
/// containing A-Z, a-z, 0-9, - (hyphen), and _ (underscore).
static VIDEO_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]{11}$").expect("static regex"));

pub fn build_canonical_url(id: &str) -> String {
    format!("https://youtu.be/{id}")
}

pub fn is_valid_id_format(id: &str) -> bool {
    VIDEO_ID_RE.is_match(id)
}

/// Checks an ID taken from a metadata file before it is sent anywhere.
pub fn validate_video_id(id: &str) -> Result<&str> {
    let id = id.trim();
    if is_valid_id_format(id) {
        Ok(id)
    } else {
        Err(anyhow!("'{id}' is not a valid YouTube video ID"))
    }
}
