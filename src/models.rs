use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// YouTube category ID for "Education".
pub const EDUCATION_CATEGORY_ID: &str = "27";

/// Environment variable that overrides the client secrets location.
pub const CLIENT_SECRETS_ENV: &str = "VBYT_CLIENT_SECRETS";

#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    #[default]
    Private,
    Public,
    Unlisted,
}

impl Privacy {
    pub fn as_str(self) -> &'static str {
        match self {
            Privacy::Private => "private",
            Privacy::Public => "public",
            Privacy::Unlisted => "unlisted",
        }
    }
}

/// License values accepted by the videos resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum License {
    #[default]
    Youtube,
    CreativeCommons,
}

impl License {
    /// Maps the human-readable label used in metadata files.
    /// Anything unrecognized falls back to the standard YouTube license.
    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(str::trim) {
            Some("Creative Commons") => License::CreativeCommons,
            _ => License::Youtube,
        }
    }

    pub fn as_api_str(self) -> &'static str {
        match self {
            License::Youtube => "youtube",
            License::CreativeCommons => "creativeCommons",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub date: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaFiles {
    pub video: PathBuf,
    pub description: PathBuf,
    pub thumbnail: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Education {
    #[serde(default)]
    pub academic_system: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub exam: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub problems: Option<Vec<String>>,
}

/// A video described by a metadata file, with its description text loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub language: String,
    pub license: License,
    pub embeddable: bool,
    pub recording: Recording,
    pub files: MediaFiles,
    pub education: Option<Education>,
    pub youtube_id: Option<String>,
    pub url: Option<String>,
}

/// Record written into both endpoints after a successful sync.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SyncState {
    pub last_sync: DateTime<Utc>,
    pub source: PathBuf,
    pub destination: PathBuf,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Copy from the source (SSD) into the local destination
    ToLocal,
    /// Copy from the local destination back onto the source (SSD)
    ToSsd,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::ToLocal => "to-local",
            Direction::ToSsd => "to-ssd",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    pub subscribers: u64,
    pub total_views: u64,
    pub video_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoStats {
    pub id: String,
    pub title: String,
    pub views: u64,
    pub likes: u64,
    pub comments: u64,
    pub published_at: DateTime<Utc>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    Views,
    Likes,
    Comments,
    #[default]
    Date,
}

impl SortBy {
    pub fn as_str(self) -> &'static str {
        match self {
            SortBy::Views => "views",
            SortBy::Likes => "likes",
            SortBy::Comments => "comments",
            SortBy::Date => "date",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub oauth_port: u16,
    pub client_secrets: Option<PathBuf>,
    pub sync_source: Option<PathBuf>,
    pub sync_destination: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            oauth_port: 8080,
            client_secrets: None,
            sync_source: None,
            sync_destination: None,
        }
    }
}

impl Config {
    /// Client secrets path: environment variable, then config, then the default location.
    pub fn effective_client_secrets(&self, default: &Path) -> PathBuf {
        std::env::var_os(CLIENT_SECRETS_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| self.client_secrets.clone())
            .unwrap_or_else(|| default.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn license_known_labels() {
        assert_eq!(
            License::from_label(Some("Creative Commons")).as_api_str(),
            "creativeCommons"
        );
        assert_eq!(
            License::from_label(Some("Standard YouTube License")).as_api_str(),
            "youtube"
        );
    }

    #[test]
    fn license_unrecognized_falls_back_to_standard() {
        assert_eq!(License::from_label(Some("CC-BY-SA 4.0")), License::Youtube);
        assert_eq!(License::from_label(Some("")), License::Youtube);
        assert_eq!(License::from_label(None), License::Youtube);
    }

    #[test]
    fn config_defaults_when_fields_missing() {
        let cfg: Config = serde_json::from_str(r#"{"sync_source": "/mnt/ssd"}"#).unwrap();
        assert_eq!(cfg.oauth_port, 8080);
        assert_eq!(cfg.sync_source, Some(PathBuf::from("/mnt/ssd")));
        assert!(cfg.sync_destination.is_none());
    }

    #[test]
    fn direction_value_names() {
        let names: Vec<String> = Direction::value_variants()
            .iter()
            .filter_map(|d| d.to_possible_value().map(|v| v.get_name().to_string()))
            .collect();
        assert_eq!(names, vec!["to-local", "to-ssd"]);

        for d in Direction::value_variants() {
            assert_eq!(d.to_possible_value().unwrap().get_name(), d.as_str());
        }
    }
}
