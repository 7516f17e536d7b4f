use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use crate::models::{Config, SyncState};
use crate::paths::AppPaths;

use anyhow::{Context, Result, bail};
use fd_lock::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
#[cfg(unix)]
use tempfile::NamedTempFile;

/// Name of the record left in both endpoints after a sync.
pub const SYNC_STATE_FILE: &str = ".sync_info";

/// Runs `f` while holding an exclusive lock on the auth lock file, so that two
/// invocations never refresh or rewrite the token at the same time.
pub fn with_auth_lock<T, F>(paths: &AppPaths, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&paths.lock_file)
        .with_context(|| format!("failed to open lock file {}", paths.lock_file.display()))?;

    // Blocks until available
    let mut lock = RwLock::new(lock_file);
    let _guard = lock.write()?;

    f()
    // Lock released when _guard drops
}

/// Loads a JSON object from `path`, lets `f` edit it, and writes it back.
/// The file is exclusively locked for the whole read-modify-write, and the new
/// content only replaces the old once it is fully on disk.
/// Key order and untouched fields survive the round trip.
pub fn update_json_file<T, F>(path: &Path, f: F) -> Result<T>
where
    F: FnOnce(&mut Map<String, Value>) -> Result<T>,
{
    with_locked_file(path, |file| {
        let mut data = String::new();
        file.read_to_string(&mut data)
            .with_context(|| format!("failed to read {}", path.display()))?;

        let mut value: Value = serde_json::from_str(&data)
            .with_context(|| format!("{} is not valid JSON", path.display()))?;
        let Some(object) = value.as_object_mut() else {
            bail!("{} does not contain a JSON object", path.display());
        };

        let result = f(object)?;

        let bytes = to_json_pretty(&value)?;
        replace_contents(file, path, &bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;

        Ok(result)
    })
}

/// Runs `op` on `path` under an exclusive lock. If another process replaced
/// the file while we waited, the lock is retaken on the new one.
fn with_locked_file<R>(path: &Path, op: impl FnOnce(&mut File) -> Result<R>) -> Result<R> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut lock = RwLock::new(file);
    let mut guard = lock.write()?;

    if !still_linked(&guard, path)? {
        drop(guard);
        return with_locked_file(path, op);
    }

    op(&mut *guard)
}

/// Whether `path` still names the open `file`.
#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let open = file.metadata()?;
    let Ok(current) = fs::metadata(path) else {
        return Ok(false);
    };
    Ok(open.dev() == current.dev() && open.ino() == current.ino())
}

#[cfg(not(unix))]
fn still_linked(_file: &File, _path: &Path) -> Result<bool> {
    Ok(true)
}

/// Writes a synced sibling temp file and renames it over `path`.
#[cfg(unix)]
fn replace_contents(file: &mut File, path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    fs::set_permissions(tmp.path(), file.metadata()?.permissions())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

// Windows refuses to rename over a file that is held open.
#[cfg(not(unix))]
fn replace_contents(file: &mut File, _path: &Path, bytes: &[u8]) -> Result<()> {
    use std::io::{Seek, SeekFrom};

    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// Serializes with a four-space indent, matching hand-edited metadata files.
pub fn to_json_pretty<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(buf)
}

pub fn load_config(path: &Path) -> Config {
    if let Ok(data) = fs::read_to_string(path) {
        serde_json::from_str(&data).unwrap_or_default()
    } else {
        Config::default()
    }
}

pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    let data = serde_json::to_string_pretty(config)?;
    fs::write(path, data)?;
    Ok(())
}

/// Writes the sync record into `dir`, overwriting any previous one.
pub fn save_sync_state(dir: &Path, state: &SyncState) -> Result<()> {
    let path = dir.join(SYNC_STATE_FILE);
    let data = to_json_pretty(state)?;
    fs::write(&path, data).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn load_sync_state(dir: &Path) -> Option<SyncState> {
    let data = fs::read_to_string(dir.join(SYNC_STATE_FILE)).ok()?;
    serde_json::from_str(&data).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;
    use std::path::PathBuf;

    #[test]
    fn update_json_file_preserves_order_and_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("meta.json");
        fs::write(
            &path,
            r#"{"title": "Kinematics", "zeta": 1, "alpha": {"nested": true}}"#,
        )
        .unwrap();

        update_json_file(&path, |obj| {
            obj.insert("youtube_id".into(), Value::from("abc123DEF45"));
            Ok(())
        })
        .unwrap();

        let data = fs::read_to_string(&path).unwrap();
        let keys: Vec<String> = serde_json::from_str::<Map<String, Value>>(&data)
            .unwrap()
            .keys()
            .cloned()
            .collect();
        assert_eq!(keys, vec!["title", "zeta", "alpha", "youtube_id"]);
        assert!(data.contains("\n    \"title\""));
    }

    #[test]
    fn update_json_file_shrinking_content_leaves_no_tail() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("meta.json");
        fs::write(&path, r#"{"a": "a very long value that will be removed"}"#).unwrap();

        update_json_file(&path, |obj| {
            obj.insert("a".into(), Value::from(1));
            Ok(())
        })
        .unwrap();

        let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[cfg(unix)]
    #[test]
    fn update_json_file_replaces_the_file_whole() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("meta.json");
        fs::write(&path, r#"{"title": "Optics"}"#).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();
        let mut old_handle = File::open(&path).unwrap();

        update_json_file(&path, |obj| {
            obj.insert("url".into(), Value::from("https://youtu.be/abc123DEF45"));
            Ok(())
        })
        .unwrap();

        // The previous file was never rewritten in place
        let mut old = String::new();
        old_handle.read_to_string(&mut old).unwrap();
        assert_eq!(old, r#"{"title": "Optics"}"#);
        assert!(!still_linked(&old_handle, &path).unwrap());

        let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["url"], "https://youtu.be/abc123DEF45");
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);

        // No stray temp files next to the metadata
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn update_json_file_failure_leaves_file_intact() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("meta.json");
        let original = r#"{"title": "Optics"}"#;
        fs::write(&path, original).unwrap();

        let err = update_json_file(&path, |_| -> Result<()> { bail!("edit refused") }).unwrap_err();

        assert_eq!(err.to_string(), "edit refused");
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn update_json_file_rejects_non_object() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("meta.json");
        fs::write(&path, "[1, 2, 3]").unwrap();

        let err = update_json_file(&path, |_| Ok(())).unwrap_err();
        assert!(err.to_string().contains("does not contain a JSON object"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "[1, 2, 3]");
    }

    #[test]
    fn config_missing_or_malformed_is_default() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        assert_eq!(load_config(&path), Config::default());

        fs::write(&path, "not json").unwrap();
        assert_eq!(load_config(&path), Config::default());
    }

    #[test]
    fn config_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        let cfg = Config {
            oauth_port: 9090,
            sync_destination: Some(PathBuf::from("/home/me/videos")),
            ..Config::default()
        };
        save_config(&path, &cfg).unwrap();
        assert_eq!(load_config(&path), cfg);
    }

    #[test]
    fn sync_state_written_and_read() {
        let tmp = tempfile::tempdir().unwrap();
        let state = SyncState {
            last_sync: Utc::now(),
            source: PathBuf::from("/mnt/ssd"),
            destination: PathBuf::from("/home/me/videos"),
        };
        save_sync_state(tmp.path(), &state).unwrap();
        assert_eq!(load_sync_state(tmp.path()), Some(state));
    }
}
