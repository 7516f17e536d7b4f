//! Timestamp-driven one-way mirroring between an SSD folder and a local folder.
//!
//! Whichever side holds the most recently modified non-video file wins, and
//! rsync copies it over the other side. Video files never take part: they are
//! ignored when comparing and excluded from the copy.

use std::ffi::OsString;
use std::fs;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;

use crate::models::{Direction, SyncState};
use crate::store;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use walkdir::WalkDir;

/// Case-sensitive suffixes of files that are never compared or copied.
pub const VIDEO_EXTENSIONS: [&str; 8] = [
    ".mp4", ".mov", ".avi", ".mkv", ".wmv", ".flv", ".webm", ".m4v",
];

/// macOS metadata files
const HIDDEN_PATTERNS: [&str; 2] = [".DS_Store", "._*"];

pub fn is_video_file(name: &str) -> bool {
    VIDEO_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// rsync `--exclude` patterns.
pub fn exclude_patterns() -> Vec<String> {
    VIDEO_EXTENSIONS
        .iter()
        .map(|ext| format!("*{ext}"))
        .chain(HIDDEN_PATTERNS.iter().map(|p| p.to_string()))
        .collect()
}

/// Newest modification time of any non-video file below `dir`.
/// An empty or missing directory yields the Unix epoch.
pub fn latest_modification_time(dir: &Path) -> Result<SystemTime> {
    let mut latest = SystemTime::UNIX_EPOCH;

    for entry in WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
    {
        if is_video_file(&entry.file_name().to_string_lossy()) {
            continue;
        }

        let modified = entry
            .metadata()
            .with_context(|| format!("cannot stat {}", entry.path().display()))?
            .modified()
            .with_context(|| format!("no modification time for {}", entry.path().display()))?;
        latest = latest.max(modified);
    }

    Ok(latest)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub direction: Direction,
    /// Newest times of (source, destination); absent when the direction was forced.
    pub times: Option<(SystemTime, SystemTime)>,
}

/// Picks the transfer direction. The source only wins when it is strictly
/// newer; ties go to the destination.
pub fn decide(source: &Path, destination: &Path, forced: Option<Direction>) -> Result<Decision> {
    if let Some(direction) = forced {
        return Ok(Decision {
            direction,
            times: None,
        });
    }

    let source_time = latest_modification_time(source)?;
    let destination_time = latest_modification_time(destination)?;

    let direction = if source_time > destination_time {
        Direction::ToLocal
    } else {
        Direction::ToSsd
    };

    Ok(Decision {
        direction,
        times: Some((source_time, destination_time)),
    })
}

/// An external tool that makes `to` mirror `from`.
pub trait Mirror {
    fn mirror(&self, from: &Path, to: &Path, excludes: &[String]) -> Result<()>;
}

pub struct Rsync;

impl Rsync {
    pub fn args(from: &Path, to: &Path, excludes: &[String]) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-av".into(), "--progress".into()];
        args.extend(excludes.iter().map(|p| OsString::from(format!("--exclude={p}"))));

        // Trailing slash: copy the contents, not the directory itself
        let mut src = from.as_os_str().to_owned();
        if !src.to_string_lossy().ends_with(MAIN_SEPARATOR) {
            src.push(MAIN_SEPARATOR.to_string());
        }
        args.push(src);
        args.push(to.as_os_str().to_owned());
        args
    }
}

impl Mirror for Rsync {
    fn mirror(&self, from: &Path, to: &Path, excludes: &[String]) -> Result<()> {
        let status = Command::new("rsync")
            .args(Self::args(from, to, excludes))
            .status()
            .context("failed to spawn rsync (is it installed and on $PATH?)")?;

        if !status.success() {
            bail!("Sync failed: rsync exited with {status}");
        }
        Ok(())
    }
}

/// Everything decided before any byte is copied.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPlan {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub decision: Decision,
}

impl SyncPlan {
    /// (from, to) for the chosen direction.
    pub fn endpoints(&self) -> (&Path, &Path) {
        match self.decision.direction {
            Direction::ToLocal => (&self.source, &self.destination),
            Direction::ToSsd => (&self.destination, &self.source),
        }
    }
}

/// Resolves both endpoints, creates the destination if needed, and decides the direction.
pub fn plan(source: &Path, destination: &Path, forced: Option<Direction>) -> Result<SyncPlan> {
    let source = std::path::absolute(source)
        .with_context(|| format!("invalid source path {}", source.display()))?;
    let destination = std::path::absolute(destination)
        .with_context(|| format!("invalid destination path {}", destination.display()))?;

    if !source.is_dir() {
        bail!("source directory {} does not exist", source.display());
    }
    fs::create_dir_all(&destination)
        .with_context(|| format!("failed to create {}", destination.display()))?;

    let decision = decide(&source, &destination, forced)?;

    Ok(SyncPlan {
        source,
        destination,
        decision,
    })
}

/// Runs the mirror and, only if it succeeds, records the sync in both endpoints.
pub fn execute(plan: &SyncPlan, mirror: &dyn Mirror) -> Result<SyncState> {
    let (from, to) = plan.endpoints();
    mirror.mirror(from, to, &exclude_patterns())?;

    let state = SyncState {
        last_sync: Utc::now(),
        source: plan.source.clone(),
        destination: plan.destination.clone(),
    };
    for dir in [&plan.source, &plan.destination] {
        store::save_sync_state(dir, &state)?;
    }

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::fs::File;
    use std::time::Duration;

    fn touch(path: &Path, secs_after_epoch: u64) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs_after_epoch))
            .unwrap();
    }

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    struct RecordingMirror {
        fail: bool,
        calls: RefCell<Vec<(PathBuf, PathBuf, Vec<String>)>>,
    }

    impl RecordingMirror {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl Mirror for RecordingMirror {
        fn mirror(&self, from: &Path, to: &Path, excludes: &[String]) -> Result<()> {
            self.calls
                .borrow_mut()
                .push((from.to_path_buf(), to.to_path_buf(), excludes.to_vec()));
            if self.fail {
                bail!("Sync failed: rsync exited with exit status: 23");
            }
            Ok(())
        }
    }

    #[test]
    fn video_suffixes_are_case_sensitive() {
        assert!(is_video_file("lecture.mp4"));
        assert!(is_video_file("clip.final.webm"));
        assert!(!is_video_file("lecture.MP4"));
        assert!(!is_video_file("notes.md"));
    }

    #[test]
    fn latest_time_ignores_videos_and_recurses() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("a.txt"), 1_000);
        touch(&tmp.path().join("deep/nested/b.json"), 2_000);
        touch(&tmp.path().join("deep/raw.mov"), 9_000);

        assert_eq!(latest_modification_time(tmp.path()).unwrap(), at(2_000));
    }

    #[test]
    fn latest_time_of_empty_or_missing_dir_is_epoch() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(
            latest_modification_time(tmp.path()).unwrap(),
            SystemTime::UNIX_EPOCH
        );
        assert_eq!(
            latest_modification_time(&tmp.path().join("missing")).unwrap(),
            SystemTime::UNIX_EPOCH
        );
    }

    #[test]
    fn strictly_newer_source_syncs_to_local() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        touch(&src.path().join("script.md"), 5_000);
        touch(&dst.path().join("script.md"), 4_999);

        let decision = decide(src.path(), dst.path(), None).unwrap();
        assert_eq!(decision.direction, Direction::ToLocal);
        assert_eq!(decision.times, Some((at(5_000), at(4_999))));
    }

    #[test]
    fn equal_times_sync_to_ssd() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        touch(&src.path().join("script.md"), 5_000);
        touch(&dst.path().join("other.md"), 5_000);

        let decision = decide(src.path(), dst.path(), None).unwrap();
        assert_eq!(decision.direction, Direction::ToSsd);
    }

    #[test]
    fn newer_destination_syncs_to_ssd() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        touch(&src.path().join("script.md"), 1_000);
        touch(&src.path().join("render.mp4"), 99_000);
        touch(&dst.path().join("script.md"), 2_000);

        let decision = decide(src.path(), dst.path(), None).unwrap();
        assert_eq!(decision.direction, Direction::ToSsd);
    }

    #[test]
    fn forced_direction_skips_comparison() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        touch(&dst.path().join("script.md"), 2_000);

        let decision = decide(src.path(), dst.path(), Some(Direction::ToLocal)).unwrap();
        assert_eq!(decision.direction, Direction::ToLocal);
        assert_eq!(decision.times, None);
    }

    #[test]
    fn rsync_arguments() {
        let excludes = exclude_patterns();
        let args = Rsync::args(Path::new("/mnt/ssd/course"), Path::new("/home/me/course"), &excludes);
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();

        assert_eq!(args[0], "-av");
        assert_eq!(args[1], "--progress");
        assert!(args.contains(&"--exclude=*.mp4".to_string()));
        assert!(args.contains(&"--exclude=*.m4v".to_string()));
        assert!(args.contains(&"--exclude=.DS_Store".to_string()));
        assert!(args.contains(&"--exclude=._*".to_string()));
        assert_eq!(args[args.len() - 2], format!("/mnt/ssd/course{MAIN_SEPARATOR}"));
        assert_eq!(args[args.len() - 1], "/home/me/course");
        assert_eq!(excludes.len(), 10);
    }

    #[test]
    fn plan_creates_destination_and_requires_source() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("ssd");
        let dst = tmp.path().join("local/course");

        assert!(plan(&src, &dst, None).is_err());

        fs::create_dir_all(&src).unwrap();
        touch(&src.join("notes.txt"), 10);
        let plan = plan(&src, &dst, None).unwrap();
        assert!(dst.is_dir());
        assert_eq!(plan.decision.direction, Direction::ToLocal);
        assert_eq!(plan.endpoints(), (src.as_path(), dst.as_path()));
    }

    #[test]
    fn successful_mirror_writes_record_to_both_sides() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        touch(&dst.path().join("script.md"), 2_000);
        let plan = plan(src.path(), dst.path(), None).unwrap();
        let mirror = RecordingMirror::new(false);

        let state = execute(&plan, &mirror).unwrap();

        let calls = mirror.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, dst.path());
        assert_eq!(calls[0].1, src.path());
        assert_eq!(store::load_sync_state(src.path()), Some(state.clone()));
        assert_eq!(store::load_sync_state(dst.path()), Some(state));
    }

    #[test]
    fn failed_mirror_writes_no_record() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let plan = plan(src.path(), dst.path(), Some(Direction::ToLocal)).unwrap();
        let mirror = RecordingMirror::new(true);

        let err = execute(&plan, &mirror).unwrap_err();

        assert!(err.to_string().contains("Sync failed"));
        assert!(!src.path().join(store::SYNC_STATE_FILE).exists());
        assert!(!dst.path().join(store::SYNC_STATE_FILE).exists());
    }
}
