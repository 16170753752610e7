//! Walks the configured directories and produces `VideoInfo` skeletons for
//! every file that passes the extension, pattern and size filters. Stream
//! fields are left for the prober.

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use neardup_common::bin_common::termination::Cookie;
use walkdir::WalkDir;

use crate::settings::SearchSettings;
use crate::video_info::VideoInfo;

/// Scans every configured root in order. Unreadable entries are logged and
/// skipped, they never abort the walk. `on_found` sees the running total
/// after each accepted file.
pub fn scan_directories(
    settings: &SearchSettings,
    cookie: &Cookie,
    mut on_found: impl FnMut(usize),
) -> Vec<VideoInfo> {
    let mut found = Vec::new();

    for dir in &settings.directories {
        if cookie.is_terminating() {
            break;
        }

        if !dir.path.is_dir() {
            log::error!("Not a directory, skipping: {}", dir.path.display());
            continue;
        }

        let walker = WalkDir::new(&dir.path)
            .follow_links(false)
            .sort_by_file_name()
            .max_depth(if dir.recursive { usize::MAX } else { 1 });

        for entry in walker {
            if cookie.is_terminating() {
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable entry: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    log::warn!(
                        "Failed to stat {}: {e}",
                        entry.path().display()
                    );
                    continue;
                }
            };

            if !accept(entry.path(), &meta, settings) {
                continue;
            }

            match make_skeleton(entry.path(), &meta) {
                Ok(video) => {
                    found.push(video);
                    on_found(found.len());
                }
                Err(e) => {
                    log::warn!("Skipping {}: {e}", entry.path().display());
                }
            }
        }
    }

    found
}

/// The four-part acceptance check: extension, directory patterns, filename
/// patterns, size bounds.
fn accept(path: &Path, meta: &Metadata, settings: &SearchSettings) -> bool {
    let extension = match path.extension() {
        Some(ext) => format!(".{}", ext.to_string_lossy()),
        None => return false,
    };
    if !settings.extensions.iter().any(|e| *e == extension) {
        return false;
    }

    let dir = path
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let compiled = &settings.compiled;
    if !compiled.include_dir.iter().all(|rx| rx.is_match(&dir)) {
        return false;
    }
    if compiled.exclude_dir.iter().any(|rx| rx.is_match(&dir)) {
        return false;
    }
    if !compiled.include_file.iter().all(|rx| rx.is_match(&name)) {
        return false;
    }
    if compiled.exclude_file.iter().any(|rx| rx.is_match(&name)) {
        return false;
    }

    let size = meta.len();
    if settings.min_bytes.is_some_and(|min| size < min) {
        return false;
    }
    if settings.max_bytes.is_some_and(|max| size > max) {
        return false;
    }

    true
}

fn make_skeleton(path: &Path, meta: &Metadata) -> std::io::Result<VideoInfo> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let absolute = normalize(&absolute);

    let (device, inode, nlinks) = file_identity(meta);

    Ok(VideoInfo {
        path: absolute,
        size: meta.len(),
        created_at: meta
            .created()
            .ok()
            .map(epoch_string)
            .unwrap_or_default(),
        modified_at: meta
            .modified()
            .ok()
            .map(epoch_string)
            .unwrap_or_default(),
        device,
        inode,
        nlinks,
        ..VideoInfo::default()
    })
}

fn epoch_string(time: SystemTime) -> String {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(dur) => dur.as_secs().to_string(),
        Err(_) => String::new(),
    }
}

/// Lexical normalization: resolves `.` and `..` components without touching
/// the filesystem.
fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(unix)]
fn file_identity(meta: &Metadata) -> (i64, i64, u64) {
    use std::os::unix::fs::MetadataExt;
    (meta.dev() as i64, meta.ino() as i64, meta.nlink())
}

#[cfg(not(unix))]
fn file_identity(_meta: &Metadata) -> (i64, i64, u64) {
    (-1, -1, 1)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::settings::DirectoryEntry;

    fn touch(path: &Path, bytes: usize) {
        std::fs::write(path, vec![0u8; bytes]).unwrap();
    }

    fn settings_for(dir: &Path, recursive: bool) -> SearchSettings {
        let mut settings = SearchSettings::default();
        settings.directories = vec![DirectoryEntry {
            path: dir.to_path_buf(),
            recursive,
        }];
        settings.compile_patterns().unwrap();
        settings
    }

    fn names(found: &[VideoInfo]) -> Vec<String> {
        let mut names: Vec<String> = found
            .iter()
            .map(|v| {
                v.path
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        names.sort();
        names
    }

    #[test]
    fn filters_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.mp4"), 10);
        touch(&dir.path().join("b.mkv"), 10);
        touch(&dir.path().join("c.txt"), 10);
        touch(&dir.path().join("noext"), 10);

        let settings = settings_for(dir.path(), true);
        let found = scan_directories(&settings, &Cookie::detached(), |_| {});
        assert_eq!(vec!["a.mp4", "b.mkv"], names(&found));
    }

    #[test]
    fn respects_recursion_flag() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        touch(&dir.path().join("top.mp4"), 10);
        touch(&dir.path().join("sub").join("deep.mp4"), 10);

        let recursive = settings_for(dir.path(), true);
        let found = scan_directories(&recursive, &Cookie::detached(), |_| {});
        assert_eq!(vec!["deep.mp4", "top.mp4"], names(&found));

        let flat = settings_for(dir.path(), false);
        let found = scan_directories(&flat, &Cookie::detached(), |_| {});
        assert_eq!(vec!["top.mp4"], names(&found));
    }

    #[test]
    fn size_bounds() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("small.mp4"), 5);
        touch(&dir.path().join("medium.mp4"), 50);
        touch(&dir.path().join("large.mp4"), 500);

        let mut settings = settings_for(dir.path(), true);
        settings.min_bytes = Some(10);
        settings.max_bytes = Some(100);

        let found = scan_directories(&settings, &Cookie::detached(), |_| {});
        assert_eq!(vec!["medium.mp4"], names(&found));
    }

    #[test]
    fn include_and_exclude_file_patterns() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("cam1_raw.mp4"), 10);
        touch(&dir.path().join("cam1_edit.mp4"), 10);
        touch(&dir.path().join("other.mp4"), 10);

        let mut settings = settings_for(dir.path(), true);
        settings.use_glob = true;
        settings.include_file_patterns = vec!["cam?_*".into()];
        settings.exclude_file_patterns = vec!["*_edit*".into()];
        settings.compile_patterns().unwrap();

        let found = scan_directories(&settings, &Cookie::detached(), |_| {});
        assert_eq!(vec!["cam1_raw.mp4"], names(&found));
    }

    #[test]
    fn exclude_dir_patterns() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("keep")).unwrap();
        std::fs::create_dir(dir.path().join("trash")).unwrap();
        touch(&dir.path().join("keep").join("a.mp4"), 10);
        touch(&dir.path().join("trash").join("b.mp4"), 10);

        let mut settings = settings_for(dir.path(), true);
        settings.exclude_dir_patterns = vec!["trash".into()];
        settings.compile_patterns().unwrap();

        let found = scan_directories(&settings, &Cookie::detached(), |_| {});
        assert_eq!(vec!["a.mp4"], names(&found));
    }

    #[test]
    fn reports_running_total() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.mp4"), 10);
        touch(&dir.path().join("b.mp4"), 10);

        let settings = settings_for(dir.path(), true);
        let mut ticks = Vec::new();
        scan_directories(&settings, &Cookie::detached(), |n| ticks.push(n));
        assert_eq!(vec![1, 2], ticks);
    }

    #[test]
    fn fills_identity_and_times() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.mp4"), 123);

        let settings = settings_for(dir.path(), true);
        let found = scan_directories(&settings, &Cookie::detached(), |_| {});

        let v = &found[0];
        assert!(v.path.is_absolute());
        assert_eq!(123, v.size);
        assert!(!v.modified_at.is_empty());
        #[cfg(unix)]
        {
            assert!(v.inode > 0);
            assert!(v.nlinks >= 1);
        }
        assert_eq!(0, v.id);
        assert_eq!(0, v.duration);
    }

    #[test]
    fn cancelled_scan_stops() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.mp4"), 10);

        let settings = settings_for(dir.path(), true);
        let cookie = Cookie::detached();
        cookie.cancel();
        let found = scan_directories(&settings, &cookie, |_| {});
        assert!(found.is_empty());
    }
}
