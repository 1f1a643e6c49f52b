use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use crate::config::QueueConfig;
use crate::records::NewJob;
use log::{debug, info, warn};

/// What enumeration keeps and where it looks
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Descend into subdirectories
    pub recursive: bool,
    /// Lower-case extensions without the dot
    pub extensions: Vec<String>,
    /// Files whose directory (relative to the scan root) contains any of
    /// these are skipped
    pub exempt_substrings: Vec<String>,
}

impl ScanOptions {
    pub fn from_config(cfg: &QueueConfig, recursive: bool) -> Self {
        Self {
            recursive,
            extensions: cfg.media_extensions.iter().map(|e| e.to_lowercase()).collect(),
            exempt_substrings: cfg.exempt_substrings.clone(),
        }
    }

    fn is_media(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|s| s.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    fn is_exempt(&self, dir: &Path) -> bool {
        let dir = dir.to_string_lossy();
        self.exempt_substrings
            .iter()
            .any(|s| !s.is_empty() && dir.contains(s.as_str()))
    }
}

/// Enumerate media files under `root` as queue candidates.
///
/// Every job's working directory is `root` itself. Files come back sorted by
/// name within each directory, directories in walk order.
pub fn enumerate(root: &Path, opts: &ScanOptions) -> Vec<NewJob> {
    let mut jobs = Vec::new();
    let mut files_checked = 0usize;

    info!("Scanning directory: {}{}", root.display(), if opts.recursive { " (recursive)" } else { "" });

    let mut walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(1);
    if !opts.recursive {
        walker = walker.max_depth(1);
    }

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }
        files_checked += 1;

        let path = entry.path();
        if !opts.is_media(path) {
            continue;
        }

        // only the part below the root counts for exemptions
        let dir = path
            .parent()
            .and_then(|p| p.strip_prefix(root).ok())
            .unwrap_or(Path::new(""));
        if opts.is_exempt(dir) {
            debug!("Exempt: {}", path.display());
            continue;
        }

        debug!("Found media file: {}", path.display());
        jobs.push(NewJob::new(root.to_path_buf(), absolute(path)));
    }

    info!(
        "Scan complete: checked {} files, found {} candidates",
        files_checked,
        jobs.len()
    );
    jobs
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn options(recursive: bool) -> ScanOptions {
        ScanOptions {
            recursive,
            extensions: vec!["mp4".to_string(), "mkv".to_string()],
            exempt_substrings: vec!["0in".to_string(), "0out".to_string()],
        }
    }

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_flat_scan_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("b.mkv"));
        touch(&root.join("a.mp4"));
        touch(&root.join("notes.txt"));
        touch(&root.join("C.MKV"));
        touch(&root.join("season1/e01.mkv"));

        let jobs = enumerate(root, &options(false));
        let names: Vec<_> = jobs
            .iter()
            .map(|j| j.absolute_path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["C.MKV", "a.mp4", "b.mkv"]);
        assert!(jobs.iter().all(|j| j.working_dir == root));
        assert!(jobs.iter().all(|j| j.absolute_path.is_absolute()));
    }

    #[test]
    fn test_recursive_scan_skips_exempt_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("a.mkv"));
        touch(&root.join("show/s01/e01.mkv"));
        touch(&root.join("0in/pending.mkv"));
        touch(&root.join("show/0out/done.mkv"));

        let jobs = enumerate(root, &options(true));
        let paths: Vec<PathBuf> = jobs.iter().map(|j| j.absolute_path.clone()).collect();
        assert_eq!(
            paths,
            vec![root.join("a.mkv"), root.join("show/s01/e01.mkv")]
        );
        assert!(jobs.iter().all(|j| j.working_dir == root));
    }

    #[test]
    fn test_exempt_name_in_root_is_not_applied() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("incoming_0in");
        touch(&root.join("a.mkv"));
        touch(&root.join("batch/b.mkv"));
        touch(&root.join("batch/0out/c.mkv"));

        let jobs = enumerate(&root, &options(true));
        let paths: Vec<PathBuf> = jobs.iter().map(|j| j.absolute_path.clone()).collect();
        assert_eq!(paths, vec![root.join("a.mkv"), root.join("batch/b.mkv")]);
    }

    #[test]
    fn test_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(enumerate(dir.path(), &options(true)).is_empty());
    }

    #[test]
    fn test_from_config_lowercases_extensions() {
        let mut cfg = QueueConfig::default_config();
        cfg.media_extensions = vec!["MKV".to_string()];
        let opts = ScanOptions::from_config(&cfg, true);
        assert_eq!(opts.extensions, vec!["mkv"]);
        assert!(opts.recursive);
        assert!(opts.is_media(Path::new("/x/y.Mkv")));
        assert!(!opts.is_media(Path::new("/x/y")));
    }
}
