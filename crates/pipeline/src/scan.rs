use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use thiserror::Error;
use walkdir::WalkDir;
use crate::filter::PathFilter;
use crate::media::MediaPath;
use log::{debug, info, warn};

/// A directory (or root) that could not be read. Traversal carries on.
#[derive(Debug, Clone, Error)]
#[error("cannot read {}: {message}", path.display())]
pub struct DiscoveryError {
    pub path: PathBuf,
    pub message: String,
}

/// Walks input roots and yields eligible media files
#[derive(Debug, Clone)]
pub struct Discoverer {
    filter: PathFilter,
}

impl Discoverer {
    pub fn new(filter: PathFilter) -> Self {
        Self { filter }
    }

    /// Lazily walk `roots` in order. Each root is traversed depth-first with
    /// entries sorted by file name, so the sequence is stable across runs.
    pub fn discover(&self, roots: &[PathBuf]) -> Discovery<'_> {
        Discovery {
            filter: &self.filter,
            roots: roots.iter().cloned().collect(),
            current: None,
            diagnostics: Vec::new(),
            files_checked: 0,
            eligible: 0,
        }
    }

    /// Count files per lowercased extension across all roots, ignoring the
    /// allow-list. Hidden and quarantined paths are still skipped.
    pub fn extension_census(&self, roots: &[PathBuf]) -> BTreeMap<String, usize> {
        let mut census = BTreeMap::new();
        for root in roots {
            for entry in WalkDir::new(root).follow_links(false).into_iter().flatten() {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(media) = MediaPath::new(root, entry.path()) else {
                    continue;
                };
                if !self.filter.is_visible(media.relative()) {
                    continue;
                }
                let ext = media.extension().unwrap_or_else(|| "(none)".to_string());
                *census.entry(ext).or_insert(0) += 1;
            }
        }
        census
    }
}

/// One-shot traversal; see [`Discoverer::discover`]
pub struct Discovery<'a> {
    filter: &'a PathFilter,
    roots: VecDeque<PathBuf>,
    current: Option<(PathBuf, walkdir::IntoIter)>,
    diagnostics: Vec<DiscoveryError>,
    files_checked: usize,
    eligible: usize,
}

impl Discovery<'_> {
    /// Unreadable directories met so far
    pub fn diagnostics(&self) -> &[DiscoveryError] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<DiscoveryError> {
        self.diagnostics
    }

    fn next_root(&mut self) -> bool {
        while let Some(root) = self.roots.pop_front() {
            if !root.is_dir() {
                warn!("Input root is not a readable directory: {}", root.display());
                self.diagnostics.push(DiscoveryError {
                    path: root,
                    message: "not a directory".to_string(),
                });
                continue;
            }
            info!("Scanning directory: {}", root.display());
            let walker = WalkDir::new(&root)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter();
            self.current = Some((root, walker));
            return true;
        }
        false
    }
}

impl Iterator for Discovery<'_> {
    type Item = MediaPath;

    fn next(&mut self) -> Option<MediaPath> {
        loop {
            if self.current.is_none() && !self.next_root() {
                return None;
            }
            let (root, walker) = self.current.as_mut()?;

            let entry = match walker.next() {
                Some(Ok(entry)) => entry,
                Some(Err(e)) => {
                    let path = e.path().map(|p| p.to_path_buf()).unwrap_or_else(|| root.clone());
                    warn!("Error reading directory entry under {}: {}", root.display(), e);
                    self.diagnostics.push(DiscoveryError {
                        path,
                        message: e.to_string(),
                    });
                    continue;
                }
                None => {
                    info!(
                        "Finished scanning {}: {} files checked, {} eligible so far",
                        root.display(),
                        self.files_checked,
                        self.eligible
                    );
                    self.current = None;
                    continue;
                }
            };

            // Only regular files; symlinks are not followed
            if !entry.file_type().is_file() {
                continue;
            }
            self.files_checked += 1;

            let media = match MediaPath::new(root.as_path(), entry.path()) {
                Ok(m) => m,
                Err(e) => {
                    warn!("Skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            };

            if self.filter.is_eligible(media.relative()) {
                self.eligible += 1;
                debug!("Found media file: {}", media);
                return Some(media);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, b"x").unwrap();
    }

    fn discoverer() -> Discoverer {
        Discoverer::new(PathFilter::new(["mp4", "mpg"], ["$RECYCLE"]))
    }

    #[test]
    fn test_only_visible_allowed_files() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a/video.mp4");
        touch(dir.path(), "a/.hidden/video.mp4");
        touch(dir.path(), "b/$RECYCLE/video.MPG");
        touch(dir.path(), "c/note.txt");

        let d = discoverer();
        let found: Vec<_> = d.discover(&[dir.path().to_path_buf()]).collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].relative(), Path::new("a/video.mp4"));
    }

    #[test]
    fn test_root_order_preserved_and_sorted_within_root() {
        let r1 = TempDir::new().unwrap();
        let r2 = TempDir::new().unwrap();
        touch(r1.path(), "z.mp4");
        touch(r1.path(), "a.mp4");
        touch(r2.path(), "m.mp4");

        let d = discoverer();
        let roots = vec![r2.path().to_path_buf(), r1.path().to_path_buf()];
        let found: Vec<_> = d.discover(&roots).map(|m| m.full_path()).collect();
        assert_eq!(
            found,
            vec![r2.path().join("m.mp4"), r1.path().join("a.mp4"), r1.path().join("z.mp4")]
        );
    }

    #[test]
    fn test_missing_root_is_a_diagnostic() {
        let r1 = TempDir::new().unwrap();
        touch(r1.path(), "a.mp4");
        let missing = r1.path().join("does-not-exist");

        let d = discoverer();
        let roots = vec![missing.clone(), r1.path().to_path_buf()];
        let mut discovery = d.discover(&roots);
        let found: Vec<_> = discovery.by_ref().collect();
        assert_eq!(found.len(), 1);
        assert_eq!(discovery.diagnostics().len(), 1);
        assert_eq!(discovery.diagnostics()[0].path, missing);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_directory_does_not_stop_siblings() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a/locked/inner.mp4");
        touch(dir.path(), "b/open.mp4");
        let locked = dir.path().join("a/locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // root ignores permission bits; nothing to observe in that case
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let d = discoverer();
        let roots = vec![dir.path().to_path_buf()];
        let mut discovery = d.discover(&roots);
        let found: Vec<_> = discovery.by_ref().map(|m| m.relative().to_path_buf()).collect();
        let diagnostics = discovery.into_diagnostics();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(found, vec![PathBuf::from("b/open.mp4")]);
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_extension_census() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a/one.mp4");
        touch(dir.path(), "a/two.MP4");
        touch(dir.path(), "b/three.MPG");
        touch(dir.path(), "c/notes.txt");
        touch(dir.path(), "c/README");

        let census = discoverer().extension_census(&[dir.path().to_path_buf()]);
        assert_eq!(census.get("mp4"), Some(&2));
        assert_eq!(census.get("mpg"), Some(&1));
        assert_eq!(census.get("txt"), Some(&1));
        assert_eq!(census.get("(none)"), Some(&1));
    }
}
