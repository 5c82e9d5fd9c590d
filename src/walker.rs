use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use walkdir::{DirEntry, FilterEntry, WalkDir};

/// A regular file found by [`TreeWalker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// Path to the file as reachable from the process
    pub absolute_path: PathBuf,

    /// Path relative to the walk root; the bare file name when the root is a file
    pub relative_path: PathBuf,
}

/// Enumerates the processable files below a file or directory.
///
/// Entries whose name starts with `.` are skipped, and hidden directories are
/// not descended into. Symbolic links are followed; a link cycle is reported
/// as an error and skipped.
#[derive(Debug, Clone)]
pub struct TreeWalker {
    root: PathBuf,
    excluded: Option<PathBuf>,
}

impl TreeWalker {
    /// Creates a walker rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            excluded: None,
        }
    }

    /// Skips the directory `dir` and everything below it.
    ///
    /// Used to keep an output folder nested inside the walk root from being
    /// read back as input. A directory that does not exist excludes nothing.
    #[must_use]
    pub fn excluding(mut self, dir: impl AsRef<Path>) -> Self {
        self.excluded = dir.as_ref().canonicalize().ok();
        self
    }

    /// Returns the walk root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Starts a lazy walk. Directories are read only as the iterator advances,
    /// so dropping it early leaves the rest of the tree untouched.
    ///
    /// Siblings are yielded in file-name order, depth first. A failure to read
    /// one entry is logged and counted, and the walk continues with the rest.
    #[must_use]
    pub fn iter(&self) -> Walk {
        debug!("Walking {}", self.root.display());
        let inner = WalkDir::new(&self.root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(visibility(self.excluded.clone()));

        Walk {
            inner,
            root: self.root.clone(),
            errors: 0,
        }
    }
}

impl IntoIterator for &TreeWalker {
    type Item = WalkEntry;
    type IntoIter = Walk;

    fn into_iter(self) -> Walk {
        self.iter()
    }
}

type EntryFilter = Box<dyn FnMut(&DirEntry) -> bool + Send + Sync>;

fn visibility(excluded: Option<PathBuf>) -> EntryFilter {
    Box::new(move |entry: &DirEntry| {
        if entry.depth() == 0 {
            return true;
        }
        if entry.file_name().to_string_lossy().starts_with('.') {
            return false;
        }
        match &excluded {
            Some(dir) if entry.file_type().is_dir() => {
                let skip = entry.path().canonicalize().is_ok_and(|p| &p == dir);
                if skip {
                    debug!("Skipping excluded directory {}", entry.path().display());
                }
                !skip
            }
            _ => true,
        }
    })
}

/// Iterator returned by [`TreeWalker::iter`].
pub struct Walk {
    inner: FilterEntry<walkdir::IntoIter, EntryFilter>,
    root: PathBuf,
    errors: usize,
}

impl Walk {
    /// Number of entries that could not be read so far.
    #[must_use]
    pub const fn errors(&self) -> usize {
        self.errors
    }

    fn relative_path(&self, entry: &DirEntry) -> PathBuf {
        if entry.depth() == 0 {
            return entry
                .path()
                .file_name()
                .map_or_else(|| entry.path().to_path_buf(), PathBuf::from);
        }

        pathdiff::diff_paths(entry.path(), &self.root)
            .unwrap_or_else(|| entry.path().to_path_buf())
    }
}

impl Iterator for Walk {
    type Item = WalkEntry;

    fn next(&mut self) -> Option<WalkEntry> {
        loop {
            match self.inner.next()? {
                Ok(entry) if entry.file_type().is_file() => {
                    let relative_path = self.relative_path(&entry);
                    trace!("Found file: {}", relative_path.display());
                    return Some(WalkEntry {
                        absolute_path: entry.into_path(),
                        relative_path,
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    self.errors += 1;
                    let path = e.path().map(Path::display);
                    match path {
                        Some(path) => warn!("Skipping unreadable entry {}: {}", path, e),
                        None => warn!("Walk error: {}", e),
                    }
                }
            }
        }
    }
}
