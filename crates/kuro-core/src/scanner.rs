//! Filesystem scanner: turns the content tree into a [`Snapshot`].
//!
//! Expected layout:
//!
//! ```text
//! {root}/{slug}/{chapter dir}/{image}
//! ```
//!
//! Chapter directories need a number somewhere in their name and at least one
//! image. Anything else is recorded as a [`SkippedEntry`] and makes the run
//! partial. Images are ordered by file name, byte-wise; producers that want
//! numeric order must zero-pad (`001.jpg`, `002.jpg`, ...).

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::AppError;
use crate::naming::{has_image_extension, parse_chapter_number};

/// One chapter directory as found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterDir {
    /// Directory name, kept verbatim for building page paths.
    pub dir_name: String,
    /// Image files in page order.
    pub images: Vec<PathBuf>,
}

impl ChapterDir {
    /// File names of the images in page order.
    pub fn file_names(&self) -> impl Iterator<Item = Cow<'_, str>> {
        self.images
            .iter()
            .map(|p| p.file_name().unwrap_or_default().to_string_lossy())
    }
}

/// Why an entry did not make it into the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No digits in the chapter directory name.
    NoChapterNumber,
    /// The chapter directory holds no recognised image.
    NoImages,
    /// Another directory of the same title already claimed this number.
    DuplicateNumber(i64),
    /// The name is not valid UTF-8.
    InvalidName,
    /// The directory could not be listed.
    Unreadable(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoChapterNumber => write!(f, "no chapter number in name"),
            SkipReason::NoImages => write!(f, "no images"),
            SkipReason::DuplicateNumber(n) => write!(f, "duplicate chapter number {}", n),
            SkipReason::InvalidName => write!(f, "name is not valid UTF-8"),
            SkipReason::Unreadable(e) => write!(f, "unreadable: {}", e),
        }
    }
}

/// A directory the scanner ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub path: PathBuf,
    pub reason: SkipReason,
}

/// In-memory view of the content tree, valid for one scan.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    root: PathBuf,
    titles: BTreeMap<String, BTreeMap<i64, ChapterDir>>,
    skipped: Vec<SkippedEntry>,
}

impl Snapshot {
    /// A snapshot of a tree with nothing in it.
    pub fn empty(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every slug directory seen, including ones without valid chapters.
    pub fn slugs(&self) -> BTreeSet<&str> {
        self.titles.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.titles.contains_key(slug)
    }

    /// Chapters of a slug, ascending by number.
    pub fn chapters(&self, slug: &str) -> Option<&BTreeMap<i64, ChapterDir>> {
        self.titles.get(slug)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeMap<i64, ChapterDir>)> {
        self.titles.iter().map(|(slug, chapters)| (slug.as_str(), chapters))
    }

    pub fn skipped(&self) -> &[SkippedEntry] {
        &self.skipped
    }

    /// True when any entry was skipped; such runs end as partial.
    pub fn had_skipped(&self) -> bool {
        !self.skipped.is_empty()
    }

    pub fn title_count(&self) -> usize {
        self.titles.len()
    }

    pub fn chapter_count(&self) -> usize {
        self.titles.values().map(BTreeMap::len).sum()
    }

    pub fn page_count(&self) -> usize {
        self.titles
            .values()
            .flat_map(BTreeMap::values)
            .map(|c| c.images.len())
            .sum()
    }

    /// Copy holding only one slug. Skips outside that slug are dropped.
    pub fn restricted(&self, slug: &str) -> Snapshot {
        let prefix = self.root.join(slug);
        Snapshot {
            root: self.root.clone(),
            titles: self
                .titles
                .iter()
                .filter(|(s, _)| s.as_str() == slug)
                .map(|(s, chapters)| (s.clone(), chapters.clone()))
                .collect(),
            skipped: self
                .skipped
                .iter()
                .filter(|e| e.path.starts_with(&prefix))
                .cloned()
                .collect(),
        }
    }

    fn skip(&mut self, path: PathBuf, reason: SkipReason) {
        warn!("Skipping {}: {}", path.display(), reason);
        self.skipped.push(SkippedEntry { path, reason });
    }
}

/// Walks a content root and builds a [`Snapshot`].
#[derive(Debug, Clone)]
pub struct Scanner {
    image_extensions: Vec<String>,
}

impl Scanner {
    pub fn new(image_extensions: Vec<String>) -> Self {
        Self { image_extensions }
    }

    /// Scans `root`. Fails only when the root itself cannot be listed.
    pub fn scan(&self, root: &Path) -> Result<Snapshot, AppError> {
        if !root.is_dir() {
            return Err(AppError::RootUnavailable(root.to_path_buf()));
        }
        let mut snapshot = Snapshot::empty(root);

        for entry in children(root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    warn!("Cannot list content root {}: {}", root.display(), e);
                    return Err(AppError::RootUnavailable(root.to_path_buf()));
                }
                Err(e) => {
                    let path = e.path().unwrap_or(root).to_path_buf();
                    snapshot.skip(path, SkipReason::Unreadable(e.to_string()));
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let Some(slug) = entry.file_name().to_str().map(str::to_string) else {
                snapshot.skip(entry.into_path(), SkipReason::InvalidName);
                continue;
            };
            let chapters = self.scan_title(entry.path(), &mut snapshot);
            debug!("Scanned '{}': {} chapters", slug, chapters.len());
            snapshot.titles.insert(slug, chapters);
        }

        Ok(snapshot)
    }

    /// Like [`scan`](Self::scan), but a missing root yields an empty snapshot.
    pub fn scan_or_empty(&self, root: &Path) -> Snapshot {
        match self.scan(root) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("{}; treating the content tree as empty", e);
                Snapshot::empty(root)
            }
        }
    }

    fn scan_title(&self, dir: &Path, snapshot: &mut Snapshot) -> BTreeMap<i64, ChapterDir> {
        let mut chapters = BTreeMap::new();

        for entry in children(dir) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().unwrap_or(dir).to_path_buf();
                    snapshot.skip(path, SkipReason::Unreadable(e.to_string()));
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let Some(dir_name) = entry.file_name().to_str().map(str::to_string) else {
                snapshot.skip(entry.into_path(), SkipReason::InvalidName);
                continue;
            };
            let Some(number) = parse_chapter_number(&dir_name) else {
                snapshot.skip(entry.into_path(), SkipReason::NoChapterNumber);
                continue;
            };
            if chapters.contains_key(&number) {
                snapshot.skip(entry.into_path(), SkipReason::DuplicateNumber(number));
                continue;
            }
            let images = match self.list_images(entry.path()) {
                Ok(images) => images,
                Err(e) => {
                    snapshot.skip(entry.into_path(), SkipReason::Unreadable(e.to_string()));
                    continue;
                }
            };
            if images.is_empty() {
                snapshot.skip(entry.into_path(), SkipReason::NoImages);
                continue;
            }
            chapters.insert(number, ChapterDir { dir_name, images });
        }

        chapters
    }

    fn list_images(&self, dir: &Path) -> Result<Vec<PathBuf>, walkdir::Error> {
        let mut images = Vec::new();
        for entry in children(dir) {
            let entry = entry?;
            if entry.file_type().is_file()
                && has_image_extension(entry.path(), &self.image_extensions)
            {
                images.push(entry.into_path());
            }
        }
        Ok(images)
    }
}

/// Immediate children of `dir`, sorted by file name, symlinks followed.
fn children(dir: &Path) -> impl Iterator<Item = walkdir::Result<DirEntry>> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
}
