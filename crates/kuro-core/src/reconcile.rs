//! Reconciliation: converges the relational index onto a [`Snapshot`].
//!
//! The disk is authoritative. Titles, chapters and pages missing from the
//! snapshot are deleted, new ones are created and page paths are rewritten
//! only when they changed. Each store call commits on its own, so a failure
//! leaves every earlier step applied; the engine logs progress to the run
//! ledger after each slug so the applied part can be inspected.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::models::{IndexView, Title, TitleView};
use crate::naming::{humanize_slug, page_path};
use crate::scanner::{ChapterDir, Snapshot};
use crate::store::IndexStore;

/// What a reconciliation run covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Scope {
    /// The whole content root.
    #[default]
    All,
    /// A single slug directory.
    Slug(String),
}

impl Scope {
    /// The part of `snapshot` this scope synchronizes.
    fn select<'s>(&self, snapshot: &'s Snapshot) -> Cow<'s, Snapshot> {
        match self {
            Scope::All => Cow::Borrowed(snapshot),
            Scope::Slug(slug) => Cow::Owned(snapshot.restricted(slug)),
        }
    }

    /// Whether an index title falls inside this scope.
    fn covers(&self, title: &Title) -> bool {
        match self {
            Scope::All => true,
            Scope::Slug(slug) => {
                title.slug.as_deref() == Some(slug.as_str()) || title.name == humanize_slug(slug)
            }
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::All => write!(f, "all"),
            Scope::Slug(slug) => write!(f, "{}", slug),
        }
    }
}

/// Outcome of upserting a single page row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// Row exists with the same path, nothing written.
    Unchanged,
    /// Row exists, path rewritten.
    Updated,
    /// Row did not exist.
    Created,
}

/// Counters of one reconciliation (or dry-run plan).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileStats {
    /// Slug directories seen on disk.
    pub titles: usize,
    /// Valid chapter directories seen on disk.
    pub chapters: usize,
    /// Images seen on disk.
    pub pages: usize,
    pub titles_added: usize,
    pub chapters_added: usize,
    pub pages_added: usize,
    pub pages_updated: usize,
    pub pages_unchanged: usize,
    pub titles_removed: usize,
    pub chapters_removed: usize,
    pub pages_removed: usize,
}

impl ReconcileStats {
    /// Creates stats pre-filled with what the snapshot holds.
    pub fn for_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            titles: snapshot.title_count(),
            chapters: snapshot.chapter_count(),
            pages: snapshot.page_count(),
            ..Self::default()
        }
    }

    /// Records a page outcome, incrementing the appropriate counter.
    pub fn record(&mut self, outcome: PageOutcome) {
        match outcome {
            PageOutcome::Unchanged => self.pages_unchanged += 1,
            PageOutcome::Updated => self.pages_updated += 1,
            PageOutcome::Created => self.pages_added += 1,
        }
    }

    /// True when the run neither added nor removed anything.
    pub fn is_noop(&self) -> bool {
        self.titles_added == 0
            && self.chapters_added == 0
            && self.pages_added == 0
            && self.pages_updated == 0
            && self.titles_removed == 0
            && self.chapters_removed == 0
            && self.pages_removed == 0
    }
}

/// Result of [`Reconciler::run`] and [`plan`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub stats: ReconcileStats,
    /// Entries were skipped while scanning or reconciling.
    pub partial: bool,
    /// Slugs that were synchronized or removed, in processing order.
    pub processed: Vec<String>,
}

/// Applies a snapshot to an [`IndexStore`].
pub struct Reconciler<'a, S> {
    store: &'a S,
    page_url_prefix: &'a str,
}

impl<'a, S: IndexStore> Reconciler<'a, S> {
    pub fn new(store: &'a S, page_url_prefix: &'a str) -> Self {
        Self {
            store,
            page_url_prefix,
        }
    }

    /// Converges the index onto `snapshot`.
    ///
    /// `snapshot` is the whole content root even for a scoped run: titles
    /// whose directory exists anywhere on disk are never removed, and slug
    /// collisions are detected against every directory. `progress` is called
    /// after every slug (removed or synchronized) with the counters so far.
    pub async fn run<F>(
        &self,
        snapshot: &Snapshot,
        scope: &Scope,
        mut progress: F,
    ) -> Result<ReconcileReport, AppError>
    where
        F: FnMut(&str, &ReconcileStats) + Send,
    {
        let scoped = scope.select(snapshot);
        let mut report = ReconcileReport {
            stats: ReconcileStats::for_snapshot(&scoped),
            partial: scoped.had_skipped(),
            processed: Vec::new(),
        };

        let fs_slugs = snapshot.slugs();
        let fs_titles: BTreeSet<String> = fs_slugs.iter().map(|s| humanize_slug(s)).collect();

        for title in self.store.list_titles().await? {
            if !scope.covers(&title) || on_disk(&title, &fs_slugs, &fs_titles) {
                continue;
            }
            let removed = self.store.delete_title(title.id).await?;
            info!(
                "Removed title '{}' ({} chapters, {} pages)",
                title.name, removed.chapters, removed.pages
            );
            report.stats.titles_removed += 1;
            report.stats.chapters_removed += removed.chapters as usize;
            report.stats.pages_removed += removed.pages as usize;
            let slug = title.effective_slug();
            progress(&slug, &report.stats);
            report.processed.push(slug);
        }

        for (slug, chapters) in scoped.iter() {
            let Some(title) = self.ensure_title(slug, snapshot, &mut report.stats).await? else {
                report.partial = true;
                continue;
            };
            self.sync_chapters(&title, slug, chapters, &mut report.stats)
                .await?;
            progress(slug, &report.stats);
            report.processed.push(slug.to_string());
        }

        Ok(report)
    }

    /// Fetches or creates the title for `slug`. `None` when another slug on
    /// disk already owns the same title name.
    async fn ensure_title(
        &self,
        slug: &str,
        snapshot: &Snapshot,
        stats: &mut ReconcileStats,
    ) -> Result<Option<Title>, AppError> {
        if let Some(title) = self.store.find_title_by_slug(slug).await? {
            return Ok(Some(title));
        }

        let name = humanize_slug(slug);
        match self.store.find_title_by_name(&name).await? {
            Some(title) => match title.slug.as_deref() {
                Some(existing) if snapshot.contains(existing) => {
                    warn!(
                        "Title '{}' is already bound to slug '{}', skipping '{}'",
                        name, existing, slug
                    );
                    Ok(None)
                }
                previous => {
                    debug!(
                        "Binding title '{}' to slug '{}' (was {:?})",
                        name, slug, previous
                    );
                    self.store.set_title_slug(title.id, slug).await?;
                    Ok(Some(Title {
                        slug: Some(slug.to_string()),
                        ..title
                    }))
                }
            },
            None => {
                let title = self.store.create_title(&name, slug).await?;
                info!("Added title '{}' ({})", name, slug);
                stats.titles_added += 1;
                Ok(Some(title))
            }
        }
    }

    async fn sync_chapters(
        &self,
        title: &Title,
        slug: &str,
        chapters: &BTreeMap<i64, ChapterDir>,
        stats: &mut ReconcileStats,
    ) -> Result<(), AppError> {
        let existing: BTreeMap<i64, _> = self
            .store
            .list_chapters(title.id)
            .await?
            .into_iter()
            .map(|c| (c.number, c))
            .collect();

        for chapter in existing.values() {
            if chapters.contains_key(&chapter.number) {
                continue;
            }
            let pages = self.store.delete_chapter(chapter.id).await?;
            info!(
                "Removed chapter {} of '{}' ({} pages)",
                chapter.number, title.name, pages
            );
            stats.chapters_removed += 1;
            stats.pages_removed += pages as usize;
        }

        for (&number, dir) in chapters {
            let chapter = match existing.get(&number) {
                Some(chapter) => chapter.clone(),
                None => {
                    let display = format!("Chapter {}", number);
                    let chapter = self
                        .store
                        .create_chapter(title.id, number, Some(&display))
                        .await?;
                    debug!("Added chapter {} of '{}'", number, title.name);
                    stats.chapters_added += 1;
                    chapter
                }
            };
            self.sync_pages(chapter.id, slug, dir, stats).await?;
        }

        Ok(())
    }

    async fn sync_pages(
        &self,
        chapter_id: i64,
        slug: &str,
        dir: &ChapterDir,
        stats: &mut ReconcileStats,
    ) -> Result<(), AppError> {
        let count = dir.images.len() as i64;
        let stale = self.store.delete_pages_after(chapter_id, count).await?;
        if stale > 0 {
            debug!("Removed {} trailing pages from {}/{}", stale, slug, dir.dir_name);
            stats.pages_removed += stale as usize;
        }

        let pages: BTreeMap<i64, _> = self
            .store
            .list_pages(chapter_id)
            .await?
            .into_iter()
            .map(|p| (p.number, p))
            .collect();

        for (number, file_name) in (1..).zip(dir.file_names()) {
            let path = page_path(self.page_url_prefix, slug, &dir.dir_name, &file_name);
            let outcome = match pages.get(&number) {
                None => {
                    self.store.create_page(chapter_id, number, &path).await?;
                    PageOutcome::Created
                }
                Some(page) if page.image_path != path => {
                    self.store.update_page_path(page.id, &path).await?;
                    PageOutcome::Updated
                }
                Some(_) => PageOutcome::Unchanged,
            };
            stats.record(outcome);
        }

        Ok(())
    }
}

fn on_disk(title: &Title, fs_slugs: &BTreeSet<&str>, fs_titles: &BTreeSet<String>) -> bool {
    title.slug.as_deref().is_some_and(|s| fs_slugs.contains(s)) || fs_titles.contains(&title.name)
}

/// Computes what [`Reconciler::run`] would do, without writing anything.
pub fn plan(
    snapshot: &Snapshot,
    index: &IndexView,
    scope: &Scope,
    page_url_prefix: &str,
) -> ReconcileReport {
    let scoped = scope.select(snapshot);
    let mut report = ReconcileReport {
        stats: ReconcileStats::for_snapshot(&scoped),
        partial: scoped.had_skipped(),
        processed: Vec::new(),
    };
    let stats = &mut report.stats;

    let fs_slugs = snapshot.slugs();
    let fs_titles: BTreeSet<String> = fs_slugs.iter().map(|s| humanize_slug(s)).collect();

    for view in &index.titles {
        if !scope.covers(&view.title) || on_disk(&view.title, &fs_slugs, &fs_titles) {
            continue;
        }
        stats.titles_removed += 1;
        stats.chapters_removed += view.chapters.len();
        stats.pages_removed += view.chapters.values().map(|c| c.pages.len()).sum::<usize>();
        report.processed.push(view.title.effective_slug());
    }

    // Title names bound to a slug earlier in this pass.
    let mut claimed = BTreeSet::new();

    for (slug, chapters) in scoped.iter() {
        match match_title(index, slug, snapshot, &claimed) {
            TitleMatch::Conflict => {
                report.partial = true;
                continue;
            }
            TitleMatch::Missing => {
                claimed.insert(humanize_slug(slug));
                stats.titles_added += 1;
                stats.chapters_added += chapters.len();
                stats.pages_added += chapters.values().map(|c| c.images.len()).sum::<usize>();
            }
            TitleMatch::Found(view) => {
                claimed.insert(view.title.name.clone());
                for (number, gone) in &view.chapters {
                    if !chapters.contains_key(number) {
                        stats.chapters_removed += 1;
                        stats.pages_removed += gone.pages.len();
                    }
                }
                for (number, dir) in chapters {
                    let Some(existing) = view.chapters.get(number) else {
                        stats.chapters_added += 1;
                        stats.pages_added += dir.images.len();
                        continue;
                    };
                    let count = dir.images.len() as i64;
                    stats.pages_removed += existing.pages.range(count + 1..).count();
                    for (n, file_name) in (1..).zip(dir.file_names()) {
                        let path = page_path(page_url_prefix, slug, &dir.dir_name, &file_name);
                        let outcome = match existing.pages.get(&n) {
                            None => PageOutcome::Created,
                            Some(page) if page.image_path != path => PageOutcome::Updated,
                            Some(_) => PageOutcome::Unchanged,
                        };
                        stats.record(outcome);
                    }
                }
            }
        }
        report.processed.push(slug.to_string());
    }

    report
}

enum TitleMatch<'a> {
    Found(&'a TitleView),
    Missing,
    Conflict,
}

/// Mirrors [`Reconciler::ensure_title`] against a read-only view. A name in
/// `claimed` was created or rebound for another slug earlier in the pass.
fn match_title<'a>(
    index: &'a IndexView,
    slug: &str,
    snapshot: &Snapshot,
    claimed: &BTreeSet<String>,
) -> TitleMatch<'a> {
    if let Some(view) = index
        .titles
        .iter()
        .find(|v| v.title.slug.as_deref() == Some(slug))
    {
        return TitleMatch::Found(view);
    }
    let name = humanize_slug(slug);
    if claimed.contains(&name) {
        return TitleMatch::Conflict;
    }
    match index.titles.iter().find(|v| v.title.name == name) {
        Some(view) => match view.title.slug.as_deref() {
            Some(existing) if snapshot.contains(existing) => TitleMatch::Conflict,
            _ => TitleMatch::Found(view),
        },
        None => TitleMatch::Missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chapter, ChapterView, Page};
    use crate::scanner::Scanner;
    use std::fs;
    use std::path::Path;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"img").unwrap();
    }

    fn snapshot(root: &Path) -> Snapshot {
        Scanner::new(vec!["jpg".to_string()]).scan(root).unwrap()
    }

    fn title(id: i64, name: &str, slug: Option<&str>) -> Title {
        Title {
            id,
            name: name.to_string(),
            slug: slug.map(str::to_string),
            description: None,
        }
    }

    #[test]
    fn test_scope_display() {
        assert_eq!(Scope::All.to_string(), "all");
        assert_eq!(Scope::Slug("one-piece".into()).to_string(), "one-piece");
    }

    #[test]
    fn test_scope_covers() {
        let scope = Scope::Slug("one-piece".into());
        assert!(scope.covers(&title(1, "One Piece", None)));
        assert!(scope.covers(&title(1, "Renamed", Some("one-piece"))));
        assert!(!scope.covers(&title(2, "Berserk", Some("berserk"))));
        assert!(Scope::All.covers(&title(2, "Berserk", None)));
    }

    #[test]
    fn test_stats_record() {
        let mut stats = ReconcileStats::default();
        stats.record(PageOutcome::Created);
        stats.record(PageOutcome::Created);
        stats.record(PageOutcome::Updated);
        stats.record(PageOutcome::Unchanged);
        assert_eq!(stats.pages_added, 2);
        assert_eq!(stats.pages_updated, 1);
        assert_eq!(stats.pages_unchanged, 1);
        assert!(!stats.is_noop());
        assert!(ReconcileStats::default().is_noop());
    }

    #[test]
    fn test_plan_against_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("one-piece/1/001.jpg"));
        touch(&dir.path().join("one-piece/1/002.jpg"));
        touch(&dir.path().join("one-piece/2/001.jpg"));
        touch(&dir.path().join("berserk/1/001.jpg"));

        let report = plan(&snapshot(dir.path()), &IndexView::default(), &Scope::All, "/m");
        assert_eq!(report.stats.titles, 2);
        assert_eq!(report.stats.titles_added, 2);
        assert_eq!(report.stats.chapters_added, 3);
        assert_eq!(report.stats.pages_added, 4);
        assert!(!report.partial);
        assert_eq!(report.processed, vec!["berserk", "one-piece"]);
    }

    #[test]
    fn test_plan_against_existing_index() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["001.jpg", "002.jpg"] {
            touch(&dir.path().join("one-piece/1").join(name));
        }
        touch(&dir.path().join("one-piece/extras/x.jpg"));

        let pages = (1..=4)
            .map(|n| Page {
                id: n,
                chapter_id: 10,
                number: n,
                image_path: format!("/m/one-piece/1/00{}.jpg", n),
            })
            .map(|p| (p.number, p))
            .collect();
        let mut chapters = BTreeMap::new();
        chapters.insert(
            1,
            ChapterView {
                chapter: Chapter { id: 10, title_id: 1, number: 1, display_title: None },
                pages,
            },
        );
        chapters.insert(
            7,
            ChapterView {
                chapter: Chapter { id: 11, title_id: 1, number: 7, display_title: None },
                pages: BTreeMap::new(),
            },
        );
        let index = IndexView {
            titles: vec![
                TitleView { title: title(1, "One Piece", None), chapters },
                TitleView { title: title(2, "Gone", Some("gone")), chapters: BTreeMap::new() },
            ],
        };

        let report = plan(&snapshot(dir.path()), &index, &Scope::All, "/m");
        assert!(report.partial);
        assert_eq!(report.stats.titles_removed, 1);
        assert_eq!(report.stats.chapters_removed, 1);
        assert_eq!(report.stats.pages_removed, 2);
        assert_eq!(report.stats.pages_unchanged, 2);
        assert_eq!(report.stats.titles_added, 0);
        assert_eq!(report.processed, vec!["gone", "one-piece"]);
    }

    #[test]
    fn test_plan_conflicting_slugs() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("one-piece/1/001.jpg"));
        touch(&dir.path().join("one_piece/1/001.jpg"));
        let index = IndexView {
            titles: vec![TitleView {
                title: title(1, "One Piece", Some("one-piece")),
                chapters: BTreeMap::new(),
            }],
        };
        let report = plan(&snapshot(dir.path()), &index, &Scope::All, "/m");
        assert!(report.partial);
        assert_eq!(report.processed, vec!["one-piece"]);
    }

    #[test]
    fn test_plan_colliding_slugs_on_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("one-piece/1/001.jpg"));
        touch(&dir.path().join("one_piece/1/001.jpg"));
        touch(&dir.path().join("one_piece/1/002.jpg"));

        let report = plan(&snapshot(dir.path()), &IndexView::default(), &Scope::All, "/m");
        assert!(report.partial);
        assert_eq!(report.stats.titles_added, 1);
        assert_eq!(report.stats.chapters_added, 1);
        assert_eq!(report.stats.pages_added, 1);
        assert_eq!(report.processed, vec!["one-piece"]);
    }

    #[test]
    fn test_plan_colliding_slug_with_unbound_title() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("one-piece/1/001.jpg"));
        touch(&dir.path().join("one_piece/1/001.jpg"));
        let index = IndexView {
            titles: vec![TitleView {
                title: title(1, "One Piece", None),
                chapters: BTreeMap::new(),
            }],
        };

        // The first slug takes the unbound title, the second collides with it.
        let report = plan(&snapshot(dir.path()), &index, &Scope::All, "/m");
        assert!(report.partial);
        assert_eq!(report.stats.titles_added, 0);
        assert_eq!(report.stats.chapters_added, 1);
        assert_eq!(report.processed, vec!["one-piece"]);
    }

    #[test]
    fn test_plan_scoped_keeps_titles_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("one-piece/1/001.jpg"));
        touch(&dir.path().join("berserk/1/001.jpg"));
        let index = IndexView {
            titles: vec![TitleView {
                title: title(1, "One Piece", Some("one-piece")),
                chapters: BTreeMap::new(),
            }],
        };

        // "One-Piece" humanizes to the stored name but is not a directory.
        let scope = Scope::Slug("One-Piece".into());
        let report = plan(&snapshot(dir.path()), &index, &scope, "/m");
        assert_eq!(report.stats.titles_removed, 0);
        assert_eq!(report.stats.titles, 0);
        assert!(report.processed.is_empty());

        let scope = Scope::Slug("berserk".into());
        let report = plan(&snapshot(dir.path()), &index, &scope, "/m");
        assert_eq!(report.stats.titles, 1);
        assert_eq!(report.stats.titles_added, 1);
        assert_eq!(report.stats.titles_removed, 0);
        assert_eq!(report.processed, vec!["berserk"]);
    }

    #[test]
    fn test_plan_scoped_collision_sees_whole_tree() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("one-piece/1/001.jpg"));
        touch(&dir.path().join("one_piece/1/001.jpg"));
        let index = IndexView {
            titles: vec![TitleView {
                title: title(1, "One Piece", Some("one-piece")),
                chapters: BTreeMap::new(),
            }],
        };

        let report = plan(
            &snapshot(dir.path()),
            &index,
            &Scope::Slug("one_piece".into()),
            "/m",
        );
        assert!(report.partial);
        assert!(report.stats.is_noop());
        assert!(report.processed.is_empty());
    }
}
