//! Read-only consistency check between the content tree and the index.
//!
//! Produces three independent sections: rows whose content vanished from
//! disk, content on disk the index does not know about, and chapters whose
//! recorded page numbers have gaps. Nothing is written anywhere.


use serde::Serialize;

use crate::models::{IndexView, Title, TitleView};
use crate::naming::{humanize_slug, resolve_page_path};
use crate::scanner::Snapshot;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub missing_on_disk: MissingOnDisk,
    pub missing_in_db: MissingInDb,
    pub broken_chapters: Vec<BrokenChapter>,
}

impl HealthReport {
    /// True when disk and index agree completely.
    pub fn is_clean(&self) -> bool {
        self.missing_on_disk.titles.is_empty()
            && self.missing_on_disk.chapters.is_empty()
            && self.missing_on_disk.pages.is_empty()
            && self.missing_in_db.chapters.is_empty()
            && self.missing_in_db.images.is_empty()
            && self.broken_chapters.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MissingOnDisk {
    pub titles: Vec<MissingTitle>,
    pub chapters: Vec<MissingChapter>,
    pub pages: Vec<MissingPage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingTitle {
    pub title_id: i64,
    pub title: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingChapter {
    pub title_id: i64,
    pub title: String,
    pub chapter_id: i64,
    pub chapter_number: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingPage {
    pub chapter_id: i64,
    pub page_id: i64,
    pub page_number: i64,
    /// Where the file was expected, or the raw recorded path when it cannot
    /// be mapped under the content root.
    pub expected_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MissingInDb {
    pub chapters: Vec<UnindexedChapter>,
    pub images: Vec<UnindexedImage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnindexedReason {
    TitleNotFound,
    ChapterNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnindexedChapter {
    pub slug: String,
    pub title: String,
    pub chapter_number: i64,
    pub reason: UnindexedReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnindexedImage {
    pub chapter_id: i64,
    pub page_number: i64,
    pub file: String,
}

/// Longest `missing_sequence` listed for one chapter.
pub const MAX_LISTED_GAPS: usize = 1000;

/// A chapter whose recorded page numbers skip some values below the maximum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokenChapter {
    pub title_id: i64,
    pub title: String,
    pub chapter_id: i64,
    pub chapter_number: i64,
    /// The first [`MAX_LISTED_GAPS`] missing numbers, ascending.
    pub missing_sequence: Vec<i64>,
    /// Every missing number, including those not listed.
    pub missing_count: u64,
}

/// Compares `snapshot` with `index`.
pub fn check(snapshot: &Snapshot, index: &IndexView, page_url_prefix: &str) -> HealthReport {
    HealthReport {
        missing_on_disk: missing_on_disk(snapshot, index, page_url_prefix),
        missing_in_db: missing_in_db(snapshot, index),
        broken_chapters: broken_chapters(index),
    }
}

/// The disk slug a title belongs to: its stored slug when that directory
/// exists, otherwise a directory whose humanized name equals the title.
fn disk_slug_for<'s>(title: &Title, snapshot: &'s Snapshot) -> Option<&'s str> {
    let slugs = snapshot.slugs();
    if let Some(slug) = title.slug.as_deref().and_then(|s| slugs.get(s).copied()) {
        return Some(slug);
    }
    slugs.into_iter().find(|s| humanize_slug(s) == title.name)
}

fn title_for_slug<'i>(slug: &str, index: &'i IndexView) -> Option<&'i TitleView> {
    index
        .titles
        .iter()
        .find(|v| v.title.slug.as_deref() == Some(slug))
        .or_else(|| {
            let name = humanize_slug(slug);
            index.titles.iter().find(|v| v.title.name == name)
        })
}

fn missing_on_disk(snapshot: &Snapshot, index: &IndexView, prefix: &str) -> MissingOnDisk {
    let mut report = MissingOnDisk::default();

    for view in &index.titles {
        let title = &view.title;
        let Some(slug) = disk_slug_for(title, snapshot) else {
            report.titles.push(MissingTitle {
                title_id: title.id,
                title: title.name.clone(),
                slug: title.effective_slug(),
            });
            continue;
        };
        let disk_chapters = snapshot.chapters(slug);

        for (&number, chapter) in &view.chapters {
            if !disk_chapters.is_some_and(|c| c.contains_key(&number)) {
                report.chapters.push(MissingChapter {
                    title_id: title.id,
                    title: title.name.clone(),
                    chapter_id: chapter.chapter.id,
                    chapter_number: number,
                });
                continue;
            }
            for page in chapter.pages.values() {
                let resolved = resolve_page_path(snapshot.root(), prefix, &page.image_path);
                if resolved.as_deref().is_some_and(|p| p.is_file()) {
                    continue;
                }
                report.pages.push(MissingPage {
                    chapter_id: chapter.chapter.id,
                    page_id: page.id,
                    page_number: page.number,
                    expected_path: resolved
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| page.image_path.clone()),
                });
            }
        }
    }

    report
}

fn missing_in_db(snapshot: &Snapshot, index: &IndexView) -> MissingInDb {
    let mut report = MissingInDb::default();

    for (slug, chapters) in snapshot.iter() {
        let matched = title_for_slug(slug, index);
        let name = matched
            .map(|v| v.title.name.clone())
            .unwrap_or_else(|| humanize_slug(slug));

        for (&number, dir) in chapters {
            let reason = match matched.map(|v| v.chapters.get(&number)) {
                None => UnindexedReason::TitleNotFound,
                Some(None) => UnindexedReason::ChapterNotFound,
                Some(Some(chapter)) => {
                    let recorded = chapter.pages.len();
                    for (position, image) in dir.images.iter().enumerate().skip(recorded) {
                        report.images.push(UnindexedImage {
                            chapter_id: chapter.chapter.id,
                            page_number: position as i64 + 1,
                            file: image.display().to_string(),
                        });
                    }
                    continue;
                }
            };
            report.chapters.push(UnindexedChapter {
                slug: slug.to_string(),
                title: name.clone(),
                chapter_number: number,
                reason,
            });
        }
    }

    report
}

fn broken_chapters(index: &IndexView) -> Vec<BrokenChapter> {
    let mut broken = Vec::new();

    for view in &index.titles {
        for (&number, chapter) in &view.chapters {
            let (missing_sequence, missing_count) = page_gaps(chapter.pages.keys().copied());
            if missing_count > 0 {
                broken.push(BrokenChapter {
                    title_id: view.title.id,
                    title: view.title.name.clone(),
                    chapter_id: chapter.chapter.id,
                    chapter_number: number,
                    missing_sequence,
                    missing_count,
                });
            }
        }
    }

    broken
}

/// Numbers in `1..max` absent from the ascending `recorded` numbers, listing
/// at most [`MAX_LISTED_GAPS`] of them, and their total count.
fn page_gaps(recorded: impl Iterator<Item = i64>) -> (Vec<i64>, u64) {
    let mut listed = Vec::new();
    let mut count = 0u64;
    let mut previous = 0i64;

    for number in recorded.filter(|&n| n > 0) {
        let gap = number - previous - 1;
        if gap > 0 {
            count += gap as u64;
            let room = MAX_LISTED_GAPS - listed.len();
            listed.extend((previous + 1..number).take(room));
        }
        previous = number;
    }

    (listed, count)
}
