use std::collections::BTreeMap;

use serde::Serialize;
use sqlx::FromRow;

use crate::naming::slugify_title;

/// A row of the `titles` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Title {
    pub id: i64,
    /// Unique display name, e.g. `One Piece`.
    pub name: String,
    /// Directory slug. `None` for rows created before slugs were stored;
    /// those are backfilled by the reconciler.
    pub slug: Option<String>,
    pub description: Option<String>,
}

impl Title {
    /// The stored slug, or one derived from the name.
    pub fn effective_slug(&self) -> String {
        self.slug
            .clone()
            .unwrap_or_else(|| slugify_title(&self.name))
    }
}

/// A row of the `chapters` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Chapter {
    pub id: i64,
    pub title_id: i64,
    pub number: i64,
    pub display_title: Option<String>,
}

/// A row of the `pages` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Page {
    pub id: i64,
    pub chapter_id: i64,
    pub number: i64,
    pub image_path: String,
}

/// Rows removed by a cascading delete.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Removed {
    pub chapters: u64,
    pub pages: u64,
}

/// A chapter together with its pages keyed by page number.
#[derive(Debug, Clone)]
pub struct ChapterView {
    pub chapter: Chapter,
    pub pages: BTreeMap<i64, Page>,
}

/// A title together with its chapters keyed by chapter number.
#[derive(Debug, Clone)]
pub struct TitleView {
    pub title: Title,
    pub chapters: BTreeMap<i64, ChapterView>,
}

/// Read-only picture of the whole relational index.
#[derive(Debug, Clone, Default)]
pub struct IndexView {
    pub titles: Vec<TitleView>,
}

impl IndexView {
    /// Assembles the nested view from flat row lists. Orphan rows are dropped.
    pub fn from_rows(titles: Vec<Title>, chapters: Vec<Chapter>, pages: Vec<Page>) -> Self {
        let mut chapter_owner = BTreeMap::new();
        let mut by_title: BTreeMap<i64, BTreeMap<i64, ChapterView>> = BTreeMap::new();
        for chapter in chapters {
            chapter_owner.insert(chapter.id, (chapter.title_id, chapter.number));
            by_title.entry(chapter.title_id).or_default().insert(
                chapter.number,
                ChapterView {
                    chapter,
                    pages: BTreeMap::new(),
                },
            );
        }
        for page in pages {
            let Some(&(title_id, number)) = chapter_owner.get(&page.chapter_id) else {
                continue;
            };
            if let Some(view) = by_title
                .get_mut(&title_id)
                .and_then(|chapters| chapters.get_mut(&number))
            {
                view.pages.insert(page.number, page);
            }
        }
        let titles = titles
            .into_iter()
            .map(|title| TitleView {
                chapters: by_title.remove(&title.id).unwrap_or_default(),
                title,
            })
            .collect();
        Self { titles }
    }
}

/// Row counts of the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    pub titles: i64,
    pub chapters: i64,
    pub pages: i64,
}
