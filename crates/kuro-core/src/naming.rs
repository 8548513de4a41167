//! Naming conventions of the content tree.
//!
//! Slugs and titles are derived from each other, but the two transforms are
//! not inverses: `slugify_title(humanize_slug(s)) == s` only holds for slugs
//! made of lowercase alphanumeric words joined by single dashes.

use std::path::{Component, Path, PathBuf};

use rslug::slugify;

/// Slug used when slugification leaves nothing behind.
pub const FALLBACK_SLUG: &str = "manga";

/// Extracts a chapter number from a directory name.
///
/// Takes the longest run of ASCII digits (the first one on ties), so
/// `"chapter-0012"` is 12 and `"vol2-ch15"` is 15. Returns `None` when the
/// name has no digits or the run does not fit in an `i64`.
pub fn parse_chapter_number(name: &str) -> Option<i64> {
    let mut best: Option<&str> = None;
    let mut start: Option<usize> = None;

    for (i, ch) in name.char_indices().chain(std::iter::once((name.len(), ' '))) {
        match (ch.is_ascii_digit(), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                let run = &name[s..i];
                if best.is_none_or(|b| run.len() > b.len()) {
                    best = Some(run);
                }
                start = None;
            }
            _ => {}
        }
    }

    best.and_then(|digits| digits.parse().ok())
}

/// Turns a directory slug into a display title: `one-piece` → `One Piece`.
pub fn humanize_slug(slug: &str) -> String {
    slug.replace(['-', '_'], " ")
        .split_whitespace()
        .map(title_case_word)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Turns a title into a filesystem-safe slug: `Café au Lait!` → `cafe-au-lait`.
///
/// Punctuation is dropped rather than turned into a separator, so
/// `Kaguya's Love` becomes `kaguyas-love`.
pub fn slugify_title(title: &str) -> String {
    let words: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-' || *c == '_')
        .collect();
    let slug = slugify!(&words);
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

/// Whether `path` has one of the allowed extensions (case-insensitive).
pub fn has_image_extension(path: &Path, allowed: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| allowed.iter().any(|a| a.eq_ignore_ascii_case(ext)))
}

/// Builds the path recorded on a page row:
/// `{prefix}/{slug}/{chapter dir}/{file name}`.
pub fn page_path(prefix: &str, slug: &str, chapter_dir: &str, file_name: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        prefix.trim_end_matches('/'),
        slug,
        chapter_dir,
        file_name
    )
}

/// Maps a recorded page path back to a file under `root`.
///
/// Returns `None` for paths outside `prefix` or ones that would escape the
/// root (`..`, absolute segments).
pub fn resolve_page_path(root: &Path, prefix: &str, image_path: &str) -> Option<PathBuf> {
    let relative = image_path
        .strip_prefix(prefix.trim_end_matches('/'))?
        .strip_prefix('/')?;
    let relative = Path::new(relative);
    if relative.as_os_str().is_empty()
        || !relative.components().all(|c| matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(root.join(relative))
}
