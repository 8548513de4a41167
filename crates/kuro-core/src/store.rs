//! The relational index as seen by the engine.
//!
//! Every method is its own unit of work: implementations commit before
//! returning, and nothing spans several calls. A reconciliation that fails
//! half-way leaves the earlier calls applied.

use std::future::Future;

use crate::error::AppError;
use crate::models::{Chapter, DatabaseStats, IndexView, Page, Removed, Title};

pub trait IndexStore {
    fn list_titles(&self) -> impl Future<Output = Result<Vec<Title>, AppError>> + Send;

    fn find_title_by_slug(
        &self,
        slug: &str,
    ) -> impl Future<Output = Result<Option<Title>, AppError>> + Send;

    fn find_title_by_name(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<Title>, AppError>> + Send;

    fn create_title(
        &self,
        name: &str,
        slug: &str,
    ) -> impl Future<Output = Result<Title, AppError>> + Send;

    fn set_title_slug(
        &self,
        title_id: i64,
        slug: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Deletes a title with its chapters and pages.
    fn delete_title(&self, title_id: i64)
        -> impl Future<Output = Result<Removed, AppError>> + Send;

    /// Chapters of a title, ascending by number.
    fn list_chapters(
        &self,
        title_id: i64,
    ) -> impl Future<Output = Result<Vec<Chapter>, AppError>> + Send;

    fn find_chapter(
        &self,
        title_id: i64,
        number: i64,
    ) -> impl Future<Output = Result<Option<Chapter>, AppError>> + Send;

    fn create_chapter(
        &self,
        title_id: i64,
        number: i64,
        display_title: Option<&str>,
    ) -> impl Future<Output = Result<Chapter, AppError>> + Send;

    /// Deletes a chapter with its pages. Returns the number of pages removed.
    fn delete_chapter(&self, chapter_id: i64)
        -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Pages of a chapter, ascending by number.
    fn list_pages(
        &self,
        chapter_id: i64,
    ) -> impl Future<Output = Result<Vec<Page>, AppError>> + Send;

    fn find_page(
        &self,
        chapter_id: i64,
        number: i64,
    ) -> impl Future<Output = Result<Option<Page>, AppError>> + Send;

    fn create_page(
        &self,
        chapter_id: i64,
        number: i64,
        image_path: &str,
    ) -> impl Future<Output = Result<Page, AppError>> + Send;

    fn update_page_path(
        &self,
        page_id: i64,
        image_path: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Deletes pages numbered above `count`. Returns how many were removed.
    fn delete_pages_after(
        &self,
        chapter_id: i64,
        count: i64,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Reads the whole index in one pass.
    fn load_view(&self) -> impl Future<Output = Result<IndexView, AppError>> + Send;

    fn stats(&self) -> impl Future<Output = Result<DatabaseStats, AppError>> + Send;
}
