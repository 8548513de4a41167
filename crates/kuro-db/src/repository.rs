//! `IndexStore` backed by SQLite.
//!
//! Each method is one statement or one short transaction. Cascading deletes
//! rely on the `ON DELETE CASCADE` foreign keys, so the counts they report
//! are read inside the same transaction as the delete.

use kuro_core::error::AppError;
use kuro_core::models::{Chapter, DatabaseStats, IndexView, Page, Removed, Title};
use kuro_core::store::IndexStore;
use sqlx::SqlitePool;
use tracing::debug;

/// Column lists for SELECT queries. Must remain const literals since
/// format!() bypasses sqlx compile-time validation.
const TITLE_COLUMNS: &str = "id, name, slug, description";
const CHAPTER_COLUMNS: &str = "id, title_id, number, display_title";
const PAGE_COLUMNS: &str = "id, chapter_id, number, image_path";

/// Repository for the title/chapter/page index.
///
/// # Examples
///
/// ```no_run
/// use kuro_db::{Database, IndexRepository};
///
/// # async fn example() -> Result<(), kuro_core::AppError> {
/// let db = Database::connect_in_memory().await?;
/// let repo = IndexRepository::new(db.pool().clone());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct IndexRepository {
    pool: SqlitePool,
}

impl IndexRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl IndexStore for IndexRepository {
    async fn list_titles(&self) -> Result<Vec<Title>, AppError> {
        let query = format!("SELECT {} FROM titles ORDER BY id", TITLE_COLUMNS);
        sqlx::query_as::<_, Title>(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::DatabaseError)
    }

    async fn find_title_by_slug(&self, slug: &str) -> Result<Option<Title>, AppError> {
        let query = format!("SELECT {} FROM titles WHERE slug = ?", TITLE_COLUMNS);
        sqlx::query_as::<_, Title>(&query)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::DatabaseError)
    }

    async fn find_title_by_name(&self, name: &str) -> Result<Option<Title>, AppError> {
        let query = format!("SELECT {} FROM titles WHERE name = ?", TITLE_COLUMNS);
        sqlx::query_as::<_, Title>(&query)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::DatabaseError)
    }

    async fn create_title(&self, name: &str, slug: &str) -> Result<Title, AppError> {
        let query = format!(
            "INSERT INTO titles (name, slug) VALUES (?, ?) RETURNING {}",
            TITLE_COLUMNS
        );
        sqlx::query_as::<_, Title>(&query)
            .bind(name)
            .bind(slug)
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::DatabaseError)
    }

    async fn set_title_slug(&self, title_id: i64, slug: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE titles SET slug = ? WHERE id = ?")
            .bind(slug)
            .bind(title_id)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(())
    }

    async fn delete_title(&self, title_id: i64) -> Result<Removed, AppError> {
        let mut tx = self.pool.begin().await.map_err(AppError::DatabaseError)?;

        let (chapters, pages): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM chapters WHERE title_id = ?1),
                (SELECT COUNT(*) FROM pages p
                    JOIN chapters c ON c.id = p.chapter_id
                    WHERE c.title_id = ?1)
            "#,
        )
        .bind(title_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;

        sqlx::query("DELETE FROM titles WHERE id = ?")
            .bind(title_id)
            .execute(&mut *tx)
            .await
            .map_err(AppError::DatabaseError)?;

        tx.commit().await.map_err(AppError::DatabaseError)?;
        debug!("Deleted title {} ({} chapters, {} pages)", title_id, chapters, pages);

        Ok(Removed {
            chapters: chapters as u64,
            pages: pages as u64,
        })
    }

    async fn list_chapters(&self, title_id: i64) -> Result<Vec<Chapter>, AppError> {
        let query = format!(
            "SELECT {} FROM chapters WHERE title_id = ? ORDER BY number",
            CHAPTER_COLUMNS
        );
        sqlx::query_as::<_, Chapter>(&query)
            .bind(title_id)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::DatabaseError)
    }

    async fn find_chapter(&self, title_id: i64, number: i64) -> Result<Option<Chapter>, AppError> {
        let query = format!(
            "SELECT {} FROM chapters WHERE title_id = ? AND number = ?",
            CHAPTER_COLUMNS
        );
        sqlx::query_as::<_, Chapter>(&query)
            .bind(title_id)
            .bind(number)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::DatabaseError)
    }

    async fn create_chapter(
        &self,
        title_id: i64,
        number: i64,
        display_title: Option<&str>,
    ) -> Result<Chapter, AppError> {
        let query = format!(
            "INSERT INTO chapters (title_id, number, display_title) VALUES (?, ?, ?) RETURNING {}",
            CHAPTER_COLUMNS
        );
        sqlx::query_as::<_, Chapter>(&query)
            .bind(title_id)
            .bind(number)
            .bind(display_title)
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::DatabaseError)
    }

    async fn delete_chapter(&self, chapter_id: i64) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await.map_err(AppError::DatabaseError)?;

        let (pages,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pages WHERE chapter_id = ?")
            .bind(chapter_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(AppError::DatabaseError)?;

        sqlx::query("DELETE FROM chapters WHERE id = ?")
            .bind(chapter_id)
            .execute(&mut *tx)
            .await
            .map_err(AppError::DatabaseError)?;

        tx.commit().await.map_err(AppError::DatabaseError)?;
        Ok(pages as u64)
    }

    async fn list_pages(&self, chapter_id: i64) -> Result<Vec<Page>, AppError> {
        let query = format!(
            "SELECT {} FROM pages WHERE chapter_id = ? ORDER BY number",
            PAGE_COLUMNS
        );
        sqlx::query_as::<_, Page>(&query)
            .bind(chapter_id)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::DatabaseError)
    }

    async fn find_page(&self, chapter_id: i64, number: i64) -> Result<Option<Page>, AppError> {
        let query = format!(
            "SELECT {} FROM pages WHERE chapter_id = ? AND number = ?",
            PAGE_COLUMNS
        );
        sqlx::query_as::<_, Page>(&query)
            .bind(chapter_id)
            .bind(number)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::DatabaseError)
    }

    async fn create_page(
        &self,
        chapter_id: i64,
        number: i64,
        image_path: &str,
    ) -> Result<Page, AppError> {
        let query = format!(
            "INSERT INTO pages (chapter_id, number, image_path) VALUES (?, ?, ?) RETURNING {}",
            PAGE_COLUMNS
        );
        sqlx::query_as::<_, Page>(&query)
            .bind(chapter_id)
            .bind(number)
            .bind(image_path)
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::DatabaseError)
    }

    async fn update_page_path(&self, page_id: i64, image_path: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE pages SET image_path = ? WHERE id = ?")
            .bind(image_path)
            .bind(page_id)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(())
    }

    async fn delete_pages_after(&self, chapter_id: i64, count: i64) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM pages WHERE chapter_id = ? AND number > ?")
            .bind(chapter_id)
            .bind(count)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(result.rows_affected())
    }

    async fn load_view(&self) -> Result<IndexView, AppError> {
        // One read transaction so the three lists agree with each other.
        let mut tx = self.pool.begin().await.map_err(AppError::DatabaseError)?;

        let titles = sqlx::query_as::<_, Title>(&format!(
            "SELECT {} FROM titles ORDER BY id",
            TITLE_COLUMNS
        ))
        .fetch_all(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;

        let chapters = sqlx::query_as::<_, Chapter>(&format!(
            "SELECT {} FROM chapters ORDER BY title_id, number",
            CHAPTER_COLUMNS
        ))
        .fetch_all(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;

        let pages = sqlx::query_as::<_, Page>(&format!(
            "SELECT {} FROM pages ORDER BY chapter_id, number",
            PAGE_COLUMNS
        ))
        .fetch_all(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;

        tx.commit().await.map_err(AppError::DatabaseError)?;
        Ok(IndexView::from_rows(titles, chapters, pages))
    }

    async fn stats(&self) -> Result<DatabaseStats, AppError> {
        let row: StatsRow = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM titles) as titles,
                (SELECT COUNT(*) FROM chapters) as chapters,
                (SELECT COUNT(*) FROM pages) as pages
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(DatabaseStats {
            titles: row.titles,
            chapters: row.chapters,
            pages: row.pages,
        })
    }
}

/// Helper struct for deserializing stats query results
#[derive(sqlx::FromRow)]
struct StatsRow {
    titles: i64,
    chapters: i64,
    pages: i64,
}
