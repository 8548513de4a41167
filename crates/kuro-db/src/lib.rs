//! Kuro DB - SQLite storage for the kuro content index.

pub mod db;
pub mod repository;

pub use db::Database;
pub use repository::IndexRepository;
