//! The persistent SQLite-backed state store: the `Repo` table, the typed
//! `State` key/value accessors, schema initialization, and indexes.

pub mod repo;
pub mod schema;
pub mod state;

pub use repo::Repo;
pub use schema::Store;
