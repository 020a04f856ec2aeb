//! Dictionary-driven CRUD over a local SQLite database file.
//!
//! # Intention
//!
//! - Insert, read, update and delete rows described as column/value maps
//!   instead of hand-written SQL.
//! - Open a fresh connection for every operation and close it on every exit path.
//!
//! # Architectural Boundaries
//!
//! - Only SQLite/database code belongs here.
//! - Schema setup is the caller's job (see [`CrudStore::execute_statement`]).
//! - No pooling, retries or multi-statement transactions.

pub mod config;
pub mod error;
pub mod query;
pub mod sqlite;
pub mod value;

pub use config::StoreConfig;
pub use error::{Error, ErrorKind, Result};
pub use query::{Params, SqlQuery};
pub use sqlite::{ConnectionDescriptor, CrudStore, SqliteStore, NO_ROW_ID};
pub use value::{Conditions, Fields, Row, Value};
