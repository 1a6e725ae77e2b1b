//! SQLite-backed state store: concurrent readers, one writer task, every
//! mutation committed before the caller observes success.

mod store;
mod writer;

pub use store::{StateStore, StoreConfig};
