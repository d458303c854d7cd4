//! Durable record of runs this client started but has not yet seen finish.
//!
//! The store is a typed repository; JSON on disk is an adapter detail of
//! [`JsonFilePointerStore`].

mod error;
mod paths;
mod schema;
mod store;

pub use error::PointerStoreError;
pub use paths::{default_pointer_path, POINTER_FILE};
pub use schema::{DurablePointer, PointerFile, POINTER_FILE_VERSION};
pub use store::{JsonFilePointerStore, MemoryPointerStore, PointerStore};
