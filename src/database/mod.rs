pub mod hydrate;
pub mod manager;
pub mod metadata;
pub mod models;
pub mod paginated;
pub mod query_builder;
pub mod writer;

pub use manager::{DatabaseError, DatabaseManager};
pub use metadata::{Entity, EntityMetadata, EntitySchema};
pub use paginated::{PageMeta, WithMeta};
