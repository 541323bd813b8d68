pub mod types;
pub mod query_params;
pub mod filter_where;
pub mod filter_order;
pub mod error;

pub use types::*;
pub use error::FilterError;
pub use query_params::QueryParams;
