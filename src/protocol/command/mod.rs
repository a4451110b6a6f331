pub mod prepared;
pub mod query;
pub mod resultset;
pub mod utility;

pub use resultset::{ResultEvent, ResultSetOptions, ResultSetReader};
