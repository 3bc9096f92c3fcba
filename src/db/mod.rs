pub mod query;
pub mod schema;
pub mod store;

pub use query::{CellValue, ColumnInfo, QueryResult};
pub use schema::SchemaDescriptor;
pub use store::Store;
