pub mod error;
#[cfg(test)]
pub mod memory;
pub mod migrations;
pub mod pool;
pub mod store;
pub mod types;

pub use error::DbError;
pub use pool::DbPool;
pub use store::{Store, StoreTransaction};
pub use types::{
    ColumnSpec, ColumnType, DbOperation, DbValue, OrderBy, Record, Select, TableSpec, WhereClause,
};
