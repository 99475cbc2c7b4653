//! Storage seam used by the indexer.
//!
//! Every block is applied (or reverted) inside exactly one
//! [`StoreTransaction`]; nothing written through it is visible to other
//! readers until [`StoreTransaction::commit`] returns.

use async_trait::async_trait;

use super::error::DbError;
use super::types::{DbOperation, Record, Select};

#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, DbError>;
}

/// An open multi-statement transaction.
///
/// Methods take `&self` so independent revert procedures can share one
/// transaction concurrently.
#[async_trait]
pub trait StoreTransaction: Send + Sync {
    async fn select(&self, query: &Select) -> Result<Vec<Record>, DbError>;

    /// Returns the number of affected rows.
    async fn execute(&self, op: DbOperation) -> Result<u64, DbError>;

    async fn commit(self: Box<Self>) -> Result<(), DbError>;

    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}
