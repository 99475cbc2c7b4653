//! Generic reads and writes over versioned tables.

use crate::db::{DbError, DbOperation, OrderBy, Select, StoreTransaction, WhereClause};

use super::{Entity, Versioned};

pub async fn select<T: Entity>(
    tx: &dyn StoreTransaction,
    query: Select,
) -> Result<Vec<T>, DbError> {
    tx.select(&query)
        .await?
        .iter()
        .map(T::from_record)
        .collect()
}

pub async fn select_where<T: Entity>(
    tx: &dyn StoreTransaction,
    where_clause: WhereClause,
) -> Result<Vec<T>, DbError> {
    select(tx, Select::from(T::TABLE, where_clause)).await
}

/// The current row matching `key`, if any.
pub async fn current<T: Versioned>(
    tx: &dyn StoreTransaction,
    key: WhereClause,
) -> Result<Option<T>, DbError> {
    let query = Select::from(T::TABLE, key.and(WhereClause::eq("is_current", true))).limit(1);
    Ok(select::<T>(tx, query).await?.into_iter().next())
}

pub async fn insert<T: Entity>(tx: &dyn StoreTransaction, row: &T) -> Result<(), DbError> {
    tx.execute(DbOperation::insert(T::TABLE, row.to_record()))
        .await?;
    Ok(())
}

/// Marks every current row matching `key` as non-current.
pub async fn invalidate<T: Entity>(
    tx: &dyn StoreTransaction,
    key: WhereClause,
) -> Result<u64, DbError> {
    tx.execute(DbOperation::update(
        T::TABLE,
        vec![("is_current", false.into())],
        key.and(WhereClause::eq("is_current", true)),
    ))
    .await
}

/// Every row stamped with `blockhash`.
pub async fn rows_at_block<T: Versioned>(
    tx: &dyn StoreTransaction,
    blockhash: &str,
) -> Result<Vec<T>, DbError> {
    select_where(tx, WhereClause::eq("blockhash", blockhash)).await
}

/// The most recent row for `key` strictly older than `blocknumber`.
/// `tie_break` orders candidates that share a block number.
pub async fn predecessor<T: Versioned>(
    tx: &dyn StoreTransaction,
    key: WhereClause,
    blocknumber: i64,
    tie_break: Option<OrderBy>,
) -> Result<Option<T>, DbError> {
    let mut query = Select::from(T::TABLE, key.and(WhereClause::lt("blocknumber", blocknumber)))
        .order_by(OrderBy::desc("blocknumber"));
    if let Some(order) = tie_break {
        query = query.order_by(order);
    }
    Ok(select::<T>(tx, query.limit(1)).await?.into_iter().next())
}

/// Persist a block's working copies with the two-phase flip: every previously
/// current row of each affected entity goes non-current first, then all new
/// versions are inserted as current. A version already written earlier in
/// the same block is replaced rather than duplicated.
pub async fn flush_versions<T: Versioned>(
    tx: &dyn StoreTransaction,
    versions: &[T],
) -> Result<(), DbError> {
    for version in versions {
        invalidate::<T>(tx, version.key()).await?;
        tx.execute(DbOperation::delete(T::TABLE, version.row_key()))
            .await?;
    }
    for version in versions {
        insert(tx, version).await?;
    }
    Ok(())
}

/// Undo one row: drop it, then restore its predecessor (if any) as current.
pub async fn revert_row<T: Versioned>(
    tx: &dyn StoreTransaction,
    row: &T,
    tie_break: Option<OrderBy>,
) -> Result<Option<T>, DbError> {
    tx.execute(DbOperation::delete(T::TABLE, row.row_key()))
        .await?;

    let previous: Option<T> =
        predecessor(tx, row.key(), row.meta().blocknumber, tie_break).await?;
    if let Some(prev) = &previous {
        tx.execute(DbOperation::update(
            T::TABLE,
            vec![("is_current", true.into())],
            prev.row_key(),
        ))
        .await?;
    }
    Ok(previous)
}

/// Restore every row of `key` at the predecessor block number. Used for
/// tables where several rows share one predecessor block.
pub async fn revert_group<T: Versioned>(
    tx: &dyn StoreTransaction,
    key: WhereClause,
    blockhash: &str,
    blocknumber: i64,
) -> Result<(), DbError> {
    tx.execute(DbOperation::delete(
        T::TABLE,
        key.clone().and(WhereClause::eq("blockhash", blockhash)),
    ))
    .await?;

    let previous: Option<T> = predecessor(tx, key.clone(), blocknumber, None).await?;
    if let Some(prev) = previous {
        tx.execute(DbOperation::update(
            T::TABLE,
            vec![("is_current", true.into())],
            key.and(WhereClause::eq("blocknumber", prev.meta().blocknumber)),
        ))
        .await?;
    }
    Ok(())
}
