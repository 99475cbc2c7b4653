use crate::db::{
    ColumnSpec, ColumnType, DbError, DbOperation, DbValue, Record, Select, StoreTransaction,
    TableSpec, WhereClause,
};

use super::Entity;

/// One indexed block. Exactly one row is current: the tip of the indexed
/// chain.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockRow {
    pub blockhash: String,
    pub parenthash: Option<String>,
    /// `None` for the placeholder row seeded from the configured start hash.
    pub number: Option<i64>,
    pub is_current: bool,
}

impl BlockRow {
    /// The single current block. Zero or several current rows means the
    /// table is corrupt.
    pub async fn current(tx: &dyn StoreTransaction) -> Result<Option<BlockRow>, DbError> {
        let rows = tx
            .select(&Select::from(Self::TABLE, WhereClause::eq("is_current", true)).limit(2))
            .await?;
        match rows.as_slice() {
            [] => Ok(None),
            [row] => Ok(Some(Self::from_record(row)?)),
            _ => Err(DbError::Corrupted(
                "expected a single row marked as current in blocks".to_string(),
            )),
        }
    }

    pub async fn require_current(tx: &dyn StoreTransaction) -> Result<BlockRow, DbError> {
        Self::current(tx).await?.ok_or_else(|| {
            DbError::Corrupted("expected a single row marked as current in blocks".to_string())
        })
    }

    pub async fn find(tx: &dyn StoreTransaction, blockhash: &str) -> Result<Option<BlockRow>, DbError> {
        let rows = tx
            .select(&Select::from(Self::TABLE, WhereClause::eq("blockhash", blockhash)).limit(1))
            .await?;
        rows.first().map(Self::from_record).transpose()
    }

    pub async fn any_exists(tx: &dyn StoreTransaction) -> Result<bool, DbError> {
        let rows = tx
            .select(&Select::from(Self::TABLE, WhereClause::All).limit(1))
            .await?;
        Ok(!rows.is_empty())
    }

    pub async fn insert(&self, tx: &dyn StoreTransaction) -> Result<(), DbError> {
        tx.execute(DbOperation::insert(Self::TABLE, self.to_record()))
            .await?;
        Ok(())
    }

    pub async fn set_current(
        tx: &dyn StoreTransaction,
        blockhash: &str,
        is_current: bool,
    ) -> Result<u64, DbError> {
        tx.execute(DbOperation::update(
            Self::TABLE,
            vec![("is_current", is_current.into())],
            WhereClause::eq("blockhash", blockhash),
        ))
        .await
    }

    pub async fn delete(tx: &dyn StoreTransaction, blockhash: &str) -> Result<u64, DbError> {
        tx.execute(DbOperation::delete(
            Self::TABLE,
            WhereClause::eq("blockhash", blockhash),
        ))
        .await
    }
}

impl Entity for BlockRow {
    const TABLE: &'static TableSpec = &TableSpec {
        name: "blocks",
        columns: &[
            ColumnSpec { name: "blockhash", ty: ColumnType::Text },
            ColumnSpec { name: "parenthash", ty: ColumnType::Text },
            ColumnSpec { name: "number", ty: ColumnType::Int64 },
            ColumnSpec { name: "is_current", ty: ColumnType::Bool },
        ],
    };

    fn to_record(&self) -> Record {
        let mut record = Record::new()
            .with("blockhash", self.blockhash.as_str())
            .with("is_current", self.is_current);
        record.set("parenthash", DbValue::opt_text(&self.parenthash));
        record.set("number", DbValue::opt_int(self.number));
        record
    }

    fn from_record(record: &Record) -> Result<Self, DbError> {
        Ok(Self {
            blockhash: record.text("blockhash")?,
            parenthash: record.opt_text("parenthash")?,
            number: record.opt_int("number")?,
            is_current: record.flag("is_current")?,
        })
    }
}
