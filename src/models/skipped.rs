use crate::db::{
    ColumnSpec, ColumnType, DbError, DbOperation, Record, Select, StoreTransaction, TableSpec,
    WhereClause,
};

use super::Entity;

/// Who decided to skip: this node on its own (validation failure) or the
/// network-confirmed skip policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipLevel {
    Node,
    Network,
}

impl SkipLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipLevel::Node => "node",
            SkipLevel::Network => "network",
        }
    }
}

/// Append-only skip log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedTransaction {
    pub blocknumber: i64,
    pub blockhash: String,
    pub txhash: String,
    pub level: SkipLevel,
}

impl SkippedTransaction {
    pub async fn record(&self, tx: &dyn StoreTransaction) -> Result<(), DbError> {
        tx.execute(DbOperation::insert(Self::TABLE, self.to_record()))
            .await?;
        Ok(())
    }

    pub async fn count(tx: &dyn StoreTransaction, level: SkipLevel) -> Result<usize, DbError> {
        let rows = tx
            .select(&Select::from(
                Self::TABLE,
                WhereClause::eq("level", level.as_str()),
            ))
            .await?;
        Ok(rows.len())
    }
}

impl Entity for SkippedTransaction {
    const TABLE: &'static TableSpec = &TableSpec {
        name: "skipped_transactions",
        columns: &[
            ColumnSpec { name: "blocknumber", ty: ColumnType::Int64 },
            ColumnSpec { name: "blockhash", ty: ColumnType::Text },
            ColumnSpec { name: "txhash", ty: ColumnType::Text },
            ColumnSpec { name: "level", ty: ColumnType::Text },
        ],
    };

    fn to_record(&self) -> Record {
        Record::new()
            .with("blocknumber", self.blocknumber)
            .with("blockhash", self.blockhash.as_str())
            .with("txhash", self.txhash.as_str())
            .with("level", self.level.as_str())
    }

    fn from_record(record: &Record) -> Result<Self, DbError> {
        let level = match record.text("level")?.as_str() {
            "node" => SkipLevel::Node,
            "network" => SkipLevel::Network,
            other => return Err(DbError::Encode(format!("unknown skip level '{}'", other))),
        };
        Ok(Self {
            blocknumber: record.int("blocknumber")?,
            blockhash: record.text("blockhash")?,
            txhash: record.text("txhash")?,
            level,
        })
    }
}
