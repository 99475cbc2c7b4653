use crate::db::{
    ColumnSpec, ColumnType, DbError, Record, Select, StoreTransaction, TableSpec, WhereClause,
};

use super::Entity;

/// Content identifier that must never be indexed.
#[derive(Debug, Clone, PartialEq)]
pub struct IpldBlacklist {
    pub ipld: String,
    pub is_current: bool,
}

impl Entity for IpldBlacklist {
    const TABLE: &'static TableSpec = &TableSpec {
        name: "ipld_blacklists",
        columns: &[
            ColumnSpec { name: "ipld", ty: ColumnType::Text },
            ColumnSpec { name: "is_current", ty: ColumnType::Bool },
        ],
    };

    fn to_record(&self) -> Record {
        Record::new()
            .with("ipld", self.ipld.as_str())
            .with("is_current", self.is_current)
    }

    fn from_record(record: &Record) -> Result<Self, DbError> {
        Ok(Self {
            ipld: record.text("ipld")?,
            is_current: record.flag("is_current")?,
        })
    }
}

pub async fn is_blacklisted(tx: &dyn StoreTransaction, cid: &str) -> Result<bool, DbError> {
    let query = Select::from(
        IpldBlacklist::TABLE,
        WhereClause::eq("ipld", cid).and(WhereClause::eq("is_current", true)),
    )
    .limit(1);
    Ok(!tx.select(&query).await?.is_empty())
}
