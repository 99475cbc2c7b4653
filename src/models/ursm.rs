use serde_json::Value as JsonValue;

use crate::db::{DbError, Record, TableSpec, WhereClause};

use super::{Entity, VersionMeta, Versioned};

/// Content node registered with the replica-set manager contract.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UrsmContentNode {
    pub meta: VersionMeta,
    pub cnode_sp_id: i64,
    pub delegate_owner_wallet: String,
    pub proposer_sp_ids: Vec<i64>,
    pub proposer_1_delegate_owner_wallet: String,
    pub proposer_2_delegate_owner_wallet: String,
    pub proposer_3_delegate_owner_wallet: String,
}

impl UrsmContentNode {
    pub fn key_for(cnode_sp_id: i64) -> WhereClause {
        WhereClause::eq("cnode_sp_id", cnode_sp_id)
    }
}

impl Entity for UrsmContentNode {
    const TABLE: &'static TableSpec = versioned_table!(
        "ursm_content_nodes",
        [
            ("cnode_sp_id", Int64),
            ("delegate_owner_wallet", Text),
            ("proposer_sp_ids", Json),
            ("proposer_1_delegate_owner_wallet", Text),
            ("proposer_2_delegate_owner_wallet", Text),
            ("proposer_3_delegate_owner_wallet", Text),
        ]
    );

    fn to_record(&self) -> Record {
        let proposers = JsonValue::from(self.proposer_sp_ids.clone());
        self.meta
            .write(Record::new())
            .with("cnode_sp_id", self.cnode_sp_id)
            .with("delegate_owner_wallet", self.delegate_owner_wallet.as_str())
            .with("proposer_sp_ids", crate::db::DbValue::Json(proposers))
            .with(
                "proposer_1_delegate_owner_wallet",
                self.proposer_1_delegate_owner_wallet.as_str(),
            )
            .with(
                "proposer_2_delegate_owner_wallet",
                self.proposer_2_delegate_owner_wallet.as_str(),
            )
            .with(
                "proposer_3_delegate_owner_wallet",
                self.proposer_3_delegate_owner_wallet.as_str(),
            )
    }

    fn from_record(record: &Record) -> Result<Self, DbError> {
        let proposer_sp_ids = match record.opt_json("proposer_sp_ids")? {
            Some(value) => {
                serde_json::from_value(value).map_err(|e| DbError::Encode(e.to_string()))?
            }
            None => Vec::new(),
        };
        Ok(Self {
            meta: VersionMeta::read(record)?,
            cnode_sp_id: record.int("cnode_sp_id")?,
            delegate_owner_wallet: record.text("delegate_owner_wallet")?,
            proposer_sp_ids,
            proposer_1_delegate_owner_wallet: record.text("proposer_1_delegate_owner_wallet")?,
            proposer_2_delegate_owner_wallet: record.text("proposer_2_delegate_owner_wallet")?,
            proposer_3_delegate_owner_wallet: record.text("proposer_3_delegate_owner_wallet")?,
        })
    }
}

impl Versioned for UrsmContentNode {
    fn key(&self) -> WhereClause {
        Self::key_for(self.cnode_sp_id)
    }

    fn meta(&self) -> &VersionMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut VersionMeta {
        &mut self.meta
    }
}
