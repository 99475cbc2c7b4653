use crate::db::{DbError, DbValue, Record, TableSpec, WhereClause};

use super::{Entity, VersionMeta, Versioned};

/// Set-once signup facts reported in user metadata.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserEvents {
    pub meta: VersionMeta,
    pub user_id: i64,
    pub referrer: Option<i64>,
    pub is_mobile_user: bool,
}

impl UserEvents {
    pub fn key_for(user_id: i64) -> WhereClause {
        WhereClause::eq("user_id", user_id)
    }
}

impl Entity for UserEvents {
    const TABLE: &'static TableSpec = versioned_table!(
        "user_events",
        [
            ("user_id", Int64),
            ("referrer", Int64),
            ("is_mobile_user", Bool),
        ]
    );

    fn to_record(&self) -> Record {
        let mut record = self
            .meta
            .write(Record::new())
            .with("user_id", self.user_id)
            .with("is_mobile_user", self.is_mobile_user);
        record.set("referrer", DbValue::opt_int(self.referrer));
        record
    }

    fn from_record(record: &Record) -> Result<Self, DbError> {
        Ok(Self {
            meta: VersionMeta::read(record)?,
            user_id: record.int("user_id")?,
            referrer: record.opt_int("referrer")?,
            is_mobile_user: record.flag("is_mobile_user")?,
        })
    }
}

impl Versioned for UserEvents {
    fn key(&self) -> WhereClause {
        Self::key_for(self.user_id)
    }

    fn meta(&self) -> &VersionMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut VersionMeta {
        &mut self.meta
    }
}
