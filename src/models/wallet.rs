use std::fmt;

use crate::db::{DbError, Record, TableSpec, WhereClause};

use super::{Entity, VersionMeta, Versioned};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WalletChain {
    Eth,
    Sol,
}

impl WalletChain {
    pub const ALL: [WalletChain; 2] = [WalletChain::Eth, WalletChain::Sol];

    pub fn as_str(&self) -> &'static str {
        match self {
            WalletChain::Eth => "eth",
            WalletChain::Sol => "sol",
        }
    }

    fn parse(s: &str) -> Result<Self, DbError> {
        match s {
            "eth" => Ok(WalletChain::Eth),
            "sol" => Ok(WalletChain::Sol),
            other => Err(DbError::Encode(format!("unknown wallet chain '{}'", other))),
        }
    }
}

impl fmt::Display for WalletChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External wallet a user has proven ownership of.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociatedWallet {
    pub meta: VersionMeta,
    pub user_id: i64,
    pub chain: WalletChain,
    pub wallet: String,
    pub is_delete: bool,
}

impl AssociatedWallet {
    /// Every wallet row of one user on one chain.
    pub fn user_chain_key(user_id: i64, chain: WalletChain) -> WhereClause {
        WhereClause::eq("user_id", user_id).and(WhereClause::eq("chain", chain.as_str()))
    }
}

impl Entity for AssociatedWallet {
    const TABLE: &'static TableSpec = versioned_table!(
        "associated_wallets",
        [
            ("user_id", Int64),
            ("chain", Text),
            ("wallet", Text),
            ("is_delete", Bool),
        ]
    );

    fn to_record(&self) -> Record {
        self.meta
            .write(Record::new())
            .with("user_id", self.user_id)
            .with("chain", self.chain.as_str())
            .with("wallet", self.wallet.as_str())
            .with("is_delete", self.is_delete)
    }

    fn from_record(record: &Record) -> Result<Self, DbError> {
        Ok(Self {
            meta: VersionMeta::read(record)?,
            user_id: record.int("user_id")?,
            chain: WalletChain::parse(&record.text("chain")?)?,
            wallet: record.text("wallet")?,
            is_delete: record.flag("is_delete")?,
        })
    }
}

impl Versioned for AssociatedWallet {
    fn key(&self) -> WhereClause {
        Self::user_chain_key(self.user_id, self.chain)
            .and(WhereClause::eq("wallet", self.wallet.as_str()))
    }

    fn meta(&self) -> &VersionMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut VersionMeta {
        &mut self.meta
    }
}
