//! In-memory [`Store`] used by the engine tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::error::DbError;
use super::store::{Store, StoreTransaction};
use super::types::{DbOperation, Record, Select};

type Tables = HashMap<String, Vec<Record>>;

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Snapshot of committed rows for a table.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.tables
            .lock()
            .map(|t| t.get(table).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn seed(&self, table: &str, record: Record) {
        if let Ok(mut tables) = self.tables.lock() {
            tables.entry(table.to_string()).or_default().push(record);
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, DbError> {
        let snapshot = self
            .tables
            .lock()
            .map_err(|_| DbError::Corrupted("memory store poisoned".to_string()))?
            .clone();
        Ok(Box::new(MemoryTransaction {
            working: Mutex::new(snapshot),
            store: self.clone(),
        }))
    }
}

struct MemoryTransaction {
    working: Mutex<Tables>,
    store: MemoryStore,
}

impl MemoryTransaction {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>, DbError> {
        self.working
            .lock()
            .map_err(|_| DbError::Corrupted("memory transaction poisoned".to_string()))
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn select(&self, query: &Select) -> Result<Vec<Record>, DbError> {
        let tables = self.lock()?;
        let mut rows: Vec<Record> = tables
            .get(query.table.name)
            .map(|rows| {
                rows.iter()
                    .filter(|r| query.where_clause.matches(r))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        rows.sort_by(|a, b| {
            for order in &query.order_by {
                let ord = a.get(&order.column).compare(b.get(&order.column));
                let ord = if order.descending { ord.reverse() } else { ord };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn execute(&self, op: DbOperation) -> Result<u64, DbError> {
        let mut tables = self.lock()?;
        match op {
            DbOperation::Insert {
                table,
                columns,
                values,
            } => {
                let mut record = Record::new();
                for (col, val) in columns.iter().zip(values) {
                    record.set(col, val);
                }
                tables.entry(table).or_default().push(record);
                Ok(1)
            }
            DbOperation::Update {
                table,
                set_columns,
                where_clause,
            } => {
                let mut affected = 0;
                if let Some(rows) = tables.get_mut(&table) {
                    for row in rows.iter_mut().filter(|r| where_clause.matches(r)) {
                        for (col, val) in &set_columns {
                            row.set(col, val.clone());
                        }
                        affected += 1;
                    }
                }
                Ok(affected)
            }
            DbOperation::Delete { table, where_clause } => {
                let mut affected = 0;
                if let Some(rows) = tables.get_mut(&table) {
                    let before = rows.len();
                    rows.retain(|r| !where_clause.matches(r));
                    affected = (before - rows.len()) as u64;
                }
                Ok(affected)
            }
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        let this = *self;
        if this.store.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(DbError::Corrupted("injected commit failure".to_string()));
        }
        let working = this
            .working
            .into_inner()
            .map_err(|_| DbError::Corrupted("memory transaction poisoned".to_string()))?;
        let mut tables = this
            .store
            .tables
            .lock()
            .map_err(|_| DbError::Corrupted("memory store poisoned".to_string()))?;
        *tables = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        Ok(())
    }
}
