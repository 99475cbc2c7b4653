use thiserror::Error;

use super::types::DbValue;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Pool error: {0}")]
    PoolError(#[from] deadpool_postgres::PoolError),

    #[error("{}", format_pg_error(.0))]
    PostgresError(#[from] tokio_postgres::Error),

    #[error("Build error: {0}")]
    BuildError(#[from] deadpool_postgres::BuildError),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("Column '{column}' expected {expected}, found {found}")]
    ColumnType {
        column: String,
        expected: &'static str,
        found: String,
    },

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Transaction already finished")]
    TransactionFinished,

    #[error("Corrupted DB state: {0}")]
    Corrupted(String),
}

impl DbError {
    pub fn column(column: &str, expected: &'static str, found: &DbValue) -> Self {
        DbError::ColumnType {
            column: column.to_string(),
            expected,
            found: format!("{:?}", found),
        }
    }
}

fn format_pg_error(e: &tokio_postgres::Error) -> String {
    if let Some(db_err) = e.as_db_error() {
        let mut msg = format!(
            "PostgreSQL error [{}]: {}",
            db_err.code().code(),
            db_err.message()
        );
        if let Some(detail) = db_err.detail() {
            msg.push_str(&format!("\n  Detail: {}", detail));
        }
        if let Some(hint) = db_err.hint() {
            msg.push_str(&format!("\n  Hint: {}", hint));
        }
        if let Some(table) = db_err.table() {
            msg.push_str(&format!("\n  Table: {}", table));
        }
        if let Some(constraint) = db_err.constraint() {
            msg.push_str(&format!("\n  Constraint: {}", constraint));
        }
        msg
    } else {
        format!("PostgreSQL error: {}", e)
    }
}
