use async_trait::async_trait;
use bytes::BytesMut;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;

use super::error::DbError;
use super::store::{Store, StoreTransaction};
use super::types::{ColumnType, DbOperation, DbValue, OrderBy, Record, Select, WhereClause};

pub struct DbPool {
    pool: Pool,
}

impl DbPool {
    pub async fn new(database_url: &str) -> Result<Self, DbError> {
        let config = database_url
            .parse::<tokio_postgres::Config>()
            .map_err(|e| DbError::InvalidConnectionString(e.to_string()))?;

        let manager_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let manager = Manager::from_config(config, NoTls, manager_config);

        let pool = Pool::builder(manager)
            .max_size(16)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(DbError::BuildError)?;

        let _conn = pool.get().await?;
        tracing::info!("Database connection pool created successfully");

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), DbError> {
        super::migrations::run(&self.pool).await
    }
}

#[async_trait]
impl Store for DbPool {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, DbError> {
        let client = self.pool.get().await?;
        client.batch_execute("BEGIN").await?;
        Ok(Box::new(PgTransaction {
            client: Some(client),
        }))
    }
}

/// A pooled connection with an open `BEGIN`. Owning the connection (rather
/// than borrowing a `tokio_postgres::Transaction`) lets the transaction be
/// boxed behind [`StoreTransaction`].
struct PgTransaction {
    client: Option<Object>,
}

impl PgTransaction {
    fn client(&self) -> Result<&Object, DbError> {
        self.client.as_ref().ok_or(DbError::TransactionFinished)
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn select(&self, query: &Select) -> Result<Vec<Record>, DbError> {
        let (sql, params) = build_select_sql(query);
        let params_refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        let rows = self.client()?.query(&sql, &params_refs[..]).await.map_err(|e| {
            let db_err: DbError = e.into();
            tracing::error!("SQL query failed\n  SQL: {}\n  Error: {}", sql, db_err);
            db_err
        })?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let mut record = Record::new();
            for (idx, column) in query.table.columns.iter().enumerate() {
                let value = match column.ty {
                    ColumnType::Bool => row
                        .try_get::<_, Option<bool>>(idx)?
                        .map_or(DbValue::Null, DbValue::Bool),
                    ColumnType::Int64 => row
                        .try_get::<_, Option<i64>>(idx)?
                        .map_or(DbValue::Null, DbValue::Int64),
                    ColumnType::Text => row
                        .try_get::<_, Option<String>>(idx)?
                        .map_or(DbValue::Null, DbValue::Text),
                    ColumnType::Json => row
                        .try_get::<_, Option<serde_json::Value>>(idx)?
                        .map_or(DbValue::Null, DbValue::Json),
                };
                record.set(column.name, value);
            }
            records.push(record);
        }
        Ok(records)
    }

    async fn execute(&self, op: DbOperation) -> Result<u64, DbError> {
        let (sql, params) = match op {
            DbOperation::Insert {
                table,
                columns,
                values,
            } => build_insert_sql(&table, &columns, &values),
            DbOperation::Update {
                table,
                set_columns,
                where_clause,
            } => build_update_sql(&table, &set_columns, &where_clause),
            DbOperation::Delete { table, where_clause } => build_delete_sql(&table, &where_clause),
        };

        let params_refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        match self.client()?.execute(&sql, &params_refs[..]).await {
            Ok(n) => Ok(n),
            Err(e) => {
                let db_err: DbError = e.into();
                tracing::error!("SQL execution failed\n  SQL: {}\n  Error: {}", sql, db_err);
                Err(db_err)
            }
        }
    }

    async fn commit(mut self: Box<Self>) -> Result<(), DbError> {
        let client = self.client.take().ok_or(DbError::TransactionFinished)?;
        client.batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), DbError> {
        let client = self.client.take().ok_or(DbError::TransactionFinished)?;
        client.batch_execute("ROLLBACK").await?;
        Ok(())
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            // Detach from the pool so the connection closes and the server
            // aborts the open transaction.
            tracing::warn!("Dropping unfinished transaction, discarding connection");
            drop(Object::take(client));
        }
    }
}

#[derive(Debug)]
enum SqlParam {
    Null,
    Bool(bool),
    Int64(i64),
    Text(String),
    Json(serde_json::Value),
}

impl ToSql for SqlParam {
    fn to_sql(
        &self,
        ty: &tokio_postgres::types::Type,
        out: &mut BytesMut,
    ) -> Result<tokio_postgres::types::IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlParam::Null => Ok(tokio_postgres::types::IsNull::Yes),
            SqlParam::Bool(v) => v.to_sql(ty, out),
            SqlParam::Int64(v) => v.to_sql(ty, out),
            SqlParam::Text(v) => v.to_sql(ty, out),
            SqlParam::Json(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(ty: &tokio_postgres::types::Type) -> bool {
        <bool as ToSql>::accepts(ty)
            || <i64 as ToSql>::accepts(ty)
            || <String as ToSql>::accepts(ty)
            || <serde_json::Value as ToSql>::accepts(ty)
    }

    tokio_postgres::types::to_sql_checked!();
}

fn convert_db_value(value: &DbValue) -> SqlParam {
    match value {
        DbValue::Null => SqlParam::Null,
        DbValue::Bool(v) => SqlParam::Bool(*v),
        DbValue::Int64(v) => SqlParam::Int64(*v),
        DbValue::Text(v) => SqlParam::Text(v.clone()),
        DbValue::Json(v) => SqlParam::Json(v.clone()),
    }
}

/// Wrap a column name in double quotes to handle reserved keywords.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name)
}

fn quote_cols(columns: &[String]) -> String {
    columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ")
}

fn build_select_sql(query: &Select) -> (String, Vec<SqlParam>) {
    let mut params = Vec::new();
    let mut param_idx = 1;

    let cols = quote_cols(&query.table.column_names());
    let where_str = build_where_sql(&query.where_clause, &mut params, &mut param_idx);

    let mut sql = format!(
        "SELECT {} FROM {} WHERE {}",
        cols, query.table.name, where_str
    );
    if !query.order_by.is_empty() {
        let orders: Vec<String> = query.order_by.iter().map(order_sql).collect();
        sql.push_str(&format!(" ORDER BY {}", orders.join(", ")));
    }
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    (sql, params)
}

fn order_sql(order: &OrderBy) -> String {
    let direction = if order.descending { "DESC" } else { "ASC" };
    format!("{} {}", quote_ident(&order.column), direction)
}

fn build_insert_sql(table: &str, columns: &[String], values: &[DbValue]) -> (String, Vec<SqlParam>) {
    let cols = quote_cols(columns);
    let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("${}", i)).collect();
    let placeholders_str = placeholders.join(", ");

    let sql = format!("INSERT INTO {} ({}) VALUES ({})", table, cols, placeholders_str);
    let params = values.iter().map(convert_db_value).collect();

    (sql, params)
}

fn build_update_sql(
    table: &str,
    set_columns: &[(String, DbValue)],
    where_clause: &WhereClause,
) -> (String, Vec<SqlParam>) {
    let mut params = Vec::new();
    let mut param_idx = 1;

    let sets: Vec<String> = set_columns
        .iter()
        .map(|(col, val)| {
            params.push(convert_db_value(val));
            let s = format!("{} = ${}", quote_ident(col), param_idx);
            param_idx += 1;
            s
        })
        .collect();
    let sets_str = sets.join(", ");

    let where_str = build_where_sql(where_clause, &mut params, &mut param_idx);

    let sql = format!("UPDATE {} SET {} WHERE {}", table, sets_str, where_str);
    (sql, params)
}

fn build_delete_sql(table: &str, where_clause: &WhereClause) -> (String, Vec<SqlParam>) {
    let mut params = Vec::new();
    let mut param_idx = 1;

    let where_str = build_where_sql(where_clause, &mut params, &mut param_idx);

    let sql = format!("DELETE FROM {} WHERE {}", table, where_str);
    (sql, params)
}

fn build_where_sql(
    where_clause: &WhereClause,
    params: &mut Vec<SqlParam>,
    param_idx: &mut usize,
) -> String {
    match where_clause {
        WhereClause::All => "TRUE".to_string(),
        WhereClause::Eq(col, DbValue::Null) => format!("{} IS NULL", quote_ident(col)),
        WhereClause::Eq(col, val) => {
            params.push(convert_db_value(val));
            let s = format!("{} = ${}", quote_ident(col), *param_idx);
            *param_idx += 1;
            s
        }
        WhereClause::Lt(col, val) => {
            params.push(convert_db_value(val));
            let s = format!("{} < ${}", quote_ident(col), *param_idx);
            *param_idx += 1;
            s
        }
        WhereClause::In(_, vals) if vals.is_empty() => "FALSE".to_string(),
        WhereClause::In(col, vals) => {
            let placeholders: Vec<String> = vals
                .iter()
                .map(|val| {
                    params.push(convert_db_value(val));
                    let s = format!("${}", *param_idx);
                    *param_idx += 1;
                    s
                })
                .collect();
            format!("{} IN ({})", quote_ident(col), placeholders.join(", "))
        }
        WhereClause::And(conditions) => {
            let parts: Vec<String> = conditions
                .iter()
                .map(|c| format!("({})", build_where_sql(c, params, param_idx)))
                .collect();
            parts.join(" AND ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Entity, User};

    #[test]
    fn test_build_select_with_order_and_limit() {
        let query = Select::from(
            User::TABLE,
            WhereClause::eq("user_id", 1i64).and(WhereClause::lt("blocknumber", 10i64)),
        )
        .order_by(OrderBy::desc("blocknumber"))
        .limit(1);

        let (sql, params) = build_select_sql(&query);
        assert!(sql.starts_with("SELECT \"blockhash\", "));
        assert!(sql.ends_with(
            "FROM users WHERE (\"user_id\" = $1) AND (\"blocknumber\" < $2) ORDER BY \"blocknumber\" DESC LIMIT 1"
        ));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_build_update_numbers_params_after_sets() {
        let (sql, params) = build_update_sql(
            "users",
            &[("is_current".to_string(), DbValue::Bool(false))],
            &WhereClause::eq("user_id", 3i64).and(WhereClause::eq("is_current", true)),
        );
        assert_eq!(
            sql,
            "UPDATE users SET \"is_current\" = $1 WHERE (\"user_id\" = $2) AND (\"is_current\" = $3)"
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_build_where_null_and_empty_in() {
        let mut params = Vec::new();
        let mut idx = 1;
        let sql = build_where_sql(
            &WhereClause::Eq("number".to_string(), DbValue::Null)
                .and(WhereClause::is_in("blockhash", vec![])),
            &mut params,
            &mut idx,
        );
        assert_eq!(sql, "(\"number\" IS NULL) AND (FALSE)");
        assert!(params.is_empty());
    }
}
