use std::collections::HashSet;
use std::path::Path;

use deadpool_postgres::Pool;

use super::error::DbError;

const MIGRATIONS_DIR: &str = "migrations";

/// Applies every `migrations/*.sql` file not yet recorded in `_migrations`,
/// in file-name order, each inside its own transaction.
pub async fn run(pool: &Pool) -> Result<(), DbError> {
    let mut client = pool.get().await?;

    client
        .batch_execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                id SERIAL PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )",
        )
        .await?;

    let rows = client.query("SELECT name FROM _migrations", &[]).await?;
    let applied: HashSet<String> = rows.iter().map(|row| row.get(0)).collect();

    let pending = pending_migrations(Path::new(MIGRATIONS_DIR), &applied)?;
    if pending.is_empty() {
        tracing::info!("All migrations up to date");
        return Ok(());
    }

    for (name, sql) in pending {
        let tx = client.transaction().await?;

        tx.batch_execute(&sql).await.map_err(|e| {
            DbError::MigrationError(format!("Failed to run migration {}: {}", name, e))
        })?;

        tx.execute("INSERT INTO _migrations (name) VALUES ($1)", &[&name])
            .await?;

        tx.commit().await?;

        tracing::info!("Applied migration: {}", name);
    }

    Ok(())
}

fn pending_migrations(
    dir: &Path,
    applied: &HashSet<String>,
) -> Result<Vec<(String, String)>, DbError> {
    if !dir.exists() {
        tracing::info!("No migrations directory found, skipping migrations");
        return Ok(Vec::new());
    }

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|x| x == "sql"))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let mut pending = Vec::new();
    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        if !applied.contains(&name) {
            pending.push((name, std::fs::read_to_string(entry.path())?));
        }
    }
    Ok(pending)
}
