//! Migration runner.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::fs;
use std::path::Path;

/// Apply every `*.sql` file in `dir` not yet recorded, in file name order.
pub fn run_migrations(conn: &Connection, dir: &Path) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _schema_migrations (name TEXT PRIMARY KEY)",
        [],
    )?;

    if !dir.exists() {
        tracing::warn!(dir = %dir.display(), "migrations directory not found");
        return Ok(());
    }

    let mut entries: Vec<_> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map_or(false, |e| e == "sql"))
        .collect();
    entries.sort();

    for path in entries {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_string();

        let applied: bool = conn
            .query_row(
                "SELECT 1 FROM _schema_migrations WHERE name = ?1",
                [&name],
                |row| row.get(0),
            )
            .unwrap_or(false);

        if applied {
            continue;
        }

        let sql = fs::read_to_string(&path)?;
        conn.execute_batch(&sql)
            .with_context(|| format!("migration {}", name))?;
        conn.execute("INSERT INTO _schema_migrations (name) VALUES (?1)", [&name])?;
        tracing::info!(migration = %name, "applied migration");
    }

    Ok(())
}
