//! Store bootstrap and additive schema evolution.
//!
//! Base tables come from the embedded diesel migrations. Columns that older
//! stores may lack are added afterwards by [`ensure_column`], which inspects
//! the live table instead of trusting migration bookkeeping, since stores
//! created by earlier tooling carry no bookkeeping at all.

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sql_types::Text;
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use log::info;
use std::path::Path;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub const READINGS_TABLE: &str = "daily_weather_entries";
pub const SOLAR_RADIATION_COLUMN: &str = "sw_radiation";

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("table `{0}` does not exist")]
    MissingTable(String),
    #[error("`{0}` is not a valid SQL identifier")]
    InvalidIdentifier(String),
    #[error("`{0}` is not a valid column default")]
    InvalidDefault(String),
    #[error("applying database migrations failed: {0}")]
    Migration(String),
    #[error("opening database failed: {0}")]
    Connection(#[from] diesel::result::ConnectionError),
    #[error("preparing database location failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Database(#[from] diesel::result::Error),
}

#[derive(QueryableByName)]
struct TableColumn {
    #[diesel(sql_type = Text)]
    name: String,
}

/// Open (creating if needed) the SQLite file and enable foreign key checks.
pub fn open_store(database_url: &str) -> Result<SqliteConnection, SchemaError> {
    if let Some(parent) = Path::new(database_url).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let mut conn = SqliteConnection::establish(database_url)?;
    conn.batch_execute("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
    Ok(conn)
}

pub fn apply_migrations(conn: &mut SqliteConnection) -> Result<(), SchemaError> {
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| SchemaError::Migration(e.to_string()))?;
    if applied.is_empty() {
        info!("Database schema is up to date; no migrations were applied");
    } else {
        let names = applied.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
        info!("Applied {} database migration(s): {}", applied.len(), names);
    }
    Ok(())
}

/// Bring a store to the shape the merge step expects. Safe to call on every run.
pub fn prepare_store(conn: &mut SqliteConnection) -> Result<(), SchemaError> {
    apply_migrations(conn)?;
    ensure_column(conn, READINGS_TABLE, SOLAR_RADIATION_COLUMN, "REAL", "0")?;
    Ok(())
}

/// Column names of `table`, in declaration order.
pub fn table_columns(conn: &mut SqliteConnection, table: &str) -> Result<Vec<String>, SchemaError> {
    let columns = diesel::sql_query("SELECT name FROM pragma_table_info(?)")
        .bind::<Text, _>(table)
        .load::<TableColumn>(conn)?;
    Ok(columns.into_iter().map(|c| c.name).collect())
}

/// Add `column` to `table` as `NOT NULL DEFAULT <default>` unless it exists.
///
/// Returns `true` when the column was added. Existing rows take the default.
pub fn ensure_column(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
    sql_type: &str,
    default: &str,
) -> Result<bool, SchemaError> {
    for ident in [table, column, sql_type] {
        if !is_identifier(ident) {
            return Err(SchemaError::InvalidIdentifier(ident.to_string()));
        }
    }
    if !is_literal(default) {
        return Err(SchemaError::InvalidDefault(default.to_string()));
    }

    let columns = table_columns(conn, table)?;
    // pragma_table_info yields no rows for an unknown table rather than failing
    if columns.is_empty() {
        return Err(SchemaError::MissingTable(table.to_string()));
    }
    if columns.iter().any(|c| c.eq_ignore_ascii_case(column)) {
        return Ok(false);
    }

    diesel::sql_query(format!(
        "ALTER TABLE {} ADD COLUMN {} {} NOT NULL DEFAULT {}",
        table, column, sql_type, default
    ))
    .execute(conn)?;
    info!("Added column {}.{} ({} default {})", table, column, sql_type, default);
    Ok(true)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_literal(s: &str) -> bool {
    if let Ok(value) = s.parse::<f64>() {
        return value.is_finite();
    }
    s.len() >= 2 && s.starts_with('\'') && s.ends_with('\'') && !s[1..s.len() - 1].contains('\'')
}
