//! SQLite loader.

use super::{Loader, validate_for_load};
use crate::config::Settings;
use crate::error::{EtlError, Result};
use crate::table::RecordBatch;
use regex::Regex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params_from_iter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Policy when the destination table already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IfExists {
    #[default]
    Replace,
    Append,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseLoaderConfig {
    /// `sqlite:///relative.db`, `sqlite:////absolute.db`, or `sqlite://` for memory.
    pub database_url: String,
    #[serde(default = "default_table_name")]
    pub table_name: String,
    #[serde(default)]
    pub if_exists: IfExists,
    /// Rows per insert transaction.
    #[serde(default = "default_chunksize")]
    pub chunksize: usize,
    /// Create the table from the inferred column types before inserting.
    #[serde(default = "default_true")]
    pub create_schema: bool,
}

fn default_table_name() -> String {
    "mushroom_data".to_string()
}

fn default_chunksize() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

impl DatabaseLoaderConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            table_name: default_table_name(),
            if_exists: IfExists::default(),
            chunksize: default_chunksize(),
            create_schema: true,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            table_name: settings.database.table_name.clone(),
            chunksize: settings.batch_size,
            ..Self::new(settings.database.url.clone())
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseLoadStats {
    pub records_loaded: usize,
    pub table_name: String,
    pub columns: Vec<String>,
    pub loading_successful: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Where a `sqlite:` URL points.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SqliteTarget {
    Memory,
    File(PathBuf),
}

fn parse_url(url: &str) -> Result<SqliteTarget> {
    match url {
        "sqlite://" | "sqlite::memory:" | "sqlite:///:memory:" => Ok(SqliteTarget::Memory),
        _ => match url.strip_prefix("sqlite:///") {
            Some(path) if !path.is_empty() => Ok(SqliteTarget::File(PathBuf::from(path))),
            _ => Err(EtlError::config(format!(
                "unsupported database url '{url}'; expected sqlite:///<path>"
            ))),
        },
    }
}

/// Open the database a `sqlite:` URL points to, creating parent directories.
pub fn open_database(url: &str) -> Result<Connection> {
    match parse_url(url)? {
        SqliteTarget::Memory => Ok(Connection::open_in_memory()?),
        SqliteTarget::File(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Ok(Connection::open(path)?)
        }
    }
}

fn check_identifier(name: &str) -> Result<()> {
    let pattern = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")
        .map_err(|e| EtlError::config(e.to_string()))?;
    if pattern.is_match(name) {
        Ok(())
    } else {
        Err(EtlError::invalid_input(format!("invalid table name '{name}'")))
    }
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Writes the table into SQLite.
///
/// The connection is opened on first use and kept for the loader's lifetime.
pub struct DatabaseLoader {
    config: DatabaseLoaderConfig,
    conn: Option<Connection>,
    stats: DatabaseLoadStats,
}

impl DatabaseLoader {
    pub const NAME: &'static str = "database_loader";

    pub fn new(config: DatabaseLoaderConfig) -> Self {
        Self {
            config,
            conn: None,
            stats: DatabaseLoadStats::default(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(DatabaseLoaderConfig::from_settings(settings))
    }

    pub fn config(&self) -> &DatabaseLoaderConfig {
        &self.config
    }

    pub fn load_stats(&self) -> &DatabaseLoadStats {
        &self.stats
    }

    /// The open connection, opening it if needed.
    pub fn connection(&mut self) -> Result<&mut Connection> {
        if self.conn.is_none() {
            self.conn = Some(open_database(&self.config.database_url)?);
            tracing::info!(url = %self.config.database_url, "Database connection opened");
        }
        self.conn
            .as_mut()
            .ok_or_else(|| EtlError::persistence("database connection unavailable"))
    }

    fn write_table(&mut self, batch: &RecordBatch, table: &str) -> Result<()> {
        check_identifier(table)?;
        let if_exists = self.config.if_exists;
        let create_schema = self.config.create_schema;
        let chunksize = self.config.chunksize.max(1);

        let columns_sql = batch
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} {}", quote(c), batch.column_type(i).sql_type()))
            .collect::<Vec<_>>()
            .join(", ");
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(table),
            batch.columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", "),
            vec!["?"; batch.column_count()].join(", ")
        );

        let conn = self.connection()?;
        let exists = table_exists(conn, table)?;
        match (if_exists, exists) {
            (IfExists::Fail, true) => {
                return Err(EtlError::persistence(format!("table '{table}' already exists")));
            }
            (IfExists::Replace, true) => {
                conn.execute_batch(&format!("DROP TABLE {}", quote(table)))?;
            }
            _ => {}
        }
        if create_schema || !exists || if_exists == IfExists::Replace {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} ({columns_sql})",
                quote(table)
            ))?;
            tracing::debug!(table = %table, "Schema created");
        }

        for chunk in batch.rows.chunks(chunksize) {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(&insert_sql)?;
                for row in chunk {
                    stmt.execute(params_from_iter(row.iter().map(to_sql)))?;
                }
            }
            tx.commit()?;
        }
        Ok(())
    }
}

impl Loader for DatabaseLoader {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn load(&mut self, batch: &RecordBatch, destination: Option<&str>) -> Result<()> {
        let table = destination.unwrap_or(&self.config.table_name).to_string();
        tracing::info!(records = batch.row_count(), table = %table, "Starting database loading");

        let result = self.write_table(batch, &table).map_err(|e| match e {
            EtlError::Sqlite(inner) => EtlError::persistence(inner.to_string()),
            other => other,
        });

        self.stats = DatabaseLoadStats {
            records_loaded: if result.is_ok() { batch.row_count() } else { 0 },
            table_name: table.clone(),
            columns: batch.columns.clone(),
            loading_successful: result.is_ok(),
            error: result.as_ref().err().map(ToString::to_string),
        };
        match &result {
            Ok(()) => tracing::info!(
                records = batch.row_count(),
                table = %table,
                "Database loading completed"
            ),
            Err(e) => tracing::error!(table = %table, error = %e, "Database loading failed"),
        }
        result
    }

    fn validate(&self, batch: &RecordBatch) -> bool {
        validate_for_load(Self::NAME, batch, Some(255))
    }

    fn stats(&self) -> Value {
        serde_json::to_value(&self.stats).unwrap_or(Value::Null)
    }

    fn test_connection(&mut self) -> bool {
        let outcome = self
            .connection()
            .and_then(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?));
        match outcome {
            Ok(_) => {
                tracing::info!("Database connection test successful");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Database connection test failed");
                false
            }
        }
    }
}

/// Row count and class distribution of a loaded table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSummary {
    pub table_name: String,
    pub row_count: i64,
    pub distribution: Vec<(String, i64)>,
}

/// Count rows of `table` grouped by `column`, most frequent first.
pub fn summarize_table(url: &str, table: &str, column: &str) -> Result<TableSummary> {
    check_identifier(table)?;
    let conn = open_database(url)?;
    if !table_exists(&conn, table)? {
        return Err(EtlError::not_found(format!("table '{table}' does not exist")));
    }
    let row_count: i64 =
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", quote(table)), [], |row| row.get(0))?;

    let mut stmt = conn.prepare(&format!(
        "SELECT CAST({col} AS TEXT), COUNT(*) FROM {tbl} GROUP BY {col} ORDER BY COUNT(*) DESC, 1",
        col = quote(column),
        tbl = quote(table)
    ))?;
    let distribution = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                row.get::<_, i64>(1)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(TableSummary {
        table_name: table.to_string(),
        row_count,
        distribution,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn batch() -> RecordBatch {
        RecordBatch::new(
            vec!["class".into(), "odor_n".into(), "width".into()],
            vec![
                vec![json!("e"), json!(true), json!(1.5)],
                vec![json!("p"), json!(false), Value::Null],
                vec![json!("e"), json!(false), json!(2)],
            ],
        )
        .unwrap()
    }

    fn count(loader: &mut DatabaseLoader, table: &str) -> i64 {
        loader
            .connection()
            .unwrap()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_parse_url() {
        assert_eq!(parse_url("sqlite://").unwrap(), SqliteTarget::Memory);
        assert_eq!(
            parse_url("sqlite:///data/etl.db").unwrap(),
            SqliteTarget::File(PathBuf::from("data/etl.db"))
        );
        assert_eq!(
            parse_url("sqlite:////tmp/etl.db").unwrap(),
            SqliteTarget::File(PathBuf::from("/tmp/etl.db"))
        );
        assert!(matches!(parse_url("postgresql://localhost/db"), Err(EtlError::Config(_))));
    }

    #[test]
    fn test_replace_and_append() {
        let mut loader = DatabaseLoader::new(DatabaseLoaderConfig::new("sqlite://"));
        loader.load(&batch(), None).unwrap();
        loader.load(&batch(), None).unwrap();
        assert_eq!(count(&mut loader, "mushroom_data"), 3);

        loader.config.if_exists = IfExists::Append;
        loader.load(&batch(), None).unwrap();
        assert_eq!(count(&mut loader, "mushroom_data"), 6);
        assert_eq!(loader.load_stats().records_loaded, 3);
    }

    #[test]
    fn test_fail_policy() {
        let mut config = DatabaseLoaderConfig::new("sqlite://");
        config.if_exists = IfExists::Fail;
        let mut loader = DatabaseLoader::new(config);
        loader.load(&batch(), Some("fungi")).unwrap();
        let err = loader.load(&batch(), Some("fungi")).unwrap_err();
        assert!(matches!(err, EtlError::Persistence(_)));
        assert!(!loader.load_stats().loading_successful);
        assert!(loader.load_stats().error.is_some());
    }

    #[test]
    fn test_booleans_stored_as_integers() {
        let mut loader = DatabaseLoader::new(DatabaseLoaderConfig::new("sqlite://"));
        loader.load(&batch(), None).unwrap();
        let flag: i64 = loader
            .connection()
            .unwrap()
            .query_row("SELECT odor_n FROM mushroom_data LIMIT 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(flag, 1);
    }

    #[test]
    fn test_chunked_inserts() {
        let mut config = DatabaseLoaderConfig::new("sqlite://");
        config.chunksize = 2;
        let mut loader = DatabaseLoader::new(config);
        loader.load(&batch(), None).unwrap();
        assert_eq!(count(&mut loader, "mushroom_data"), 3);
    }

    #[test]
    fn test_invalid_table_name_rejected() {
        let mut loader = DatabaseLoader::new(DatabaseLoaderConfig::new("sqlite://"));
        assert!(loader.load(&batch(), Some("x; DROP TABLE y")).is_err());
    }

    #[test]
    fn test_file_database_and_summary() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite:///{}", dir.path().join("db/etl.db").display());
        let mut loader = DatabaseLoader::new(DatabaseLoaderConfig::new(url.clone()));
        assert!(loader.test_connection());
        loader.load(&batch(), None).unwrap();

        let summary = summarize_table(&url, "mushroom_data", "class").unwrap();
        assert_eq!(summary.row_count, 3);
        assert_eq!(summary.distribution, vec![("e".to_string(), 2), ("p".to_string(), 1)]);
        assert!(matches!(
            summarize_table(&url, "absent", "class"),
            Err(EtlError::NotFound(_))
        ));
    }

    #[test]
    fn test_connection_failure() {
        let mut loader = DatabaseLoader::new(DatabaseLoaderConfig::new("mysql://host/db"));
        assert!(!loader.test_connection());
    }
}
