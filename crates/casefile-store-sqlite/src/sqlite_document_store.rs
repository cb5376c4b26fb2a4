//! SqliteDocumentStore - DocumentStore trait implementation for SQLite

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::PathBuf;

use casefile_core::document_store::{Condition, document_id, validate_field};
use casefile_core::{Document, DocumentStore, Error, Filter, Query, Result, Update};

const SCHEMA_VERSION: i32 = 1;

/// Documents stored as JSON text, one table for every collection.
///
/// Filters and sorts are evaluated with `json_extract`; timestamps are
/// compared through `julianday` so RFC 3339 strings with any offset order
/// correctly.
#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

fn db_err(e: sqlx::Error) -> Error {
    Error::Store(e.to_string())
}

impl SqliteDocumentStore {
    /// Open (or create) the database at `db_path`. A leading `~` is expanded.
    ///
    /// # Errors
    /// - `Error::Io` if the parent directory cannot be created
    /// - `Error::Store` if the database cannot be opened or has an unknown schema
    pub async fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = expand_tilde(db_path.into())?;
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(&db_path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal),
            )
            .await
            .map_err(db_err)?;

        Self::initialize_schema(&pool).await?;

        let version: i32 = sqlx::query_scalar("SELECT version FROM schema_version")
            .fetch_one(&pool)
            .await
            .map_err(db_err)?;
        if version != SCHEMA_VERSION {
            return Err(Error::Store(format!("Unsupported schema version: {}", version)));
        }

        tracing::info!(path = %db_path.display(), "Opened SQLite document store");
        Ok(Self { pool })
    }

    async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(db_err)?;

        sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (1)")
            .execute(pool)
            .await
            .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (collection, id)
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(db_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection)")
            .execute(pool)
            .await
            .map_err(db_err)?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// WHERE clause for a filter plus the values to bind, in order
fn where_clause(filter: &Filter) -> Result<(String, Vec<String>)> {
    let mut sql = String::from("collection = ?");
    let mut binds = Vec::new();

    for condition in filter.conditions() {
        match condition {
            Condition::Eq { field, value } => {
                validate_field(field)?;
                sql.push_str(&format!(" AND json_extract(body, '$.{}') = ?", field));
                binds.push(value.clone());
            }
            Condition::Since { field, at } => {
                validate_field(field)?;
                sql.push_str(&format!(
                    " AND julianday(json_extract(body, '$.{}')) >= julianday(?)",
                    field
                ));
                binds.push(at.to_rfc3339());
            }
        }
    }

    Ok((sql, binds))
}

fn parse_body(body: &str) -> Result<Document> {
    Ok(serde_json::from_str(body)?)
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn insert(&self, collection: &str, document: Document) -> Result<()> {
        let id = document_id(&document)?.to_string();
        let body = serde_json::to_string(&document)?;

        let result = sqlx::query("INSERT INTO documents (collection, id, body) VALUES (?, ?, ?)")
            .bind(collection)
            .bind(&id)
            .bind(body)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(Error::Store(format!(
                "Duplicate document id '{}' in collection '{}'",
                id, collection
            ))),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Document>> {
        let (clause, binds) = where_clause(&query.filter)?;
        let mut sql = format!("SELECT body FROM documents WHERE {}", clause);

        if let Some(sort) = &query.sort {
            validate_field(&sort.field)?;
            sql.push_str(&format!(
                " ORDER BY julianday(json_extract(body, '$.{}')) {}, seq ASC",
                sort.field,
                if sort.descending { "DESC" } else { "ASC" }
            ));
        } else {
            sql.push_str(" ORDER BY seq ASC");
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut statement = sqlx::query_scalar::<_, String>(&sql).bind(collection);
        for value in &binds {
            statement = statement.bind(value);
        }
        let bodies = statement.fetch_all(&self.pool).await.map_err(db_err)?;

        bodies.iter().map(|body| parse_body(body)).collect()
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let (clause, binds) = where_clause(filter)?;
        let sql = format!("SELECT COUNT(*) FROM documents WHERE {}", clause);

        let mut statement = sqlx::query_scalar::<_, i64>(&sql).bind(collection);
        for value in &binds {
            statement = statement.bind(value);
        }
        let count = statement.fetch_one(&self.pool).await.map_err(db_err)?;
        Ok(count.max(0) as u64)
    }

    async fn update(&self, collection: &str, id: &str, update: &Update) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let body: Option<String> = sqlx::query_scalar("SELECT body FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        let Some(body) = body else {
            return Ok(false);
        };

        let mut document = parse_body(&body)?;
        update.apply(&mut document)?;

        sqlx::query("UPDATE documents SET body = ? WHERE collection = ? AND id = ?")
            .bind(serde_json::to_string(&document)?)
            .bind(collection)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(true)
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let body: Option<String> = sqlx::query_scalar("SELECT body FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        body.as_deref().map(parse_body).transpose()
    }
}

/// Expand tilde (~) in paths to home directory
fn expand_tilde(path: PathBuf) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;
            Ok(home.join(rest))
        }
        Err(_) => Ok(path),
    }
}

impl std::fmt::Debug for SqliteDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDocumentStore").finish_non_exhaustive()
    }
}
