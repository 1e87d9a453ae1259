//! The analytical query session.
//!
//! One in-memory `DuckDB` database per process, opened on first use.
//! Callers get a cloned connection handle so the lock is never held across
//! a query. When an operation fails with a connection-class error the
//! database is dropped, reopened, and the operation retried exactly once.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use duckdb::Connection;

use crate::{ExtractError, FailureKind};

/// Settings applied to every new connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionConfig {
    /// Extensions to `INSTALL`/`LOAD` (e.g. `httpfs`, `spatial`).
    pub extensions: Vec<String>,
    /// `SET threads`.
    pub threads: Option<usize>,
    /// `SET memory_limit`, e.g. `1GB`.
    pub memory_limit: Option<String>,
    /// `SET s3_region`.
    pub s3_region: Option<String>,
    /// `SET s3_endpoint` for S3-compatible stores.
    pub s3_endpoint: Option<String>,
}

impl SessionConfig {
    /// Reads settings from the environment.
    ///
    /// * `CANVASS_DUCKDB_EXTENSIONS` - comma-separated list
    /// * `CANVASS_DUCKDB_THREADS`
    /// * `CANVASS_DUCKDB_MEMORY_LIMIT`
    /// * `AWS_REGION`, `S3_ENDPOINT_URL`
    #[must_use]
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            extensions: var("CANVASS_DUCKDB_EXTENSIONS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            threads: var("CANVASS_DUCKDB_THREADS").and_then(|v| v.parse().ok()),
            memory_limit: var("CANVASS_DUCKDB_MEMORY_LIMIT"),
            s3_region: var("AWS_REGION"),
            s3_endpoint: var("S3_ENDPOINT_URL").map(|v| {
                v.trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .to_string()
            }),
        }
    }

    /// Whether the spatial extension will be loaded.
    #[must_use]
    pub fn has_spatial(&self) -> bool {
        self.extensions.iter().any(|e| e == "spatial")
    }

    fn setup_sql(&self) -> String {
        let mut sql = String::new();
        for ext in &self.extensions {
            sql.push_str(&format!("INSTALL {ext}; LOAD {ext};"));
        }
        if let Some(threads) = self.threads {
            sql.push_str(&format!("SET threads = {threads};"));
        }
        if let Some(limit) = &self.memory_limit {
            sql.push_str(&format!("SET memory_limit = '{}';", limit.replace('\'', "")));
        }
        if let Some(region) = &self.s3_region {
            sql.push_str(&format!("SET s3_region = '{}';", region.replace('\'', "")));
        }
        if let Some(endpoint) = &self.s3_endpoint {
            sql.push_str(&format!(
                "SET s3_endpoint = '{}'; SET s3_url_style = 'path';",
                endpoint.replace('\'', "")
            ));
        }
        sql
    }
}

/// Lazily-created, rebuildable `DuckDB` session.
#[derive(Debug)]
pub struct QuerySession {
    config: SessionConfig,
    conn: Mutex<Option<Connection>>,
    rebuilds: AtomicUsize,
}

impl QuerySession {
    /// Creates a session; no connection is opened yet.
    #[must_use]
    pub const fn new(config: SessionConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(None),
            rebuilds: AtomicUsize::new(0),
        }
    }

    /// Session settings.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// How many times the connection has been rebuilt.
    #[must_use]
    pub fn rebuilds(&self) -> usize {
        self.rebuilds.load(Ordering::SeqCst)
    }

    fn open(&self) -> Result<Connection, ExtractError> {
        let conn = Connection::open_in_memory()?;
        let setup = self.config.setup_sql();
        if !setup.is_empty() {
            conn.execute_batch(&setup)?;
        }
        log::debug!("Opened DuckDB session ({} extensions)", self.config.extensions.len());
        Ok(conn)
    }

    /// Returns a handle to the shared database, opening it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] if the database cannot be opened or
    /// configured.
    pub fn acquire(&self) -> Result<Connection, ExtractError> {
        let mut guard = self
            .conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let conn = match guard.take() {
            Some(conn) => conn,
            None => self.open()?,
        };
        Ok(guard.insert(conn).try_clone()?)
    }

    /// Drops the current database and opens a fresh one.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] if the new database cannot be opened.
    pub fn rebuild(&self) -> Result<(), ExtractError> {
        let mut guard = self
            .conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = None;
        *guard = Some(self.open()?);
        self.rebuilds.fetch_add(1, Ordering::SeqCst);
        log::info!("Rebuilt DuckDB session (rebuild #{})", self.rebuilds());
        Ok(())
    }

    /// Runs `op` against the session, rebuilding and retrying once on a
    /// connection-class failure.
    ///
    /// # Errors
    ///
    /// Returns the error from `op` unchanged when it is not a connection
    /// failure, or [`ExtractError::TransientStorage`] when the retry also
    /// fails that way.
    pub fn with_retry<T, F>(&self, mut op: F) -> Result<T, ExtractError>
    where
        F: FnMut(&Connection) -> Result<T, ExtractError>,
    {
        let conn = self.acquire()?;
        match op(&conn) {
            Err(e) if e.kind() == FailureKind::Connection => {
                log::warn!("Connection failure, rebuilding session and retrying once: {e}");
                drop(conn);
                self.rebuild()?;
                let conn = self.acquire()?;
                op(&conn).map_err(|e| {
                    if e.kind() == FailureKind::Connection {
                        ExtractError::TransientStorage {
                            attempts: 2,
                            source: Box::new(e),
                        }
                    } else {
                        e
                    }
                })
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection_error() -> ExtractError {
        ExtractError::DuckDb(duckdb::Error::InvalidParameterName(
            "Connection reset by peer".into(),
        ))
    }

    #[test]
    fn opens_lazily_and_shares_database() {
        let session = QuerySession::new(SessionConfig::default());
        let a = session.acquire().unwrap();
        a.execute_batch("CREATE TABLE t AS SELECT 42 AS v").unwrap();
        let b = session.acquire().unwrap();
        let v: i32 = b.query_row("SELECT v FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(v, 42);
        assert_eq!(session.rebuilds(), 0);
    }

    #[test]
    fn connection_failure_triggers_exactly_one_rebuild() {
        let session = QuerySession::new(SessionConfig::default());
        let mut calls = 0;
        let value = session
            .with_retry(|conn| {
                calls += 1;
                if calls == 1 {
                    return Err(connection_error());
                }
                Ok(conn.query_row("SELECT 7", [], |r| r.get::<_, i32>(0))?)
            })
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls, 2);
        assert_eq!(session.rebuilds(), 1);
    }

    #[test]
    fn persistent_connection_failure_is_transient_storage_error() {
        let session = QuerySession::new(SessionConfig::default());
        let mut calls = 0;
        let err = session
            .with_retry(|_| -> Result<(), ExtractError> {
                calls += 1;
                Err(connection_error())
            })
            .unwrap_err();
        assert!(matches!(err, ExtractError::TransientStorage { attempts: 2, .. }));
        assert_eq!(calls, 2);
        assert_eq!(session.rebuilds(), 1);
    }

    #[test]
    fn other_failures_are_not_retried() {
        let session = QuerySession::new(SessionConfig::default());
        let mut calls = 0;
        let err = session
            .with_retry(|conn| {
                calls += 1;
                Ok(conn.query_row("SELECT * FROM no_such_table", [], |r| r.get::<_, i32>(0))?)
            })
            .unwrap_err();
        assert!(matches!(err, ExtractError::DuckDb(_)));
        assert_eq!(calls, 1);
        assert_eq!(session.rebuilds(), 0);
    }

    #[test]
    fn rebuild_discards_previous_database() {
        let session = QuerySession::new(SessionConfig::default());
        session
            .acquire()
            .unwrap()
            .execute_batch("CREATE TABLE t (v INTEGER)")
            .unwrap();
        session.rebuild().unwrap();
        assert!(
            session
                .acquire()
                .unwrap()
                .query_row("SELECT count(*) FROM t", [], |r| r.get::<_, i64>(0))
                .is_err()
        );
    }

    #[test]
    fn env_style_config_builds_setup_sql() {
        let config = SessionConfig {
            extensions: vec!["httpfs".into()],
            threads: Some(2),
            memory_limit: Some("512MB".into()),
            s3_region: Some("us-east-1".into()),
            s3_endpoint: None,
        };
        let sql = config.setup_sql();
        assert!(sql.contains("LOAD httpfs;"));
        assert!(sql.contains("SET threads = 2;"));
        assert!(sql.contains("SET s3_region = 'us-east-1';"));
        assert!(!config.has_spatial());
    }
}
