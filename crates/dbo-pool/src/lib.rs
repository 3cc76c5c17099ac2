//! Fixed-size connection pool for dbo.
//!
//! A [`FixedConnectionPool`] opens all of its connections up front by
//! cloning a seed connection. Sessions share the pool through
//! `Session::set_connection_pool`; each session holds a connection only for
//! the duration of its outermost transaction.
//!
//! ```rust,ignore
//! let seed = SqliteConnection::open_file("app.db")?;
//! let pool = Arc::new(FixedConnectionPool::new(Box::new(seed), PoolConfig::new(4))?);
//!
//! let session = Session::new();
//! session.set_connection_pool(pool.clone());
//! ```

use dbo_core::error::{PoolError, PoolErrorKind};
use dbo_core::{Dialect, Error, Result, SqlConnection, SqlConnectionPool};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of connections the pool opens
    pub max_connections: usize,
    /// Maximum time to wait for a connection in milliseconds; 0 waits forever
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout_ms: 30_000, // 30 seconds
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with the given max connections.
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            ..Default::default()
        }
    }

    /// Set acquire timeout.
    pub fn acquire_timeout(mut self, ms: u64) -> Self {
        self.acquire_timeout_ms = ms;
        self
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Total number of connections (active + idle)
    pub total_connections: usize,
    /// Number of idle connections
    pub idle_connections: usize,
    /// Number of checked out connections
    pub active_connections: usize,
    /// Number of callers waiting for a connection
    pub pending_requests: usize,
    /// Checkouts that gave up waiting
    pub timeouts: u64,
}

struct PoolState {
    idle: Vec<Box<dyn SqlConnection>>,
    waiting: usize,
    timeouts: u64,
}

/// A pool of a fixed number of connections.
pub struct FixedConnectionPool {
    config: PoolConfig,
    dialect: Arc<dyn Dialect>,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl FixedConnectionPool {
    /// Build a pool from `connection` and `max_connections - 1` clones of it.
    pub fn new(connection: Box<dyn SqlConnection>, config: PoolConfig) -> Result<Self> {
        if config.max_connections == 0 {
            return Err(Error::Pool(PoolError {
                kind: PoolErrorKind::Config,
                message: "a connection pool needs at least one connection".to_string(),
                source: None,
            }));
        }

        let mut idle = Vec::with_capacity(config.max_connections);
        for _ in 1..config.max_connections {
            idle.push(connection.clone_connection()?);
        }
        let dialect = connection.dialect();
        idle.push(connection);
        tracing::info!(
            connections = config.max_connections,
            dialect = dialect.name(),
            "Opened connection pool"
        );

        Ok(Self {
            config,
            dialect,
            state: Mutex::new(PoolState {
                idle,
                waiting: 0,
                timeouts: 0,
            }),
            available: Condvar::new(),
        })
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Get the current pool statistics.
    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            total_connections: self.config.max_connections,
            idle_connections: state.idle.len(),
            active_connections: self.config.max_connections - state.idle.len(),
            pending_requests: state.waiting,
            timeouts: state.timeouts,
        }
    }

    // A panic while holding the lock leaves the idle list intact.
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timeout_error(&self) -> Error {
        Error::Pool(PoolError {
            kind: PoolErrorKind::Timeout,
            message: format!(
                "no connection became available within {} ms",
                self.config.acquire_timeout_ms
            ),
            source: None,
        })
    }
}

impl SqlConnectionPool for FixedConnectionPool {
    fn get_connection(&self) -> Result<Box<dyn SqlConnection>> {
        let deadline = (self.config.acquire_timeout_ms > 0)
            .then(|| Instant::now() + Duration::from_millis(self.config.acquire_timeout_ms));

        let mut state = self.lock();
        state.waiting += 1;
        loop {
            if let Some(connection) = state.idle.pop() {
                state.waiting -= 1;
                tracing::trace!(idle = state.idle.len(), "Connection checked out");
                return Ok(connection);
            }
            match deadline {
                None => {
                    state = self
                        .available
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        state.waiting -= 1;
                        state.timeouts += 1;
                        tracing::warn!(
                            timeout_ms = self.config.acquire_timeout_ms,
                            "Timed out waiting for a pooled connection"
                        );
                        return Err(self.timeout_error());
                    }
                    state = self
                        .available
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }

    fn return_connection(&self, connection: Box<dyn SqlConnection>) {
        let mut state = self.lock();
        state.idle.push(connection);
        tracing::trace!(idle = state.idle.len(), "Connection returned");
        drop(state);
        self.available.notify_one();
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        self.dialect.clone()
    }
}

impl std::fmt::Debug for FixedConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedConnectionPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbo_core::PooledConnection;
    use dbo_session::{Action, Dbo, Session, field};
    use dbo_sqlite::SqliteConnection;
    use std::thread;

    #[derive(Debug, Default)]
    struct Note {
        text: String,
    }

    impl Dbo for Note {
        type Id = i64;

        fn persist<A: Action>(&mut self, a: &mut A) {
            field(a, &mut self.text, "text");
        }
    }

    fn file_pool(dir: &tempfile::TempDir, config: PoolConfig) -> Arc<FixedConnectionPool> {
        let path = dir.path().join("pool.db");
        let seed = SqliteConnection::open_file(path.to_string_lossy().into_owned()).unwrap();
        Arc::new(FixedConnectionPool::new(Box::new(seed), config).unwrap())
    }

    #[test]
    fn test_config_defaults_and_serde() {
        let config = PoolConfig::new(4).acquire_timeout(250);
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.acquire_timeout_ms, 250);

        let parsed: PoolConfig = serde_json::from_str(r#"{"max_connections": 3}"#).unwrap();
        assert_eq!(parsed.max_connections, 3);
        assert_eq!(parsed.acquire_timeout_ms, PoolConfig::default().acquire_timeout_ms);
    }

    #[test]
    fn test_empty_pool_is_rejected() {
        let seed = SqliteConnection::open_memory().unwrap();
        let err = FixedConnectionPool::new(Box::new(seed), PoolConfig::new(0)).unwrap_err();
        assert!(matches!(err, Error::Pool(ref e) if e.kind == PoolErrorKind::Config));
    }

    #[test]
    fn test_checkout_and_return() {
        let dir = tempfile::tempdir().unwrap();
        let pool = file_pool(&dir, PoolConfig::new(2));
        assert_eq!(pool.stats().idle_connections, 2);

        let first = PooledConnection::checkout(pool.clone()).unwrap();
        let second = PooledConnection::checkout(pool.clone()).unwrap();
        assert_eq!(pool.stats().active_connections, 2);
        drop(first);
        assert_eq!(pool.stats().idle_connections, 1);
        drop(second);
        assert_eq!(pool.stats().idle_connections, 2);
    }

    #[test]
    fn test_checkout_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let pool = file_pool(&dir, PoolConfig::new(1).acquire_timeout(20));
        let held = PooledConnection::checkout(pool.clone()).unwrap();

        let err = PooledConnection::checkout(pool.clone()).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(pool.stats().timeouts, 1);
        assert_eq!(pool.stats().pending_requests, 0);
        drop(held);
        assert!(PooledConnection::checkout(pool).is_ok());
    }

    #[test]
    fn test_waiter_is_woken_by_return() {
        let dir = tempfile::tempdir().unwrap();
        let pool = file_pool(&dir, PoolConfig::new(1).acquire_timeout(5_000));
        let held = PooledConnection::checkout(pool.clone()).unwrap();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || PooledConnection::checkout(pool).map(drop))
        };
        while pool.stats().pending_requests == 0 {
            thread::yield_now();
        }
        drop(held);
        waiter.join().unwrap().unwrap();
        assert_eq!(pool.stats().idle_connections, 1);
    }

    #[test]
    fn test_sessions_share_pool() {
        let dir = tempfile::tempdir().unwrap();
        let pool = file_pool(&dir, PoolConfig::new(2));

        let writer = Session::new();
        writer.set_connection_pool(pool.clone());
        writer.map_class::<Note>("note").unwrap();
        writer.create_tables().unwrap();
        assert_eq!(pool.stats().idle_connections, 2);

        let tx = writer.begin().unwrap();
        writer
            .add_new(Note {
                text: "pooled".into(),
            })
            .unwrap();
        writer.flush().unwrap();
        assert_eq!(pool.stats().active_connections, 1);
        tx.commit().unwrap();
        assert_eq!(pool.stats().idle_connections, 2);

        let reader = Session::new();
        reader.set_connection_pool(pool.clone());
        reader.map_class::<Note>("note").unwrap();
        let tx = reader.begin().unwrap();
        let notes = reader.find::<Note>().result_list().unwrap();
        assert_eq!(notes.size().unwrap(), 1);
        drop(notes);
        tx.commit().unwrap();
        assert_eq!(pool.stats().idle_connections, 2);
    }

    #[test]
    fn test_rollback_returns_connection() {
        let dir = tempfile::tempdir().unwrap();
        let pool = file_pool(&dir, PoolConfig::new(1));
        let session = Session::new();
        session.set_connection_pool(pool.clone());
        session.map_class::<Note>("note").unwrap();
        session.create_tables().unwrap();

        {
            let _tx = session.begin().unwrap();
            session.add_new(Note::default()).unwrap();
            session.flush().unwrap();
            assert_eq!(pool.stats().idle_connections, 0);
        }
        assert_eq!(pool.stats().idle_connections, 1);
    }
}
