mod common;

use common::*;
use dbo::prelude::*;
use dbo::{Dialect, SqlConnectionPool, SqliteConfig};
use std::sync::Arc;
use std::thread;

fn file_pool(dir: &tempfile::TempDir, max: usize) -> Arc<FixedConnectionPool> {
    let path = dir.path().join("pool.db").to_string_lossy().into_owned();
    let seed = SqliteConnection::open(&SqliteConfig::file(path).busy_timeout(5_000)).unwrap();
    let config = PoolConfig::new(max).acquire_timeout(10_000);
    Arc::new(FixedConnectionPool::new(Box::new(seed), config).unwrap())
}

fn pooled_session(pool: &Arc<FixedConnectionPool>) -> Session {
    let session = Session::new();
    session.set_connection_pool(pool.clone());
    map_all(&session);
    session
}

#[test]
fn sqlite_sessions_on_threads_share_pool() {
    let dir = tempfile::tempdir().unwrap();
    let pool = file_pool(&dir, 3);
    pooled_session(&pool).create_tables().unwrap();

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let pool = pool.clone();
            thread::spawn(move || {
                let session = pooled_session(&pool);
                for i in 0..5 {
                    let tx = session.begin().unwrap();
                    new_a(&session, worker * 10 + i);
                    tx.commit().unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let session = pooled_session(&pool);
    let tx = session.begin().unwrap();
    assert_eq!(count(&session, "table_a"), 20);
    tx.commit().unwrap();

    let stats = pool.stats();
    assert_eq!(stats.idle_connections, 3);
    assert_eq!(stats.pending_requests, 0);
}

#[test]
fn sqlite_pooled_connection_held_for_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let pool = file_pool(&dir, 2);
    let session = pooled_session(&pool);
    session.create_tables().unwrap();

    let tx = session.begin().unwrap();
    assert_eq!(pool.stats().active_connections, 0);
    new_a(&session, 1);
    session.flush().unwrap();
    assert_eq!(pool.stats().active_connections, 1);
    {
        let nested = session.begin().unwrap();
        assert_eq!(count(&session, "table_a"), 1);
        nested.commit().unwrap();
    }
    assert_eq!(pool.stats().active_connections, 1);
    tx.commit().unwrap();
    assert_eq!(pool.stats().active_connections, 0);

    let failing = session.begin().unwrap();
    assert!(session.execute("select * from \"missing\"").run().is_err());
    drop(failing);
    assert_eq!(pool.stats().idle_connections, 2);
}

#[test]
fn sqlite_pool_reports_dialect() {
    let dir = tempfile::tempdir().unwrap();
    let pool = file_pool(&dir, 1);
    assert_eq!(pool.dialect().name(), "sqlite");
    let session = pooled_session(&pool);
    assert_eq!(session.dialect().unwrap().name(), "sqlite");
}
