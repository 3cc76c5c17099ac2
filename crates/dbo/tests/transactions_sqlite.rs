mod common;

use common::*;
use dbo::TransactionErrorKind;
use dbo::prelude::*;

#[test]
fn sqlite_rollback_then_remove_leaves_database_untouched() {
    let session = session();

    let tx = session.begin().unwrap();
    let a = new_a(&session, 1);
    let b = new_b(&session, "b", STATE1);
    session.flush().unwrap();
    assert!(a.id() > 0);
    tx.rollback().unwrap();

    assert_eq!(a.state(), ObjectState::New);
    a.remove().unwrap();
    b.remove().unwrap();
    assert_eq!(session.dirty_count(), 0);

    let tx = session.begin().unwrap();
    assert_eq!(count(&session, "table_a"), 0);
    assert_eq!(count(&session, "table_b"), 0);
    tx.commit().unwrap();
}

#[test]
fn sqlite_rollback_and_reread_restores_value() {
    let session = session();
    let tx = session.begin().unwrap();
    let a = new_a(&session, 42);
    tx.commit().unwrap();

    let tx = session.begin().unwrap();
    a.modify().unwrap().fields.i = 41;
    a.flush().unwrap();
    tx.rollback().unwrap();
    a.reread();

    let tx = session.begin().unwrap();
    assert_eq!(a.get().unwrap().fields.i, 42);
    tx.commit().unwrap();
    assert_eq!(a.version(), 0);
}

#[test]
fn sqlite_nested_transactions_commit_once() {
    let session = session();
    let outer = session.begin().unwrap();
    {
        let inner = session.begin().unwrap();
        new_a(&session, 1);
        inner.commit().unwrap();
    }
    assert!(session.is_in_transaction());
    assert_eq!(count(&session, "table_a"), 1);
    outer.commit().unwrap();
    assert!(!session.is_in_transaction());

    let tx = session.begin().unwrap();
    assert_eq!(count(&session, "table_a"), 1);
    tx.commit().unwrap();
}

#[test]
fn sqlite_nested_rollback_aborts_outer() {
    let session = session();
    let outer = session.begin().unwrap();
    new_a(&session, 1);
    session.flush().unwrap();
    session.begin().unwrap().rollback().unwrap();

    let err = outer.commit().unwrap_err();
    assert!(matches!(
        err,
        Error::Transaction(ref e) if e.kind == TransactionErrorKind::RollbackOnly
    ));

    session.discard_unflushed().unwrap();
    let tx = session.begin().unwrap();
    assert_eq!(count(&session, "table_a"), 0);
    tx.commit().unwrap();
}

#[test]
fn sqlite_dropped_transaction_rolls_back() {
    let session = session();
    let tx = session.begin().unwrap();
    let a = new_a(&session, 1);
    tx.commit().unwrap();

    {
        let _tx = session.begin().unwrap();
        a.remove().unwrap();
        session.flush().unwrap();
        assert_eq!(count(&session, "table_a"), 0);
    }
    assert!(!session.is_in_transaction());
    assert_eq!(a.state(), ObjectState::Deleted);

    session.discard_unflushed().unwrap();
    let tx = session.begin().unwrap();
    assert_eq!(count(&session, "table_a"), 1);
    assert_eq!(a.state(), ObjectState::Clean);
    tx.commit().unwrap();
}

#[test]
fn sqlite_operations_need_a_transaction() {
    let session = session();
    let err = session.find::<A>().result_list().unwrap_err();
    assert!(matches!(err, Error::Usage(_)));

    new_a(&session, 1);
    assert!(matches!(session.flush(), Err(Error::Usage(_))));
}

#[test]
fn sqlite_failed_statement_reports_sql() {
    let session = session();
    let tx = session.begin().unwrap();
    let err = session
        .execute("insert into \"missing\" (x) values (?)")
        .bind(1)
        .run()
        .unwrap_err();
    assert!(err.sql().is_some_and(|sql| sql.contains("\"missing\"")));
    drop(tx);
    assert!(!session.is_in_transaction());
}
