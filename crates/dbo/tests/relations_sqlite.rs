mod common;

use common::*;
use dbo::prelude::*;

fn sizes(bs: &[&Ptr<B>], cs: &[&Ptr<C>]) -> (Vec<usize>, Vec<usize>) {
    let b_sizes = bs
        .iter()
        .map(|b| {
            let related = b.get().unwrap().cs_many_to_many.clone();
            related.size().unwrap()
        })
        .collect();
    let c_sizes = cs
        .iter()
        .map(|c| {
            let related = c.get().unwrap().bs_many_to_many.clone();
            related.size().unwrap()
        })
        .collect();
    (b_sizes, c_sizes)
}

#[test]
fn sqlite_many_to_many_insert_and_erase() {
    let session = session();
    let tx = session.begin().unwrap();
    let b1 = new_b(&session, "b1", STATE1);
    let _b2 = new_b(&session, "b2", STATE2);
    let _b3 = new_b(&session, "b3", STATE1);
    let c1 = new_c(&session, "c1");
    let c2 = new_c(&session, "c2");
    let c3 = new_c(&session, "c3");

    let cs = b1.get().unwrap().cs_many_to_many.clone();
    cs.insert(c1.clone()).unwrap();
    assert_eq!(sizes(&[&b1], &[&c1]), (vec![1], vec![1]));

    cs.insert(c2.clone()).unwrap();
    assert_eq!(sizes(&[&b1], &[&c1, &c2, &c3]), (vec![2], vec![1, 1, 0]));

    cs.erase(&c2).unwrap();
    assert_eq!(sizes(&[&b1], &[&c1, &c2, &c3]), (vec![1], vec![1, 0, 0]));

    cs.insert(c2.clone()).unwrap();
    cs.erase(&c2).unwrap();
    assert_eq!(sizes(&[&b1], &[&c1, &c2, &c3]), (vec![1], vec![1, 0, 0]));
    assert_eq!(cs.count(&c1).unwrap(), 1);
    assert_eq!(cs.count(&c2).unwrap(), 0);
    tx.commit().unwrap();

    let tx = session.begin().unwrap();
    assert_eq!(count(&session, "b_c"), 1);
    tx.commit().unwrap();
}

#[test]
fn sqlite_many_to_many_survives_rollback() {
    let session = session();
    let tx = session.begin().unwrap();
    let b = new_b(&session, "b", STATE1);
    let c = new_c(&session, "c");
    tx.commit().unwrap();

    let tx = session.begin().unwrap();
    let cs = b.get().unwrap().cs_many_to_many.clone();
    cs.insert(c.clone()).unwrap();
    session.flush().unwrap();
    assert_eq!(count(&session, "b_c"), 1);
    tx.rollback().unwrap();

    let tx = session.begin().unwrap();
    assert_eq!(count(&session, "b_c"), 1);
    let bs = c.get().unwrap().bs_many_to_many.clone();
    assert_eq!(bs.size().unwrap(), 1);
    tx.commit().unwrap();
}

#[test]
fn sqlite_many_to_one_collection() {
    let session = session();
    let tx = session.begin().unwrap();
    let b = new_b(&session, "owner", STATE1);
    let a1 = new_a(&session, 1);
    let a2 = new_a(&session, 2);

    a1.modify().unwrap().b = b.clone();
    let children = b.get().unwrap().as_many_to_one.clone();
    children.insert(a2.clone()).unwrap();
    assert_eq!(a2.get().unwrap().b, b);
    assert_eq!(children.size().unwrap(), 2);

    let ordered: Vec<i32> = children
        .find()
        .unwrap()
        .order_by("\"i\" desc")
        .result_list()
        .unwrap()
        .iter()
        .unwrap()
        .map(|a| a.map(|a| a.get().unwrap().fields.i))
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(ordered, vec![2, 1]);

    children.erase(&a1).unwrap();
    assert!(a1.get().unwrap().b.is_null());
    assert_eq!(children.size().unwrap(), 1);
    tx.commit().unwrap();
}

#[test]
fn sqlite_join_query_orders_tuples() {
    let session = session();
    let tx = session.begin().unwrap();
    let b = new_b(&session, "b", STATE1);
    let a2 = new_a(&session, 2);
    let a1 = new_a(&session, 1);
    a1.modify().unwrap().b = b.clone();
    a2.modify().unwrap().b = b.clone();
    tx.commit().unwrap();

    let tx = session.begin().unwrap();
    let rows: Vec<(Ptr<B>, Ptr<A>)> = session
        .query::<(Ptr<B>, Ptr<A>)>(
            "select b, a from \"table_b\" b join \"table_a\" a on a.\"b_id\" = b.\"id\"",
        )
        .order_by("a.\"i\"")
        .result_list()
        .unwrap()
        .iter()
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], (b.clone(), a1.clone()));
    assert_eq!(rows[1], (b.clone(), a2.clone()));
    tx.commit().unwrap();
}

#[test]
fn sqlite_grouped_query_counts_children() {
    let session = session();
    let tx = session.begin().unwrap();
    let busy = new_b(&session, "busy", STATE1);
    let idle = new_b(&session, "idle", STATE2);
    for i in 0..3 {
        new_a(&session, i).modify().unwrap().b = busy.clone();
    }

    let counts: Vec<(Ptr<B>, i64)> = session
        .query::<(Ptr<B>, i64)>(
            "select b, count(a.\"id\") from \"table_b\" b \
             left join \"table_a\" a on a.\"b_id\" = b.\"id\"",
        )
        .group_by("b")
        .order_by("b.\"name\"")
        .result_list()
        .unwrap()
        .iter()
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(counts, vec![(busy, 3), (idle, 0)]);
    tx.commit().unwrap();
}

#[test]
fn sqlite_one_to_one_through_weak_ptr() {
    let session = session();
    let tx = session.begin().unwrap();
    let c = new_c(&session, "c");
    let first = session
        .add_new(D {
            name: "first".into(),
            ..D::default()
        })
        .unwrap();
    let second = session
        .add_new(D {
            name: "second".into(),
            ..D::default()
        })
        .unwrap();

    let weak = c.get().unwrap().d.clone();
    assert_eq!(weak.get().unwrap(), None);
    weak.set(Some(first.clone())).unwrap();
    assert_eq!(first.get().unwrap().c, c);
    assert_eq!(weak.get().unwrap(), Some(first.clone()));

    weak.set(Some(second.clone())).unwrap();
    assert!(first.get().unwrap().c.is_null());
    assert_eq!(weak.get().unwrap(), Some(second.clone()));

    weak.set(None).unwrap();
    assert!(second.get().unwrap().c.is_null());
    tx.commit().unwrap();
}

#[test]
fn sqlite_deleting_owner_cascades() {
    let session = session();
    let tx = session.begin().unwrap();
    let c = new_c(&session, "owner");
    let d = session
        .add_new(D {
            name: "child".into(),
            c: c.clone(),
        })
        .unwrap();
    tx.commit().unwrap();
    drop(d);

    let tx = session.begin().unwrap();
    c.remove().unwrap();
    tx.commit().unwrap();

    let tx = session.begin().unwrap();
    assert_eq!(count(&session, "table_d"), 0);
    tx.commit().unwrap();
}

#[test]
fn sqlite_manual_mode_collections() {
    let session = session();
    session.set_flush_mode(FlushMode::Manual).unwrap();
    let tx = session.begin().unwrap();
    let b = new_b(&session, "b", STATE1);
    let c = new_c(&session, "c");
    let cs = b.get().unwrap().cs_many_to_many.clone();
    cs.insert(c.clone()).unwrap();
    assert_eq!(cs.manual_mode_insertions(), vec![c.clone()]);
    assert_eq!(count(&session, "b_c"), 0);

    session.flush().unwrap();
    assert!(cs.manual_mode_insertions().is_empty());
    assert_eq!(count(&session, "b_c"), 1);

    cs.erase(&c).unwrap();
    assert_eq!(cs.manual_mode_removals(), vec![c.clone()]);
    tx.commit().unwrap();
    assert!(cs.manual_mode_removals().is_empty());

    let tx = session.begin().unwrap();
    assert_eq!(count(&session, "b_c"), 0);
    tx.commit().unwrap();
}
