mod common;

use common::*;
use dbo::prelude::*;
use dbo::ItemFlags;

fn populated() -> Session {
    let session = session();
    let tx = session.begin().unwrap();
    for i in [5, 3, 9, 1, 7, 2, 8] {
        new_a(&session, i);
    }
    tx.commit().unwrap();
    session
}

fn model(session: &Session) -> QueryModel<Ptr<A>> {
    let mut model = QueryModel::new();
    model
        .set_query(session.find::<A>().order_by("\"i\""), false)
        .unwrap();
    model.add_column("i").unwrap();
    model
        .add_column_with_header("wstring", "Greeting", ItemFlags::SELECTABLE)
        .unwrap();
    model
}

#[test]
fn sqlite_model_pages_through_results() {
    let session = populated();
    let mut model = model(&session);
    model.set_batch_size(3);

    assert_eq!(model.column_count(), 2);
    assert_eq!(model.header_data(0), Some("i"));
    assert_eq!(model.header_data(1), Some("Greeting"));
    assert_eq!(model.row_count().unwrap(), 7);

    let values: Vec<Value> = (0..7).map(|row| model.data(row, 0).unwrap()).collect();
    let expected: Vec<Value> = [1, 2, 3, 5, 7, 8, 9].into_iter().map(Value::Int).collect();
    assert_eq!(values, expected);

    // backwards through a fresh cache
    model.invalidate_data();
    let backwards: Vec<Value> = (0..7).rev().map(|row| model.data(row, 0).unwrap()).collect();
    assert_eq!(backwards, expected.into_iter().rev().collect::<Vec<_>>());
}

#[test]
fn sqlite_model_honors_query_limits() {
    let session = populated();
    let mut model = QueryModel::new();
    model
        .set_query(session.find::<A>().order_by("\"i\"").limit(3).offset(2), false)
        .unwrap();
    model.add_column("i").unwrap();
    model.set_batch_size(2);

    assert_eq!(model.row_count().unwrap(), 3);
    let values: Vec<Value> = (0..3).map(|row| model.data(row, 0).unwrap()).collect();
    assert_eq!(values, vec![Value::Int(3), Value::Int(5), Value::Int(7)]);
}

#[test]
fn sqlite_model_sort_and_edit() {
    let session = populated();
    let mut model = model(&session);
    model.sort(0, SortOrder::Descending).unwrap();
    assert_eq!(model.data(0, 0).unwrap(), Value::Int(9));

    assert!(!model.column_flags(1).unwrap().contains(ItemFlags::EDITABLE));
    model.set_column_flags(0, ItemFlags::SELECTABLE | ItemFlags::EDITABLE).unwrap();
    model.set_data(0, 0, &Value::Int(90)).unwrap();

    let top = model.result_row(0).unwrap();
    assert_eq!(top.get().unwrap().fields.i, 90);
    let tx = session.begin().unwrap();
    assert_eq!(top.version(), 1);
    let stored: i32 = session
        .query("select max(\"i\") from \"table_a\"")
        .result_value()
        .unwrap();
    assert_eq!(stored, 90);
    tx.commit().unwrap();
}

#[test]
fn sqlite_model_tuple_results() {
    let session = populated();
    let mut model: QueryModel<(Ptr<A>, i64)> = QueryModel::new();
    model
        .set_query(
            session
                .query("select a, length(a.\"wstring\") from \"table_a\" a")
                .where_("a.\"i\" > ?")
                .bind(6)
                .order_by("a.\"i\""),
            false,
        )
        .unwrap();
    model.add_all_fields_as_columns().unwrap();

    assert_eq!(model.row_count().unwrap(), 3);
    let last = model.column_count() - 1;
    assert_eq!(model.data(0, last).unwrap(), Value::BigInt(5));
    let (a, len) = model.result_row(2).unwrap();
    assert_eq!(a.get().unwrap().fields.i, 9);
    assert_eq!(len, 5);
}

#[test]
fn sqlite_model_insert_and_remove() {
    let session = populated();
    let mut model = model(&session);
    assert_eq!(model.row_count().unwrap(), 7);

    model.insert_rows(7, 2).unwrap();
    assert_eq!(model.row_count().unwrap(), 9);
    model.remove_rows(0, 2).unwrap();
    assert_eq!(model.row_count().unwrap(), 7);

    let tx = session.begin().unwrap();
    assert_eq!(count(&session, "table_a"), 7);
    tx.commit().unwrap();

    model.reload();
    assert_eq!(model.row_count().unwrap(), 7);
    assert_eq!(model.data(0, 0).unwrap(), Value::Int(0));
}
