mod common;

use common::*;
use dbo::prelude::*;
use dbo::serde_json::json;
use dbo::{SchemaErrorKind, json_serialize, json_serialize_collection, json_serialize_value};

#[test]
fn sqlite_creation_sql_covers_all_tables() {
    let session = Session::new();
    session.set_connection(Box::new(SqliteConnection::open_memory().unwrap()));
    map_all(&session);
    let sql = session.table_creation_sql().unwrap();

    for table in ["table_a", "table_b", "table_c", "table_d", "country", "b_c"] {
        assert!(sql.contains(&format!("create table \"{table}\" (")), "{table}: {sql}");
    }
    assert!(sql.contains("\"code\" text not null"), "{sql}");
    assert!(sql.contains("primary key (\"code\")"), "{sql}");
    assert!(
        sql.contains(
            "constraint \"fk_table_d_c\" foreign key (\"c_id\") references \"table_c\" (\"id\") \
             on delete cascade deferrable initially deferred"
        ),
        "{sql}"
    );
    assert!(sql.contains("create index \"b_c_table_b_id\""), "{sql}");
}

#[test]
fn sqlite_create_tables_twice_fails() {
    let session = session();
    let err = session.create_tables().unwrap_err();
    match err {
        Error::Schema(e) => {
            assert_eq!(e.kind, SchemaErrorKind::Create);
            assert!(e.sql.is_some());
        }
        other => panic!("unexpected error: {other}"),
    }

    session.drop_tables().unwrap();
    session.create_tables().unwrap();
}

#[test]
fn sqlite_drop_tables_discards_rows() {
    let session = session();
    let tx = session.begin().unwrap();
    let b = new_b(&session, "b", STATE1);
    let c = new_c(&session, "c");
    let cs = b.get().unwrap().cs_many_to_many.clone();
    cs.insert(c).unwrap();
    tx.commit().unwrap();

    session.drop_tables().unwrap();
    session.create_tables().unwrap();
    let tx = session.begin().unwrap();
    assert_eq!(count(&session, "table_b"), 0);
    assert_eq!(count(&session, "b_c"), 0);
    tx.commit().unwrap();
}

#[test]
fn sqlite_json_of_owner_with_children() {
    let session = session();
    let tx = session.begin().unwrap();
    let b = new_b(&session, "owner", STATE2);
    let a = new_a(&session, 42);
    a.modify().unwrap().b = b.clone();
    session.flush().unwrap();

    let json = json_serialize(&b).unwrap();
    assert_eq!(
        json,
        json!({
            "id": b.id(),
            "name": "owner",
            "state": STATE2,
            "table_as_b": [{
                "id": a.id(),
                "datetime": "2009-10-01 12:11:31",
                "wstring": "Hello",
                "string": "There",
                "i": 42,
                "f": f64::from(42.42_f32),
                "d": 42.424242,
                "b": b.id()
            }]
        })
    );
    tx.commit().unwrap();
}

#[test]
fn sqlite_json_of_one_to_one() {
    let session = session();
    let tx = session.begin().unwrap();
    let c = new_c(&session, "c");
    let lonely = new_c(&session, "lonely");
    let d = session
        .add_new(D {
            name: "d".into(),
            c: c.clone(),
        })
        .unwrap();
    session.flush().unwrap();

    assert_eq!(
        json_serialize(&c).unwrap(),
        json!({
            "id": c.id(),
            "name": "c",
            "table_d_c": { "id": d.id(), "name": "d", "c": c.id() }
        })
    );
    assert_eq!(json_serialize(&lonely).unwrap()["table_d_c"], json!(null));

    let all = json_serialize_collection(&session.find::<C>().order_by("\"name\"").result_list().unwrap())
        .unwrap();
    assert_eq!(all.as_array().map(Vec::len), Some(2));
    assert_eq!(all[0]["name"], json!("c"));
    tx.commit().unwrap();
}

#[test]
fn sqlite_json_of_detached_value() {
    let mut country = Country {
        code: "be".into(),
        name: "Belgium".into(),
    };
    assert_eq!(
        json_serialize_value(&mut country).unwrap(),
        json!({ "code": "be", "name": "Belgium" })
    );
}
