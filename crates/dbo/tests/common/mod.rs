//! Mapped classes shared by the end-to-end tests.

#![allow(dead_code)]

use dbo::chrono::{NaiveDate, NaiveDateTime};
use dbo::prelude::*;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Fields {
    pub datetime: NaiveDateTime,
    pub wstring: String,
    pub string: String,
    pub i: i32,
    pub f: f32,
    pub d: f64,
}

#[derive(Debug, Default)]
pub struct A {
    pub fields: Fields,
    pub b: Ptr<B>,
}

impl Dbo for A {
    type Id = i64;

    fn persist<Act: Action>(&mut self, a: &mut Act) {
        field(a, &mut self.fields.datetime, "datetime");
        field(a, &mut self.fields.wstring, "wstring");
        field(a, &mut self.fields.string, "string");
        field(a, &mut self.fields.i, "i");
        field(a, &mut self.fields.f, "f");
        field(a, &mut self.fields.d, "d");
        belongs_to(a, &mut self.b, "b");
    }
}

pub const STATE1: i32 = 0;
pub const STATE2: i32 = 1;

#[derive(Debug, Default)]
pub struct B {
    pub name: String,
    pub state: i32,
    pub as_many_to_one: Collection<Ptr<A>>,
    pub cs_many_to_many: Collection<Ptr<C>>,
}

impl Dbo for B {
    type Id = i64;

    fn persist<Act: Action>(&mut self, a: &mut Act) {
        field(a, &mut self.name, "name");
        field(a, &mut self.state, "state");
        has_many(a, &mut self.as_many_to_one, RelationType::ManyToOne, "b");
        has_many(a, &mut self.cs_many_to_many, RelationType::ManyToMany, "b_c");
    }
}

#[derive(Debug, Default)]
pub struct C {
    pub name: String,
    pub bs_many_to_many: Collection<Ptr<B>>,
    pub d: WeakPtr<D>,
}

impl Dbo for C {
    type Id = i64;

    fn persist<Act: Action>(&mut self, a: &mut Act) {
        field(a, &mut self.name, "name");
        has_many(a, &mut self.bs_many_to_many, RelationType::ManyToMany, "b_c");
        has_one(a, &mut self.d, "c");
    }
}

#[derive(Debug, Default)]
pub struct D {
    pub name: String,
    pub c: Ptr<C>,
}

impl Dbo for D {
    type Id = i64;

    fn persist<Act: Action>(&mut self, a: &mut Act) {
        field(a, &mut self.name, "name");
        belongs_to_with(a, &mut self.c, "c", ForeignKeyConstraint::ON_DELETE_CASCADE);
    }
}

/// A class keyed by a natural id, without version column.
#[derive(Debug, Default)]
pub struct Country {
    pub code: String,
    pub name: String,
}

impl Dbo for Country {
    type Id = String;
    const SURROGATE_ID_FIELD: Option<&'static str> = None;
    const VERSION_FIELD: Option<&'static str> = None;

    fn persist<Act: Action>(&mut self, a: &mut Act) {
        id(a, &mut self.code, "code");
        field(a, &mut self.name, "name");
    }
}

pub fn map_all(session: &Session) {
    session.map_class::<A>("table_a").unwrap();
    session.map_class::<B>("table_b").unwrap();
    session.map_class::<C>("table_c").unwrap();
    session.map_class::<D>("table_d").unwrap();
    session.map_class::<Country>("country").unwrap();
}

/// A session over a fresh in-memory database with all tables created.
pub fn session() -> Session {
    let session = Session::new();
    session.set_connection(Box::new(SqliteConnection::open_memory().unwrap()));
    map_all(&session);
    session.create_tables().unwrap();
    session
}

pub fn sample_fields() -> Fields {
    Fields {
        datetime: NaiveDate::from_ymd_opt(2009, 10, 1)
            .and_then(|d| d.and_hms_opt(12, 11, 31))
            .unwrap(),
        wstring: "Hello".into(),
        string: "There".into(),
        i: 42,
        f: 42.42,
        d: 42.424242,
    }
}

pub fn new_a(session: &Session, i: i32) -> Ptr<A> {
    session
        .add_new(A {
            fields: Fields {
                i,
                ..sample_fields()
            },
            ..A::default()
        })
        .unwrap()
}

pub fn new_b(session: &Session, name: &str, state: i32) -> Ptr<B> {
    session
        .add_new(B {
            name: name.into(),
            state,
            ..B::default()
        })
        .unwrap()
}

pub fn new_c(session: &Session, name: &str) -> Ptr<C> {
    session
        .add_new(C {
            name: name.into(),
            ..C::default()
        })
        .unwrap()
}

pub fn count(session: &Session, table: &str) -> i64 {
    session
        .query::<i64>(&format!("select count(1) from \"{table}\""))
        .result_value()
        .unwrap()
}

pub fn all<Cls: Dbo>(session: &Session) -> Vec<Ptr<Cls>> {
    session
        .find::<Cls>()
        .result_list()
        .unwrap()
        .iter()
        .unwrap()
        .collect::<Result<_>>()
        .unwrap()
}
