use std::rc::Rc;

use assert_call::{call, CallRecorder};
use serde_json::{json, Value};
use viewmodel_cache::*;

fn schema() -> Rc<ModelSchema> {
    Rc::new(
        ModelSchema::from_json(
            r#"{
                "name": "User",
                "pk_fields": ["id"],
                "fields": [
                    {"name": "id", "kind": "integer"},
                    {"name": "firstName"},
                    {"name": "lastName"},
                    {"name": "email"}
                ]
            }"#,
        )
        .unwrap(),
    )
}

struct Users {
    schema: Rc<ModelSchema>,
    cache: ViewModelCache<ViewModel>,
}
impl Users {
    fn new() -> Self {
        let schema = schema();
        let cache = schema.new_cache();
        Self { schema, cache }
    }
    fn record(&self, data: Value) -> ViewModel {
        ViewModel::from_json(&self.schema, &data).unwrap()
    }
    fn add(&self, data: Value) -> Rc<ViewModel> {
        self.cache.add(self.record(data)).unwrap()
    }
    fn get(&self, pk: i32, fields: &[&str]) -> Option<Value> {
        self.cache.get(pk, fields).unwrap().map(|r| r.to_json())
    }
}

#[test]
fn superset_write_is_visible_through_subsets() {
    let users = Users::new();
    users.add(json!({"id": 1, "firstName": "Bob", "lastName": "Jack", "email": "bob@x"}));
    assert_eq!(
        users.get(1, &["firstName", "lastName"]),
        Some(json!({"id": 1, "firstName": "Bob", "lastName": "Jack"}))
    );
    assert_eq!(users.get(1, &["email"]), Some(json!({"id": 1, "email": "bob@x"})));
}

#[test]
fn most_recent_superset_wins() {
    let users = Users::new();
    users.add(json!({"id": 1, "firstName": "A"}));
    users.add(json!({"id": 1, "firstName": "B", "email": "b@x"}));
    users.add(json!({"id": 1, "firstName": "C", "lastName": "L"}));
    assert_eq!(users.get(1, &["firstName"]), Some(json!({"id": 1, "firstName": "C"})));

    let users = Users::new();
    users.add(json!({"id": 1, "firstName": "B", "email": "b@x"}));
    users.add(json!({"id": 1, "firstName": "C", "lastName": "L"}));
    assert_eq!(users.get(1, &["firstName"]), Some(json!({"id": 1, "firstName": "C"})));
}

#[test]
fn repeated_get_returns_same_instance() {
    let users = Users::new();
    users.add(json!({"id": 1, "firstName": "A", "email": "a@x"}));
    let a = users.cache.get(1, ["email"]).unwrap().unwrap();
    let b = users.cache.get(1, ["email"]).unwrap().unwrap();
    assert!(Rc::ptr_eq(&a, &b));

    users.add(json!({"id": 1, "email": "a@x", "lastName": "L"}));
    let c = users.cache.get(1, ["email"]).unwrap().unwrap();
    assert!(Rc::ptr_eq(&a, &c));
}

#[test]
fn equal_write_does_not_notify() {
    let mut cr = CallRecorder::new();
    let users = Users::new();
    users.add(json!({"id": 1, "firstName": "A", "email": "a@x"}));
    let _s = users
        .cache
        .add_listener(1, ["firstName", "email"], |_, _| call!("changed"))
        .unwrap();
    users.add(json!({"id": 1, "firstName": "A", "email": "a@x"}));
    cr.verify(());
    users.add(json!({"id": 1, "firstName": "A", "email": "b@x"}));
    cr.verify("changed");
}

#[test]
fn add_list_calls_list_listener_once() {
    let mut cr = CallRecorder::new();
    let users = Users::new();
    users.add(json!({"id": 1, "email": "a"}));
    let _s = users
        .cache
        .add_listener_list([1, 2, 3], ["email"], |previous, next| {
            let emails = |records: &[Option<Rc<ViewModel>>]| {
                records
                    .iter()
                    .map(|r| match r {
                        Some(r) => r.to_json()["email"].to_string(),
                        None => "-".to_owned(),
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
            };
            call!("{} => {}", emails(previous), emails(next));
        })
        .unwrap();

    users
        .cache
        .add_list([
            users.record(json!({"id": 1, "email": "x"})),
            users.record(json!({"id": 2, "email": "y"})),
            users.record(json!({"id": 3, "email": "z"})),
        ])
        .unwrap();
    cr.verify(r#""a" - - => "x" "y" "z""#);
}

#[test]
fn delete_fields_only_removes_that_view() {
    let users = Users::new();
    users.add(json!({"id": 1, "firstName": "A"}));
    users.add(json!({"id": 1, "email": "e"}));
    assert!(users.cache.delete_fields(1, ["email"]).unwrap());
    assert_eq!(users.get(1, &["firstName"]), Some(json!({"id": 1, "firstName": "A"})));
    assert_eq!(users.get(1, &["email"]), None);
    assert!(!users.cache.delete_fields(1, ["email"]).unwrap());
}

#[test]
fn delete_fields_recomputes_dependent_views() {
    let users = Users::new();
    users.add(json!({"id": 1, "firstName": "A"}));
    users.add(json!({"id": 1, "firstName": "B", "email": "b@x"}));
    users.add(json!({"id": 1, "firstName": "C", "lastName": "L"}));
    users.cache.delete_fields(1, ["firstName", "lastName"]).unwrap();
    assert_eq!(users.get(1, &["firstName"]), Some(json!({"id": 1, "firstName": "B"})));

    users.add(json!({"id": 2, "email": "x"}));
    users.add(json!({"id": 2, "email": "y", "lastName": "L"}));
    users.cache.delete_fields(2, ["email", "lastName"]).unwrap();
    assert_eq!(users.get(2, &["email"]), None);
}

#[test]
fn delete_notifies_listeners_of_removed_views() {
    let mut cr = CallRecorder::new();
    let users = Users::new();
    users.add(json!({"id": 1, "firstName": "A", "email": "a@x"}));
    let _s = users
        .cache
        .add_listener(1, ["firstName"], |p, n| call!("{} {}", p.is_some(), n.is_some()))
        .unwrap();
    assert!(users.cache.delete(1).unwrap());
    cr.verify("true false");
    assert_eq!(users.get(1, &["firstName", "email"]), None);
}

#[test]
fn write_does_not_touch_unrelated_field_sets() {
    let users = Users::new();
    users.add(json!({"id": 5, "firstName": "B"}));
    users.add(json!({"id": 5, "email": "E"}));
    users.add(json!({"id": 5, "firstName": "C", "lastName": "I"}));
    assert_eq!(users.get(5, &["firstName"]), Some(json!({"id": 5, "firstName": "C"})));
    assert_eq!(users.get(5, &["email"]), Some(json!({"id": 5, "email": "E"})));
}

#[test]
fn subset_write_does_not_touch_superset() {
    let users = Users::new();
    users.add(json!({"id": 1, "firstName": "A", "email": "a@x"}));
    users.add(json!({"id": 1, "firstName": "B"}));
    assert_eq!(
        users.get(1, &["firstName", "email"]),
        Some(json!({"id": 1, "firstName": "A", "email": "a@x"}))
    );
    assert_eq!(users.get(1, &["firstName"]), Some(json!({"id": 1, "firstName": "B"})));
}
