use std::rc::Rc;

use serde_json::Value;

use crate::{FieldDef, FieldKind, FieldSet, ModelSchema, Record, ViewModel};

pub fn user_schema() -> Rc<ModelSchema> {
    Rc::new(ModelSchema::new(
        "User",
        &["id"],
        [
            FieldDef::new("id", FieldKind::Integer),
            FieldDef::new("firstName", FieldKind::Char),
            FieldDef::new("lastName", FieldKind::Char),
            FieldDef::new("email", FieldKind::Char),
        ],
    ))
}

pub fn user(data: Value) -> ViewModel {
    ViewModel::from_json(&user_schema(), &data).unwrap()
}

/// Fields of `record` without its primary key.
pub fn key_of(record: &ViewModel) -> FieldSet {
    record.assigned_fields().without(&FieldSet::new(["id"]))
}

pub fn describe(record: Option<&Rc<ViewModel>>) -> String {
    match record {
        Some(record) => record.to_json().to_string(),
        None => "null".to_owned(),
    }
}
