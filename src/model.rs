use std::{collections::BTreeMap, fmt, rc::Rc};

use parse_display::Display;
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::{FieldError, FieldSet, PkValue, PrimaryKey, Record, ViewModelCache};


/// Kind of a field, which decides what values it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[display(style = "snake_case")]
pub enum FieldKind {
    #[default]
    Char,
    Integer,
    Float,
    Boolean,
    List,
    Json,
}

impl FieldKind {
    /// Converts `value` to a value of this kind. `null` is accepted for every kind.
    pub fn parse(self, field: &str, value: &Value) -> Result<FieldValue, FieldError> {
        let invalid = || FieldError::InvalidValue {
            field: field.to_owned(),
            expected: self,
        };
        Ok(match (self, value) {
            (_, Value::Null) => FieldValue::Null,
            (FieldKind::Char, Value::String(s)) => FieldValue::Str(s.clone()),
            (FieldKind::Integer, Value::Number(n)) => FieldValue::Int(n.as_i64().ok_or_else(invalid)?),
            (FieldKind::Float, Value::Number(n)) => FieldValue::Float(n.as_f64().ok_or_else(invalid)?),
            (FieldKind::Boolean, Value::Bool(b)) => FieldValue::Bool(*b),
            (FieldKind::List, Value::Array(items)) => FieldValue::List(
                items
                    .iter()
                    .map(|item| FieldValue::from_json(item).ok_or_else(invalid))
                    .collect::<Result<_, _>>()?,
            ),
            (FieldKind::Json, value) => FieldValue::Json(value.clone()),
            _ => return Err(invalid()),
        })
    }
}

/// Value of a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<FieldValue>),
    Json(Value),
}

impl FieldValue {
    /// Converts a scalar or array JSON value. Objects are only accepted by [`FieldKind::Json`].
    fn from_json(value: &Value) -> Option<Self> {
        Some(match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Int(i),
                None => FieldValue::Float(n.as_f64()?),
            },
            Value::String(s) => FieldValue::Str(s.clone()),
            Value::Array(items) => FieldValue::List(items.iter().map(Self::from_json).collect::<Option<_>>()?),
            Value::Object(_) => return None,
        })
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Int(i) => Value::from(*i),
            FieldValue::Float(f) => Value::from(*f),
            FieldValue::Str(s) => Value::String(s.clone()),
            FieldValue::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            FieldValue::Json(value) => value.clone(),
        }
    }

    fn to_pk(&self) -> Option<PkValue> {
        match self {
            FieldValue::Int(i) => Some(PkValue::Int(*i)),
            FieldValue::Str(s) => Some(PkValue::Str(s.clone())),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_owned())
    }
}
impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}
impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}
impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(value.into())
    }
}
impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}
impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(default)]
    pub kind: FieldKind,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

fn default_pk_fields() -> Vec<String> {
    vec!["id".to_owned()]
}

/// Describes a view model: its name, its primary key fields and the fields it accepts.
///
/// Primary key fields must also be listed in `fields`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSchema {
    pub name: String,
    #[serde(default = "default_pk_fields")]
    pub pk_fields: Vec<String>,
    pub fields: Vec<FieldDef>,
}

impl ModelSchema {
    pub fn new(name: impl Into<String>, pk_fields: &[&str], fields: impl IntoIterator<Item = FieldDef>) -> Self {
        Self {
            name: name.into(),
            pk_fields: pk_fields.iter().map(|f| f.to_string()).collect(),
            fields: fields.into_iter().collect(),
        }
    }

    /// Parses a schema from JSON and checks that every primary key field is declared.
    pub fn from_json(json: &str) -> Result<Self, FieldError> {
        let schema: Self = serde_json::from_str(json).map_err(|e| FieldError::Schema {
            message: e.to_string(),
        })?;
        if let Some(pk) = schema.pk_fields.iter().find(|pk| schema.field(pk).is_none()) {
            return Err(FieldError::Schema {
                message: format!("primary key field '{pk}' is not declared"),
            });
        }
        Ok(schema)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Creates an empty cache for records of this model.
    pub fn new_cache(&self) -> ViewModelCache<ViewModel> {
        ViewModelCache::for_model(&self.name, &self.pk_fields)
    }
}

/// A record of a [`ModelSchema`] with some or all of its fields set.
#[derive(Clone)]
pub struct ViewModel {
    schema: Rc<ModelSchema>,
    pk: PrimaryKey,
    values: BTreeMap<String, FieldValue>,
    assigned: FieldSet,
}

impl ViewModel {
    /// Creates a record from field values.
    ///
    /// Every primary key field must be given an integer or string value.
    pub fn new<I, K, V>(schema: &Rc<ModelSchema>, values: I) -> Result<Self, FieldError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldValue>,
    {
        let mut map = BTreeMap::new();
        for (name, value) in values {
            let name = name.into();
            if schema.field(&name).is_none() {
                return Err(FieldError::UnknownField {
                    model: schema.name.clone(),
                    field: name,
                });
            }
            map.insert(name, value.into());
        }
        Self::from_values(schema.clone(), map)
    }

    /// Creates a record from a JSON object, converting each value according to its field kind.
    pub fn from_json(schema: &Rc<ModelSchema>, data: &Value) -> Result<Self, FieldError> {
        let Value::Object(object) = data else {
            return Err(FieldError::NotAnObject);
        };
        let mut values = BTreeMap::new();
        for (name, value) in object {
            let Some(field) = schema.field(name) else {
                return Err(FieldError::UnknownField {
                    model: schema.name.clone(),
                    field: name.clone(),
                });
            };
            values.insert(name.clone(), field.kind.parse(name, value)?);
        }
        Self::from_values(schema.clone(), values)
    }

    fn from_values(schema: Rc<ModelSchema>, values: BTreeMap<String, FieldValue>) -> Result<Self, FieldError> {
        let mut parts = Vec::with_capacity(schema.pk_fields.len());
        for name in &schema.pk_fields {
            let value = values.get(name).ok_or_else(|| FieldError::MissingPrimaryKey { field: name.clone() })?;
            let value = value.to_pk().ok_or_else(|| FieldError::InvalidPrimaryKey { field: name.clone() })?;
            parts.push((name.clone(), value));
        }
        let pk = if parts.len() == 1 {
            PrimaryKey::Scalar(parts.remove(0).1)
        } else {
            PrimaryKey::compound(parts)
        };
        let assigned = values.keys().collect();
        Ok(Self {
            schema,
            pk,
            values,
            assigned,
        })
    }

    pub fn schema(&self) -> &Rc<ModelSchema> {
        &self.schema
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    /// The assigned fields as a JSON object.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        )
    }
}

impl Record for ViewModel {
    fn pk(&self) -> PrimaryKey {
        self.pk.clone()
    }

    fn assigned_fields(&self) -> &FieldSet {
        &self.assigned
    }

    fn clone_fields(&self, fields: &FieldSet) -> Result<Self, FieldError> {
        let pk_fields = FieldSet::new(&self.schema.pk_fields);
        let fields = fields.union(&pk_fields);
        let missing = fields.difference(&self.assigned);
        if !missing.is_empty() {
            return Err(FieldError::NotAssigned {
                fields: missing.join(", "),
                available: self.assigned.join(", "),
            });
        }
        let values = self
            .values
            .iter()
            .filter(|(name, _)| fields.contains(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Ok(Self {
            schema: self.schema.clone(),
            pk: self.pk.clone(),
            values,
            assigned: fields,
        })
    }

    fn is_equal(&self, other: &Self) -> bool {
        self.schema.name == other.schema.name && self.values == other.values
    }

    fn model_name(&self) -> Option<&str> {
        Some(&self.schema.name)
    }
}

impl Serialize for ViewModel {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in &self.values {
            map.serialize_entry(name, &value.to_json())?;
        }
        map.end()
    }
}

impl fmt::Debug for ViewModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.schema.name)?;
        for (index, (name, value)) in self.values.iter().enumerate() {
            if index != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {}", value.to_json())?;
        }
        write!(f, ")")
    }
}
