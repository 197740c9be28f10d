use std::fmt::{Display, Formatter};

use gridline_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Field that carries the optimistic-concurrency token on JSON records.
pub const VERSION_FIELD: &str = "row_version";

/// Stable record identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    /// Server-assigned numeric primary key.
    Number(i64),
    /// Natural or string key such as an email or work order.
    Text(String),
    /// Client-side placeholder used until the server confirms a create.
    Provisional(Uuid),
}

impl RecordId {
    /// Creates a fresh provisional identifier.
    #[must_use]
    pub fn provisional() -> Self {
        Self::Provisional(Uuid::new_v4())
    }

    /// Reads an identifier from a JSON value.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number.as_i64().map(Self::Number),
            Value::String(text) if !text.trim().is_empty() => Some(Self::Text(text.clone())),
            _ => None,
        }
    }

    /// Returns the identifier as a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(number) => Value::from(*number),
            Self::Text(text) => Value::from(text.as_str()),
            Self::Provisional(uuid) => Value::from(uuid.to_string()),
        }
    }

    /// Returns whether the server has not confirmed this id yet.
    #[must_use]
    pub fn is_provisional(&self) -> bool {
        matches!(self, Self::Provisional(_))
    }
}

impl Display for RecordId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(number) => write!(formatter, "{number}"),
            Self::Text(text) => write!(formatter, "{text}"),
            Self::Provisional(uuid) => write!(formatter, "provisional-{uuid}"),
        }
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

/// Field-level changes sent with an update.
pub type RecordPatch = Map<String, Value>;

/// Row type managed by a data table controller.
pub trait TableRecord: Clone + Send + Sync + 'static {
    /// Returns the record identifier.
    fn record_id(&self) -> RecordId;

    /// Replaces the record identifier.
    fn set_record_id(&mut self, id: RecordId);

    /// Returns a field value by name.
    fn field(&self, name: &str) -> Option<&Value>;

    /// Writes a field value by name.
    fn set_field(&mut self, name: &str, value: Value);

    /// Returns the optimistic-concurrency token, when the backend issues one.
    fn version(&self) -> Option<String> {
        None
    }

    /// Decodes a record from its wire representation.
    fn from_json(value: Value, key_field: &str) -> AppResult<Self>;

    /// Encodes the record into its wire representation.
    fn to_json(&self) -> Value;

    /// Applies every field of a patch.
    fn apply_patch(&mut self, patch: &RecordPatch) {
        for (name, value) in patch {
            self.set_field(name, value.clone());
        }
    }
}

/// JSON-backed record whose id lives in a configurable key field.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    key_field: NonEmptyString,
    id: RecordId,
    fields: Map<String, Value>,
}

impl Record {
    /// Creates a record from its id and field map.
    pub fn new(
        key_field: impl Into<String>,
        id: RecordId,
        mut fields: Map<String, Value>,
    ) -> AppResult<Self> {
        let key_field = NonEmptyString::new(key_field)?;
        fields.insert(key_field.as_str().to_owned(), id.to_value());

        Ok(Self {
            key_field,
            id,
            fields,
        })
    }

    /// Creates a draft record that has no server id yet.
    pub fn draft(key_field: impl Into<String>, fields: Map<String, Value>) -> AppResult<Self> {
        Self::new(key_field, RecordId::provisional(), fields)
    }

    /// Returns the name of the key field.
    #[must_use]
    pub fn key_field(&self) -> &str {
        self.key_field.as_str()
    }

    /// Returns every field including the key.
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

impl TableRecord for Record {
    fn record_id(&self) -> RecordId {
        self.id.clone()
    }

    fn set_record_id(&mut self, id: RecordId) {
        self.fields
            .insert(self.key_field.as_str().to_owned(), id.to_value());
        self.id = id;
    }

    fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    fn set_field(&mut self, name: &str, value: Value) {
        if name == self.key_field.as_str() {
            if let Some(id) = RecordId::from_value(&value) {
                self.set_record_id(id);
            }
            return;
        }

        self.fields.insert(name.to_owned(), value);
    }

    fn version(&self) -> Option<String> {
        match self.fields.get(VERSION_FIELD)? {
            Value::String(text) => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        }
    }

    fn from_json(value: Value, key_field: &str) -> AppResult<Self> {
        let Value::Object(fields) = value else {
            return Err(AppError::Validation(
                "record payload must be a JSON object".to_owned(),
            ));
        };

        let id = fields
            .get(key_field)
            .and_then(RecordId::from_value)
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "record payload is missing key field '{key_field}'"
                ))
            })?;

        Self::new(key_field, id, fields)
    }

    fn to_json(&self) -> Value {
        let mut fields = self.fields.clone();
        if self.id.is_provisional() {
            fields.remove(self.key_field.as_str());
        }
        Value::Object(fields)
    }
}
