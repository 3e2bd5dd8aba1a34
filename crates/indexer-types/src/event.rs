//! Event records as seen by the indexing pipeline.
//!
//! The coordinator does not interpret event contents. It only needs the
//! identifier to key upserts and deletes; every other field (title, tags,
//! location, url, image, description, ...) is carried through verbatim to
//! the handoff file.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::IndexerError;

/// Latest known representation of an event.
///
/// Serializes as a flat JSON object with the identifier under `id`.
/// On input, `id` or `event_id` is accepted and numeric identifiers are
/// normalized to strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct EventRecord {
    /// Event identifier
    pub id: String,

    /// All remaining fields of the record
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl EventRecord {
    /// Create a record with no fields besides the identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Add a field to the record.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Get a field by name.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Build a record from an arbitrary JSON value.
    ///
    /// Fails when the value is not an object or carries no usable identifier.
    pub fn from_value(value: Value) -> Result<Self, IndexerError> {
        let Value::Object(mut fields) = value else {
            return Err(IndexerError::InvalidInput(
                "event must be a JSON object".to_string(),
            ));
        };

        // `event_id` stays in the field map so consumers see what the caller sent
        let raw_id = match fields.remove("id") {
            Some(Value::Null) | None => fields.get("event_id").cloned(),
            Some(id) => Some(id),
        };

        let id = match raw_id {
            Some(raw) => normalize_id(&raw)?,
            None => {
                return Err(IndexerError::InvalidInput(
                    "event has no identifier".to_string(),
                ))
            }
        };

        Ok(Self { id, fields })
    }
}

impl TryFrom<Value> for EventRecord {
    type Error = IndexerError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        EventRecord::from_value(value)
    }
}

/// Normalize a JSON identifier to its string form.
pub fn normalize_id(raw: &Value) -> Result<String, IndexerError> {
    let id = match raw {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => {
            return Err(IndexerError::InvalidInput(format!(
                "unsupported identifier: {}",
                other
            )))
        }
    };

    if id.is_empty() {
        return Err(IndexerError::InvalidInput(
            "identifier is empty".to_string(),
        ));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_with_id() {
        let event = EventRecord::from_value(json!({"id": "42", "title": "Expo"})).unwrap();
        assert_eq!(event.id, "42");
        assert_eq!(event.field("title"), Some(&json!("Expo")));
        assert!(event.field("id").is_none());
    }

    #[test]
    fn test_from_value_with_numeric_event_id() {
        let event = EventRecord::from_value(json!({"event_id": 7, "title": "Hackathon"})).unwrap();
        assert_eq!(event.id, "7");
        // the original key is preserved for downstream consumers
        assert_eq!(event.field("event_id"), Some(&json!(7)));
    }

    #[test]
    fn test_from_value_rejects_missing_id() {
        let err = EventRecord::from_value(json!({"title": "No id"})).unwrap_err();
        assert!(matches!(err, IndexerError::InvalidInput(_)));

        let err = EventRecord::from_value(json!({"id": null})).unwrap_err();
        assert!(matches!(err, IndexerError::InvalidInput(_)));

        let err = EventRecord::from_value(json!({"id": ""})).unwrap_err();
        assert!(matches!(err, IndexerError::InvalidInput(_)));
    }

    #[test]
    fn test_from_value_rejects_non_object() {
        let err = EventRecord::from_value(json!(["42"])).unwrap_err();
        assert!(matches!(err, IndexerError::InvalidInput(_)));
    }

    #[test]
    fn test_serializes_flat() {
        let event = EventRecord::new("42")
            .with_field("title", "Expo")
            .with_field("tags", json!(["tech", "career"]));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"id": "42", "title": "Expo", "tags": ["tech", "career"]})
        );
    }

    #[test]
    fn test_deserialize_through_serde() {
        let event: EventRecord =
            serde_json::from_str(r#"{"id": 99, "location": "Kathmandu"}"#).unwrap();
        assert_eq!(event.id, "99");
        assert_eq!(event.field("location"), Some(&json!("Kathmandu")));

        let bad = serde_json::from_str::<EventRecord>(r#"{"location": "nowhere"}"#);
        assert!(bad.is_err());
    }
}
