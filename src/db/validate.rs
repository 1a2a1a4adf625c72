// Boundary validation for documents entering or leaving the store.
//
// Shape checks come from serde; `Schema::check` adds the rules serde cannot
// express. Strict mode reports the first violation, safe mode swallows it.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::db::models::Stored;
use crate::store::Document;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid shape: {0}")]
    Shape(String),

    #[error("invalid {field}: {reason}")]
    Field { field: &'static str, reason: String },
}

impl ValidationError {
    pub fn field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Field {
            field,
            reason: reason.into(),
        }
    }
}

/// Semantic rules on top of the serde shape.
pub trait Schema {
    fn check(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Strict: parse `value` into `T` or return the first violation.
pub fn validate<T>(value: Value) -> Result<T, ValidationError>
where
    T: DeserializeOwned + Schema,
{
    let parsed: T =
        serde_json::from_value(value).map_err(|e| ValidationError::Shape(e.to_string()))?;
    parsed.check()?;
    Ok(parsed)
}

/// Safe: like [`validate`] but yields `None` for invalid input.
pub fn validate_safe<T>(value: Value) -> Option<T>
where
    T: DeserializeOwned + Schema,
{
    match validate(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::warn!("Skipping invalid {}: {}", std::any::type_name::<T>(), e);
            None
        }
    }
}

/// Strict validation of a document read back from the store.
pub fn validate_stored<T>(doc: Document) -> Result<Stored<T>, ValidationError>
where
    T: DeserializeOwned + Schema,
{
    let Document { id, body } = doc;
    Ok(Stored::new(id, validate(body)?))
}

/// Safe validation of a document read back from the store.
pub fn validate_stored_safe<T>(doc: Document) -> Option<Stored<T>>
where
    T: DeserializeOwned + Schema,
{
    let Document { id, body } = doc;
    match validate::<T>(body) {
        Ok(parsed) => Some(Stored::new(id, parsed)),
        Err(e) => {
            tracing::warn!("Skipping invalid document {}: {}", id, e);
            None
        }
    }
}
