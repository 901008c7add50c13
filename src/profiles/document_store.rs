//! Contract between the profile store and a document database

use crate::profiles::error::ProfileError;
use crate::profiles::value::{FieldValue, Fields};
use async_trait::async_trait;

/// One collection of documents keyed by id.
///
/// Implementations report a missing document on `update` and `append` as
/// [`ProfileError::NotFound`]; `get` reports it as `Ok(None)`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads the whole document
    async fn get(&self, id: &str) -> Result<Option<Fields>, ProfileError>;

    /// Creates or fully overwrites the document
    async fn set(&self, id: &str, fields: Fields) -> Result<(), ProfileError>;

    /// Replaces the given top-level fields, leaving the rest untouched
    async fn update(&self, id: &str, fields: Fields) -> Result<(), ProfileError>;

    /// Appends one element to an array field without reading it first
    async fn append(&self, id: &str, field: &str, value: FieldValue) -> Result<(), ProfileError>;
}
