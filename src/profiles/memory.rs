//! In-process document store

use crate::profiles::document_store::DocumentStore;
use crate::profiles::error::ProfileError;
use crate::profiles::value::{FieldValue, Fields};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Keeps documents in memory for local runs and tests. Each write holds the
/// lock for its whole duration, so appends never interleave.
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, Fields>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Fields>, ProfileError> {
        Ok(self.documents.read().await.get(id).cloned())
    }

    async fn set(&self, id: &str, fields: Fields) -> Result<(), ProfileError> {
        self.documents.write().await.insert(id.to_string(), fields);
        Ok(())
    }

    async fn update(&self, id: &str, fields: Fields) -> Result<(), ProfileError> {
        let mut documents = self.documents.write().await;
        let document = documents
            .get_mut(id)
            .ok_or_else(|| ProfileError::NotFound(id.to_string()))?;
        document.extend(fields);
        Ok(())
    }

    async fn append(&self, id: &str, field: &str, value: FieldValue) -> Result<(), ProfileError> {
        let mut documents = self.documents.write().await;
        let document = documents
            .get_mut(id)
            .ok_or_else(|| ProfileError::NotFound(id.to_string()))?;

        match document
            .entry(field.to_string())
            .or_insert_with(|| FieldValue::Array(Vec::new()))
        {
            FieldValue::Array(values) => {
                values.push(value);
                Ok(())
            }
            _ => Err(ProfileError::Backend(format!(
                "Field '{}' of document '{}' is not an array",
                field, id
            ))),
        }
    }
}
