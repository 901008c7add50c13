//! Profile store façade
//!
//! Each operation is a single read or write against the injected
//! [`DocumentStore`]. Writes that find no document fall back to creating it.
//! Failures are logged here and returned to the caller, who may ignore them.

use crate::profiles::auth::{AuthProvider, AuthUser};
use crate::profiles::document_store::DocumentStore;
use crate::profiles::error::ProfileError;
use crate::profiles::profile::{
    ActivityEntry, ProfileData, StudentProfile, ACTIVITY_FIELD, CREATED_AT_FIELD, USER_ID_FIELD,
};
use crate::profiles::value::{FieldValue, Fields};
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

pub const DEFAULT_RECENT_LIMIT: usize = 5;

#[derive(Clone)]
pub struct ProfileStore {
    documents: Arc<dyn DocumentStore>,
    auth: Arc<dyn AuthProvider>,
}

impl ProfileStore {
    pub fn new(documents: Arc<dyn DocumentStore>, auth: Arc<dyn AuthProvider>) -> Self {
        Self { documents, auth }
    }

    fn validate_user_id(user_id: &str) -> Result<(), ProfileError> {
        if user_id.is_empty() {
            return Err(ProfileError::Validation("User id cannot be empty".to_string()));
        }
        if user_id.contains('/') {
            return Err(ProfileError::Validation(format!(
                "User id cannot contain '/': {}",
                user_id
            )));
        }
        if user_id == "." || user_id == ".." {
            return Err(ProfileError::Validation(format!(
                "User id cannot be '{}'",
                user_id
            )));
        }
        Ok(())
    }

    /// Reads the user's profile. A missing document is `Ok(None)`.
    pub async fn fetch_profile(
        &self,
        user_id: &str,
    ) -> Result<Option<StudentProfile>, ProfileError> {
        Self::validate_user_id(user_id)?;

        match self.documents.get(user_id).await {
            Ok(fields) => Ok(fields.map(|fields| StudentProfile::from_fields(user_id, fields))),
            Err(e) => {
                error!("Failed to fetch profile for '{}': {}", user_id, e);
                Err(e)
            }
        }
    }

    /// Appends an entry stamped with the current time to the user's activity
    /// log, creating the profile document if it does not exist yet.
    pub async fn log_activity(
        &self,
        user_id: &str,
        action: &str,
        details: Map<String, Value>,
    ) -> Result<(), ProfileError> {
        Self::validate_user_id(user_id)?;

        let entry = ActivityEntry::new(action, details);
        let result = match self
            .documents
            .append(user_id, ACTIVITY_FIELD, entry.to_field_value())
            .await
        {
            Err(e) if e.is_not_found() => {
                warn!("No profile for '{}' yet, creating it with its first activity", user_id);
                let mut fields = Fields::new();
                fields.insert(
                    ACTIVITY_FIELD.to_string(),
                    FieldValue::Array(vec![entry.to_field_value()]),
                );
                self.documents.set(user_id, fields).await
            }
            other => other,
        };

        match result {
            Ok(()) => {
                info!("Logged activity '{}' for '{}'", action, user_id);
                Ok(())
            }
            Err(e) => {
                error!("Failed to log activity '{}' for '{}': {}", action, user_id, e);
                Err(e)
            }
        }
    }

    /// The last `limit` activity entries, newest first. A missing document
    /// yields an empty list.
    pub async fn fetch_recent_activity(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ActivityEntry>, ProfileError> {
        let profile = self.fetch_profile(user_id).await?;
        Ok(profile
            .map(|p| p.recent_activity(limit))
            .unwrap_or_default())
    }

    /// Merges `data` into the user's profile, creating the document with a
    /// `createdAt` stamp when it does not exist.
    pub async fn upsert_profile(
        &self,
        user_id: &str,
        data: &ProfileData,
    ) -> Result<(), ProfileError> {
        Self::validate_user_id(user_id)?;
        for reserved in [ACTIVITY_FIELD, CREATED_AT_FIELD, USER_ID_FIELD] {
            if data.extra.contains_key(reserved) {
                return Err(ProfileError::Validation(format!(
                    "'{}' is maintained by the store and cannot be written directly",
                    reserved
                )));
            }
        }

        let result = match data.to_fields() {
            Ok(fields) => match self.documents.update(user_id, fields.clone()).await {
                Err(e) if e.is_not_found() => {
                    let mut fields = fields;
                    fields.insert(
                        CREATED_AT_FIELD.to_string(),
                        FieldValue::Timestamp(Utc::now()),
                    );
                    self.documents.set(user_id, fields).await
                }
                other => other,
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!("Saved profile for '{}'", user_id);
                Ok(())
            }
            Err(e) => {
                error!("Failed to save profile for '{}': {}", user_id, e);
                Err(e)
            }
        }
    }

    pub async fn sign_in_interactive(&self) -> Result<AuthUser, ProfileError> {
        self.auth.sign_in_interactive().await.map_err(|e| {
            error!("Sign-in failed: {}", e);
            e
        })
    }

    pub async fn sign_out(&self) -> Result<(), ProfileError> {
        self.auth.sign_out().await.map_err(|e| {
            error!("Sign-out failed: {}", e);
            e
        })
    }

    pub async fn current_user(&self) -> Option<AuthUser> {
        self.auth.current_user().await
    }
}
