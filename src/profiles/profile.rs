//! Student profile and activity log structures

use crate::profiles::error::ProfileError;
use crate::profiles::value::{fields_to_json, map_from_json, FieldValue, Fields};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

pub const ACTIVITY_FIELD: &str = "activity";
pub const CREATED_AT_FIELD: &str = "createdAt";
/// Output key carrying the document id; a stored field of this name is dropped
pub const USER_ID_FIELD: &str = "userId";

/// Caller-owned profile fields. Every field is optional and unset fields
/// are never written, so an update only touches what is present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grade: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub board: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_goal_minutes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lessons_mastered: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doubts_asked: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quizzes_completed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readiness: Option<f64>,
    /// Fields this layer has no name for; passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProfileData {
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn to_fields(&self) -> Result<Fields, ProfileError> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map_from_json(map)),
            other => Err(ProfileError::Validation(format!(
                "profile data must serialize to an object, got {}",
                other
            ))),
        }
    }

    /// Builds profile data from stored JSON. A known field holding a value
    /// of an unexpected type is kept verbatim in `extra` instead of failing
    /// the whole read.
    pub fn from_json(map: Map<String, Value>) -> Self {
        let mut typed = Map::new();
        let mut mistyped = Map::new();

        for (key, value) in map {
            let probe = Value::Object(Map::from_iter([(key.clone(), value.clone())]));
            if serde_json::from_value::<ProfileData>(probe).is_ok() {
                typed.insert(key, value);
            } else {
                warn!("Profile field '{}' has an unexpected type, keeping it as-is", key);
                mistyped.insert(key, value);
            }
        }

        let mut data: ProfileData =
            serde_json::from_value(Value::Object(typed)).unwrap_or_default();
        data.extra.extend(mistyped);
        data
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub action: String,
    #[serde(default)]
    pub details: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn new(action: impl Into<String>, details: Map<String, Value>) -> Self {
        Self {
            action: action.into(),
            details,
            timestamp: Utc::now(),
        }
    }

    pub fn to_field_value(&self) -> FieldValue {
        let mut map = BTreeMap::new();
        map.insert("action".to_string(), FieldValue::String(self.action.clone()));
        map.insert(
            "details".to_string(),
            FieldValue::Map(map_from_json(self.details.clone())),
        );
        map.insert("timestamp".to_string(), FieldValue::Timestamp(self.timestamp));
        FieldValue::Map(map)
    }

    pub fn from_field_value(value: &FieldValue) -> Option<Self> {
        let map = value.as_map()?;
        let action = map.get("action")?.as_str()?.to_string();
        let timestamp = map.get("timestamp")?.as_timestamp()?;
        let details = match map.get("details") {
            Some(FieldValue::Map(details)) => fields_to_json(details),
            _ => Map::new(),
        };
        Some(Self {
            action,
            details,
            timestamp,
        })
    }
}

/// One stored profile document
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub user_id: String,
    #[serde(flatten)]
    pub data: ProfileData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Activity log in append order
    pub activity: Vec<ActivityEntry>,
}

impl StudentProfile {
    pub fn from_fields(user_id: impl Into<String>, mut fields: Fields) -> Self {
        let user_id = user_id.into();

        let activity = match fields.remove(ACTIVITY_FIELD) {
            Some(FieldValue::Array(values)) => values
                .iter()
                .filter_map(|value| {
                    let entry = ActivityEntry::from_field_value(value);
                    if entry.is_none() {
                        warn!("Skipping malformed activity entry for user '{}'", user_id);
                    }
                    entry
                })
                .collect(),
            Some(_) => {
                warn!("Activity field for user '{}' is not a list", user_id);
                Vec::new()
            }
            None => Vec::new(),
        };

        let created_at = match fields.remove(CREATED_AT_FIELD) {
            Some(FieldValue::Timestamp(ts)) => Some(ts),
            Some(other) => {
                // kept verbatim in `extra` unless it is an RFC 3339 string
                let parsed = other.as_timestamp();
                if parsed.is_none() {
                    fields.insert(CREATED_AT_FIELD.to_string(), other);
                }
                parsed
            }
            None => None,
        };

        if let Some(stored) = fields.remove(USER_ID_FIELD) {
            if stored.as_str() != Some(user_id.as_str()) {
                warn!(
                    "Ignoring stored '{}' field of document '{}'",
                    USER_ID_FIELD, user_id
                );
            }
        }

        Self {
            user_id,
            data: ProfileData::from_json(fields_to_json(&fields)),
            created_at,
            activity,
        }
    }

    /// The last `limit` entries, newest first
    pub fn recent_activity(&self, limit: usize) -> Vec<ActivityEntry> {
        let start = self.activity.len().saturating_sub(limit);
        self.activity[start..].iter().rev().cloned().collect()
    }
}
