//! Configuration for the Firebase-backed profile store

use crate::profiles::error::ProfileError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_COLLECTION: &str = "users";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirebaseConfig {
    pub api_key: String,
    pub auth_domain: String,
    pub project_id: String,
    pub storage_bucket: String,
    pub messaging_sender_id: String,
    pub app_id: String,
    /// Collection holding one profile document per user id
    pub collection: String,
    /// OAuth desktop client used for the interactive Google sign-in
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
    /// Service account key; when set, documents are accessed as that account
    pub credentials_path: Option<PathBuf>,
    /// `host:port` of a local Firestore emulator
    pub emulator_host: Option<String>,
}

impl FirebaseConfig {
    pub fn new(project_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_oauth_client(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.oauth_client_id = client_id.into();
        self.oauth_client_secret = client_secret.into();
        self
    }

    pub fn with_credentials(mut self, credentials_path: impl Into<PathBuf>) -> Self {
        self.credentials_path = Some(credentials_path.into());
        self
    }

    pub fn with_emulator(mut self, host: impl Into<String>) -> Self {
        self.emulator_host = Some(host.into());
        self
    }

    /// Reads every setting from the process environment. Missing variables
    /// fall back to empty strings.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let string = |key: &str| lookup(key).unwrap_or_default();
        let optional = |key: &str| lookup(key).filter(|v| !v.is_empty());

        Self {
            api_key: string("FIREBASE_API_KEY"),
            auth_domain: string("FIREBASE_AUTH_DOMAIN"),
            project_id: string("FIREBASE_PROJECT_ID"),
            storage_bucket: string("FIREBASE_STORAGE_BUCKET"),
            messaging_sender_id: string("FIREBASE_MESSAGING_SENDER_ID"),
            app_id: string("FIREBASE_APP_ID"),
            collection: optional("PROFILE_COLLECTION")
                .unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            oauth_client_id: string("GOOGLE_OAUTH_CLIENT_ID"),
            oauth_client_secret: string("GOOGLE_OAUTH_CLIENT_SECRET"),
            credentials_path: optional("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from),
            emulator_host: optional("FIRESTORE_EMULATOR_HOST"),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ProfileError> {
        toml::from_str(text).map_err(|e| ProfileError::Config(format!("Invalid config: {}", e)))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ProfileError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ProfileError::Config(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Settings needed to address documents
    pub fn require_project(&self) -> Result<(), ProfileError> {
        if self.project_id.is_empty() {
            return Err(ProfileError::Config("FIREBASE_PROJECT_ID is not set".to_string()));
        }
        if self.collection.is_empty() {
            return Err(ProfileError::Config("collection name is empty".to_string()));
        }
        Ok(())
    }

    /// Settings needed for the interactive sign-in
    pub fn require_sign_in(&self) -> Result<(), ProfileError> {
        if self.api_key.is_empty() {
            return Err(ProfileError::Config("FIREBASE_API_KEY is not set".to_string()));
        }
        if self.oauth_client_id.is_empty() {
            return Err(ProfileError::Config("GOOGLE_OAUTH_CLIENT_ID is not set".to_string()));
        }
        Ok(())
    }
}

impl Default for FirebaseConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            auth_domain: String::new(),
            project_id: String::new(),
            storage_bucket: String::new(),
            messaging_sender_id: String::new(),
            app_id: String::new(),
            collection: DEFAULT_COLLECTION.to_string(),
            oauth_client_id: String::new(),
            oauth_client_secret: String::new(),
            credentials_path: None,
            emulator_host: None,
        }
    }
}
