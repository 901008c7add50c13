//! Firebase authentication
//!
//! `FirebaseAuth` signs a user in through Google's installed-app OAuth flow
//! and exchanges the resulting Google ID token for a Firebase session. The
//! Firebase ID token of that session is what document requests carry.
//! `ServiceAccountTokens` is the server-side alternative.

use crate::profiles::config::FirebaseConfig;
use crate::profiles::error::ProfileError;
use crate::profiles::http::{build_client, send_json, HttpsClient};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hyper::Method;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use yup_oauth2::authenticator::Authenticator;
use yup_oauth2::{
    ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod,
    ServiceAccountAuthenticator, ServiceAccountKey,
};

const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";
const SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1/token";
const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const SIGN_IN_SCOPES: &[&str] = &["openid", "email", "profile"];
const DATASTORE_SCOPES: &[&str] = &["https://www.googleapis.com/auth/datastore"];

/// Refresh the Firebase ID token when it expires within this many seconds
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl AuthUser {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: None,
            display_name: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Runs an interactive sign-in and resolves once the user has finished it.
    async fn sign_in_interactive(&self) -> Result<AuthUser, ProfileError>;

    /// Ends the current session. Signing out without a session is a no-op.
    async fn sign_out(&self) -> Result<(), ProfileError>;

    async fn current_user(&self) -> Option<AuthUser>;
}

/// Supplies the bearer token attached to document requests.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn bearer_token(&self) -> Result<Option<String>, ProfileError>;
}

#[derive(Debug, Clone)]
struct Session {
    user: AuthUser,
    id_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

impl Session {
    fn expires_soon(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now <= Duration::seconds(REFRESH_MARGIN_SECS)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    local_id: String,
    id_token: String,
    refresh_token: String,
    expires_in: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

impl SignInResponse {
    fn into_session(self, now: DateTime<Utc>) -> Session {
        Session {
            user: AuthUser {
                uid: self.local_id,
                email: self.email,
                display_name: self.display_name,
            },
            id_token: self.id_token,
            refresh_token: self.refresh_token,
            expires_at: now + expires_in(&self.expires_in),
        }
    }
}

#[derive(Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

fn expires_in(seconds: &str) -> Duration {
    Duration::seconds(seconds.parse().unwrap_or(3600))
}

pub struct FirebaseAuth {
    client: HttpsClient,
    config: FirebaseConfig,
    session: RwLock<Option<Session>>,
}

impl FirebaseAuth {
    pub fn new(config: FirebaseConfig) -> Result<Self, ProfileError> {
        Ok(Self {
            client: build_client()?,
            config,
            session: RwLock::new(None),
        })
    }

    fn application_secret(&self) -> ApplicationSecret {
        ApplicationSecret {
            client_id: self.config.oauth_client_id.clone(),
            client_secret: self.config.oauth_client_secret.clone(),
            auth_uri: GOOGLE_AUTH_URI.to_string(),
            token_uri: GOOGLE_TOKEN_URI.to_string(),
            redirect_uris: vec!["http://localhost".to_string()],
            ..Default::default()
        }
    }

    /// Opens the Google consent page and waits on a loopback redirect.
    async fn google_id_token(&self) -> Result<String, ProfileError> {
        let auth = InstalledFlowAuthenticator::builder(
            self.application_secret(),
            InstalledFlowReturnMethod::HTTPRedirect,
        )
        .build()
        .await
        .map_err(|e| ProfileError::Auth(format!("Failed to build authenticator: {}", e)))?;

        auth.id_token(SIGN_IN_SCOPES)
            .await
            .map_err(|e| ProfileError::Auth(format!("Google sign-in failed: {}", e)))?
            .ok_or_else(|| ProfileError::Auth("Google did not return an ID token".to_string()))
    }

    async fn exchange_for_session(&self, google_id_token: &str) -> Result<Session, ProfileError> {
        let url = format!(
            "{}/accounts:signInWithIdp?key={}",
            IDENTITY_TOOLKIT_URL, self.config.api_key
        );
        let body = json!({
            "postBody": format!("id_token={}&providerId=google.com", google_id_token),
            "requestUri": "http://localhost",
            "returnIdpCredential": true,
            "returnSecureToken": true,
        });

        let response = send_json(&self.client, Method::POST, &url, None, Some(&body)).await?;
        if !response.is_success() {
            let (status, message) = response.google_error();
            return Err(ProfileError::Auth(format!(
                "Firebase rejected the Google credential ({}): {}",
                status, message
            )));
        }

        let parsed: SignInResponse = serde_json::from_value(response.body)?;
        Ok(parsed.into_session(Utc::now()))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ProfileError> {
        let url = format!("{}?key={}", SECURE_TOKEN_URL, self.config.api_key);
        let body = json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
        });

        let response = send_json(&self.client, Method::POST, &url, None, Some(&body)).await?;
        if !response.is_success() {
            let (status, message) = response.google_error();
            return Err(ProfileError::Auth(format!(
                "Failed to refresh session ({}): {}",
                status, message
            )));
        }
        Ok(serde_json::from_value(response.body)?)
    }
}

#[async_trait]
impl AuthProvider for FirebaseAuth {
    async fn sign_in_interactive(&self) -> Result<AuthUser, ProfileError> {
        self.config.require_sign_in()?;

        let google_id_token = self.google_id_token().await?;
        let session = self.exchange_for_session(&google_id_token).await?;
        let user = session.user.clone();

        *self.session.write().await = Some(session);
        info!("Signed in as '{}'", user.uid);
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), ProfileError> {
        if let Some(session) = self.session.write().await.take() {
            info!("Signed out '{}'", session.user.uid);
        }
        Ok(())
    }

    async fn current_user(&self) -> Option<AuthUser> {
        self.session.read().await.as_ref().map(|s| s.user.clone())
    }
}

#[async_trait]
impl TokenSource for FirebaseAuth {
    async fn bearer_token(&self) -> Result<Option<String>, ProfileError> {
        let refresh_token = {
            let session = self.session.read().await;
            match session.as_ref() {
                None => return Ok(None),
                Some(s) if !s.expires_soon(Utc::now()) => return Ok(Some(s.id_token.clone())),
                Some(s) => s.refresh_token.clone(),
            }
        };

        let refreshed = self.refresh(&refresh_token).await.map_err(|e| {
            error!("Session refresh failed: {}", e);
            e
        })?;

        let mut session = self.session.write().await;
        match session.as_mut() {
            Some(s) => {
                s.id_token = refreshed.id_token;
                s.refresh_token = refreshed.refresh_token;
                s.expires_at = Utc::now() + expires_in(&refreshed.expires_in);
                Ok(Some(s.id_token.clone()))
            }
            None => {
                warn!("Session ended while its token was being refreshed");
                Ok(None)
            }
        }
    }
}

pub type ServiceAuthenticator = Authenticator<HttpsConnector<HttpConnector>>;

/// Access tokens for a service account, for trusted server-side use
pub struct ServiceAccountTokens {
    auth: ServiceAuthenticator,
}

impl ServiceAccountTokens {
    pub async fn from_file(credentials_path: impl AsRef<Path>) -> Result<Self, ProfileError> {
        let credentials_path = credentials_path.as_ref();

        let _ = rustls::crypto::ring::default_provider().install_default();

        let key_data = std::fs::read_to_string(credentials_path).map_err(|e| {
            ProfileError::CredentialsFile(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to read credentials file '{}': {}",
                    credentials_path.display(),
                    e
                ),
            ))
        })?;

        let service_account_key: ServiceAccountKey =
            serde_json::from_str(&key_data).map_err(|e| {
                ProfileError::Auth(format!("Failed to parse service account key: {}", e))
            })?;

        info!(
            "Using service account '{}'",
            service_account_key.client_email
        );

        let auth = ServiceAccountAuthenticator::builder(service_account_key)
            .build()
            .await
            .map_err(|e| ProfileError::Auth(format!("Failed to build authenticator: {}", e)))?;

        Ok(Self { auth })
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokens {
    async fn bearer_token(&self) -> Result<Option<String>, ProfileError> {
        let token = self
            .auth
            .token(DATASTORE_SCOPES)
            .await
            .map_err(|e| ProfileError::Auth(format!("Failed to obtain access token: {}", e)))?;
        Ok(token.token().map(str::to_string))
    }
}

/// A fixed identity, for in-memory runs and tests
pub struct LocalAuth {
    user: AuthUser,
    signed_in: RwLock<bool>,
}

impl LocalAuth {
    pub fn new(user: AuthUser) -> Self {
        Self {
            user,
            signed_in: RwLock::new(false),
        }
    }
}

#[async_trait]
impl AuthProvider for LocalAuth {
    async fn sign_in_interactive(&self) -> Result<AuthUser, ProfileError> {
        *self.signed_in.write().await = true;
        Ok(self.user.clone())
    }

    async fn sign_out(&self) -> Result<(), ProfileError> {
        *self.signed_in.write().await = false;
        Ok(())
    }

    async fn current_user(&self) -> Option<AuthUser> {
        if *self.signed_in.read().await {
            Some(self.user.clone())
        } else {
            None
        }
    }
}
