//! Student profiles and activity logs on a Firebase document store

pub mod auth;
pub mod config;
pub mod document_store;
pub mod error;
pub mod firestore;
pub mod http;
pub mod memory;
pub mod profile;
pub mod store;
pub mod value;

pub use auth::{AuthProvider, AuthUser, FirebaseAuth, LocalAuth, ServiceAccountTokens, TokenSource};
pub use config::FirebaseConfig;
pub use document_store::DocumentStore;
pub use error::ProfileError;
pub use firestore::FirestoreStore;
pub use memory::MemoryStore;
pub use profile::{ActivityEntry, ProfileData, StudentProfile};
pub use store::{ProfileStore, DEFAULT_RECENT_LIMIT};
pub use value::{FieldValue, Fields};
