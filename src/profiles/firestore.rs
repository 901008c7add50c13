//! Document store backed by the Firestore REST API
//! Structure: projects/{project}/databases/(default)/documents/{collection}/{user_id}
//!
//! Reads go through `GET` on the document; every write is a single-write
//! `:commit` so that preconditions and array transforms are applied
//! atomically on the server.

use crate::profiles::auth::TokenSource;
use crate::profiles::config::FirebaseConfig;
use crate::profiles::document_store::DocumentStore;
use crate::profiles::error::ProfileError;
use crate::profiles::http::{build_client, send_json, HttpsClient, JsonResponse};
use crate::profiles::value::{FieldValue, Fields};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use hyper::{Method, StatusCode};
use serde_json::{json, Map, Number, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

const FIRESTORE_ENDPOINT: &str = "https://firestore.googleapis.com";

pub struct FirestoreStore {
    client: HttpsClient,
    endpoint: String,
    database: String,
    collection: String,
    tokens: Option<Arc<dyn TokenSource>>,
}

impl FirestoreStore {
    /// `tokens` is ignored when an emulator host is configured.
    pub fn new(
        config: &FirebaseConfig,
        tokens: Option<Arc<dyn TokenSource>>,
    ) -> Result<Self, ProfileError> {
        config.require_project()?;

        let (endpoint, tokens) = match &config.emulator_host {
            Some(host) => (format!("http://{}", host), None),
            None => (FIRESTORE_ENDPOINT.to_string(), tokens),
        };

        info!(
            "FirestoreStore initialized for project '{}', collection '{}' at {}",
            config.project_id, config.collection, endpoint
        );

        Ok(Self {
            client: build_client()?,
            endpoint,
            database: format!("projects/{}/databases/(default)/documents", config.project_id),
            collection: config.collection.clone(),
            tokens,
        })
    }

    fn document_name(&self, id: &str) -> String {
        format!("{}/{}/{}", self.database, self.collection, id)
    }

    fn document_url(&self, id: &str) -> String {
        document_url(&self.endpoint, &self.database, &self.collection, id)
    }

    fn commit_url(&self) -> String {
        format!("{}/v1/{}:commit", self.endpoint, self.database)
    }

    async fn bearer(&self) -> Result<Option<String>, ProfileError> {
        match &self.tokens {
            Some(tokens) => tokens.bearer_token().await,
            None => Ok(None),
        }
    }

    async fn commit(&self, id: &str, write: Value) -> Result<(), ProfileError> {
        let token = self.bearer().await?;
        let body = json!({ "writes": [write] });

        let response = send_json(
            &self.client,
            Method::POST,
            &self.commit_url(),
            token.as_deref(),
            Some(&body),
        )
        .await?;

        if response.is_success() {
            debug!("Committed write to {}", self.document_name(id));
            Ok(())
        } else {
            Err(response_error(&response, id))
        }
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn get(&self, id: &str) -> Result<Option<Fields>, ProfileError> {
        let token = self.bearer().await?;
        let response = send_json(
            &self.client,
            Method::GET,
            &self.document_url(id),
            token.as_deref(),
            None,
        )
        .await?;

        if response.is_success() {
            return decode_document(&response.body).map(Some);
        }
        match response_error(&response, id) {
            ProfileError::NotFound(_) => Ok(None),
            other => Err(other),
        }
    }

    async fn set(&self, id: &str, fields: Fields) -> Result<(), ProfileError> {
        self.commit(id, set_write(&self.document_name(id), &fields))
            .await
    }

    async fn update(&self, id: &str, fields: Fields) -> Result<(), ProfileError> {
        self.commit(id, update_write(&self.document_name(id), &fields))
            .await
    }

    async fn append(&self, id: &str, field: &str, value: FieldValue) -> Result<(), ProfileError> {
        self.commit(id, append_write(&self.document_name(id), field, &value))
            .await
    }
}

/// The id is a single path segment; it is percent-encoded so that `?`, `#`
/// and `%` address the same document the commit body names.
fn document_url(endpoint: &str, database: &str, collection: &str, id: &str) -> String {
    format!(
        "{}/v1/{}/{}/{}",
        endpoint,
        database,
        collection,
        urlencoding::encode(id)
    )
}

/// Maps a failed response. `NOT_FOUND` means the document is missing unless
/// the message says the database itself does not exist.
fn response_error(response: &JsonResponse, id: &str) -> ProfileError {
    let (status, message) = response.google_error();
    let not_found = response.status == StatusCode::NOT_FOUND || status == "NOT_FOUND";
    let missing_database = message.contains("database") && message.contains("does not exist");

    if not_found && !missing_database {
        ProfileError::NotFound(id.to_string())
    } else {
        ProfileError::Backend(format!("{} ({}): {}", response.status, status, message))
    }
}

fn set_write(name: &str, fields: &Fields) -> Value {
    json!({
        "update": { "name": name, "fields": encode_fields(fields) },
    })
}

fn update_write(name: &str, fields: &Fields) -> Value {
    let paths: Vec<String> = fields.keys().map(|k| field_path(k)).collect();
    json!({
        "update": { "name": name, "fields": encode_fields(fields) },
        "updateMask": { "fieldPaths": paths },
        "currentDocument": { "exists": true },
    })
}

fn append_write(name: &str, field: &str, value: &FieldValue) -> Value {
    json!({
        "transform": {
            "document": name,
            "fieldTransforms": [{
                "fieldPath": field_path(field),
                "appendMissingElements": { "values": [encode_value(value)] },
            }],
        },
        "currentDocument": { "exists": true },
    })
}

/// Field names that are not plain identifiers must be backtick-quoted.
fn field_path(name: &str) -> String {
    let mut chars = name.chars();
    let simple = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if simple {
        name.to_string()
    } else {
        format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

fn encode_fields(fields: &Fields) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(k, v)| (k.clone(), encode_value(v)))
            .collect(),
    )
}

fn encode_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => json!({ "nullValue": null }),
        FieldValue::Boolean(b) => json!({ "booleanValue": b }),
        FieldValue::Integer(i) => json!({ "integerValue": i.to_string() }),
        FieldValue::Double(d) => {
            let encoded = match Number::from_f64(*d) {
                Some(n) => Value::Number(n),
                None if d.is_nan() => Value::String("NaN".into()),
                None if *d > 0.0 => Value::String("Infinity".into()),
                None => Value::String("-Infinity".into()),
            };
            json!({ "doubleValue": encoded })
        }
        FieldValue::Timestamp(ts) => {
            json!({ "timestampValue": ts.to_rfc3339_opts(SecondsFormat::Micros, true) })
        }
        FieldValue::String(s) => json!({ "stringValue": s }),
        FieldValue::Array(values) => {
            let values: Vec<Value> = values.iter().map(encode_value).collect();
            json!({ "arrayValue": { "values": values } })
        }
        FieldValue::Map(map) => {
            let fields: Map<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), encode_value(v)))
                .collect();
            json!({ "mapValue": { "fields": fields } })
        }
    }
}

fn decode_document(body: &Value) -> Result<Fields, ProfileError> {
    match body.get("fields") {
        Some(fields) => decode_fields(fields),
        None => Ok(Fields::new()),
    }
}

fn decode_fields(fields: &Value) -> Result<BTreeMap<String, FieldValue>, ProfileError> {
    let object = fields
        .as_object()
        .ok_or_else(|| ProfileError::Backend(format!("Expected a fields object, got {}", fields)))?;
    object
        .iter()
        .map(|(k, v)| Ok((k.clone(), decode_value(v)?)))
        .collect()
}

fn decode_value(value: &Value) -> Result<FieldValue, ProfileError> {
    let unsupported = || ProfileError::Backend(format!("Unsupported Firestore value: {}", value));
    let object = value.as_object().ok_or_else(unsupported)?;
    let (kind, inner) = object.iter().next().ok_or_else(unsupported)?;

    let decoded = match kind.as_str() {
        "nullValue" => FieldValue::Null,
        "booleanValue" => FieldValue::Boolean(inner.as_bool().ok_or_else(unsupported)?),
        "integerValue" => {
            let parsed = match inner {
                Value::String(s) => s.parse().ok(),
                other => other.as_i64(),
            };
            FieldValue::Integer(parsed.ok_or_else(unsupported)?)
        }
        "doubleValue" => {
            let parsed = match inner {
                Value::String(s) => match s.as_str() {
                    "Infinity" => Some(f64::INFINITY),
                    "-Infinity" => Some(f64::NEG_INFINITY),
                    other => other.parse().ok(),
                },
                other => other.as_f64(),
            };
            FieldValue::Double(parsed.ok_or_else(unsupported)?)
        }
        "timestampValue" => {
            let raw = inner.as_str().ok_or_else(unsupported)?;
            let ts = DateTime::parse_from_rfc3339(raw).map_err(|_| unsupported())?;
            FieldValue::Timestamp(ts.with_timezone(&Utc))
        }
        "stringValue" | "bytesValue" | "referenceValue" => {
            FieldValue::String(inner.as_str().ok_or_else(unsupported)?.to_string())
        }
        "geoPointValue" => {
            let mut point = BTreeMap::new();
            for axis in ["latitude", "longitude"] {
                let coordinate = inner[axis].as_f64().unwrap_or_default();
                point.insert(axis.to_string(), FieldValue::Double(coordinate));
            }
            FieldValue::Map(point)
        }
        "arrayValue" => {
            let values = match inner.get("values").and_then(Value::as_array) {
                Some(values) => values.iter().map(decode_value).collect::<Result<_, _>>()?,
                None => Vec::new(),
            };
            FieldValue::Array(values)
        }
        "mapValue" => match inner.get("fields") {
            Some(fields) => FieldValue::Map(decode_fields(fields)?),
            None => FieldValue::Map(BTreeMap::new()),
        },
        _ => return Err(unsupported()),
    };
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const NAME: &str = "projects/demo/databases/(default)/documents/users/u1";

    fn response(status: StatusCode, body: Value) -> JsonResponse {
        JsonResponse { status, body }
    }

    #[test]
    fn decodes_a_document_with_every_value_kind() {
        let body = json!({
            "name": NAME,
            "fields": {
                "displayName": { "stringValue": "A" },
                "grade": { "integerValue": "10" },
                "readiness": { "doubleValue": 0.5 },
                "profileCompleted": { "booleanValue": true },
                "nickname": { "nullValue": null },
                "createdAt": { "timestampValue": "2024-01-01T09:00:00.123456Z" },
                "activity": { "arrayValue": { "values": [
                    { "mapValue": { "fields": {
                        "action": { "stringValue": "lesson_completed" },
                        "details": { "mapValue": {} }
                    } } }
                ] } },
                "empty": { "arrayValue": {} }
            },
            "createTime": "2024-01-01T09:00:00Z",
            "updateTime": "2024-01-01T09:00:00Z"
        });

        let fields = decode_document(&body).unwrap();
        assert_eq!(fields["displayName"], FieldValue::String("A".into()));
        assert_eq!(fields["grade"], FieldValue::Integer(10));
        assert_eq!(fields["readiness"], FieldValue::Double(0.5));
        assert_eq!(fields["profileCompleted"], FieldValue::Boolean(true));
        assert_eq!(fields["nickname"], FieldValue::Null);
        assert_eq!(fields["empty"], FieldValue::Array(Vec::new()));

        let created = fields["createdAt"].as_timestamp().unwrap();
        assert_eq!(created.timestamp_subsec_micros(), 123456);

        let entry = &fields["activity"].as_array().unwrap()[0];
        let entry = entry.as_map().unwrap();
        assert_eq!(entry["action"], FieldValue::String("lesson_completed".into()));
        assert_eq!(entry["details"], FieldValue::Map(BTreeMap::new()));
    }

    #[test]
    fn documents_without_fields_decode_empty() {
        let fields = decode_document(&json!({ "name": NAME })).unwrap();
        assert!(fields.is_empty());
    }

    #[test]
    fn unknown_value_kinds_are_rejected() {
        let err = decode_value(&json!({ "vectorValue": [] })).unwrap_err();
        assert!(matches!(err, ProfileError::Backend(_)));
    }

    #[test]
    fn encodes_integers_as_strings_and_timestamps_in_utc() {
        assert_eq!(
            encode_value(&FieldValue::Integer(42)),
            json!({ "integerValue": "42" })
        );
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        assert_eq!(
            encode_value(&FieldValue::Timestamp(ts)),
            json!({ "timestampValue": "2024-01-01T09:00:00.000000Z" })
        );
        assert_eq!(
            encode_value(&FieldValue::Double(f64::NEG_INFINITY)),
            json!({ "doubleValue": "-Infinity" })
        );
    }

    #[test]
    fn encoded_values_decode_back() {
        let mut details = BTreeMap::new();
        details.insert("lessonId".to_string(), FieldValue::String("L1".into()));
        let value = FieldValue::Array(vec![
            FieldValue::Map(details),
            FieldValue::Double(1.25),
            FieldValue::Null,
        ]);
        assert_eq!(decode_value(&encode_value(&value)).unwrap(), value);
    }

    #[test]
    fn update_write_carries_mask_and_existence_precondition() {
        let mut fields = Fields::new();
        fields.insert("grade".into(), FieldValue::Integer(10));
        fields.insert("study-plan".into(), FieldValue::Null);

        let write = update_write(NAME, &fields);
        assert_eq!(write["update"]["name"], json!(NAME));
        assert_eq!(
            write["update"]["fields"]["grade"],
            json!({ "integerValue": "10" })
        );
        assert_eq!(
            write["updateMask"]["fieldPaths"],
            json!(["grade", "`study-plan`"])
        );
        assert_eq!(write["currentDocument"]["exists"], json!(true));
    }

    #[test]
    fn set_write_has_no_mask_or_precondition() {
        let write = set_write(NAME, &Fields::new());
        assert!(write.get("updateMask").is_none());
        assert!(write.get("currentDocument").is_none());
        assert_eq!(write["update"]["fields"], json!({}));
    }

    #[test]
    fn append_write_is_a_guarded_array_transform() {
        let write = append_write(NAME, "activity", &FieldValue::String("x".into()));
        let transform = &write["transform"];
        assert_eq!(transform["document"], json!(NAME));
        assert_eq!(transform["fieldTransforms"][0]["fieldPath"], json!("activity"));
        assert_eq!(
            transform["fieldTransforms"][0]["appendMissingElements"]["values"],
            json!([{ "stringValue": "x" }])
        );
        assert_eq!(write["currentDocument"]["exists"], json!(true));
    }

    #[test]
    fn reserved_characters_stay_inside_the_document_segment() {
        let database = "projects/demo/databases/(default)/documents";
        for id in ["a?b", "a#b", "a%3Fb", "a b"] {
            let url = document_url(FIRESTORE_ENDPOINT, database, "users", id);
            let uri: hyper::Uri = url.parse().unwrap();
            assert!(uri.query().is_none(), "{} leaked a query: {}", id, url);

            let segment = uri.path().rsplit('/').next().unwrap();
            assert_eq!(urlencoding::decode(segment).unwrap(), id);
        }

        let plain = document_url(FIRESTORE_ENDPOINT, database, "users", "u1");
        assert_eq!(
            plain,
            "https://firestore.googleapis.com/v1/projects/demo/databases/(default)/documents/users/u1"
        );
    }

    #[test]
    fn field_paths_quote_non_identifiers() {
        assert_eq!(field_path("dailyGoalMinutes"), "dailyGoalMinutes");
        assert_eq!(field_path("_private"), "_private");
        assert_eq!(field_path("2fa"), "`2fa`");
        assert_eq!(field_path("a`b"), "`a\\`b`");
    }

    #[test]
    fn not_found_responses_map_to_not_found() {
        let err = response_error(
            &response(
                StatusCode::NOT_FOUND,
                json!({ "error": { "code": 404, "message": "No document to update: users/u1", "status": "NOT_FOUND" } }),
            ),
            "u1",
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn missing_database_is_a_backend_error() {
        let err = response_error(
            &response(
                StatusCode::NOT_FOUND,
                json!({ "error": { "code": 404, "message": "The database (default) does not exist for project demo", "status": "NOT_FOUND" } }),
            ),
            "u1",
        );
        assert!(matches!(err, ProfileError::Backend(_)));
    }

    #[test]
    fn other_failures_are_backend_errors() {
        let err = response_error(
            &response(
                StatusCode::FORBIDDEN,
                json!({ "error": { "code": 403, "message": "Missing or insufficient permissions.", "status": "PERMISSION_DENIED" } }),
            ),
            "u1",
        );
        match err {
            ProfileError::Backend(message) => {
                assert!(message.contains("PERMISSION_DENIED"));
                assert!(message.contains("insufficient permissions"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
