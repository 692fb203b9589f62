//! The persisted state of one fingerprint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::RequestIdentity;

/// A captured handler response: status code plus the full body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl CapturedResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// The coordination record stored under a fingerprint key.
///
/// Created provisional when a request claims its fingerprint and overwritten
/// once with the final outcome. `body_hash` never changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub in_progress: bool,
    pub status_code: Option<u16>,
    #[serde(with = "base64_body", default)]
    pub response_body: Option<Vec<u8>>,
    pub body_hash: String,
    pub request_id: String,
    pub request_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// A claim placeholder for a request whose handler has not finished.
    pub fn provisional(identity: &RequestIdentity, body_hash: String, now: DateTime<Utc>) -> Self {
        Self {
            in_progress: true,
            status_code: None,
            response_body: None,
            body_hash,
            request_id: identity.request_id.clone(),
            request_timestamp: identity.request_at,
            created_at: now,
        }
    }

    /// The final record carrying the handler's response.
    pub fn finalize(self, response: CapturedResponse, now: DateTime<Utc>) -> Self {
        Self {
            in_progress: false,
            status_code: Some(response.status),
            response_body: Some(response.body),
            created_at: now,
            ..self
        }
    }

    /// Returns the stored response if this record may be replayed.
    ///
    /// Only finalized records with a non-empty body are replayable.
    pub fn replayable(&self) -> Option<CapturedResponse> {
        if self.in_progress {
            return None;
        }
        match (self.status_code, &self.response_body) {
            (Some(status), Some(body)) if !body.is_empty() => {
                Some(CapturedResponse::new(status, body.clone()))
            }
            _ => None,
        }
    }
}

mod base64_body {
    use base64::{Engine as _, engine::general_purpose};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match body {
            Some(bytes) => s.serialize_some(&general_purpose::STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|encoded| {
                general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}
