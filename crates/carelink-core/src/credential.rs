//! Unverified credential inspection.
//!
//! Media credentials are signed tokens of the form `header.payload.signature`.
//! The client never verifies the signature; it only decodes the payload to
//! log which room and participant the credential is for, and to refuse a
//! credential that carries no participant identity at all.
//!
//! Token issuers place the identity in different spots, so all of these are
//! checked, in order:
//!
//! 1. `identity`
//! 2. `video.identity`
//! 3. `metadata.identity`
//! 4. `metadata.fullName`
//!
//! `metadata` may be an object or a JSON document encoded as a string.

use base64::{
    Engine,
    engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD},
};
use serde_json::{Map, Value};

use crate::error::CredentialError;

/// Fields of interest from a credential payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialClaims {
    /// Participant identity.
    pub identity: String,
    /// Room the credential grants access to (`video.room`).
    pub room: Option<String>,
    /// Participant display name (`video.name`).
    pub name: Option<String>,
    /// Parsed metadata object, empty if absent or unparsable.
    pub metadata: Map<String, Value>,
}

/// Decode the payload segment of a signed token into a JSON object.
pub fn decode_payload(token: &str) -> Result<Map<String, Value>, CredentialError> {
    let segment = token
        .split('.')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .ok_or(CredentialError::Malformed)?;
    let segment = segment.trim_end_matches('=');

    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .or_else(|_| STANDARD_NO_PAD.decode(segment))
        .map_err(|e| CredentialError::Encoding(e.to_string()))?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(CredentialError::Payload(format!("found {}", json_kind(&other)))),
        Err(e) => Err(CredentialError::Payload(e.to_string())),
    }
}

/// Decode a credential and extract the participant identity.
///
/// # Errors
///
/// - [`CredentialError::Malformed`] / [`CredentialError::Encoding`] /
///   [`CredentialError::Payload`] if the payload cannot be decoded
/// - [`CredentialError::MissingIdentity`] if no identity field is present
pub fn inspect(token: &str) -> Result<CredentialClaims, CredentialError> {
    let payload = decode_payload(token)?;
    let video = payload.get("video").and_then(Value::as_object);
    let metadata = parse_metadata(payload.get("metadata"));

    let identity = non_empty_str(payload.get("identity"))
        .or_else(|| video.and_then(|v| non_empty_str(v.get("identity"))))
        .or_else(|| non_empty_str(metadata.get("identity")))
        .or_else(|| non_empty_str(metadata.get("fullName")))
        .ok_or(CredentialError::MissingIdentity)?
        .to_string();

    let room = video.and_then(|v| non_empty_str(v.get("room"))).map(str::to_string);
    let name = video.and_then(|v| non_empty_str(v.get("name"))).map(str::to_string);

    Ok(CredentialClaims { identity, room, name, metadata })
}

fn parse_metadata(raw: Option<&Value>) -> Map<String, Value> {
    match raw {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(e) => {
                tracing::warn!(error = %e, "credential metadata is not valid JSON");
                Map::new()
            },
        },
        _ => Map::new(),
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
